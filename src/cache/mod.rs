mod entry_reader;
mod in_flight;

pub(crate) use entry_reader::EntryReader;
pub use in_flight::ConsecutiveInFlightCache;
pub use in_flight::InFlightCache;
