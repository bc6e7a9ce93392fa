mod in_memory;
mod log;

pub use in_memory::InMemoryRaftLog;
pub use log::Index;
pub use log::RaftLogEntry;
pub use log::ReadableRaftLog;
pub use log::Term;
