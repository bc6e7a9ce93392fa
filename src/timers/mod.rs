mod time;
mod timer;

pub use time::Clock;
pub use time::RealClock;
pub use timer::CancelMode;
pub use timer::Timer;
pub use timer::TimerService;

#[cfg(test)]
pub(crate) use time::{mocked_clock, MockClock, MockClockController};
