use crate::timers::time::{Clock, RealClock};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CancelMode {
    /// Prevent the callback from running if it hasn't started yet. Never blocks.
    Async,
    /// Like `Async`, but if the callback is already running, block until it returns.
    Sync,
}

/// TimerService runs one-shot callbacks after a delay, on the tokio runtime it was created in.
#[derive(Clone)]
pub struct TimerService<C: Clock = RealClock> {
    runtime: Handle,
    clock: C,
}

impl TimerService<RealClock> {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_clock(RealClock)
    }
}

impl<C: Clock> TimerService<C> {
    /// Must be called from within a tokio runtime.
    pub fn with_clock(clock: C) -> Self {
        TimerService {
            runtime: Handle::current(),
            clock,
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn schedule<F>(&self, delay: Duration, callback: F) -> Timer
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending),
            finished: Condvar::new(),
        });
        let task = TimerTask {
            deadline: self.clock.now() + delay,
            clock: self.clock.clone(),
            shared: shared.clone(),
            callback,
        };
        let join_handle = self.runtime.spawn(task.run());

        Timer { shared, join_handle }
    }
}

/// Handle to a scheduled callback. Dropping it does NOT cancel the callback.
pub struct Timer {
    shared: Arc<Shared>,
    join_handle: JoinHandle<()>,
}

impl Timer {
    pub fn cancel(&self, mode: CancelMode) {
        let mut state = self.shared.lock();
        if *state == State::Pending {
            *state = State::Cancelled;
            self.join_handle.abort();
        }

        if mode == CancelMode::Sync {
            while *state == State::Running {
                state = self
                    .shared
                    .finished
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    /// True until the callback starts running or the timer is cancelled.
    pub fn is_pending(&self) -> bool {
        *self.shared.lock() == State::Pending
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Pending,
    Running,
    Done,
    Cancelled,
}

struct Shared {
    state: Mutex<State>,
    finished: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_running(&self) -> Option<RunningGuard<'_>> {
        let mut state = self.lock();
        if *state != State::Pending {
            return None;
        }
        *state = State::Running;

        Some(RunningGuard { shared: self })
    }
}

// Marks the callback done even if it panics, so a blocking cancel can't hang.
struct RunningGuard<'a> {
    shared: &'a Shared,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.shared.lock() = State::Done;
        self.shared.finished.notify_all();
    }
}

struct TimerTask<C: Clock, F> {
    deadline: Instant,
    clock: C,
    shared: Arc<Shared>,
    callback: F,
}

impl<C: Clock, F: FnOnce() + Send + 'static> TimerTask<C, F> {
    async fn run(self) {
        let TimerTask {
            deadline,
            mut clock,
            shared,
            callback,
        } = self;

        clock.sleep_until(deadline).await;

        let running = match shared.begin_running() {
            Some(running) => running,
            None => return,
        };
        callback();
        drop(running);
    }
}
