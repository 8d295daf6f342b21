use std::thread;
use std::time::{Duration, Instant};

/// Time source for retry back-off and run timing.
pub trait Clock: Send {
    fn sleep(&self, duration: Duration);
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
