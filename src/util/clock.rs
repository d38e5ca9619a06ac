use std::time::{Duration, Instant};

/// Time source for the waiter and the stream drain loop.
///
/// Production code uses [`SystemClock`]; tests inject a clock whose `sleep` only advances
/// a counter so backoff schedules can be asserted without real waits.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            std::thread::sleep(d);
        }
    }
}
