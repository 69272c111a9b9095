use std::thread;
use std::time::{Duration, Instant};

/// Time source for the control loop, the pulse pacer and the input decoders.
///
/// Everything that measures or waits goes through this trait so the whole
/// stack can run against simulated time in tests. Implementations must be
/// monotonic; wall-clock time never appears below the CLI.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, 0 if `epoch` lies ahead.
    fn ms_since(&self, epoch: Instant) -> u64 {
        self.now().saturating_duration_since(epoch).as_millis() as u64
    }

    /// Microseconds elapsed since `epoch`, 0 if `epoch` lies ahead.
    ///
    /// The encoder bounce guard works at this resolution; milliseconds are
    /// too coarse to separate real detent edges from contact chatter.
    fn us_since(&self, epoch: Instant) -> u64 {
        self.now().saturating_duration_since(epoch).as_micros() as u64
    }
}

/// Production clock on `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock whose time only moves when told to; `sleep` advances it
    /// instead of blocking.
    #[derive(Debug, Clone)]
    struct ManualClock {
        origin: Instant,
        offset_us: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset_us: Arc::new(AtomicU64::new(0)),
            }
        }

        fn advance_us(&self, us: u64) {
            self.offset_us.fetch_add(us, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + Duration::from_micros(self.offset_us.load(Ordering::Relaxed))
        }

        fn sleep(&self, d: Duration) {
            self.advance_us(d.as_micros() as u64);
        }
    }

    #[test]
    fn elapsed_helpers_follow_advances() {
        let clk = ManualClock::new();
        let epoch = clk.now();
        clk.advance_us(450);
        assert_eq!(clk.us_since(epoch), 450);
        assert_eq!(clk.ms_since(epoch), 0);
        clk.sleep(Duration::from_millis(3));
        assert_eq!(clk.ms_since(epoch), 3);
    }

    #[test]
    fn elapsed_is_zero_for_future_epochs() {
        let clk = ManualClock::new();
        let ahead = clk.now() + Duration::from_millis(10);
        assert_eq!(clk.ms_since(ahead), 0);
        assert_eq!(clk.us_since(ahead), 0);
    }
}
