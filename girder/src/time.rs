use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01)
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Monotonic microsecond clock anchored at its creation instant.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    #[inline]
    pub fn new() -> MonotonicClock {
        MonotonicClock {
            origin: Instant::now(),
        }
    }

    /// Microseconds elapsed since the clock was created.
    #[inline]
    pub fn now_us(&self) -> u64 {
        let elapsed = self.origin.elapsed();
        elapsed.as_secs() * 1_000_000 + u64::from(elapsed.subsec_micros())
    }
}
