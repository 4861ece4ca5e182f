//! Wall-clock source shared by the timer engine and the lifecycle services.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Absolute time source anchored on the system clock at construction.
///
/// Elapsed time is measured with the tokio monotonic clock, so persisted
/// deadlines stay absolute epoch timestamps while tests can drive time with
/// `tokio::time::pause`/`advance`.
#[derive(Debug, Clone)]
pub struct Clock {
    wall_anchor: SystemTime,
    mono_anchor: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    /// Anchor a new clock on the current system time.
    pub fn new() -> Self {
        Self {
            wall_anchor: SystemTime::now(),
            mono_anchor: Instant::now(),
        }
    }

    /// Current absolute time.
    pub fn now(&self) -> SystemTime {
        self.wall_anchor + self.mono_anchor.elapsed()
    }
}

/// Milliseconds since the Unix epoch, saturating at zero for pre-epoch values.
pub fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Inverse of [`epoch_millis`].
pub fn from_epoch_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Time left until `ends_at`, zero once the deadline has passed.
pub fn remaining(ends_at: SystemTime, now: SystemTime) -> Duration {
    ends_at.duration_since(now).unwrap_or(Duration::ZERO)
}

/// Whole seconds left until `ends_at`, rounded up.
///
/// Any fraction of a second above zero reads as `1`; exactly `0` means the
/// deadline is reached.
pub fn remaining_secs(ends_at: SystemTime, now: SystemTime) -> u64 {
    ceil_secs(remaining(ends_at, now))
}

/// Round a duration up to whole seconds.
pub fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
