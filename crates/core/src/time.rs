use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

/// Wall clock in [`EpochMs`]; a clock set before the epoch reads as 0.
pub fn now_ms() -> EpochMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| since.as_millis() as EpochMs)
}

/// Duration from a millisecond config value.
pub fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}
