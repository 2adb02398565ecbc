use std::time::Duration;

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns the current Unix timestamp in seconds.
pub fn current_unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Time left until `target_unix_ms`, or zero when the target is not in the future.
pub fn millis_until_unix_ms(target_unix_ms: u64, now_unix_ms: u64) -> Duration {
    Duration::from_millis(target_unix_ms.saturating_sub(now_unix_ms))
}
