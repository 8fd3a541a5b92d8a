use std::convert::TryFrom;
use std::time::Duration;

/// Wire TTLs are whole seconds. Zero or negative never expires.
pub fn ttl_from_seconds(ttl: i32) -> Option<Duration> {
    if ttl > 0 {
        Some(Duration::from_secs(ttl as u64))
    } else {
        None
    }
}

/// Inverse of `ttl_from_seconds`, rounding up so a live entry never turns into one without expiry.
pub fn seconds_from_ttl(ttl: Option<Duration>) -> i32 {
    match ttl {
        None => 0,
        Some(remaining) => {
            let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            i32::try_from(secs.max(1)).unwrap_or(i32::MAX)
        }
    }
}
