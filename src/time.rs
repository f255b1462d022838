//! Millisecond-epoch timestamps, the Rust equivalent of the original's
//! `aux_getmsSinceEpoch()` helper used by every reader loop to stamp an
//! inbound frame/message at the moment it is pulled off the wire.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating rather than panicking if
/// the system clock is somehow set before 1970.
#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_monotonic_enough_to_increase() {
        let first = now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = now_ms();
        assert!(second >= first);
    }
}
