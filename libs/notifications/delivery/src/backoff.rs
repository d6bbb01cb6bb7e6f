//! Retry backoff math.
//!
//! Pure time-in/time-out functions; the caller adds the delay to "now"
//! when enqueuing.

use std::time::Duration;

/// Hard cap on the retry delay, in minutes.
pub const MAX_DELAY_MINUTES: u64 = 60;

/// Minutes to wait before the retry after `attempt_number` failures.
///
/// Base unit 2 minutes, doubling per attempt: 2, 4, 8, 16, 32, then
/// capped at 60.
pub fn retry_delay_minutes(attempt_number: u32) -> u64 {
    // 2^5 * 2 already exceeds the cap
    let exponent = attempt_number.min(5);
    (2u64.pow(exponent) * 2).min(MAX_DELAY_MINUTES)
}

/// `retry_delay_minutes` as a `Duration` for the queue's delay option.
pub fn retry_delay(attempt_number: u32) -> Duration {
    Duration::from_secs(retry_delay_minutes(attempt_number) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let expected = [2, 4, 8, 16, 32, 60, 60];
        for (attempt, minutes) in expected.iter().enumerate() {
            assert_eq!(retry_delay_minutes(attempt as u32), *minutes);
        }
    }

    #[test]
    fn test_cap_holds_for_large_attempts() {
        assert_eq!(retry_delay_minutes(100), MAX_DELAY_MINUTES);
        assert_eq!(retry_delay_minutes(u32::MAX), MAX_DELAY_MINUTES);
    }

    #[test]
    fn test_delay_is_in_seconds() {
        assert_eq!(retry_delay(0), Duration::from_secs(120));
        assert_eq!(retry_delay(1), Duration::from_secs(240));
    }
}
