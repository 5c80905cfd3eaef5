//! Timestamps and the reserved `other_time` sentinels.

/// Logical time of an event. Sync times and end times share this type.
pub type Timestamp = i64;

/// Smallest sync time. Fresh clocks start here.
pub const MIN_SYNC_TIME: Timestamp = i64::MIN;

/// An end time that is never reached. Intervals ending here never expire.
pub const INFINITY_SYNC_TIME: Timestamp = i64::MAX;

/// `other_time` of a punctuation row.
pub const PUNCTUATION_OTHER_TIME: Timestamp = i64::MIN;

/// `other_time` of a low-watermark row.
pub const LOW_WATERMARK_OTHER_TIME: Timestamp = i64::MIN + 1;

/// Returns true if `other_time` is one of the control-row sentinels.
#[inline]
pub fn is_control_time(other_time: Timestamp) -> bool {
    other_time == PUNCTUATION_OTHER_TIME || other_time == LOW_WATERMARK_OTHER_TIME
}

/// Adds a duration to a start time, saturating at `INFINITY_SYNC_TIME`.
#[inline]
pub fn end_after(start: Timestamp, duration: Timestamp) -> Timestamp {
    start.saturating_add(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_times() {
        assert!(is_control_time(PUNCTUATION_OTHER_TIME));
        assert!(is_control_time(LOW_WATERMARK_OTHER_TIME));
        assert!(!is_control_time(0));
        assert!(!is_control_time(INFINITY_SYNC_TIME));
    }

    #[test]
    fn test_end_after_saturates() {
        assert_eq!(end_after(10, 5), 15);
        assert_eq!(end_after(INFINITY_SYNC_TIME - 1, 10), INFINITY_SYNC_TIME);
    }
}
