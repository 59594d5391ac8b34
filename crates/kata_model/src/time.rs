//! Unix-millisecond time helpers.
//!
//! All persisted timestamps in the offline layer are unix milliseconds
//! (`i64`), matching what the backend stores for its own records.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Current wall-clock time as unix milliseconds.
///
/// A clock before the epoch reports 0 rather than panicking.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_positive() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn day_constant() {
        assert_eq!(MILLIS_PER_DAY, 86_400_000);
    }
}
