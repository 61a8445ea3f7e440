//! Wall-clock utilities used for lease deadlines.
//!
//! Lease arithmetic is all relative to milliseconds since the Unix epoch, so
//! this module is the one place that touches [`chrono::Utc::now`]; every
//! other module takes a timestamp as a plain `i64` parameter, which keeps
//! [`crate::queue`]'s reservation logic trivially testable.

use chrono::Utc;

/// Current wall-clock time, milliseconds since the Unix epoch.
pub fn now_msec() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_msec_is_monotonic_enough_for_lease_math() {
        let a = now_msec();
        let b = now_msec();
        assert!(b >= a);
    }
}
