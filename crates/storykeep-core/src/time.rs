//! Time helpers. All timestamps in storykeep are Unix milliseconds (`i64`).
//!
//! Expiry is always a pure function of a caller-supplied `now`, so the
//! validation core stays deterministic under test. Only the facade and
//! server layer read the wall clock.

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}

/// Milliseconds in one hour.
pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Milliseconds in one day.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Whether a deadline has passed. The boundary is inclusive: a record
/// with `expires_at == now` is already expired.
pub fn is_expired(expires_at: i64, now: i64) -> bool {
    now >= expires_at
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_boundary_inclusive() {
        assert!(!is_expired(1000, 999));
        assert!(is_expired(1000, 1000));
        assert!(is_expired(1000, 1001));
    }
}
