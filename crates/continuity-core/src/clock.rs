//! Wall-clock helper.

use chrono::{DateTime, SubsecRound, Utc};

/// Current UTC time truncated to the microsecond precision used in storage,
/// so values survive a round trip through the database unchanged.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_has_microsecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000, 0);
    }
}
