// =============================================================================
// Open Interest Tracker — latest value only
// =============================================================================
//
// Open interest is the total number of outstanding contracts. The upstream
// reports it as a single scalar; we keep the newest value and the local time
// it arrived, nothing else.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Most recent open interest reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterestState {
    pub value: Decimal,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct OpenInterestTracker {
    latest: Option<OpenInterestState>,
}

impl OpenInterestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held reading wholesale.
    pub fn on_open_interest(
        &mut self,
        value: Decimal,
        received_at: DateTime<Utc>,
    ) -> OpenInterestState {
        let state = OpenInterestState {
            value,
            as_of: received_at,
        };
        self.latest = Some(state);
        debug!(value = %value, as_of = %received_at, "updated open interest");
        state
    }

    pub fn latest(&self) -> Option<OpenInterestState> {
        self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn empty_until_first_update() {
        assert!(OpenInterestTracker::new().latest().is_none());
    }

    #[test]
    fn newest_update_wins() {
        let mut oi = OpenInterestTracker::new();
        let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap();

        oi.on_open_interest(dec!(10659.509), t1);
        let returned = oi.on_open_interest(dec!(10660.001), t2);

        assert_eq!(returned.value, dec!(10660.001));
        assert_eq!(oi.latest(), Some(returned));
        assert_eq!(oi.latest().map(|s| s.as_of), Some(t2));
    }
}
