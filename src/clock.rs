// =============================================================================
// Time sources for level aging
// =============================================================================
//
// Level detectors expire zones by age.  "Now" is injected so that a backtest
// replaying history ages levels against candle time, while a live feed can
// opt into the wall clock.  The default everywhere is candle time.

use chrono::{DateTime, Utc};

use crate::market_data::MarketData;

/// Supplies the instant against which level ages are measured.
pub trait TimeSource: std::fmt::Debug + Send + Sync {
    /// Current time while `candle` is being processed.
    fn now(&self, candle: &MarketData) -> DateTime<Utc>;
}

/// Ages levels against the timestamp of the candle being processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CandleTime;

impl TimeSource for CandleTime {
    fn now(&self, candle: &MarketData) -> DateTime<Utc> {
        candle.timestamp()
    }
}

/// Ages levels against the host clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl TimeSource for WallClock {
    fn now(&self, _candle: &MarketData) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn candle_time_follows_candle() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let candle = MarketData::new(ts, 10.0, 11.0, 9.0, 10.5, 1.0).unwrap();
        assert_eq!(CandleTime.now(&candle), ts);
    }

    #[test]
    fn wall_clock_ignores_candle() {
        let ts = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap();
        let candle = MarketData::new(ts, 10.0, 11.0, 9.0, 10.5, 1.0).unwrap();
        assert!(WallClock.now(&candle) > ts);
    }
}
