use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndicatorError, Result};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// Composite key that identifies a candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: String,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// A single validated OHLCV candle.
///
/// Fields are private so that every instance has passed [`MarketData::new`]:
/// `high >= max(open, close)` and `low <= min(open, close)`.  Deserialising
/// goes through the same check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CandleRecord", into = "CandleRecord")]
pub struct MarketData {
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    series: Option<SeriesKey>,
}

/// Unvalidated wire shape of a candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleRecord {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
}

impl MarketData {
    /// Build a candle, rejecting non-finite prices, a negative or
    /// non-finite volume, and any OHLC combination that violates the
    /// high/low envelope.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self> {
        // `f64::max`/`min` drop a NaN operand, so finiteness is checked first.
        for (field, value) in [("open", open), ("high", high), ("low", low), ("close", close)] {
            if !value.is_finite() {
                return Err(IndicatorError::InvalidCandle {
                    reason: format!("{field} is not finite: {value}"),
                });
            }
        }
        if !volume.is_finite() || volume < 0.0 {
            return Err(IndicatorError::InvalidCandle {
                reason: format!("volume must be finite and >= 0, got {volume}"),
            });
        }
        if high < open.max(close) {
            return Err(IndicatorError::InvalidCandle {
                reason: format!("high {high} below max(open {open}, close {close})"),
            });
        }
        if low > open.min(close) {
            return Err(IndicatorError::InvalidCandle {
                reason: format!("low {low} above min(open {open}, close {close})"),
            });
        }
        Ok(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            series: None,
        })
    }

    /// Tag the candle with the series it belongs to.
    pub fn with_series(mut self, symbol: impl Into<String>, timeframe: impl Into<String>) -> Self {
        self.series = Some(SeriesKey {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        });
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn series(&self) -> Option<&SeriesKey> {
        self.series.as_ref()
    }

    /// Absolute body size `|close - open|`.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// Full candle range `high - low`.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

impl TryFrom<CandleRecord> for MarketData {
    type Error = IndicatorError;

    fn try_from(raw: CandleRecord) -> Result<Self> {
        let candle = MarketData::new(raw.timestamp, raw.open, raw.high, raw.low, raw.close, raw.volume)?;
        Ok(match (raw.symbol, raw.timeframe) {
            (Some(symbol), Some(timeframe)) => candle.with_series(symbol, timeframe),
            (Some(symbol), None) => candle.with_series(symbol, ""),
            _ => candle,
        })
    }
}

impl From<MarketData> for CandleRecord {
    fn from(c: MarketData) -> Self {
        let (symbol, timeframe) = match c.series {
            Some(key) => (Some(key.symbol), Some(key.timeframe)),
            None => (None, None),
        };
        Self {
            timestamp: c.timestamp,
            open: c.open,
            high: c.high,
            low: c.low,
            close: c.close,
            volume: c.volume,
            symbol,
            timeframe,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn valid_candle_builds() {
        let c = MarketData::new(ts(), 100.0, 105.0, 95.0, 102.0, 10.0).unwrap();
        assert_eq!(c.body(), 2.0);
        assert_eq!(c.range(), 10.0);
        assert_eq!(c.upper_wick(), 3.0);
        assert_eq!(c.lower_wick(), 5.0);
        assert!(c.is_bullish());
        assert!(!c.is_bearish());
    }

    #[test]
    fn high_below_close_is_rejected() {
        let err = MarketData::new(ts(), 100.0, 101.0, 95.0, 102.0, 10.0).unwrap_err();
        assert!(matches!(err, IndicatorError::InvalidCandle { .. }));
    }

    #[test]
    fn low_above_open_is_rejected() {
        assert!(MarketData::new(ts(), 100.0, 105.0, 100.5, 102.0, 10.0).is_err());
    }

    #[test]
    fn nan_is_rejected() {
        assert!(MarketData::new(ts(), 100.0, f64::NAN, 95.0, 102.0, 10.0).is_err());
        assert!(MarketData::new(ts(), f64::NAN, 105.0, 95.0, 102.0, 10.0).is_err());
        assert!(MarketData::new(ts(), 100.0, 105.0, 95.0, f64::NAN, 10.0).is_err());
        assert!(MarketData::new(ts(), 100.0, 105.0, f64::NAN, 102.0, 10.0).is_err());
        assert!(MarketData::new(ts(), 100.0, f64::INFINITY, 95.0, 102.0, 10.0).is_err());
    }

    #[test]
    fn bad_volume_is_rejected() {
        assert!(MarketData::new(ts(), 100.0, 105.0, 95.0, 102.0, f64::NAN).is_err());
        assert!(MarketData::new(ts(), 100.0, 105.0, 95.0, 102.0, -1.0).is_err());
        assert!(MarketData::new(ts(), 100.0, 105.0, 95.0, 102.0, 0.0).is_ok());
    }

    #[test]
    fn huge_finite_prices_are_valid() {
        assert!(MarketData::new(ts(), 1e308, 1e308, 1e307, 1e308, 1.0).is_ok());
    }

    #[test]
    fn doji_with_flat_range_is_valid() {
        let c = MarketData::new(ts(), 50.0, 50.0, 50.0, 50.0, 0.0).unwrap();
        assert_eq!(c.range(), 0.0);
        assert!(!c.is_bullish() && !c.is_bearish());
    }

    #[test]
    fn deserialising_runs_validation() {
        let good = r#"{"timestamp":"2024-01-02T09:30:00Z","open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":3.0,"symbol":"BTCUSDT","timeframe":"1h"}"#;
        let c: MarketData = serde_json::from_str(good).unwrap();
        assert_eq!(c.series().map(|k| k.to_string()), Some("BTCUSDT@1h".to_string()));

        let bad = r#"{"timestamp":"2024-01-02T09:30:00Z","open":1.0,"high":1.2,"low":0.5,"close":1.5}"#;
        assert!(serde_json::from_str::<MarketData>(bad).is_err());
    }
}
