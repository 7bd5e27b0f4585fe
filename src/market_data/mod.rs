pub mod candle;
pub mod ring_buffer;

// Re-export the core types for convenient access (e.g. `use crate::market_data::MarketData`).
pub use candle::{CandleRecord, MarketData, SeriesKey};
pub use ring_buffer::RingBuffer;

/// Candle builders shared by the unit tests of every indicator.
#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::MarketData;

    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    /// Candle `i` minutes after [`base_time`].
    pub fn ohlcv(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> MarketData {
        MarketData::new(base_time() + Duration::minutes(i), open, high, low, close, volume)
            .expect("test candle must be valid")
    }

    /// Candle with a symmetric +/-1 envelope around `close`.
    pub fn close_only(i: i64, close: f64) -> MarketData {
        ohlcv(i, close, close + 1.0, close - 1.0, close, 100.0)
    }

    /// Candle stamped at an arbitrary instant.
    pub fn at(ts: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> MarketData {
        MarketData::new(ts, open, high, low, close, 100.0).expect("test candle must be valid")
    }
}
