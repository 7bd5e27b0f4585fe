// =============================================================================
// Aurora TA: streaming technical indicators and price-zone lifecycle
// =============================================================================
//
// Candles go in one at a time through the `Indicator` trait; scalar values,
// level/zone snapshots and optional trading signals come out.  The core is
// synchronous and allocation-bounded: every instance keeps its history in a
// fixed-capacity ring buffer.

pub mod clock;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod runtime_config;
pub mod types;
pub mod zones;

pub use clock::{CandleTime, TimeSource, WallClock};
pub use error::{IndicatorError, Result};
pub use indicators::Indicator;
pub use market_data::{CandleRecord, MarketData, RingBuffer, SeriesKey};
pub use runtime_config::RuntimeConfig;
pub use types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};
