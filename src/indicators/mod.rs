// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Streaming implementations of the scalar indicators.  Each calculator is fed
// one candle at a time through the `Indicator` trait and answers `None` until
// it has seen enough history, so callers are forced to handle warm-up.

pub mod atr;
pub mod ema;
pub mod rsi;
pub mod sma;

pub use atr::{AtrConfig, AtrIndicator, AtrSmoothing, AtrTrend, VolatilityRegime};
pub use ema::{EmaConfig, EmaIndicator};
pub use rsi::{Momentum, RsiConfig, RsiIndicator};
pub use sma::{SmaConfig, SmaIndicator};

use crate::market_data::MarketData;
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};

/// Contract shared by every calculator and zone detector.
///
/// `add_data` is the only mutating entry point; everything else is a read of
/// the current state.
pub trait Indicator: Send {
    /// Stable identifier used in results and signals.
    fn name(&self) -> &str;

    /// Candles needed before the first result can be produced.
    fn required_periods(&self) -> usize;

    fn is_ready(&self) -> bool;

    /// Latest computed value, if any.
    fn current_value(&self) -> Option<IndicatorValue>;

    /// Number of candles consumed since construction or the last reset.
    fn data_count(&self) -> usize;

    /// Feed one candle.  Returns `None` while history is insufficient.
    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult>;

    /// Derive a trading signal from a result this instance produced.
    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal>;

    /// Drop all history and return to the freshly-constructed state.
    fn reset(&mut self);

    /// Feed one candle and evaluate the signal in a single call.
    fn update(&mut self, candle: &MarketData) -> Option<(IndicatorResult, Option<Signal>)> {
        let result = self.add_data(candle)?;
        let signal = self.generate_signal(&result);
        Some((result, signal))
    }
}

// =============================================================================
// Internal helpers
// =============================================================================

/// Tracks which side of an average the close sits on and reports crossings.
#[derive(Debug, Clone, Default)]
pub(crate) struct CrossTracker {
    above: Option<bool>,
    last_cross: Option<SignalDirection>,
}

impl CrossTracker {
    /// Record the latest close/average pair.  A close exactly on the average
    /// keeps the previous side.
    pub(crate) fn observe(&mut self, price: f64, average: f64) {
        self.last_cross = None;
        if price == average {
            return;
        }
        let above = price > average;
        if let Some(prev) = self.above {
            if prev != above {
                self.last_cross = Some(if above {
                    SignalDirection::Long
                } else {
                    SignalDirection::Short
                });
            }
        }
        self.above = Some(above);
    }

    pub(crate) fn last_cross(&self) -> Option<SignalDirection> {
        self.last_cross
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Crossover signal shared by the moving averages.  Strength grows with the
/// relative distance between close and average: 2% away saturates at 1.0.
pub(crate) fn crossover_signal(
    tracker: &CrossTracker,
    result: &IndicatorResult,
) -> Option<Signal> {
    let direction = tracker.last_cross()?;
    let average = result.value().as_scalar()?;
    let close = result.meta("close")?.as_f64()?;
    if average == 0.0 {
        return None;
    }
    let distance = ((close - average) / average).abs();
    let side = if direction == SignalDirection::Long { "above" } else { "below" };
    Some(
        Signal::clamped(
            direction,
            distance * 50.0,
            format!("close {close:.4} crossed {side} {} {average:.4}", result.indicator()),
            result.indicator(),
            result.timestamp(),
        )
        .with_meta("distance", distance),
    )
}

/// Least-squares slope of `values` against their index (units per step).
///
/// Returns `None` for fewer than two points.
pub(crate) fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    let slope = num / den;
    slope.is_finite().then_some(slope)
}

/// Population standard deviation.  `None` for an empty slice.
pub(crate) fn std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let sd = variance.sqrt();
    sd.is_finite().then_some(sd)
}
