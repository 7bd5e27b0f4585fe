// =============================================================================
// Relative Strength Index (RSI), Wilder's Smoothing
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1: Compute the delta between consecutive closes.
// Step 2: Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3: Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4: RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// Default thresholds:  RSI > 70 => OVERBOUGHT,  RSI < 30 => OVERSOLD.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{check_period, IndicatorError, Result};
use crate::indicators::{linear_slope, Indicator};
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};

pub const MIN_PERIOD: usize = 2;
pub const MAX_PERIOD: usize = 100;

/// Averages below this are treated as zero.
const FLAT_EPSILON: f64 = 1e-12;

/// RSI points per step separating the momentum classes.
const MOMENTUM_SLOPE: f64 = 1.0;
const STRONG_MOMENTUM_SLOPE: f64 = 3.0;

fn default_period() -> usize {
    14
}

fn default_overbought() -> f64 {
    70.0
}

fn default_oversold() -> f64 {
    30.0
}

fn default_momentum_lookback() -> usize {
    5
}

/// Tunable parameters for [`RsiIndicator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiConfig {
    #[serde(default = "default_period")]
    pub period: usize,

    #[serde(default = "default_overbought")]
    pub overbought: f64,

    #[serde(default = "default_oversold")]
    pub oversold: f64,

    /// Number of RSI outputs the momentum slope is fitted over.
    #[serde(default = "default_momentum_lookback")]
    pub momentum_lookback: usize,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            overbought: default_overbought(),
            oversold: default_oversold(),
            momentum_lookback: default_momentum_lookback(),
        }
    }
}

impl RsiConfig {
    pub fn validate(&self) -> Result<()> {
        check_period("rsi", self.period, MIN_PERIOD, MAX_PERIOD)?;
        if !(self.oversold > 0.0 && self.oversold < self.overbought && self.overbought < 100.0) {
            return Err(IndicatorError::config(
                "rsi",
                format!(
                    "thresholds must satisfy 0 < oversold ({}) < overbought ({}) < 100",
                    self.oversold, self.overbought
                ),
            ));
        }
        if self.momentum_lookback < 2 {
            return Err(IndicatorError::config("rsi", "momentum_lookback must be >= 2"));
        }
        Ok(())
    }
}

/// Qualitative momentum read from the slope of recent RSI values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    StrongBullish,
    Bullish,
    Neutral,
    Bearish,
    StrongBearish,
}

impl Momentum {
    pub fn from_slope(slope: f64) -> Self {
        if slope > STRONG_MOMENTUM_SLOPE {
            Self::StrongBullish
        } else if slope > MOMENTUM_SLOPE {
            Self::Bullish
        } else if slope < -STRONG_MOMENTUM_SLOPE {
            Self::StrongBearish
        } else if slope < -MOMENTUM_SLOPE {
            Self::Bearish
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StrongBullish => "strong_bullish",
            Self::Bullish => "bullish",
            Self::Neutral => "neutral",
            Self::Bearish => "bearish",
            Self::StrongBearish => "strong_bearish",
        }
    }
}

impl std::fmt::Display for Momentum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Streaming RSI.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    name: String,
    config: RsiConfig,
    prev_close: Option<f64>,
    // Seeding phase accumulators.
    seed_gain: f64,
    seed_loss: f64,
    deltas: usize,
    // Wilder averages, set once `period` deltas are in.
    averages: Option<(f64, f64)>,
    history: RingBuffer<f64>,
    count: usize,
}

impl RsiIndicator {
    pub fn new(config: RsiConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("RSI_{}", config.period),
            prev_close: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            deltas: 0,
            averages: None,
            history: RingBuffer::new(config.momentum_lookback),
            count: 0,
            config,
        })
    }

    pub fn with_period(period: usize) -> Result<Self> {
        Self::new(RsiConfig {
            period,
            ..RsiConfig::default()
        })
    }

    pub fn value(&self) -> Option<f64> {
        self.history.last().copied()
    }

    /// Momentum class from the recent RSI slope.  `None` until two RSI values
    /// exist.
    pub fn momentum(&self) -> Option<Momentum> {
        let recent: Vec<f64> = self.history.iter().copied().collect();
        linear_slope(&recent).map(Momentum::from_slope)
    }

    /// Fold one close into the gain/loss averages.  Returns the new averages
    /// once the seeding window is complete.
    fn absorb(&mut self, close: f64) -> Option<(f64, f64)> {
        let prev = self.prev_close.replace(close)?;
        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let period = self.config.period as f64;

        self.deltas += 1;
        let next = match self.averages {
            Some((avg_gain, avg_loss)) => (
                (avg_gain * (period - 1.0) + gain) / period,
                (avg_loss * (period - 1.0) + loss) / period,
            ),
            None => {
                self.seed_gain += gain;
                self.seed_loss += loss;
                if self.deltas < self.config.period {
                    return None;
                }
                (self.seed_gain / period, self.seed_loss / period)
            }
        };
        self.averages = Some(next);
        Some(next)
    }
}

/// Convert average gain / average loss into an RSI value in [0, 100].
///
/// - Both averages ~0 (no movement): 50.
/// - Average loss ~0 (only gains): saturates at 100.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    let rsi = if avg_loss <= FLAT_EPSILON && avg_gain <= FLAT_EPSILON {
        50.0
    } else if avg_loss <= FLAT_EPSILON {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };
    if rsi.is_finite() {
        rsi.clamp(0.0, 100.0)
    } else {
        100.0
    }
}

impl Indicator for RsiIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_periods(&self) -> usize {
        self.config.period + 1
    }

    fn is_ready(&self) -> bool {
        self.averages.is_some()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.value().map(IndicatorValue::Scalar)
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        let (avg_gain, avg_loss) = self.absorb(candle.close())?;
        let rsi = rsi_from_averages(avg_gain, avg_loss);
        self.history.push(rsi);
        trace!(indicator = %self.name, rsi, avg_gain, avg_loss, "rsi updated");

        let mut result = IndicatorResult::new(self.name.clone(), candle.timestamp(), IndicatorValue::Scalar(rsi))
            .with_meta("avg_gain", avg_gain)
            .with_meta("avg_loss", avg_loss);
        if let Some(momentum) = self.momentum() {
            result = result.with_meta("momentum", momentum.as_str());
        }
        Some(result)
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let rsi = result.value().as_scalar()?;
        let overbought = self.config.overbought;
        let oversold = self.config.oversold;

        let (direction, strength, label) = if rsi < oversold {
            (SignalDirection::Long, (oversold - rsi) / oversold, "OVERSOLD")
        } else if rsi > overbought {
            (SignalDirection::Short, (rsi - overbought) / (100.0 - overbought), "OVERBOUGHT")
        } else {
            return None;
        };

        let mut signal = Signal::clamped(
            direction,
            strength,
            format!("RSI {rsi:.2} {label}"),
            self.name.clone(),
            result.timestamp(),
        )
        .with_meta("rsi", rsi);
        if let Some(momentum) = result.meta("momentum") {
            signal = signal.with_meta("momentum", momentum.clone());
        }
        Some(signal)
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.seed_gain = 0.0;
        self.seed_loss = 0.0;
        self.deltas = 0;
        self.averages = None;
        self.history.clear();
        self.count = 0;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_support::close_only;

    fn feed(rsi: &mut RsiIndicator, closes: &[f64]) -> Vec<Option<f64>> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                rsi.add_data(&close_only(i as i64, c))
                    .and_then(|r| r.value().as_scalar())
            })
            .collect()
    }

    #[test]
    fn rsi_config_errors() {
        assert!(RsiIndicator::with_period(1).is_err());
        assert!(RsiIndicator::with_period(101).is_err());
        let inverted = RsiConfig {
            overbought: 30.0,
            oversold: 70.0,
            ..RsiConfig::default()
        };
        assert!(RsiIndicator::new(inverted).is_err());
    }

    #[test]
    fn rsi_first_candle_produces_nothing() {
        let mut rsi = RsiIndicator::with_period(2).unwrap();
        let out = feed(&mut rsi, &[100.0]);
        assert!(out[0].is_none());
        assert!(!rsi.is_ready());
    }

    #[test]
    fn rsi_concrete_scenario_pure_gains() {
        let mut rsi = RsiIndicator::with_period(3).unwrap();
        let out = feed(&mut rsi, &[100.0, 102.0, 105.0, 108.0]);
        assert!(out[..3].iter().all(Option::is_none));
        assert!(out[3].unwrap() > 80.0);
    }

    #[test]
    fn rsi_monotonic_extremes() {
        let mut rsi = RsiIndicator::with_period(14).unwrap();
        let rising: Vec<f64> = (1..=40).map(|x| 100.0 + x as f64 * 0.5).collect();
        let last = feed(&mut rsi, &rising).last().copied().flatten().unwrap();
        assert!(last > 80.0);

        let mut rsi = RsiIndicator::with_period(14).unwrap();
        let falling: Vec<f64> = (1..=40).map(|x| 200.0 - x as f64 * 0.5).collect();
        let last = feed(&mut rsi, &falling).last().copied().flatten().unwrap();
        assert!(last < 20.0);
    }

    #[test]
    fn rsi_flat_market_is_neutral() {
        let mut rsi = RsiIndicator::with_period(5).unwrap();
        let last = feed(&mut rsi, &[100.0; 20]).last().copied().flatten().unwrap();
        assert!((last - 50.0).abs() < 1e-10);
    }

    #[test]
    fn rsi_range_check() {
        let closes = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 44.18, 44.22, 44.57, 43.42, 42.66, 43.13,
        ];
        let mut rsi = RsiIndicator::with_period(14).unwrap();
        for v in feed(&mut rsi, &closes).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }

    #[test]
    fn rsi_matches_wilder_reference() {
        // period 2 over 1, 3, 2, 4: seed deltas +2, -1 => gain 1.0, loss 0.5
        // RSI = 100 - 100 / 3 = 66.67; next delta +2 => gain 1.5, loss 0.25 => 85.71
        let mut rsi = RsiIndicator::with_period(2).unwrap();
        let out = feed(&mut rsi, &[1.0, 3.0, 2.0, 4.0]);
        assert!((out[2].unwrap() - 66.666_666).abs() < 1e-4);
        assert!((out[3].unwrap() - 85.714_285).abs() < 1e-4);
    }

    #[test]
    fn rsi_momentum_classification() {
        assert_eq!(Momentum::from_slope(5.0), Momentum::StrongBullish);
        assert_eq!(Momentum::from_slope(2.0), Momentum::Bullish);
        assert_eq!(Momentum::from_slope(0.0), Momentum::Neutral);
        assert_eq!(Momentum::from_slope(-2.0), Momentum::Bearish);
        assert_eq!(Momentum::from_slope(-5.0), Momentum::StrongBearish);

        // Falling then sharply rising closes push RSI up quickly.
        let mut rsi = RsiIndicator::with_period(5).unwrap();
        let mut closes: Vec<f64> = (0..15).map(|x| 100.0 - x as f64).collect();
        closes.extend((0..4).map(|x| 87.0 + x as f64 * 3.0));
        feed(&mut rsi, &closes);
        assert!(matches!(
            rsi.momentum(),
            Some(Momentum::Bullish | Momentum::StrongBullish)
        ));
    }

    #[test]
    fn rsi_signals_on_extremes() {
        let mut rsi = RsiIndicator::with_period(3).unwrap();
        let mut last = None;
        for (i, c) in [100.0, 99.0, 98.0, 97.0, 96.0].iter().enumerate() {
            if let Some((_, signal)) = rsi.update(&close_only(i as i64, *c)) {
                last = signal;
            }
        }
        let signal = last.expect("falling closes are oversold");
        assert_eq!(signal.direction(), SignalDirection::Long);
        assert!((signal.strength() - 1.0).abs() < 1e-12);
    }
}
