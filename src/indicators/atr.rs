// =============================================================================
// Average True Range (ATR)
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
// The first bar has no previous close, so its TR is simply H - L.
//
// ATR is the smoothed average of TR, either:
//   Simple:      mean of the last `period` TR values
//   Exponential: ATR_t = alpha * TR_t + (1 - alpha) * ATR_{t-1},
//                 alpha = 2 / (period + 1), seeded with the first TR
//
// Derived outputs: ATR / close, the percentile of the current ATR within a
// trailing window, and a trend label from the slope of recent ATR values.
//
// Default period: 14
// =============================================================================

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{check_period, check_positive, IndicatorError, Result};
use crate::indicators::{linear_slope, Indicator};
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};

pub const MIN_PERIOD: usize = 2;
pub const MAX_PERIOD: usize = 100;

// =============================================================================
// Configuration
// =============================================================================

/// How True Range values are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AtrSmoothing {
    Simple,
    Exponential,
}

impl AtrSmoothing {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Exponential => "exponential",
        }
    }
}

impl FromStr for AtrSmoothing {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "sma" => Ok(Self::Simple),
            "exponential" | "ema" => Ok(Self::Exponential),
            other => Err(IndicatorError::UnknownSmoothing(other.to_string())),
        }
    }
}

impl TryFrom<String> for AtrSmoothing {
    type Error = IndicatorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<AtrSmoothing> for String {
    fn from(value: AtrSmoothing) -> Self {
        value.as_str().to_string()
    }
}

fn default_period() -> usize {
    14
}

fn default_smoothing() -> AtrSmoothing {
    AtrSmoothing::Exponential
}

fn default_percentile_window() -> usize {
    100
}

fn default_trend_lookback() -> usize {
    10
}

fn default_trend_threshold() -> f64 {
    0.05
}

fn default_low_volatility() -> f64 {
    0.005
}

fn default_high_volatility() -> f64 {
    0.03
}

/// Tunable parameters for [`AtrIndicator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrConfig {
    #[serde(default = "default_period")]
    pub period: usize,

    #[serde(default = "default_smoothing")]
    pub smoothing: AtrSmoothing,

    /// Number of ATR values the percentile rank is taken over.
    #[serde(default = "default_percentile_window")]
    pub percentile_window: usize,

    /// Number of ATR values the trend slope is fitted over.
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,

    /// Relative ATR change across the trend window that counts as a trend.
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,

    /// Normalised ATR below this is a low-volatility regime.
    #[serde(default = "default_low_volatility")]
    pub low_volatility_threshold: f64,

    /// Normalised ATR above this is a high-volatility regime.
    #[serde(default = "default_high_volatility")]
    pub high_volatility_threshold: f64,
}

impl Default for AtrConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            smoothing: default_smoothing(),
            percentile_window: default_percentile_window(),
            trend_lookback: default_trend_lookback(),
            trend_threshold: default_trend_threshold(),
            low_volatility_threshold: default_low_volatility(),
            high_volatility_threshold: default_high_volatility(),
        }
    }
}

impl AtrConfig {
    pub fn validate(&self) -> Result<()> {
        check_period("atr", self.period, MIN_PERIOD, MAX_PERIOD)?;
        check_positive("atr", "low_volatility_threshold", self.low_volatility_threshold)?;
        check_positive("atr", "high_volatility_threshold", self.high_volatility_threshold)?;
        check_positive("atr", "trend_threshold", self.trend_threshold)?;
        if self.low_volatility_threshold >= self.high_volatility_threshold {
            return Err(IndicatorError::config(
                "atr",
                format!(
                    "low_volatility_threshold {} must be below high_volatility_threshold {}",
                    self.low_volatility_threshold, self.high_volatility_threshold
                ),
            ));
        }
        if self.percentile_window < 2 || self.trend_lookback < 2 {
            return Err(IndicatorError::config(
                "atr",
                "percentile_window and trend_lookback must be >= 2",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Derived classifications
// =============================================================================

/// Direction of recent ATR movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtrTrend {
    Increasing,
    Decreasing,
    Stable,
}

impl AtrTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Decreasing => "decreasing",
            Self::Stable => "stable",
        }
    }
}

/// Volatility bucket from normalised ATR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
}

impl VolatilityRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

// =============================================================================
// AtrIndicator
// =============================================================================

/// Streaming ATR with normalisation, percentile and trend outputs.
#[derive(Debug, Clone)]
pub struct AtrIndicator {
    name: String,
    config: AtrConfig,
    alpha: f64,
    prev_close: Option<f64>,
    true_ranges: RingBuffer<f64>,
    tr_count: usize,
    ema: Option<f64>,
    atr_history: RingBuffer<f64>,
    current: Option<f64>,
    last_close: Option<f64>,
    regime: Option<VolatilityRegime>,
    entered_high: bool,
    count: usize,
}

impl AtrIndicator {
    pub fn new(config: AtrConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("ATR_{}", config.period),
            alpha: 2.0 / (config.period as f64 + 1.0),
            prev_close: None,
            true_ranges: RingBuffer::new(config.period),
            tr_count: 0,
            ema: None,
            atr_history: RingBuffer::new(config.percentile_window.max(config.trend_lookback)),
            current: None,
            last_close: None,
            regime: None,
            entered_high: false,
            count: 0,
            config,
        })
    }

    pub fn with_period(period: usize, smoothing: AtrSmoothing) -> Result<Self> {
        Self::new(AtrConfig {
            period,
            smoothing,
            ..AtrConfig::default()
        })
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }

    /// Most recent True Range, available from the first candle.
    pub fn last_true_range(&self) -> Option<f64> {
        self.true_ranges.last().copied()
    }

    /// ATR divided by the latest close.
    pub fn normalized(&self) -> Option<f64> {
        let atr = self.current?;
        let close = self.last_close?;
        if close == 0.0 {
            return None;
        }
        let n = atr / close.abs();
        n.is_finite().then_some(n)
    }

    /// Percentage (0–100) of trailing ATR values at or below the current one.
    pub fn volatility_percentile(&self) -> Option<f64> {
        let atr = self.current?;
        let window: Vec<f64> = self
            .atr_history
            .tail(self.config.percentile_window)
            .copied()
            .collect();
        if window.is_empty() {
            return None;
        }
        let at_or_below = window.iter().filter(|&&v| v <= atr).count();
        Some(at_or_below as f64 / window.len() as f64 * 100.0)
    }

    /// Trend of the ATR across the last `trend_lookback` values.
    pub fn trend(&self) -> Option<AtrTrend> {
        let lookback = self.config.trend_lookback;
        if self.atr_history.len() < lookback {
            return None;
        }
        let window: Vec<f64> = self.atr_history.tail(lookback).copied().collect();
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        if mean <= f64::EPSILON {
            return Some(AtrTrend::Stable);
        }
        let slope = linear_slope(&window)?;
        let relative_change = slope * (lookback - 1) as f64 / mean;
        Some(if relative_change > self.config.trend_threshold {
            AtrTrend::Increasing
        } else if relative_change < -self.config.trend_threshold {
            AtrTrend::Decreasing
        } else {
            AtrTrend::Stable
        })
    }

    pub fn regime(&self) -> Option<VolatilityRegime> {
        self.regime
    }

    /// Stop distance of `multiplier` ATRs.
    pub fn stop_distance(&self, multiplier: f64) -> Option<f64> {
        self.current.map(|atr| atr * multiplier)
    }

    fn classify(&self, normalized: f64) -> VolatilityRegime {
        if normalized < self.config.low_volatility_threshold {
            VolatilityRegime::Low
        } else if normalized > self.config.high_volatility_threshold {
            VolatilityRegime::High
        } else {
            VolatilityRegime::Normal
        }
    }
}

/// True Range of `candle` given the previous close, if any.
pub fn true_range(candle: &MarketData, prev_close: Option<f64>) -> f64 {
    let hl = candle.range();
    match prev_close {
        Some(pc) => hl
            .max((candle.high() - pc).abs())
            .max((candle.low() - pc).abs()),
        None => hl,
    }
}

impl Indicator for AtrIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_periods(&self) -> usize {
        self.config.period
    }

    fn is_ready(&self) -> bool {
        self.current.is_some()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.current.map(IndicatorValue::Scalar)
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        let tr = true_range(candle, self.prev_close);
        self.prev_close = Some(candle.close());
        self.last_close = Some(candle.close());
        if !tr.is_finite() {
            return None;
        }

        self.true_ranges.push(tr);
        self.tr_count += 1;
        self.ema = Some(match self.ema {
            None => tr,
            Some(prev) => self.alpha * tr + (1.0 - self.alpha) * prev,
        });

        if self.tr_count < self.config.period {
            return None;
        }
        let atr = match self.config.smoothing {
            AtrSmoothing::Simple => self.true_ranges.iter().sum::<f64>() / self.config.period as f64,
            AtrSmoothing::Exponential => self.ema?,
        };
        self.current = Some(atr);
        self.atr_history.push(atr);

        let mut result = IndicatorResult::new(self.name.clone(), candle.timestamp(), IndicatorValue::Scalar(atr))
            .with_meta("true_range", tr)
            .with_meta("smoothing", self.config.smoothing.as_str());

        self.entered_high = false;
        if let Some(normalized) = self.normalized() {
            let regime = self.classify(normalized);
            if regime == VolatilityRegime::High && self.regime != Some(VolatilityRegime::High) {
                self.entered_high = true;
                debug!(indicator = %self.name, atr, normalized, "volatility expansion");
            }
            self.regime = Some(regime);
            result = result
                .with_meta("normalized", normalized)
                .with_meta("regime", regime.as_str());
        }
        if let Some(percentile) = self.volatility_percentile() {
            result = result.with_meta("percentile", percentile);
        }
        if let Some(trend) = self.trend() {
            result = result.with_meta("trend", trend.as_str());
        }
        Some(result)
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        if !self.entered_high {
            return None;
        }
        let atr = result.value().as_scalar()?;
        let percentile = result.meta("percentile").and_then(|v| v.as_f64()).unwrap_or(100.0);
        Some(
            Signal::clamped(
                SignalDirection::Neutral,
                percentile / 100.0,
                format!("volatility expansion: ATR {atr:.4}"),
                self.name.clone(),
                result.timestamp(),
            )
            .with_meta("atr", atr),
        )
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.true_ranges.clear();
        self.tr_count = 0;
        self.ema = None;
        self.atr_history.clear();
        self.current = None;
        self.last_close = None;
        self.regime = None;
        self.entered_high = false;
        self.count = 0;
    }
}
