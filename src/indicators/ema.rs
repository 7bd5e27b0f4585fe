// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   alpha = 2 / (period + 1)          (overridable)
//   EMA_t = close_t * alpha + EMA_{t-1} * (1 - alpha)
//
// The recurrence is seeded with the very first close and runs from there; a
// result is only published once `period` closes have been seen.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{check_period, IndicatorError, Result};
use crate::indicators::{crossover_signal, std_dev, CrossTracker, Indicator};
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal};

pub const MIN_PERIOD: usize = 2;
pub const MAX_PERIOD: usize = 200;

fn default_period() -> usize {
    20
}

fn default_slope_lookback() -> usize {
    5
}

fn default_volatility_lookback() -> usize {
    20
}

/// Tunable parameters for [`EmaIndicator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaConfig {
    #[serde(default = "default_period")]
    pub period: usize,

    /// Smoothing factor override.  `None` means `2 / (period + 1)`.
    #[serde(default)]
    pub alpha: Option<f64>,

    /// Number of steps the trend slope is measured over.
    #[serde(default = "default_slope_lookback")]
    pub slope_lookback: usize,

    /// Number of closes the rolling volatility is measured over.
    #[serde(default = "default_volatility_lookback")]
    pub volatility_lookback: usize,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
            alpha: None,
            slope_lookback: default_slope_lookback(),
            volatility_lookback: default_volatility_lookback(),
        }
    }
}

impl EmaConfig {
    pub fn validate(&self) -> Result<()> {
        check_period("ema", self.period, MIN_PERIOD, MAX_PERIOD)?;
        if let Some(alpha) = self.alpha {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(IndicatorError::config(
                    "ema",
                    format!("alpha {alpha} outside (0, 1]"),
                ));
            }
        }
        if self.slope_lookback == 0 {
            return Err(IndicatorError::config("ema", "slope_lookback must be >= 1"));
        }
        if self.volatility_lookback < 2 {
            return Err(IndicatorError::config("ema", "volatility_lookback must be >= 2"));
        }
        Ok(())
    }

    /// Effective smoothing factor.
    pub fn alpha(&self) -> f64 {
        self.alpha.unwrap_or(2.0 / (self.period as f64 + 1.0))
    }
}

/// Streaming EMA with slope and volatility helpers.
#[derive(Debug, Clone)]
pub struct EmaIndicator {
    name: String,
    config: EmaConfig,
    alpha: f64,
    ema: Option<f64>,
    history: RingBuffer<f64>,
    closes: RingBuffer<f64>,
    count: usize,
    cross: CrossTracker,
}

impl EmaIndicator {
    pub fn new(config: EmaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("EMA_{}", config.period),
            alpha: config.alpha(),
            ema: None,
            history: RingBuffer::new(config.slope_lookback + 1),
            closes: RingBuffer::new(config.volatility_lookback),
            count: 0,
            cross: CrossTracker::default(),
            config,
        })
    }

    pub fn with_period(period: usize) -> Result<Self> {
        Self::new(EmaConfig {
            period,
            ..EmaConfig::default()
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Raw EMA state, including during warm-up.
    pub fn value(&self) -> Option<f64> {
        self.ema
    }

    /// Average change of the EMA per step over the last `slope_lookback`
    /// steps.
    pub fn trend_slope(&self) -> Option<f64> {
        let lookback = self.config.slope_lookback;
        if self.history.len() < lookback + 1 {
            return None;
        }
        let newest = *self.history.last()?;
        let oldest = *self.history.first()?;
        Some((newest - oldest) / lookback as f64)
    }

    /// Population standard deviation of the recent closes.
    pub fn volatility(&self) -> Option<f64> {
        if self.closes.len() < 2 {
            return None;
        }
        let window: Vec<f64> = self.closes.iter().copied().collect();
        std_dev(&window)
    }
}

impl Indicator for EmaIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_periods(&self) -> usize {
        self.config.period
    }

    fn is_ready(&self) -> bool {
        self.count >= self.config.period
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        if !self.is_ready() {
            return None;
        }
        self.ema.map(IndicatorValue::Scalar)
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        let close = candle.close();
        let next = match self.ema {
            None => close,
            Some(prev) => close * self.alpha + prev * (1.0 - self.alpha),
        };
        if !next.is_finite() {
            // Downstream consumers should not trust a broken series.
            return None;
        }

        self.ema = Some(next);
        self.history.push(next);
        self.closes.push(close);

        if !self.is_ready() {
            return None;
        }
        self.cross.observe(close, next);
        trace!(indicator = %self.name, ema = next, "ema updated");

        let mut result = IndicatorResult::new(self.name.clone(), candle.timestamp(), IndicatorValue::Scalar(next))
            .with_meta("close", close)
            .with_meta("alpha", self.alpha);
        if let Some(slope) = self.trend_slope() {
            result = result.with_meta("trend_slope", slope);
        }
        if let Some(vol) = self.volatility() {
            result = result.with_meta("volatility", vol);
        }
        Some(result)
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let signal = crossover_signal(&self.cross, result)?;
        Some(match self.trend_slope() {
            Some(slope) => signal.with_meta("trend_slope", slope),
            None => signal,
        })
    }

    fn reset(&mut self) {
        self.ema = None;
        self.history.clear();
        self.closes.clear();
        self.count = 0;
        self.cross.reset();
    }
}
