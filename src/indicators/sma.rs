// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Arithmetic mean of the last `period` closes:
//   SMA_t = (close_t + close_{t-1} + ... + close_{t-period+1}) / period
//
// No value is produced until `period` closes have been observed.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{check_period, Result};
use crate::indicators::{crossover_signal, CrossTracker, Indicator};
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal};

pub const MIN_PERIOD: usize = 2;
pub const MAX_PERIOD: usize = 200;

fn default_period() -> usize {
    20
}

/// Tunable parameters for [`SmaIndicator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmaConfig {
    #[serde(default = "default_period")]
    pub period: usize,
}

impl Default for SmaConfig {
    fn default() -> Self {
        Self {
            period: default_period(),
        }
    }
}

impl SmaConfig {
    pub fn validate(&self) -> Result<()> {
        check_period("sma", self.period, MIN_PERIOD, MAX_PERIOD)
    }
}

/// Streaming SMA over closing prices.
#[derive(Debug, Clone)]
pub struct SmaIndicator {
    name: String,
    period: usize,
    closes: RingBuffer<f64>,
    current: Option<f64>,
    count: usize,
    cross: CrossTracker,
}

impl SmaIndicator {
    pub fn new(config: SmaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("SMA_{}", config.period),
            period: config.period,
            closes: RingBuffer::new(config.period),
            current: None,
            count: 0,
            cross: CrossTracker::default(),
        })
    }

    pub fn with_period(period: usize) -> Result<Self> {
        Self::new(SmaConfig { period })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn value(&self) -> Option<f64> {
        self.current
    }
}

impl Indicator for SmaIndicator {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_periods(&self) -> usize {
        self.period
    }

    fn is_ready(&self) -> bool {
        self.closes.is_full()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.current.map(IndicatorValue::Scalar)
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        self.closes.push(candle.close());
        if !self.closes.is_full() {
            return None;
        }

        // Summed fresh each step; each term is scaled first so prices near
        // f64::MAX cannot overflow the sum.
        let n = self.period as f64;
        let sma = self.closes.iter().map(|c| c / n).sum::<f64>();
        if !sma.is_finite() {
            return None;
        }
        self.current = Some(sma);
        self.cross.observe(candle.close(), sma);
        trace!(indicator = %self.name, sma, "sma updated");

        Some(
            IndicatorResult::new(self.name.clone(), candle.timestamp(), IndicatorValue::Scalar(sma))
                .with_meta("close", candle.close())
                .with_meta("period", self.period),
        )
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        crossover_signal(&self.cross, result)
    }

    fn reset(&mut self) {
        self.closes.clear();
        self.current = None;
        self.count = 0;
        self.cross.reset();
    }
}
