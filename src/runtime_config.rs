// =============================================================================
// Runtime Configuration: per-indicator settings loaded from JSON
// =============================================================================
//
// One section per indicator plus an `enabled` block that switches each one
// on or off.  Every field carries a serde default so a partial (or empty)
// file loads cleanly; invalid values are only reported once the indicators
// are actually constructed in `build_indicators`.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{CandleTime, TimeSource, WallClock};
use crate::indicators::{
    AtrConfig, AtrIndicator, EmaConfig, EmaIndicator, Indicator, RsiConfig, RsiIndicator, SmaConfig,
    SmaIndicator,
};
use crate::zones::{
    FibonacciConfig, FibonacciDetector, OrderBlockConfig, OrderBlockDetector, PivotPointsConfig,
    PivotPointsDetector, SupportResistanceConfig, SupportResistanceDetector,
};

fn default_true() -> bool {
    true
}

// =============================================================================
// Enabled flags
// =============================================================================

/// Which indicators `build_indicators` constructs.  All on by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledIndicators {
    #[serde(default = "default_true")]
    pub sma: bool,
    #[serde(default = "default_true")]
    pub ema: bool,
    #[serde(default = "default_true")]
    pub rsi: bool,
    #[serde(default = "default_true")]
    pub atr: bool,
    #[serde(default = "default_true")]
    pub support_resistance: bool,
    #[serde(default = "default_true")]
    pub fibonacci: bool,
    #[serde(default = "default_true")]
    pub pivot_points: bool,
    #[serde(default = "default_true")]
    pub order_blocks: bool,
}

impl Default for EnabledIndicators {
    fn default() -> Self {
        Self {
            sma: true,
            ema: true,
            rsi: true,
            atr: true,
            support_resistance: true,
            fibonacci: true,
            pivot_points: true,
            order_blocks: true,
        }
    }
}

/// Clock used by the level detectors to age their levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    /// Timestamp of the candle being processed (replay / backtest).
    #[default]
    Candle,
    /// Host wall clock (live feeds).
    Wall,
}

impl ClockMode {
    pub fn time_source(&self) -> Arc<dyn TimeSource> {
        match self {
            Self::Candle => Arc::new(CandleTime),
            Self::Wall => Arc::new(WallClock),
        }
    }
}

impl std::fmt::Display for ClockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candle => write!(f, "candle"),
            Self::Wall => write!(f, "wall"),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the indicator engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub enabled: EnabledIndicators,

    #[serde(default)]
    pub clock: ClockMode,

    // --- Scalar indicators --------------------------------------------------
    #[serde(default)]
    pub sma: SmaConfig,

    #[serde(default)]
    pub ema: EmaConfig,

    #[serde(default)]
    pub rsi: RsiConfig,

    #[serde(default)]
    pub atr: AtrConfig,

    // --- Zone detectors -----------------------------------------------------
    #[serde(default)]
    pub support_resistance: SupportResistanceConfig,

    #[serde(default)]
    pub fibonacci: FibonacciConfig,

    #[serde(default)]
    pub pivot_points: PivotPointsConfig,

    #[serde(default)]
    pub order_blocks: OrderBlockConfig,
}

/// Box a freshly built indicator, logging and tagging a rejected config.
fn boxed<I>(name: &'static str, built: crate::error::Result<I>) -> Result<Box<dyn Indicator>>
where
    I: Indicator + 'static,
{
    match built {
        Ok(indicator) => Ok(Box::new(indicator)),
        Err(e) => {
            warn!(indicator = name, error = %e, "indicator config rejected");
            Err(e).with_context(|| format!("failed to build {name}"))
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            clock = %config.clock,
            enabled = config.enabled_count(),
            "runtime config loaded"
        );

        Ok(config)
    }

    pub fn enabled_count(&self) -> usize {
        let e = &self.enabled;
        [
            e.sma,
            e.ema,
            e.rsi,
            e.atr,
            e.support_resistance,
            e.fibonacci,
            e.pivot_points,
            e.order_blocks,
        ]
        .iter()
        .filter(|on| **on)
        .count()
    }

    /// Construct every enabled indicator to surface configuration errors.
    pub fn validate(&self) -> Result<()> {
        self.build_indicators().map(|_| ())
    }

    /// Build the enabled indicators, scalar indicators first, in a fixed
    /// order.
    pub fn build_indicators(&self) -> Result<Vec<Box<dyn Indicator>>> {
        let e = &self.enabled;
        let clock = self.clock.time_source();
        let mut out: Vec<Box<dyn Indicator>> = Vec::with_capacity(self.enabled_count());

        if e.sma {
            out.push(boxed("sma", SmaIndicator::new(self.sma.clone()))?);
        }
        if e.ema {
            out.push(boxed("ema", EmaIndicator::new(self.ema.clone()))?);
        }
        if e.rsi {
            out.push(boxed("rsi", RsiIndicator::new(self.rsi.clone()))?);
        }
        if e.atr {
            out.push(boxed("atr", AtrIndicator::new(self.atr.clone()))?);
        }
        if e.support_resistance {
            let built = SupportResistanceDetector::new(self.support_resistance.clone())
                .map(|d| d.with_time_source(Arc::clone(&clock)));
            out.push(boxed("support_resistance", built)?);
        }
        if e.fibonacci {
            let built = FibonacciDetector::new(self.fibonacci.clone())
                .map(|d| d.with_time_source(Arc::clone(&clock)));
            out.push(boxed("fibonacci", built)?);
        }
        if e.pivot_points {
            let built = PivotPointsDetector::new(self.pivot_points.clone())
                .map(|d| d.with_time_source(Arc::clone(&clock)));
            out.push(boxed("pivot_points", built)?);
        }
        if e.order_blocks {
            out.push(boxed("order_blocks", OrderBlockDetector::new(self.order_blocks.clone()))?);
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::AtrSmoothing;
    use crate::zones::PivotMethod;

    #[test]
    fn default_config_builds_every_indicator() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.enabled_count(), 8);
        assert_eq!(cfg.clock, ClockMode::Candle);
        let indicators = cfg.build_indicators().unwrap();
        assert_eq!(indicators.len(), 8);
        assert_eq!(indicators[0].name(), "SMA_20");
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.sma.period, 20);
        assert_eq!(cfg.rsi.period, 14);
        assert_eq!(cfg.atr.smoothing, AtrSmoothing::Exponential);
        assert_eq!(cfg.order_blocks.max_blocks_display, 10);
        assert!(cfg.enabled.fibonacci);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "enabled": { "order_blocks": false, "fibonacci": false },
            "clock": "wall",
            "rsi": { "period": 7 },
            "atr": { "smoothing": "sma" },
            "pivot_points": { "method": "camarilla" }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.clock, ClockMode::Wall);
        assert_eq!(cfg.rsi.period, 7);
        assert!((cfg.rsi.overbought - 70.0).abs() < f64::EPSILON);
        assert_eq!(cfg.atr.smoothing, AtrSmoothing::Simple);
        assert_eq!(cfg.pivot_points.method, PivotMethod::Camarilla);
        assert!(cfg.enabled.sma);
        assert_eq!(cfg.build_indicators().unwrap().len(), 6);
    }

    #[test]
    fn invalid_section_fails_validation() {
        let json = r#"{ "rsi": { "overbought": 20, "oversold": 30 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("rsi"));

        // A disabled indicator is never constructed.
        let mut cfg = cfg;
        cfg.enabled.rsi = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unknown_smoothing_is_a_parse_error() {
        let json = r#"{ "atr": { "smoothing": "wilder" } }"#;
        assert!(serde_json::from_str::<RuntimeConfig>(json).is_err());
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("aurora_ta_{}.json", uuid::Uuid::new_v4()));
        let json = r#"{ "sma": { "period": 50 }, "enabled": { "pivot_points": false } }"#;
        std::fs::write(&path, json).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.sma.period, 50);
        assert!(!loaded.enabled.pivot_points);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/nonexistent/aurora_ta.json").is_err());
    }
}
