// =============================================================================
// Fibonacci Retracement / Extension Detector
// =============================================================================
//
// Swings are built from the confirmed extrema (radius 3) of the trailing
// window:
//   - consecutive extrema of the same kind collapse to the more extreme one
//   - a low followed by a high is a bullish swing, a high followed by a low
//     is bearish; the relative move must reach `min_swing_size`
//   - only the latest `max_swings` swings younger than `max_swing_age_hours`
//     are kept
//
// Levels, with size = high - low:
//   retracement  bullish: high - size * r      bearish: low  + size * r
//   extension    bullish: low  + size * r      bearish: high - size * r
//
// Levels are rebuilt on every candle; touch counts survive for swings that
// are still present.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{CandleTime, TimeSource};
use crate::error::{check_positive, IndicatorError, Result};
use crate::indicators::Indicator;
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};
use crate::zones::swing::{find_swing_points, SwingKind, SwingPoint};
use crate::zones::{LevelKind, PriceLevel};

pub const SWING_RADIUS: usize = 3;

pub const RETRACEMENT_RATIOS: [f64; 5] = [0.236, 0.382, 0.5, 0.618, 0.786];
pub const EXTENSION_RATIOS: [f64; 5] = [1.272, 1.414, 1.618, 2.0, 2.618];

/// Retracements that produce signals, with their signal strength.
const SIGNAL_RATIOS: [(f64, f64); 3] = [(0.618, 0.9), (0.5, 0.75), (0.382, 0.6)];

fn default_lookback() -> usize {
    100
}

fn default_min_swing_size() -> f64 {
    0.02
}

fn default_touch_tolerance() -> f64 {
    0.003
}

fn default_max_swings() -> usize {
    3
}

fn default_max_swing_age_hours() -> u32 {
    168
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FibonacciConfig {
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Minimum relative move from swing start to swing end.
    #[serde(default = "default_min_swing_size")]
    pub min_swing_size: f64,

    #[serde(default = "default_touch_tolerance")]
    pub touch_tolerance: f64,

    #[serde(default = "default_max_swings")]
    pub max_swings: usize,

    /// Swings that ended longer ago than this are dropped.
    #[serde(default = "default_max_swing_age_hours")]
    pub max_swing_age_hours: u32,
}

impl Default for FibonacciConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            min_swing_size: default_min_swing_size(),
            touch_tolerance: default_touch_tolerance(),
            max_swings: default_max_swings(),
            max_swing_age_hours: default_max_swing_age_hours(),
        }
    }
}

impl FibonacciConfig {
    pub fn validate(&self) -> Result<()> {
        const NAME: &str = "fibonacci";
        if self.lookback < 2 * SWING_RADIUS + 1 {
            return Err(IndicatorError::config(
                NAME,
                format!("lookback must be >= {}", 2 * SWING_RADIUS + 1),
            ));
        }
        check_positive(NAME, "min_swing_size", self.min_swing_size)?;
        check_positive(NAME, "touch_tolerance", self.touch_tolerance)?;
        if self.max_swings == 0 {
            return Err(IndicatorError::config(NAME, "max_swings must be >= 1"));
        }
        if self.max_swing_age_hours == 0 {
            return Err(IndicatorError::config(NAME, "max_swing_age_hours must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingDirection {
    /// Low first, then high.
    Bullish,
    /// High first, then low.
    Bearish,
}

impl std::fmt::Display for SwingDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

/// A significant move between two opposite extrema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibonacciSwing {
    pub direction: SwingDirection,
    pub high: f64,
    pub low: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FibonacciSwing {
    fn from_extrema(first: &SwingPoint, second: &SwingPoint) -> Option<Self> {
        let (direction, high, low) = match (first.kind, second.kind) {
            (SwingKind::Low, SwingKind::High) => (SwingDirection::Bullish, second.price, first.price),
            (SwingKind::High, SwingKind::Low) => (SwingDirection::Bearish, first.price, second.price),
            _ => return None,
        };
        Some(Self {
            direction,
            high,
            low,
            start: first.timestamp,
            end: second.timestamp,
        })
    }

    pub fn size(&self) -> f64 {
        self.high - self.low
    }

    /// Move relative to the price the swing started from.
    pub fn relative_size(&self) -> f64 {
        let origin = match self.direction {
            SwingDirection::Bullish => self.low,
            SwingDirection::Bearish => self.high,
        };
        if origin == 0.0 {
            return 0.0;
        }
        self.size() / origin.abs()
    }

    pub fn retracement(&self, ratio: f64) -> f64 {
        match self.direction {
            SwingDirection::Bullish => self.high - self.size() * ratio,
            SwingDirection::Bearish => self.low + self.size() * ratio,
        }
    }

    pub fn extension(&self, ratio: f64) -> f64 {
        match self.direction {
            SwingDirection::Bullish => self.low + self.size() * ratio,
            SwingDirection::Bearish => self.high - self.size() * ratio,
        }
    }
}

/// One ratio level of one swing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub ratio: f64,
    pub direction: SwingDirection,
    pub swing_start: DateTime<Utc>,
    pub swing_end: DateTime<Utc>,
    pub level: PriceLevel,
}

impl FibonacciLevel {
    fn same_origin(&self, other: &FibonacciLevel) -> bool {
        self.swing_start == other.swing_start
            && self.swing_end == other.swing_end
            && self.level.kind == other.level.kind
            && (self.ratio - other.ratio).abs() < 1e-9
    }
}

fn ratio_label(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Collapse runs of same-kind extrema, keeping the most extreme point.
fn alternate_extrema(points: Vec<SwingPoint>) -> Vec<SwingPoint> {
    let mut out: Vec<SwingPoint> = Vec::with_capacity(points.len());
    for point in points {
        match out.last_mut() {
            Some(last) if last.kind == point.kind => {
                let more_extreme = match point.kind {
                    SwingKind::High => point.price > last.price,
                    SwingKind::Low => point.price < last.price,
                };
                if more_extreme {
                    *last = point;
                }
            }
            _ => out.push(point),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct FibonacciDetector {
    name: String,
    config: FibonacciConfig,
    history: RingBuffer<MarketData>,
    swings: Vec<FibonacciSwing>,
    levels: Vec<FibonacciLevel>,
    /// Indices into `levels` touched by the latest close.
    touched: Vec<usize>,
    clock: Arc<dyn TimeSource>,
    count: usize,
}

impl FibonacciDetector {
    pub fn new(config: FibonacciConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: "Fibonacci".to_string(),
            history: RingBuffer::new(config.lookback),
            swings: Vec::new(),
            levels: Vec::new(),
            touched: Vec::new(),
            clock: Arc::new(CandleTime),
            count: 0,
            config,
        })
    }

    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn swings(&self) -> &[FibonacciSwing] {
        &self.swings
    }

    pub fn levels(&self) -> &[FibonacciLevel] {
        &self.levels
    }

    fn detect_swings(&mut self, now: DateTime<Utc>) {
        let extrema = alternate_extrema(find_swing_points(self.history.as_slice(), SWING_RADIUS));
        let max_age = Duration::hours(i64::from(self.config.max_swing_age_hours));

        let mut swings: Vec<FibonacciSwing> = extrema
            .windows(2)
            .filter_map(|pair| FibonacciSwing::from_extrema(&pair[0], &pair[1]))
            .filter(|s| s.size() > 0.0 && s.relative_size() >= self.config.min_swing_size)
            .filter(|s| now - s.end <= max_age)
            .collect();
        if swings.len() > self.config.max_swings {
            swings.drain(..swings.len() - self.config.max_swings);
        }

        if swings != self.swings {
            debug!(count = swings.len(), "fibonacci swings changed");
        }
        self.swings = swings;
    }

    /// Rebuild every level from the current swings, carrying over touch
    /// history from levels of the same swing.
    fn rebuild_levels(&mut self, now: DateTime<Utc>) {
        let previous = std::mem::take(&mut self.levels);
        let mut levels = Vec::with_capacity(self.swings.len() * 10);

        for swing in &self.swings {
            let retracements = RETRACEMENT_RATIOS
                .iter()
                .map(|&r| (r, LevelKind::Retracement, swing.retracement(r)));
            let extensions = EXTENSION_RATIOS
                .iter()
                .map(|&r| (r, LevelKind::Extension, swing.extension(r)));

            for (ratio, kind, price) in retracements.chain(extensions) {
                let mut level = FibonacciLevel {
                    ratio,
                    direction: swing.direction,
                    swing_start: swing.start,
                    swing_end: swing.end,
                    level: PriceLevel::new(price, kind, ratio_label(ratio), now),
                };
                if let Some(prev) = previous.iter().find(|p| p.same_origin(&level)) {
                    level.level.id = prev.level.id;
                    level.level.created_at = prev.level.created_at;
                    level.level.touches = prev.level.touches;
                    level.level.last_touch = prev.level.last_touch;
                }
                levels.push(level);
            }
        }
        self.levels = levels;
    }

    fn register_touches(&mut self, close: f64, now: DateTime<Utc>) {
        self.touched.clear();
        let tolerance = self.config.touch_tolerance;
        for (i, fib) in self.levels.iter_mut().enumerate() {
            if fib.level.is_touched_by(close, tolerance) {
                fib.level.register_touch(now);
                debug!(ratio = fib.ratio, price = fib.level.price, close, "fibonacci level touched");
                self.touched.push(i);
            }
        }
    }

    fn signal_weight(fib: &FibonacciLevel) -> Option<f64> {
        if fib.level.kind != LevelKind::Retracement {
            return None;
        }
        SIGNAL_RATIOS
            .iter()
            .find(|(ratio, _)| (ratio - fib.ratio).abs() < 1e-9)
            .map(|&(_, weight)| weight)
    }
}

impl Indicator for FibonacciDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_periods(&self) -> usize {
        2 * SWING_RADIUS + 1
    }

    fn is_ready(&self) -> bool {
        self.history.len() >= self.required_periods()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.is_ready()
            .then(|| IndicatorValue::Levels(self.levels.iter().map(|f| f.level.clone()).collect()))
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        self.touched.clear();
        self.history.push(candle.clone());
        if !self.is_ready() {
            return None;
        }

        let now = self.clock.now(candle);
        let close = candle.close();
        self.detect_swings(now);
        self.rebuild_levels(now);
        self.register_touches(close, now);

        let value = IndicatorValue::Levels(self.levels.iter().map(|f| f.level.clone()).collect());
        Some(
            IndicatorResult::new(self.name.clone(), candle.timestamp(), value)
                .with_meta("close", close)
                .with_meta("swings", self.swings.len())
                .with_meta("touched", self.touched.len()),
        )
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let close = result.meta("close")?.as_f64()?;
        let (fib, weight) = self
            .touched
            .iter()
            .filter_map(|&i| self.levels.get(i))
            .filter_map(|f| Self::signal_weight(f).map(|w| (f, w)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        let direction = match fib.direction {
            SwingDirection::Bullish => SignalDirection::Long,
            SwingDirection::Bearish => SignalDirection::Short,
        };
        Some(
            Signal::clamped(
                direction,
                weight,
                format!(
                    "{} retracement {} at {:.4} (close {close:.4})",
                    fib.direction, fib.level.label, fib.level.price
                ),
                self.name.clone(),
                result.timestamp(),
            )
            .with_meta("ratio", fib.ratio)
            .with_meta("level_price", fib.level.price)
            .with_meta("touches", fib.level.touches),
        )
    }

    fn reset(&mut self) {
        self.history.clear();
        self.swings.clear();
        self.levels.clear();
        self.touched.clear();
        self.count = 0;
    }
}
