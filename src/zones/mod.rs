// =============================================================================
// Structural Zones Module
// =============================================================================
//
// Detectors that turn the candle stream into price levels and zones:
// - Support / resistance from clustered swing points
// - Fibonacci retracements and extensions of significant swings
// - Period pivot points (Standard / Fibonacci / Camarilla / DeMark)
// - Institutional order blocks with a four-state lifecycle
//
// Every detector owns its levels outright and implements `Indicator`; the
// result value is a snapshot of the live levels/zones.

pub mod fibonacci;
pub mod order_block;
pub mod pivot_points;
pub mod support_resistance;
pub mod swing;

pub use fibonacci::{FibonacciConfig, FibonacciDetector, FibonacciLevel, FibonacciSwing, SwingDirection};
pub use order_block::{
    merge_overlapping, BlockMetrics, BlockStatus, BlockType, OrderBlock, OrderBlockConfig,
    OrderBlockDetector, ScoreWeights, StrengthTier,
};
pub use pivot_points::{
    compute_levels, PeriodBar, PivotLevel, PivotMethod, PivotPeriod, PivotPointsConfig,
    PivotPointsDetector,
};
pub use support_resistance::{SupportResistanceConfig, SupportResistanceDetector};
pub use swing::{find_swing_points, SwingKind, SwingPoint};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Slack on relative-distance comparisons so a close exactly at the
/// tolerance still counts as a touch.
const TOUCH_EPSILON: f64 = 1e-12;

/// What a price level represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Support,
    Resistance,
    Pivot,
    Retracement,
    Extension,
}

impl LevelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Resistance => "resistance",
            Self::Pivot => "pivot",
            Self::Retracement => "retracement",
            Self::Extension => "extension",
        }
    }
}

impl std::fmt::Display for LevelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A horizontal price level tracked by one of the detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub id: Uuid,
    pub price: f64,
    pub kind: LevelKind,
    /// Short tag for display, e.g. `"R1"` or `"61.8%"`.
    pub label: String,
    pub touches: u32,
    pub strength: u32,
    pub created_at: DateTime<Utc>,
    pub last_touch: Option<DateTime<Utc>>,
    pub active: bool,
    pub broken_at: Option<DateTime<Utc>>,
}

impl PriceLevel {
    pub fn new(price: f64, kind: LevelKind, label: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            price,
            kind,
            label: label.into(),
            touches: 0,
            strength: 0,
            created_at,
            last_touch: None,
            active: true,
            broken_at: None,
        }
    }

    pub fn with_strength(mut self, strength: u32) -> Self {
        self.strength = strength;
        self
    }

    /// `|price - level| / |level|`; infinite for a zero level.
    pub fn relative_distance(&self, price: f64) -> f64 {
        if self.price == 0.0 {
            return f64::INFINITY;
        }
        (price - self.price).abs() / self.price.abs()
    }

    /// Whether `close` lies within `tolerance` (relative) of the level.  The
    /// bound is inclusive up to float rounding.
    pub fn is_touched_by(&self, close: f64, tolerance: f64) -> bool {
        self.relative_distance(close) <= tolerance + TOUCH_EPSILON
    }

    /// Whether `close` has moved through the level by more than `tolerance`.
    /// Only support and resistance can break.
    pub fn is_broken_by(&self, close: f64, tolerance: f64) -> bool {
        let band = self.price.abs() * tolerance;
        match self.kind {
            LevelKind::Support => close < self.price - band,
            LevelKind::Resistance => close > self.price + band,
            _ => false,
        }
    }

    pub fn register_touch(&mut self, now: DateTime<Utc>) {
        self.touches += 1;
        self.last_touch = Some(now);
    }

    pub fn mark_broken(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.broken_at = Some(now);
    }

    /// Most recent activity: last touch, else creation.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_touch.unwrap_or(self.created_at)
    }
}

/// What happened to a level on the latest candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LevelEventKind {
    Touch,
    Break,
}

/// A touch or break recorded while processing one candle.
#[derive(Debug, Clone)]
pub(crate) struct LevelEvent {
    pub kind: LevelEventKind,
    pub level: PriceLevel,
}
