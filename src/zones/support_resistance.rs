// =============================================================================
// Support / Resistance Detector
// =============================================================================
//
// Two-phase algorithm run on every candle:
//
//   1. Scan the trailing window for swing highs / swing lows (radius 2).
//   2. Cluster swing prices whose relative distance from the running cluster
//      mean is below `min_distance`.  Clusters with at least `min_strength`
//      points become levels:
//        price    = mean of the cluster
//        strength = cluster size
//      Swing lows seed support, swing highs seed resistance.
//
// New levels are added first, then every active level is checked against
// the close, so a level confirmed on this candle can already be touched:
//   |close - level| <= touch_tolerance           => touch (+1 touch, +1 strength)
//   close beyond the level by > touch_tolerance   => broken (deactivated)
//
// A cluster that matches an active level lifts its strength to at least the
// cluster size and refreshes its creation time from the newest swing.
//
// Pruning: levels idle for longer than `max_age_hours`, then the weakest
// active levels beyond `max_levels`.
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
use crate::zones::swing::{find_swing_points, SwingKind};
use crate::zones::{LevelEvent, LevelEventKind, LevelKind, PriceLevel};

/// Neighbours on each side a swing point must dominate.
pub const SWING_RADIUS: usize = 2;

/// Level strength at which signal strength saturates.
const FULL_STRENGTH: f64 = 10.0;

fn default_lookback() -> usize {
    100
}

fn default_min_strength() -> u32 {
    2
}

fn default_min_distance() -> f64 {
    0.005
}

fn default_touch_tolerance() -> f64 {
    0.002
}

fn default_max_levels() -> usize {
    10
}

fn default_max_age_hours() -> u32 {
    24
}

/// Tunable parameters for [`SupportResistanceDetector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportResistanceConfig {
    /// Candles retained for swing detection.
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Swing points a cluster needs to become a level.
    #[serde(default = "default_min_strength")]
    pub min_strength: u32,

    /// Relative distance under which swing prices cluster together.
    #[serde(default = "default_min_distance")]
    pub min_distance: f64,

    /// Relative band around a level that counts as a touch.
    #[serde(default = "default_touch_tolerance")]
    pub touch_tolerance: f64,

    #[serde(default = "default_max_levels")]
    pub max_levels: usize,

    /// Levels with no touch for this long are dropped.
    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u32,
}

impl Default for SupportResistanceConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            min_strength: default_min_strength(),
            min_distance: default_min_distance(),
            touch_tolerance: default_touch_tolerance(),
            max_levels: default_max_levels(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl SupportResistanceConfig {
    pub fn validate(&self) -> Result<()> {
        const NAME: &str = "support_resistance";
        if self.lookback < 2 * SWING_RADIUS + 1 {
            return Err(IndicatorError::config(
                NAME,
                format!("lookback must be >= {}", 2 * SWING_RADIUS + 1),
            ));
        }
        if self.min_strength == 0 {
            return Err(IndicatorError::config(NAME, "min_strength must be >= 1"));
        }
        check_positive(NAME, "min_distance", self.min_distance)?;
        check_positive(NAME, "touch_tolerance", self.touch_tolerance)?;
        if self.max_levels == 0 {
            return Err(IndicatorError::config(NAME, "max_levels must be >= 1"));
        }
        if self.max_age_hours == 0 {
            return Err(IndicatorError::config(NAME, "max_age_hours must be >= 1"));
        }
        Ok(())
    }
}

/// A cluster of swing prices.
#[derive(Debug, Clone, PartialEq)]
struct Cluster {
    mean: f64,
    size: u32,
    /// Timestamp of the newest swing in the cluster.
    latest: DateTime<Utc>,
}

/// Greedy clustering of swing `(price, time)` pairs: sorted by price, each
/// point joins the current cluster while within `min_distance` of its
/// running mean.
fn cluster_prices(mut points: Vec<(f64, DateTime<Utc>)>, min_distance: f64) -> Vec<Cluster> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut sum = 0.0;

    for (price, ts) in points {
        if let Some(current) = clusters.last_mut() {
            let near = current.mean != 0.0
                && (price - current.mean).abs() / current.mean.abs() < min_distance;
            if near {
                sum += price;
                current.size += 1;
                current.mean = sum / current.size as f64;
                current.latest = current.latest.max(ts);
                continue;
            }
        }
        sum = price;
        clusters.push(Cluster {
            mean: price,
            size: 1,
            latest: ts,
        });
    }
    clusters
}

/// Streaming support/resistance detector.
#[derive(Debug, Clone)]
pub struct SupportResistanceDetector {
    name: String,
    config: SupportResistanceConfig,
    history: RingBuffer<MarketData>,
    levels: Vec<PriceLevel>,
    events: Vec<LevelEvent>,
    clock: Arc<dyn TimeSource>,
    count: usize,
}

impl SupportResistanceDetector {
    pub fn new(config: SupportResistanceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: "SupportResistance".to_string(),
            history: RingBuffer::new(config.lookback),
            levels: Vec::new(),
            events: Vec::new(),
            clock: Arc::new(CandleTime),
            count: 0,
            config,
        })
    }

    /// Replace the time source used for level aging.
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Every tracked level, including recently broken ones.
    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    /// Active levels sorted by price.
    pub fn active_levels(&self) -> Vec<PriceLevel> {
        let mut active: Vec<PriceLevel> = self.levels.iter().filter(|l| l.active).cloned().collect();
        active.sort_by(|a, b| a.price.total_cmp(&b.price));
        active
    }

    /// Highest active support at or below `price`.
    pub fn nearest_support(&self, price: f64) -> Option<&PriceLevel> {
        self.levels
            .iter()
            .filter(|l| l.active && l.kind == LevelKind::Support && l.price <= price)
            .max_by(|a, b| a.price.total_cmp(&b.price))
    }

    /// Lowest active resistance at or above `price`.
    pub fn nearest_resistance(&self, price: f64) -> Option<&PriceLevel> {
        self.levels
            .iter()
            .filter(|l| l.active && l.kind == LevelKind::Resistance && l.price >= price)
            .min_by(|a, b| a.price.total_cmp(&b.price))
    }

    /// Touch/break checks for the latest close against active levels.
    fn update_levels(&mut self, close: f64, now: DateTime<Utc>) {
        let tolerance = self.config.touch_tolerance;
        for level in self.levels.iter_mut().filter(|l| l.active) {
            if level.is_broken_by(close, tolerance) {
                level.mark_broken(now);
                debug!(kind = %level.kind, price = level.price, close, "level broken");
                self.events.push(LevelEvent {
                    kind: LevelEventKind::Break,
                    level: level.clone(),
                });
            } else if level.is_touched_by(close, tolerance) {
                level.register_touch(now);
                level.strength += 1;
                self.events.push(LevelEvent {
                    kind: LevelEventKind::Touch,
                    level: level.clone(),
                });
            }
        }
    }

    /// Cluster the swing points in the window, add levels not already
    /// tracked and reinforce active ones that new swings joined.
    fn detect_levels(&mut self, now: DateTime<Utc>) {
        let points = find_swing_points(self.history.as_slice(), SWING_RADIUS);
        if points.is_empty() {
            return;
        }

        for (swing, kind) in [(SwingKind::Low, LevelKind::Support), (SwingKind::High, LevelKind::Resistance)] {
            let prices: Vec<(f64, DateTime<Utc>)> = points
                .iter()
                .filter(|p| p.kind == swing)
                .map(|p| (p.price, p.timestamp))
                .collect();
            for cluster in cluster_prices(prices, self.config.min_distance) {
                if cluster.size < self.config.min_strength {
                    continue;
                }
                let created = cluster.latest.min(now);
                // Broken levels stay on the list until they age out so that
                // they are not recreated from the same swings.
                let min_distance = self.config.min_distance;
                let known = self
                    .levels
                    .iter_mut()
                    .find(|l| l.kind == kind && l.relative_distance(cluster.mean) < min_distance);
                if let Some(level) = known {
                    if level.active && cluster.size > level.strength {
                        debug!(kind = %kind, price = level.price, strength = cluster.size, "level reinforced");
                        level.strength = cluster.size;
                        level.created_at = level.created_at.max(created);
                    }
                    continue;
                }
                debug!(kind = %kind, price = cluster.mean, strength = cluster.size, "new level");
                let label = match kind {
                    LevelKind::Support => "S",
                    _ => "R",
                };
                // Aged from the newest contributing swing, so levels rebuilt
                // from old swings are already stale.
                self.levels
                    .push(PriceLevel::new(cluster.mean, kind, label, created).with_strength(cluster.size));
            }
        }
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let max_age = Duration::hours(i64::from(self.config.max_age_hours));
        self.levels.retain(|l| now - l.last_activity() <= max_age);

        let max_levels = self.config.max_levels;
        let (mut active, mut broken): (Vec<PriceLevel>, Vec<PriceLevel>) =
            self.levels.drain(..).partition(|l| l.active);
        active.sort_by(|a, b| b.strength.cmp(&a.strength).then(b.created_at.cmp(&a.created_at)));
        active.truncate(max_levels);
        broken.sort_by(|a, b| b.broken_at.cmp(&a.broken_at));
        broken.truncate(max_levels);

        self.levels = active;
        self.levels.append(&mut broken);
    }

    fn signal_for(&self, event: &LevelEvent, close: f64, timestamp: DateTime<Utc>) -> Signal {
        let level = &event.level;
        let (direction, action) = match (event.kind, level.kind) {
            (LevelEventKind::Touch, LevelKind::Support) => (SignalDirection::Long, "bounce off support"),
            (LevelEventKind::Touch, _) => (SignalDirection::Short, "rejection at resistance"),
            (LevelEventKind::Break, LevelKind::Resistance) => (SignalDirection::Long, "resistance breakout"),
            (LevelEventKind::Break, _) => (SignalDirection::Short, "support breakdown"),
        };
        Signal::clamped(
            direction,
            f64::from(level.strength) / FULL_STRENGTH,
            format!("{action} at {:.4} (close {close:.4})", level.price),
            self.name.clone(),
            timestamp,
        )
        .with_meta("level_price", level.price)
        .with_meta("level_strength", level.strength)
        .with_meta("touches", level.touches)
    }
}

impl Indicator for SupportResistanceDetector {
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
        self.is_ready().then(|| IndicatorValue::Levels(self.active_levels()))
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        self.events.clear();
        let now = self.clock.now(candle);
        let close = candle.close();

        self.history.push(candle.clone());
        if !self.is_ready() {
            return None;
        }
        self.detect_levels(now);
        self.update_levels(close, now);
        self.prune(now);

        let touches = self.events.iter().filter(|e| e.kind == LevelEventKind::Touch).count();
        let breaks = self.events.len() - touches;
        let mut result = IndicatorResult::new(
            self.name.clone(),
            candle.timestamp(),
            IndicatorValue::Levels(self.active_levels()),
        )
        .with_meta("close", close)
        .with_meta("touches", touches)
        .with_meta("breaks", breaks);
        if let Some(s) = self.nearest_support(close) {
            result = result.with_meta("nearest_support", s.price);
        }
        if let Some(r) = self.nearest_resistance(close) {
            result = result.with_meta("nearest_resistance", r.price);
        }
        Some(result)
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let close = result.meta("close")?.as_f64()?;
        // Breaks outrank touches; stronger levels outrank weaker ones.
        let event = self.events.iter().max_by(|a, b| {
            let rank = |e: &LevelEvent| (e.kind == LevelEventKind::Break, e.level.strength);
            rank(a).cmp(&rank(b))
        })?;
        Some(self.signal_for(event, close, result.timestamp()))
    }

    fn reset(&mut self) {
        self.history.clear();
        self.levels.clear();
        self.events.clear();
        self.count = 0;
    }
}
