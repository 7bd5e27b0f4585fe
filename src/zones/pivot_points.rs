// =============================================================================
// Pivot Points Detector
// =============================================================================
//
// Candles aggregate into calendar buckets (day, ISO week, month).  When a
// candle opens a new bucket, levels are recomputed from the bucket that just
// closed (O/H/L/C) and persist until the next boundary:
//
//   Standard   PP = (H+L+C)/3   R1 = 2PP-L   S1 = 2PP-H
//              R2 = PP+(H-L)    S2 = PP-(H-L)
//              R3 = H+2(PP-L)   S3 = L-2(H-PP)     (extended only)
//   Fibonacci  PP +/- {0.382, 0.618, 1.0} * (H-L)
//   Camarilla  pivot = C,  R/S = C +/- (H-L) * 1.1 / {12, 6, 4, 2}
//   DeMark     x = H+2L+C (C<O) | 2H+L+C (C>O) | H+L+2C
//              PP = x/4   R1 = x/2-L   S1 = x/2-H
//
// A zero-range bucket yields the pivot alone.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{CandleTime, TimeSource};
use crate::error::{check_positive, Result};
use crate::indicators::Indicator;
use crate::market_data::MarketData;
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};
use crate::zones::{LevelKind, PriceLevel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotMethod {
    #[default]
    Standard,
    Fibonacci,
    Camarilla,
    DeMark,
}

impl std::fmt::Display for PivotMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Fibonacci => write!(f, "fibonacci"),
            Self::Camarilla => write!(f, "camarilla"),
            Self::DeMark => write!(f, "demark"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PivotPeriod {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl PivotPeriod {
    /// Calendar bucket `ts` belongs to: `(year, month, day)`,
    /// `(iso_year, iso_week, 0)` or `(year, month, 0)`.
    pub fn bucket_key(&self, ts: DateTime<Utc>) -> (i32, u32, u32) {
        match self {
            Self::Daily => (ts.year(), ts.month(), ts.day()),
            Self::Weekly => {
                let week = ts.iso_week();
                (week.year(), week.week(), 0)
            }
            Self::Monthly => (ts.year(), ts.month(), 0),
        }
    }
}

fn default_touch_tolerance() -> f64 {
    0.002
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotPointsConfig {
    #[serde(default)]
    pub method: PivotMethod,

    #[serde(default)]
    pub period: PivotPeriod,

    #[serde(default = "default_touch_tolerance")]
    pub touch_tolerance: f64,

    /// Adds R3/S3 to the standard method.
    #[serde(default)]
    pub include_extended: bool,
}

impl Default for PivotPointsConfig {
    fn default() -> Self {
        Self {
            method: PivotMethod::default(),
            period: PivotPeriod::default(),
            touch_tolerance: default_touch_tolerance(),
            include_extended: false,
        }
    }
}

impl PivotPointsConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("pivot_points", "touch_tolerance", self.touch_tolerance)
    }
}

/// OHLC of one calendar bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PeriodBar {
    fn from_candle(candle: &MarketData) -> Self {
        Self {
            open: candle.open(),
            high: candle.high(),
            low: candle.low(),
            close: candle.close(),
        }
    }

    fn absorb(&mut self, candle: &MarketData) {
        self.high = self.high.max(candle.high());
        self.low = self.low.min(candle.low());
        self.close = candle.close();
    }
}

/// A computed pivot level before it becomes a tracked [`PriceLevel`].
#[derive(Debug, Clone, PartialEq)]
pub struct PivotLevel {
    pub label: String,
    pub price: f64,
    /// 0 for the pivot, n for Rn / Sn.
    pub depth: u32,
}

impl PivotLevel {
    fn new(label: impl Into<String>, price: f64, depth: u32) -> Self {
        Self {
            label: label.into(),
            price,
            depth,
        }
    }

    pub fn kind(&self) -> LevelKind {
        if self.label.starts_with('R') {
            LevelKind::Resistance
        } else if self.label.starts_with('S') {
            LevelKind::Support
        } else {
            LevelKind::Pivot
        }
    }
}

/// Resistance/support pairs `(Rn, Sn)` at `center +/- offsets[n-1]`.
fn symmetric(center: f64, offsets: &[f64]) -> Vec<PivotLevel> {
    let mut levels = Vec::with_capacity(offsets.len() * 2);
    for (i, offset) in offsets.iter().enumerate() {
        let depth = i as u32 + 1;
        levels.push(PivotLevel::new(format!("R{depth}"), center + offset, depth));
        levels.push(PivotLevel::new(format!("S{depth}"), center - offset, depth));
    }
    levels
}

/// Pivot levels for a completed period.
pub fn compute_levels(method: PivotMethod, bar: &PeriodBar, include_extended: bool) -> Vec<PivotLevel> {
    let PeriodBar { open, high, low, close } = *bar;
    let range = high - low;

    match method {
        PivotMethod::Standard => {
            let pp = (high + low + close) / 3.0;
            let mut levels = vec![PivotLevel::new("PP", pp, 0)];
            if range <= 0.0 {
                return levels;
            }
            levels.extend([
                PivotLevel::new("R1", 2.0 * pp - low, 1),
                PivotLevel::new("S1", 2.0 * pp - high, 1),
                PivotLevel::new("R2", pp + range, 2),
                PivotLevel::new("S2", pp - range, 2),
            ]);
            if include_extended {
                levels.push(PivotLevel::new("R3", high + 2.0 * (pp - low), 3));
                levels.push(PivotLevel::new("S3", low - 2.0 * (high - pp), 3));
            }
            levels
        }
        PivotMethod::Fibonacci => {
            let pp = (high + low + close) / 3.0;
            let mut levels = vec![PivotLevel::new("PP", pp, 0)];
            if range > 0.0 {
                levels.extend(symmetric(pp, &[0.382 * range, 0.618 * range, range]));
            }
            levels
        }
        PivotMethod::Camarilla => {
            let mut levels = vec![PivotLevel::new("PP", close, 0)];
            if range > 0.0 {
                let offsets: Vec<f64> = [12.0, 6.0, 4.0, 2.0].iter().map(|d| range * 1.1 / d).collect();
                levels.extend(symmetric(close, &offsets));
            }
            levels
        }
        PivotMethod::DeMark => {
            let x = if close < open {
                high + 2.0 * low + close
            } else if close > open {
                2.0 * high + low + close
            } else {
                high + low + 2.0 * close
            };
            let mut levels = vec![PivotLevel::new("PP", x / 4.0, 0)];
            if range > 0.0 {
                levels.push(PivotLevel::new("R1", x / 2.0 - low, 1));
                levels.push(PivotLevel::new("S1", x / 2.0 - high, 1));
            }
            levels
        }
    }
}

#[derive(Debug, Clone)]
pub struct PivotPointsDetector {
    name: String,
    config: PivotPointsConfig,
    bucket: Option<((i32, u32, u32), PeriodBar)>,
    /// Current levels; `strength` holds the level depth.
    levels: Vec<PriceLevel>,
    touched: Vec<usize>,
    clock: Arc<dyn TimeSource>,
    count: usize,
}

impl PivotPointsDetector {
    pub fn new(config: PivotPointsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: format!("Pivot_{}_{:?}", config.method, config.period).to_lowercase(),
            bucket: None,
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

    /// Levels of the current period; empty until the first boundary.
    pub fn levels(&self) -> &[PriceLevel] {
        &self.levels
    }

    pub fn level(&self, label: &str) -> Option<&PriceLevel> {
        self.levels.iter().find(|l| l.label == label)
    }

    fn roll_period(&mut self, completed: &PeriodBar, now: DateTime<Utc>) {
        let computed = compute_levels(self.config.method, completed, self.config.include_extended);
        debug!(
            method = %self.config.method,
            high = completed.high,
            low = completed.low,
            close = completed.close,
            levels = computed.len(),
            "pivot levels recomputed"
        );
        self.levels = computed
            .into_iter()
            .map(|l| {
                let kind = l.kind();
                PriceLevel::new(l.price, kind, l.label, now).with_strength(l.depth)
            })
            .collect();
    }
}

impl Indicator for PivotPointsDetector {
    fn name(&self) -> &str {
        &self.name
    }

    /// One full period plus the candle that closes it.
    fn required_periods(&self) -> usize {
        2
    }

    fn is_ready(&self) -> bool {
        !self.levels.is_empty()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.is_ready().then(|| IndicatorValue::Levels(self.levels.clone()))
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        self.touched.clear();
        let now = self.clock.now(candle);
        let key = self.config.period.bucket_key(candle.timestamp());

        match self.bucket.as_mut() {
            Some((current, bar)) if *current == key => bar.absorb(candle),
            _ => {
                if let Some((_, completed)) = self.bucket.take() {
                    self.roll_period(&completed, now);
                }
                self.bucket = Some((key, PeriodBar::from_candle(candle)));
            }
        }
        if !self.is_ready() {
            return None;
        }

        let close = candle.close();
        let tolerance = self.config.touch_tolerance;
        for (i, level) in self.levels.iter_mut().enumerate() {
            if level.is_touched_by(close, tolerance) {
                level.register_touch(now);
                self.touched.push(i);
            }
        }

        let mut result = IndicatorResult::new(
            self.name.clone(),
            candle.timestamp(),
            IndicatorValue::Levels(self.levels.clone()),
        )
        .with_meta("close", close)
        .with_meta("method", self.config.method.to_string());
        if let Some(pp) = self.level("PP") {
            result = result.with_meta("pivot", pp.price);
        }
        Some(result)
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let close = result.meta("close")?.as_f64()?;
        // Deepest touched support/resistance wins.
        let level = self
            .touched
            .iter()
            .filter_map(|&i| self.levels.get(i))
            .filter(|l| matches!(l.kind, LevelKind::Support | LevelKind::Resistance))
            .max_by_key(|l| l.strength)?;

        let direction = match level.kind {
            LevelKind::Support => SignalDirection::Long,
            _ => SignalDirection::Short,
        };
        let strength = (0.5 + 0.15 * f64::from(level.strength.saturating_sub(1))).min(0.95);
        Some(
            Signal::clamped(
                direction,
                strength,
                format!("touch of {} {:.4} (close {close:.4})", level.label, level.price),
                self.name.clone(),
                result.timestamp(),
            )
            .with_meta("level", level.label.clone())
            .with_meta("level_price", level.price),
        )
    }

    fn reset(&mut self) {
        self.bucket = None;
        self.levels.clear();
        self.touched.clear();
        self.count = 0;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_support::at;
    use chrono::TimeZone;

    fn bar() -> PeriodBar {
        PeriodBar {
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
        }
    }

    fn price(levels: &[PivotLevel], label: &str) -> f64 {
        levels.iter().find(|l| l.label == label).map(|l| l.price).unwrap()
    }

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
    }

    // ---- formulas ----

    #[test]
    fn standard_levels() {
        let levels = compute_levels(PivotMethod::Standard, &bar(), true);
        assert_eq!(levels.len(), 7);
        assert!((price(&levels, "PP") - 101.666_666_7).abs() < 1e-6);
        assert!((price(&levels, "R1") - 113.333_333_3).abs() < 1e-6);
        assert!((price(&levels, "S1") - 93.333_333_3).abs() < 1e-6);
        assert!((price(&levels, "R2") - 121.666_666_7).abs() < 1e-6);
        assert!((price(&levels, "S2") - 81.666_666_7).abs() < 1e-6);
        assert!((price(&levels, "R3") - 133.333_333_3).abs() < 1e-6);
        assert!((price(&levels, "S3") - 73.333_333_3).abs() < 1e-6);

        assert_eq!(compute_levels(PivotMethod::Standard, &bar(), false).len(), 5);
    }

    #[test]
    fn fibonacci_levels() {
        let levels = compute_levels(PivotMethod::Fibonacci, &bar(), false);
        let pp = price(&levels, "PP");
        assert!((price(&levels, "R1") - (pp + 7.64)).abs() < 1e-9);
        assert!((price(&levels, "S2") - (pp - 12.36)).abs() < 1e-9);
        assert!((price(&levels, "R3") - (pp + 20.0)).abs() < 1e-9);
    }

    #[test]
    fn camarilla_levels() {
        let levels = compute_levels(PivotMethod::Camarilla, &bar(), false);
        assert_eq!(price(&levels, "PP"), 105.0);
        assert!((price(&levels, "R1") - 106.833_333_3).abs() < 1e-6);
        assert!((price(&levels, "R4") - 116.0).abs() < 1e-9);
        assert!((price(&levels, "S4") - 94.0).abs() < 1e-9);
    }

    #[test]
    fn demark_levels_follow_candle_colour() {
        let levels = compute_levels(PivotMethod::DeMark, &bar(), false);
        assert_eq!(levels.len(), 3);
        assert!((price(&levels, "PP") - 103.75).abs() < 1e-9);
        assert!((price(&levels, "R1") - 117.5).abs() < 1e-9);
        assert!((price(&levels, "S1") - 97.5).abs() < 1e-9);

        let bearish = PeriodBar { close: 95.0, ..bar() };
        let levels = compute_levels(PivotMethod::DeMark, &bearish, false);
        // x = 110 + 180 + 95
        assert!((price(&levels, "PP") - 96.25).abs() < 1e-9);
    }

    #[test]
    fn zero_range_yields_pivot_only() {
        let flat = PeriodBar {
            open: 50.0,
            high: 50.0,
            low: 50.0,
            close: 50.0,
        };
        for method in [PivotMethod::Standard, PivotMethod::Fibonacci, PivotMethod::Camarilla, PivotMethod::DeMark] {
            let levels = compute_levels(method, &flat, true);
            assert_eq!(levels.len(), 1, "{method}");
            assert_eq!(levels[0].price, 50.0);
        }
    }

    // ---- bucketing ----

    #[test]
    fn bucket_keys() {
        // 2024-01-01 is a Monday.
        let monday = day(1, 12);
        let sunday = day(7, 23);
        let next_monday = day(8, 0);
        assert_eq!(PivotPeriod::Weekly.bucket_key(monday), PivotPeriod::Weekly.bucket_key(sunday));
        assert_ne!(PivotPeriod::Weekly.bucket_key(sunday), PivotPeriod::Weekly.bucket_key(next_monday));
        assert_ne!(PivotPeriod::Daily.bucket_key(monday), PivotPeriod::Daily.bucket_key(day(2, 0)));

        let jan = Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_ne!(PivotPeriod::Monthly.bucket_key(jan), PivotPeriod::Monthly.bucket_key(feb));
        assert_eq!(PivotPeriod::Monthly.bucket_key(day(1, 0)), PivotPeriod::Monthly.bucket_key(jan));
    }

    // ---- detector ----

    #[test]
    fn levels_appear_at_period_boundary_and_signal_on_touch() {
        let mut det = PivotPointsDetector::new(PivotPointsConfig::default()).unwrap();

        assert!(det.update(&at(day(1, 0), 100.0, 104.0, 95.0, 102.0)).is_none());
        assert!(det.update(&at(day(1, 8), 102.0, 110.0, 98.0, 108.0)).is_none());
        assert!(det.update(&at(day(1, 16), 108.0, 109.0, 90.0, 105.0)).is_none());
        assert!(!det.is_ready());

        // Day two opens right on S1 = 93.33.
        let (result, signal) = det.update(&at(day(2, 0), 93.4, 94.0, 93.0, 93.4)).unwrap();
        assert!((result.meta("pivot").unwrap().as_f64().unwrap() - 101.666_666_7).abs() < 1e-6);
        let signal = signal.expect("S1 touch");
        assert_eq!(signal.direction(), SignalDirection::Long);
        assert!((signal.strength() - 0.5).abs() < 1e-12);
        assert_eq!(det.level("S1").unwrap().touches, 1);

        // Levels hold for the rest of the day.
        det.update(&at(day(2, 6), 95.0, 120.0, 94.0, 113.3));
        assert_eq!(det.level("R1").unwrap().touches, 1);
        assert!((det.level("PP").unwrap().price - 101.666_666_7).abs() < 1e-6);
    }

    #[test]
    fn deeper_levels_signal_stronger() {
        let mut det = PivotPointsDetector::new(PivotPointsConfig::default()).unwrap();
        det.update(&at(day(1, 0), 100.0, 110.0, 90.0, 105.0));
        // R2 = 121.67
        let (_, signal) = det.update(&at(day(2, 0), 121.6, 122.0, 121.0, 121.6)).unwrap();
        let signal = signal.expect("R2 touch");
        assert_eq!(signal.direction(), SignalDirection::Short);
        assert!((signal.strength() - 0.65).abs() < 1e-12);
    }

    #[test]
    fn pivot_touch_is_silent() {
        let mut det = PivotPointsDetector::new(PivotPointsConfig::default()).unwrap();
        det.update(&at(day(1, 0), 100.0, 110.0, 90.0, 105.0));
        let (_, signal) = det.update(&at(day(2, 0), 101.7, 102.0, 101.0, 101.7)).unwrap();
        assert!(signal.is_none());
        assert_eq!(det.level("PP").unwrap().touches, 1);
    }

    #[test]
    fn reset_clears_levels() {
        let mut det = PivotPointsDetector::new(PivotPointsConfig::default()).unwrap();
        det.update(&at(day(1, 0), 100.0, 110.0, 90.0, 105.0));
        det.update(&at(day(2, 0), 100.0, 101.0, 99.0, 100.0));
        assert!(det.is_ready());
        det.reset();
        assert!(!det.is_ready());
        assert_eq!(det.data_count(), 0);
    }
}
