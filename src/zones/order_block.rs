// =============================================================================
// Order Block Detector
// =============================================================================
//
// An order block is the last opposite-coloured candle before an impulsive
// move.  Bullish block: a bearish candle followed by 1..=N bars whose highest
// high clears its high.  Bearish blocks mirror this on lows.
//
// Validation of the source candle:
//   body   = |close - open| / open               >= min_body_size
//   wick   = (range - body_abs) / range          <= max_wick_ratio
//   impulse (bullish) = (max high after - high) / high >= min_impulse_strength
//   volume = volume / mean(volume of the preceding volume_lookback candles)
//            >= volume_multiplier              (only if confirmation is on)
//
// Score = weighted mean of
//   min(body / (5 * min_body_size), 1)
//   1 - wick
//   min(volume / (2 * volume_multiplier), 1)
//   min(impulse / (5 * min_impulse_strength), 1)
//
// Lifecycle, evaluated on every close before new blocks are scanned:
//
//   Active ──retest──> Tested ──retest──> Tested
//     │                  │
//     ├──> Broken <──────┤      close beyond the block by break_confirmation * size
//     └──> Expired <─────┘      more than max_age_bars since the source candle
//
// Broken and Expired are terminal.  Terminal blocks leave the live list;
// overlapping live blocks of the same type are merged and the list is capped
// at `max_blocks_display`.
// =============================================================================

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{check_positive, IndicatorError, Result};
use crate::indicators::Indicator;
use crate::market_data::{MarketData, RingBuffer};
use crate::types::{IndicatorResult, IndicatorValue, Signal, SignalDirection};

// ---------------------------------------------------------------------------
// Block classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Bullish,
    Bearish,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Active,
    Tested,
    Broken,
    Expired,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Broken | Self::Expired)
    }

    /// Allowed moves: Active -> {Tested, Broken, Expired},
    /// Tested -> {Tested, Broken, Expired}.  Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: BlockStatus) -> bool {
        match self {
            Self::Active => next != Self::Active,
            Self::Tested => next != Self::Active,
            Self::Broken | Self::Expired => false,
        }
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Tested => write!(f, "tested"),
            Self::Broken => write!(f, "broken"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthTier {
    Weak,
    Medium,
    Strong,
    VeryStrong,
}

impl StrengthTier {
    /// Tier for `score` given ascending `[medium, strong, very_strong]`
    /// thresholds.
    pub fn from_score(score: f64, thresholds: [f64; 3]) -> Self {
        if score >= thresholds[2] {
            Self::VeryStrong
        } else if score >= thresholds[1] {
            Self::Strong
        } else if score >= thresholds[0] {
            Self::Medium
        } else {
            Self::Weak
        }
    }

    /// Risk label attached to signals from a block of this tier.
    pub fn risk_level(&self) -> &'static str {
        match self {
            Self::VeryStrong => "low",
            Self::Strong => "medium",
            Self::Medium => "high",
            Self::Weak => "very_high",
        }
    }
}

impl std::fmt::Display for StrengthTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weak => write!(f, "weak"),
            Self::Medium => write!(f, "medium"),
            Self::Strong => write!(f, "strong"),
            Self::VeryStrong => write!(f, "very_strong"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_weight_body() -> f64 {
    0.3
}

fn default_weight_wick() -> f64 {
    0.1
}

fn default_weight_volume() -> f64 {
    0.3
}

fn default_weight_impulse() -> f64 {
    0.3
}

/// Weights of the four score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_body")]
    pub body: f64,
    #[serde(default = "default_weight_wick")]
    pub wick: f64,
    #[serde(default = "default_weight_volume")]
    pub volume: f64,
    #[serde(default = "default_weight_impulse")]
    pub impulse: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            body: default_weight_body(),
            wick: default_weight_wick(),
            volume: default_weight_volume(),
            impulse: default_weight_impulse(),
        }
    }
}

impl ScoreWeights {
    fn total(&self) -> f64 {
        self.body + self.wick + self.volume + self.impulse
    }
}

fn default_lookback() -> usize {
    200
}

fn default_min_body_size() -> f64 {
    0.002
}

fn default_max_wick_ratio() -> f64 {
    0.6
}

fn default_min_impulse_bars() -> usize {
    1
}

fn default_max_impulse_bars() -> usize {
    5
}

fn default_min_impulse_strength() -> f64 {
    0.005
}

fn default_volume_multiplier() -> f64 {
    1.5
}

fn default_volume_lookback() -> usize {
    20
}

fn default_max_age_bars() -> u64 {
    100
}

fn default_break_confirmation() -> f64 {
    0.1
}

fn default_overlap_threshold() -> f64 {
    0.5
}

fn default_max_blocks_display() -> usize {
    10
}

fn default_signal_proximity() -> f64 {
    0.005
}

fn default_tier_thresholds() -> [f64; 3] {
    [0.3, 0.5, 0.7]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlockConfig {
    /// Candles retained for scanning and volume averages.
    #[serde(default = "default_lookback")]
    pub lookback: usize,

    /// Minimum body as a fraction of the open.
    #[serde(default = "default_min_body_size")]
    pub min_body_size: f64,

    /// Maximum share of the candle range taken by wicks.
    #[serde(default = "default_max_wick_ratio")]
    pub max_wick_ratio: f64,

    #[serde(default = "default_min_impulse_bars")]
    pub min_impulse_bars: usize,

    #[serde(default = "default_max_impulse_bars")]
    pub max_impulse_bars: usize,

    /// Minimum relative break of the source candle's high (low).
    #[serde(default = "default_min_impulse_strength")]
    pub min_impulse_strength: f64,

    #[serde(default)]
    pub require_volume_confirmation: bool,

    #[serde(default = "default_volume_multiplier")]
    pub volume_multiplier: f64,

    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,

    /// Bars after the source candle before a block expires.
    #[serde(default = "default_max_age_bars")]
    pub max_age_bars: u64,

    /// Fraction of the block size a close must clear to break it.
    #[serde(default = "default_break_confirmation")]
    pub break_confirmation: f64,

    /// Intersection over the smaller block above which blocks merge.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,

    #[serde(default = "default_max_blocks_display")]
    pub max_blocks_display: usize,

    /// Relative distance from a block within which signals fire.
    #[serde(default = "default_signal_proximity")]
    pub signal_proximity: f64,

    #[serde(default)]
    pub weights: ScoreWeights,

    /// Ascending score thresholds for Medium, Strong and VeryStrong.
    #[serde(default = "default_tier_thresholds")]
    pub tier_thresholds: [f64; 3],
}

impl Default for OrderBlockConfig {
    fn default() -> Self {
        Self {
            lookback: default_lookback(),
            min_body_size: default_min_body_size(),
            max_wick_ratio: default_max_wick_ratio(),
            min_impulse_bars: default_min_impulse_bars(),
            max_impulse_bars: default_max_impulse_bars(),
            min_impulse_strength: default_min_impulse_strength(),
            require_volume_confirmation: false,
            volume_multiplier: default_volume_multiplier(),
            volume_lookback: default_volume_lookback(),
            max_age_bars: default_max_age_bars(),
            break_confirmation: default_break_confirmation(),
            overlap_threshold: default_overlap_threshold(),
            max_blocks_display: default_max_blocks_display(),
            signal_proximity: default_signal_proximity(),
            weights: ScoreWeights::default(),
            tier_thresholds: default_tier_thresholds(),
        }
    }
}

impl OrderBlockConfig {
    pub fn validate(&self) -> Result<()> {
        const NAME: &str = "order_blocks";
        check_positive(NAME, "min_body_size", self.min_body_size)?;
        check_positive(NAME, "max_wick_ratio", self.max_wick_ratio)?;
        if self.max_wick_ratio > 1.0 {
            return Err(IndicatorError::config(NAME, "max_wick_ratio must be <= 1"));
        }
        if self.min_impulse_bars == 0 || self.min_impulse_bars > self.max_impulse_bars {
            return Err(IndicatorError::config(
                NAME,
                format!(
                    "impulse bars must satisfy 1 <= min ({}) <= max ({})",
                    self.min_impulse_bars, self.max_impulse_bars
                ),
            ));
        }
        if self.lookback < self.max_impulse_bars + 1 {
            return Err(IndicatorError::config(NAME, "lookback must exceed max_impulse_bars"));
        }
        check_positive(NAME, "min_impulse_strength", self.min_impulse_strength)?;
        check_positive(NAME, "volume_multiplier", self.volume_multiplier)?;
        if self.volume_lookback == 0 {
            return Err(IndicatorError::config(NAME, "volume_lookback must be >= 1"));
        }
        if self.max_age_bars == 0 {
            return Err(IndicatorError::config(NAME, "max_age_bars must be >= 1"));
        }
        if !self.break_confirmation.is_finite() || self.break_confirmation < 0.0 {
            return Err(IndicatorError::config(NAME, "break_confirmation must be >= 0"));
        }
        check_positive(NAME, "overlap_threshold", self.overlap_threshold)?;
        if self.overlap_threshold > 1.0 {
            return Err(IndicatorError::config(NAME, "overlap_threshold must be <= 1"));
        }
        if self.max_blocks_display == 0 {
            return Err(IndicatorError::config(NAME, "max_blocks_display must be >= 1"));
        }
        check_positive(NAME, "signal_proximity", self.signal_proximity)?;

        let w = &self.weights;
        if [w.body, w.wick, w.volume, w.impulse].iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(IndicatorError::config(NAME, "score weights must be >= 0"));
        }
        check_positive(NAME, "sum of score weights", w.total())?;

        let [medium, strong, very_strong] = self.tier_thresholds;
        if !(0.0 < medium && medium < strong && strong < very_strong && very_strong <= 1.0) {
            return Err(IndicatorError::config(
                NAME,
                format!("tier thresholds {:?} must ascend within (0, 1]", self.tier_thresholds),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OrderBlock
// ---------------------------------------------------------------------------

/// Raw measurements of the source candle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockMetrics {
    pub body_ratio: f64,
    pub wick_ratio: f64,
    pub volume_ratio: f64,
    pub impulse_strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    pub id: Uuid,
    pub block_type: BlockType,
    pub top: f64,
    pub bottom: f64,
    /// Timestamp of the source candle.
    pub formed_at: DateTime<Utc>,
    /// Stream position of the source candle.
    pub formation_index: u64,
    pub metrics: BlockMetrics,
    pub score: f64,
    pub tier: StrengthTier,
    pub retests: u32,
    /// Timestamp of the latest close inside the block.
    pub last_retest: Option<DateTime<Utc>>,
    /// Timestamp of the close that broke the block.
    pub broken_at: Option<DateTime<Utc>>,
    status: BlockStatus,
}

impl OrderBlock {
    pub fn new(
        block_type: BlockType,
        bottom: f64,
        top: f64,
        formed_at: DateTime<Utc>,
        formation_index: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            block_type,
            top,
            bottom,
            formed_at,
            formation_index,
            metrics: BlockMetrics::default(),
            score: 0.0,
            tier: StrengthTier::Weak,
            retests: 0,
            last_retest: None,
            broken_at: None,
            status: BlockStatus::Active,
        }
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    /// Active or Tested.
    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn size(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.bottom && price <= self.top
    }

    /// Distance from `price` to the nearest edge relative to `price`; zero
    /// inside the block.
    pub fn relative_distance(&self, price: f64) -> f64 {
        if self.contains(price) {
            return 0.0;
        }
        if price == 0.0 {
            return f64::INFINITY;
        }
        let edge = if price > self.top { self.top } else { self.bottom };
        (price - edge).abs() / price.abs()
    }

    /// Intersection divided by the smaller block's size.
    pub fn overlap_ratio(&self, other: &OrderBlock) -> f64 {
        let intersection = self.top.min(other.top) - self.bottom.max(other.bottom);
        if intersection <= 0.0 {
            return 0.0;
        }
        let smaller = self.size().min(other.size());
        if smaller <= 0.0 {
            // A zero-height block inside another one.
            return 1.0;
        }
        intersection / smaller
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: BlockStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    fn register_retest(&mut self, at: DateTime<Utc>) -> bool {
        if self.transition(BlockStatus::Tested) {
            self.retests += 1;
            self.last_retest = Some(at);
            return true;
        }
        false
    }

    fn register_break(&mut self, at: DateTime<Utc>) -> bool {
        if self.transition(BlockStatus::Broken) {
            self.broken_at = Some(at);
            return true;
        }
        false
    }

    fn is_broken_by(&self, close: f64, break_confirmation: f64) -> bool {
        let margin = self.size() * break_confirmation;
        match self.block_type {
            BlockType::Bullish => close < self.bottom - margin,
            BlockType::Bearish => close > self.top + margin,
        }
    }

    /// Fold `other` into `self`: union range, best score, summed retests.
    fn absorb(&mut self, other: OrderBlock) {
        if other.score > self.score {
            self.id = other.id;
            self.metrics = other.metrics;
            self.score = other.score;
            self.tier = other.tier;
        }
        self.top = self.top.max(other.top);
        self.bottom = self.bottom.min(other.bottom);
        self.retests += other.retests;
        self.last_retest = self.last_retest.max(other.last_retest);
        if other.formation_index > self.formation_index {
            self.formation_index = other.formation_index;
            self.formed_at = other.formed_at;
        }
        if other.status == BlockStatus::Tested {
            self.status = BlockStatus::Tested;
        }
    }
}

/// Merge live blocks of the same type whose overlap ratio exceeds
/// `threshold`.  Repeats until no pair qualifies, so chains collapse fully.
pub fn merge_overlapping(mut blocks: Vec<OrderBlock>, threshold: f64) -> Vec<OrderBlock> {
    loop {
        let before = blocks.len();
        let mut merged: Vec<OrderBlock> = Vec::with_capacity(before);
        for block in blocks {
            let target = merged.iter_mut().find(|m| {
                m.is_live()
                    && block.is_live()
                    && m.block_type == block.block_type
                    && m.overlap_ratio(&block) > threshold
            });
            match target {
                Some(existing) => {
                    debug!(kind = %block.block_type, top = block.top, bottom = block.bottom, "merging order blocks");
                    existing.absorb(block);
                }
                None => merged.push(block),
            }
        }
        blocks = merged;
        if blocks.len() == before {
            return blocks;
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate evaluation
// ---------------------------------------------------------------------------

/// Try to form a block from `candles[i]`, given the bars after it.
fn evaluate_candidate(config: &OrderBlockConfig, candles: &[(u64, MarketData)], i: usize) -> Option<OrderBlock> {
    let (seq, candle) = candles.get(i)?;
    let following = candles.get(i + 1..)?;
    if following.is_empty() {
        return None;
    }

    let block_type = if candle.is_bearish() {
        BlockType::Bullish
    } else if candle.is_bullish() {
        BlockType::Bearish
    } else {
        return None;
    };

    if candle.open() == 0.0 || candle.range() <= 0.0 {
        return None;
    }
    let body_ratio = candle.body() / candle.open().abs();
    if body_ratio < config.min_body_size {
        return None;
    }
    let wick_ratio = (candle.range() - candle.body()) / candle.range();
    if wick_ratio > config.max_wick_ratio {
        return None;
    }

    let impulse_strength = match block_type {
        BlockType::Bullish => {
            let highest = following.iter().map(|(_, c)| c.high()).fold(f64::NEG_INFINITY, f64::max);
            if candle.high() == 0.0 {
                return None;
            }
            (highest - candle.high()) / candle.high().abs()
        }
        BlockType::Bearish => {
            let lowest = following.iter().map(|(_, c)| c.low()).fold(f64::INFINITY, f64::min);
            if candle.low() == 0.0 {
                return None;
            }
            (candle.low() - lowest) / candle.low().abs()
        }
    };
    if impulse_strength < config.min_impulse_strength {
        return None;
    }

    let preceding = &candles[i.saturating_sub(config.volume_lookback)..i];
    let mean_volume = if preceding.is_empty() {
        0.0
    } else {
        preceding.iter().map(|(_, c)| c.volume()).sum::<f64>() / preceding.len() as f64
    };
    let volume_ratio = if mean_volume > 0.0 {
        candle.volume() / mean_volume
    } else {
        1.0
    };
    if config.require_volume_confirmation && volume_ratio < config.volume_multiplier {
        trace!(volume_ratio, "order block rejected: volume");
        return None;
    }

    let w = &config.weights;
    let normalized = [
        (w.body, (body_ratio / (config.min_body_size * 5.0)).min(1.0)),
        (w.wick, 1.0 - wick_ratio),
        (w.volume, (volume_ratio / (config.volume_multiplier * 2.0)).min(1.0)),
        (w.impulse, (impulse_strength / (config.min_impulse_strength * 5.0)).min(1.0)),
    ];
    let score = normalized.iter().map(|(weight, v)| weight * v).sum::<f64>() / w.total();

    let mut block = OrderBlock::new(block_type, candle.low(), candle.high(), candle.timestamp(), *seq);
    block.metrics = BlockMetrics {
        body_ratio,
        wick_ratio,
        volume_ratio,
        impulse_strength,
    };
    block.score = score.clamp(0.0, 1.0);
    block.tier = StrengthTier::from_score(block.score, config.tier_thresholds);
    Some(block)
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrderBlockDetector {
    name: String,
    config: OrderBlockConfig,
    /// Candles tagged with their stream position.
    history: RingBuffer<(u64, MarketData)>,
    next_seq: u64,
    /// Stream positions that already produced a block.
    formed: HashSet<u64>,
    blocks: Vec<OrderBlock>,
    /// Most recent terminal blocks, newest last.
    retired: RingBuffer<OrderBlock>,
    count: usize,
}

impl OrderBlockDetector {
    pub fn new(config: OrderBlockConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: "OrderBlocks".to_string(),
            history: RingBuffer::new(config.lookback),
            next_seq: 0,
            formed: HashSet::new(),
            blocks: Vec::new(),
            retired: RingBuffer::new(config.max_blocks_display),
            count: 0,
            config,
        })
    }

    /// Live (Active or Tested) blocks, strongest first.
    pub fn blocks(&self) -> &[OrderBlock] {
        &self.blocks
    }

    pub fn retired(&self) -> impl Iterator<Item = &OrderBlock> {
        self.retired.iter()
    }

    /// Closest live block within `signal_proximity` of `price`; ties go to
    /// the higher score.
    pub fn nearest_block(&self, price: f64) -> Option<&OrderBlock> {
        self.blocks
            .iter()
            .filter(|b| b.is_live())
            .map(|b| (b.relative_distance(price), b))
            .filter(|(d, _)| *d <= self.config.signal_proximity)
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(b.score.total_cmp(&a.score)))
            .map(|(_, b)| b)
    }

    fn update_lifecycle(&mut self, candle: &MarketData, seq: u64) {
        let close = candle.close();
        let now = candle.timestamp();
        for block in self.blocks.iter_mut() {
            let age = seq.saturating_sub(block.formation_index);
            if age > self.config.max_age_bars {
                block.transition(BlockStatus::Expired);
            } else if block.is_broken_by(close, self.config.break_confirmation) {
                block.register_break(now);
            } else if block.contains(close) {
                block.register_retest(now);
            } else {
                continue;
            }
            debug!(
                kind = %block.block_type,
                status = %block.status,
                top = block.top,
                bottom = block.bottom,
                close,
                "order block state changed"
            );
        }
    }

    fn scan_for_blocks(&mut self) {
        let min = self.config.min_impulse_bars;
        let max = self.config.max_impulse_bars;
        let candles = self.history.as_slice();
        let n = candles.len();

        // Only candles with min..=max bars after them are candidates.
        let first = n.saturating_sub(max + 1);
        let last = match n.checked_sub(min + 1) {
            Some(last) => last,
            None => return,
        };
        for i in first..=last {
            let seq = candles[i].0;
            if self.formed.contains(&seq) {
                continue;
            }
            if let Some(block) = evaluate_candidate(&self.config, candles, i) {
                debug!(
                    kind = %block.block_type,
                    top = block.top,
                    bottom = block.bottom,
                    score = block.score,
                    tier = %block.tier,
                    "order block formed"
                );
                self.formed.insert(seq);
                self.blocks.push(block);
            }
        }
    }

    /// Retire terminal blocks, merge overlaps and cap the live list.
    pub fn cleanup(&mut self) {
        let (live, terminal): (Vec<OrderBlock>, Vec<OrderBlock>) =
            std::mem::take(&mut self.blocks).into_iter().partition(OrderBlock::is_live);
        for block in terminal {
            self.retired.push(block);
        }

        let mut live = merge_overlapping(live, self.config.overlap_threshold);
        live.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(b.formation_index.cmp(&a.formation_index))
        });
        live.truncate(self.config.max_blocks_display);
        self.blocks = live;

        // Positions that left the window can never be scanned again.
        if let Some((oldest, _)) = self.history.first() {
            let oldest = *oldest;
            self.formed.retain(|seq| *seq >= oldest);
        }
    }
}

impl Indicator for OrderBlockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    /// Source candle plus the minimum impulse.
    fn required_periods(&self) -> usize {
        self.config.min_impulse_bars + 1
    }

    fn is_ready(&self) -> bool {
        self.history.len() >= self.required_periods()
    }

    fn current_value(&self) -> Option<IndicatorValue> {
        self.is_ready().then(|| IndicatorValue::OrderBlocks(self.blocks.clone()))
    }

    fn data_count(&self) -> usize {
        self.count
    }

    fn add_data(&mut self, candle: &MarketData) -> Option<IndicatorResult> {
        self.count += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        self.update_lifecycle(candle, seq);
        self.history.push((seq, candle.clone()));
        if !self.is_ready() {
            self.cleanup();
            return None;
        }
        self.scan_for_blocks();
        self.cleanup();

        let bullish = self.blocks.iter().filter(|b| b.block_type == BlockType::Bullish).count();
        Some(
            IndicatorResult::new(
                self.name.clone(),
                candle.timestamp(),
                IndicatorValue::OrderBlocks(self.blocks.clone()),
            )
            .with_meta("close", candle.close())
            .with_meta("bullish_blocks", bullish)
            .with_meta("bearish_blocks", self.blocks.len() - bullish),
        )
    }

    fn generate_signal(&self, result: &IndicatorResult) -> Option<Signal> {
        let close = result.meta("close")?.as_f64()?;
        let block = self.nearest_block(close)?;
        let direction = match block.block_type {
            BlockType::Bullish => SignalDirection::Long,
            BlockType::Bearish => SignalDirection::Short,
        };
        Some(
            Signal::clamped(
                direction,
                block.score,
                format!(
                    "{} order block {:.4}-{:.4} ({}, close {close:.4})",
                    block.block_type, block.bottom, block.top, block.status
                ),
                self.name.clone(),
                result.timestamp(),
            )
            .with_meta("block_id", block.id.to_string())
            .with_meta("block_top", block.top)
            .with_meta("block_bottom", block.bottom)
            .with_meta("tier", block.tier.to_string())
            .with_meta("risk_level", block.tier.risk_level())
            .with_meta("retests", block.retests),
        )
    }

    fn reset(&mut self) {
        self.history.clear();
        self.next_seq = 0;
        self.formed.clear();
        self.blocks.clear();
        self.retired.clear();
        self.count = 0;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_support::{base_time, ohlcv};

    fn baseline(i: i64) -> MarketData {
        ohlcv(i, 100.0, 100.2, 99.8, 100.05, 100.0)
    }

    fn detector(config: OrderBlockConfig) -> OrderBlockDetector {
        OrderBlockDetector::new(config).unwrap()
    }

    /// Ten quiet candles, a bearish source candle, then an impulse up.
    fn feed_bullish_setup(det: &mut OrderBlockDetector) -> i64 {
        for i in 0..10 {
            det.update(&baseline(i));
        }
        det.update(&ohlcv(10, 100.0, 100.2, 98.8, 99.0, 100.0));
        det.update(&ohlcv(11, 99.0, 101.6, 98.9, 101.5, 100.0));
        12
    }

    fn bullish(det: &OrderBlockDetector) -> Option<&OrderBlock> {
        det.blocks().iter().find(|b| b.block_type == BlockType::Bullish)
    }

    // ---- state machine ----

    #[test]
    fn terminal_states_are_absorbing() {
        use BlockStatus::*;
        assert!(Active.can_transition_to(Tested));
        assert!(Active.can_transition_to(Broken));
        assert!(Tested.can_transition_to(Tested));
        assert!(Tested.can_transition_to(Expired));
        assert!(!Tested.can_transition_to(Active));
        for terminal in [Broken, Expired] {
            for next in [Active, Tested, Broken, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }

        let mut block = OrderBlock::new(BlockType::Bullish, 99.0, 100.0, base_time(), 0);
        assert!(block.transition(Broken));
        assert!(!block.transition(Tested));
        assert_eq!(block.status(), Broken);
    }

    #[test]
    fn tier_thresholds_and_risk() {
        let t = default_tier_thresholds();
        assert_eq!(StrengthTier::from_score(0.1, t), StrengthTier::Weak);
        assert_eq!(StrengthTier::from_score(0.3, t), StrengthTier::Medium);
        assert_eq!(StrengthTier::from_score(0.69, t), StrengthTier::Strong);
        assert_eq!(StrengthTier::from_score(0.9, t), StrengthTier::VeryStrong);
        assert_eq!(StrengthTier::VeryStrong.risk_level(), "low");
        assert_eq!(StrengthTier::Strong.risk_level(), "medium");
        assert_eq!(StrengthTier::Medium.risk_level(), "high");
        assert_eq!(StrengthTier::Weak.risk_level(), "very_high");
    }

    #[test]
    fn rejects_bad_config() {
        let bad = OrderBlockConfig {
            min_impulse_bars: 4,
            max_impulse_bars: 2,
            ..OrderBlockConfig::default()
        };
        assert!(OrderBlockDetector::new(bad).is_err());
        let bad = OrderBlockConfig {
            tier_thresholds: [0.5, 0.3, 0.7],
            ..OrderBlockConfig::default()
        };
        assert!(OrderBlockDetector::new(bad).is_err());
    }

    // ---- formation ----

    #[test]
    fn bearish_candle_before_impulse_forms_bullish_block() {
        let mut det = detector(OrderBlockConfig::default());
        feed_bullish_setup(&mut det);

        let block = bullish(&det).expect("bullish block");
        assert_eq!(block.status(), BlockStatus::Active);
        assert!((block.bottom - 98.8).abs() < 1e-9);
        assert!((block.top - 100.2).abs() < 1e-9);
        assert_eq!(block.formation_index, 10);
        assert!(block.score > 0.0 && block.score <= 1.0);
        assert!((block.metrics.volume_ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weak_impulse_forms_nothing() {
        let mut det = detector(OrderBlockConfig::default());
        for i in 0..10 {
            det.update(&baseline(i));
        }
        det.update(&ohlcv(10, 100.0, 100.2, 98.8, 99.0, 100.0));
        // High clears the source high by only 0.1%.
        det.update(&ohlcv(11, 99.0, 100.3, 98.9, 100.25, 100.0));
        for i in 12..18 {
            det.update(&baseline(i));
        }
        assert!(det.blocks().is_empty());
    }

    #[test]
    fn small_body_never_forms_bullish_block() {
        let mut det = detector(OrderBlockConfig::default());
        for i in 0..10 {
            det.update(&baseline(i));
        }
        det.update(&ohlcv(10, 100.0, 100.2, 99.8, 99.9, 100.0));
        det.update(&ohlcv(11, 99.9, 101.6, 99.85, 101.5, 100.0));
        det.update(&ohlcv(12, 101.5, 102.5, 101.4, 102.4, 100.0));
        assert!(bullish(&det).is_none());
    }

    #[test]
    fn volume_confirmation_gates_formation() {
        let config = OrderBlockConfig {
            require_volume_confirmation: true,
            ..OrderBlockConfig::default()
        };
        let mut quiet = detector(config.clone());
        feed_bullish_setup(&mut quiet);
        assert!(bullish(&quiet).is_none());

        let mut loud = detector(config);
        for i in 0..10 {
            loud.update(&baseline(i));
        }
        loud.update(&ohlcv(10, 100.0, 100.2, 98.8, 99.0, 300.0));
        loud.update(&ohlcv(11, 99.0, 101.6, 98.9, 101.5, 100.0));
        let block = bullish(&loud).expect("volume-confirmed block");
        assert!((block.metrics.volume_ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn a_candle_forms_at_most_one_block() {
        let mut det = detector(OrderBlockConfig::default());
        let next = feed_bullish_setup(&mut det);
        // More impulse keeps the source candle inside the scan window.
        det.update(&ohlcv(next, 101.5, 103.0, 101.4, 102.9, 100.0));
        det.update(&ohlcv(next + 1, 102.9, 104.0, 102.8, 103.9, 100.0));
        let from_source = det.blocks().iter().filter(|b| b.formation_index == 10).count();
        assert_eq!(from_source, 1);
    }

    // ---- lifecycle ----

    #[test]
    fn retest_then_break() {
        let mut det = detector(OrderBlockConfig::default());
        let next = feed_bullish_setup(&mut det);
        let id = bullish(&det).unwrap().id;

        let retest = ohlcv(next, 101.0, 101.1, 99.4, 99.5, 100.0);
        let (_, signal) = det.update(&retest).unwrap();
        let block = bullish(&det).unwrap();
        assert_eq!(block.status(), BlockStatus::Tested);
        assert_eq!(block.retests, 1);
        assert_eq!(block.last_retest, Some(retest.timestamp()));
        assert_eq!(block.broken_at, None);
        let signal = signal.expect("price inside a bullish block");
        assert_eq!(signal.direction(), SignalDirection::Long);
        assert!((signal.strength() - block.score).abs() < 1e-12);
        assert_eq!(
            signal.meta("risk_level").and_then(|v| v.as_str()),
            Some(block.tier.risk_level())
        );

        // 98.0 is below 98.8 - 0.1 * 1.4.
        let breaker = ohlcv(next + 1, 99.5, 99.6, 97.9, 98.0, 100.0);
        det.update(&breaker);
        assert!(det.blocks().iter().all(|b| b.id != id));
        let retired = det.retired().find(|b| b.id == id).expect("retired block");
        assert_eq!(retired.status(), BlockStatus::Broken);
        assert_eq!(retired.broken_at, Some(breaker.timestamp()));
        assert_eq!(retired.last_retest, Some(retest.timestamp()));
    }

    #[test]
    fn bullish_candle_before_drop_forms_bearish_block() {
        let mut det = detector(OrderBlockConfig::default());
        for i in 0..10 {
            det.update(&baseline(i));
        }
        det.update(&ohlcv(10, 100.0, 101.2, 99.8, 101.0, 100.0));
        det.update(&ohlcv(11, 101.0, 101.1, 98.4, 98.5, 100.0));

        let block = det
            .blocks()
            .iter()
            .find(|b| b.block_type == BlockType::Bearish)
            .expect("bearish block");
        let id = block.id;
        assert_eq!(block.status(), BlockStatus::Active);
        assert!((block.bottom - 99.8).abs() < 1e-9);
        assert!((block.top - 101.2).abs() < 1e-9);
        assert_eq!(block.formation_index, 10);
        assert!((block.metrics.impulse_strength - 1.4 / 99.8).abs() < 1e-9);

        // Rally back into the block.
        let retest = ohlcv(12, 98.5, 100.6, 98.4, 100.5, 100.0);
        let (_, signal) = det.update(&retest).unwrap();
        let block = det.blocks().iter().find(|b| b.id == id).expect("live block");
        assert_eq!(block.status(), BlockStatus::Tested);
        assert_eq!(block.last_retest, Some(retest.timestamp()));
        let signal = signal.expect("price inside a bearish block");
        assert_eq!(signal.direction(), SignalDirection::Short);

        // 102.0 is above 101.2 + 0.1 * 1.4.
        let breaker = ohlcv(13, 100.5, 102.1, 100.4, 102.0, 100.0);
        det.update(&breaker);
        assert!(det.blocks().iter().all(|b| b.id != id));
        let retired = det.retired().find(|b| b.id == id).expect("retired block");
        assert_eq!(retired.status(), BlockStatus::Broken);
        assert_eq!(retired.broken_at, Some(breaker.timestamp()));
    }

    #[test]
    fn blocks_expire_by_bar_count() {
        let mut det = detector(OrderBlockConfig {
            max_age_bars: 3,
            ..OrderBlockConfig::default()
        });
        let next = feed_bullish_setup(&mut det);
        assert!(bullish(&det).is_some());

        for i in 0..3 {
            det.update(&ohlcv(next + i, 101.5, 101.7, 101.3, 101.6, 100.0));
        }
        assert!(bullish(&det).is_none());
        assert!(det.retired().any(|b| b.status() == BlockStatus::Expired));
    }

    // ---- cleanup ----

    fn block(kind: BlockType, bottom: f64, top: f64, score: f64, index: u64) -> OrderBlock {
        let mut b = OrderBlock::new(kind, bottom, top, base_time(), index);
        b.score = score;
        b
    }

    #[test]
    fn overlapping_same_type_blocks_merge() {
        let a = block(BlockType::Bullish, 100.0, 102.0, 0.6, 1);
        let mut b = block(BlockType::Bullish, 101.0, 102.5, 0.8, 2);
        b.retests = 2;
        let strongest = b.id;
        let other_side = block(BlockType::Bearish, 100.5, 101.5, 0.9, 3);
        let far = block(BlockType::Bullish, 110.0, 111.0, 0.4, 4);

        let merged = merge_overlapping(vec![a, b, other_side, far], 0.5);
        assert_eq!(merged.len(), 3);
        let m = merged.iter().find(|x| x.id == strongest).expect("merged keeps strongest id");
        assert_eq!(m.bottom, 100.0);
        assert_eq!(m.top, 102.5);
        assert_eq!(m.score, 0.8);
        assert_eq!(m.retests, 2);
        assert_eq!(m.formation_index, 2);
    }

    #[test]
    fn small_overlap_does_not_merge() {
        let a = block(BlockType::Bearish, 100.0, 102.0, 0.5, 1);
        let b = block(BlockType::Bearish, 101.8, 104.0, 0.5, 2);
        assert!(a.overlap_ratio(&b) < 0.5);
        assert_eq!(merge_overlapping(vec![a, b], 0.5).len(), 2);
    }

    #[test]
    fn cleanup_caps_by_score() {
        let mut det = detector(OrderBlockConfig {
            max_blocks_display: 2,
            ..OrderBlockConfig::default()
        });
        det.blocks = vec![
            block(BlockType::Bullish, 90.0, 91.0, 0.2, 1),
            block(BlockType::Bullish, 95.0, 96.0, 0.9, 2),
            block(BlockType::Bearish, 105.0, 106.0, 0.5, 3),
        ];
        det.cleanup();
        let scores: Vec<f64> = det.blocks().iter().map(|b| b.score).collect();
        assert_eq!(scores, vec![0.9, 0.5]);
    }
}
