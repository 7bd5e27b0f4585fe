// =============================================================================
// Shared output types produced by every indicator and detector
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IndicatorError, Result};
use crate::zones::{OrderBlock, PriceLevel};

/// Free-form key/value annotations attached to results and signals.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Trade direction suggested by a signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Long,
    Short,
    #[default]
    Neutral,
}

impl std::fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

/// Payload of an [`IndicatorResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum IndicatorValue {
    Scalar(f64),
    Levels(Vec<PriceLevel>),
    OrderBlocks(Vec<OrderBlock>),
}

impl IndicatorValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_levels(&self) -> Option<&[PriceLevel]> {
        match self {
            Self::Levels(levels) => Some(levels),
            _ => None,
        }
    }

    pub fn as_order_blocks(&self) -> Option<&[OrderBlock]> {
        match self {
            Self::OrderBlocks(blocks) => Some(blocks),
            _ => None,
        }
    }
}

/// One output of an indicator for one candle.  Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorResult {
    value: IndicatorValue,
    timestamp: DateTime<Utc>,
    indicator: String,
    metadata: Metadata,
}

impl IndicatorResult {
    pub fn new(indicator: impl Into<String>, timestamp: DateTime<Utc>, value: IndicatorValue) -> Self {
        Self {
            value,
            timestamp,
            indicator: indicator.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry while building the result.
    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn value(&self) -> &IndicatorValue {
        &self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn indicator(&self) -> &str {
        &self.indicator
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}

/// A trading signal emitted when price interacts with an indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    direction: SignalDirection,
    strength: f64,
    message: String,
    indicator: String,
    timestamp: DateTime<Utc>,
    metadata: Metadata,
}

impl Signal {
    /// Build a signal; `strength` must lie in `[0.0, 1.0]`.
    pub fn new(
        direction: SignalDirection,
        strength: f64,
        message: impl Into<String>,
        indicator: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(IndicatorError::InvalidStrength { strength });
        }
        Ok(Self {
            direction,
            strength,
            message: message.into(),
            indicator: indicator.into(),
            timestamp,
            metadata: Metadata::new(),
        })
    }

    /// Like [`Signal::new`] but clamps `strength` into range first; NaN
    /// becomes 0.
    pub(crate) fn clamped(
        direction: SignalDirection,
        strength: f64,
        message: impl Into<String>,
        indicator: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let strength = if strength.is_nan() { 0.0 } else { strength.clamp(0.0, 1.0) };
        Self {
            direction,
            strength,
            message: message.into(),
            indicator: indicator.into(),
            timestamp,
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn direction(&self) -> SignalDirection {
        self.direction
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn indicator(&self) -> &str {
        &self.indicator
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }
}
