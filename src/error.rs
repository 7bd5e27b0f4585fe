// =============================================================================
// Error types
// =============================================================================
//
// Only two things can fail in the engine: building something from bad inputs
// (a candle, a signal, an indicator configuration).  Running out of history is
// never an error; every streaming call answers `None` instead.

use thiserror::Error;

/// Typed error hierarchy for the indicator engine.
///
/// Library code returns these variants; the binary wraps them with
/// `anyhow::Context` when propagating.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndicatorError {
    // -- Market data --------------------------------------------------------
    #[error("invalid candle: {reason}")]
    InvalidCandle { reason: String },

    // -- Signals ------------------------------------------------------------
    #[error("signal strength {strength} outside [0.0, 1.0]")]
    InvalidStrength { strength: f64 },

    // -- Configuration ------------------------------------------------------
    #[error("invalid {indicator} config: {reason}")]
    InvalidConfig {
        indicator: &'static str,
        reason: String,
    },

    #[error("unknown smoothing mode: {0}")]
    UnknownSmoothing(String),
}

impl IndicatorError {
    /// Shorthand for an `InvalidConfig` error.
    pub fn config(indicator: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            indicator,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndicatorError>;

/// Reject a period outside `[min, max]`.
pub(crate) fn check_period(
    indicator: &'static str,
    period: usize,
    min: usize,
    max: usize,
) -> Result<()> {
    if period < min || period > max {
        return Err(IndicatorError::config(
            indicator,
            format!("period {period} outside [{min}, {max}]"),
        ));
    }
    Ok(())
}

/// Reject a ratio that is non-finite or not strictly positive.
pub(crate) fn check_positive(indicator: &'static str, name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(IndicatorError::config(
            indicator,
            format!("{name} must be > 0, got {value}"),
        ));
    }
    Ok(())
}
