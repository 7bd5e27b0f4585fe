// =============================================================================
// Swing point detection
// =============================================================================
//
// A candle is a swing high when its high is the maximum high within
// `radius` candles on either side; a swing low mirrors this on lows.  The
// last `radius` candles cannot be confirmed yet and are never reported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::MarketData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

/// A confirmed local extremum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    /// Index into the slice the point was found in.
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
    pub timestamp: DateTime<Utc>,
}

/// Find all swing highs and lows, ordered by index.  A candle can be both
/// (an outside bar), in which case the high is listed first.
pub fn find_swing_points(candles: &[MarketData], radius: usize) -> Vec<SwingPoint> {
    let n = candles.len();
    if radius == 0 || n < 2 * radius + 1 {
        return Vec::new();
    }

    let mut points = Vec::new();
    for i in radius..n - radius {
        let window = &candles[i - radius..=i + radius];
        let candle = &candles[i];

        let max_high = window.iter().map(MarketData::high).fold(f64::NEG_INFINITY, f64::max);
        if candle.high() >= max_high {
            points.push(SwingPoint {
                index: i,
                price: candle.high(),
                kind: SwingKind::High,
                timestamp: candle.timestamp(),
            });
        }

        let min_low = window.iter().map(MarketData::low).fold(f64::INFINITY, f64::min);
        if candle.low() <= min_low {
            points.push(SwingPoint {
                index: i,
                price: candle.low(),
                kind: SwingKind::Low,
                timestamp: candle.timestamp(),
            });
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::test_support::ohlcv;

    fn from_closes(closes: &[f64]) -> Vec<MarketData> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| ohlcv(i as i64, c, c + 0.5, c - 0.5, c, 1.0))
            .collect()
    }

    #[test]
    fn detects_peak_and_trough() {
        let candles = from_closes(&[10.0, 11.0, 12.0, 11.0, 10.0, 9.0, 8.0, 9.0, 10.0]);
        let points = find_swing_points(&candles, 2);
        assert!(points
            .iter()
            .any(|p| p.kind == SwingKind::High && p.index == 2 && (p.price - 12.5).abs() < 1e-12));
        assert!(points
            .iter()
            .any(|p| p.kind == SwingKind::Low && p.index == 6 && (p.price - 7.5).abs() < 1e-12));
    }

    #[test]
    fn unconfirmed_edges_are_ignored() {
        // Highest high sits in the last two candles: not confirmed yet.
        let candles = from_closes(&[10.0, 9.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let points = find_swing_points(&candles, 2);
        assert!(points.iter().all(|p| p.index >= 2 && p.index <= 4));
        assert!(!points.iter().any(|p| p.kind == SwingKind::High));
    }

    #[test]
    fn too_short_input_yields_nothing() {
        let candles = from_closes(&[1.0, 2.0, 3.0, 4.0]);
        assert!(find_swing_points(&candles, 2).is_empty());
        assert!(find_swing_points(&candles, 0).is_empty());
    }
}
