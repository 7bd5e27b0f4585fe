// End-to-end replay through the trait-object pipeline built from config.

use chrono::{Duration, TimeZone, Utc};

use aurora_ta::indicators::{RsiIndicator, SmaIndicator};
use aurora_ta::{Indicator, IndicatorValue, MarketData, RuntimeConfig, SignalDirection};

fn synthetic_candles(n: usize) -> Vec<MarketData> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let mut prev_close = 100.0;
    (0..n)
        .map(|i| {
            let x = i as f64;
            let close = 100.0 + 10.0 * (x / 8.0).sin() + 0.05 * x;
            let open = prev_close;
            prev_close = close;
            MarketData::new(
                start + Duration::hours(i as i64),
                open,
                open.max(close) + 0.3,
                open.min(close) - 0.3,
                close,
                100.0 + (i % 7) as f64 * 10.0,
            )
            .unwrap()
        })
        .collect()
}

#[test]
fn default_pipeline_replays_cleanly() {
    let candles = synthetic_candles(300);
    let mut indicators = RuntimeConfig::default().build_indicators().unwrap();
    assert_eq!(indicators.len(), 8);

    let mut signals = Vec::new();
    for candle in &candles {
        for indicator in indicators.iter_mut() {
            if let Some((result, signal)) = indicator.update(candle) {
                assert_eq!(result.timestamp(), candle.timestamp());
                assert_eq!(result.indicator(), indicator.name());
                signals.extend(signal);
            }
        }
    }

    for indicator in &indicators {
        assert_eq!(indicator.data_count(), candles.len());
        assert!(indicator.is_ready(), "{} never became ready", indicator.name());
        assert!(indicator.current_value().is_some());
    }
    assert!(!signals.is_empty());
    for signal in &signals {
        assert!((0.0..=1.0).contains(&signal.strength()));
        assert!(!signal.message().is_empty());
    }
    assert!(signals.iter().any(|s| s.direction() == SignalDirection::Long));
    assert!(signals.iter().any(|s| s.direction() == SignalDirection::Short));
}

#[test]
fn scalar_outputs_match_direct_computation() {
    let candles = synthetic_candles(120);
    let mut sma = SmaIndicator::with_period(20).unwrap();
    let mut rsi = RsiIndicator::with_period(14).unwrap();

    for candle in &candles {
        sma.add_data(candle);
        if let Some(result) = rsi.add_data(candle) {
            let value = result.value().as_scalar().unwrap();
            assert!((0.0..=100.0).contains(&value));
        }
    }

    let expected: f64 = candles[candles.len() - 20..].iter().map(MarketData::close).sum::<f64>() / 20.0;
    match sma.current_value() {
        Some(IndicatorValue::Scalar(v)) => assert!((v - expected).abs() < 1e-9),
        other => panic!("unexpected SMA value {other:?}"),
    }
}

#[test]
fn reset_returns_to_warm_up() {
    let candles = synthetic_candles(60);
    let mut indicators = RuntimeConfig::default().build_indicators().unwrap();
    for candle in &candles {
        for indicator in indicators.iter_mut() {
            indicator.add_data(candle);
        }
    }
    for indicator in indicators.iter_mut() {
        indicator.reset();
        assert_eq!(indicator.data_count(), 0);
        assert!(!indicator.is_ready());
        assert!(indicator.current_value().is_none());
    }
}

#[test]
fn indicators_move_across_threads() {
    let candles = synthetic_candles(50);
    let indicators = RuntimeConfig::default().build_indicators().unwrap();

    let handles: Vec<_> = indicators
        .into_iter()
        .map(|mut indicator| {
            let candles = candles.clone();
            std::thread::spawn(move || {
                for candle in &candles {
                    indicator.add_data(candle);
                }
                indicator.data_count()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 50);
    }
}

#[test]
fn candle_json_is_validated() {
    let good = r#"[{"timestamp":"2024-01-01T00:00:00Z","open":1.0,"high":2.0,"low":0.5,"close":1.5,"volume":10.0}]"#;
    let candles: Vec<MarketData> = serde_json::from_str(good).unwrap();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].close(), 1.5);

    let bad = r#"[{"timestamp":"2024-01-01T00:00:00Z","open":1.0,"high":0.9,"low":0.5,"close":1.5,"volume":10.0}]"#;
    assert!(serde_json::from_str::<Vec<MarketData>>(bad).is_err());
}
