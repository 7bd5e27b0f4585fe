// =============================================================================
// Aurora TA: candle replay
// =============================================================================
//
// Feeds a JSON array of candles through every enabled indicator and writes
// each signal to stdout as one JSON line.
//
//   aurora-ta <candles.json>      replay a file
//   aurora-ta                     replay candles read from stdin
//   aurora-ta --print-config      dump the effective configuration
//
// The config path comes from `AURORA_TA_CONFIG` (default `aurora_ta.json`);
// a missing or unreadable file falls back to defaults.
// =============================================================================

use std::io::{Read, Write};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use aurora_ta::{MarketData, RuntimeConfig};

const DEFAULT_CONFIG_PATH: &str = "aurora_ta.json";

fn read_candles(source: Option<&str>) -> Result<Vec<MarketData>> {
    let content = match source {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read candles from {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read candles from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("failed to parse candle array")
}

fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path =
        std::env::var("AURORA_TA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, path = %config_path, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("--print-config") {
        let json = serde_json::to_string_pretty(&config).context("failed to serialise config")?;
        println!("{json}");
        return Ok(());
    }

    // ── 2. Build indicators ──────────────────────────────────────────────
    let mut indicators = config.build_indicators()?;
    info!(
        indicators = ?indicators.iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
        clock = %config.clock,
        "Indicators ready"
    );

    // ── 3. Replay ────────────────────────────────────────────────────────
    let candles = read_candles(arg.as_deref())?;
    info!(candles = candles.len(), "Replaying candles");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut signals = 0usize;

    for candle in &candles {
        for indicator in indicators.iter_mut() {
            let Some((result, signal)) = indicator.update(candle) else {
                continue;
            };
            debug!(
                indicator = indicator.name(),
                ts = %result.timestamp(),
                value = ?result.value().as_scalar(),
                "result"
            );
            if let Some(signal) = signal {
                info!(
                    indicator = signal.indicator(),
                    direction = %signal.direction(),
                    strength = signal.strength(),
                    "{}",
                    signal.message()
                );
                let line = serde_json::to_string(&signal).context("failed to serialise signal")?;
                writeln!(out, "{line}").context("failed to write signal")?;
                signals += 1;
            }
        }
    }

    // ── 4. Summary ───────────────────────────────────────────────────────
    for indicator in &indicators {
        info!(
            indicator = indicator.name(),
            candles = indicator.data_count(),
            ready = indicator.is_ready(),
            "Indicator summary"
        );
    }
    info!(signals, "Replay complete");
    Ok(())
}
