//! Entropy-guard grid sweep across the curated splits.
//!
//! Usage: cargo run --bin guard_sweep -- data/SPX.csv [top_n]

use std::path::PathBuf;

use analogfx::batch::BatchRunner;
use analogfx::config::{HarnessConfig, SimulationConfig};
use analogfx::signals::{AnalogSignalSource, SignalParams};
use analogfx::store::{load_csv_store, CachedPriceStore};
use analogfx::validation::guard_sweep::{run_guard_sweep, GuardGrid, SweepWeights};
use analogfx::validation::{default_splits, Dataset};
use anyhow::{Context, Result};
use serde_json::json;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let path = args.get(1).map(PathBuf::from).context("usage: guard_sweep <csv> [top_n]")?;
    let top_n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);

    let timeframe = std::env::var("TIMEFRAME").unwrap_or_else(|_| "1d".to_string());
    let (symbols, inner) = load_csv_store(&[path], &timeframe)?;
    let store = CachedPriceStore::new(inner);
    let symbol = &symbols[0];
    let bars = store.shared(symbol, 0, u64::MAX, &timeframe)?;

    let cfg = SimulationConfig::from_env();
    let runner = BatchRunner::from_harness(&HarnessConfig::from_env())?;
    let source = AnalogSignalSource::with_history(symbol, bars.clone());
    let data = Dataset::new(symbol, &bars, &source);

    let report = run_guard_sweep(
        &runner,
        &data,
        &cfg,
        &SignalParams::default(),
        &default_splits(),
        &GuardGrid::default(),
        &SweepWeights::default(),
    );
    let top: Vec<_> = report.ranking.iter().take(top_n).collect();
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "evaluated": report.evaluated,
            "skipped_invalid": report.skipped_invalid.len(),
            "failed": report.failed,
            "canceled": report.canceled,
            "best": report.best,
            "top": top,
        }))?
    );
    Ok(())
}
