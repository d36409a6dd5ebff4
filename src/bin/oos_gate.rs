//! Out-of-sample gate over the curated historical splits.
//!
//! Usage: cargo run --bin oos_gate -- data/SPX.csv
//!
//! Simulation knobs come from SIM_* env vars, batch knobs from HARNESS_*.
//! Exits non-zero when the gate fails.

use std::path::PathBuf;

use analogfx::batch::BatchRunner;
use analogfx::config::{HarnessConfig, SimulationConfig};
use analogfx::signals::{AnalogSignalSource, SignalParams};
use analogfx::store::{load_csv_store, CachedPriceStore};
use analogfx::validation::oos::{run_oos_gate, OosThresholds};
use analogfx::validation::{default_splits, Dataset};
use anyhow::{Context, Result};

fn main() -> Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from).context("usage: oos_gate <csv>")?;
    let timeframe = std::env::var("TIMEFRAME").unwrap_or_else(|_| "1d".to_string());
    let (symbols, inner) = load_csv_store(&[path], &timeframe)?;
    let store = CachedPriceStore::new(inner);
    let symbol = &symbols[0];
    let bars = store.shared(symbol, 0, u64::MAX, &timeframe)?;

    let cfg = SimulationConfig::from_env();
    cfg.validate()?;
    let harness = HarnessConfig::from_env();
    let runner = BatchRunner::from_harness(&harness)?;
    let source = AnalogSignalSource::with_history(symbol, bars.clone());
    let data = Dataset::new(symbol, &bars, &source);

    let report = run_oos_gate(
        &runner,
        &data,
        &cfg,
        &SignalParams::default(),
        &default_splits(),
        &OosThresholds::default(),
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.pass {
        std::process::exit(1);
    }
    Ok(())
}
