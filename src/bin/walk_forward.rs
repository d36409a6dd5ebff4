//! Walk-forward windows with block-bootstrap Monte-Carlo, optionally
//! followed by a parameter perturbation over the full history.
//!
//! Usage: cargo run --bin walk_forward -- data/SPX.csv [windows] [train_fraction] [--perturb]

use std::path::PathBuf;

use analogfx::batch::BatchRunner;
use analogfx::config::{HarnessConfig, SimulationConfig};
use analogfx::signals::{AnalogSignalSource, SignalParams};
use analogfx::store::{load_csv_store, CachedPriceStore};
use analogfx::validation::perturbation::{run_perturbation, PerturbConfig};
use analogfx::validation::walk_forward::{run_walk_forward, WalkForwardConfig};
use analogfx::validation::Dataset;
use anyhow::{Context, Result};
use serde_json::json;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let path = args.get(1).map(PathBuf::from).context("usage: walk_forward <csv> [windows] [train_fraction] [--perturb]")?;
    let d = WalkForwardConfig::default();
    let wf = WalkForwardConfig {
        num_windows: args.get(2).and_then(|s| s.parse().ok()).unwrap_or(d.num_windows),
        train_fraction: args.get(3).and_then(|s| s.parse().ok()).unwrap_or(d.train_fraction),
        ..d
    };
    let perturb = args.iter().any(|a| a == "--perturb");

    let timeframe = std::env::var("TIMEFRAME").unwrap_or_else(|_| "1d".to_string());
    let (symbols, inner) = load_csv_store(&[path], &timeframe)?;
    let store = CachedPriceStore::new(inner);
    let symbol = &symbols[0];
    let bars = store.shared(symbol, 0, u64::MAX, &timeframe)?;

    let cfg = SimulationConfig::from_env();
    let harness = HarnessConfig::from_env();
    let runner = BatchRunner::from_harness(&harness)?;
    let params = SignalParams::default();
    let source = AnalogSignalSource::with_history(symbol, bars.clone());
    let data = Dataset::new(symbol, &bars, &source);

    let report = run_walk_forward(&runner, &data, &cfg, &params, &wf, &harness)?;
    let perturbation = match (perturb, data.span()) {
        (true, Some(span)) => Some(run_perturbation(&runner, &data, &cfg, &params, span, &PerturbConfig::default())),
        _ => None,
    };

    println!("{}", serde_json::to_string_pretty(&json!({ "walk_forward": report, "perturbation": perturbation }))?);
    Ok(())
}
