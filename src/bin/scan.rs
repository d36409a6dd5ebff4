//! Analog scan over one or more instruments, plus archetype clustering
//! when enough instruments are given.
//!
//! Usage: cargo run --bin scan -- data/SPX.csv [data/NDX.csv ...]
//!
//! Scan knobs come from SCAN_* env vars; clustering from CLUSTER_EPS and
//! CLUSTER_MIN_PTS.

use std::path::PathBuf;
use std::sync::Arc;

use analogfx::cluster::{ClusterConfig, ClusterEngine};
use analogfx::data::format_date;
use analogfx::features::{self, FEATURE_NAMES};
use analogfx::ids::SequentialIds;
use analogfx::logging::{self, obj, v_str, Domain, Level};
use analogfx::regime;
use analogfx::scanner::{AnalogOutlook, PatternScanner, ScanConfig};
use analogfx::store::{load_csv_store, CachedPriceStore};
use anyhow::{Context, Result};
use serde_json::json;

fn main() -> Result<()> {
    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: scan <csv> [csv ...]");
    }
    let timeframe = std::env::var("TIMEFRAME").unwrap_or_else(|_| "1d".to_string());
    let (symbols, inner) = load_csv_store(&paths, &timeframe)?;
    let store = CachedPriceStore::new(inner);
    let scanner = PatternScanner::new(ScanConfig::from_env()).context("invalid scan config")?;

    let mut per_symbol = Vec::new();
    let mut rows = Vec::new();
    for symbol in &symbols {
        let bars = store.shared(symbol, 0, u64::MAX, &timeframe)?;
        let matches = match scanner.scan_latest(&bars) {
            Ok(m) => m,
            Err(e) => {
                logging::log(
                    Level::Warn,
                    Domain::Scan,
                    "scan_skipped",
                    obj(&[("symbol", v_str(symbol)), ("reason", v_str(&e.to_string()))]),
                );
                continue;
            }
        };
        let outlook = AnalogOutlook::from_matches(&matches);
        let flags = regime::detect(&bars, &Default::default());
        match features::extract(symbol, &bars, &matches) {
            Ok(row) => rows.push(row),
            Err(e) => logging::log(
                Level::Debug,
                Domain::Cluster,
                "features_skipped",
                obj(&[("symbol", v_str(symbol)), ("reason", v_str(&e.to_string()))]),
            ),
        }
        per_symbol.push(json!({
            "symbol": symbol,
            "as_of": bars.last().map(|b| format_date(b.ts)),
            "trend": regime::classify_trend(&bars),
            "regime_flags": flags,
            "outlook": outlook,
            "matches": matches,
        }));
    }

    let cluster_cfg = ClusterConfig {
        eps: std::env::var("CLUSTER_EPS").ok().and_then(|v| v.parse().ok()).unwrap_or(ClusterConfig::default().eps),
        min_pts: std::env::var("CLUSTER_MIN_PTS").ok().and_then(|v| v.parse().ok()).unwrap_or(ClusterConfig::default().min_pts),
        ..ClusterConfig::default()
    };
    let clusters = if rows.len() >= cluster_cfg.min_pts {
        let mut engine = ClusterEngine::new(cluster_cfg, Arc::new(SequentialIds::new()))?;
        Some(engine.run(&FEATURE_NAMES, &rows)?.clone())
    } else {
        None
    };

    let out = json!({ "scans": per_symbol, "clusters": clusters });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
