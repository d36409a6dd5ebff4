//! Rolling walk-forward windows feeding a block-bootstrap Monte-Carlo.
//!
//! The history is cut into `num_windows` overlapping windows; each window is
//! split by time into a train part and a test part. Both parts are simulated
//! with the same frozen configuration so the train/test gap exposes
//! overfitting. The test-period step returns of all windows, concatenated in
//! window order, are what the Monte-Carlo resamples.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::monte_carlo::{run_monte_carlo, McConfig, McReport, McThresholds};
use super::{Dataset, TimeRange};
use crate::batch::{BatchRunner, UnitOutcome};
use crate::config::{HarnessConfig, SimulationConfig};
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::metrics::{mean, periods_per_year, PerformanceSummary};
use crate::signals::SignalParams;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub num_windows: usize,
    pub train_fraction: f64,
    /// Windows with fewer bars than this are dropped.
    pub min_window_bars: usize,
    pub mc: McThresholds,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self { num_windows: 6, train_fraction: 0.6, min_window_bars: 60, mc: McThresholds::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub idx: usize,
    pub train: TimeRange,
    pub test: TimeRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub spec: WindowSpec,
    pub train: PerformanceSummary,
    pub test: PerformanceSummary,
    #[serde(skip)]
    pub test_returns: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalkForwardReport {
    pub config_hash: String,
    pub windows: Vec<WindowResult>,
    pub failed_windows: Vec<(String, String)>,
    pub train_mean_sharpe: f64,
    pub test_mean_sharpe: f64,
    /// Test over train mean Sharpe; 0 when train Sharpe is ~0.
    pub overfit_ratio: f64,
    pub test_returns: usize,
    pub monte_carlo: Vec<McReport>,
    pub pass: bool,
    pub reasons: Vec<String>,
}

/// Window layout over `bars`: size `2 * len / (n + 1)`, advancing by
/// `(len - size) / n`, split by time at `train_fraction`.
pub fn build_windows(data: &Dataset<'_>, num_windows: usize, train_fraction: f64, min_bars: usize) -> Vec<WindowSpec> {
    let bars = data.bars;
    let n = num_windows.max(1);
    if bars.len() < 2 {
        return Vec::new();
    }
    let size = (bars.len() * 2 / (n + 1)).max(1);
    let step = (bars.len() - size.min(bars.len())) / n;
    let frac = train_fraction.clamp(0.05, 0.95);
    let mut out = Vec::new();
    for i in 0..n {
        let start = i * step;
        let end = (start + size).min(bars.len());
        if end - start < min_bars.max(2) {
            continue;
        }
        let split = start + ((end - start) as f64 * frac).round() as usize;
        if split <= start || split >= end {
            continue;
        }
        let end_ts = if end < bars.len() { bars[end].ts } else { bars[end - 1].ts + 1 };
        out.push(WindowSpec {
            idx: i,
            train: TimeRange::new(bars[start].ts, bars[split].ts),
            test: TimeRange::new(bars[split].ts, end_ts),
        });
    }
    out
}

pub fn run_walk_forward(
    runner: &BatchRunner,
    data: &Dataset<'_>,
    cfg: &SimulationConfig,
    params: &SignalParams,
    wf: &WalkForwardConfig,
    harness: &HarnessConfig,
) -> Result<WalkForwardReport> {
    let specs = build_windows(data, wf.num_windows, wf.train_fraction, wf.min_window_bars);
    if specs.is_empty() {
        anyhow::bail!("no walk-forward windows: {} bars for {} windows", data.bars.len(), wf.num_windows);
    }

    let batch = runner.map(
        "walk_forward",
        &specs,
        |s| format!("window-{}", s.idx),
        |spec| {
            let train = data.simulate(cfg, params, spec.train)?;
            if !train.success {
                anyhow::bail!("train: {}", train.failure.unwrap_or_else(|| "simulation failed".to_string()));
            }
            let test = data.simulate(cfg, params, spec.test)?;
            if !test.success {
                anyhow::bail!("test: {}", test.failure.unwrap_or_else(|| "simulation failed".to_string()));
            }
            Ok(WindowResult {
                spec: *spec,
                train: train.summary.clone(),
                test_returns: test.step_returns(),
                test: test.summary,
            })
        },
    );

    let mut windows = Vec::new();
    let mut failed_windows = Vec::new();
    for unit in batch.units {
        match unit.outcome {
            UnitOutcome::Done(w) => windows.push(w),
            UnitOutcome::Failed(e) => failed_windows.push((unit.name, e)),
            UnitOutcome::Canceled => failed_windows.push((unit.name, "canceled".to_string())),
        }
    }

    let returns: Vec<f64> = windows.iter().flat_map(|w| w.test_returns.iter().copied()).collect();
    let train_mean_sharpe = mean(&windows.iter().map(|w| w.train.sharpe).collect::<Vec<_>>());
    let test_mean_sharpe = mean(&windows.iter().map(|w| w.test.sharpe).collect::<Vec<_>>());
    let overfit_ratio = if train_mean_sharpe.abs() > 1e-9 { test_mean_sharpe / train_mean_sharpe } else { 0.0 };

    let mc_cfg = McConfig::from_harness(harness, periods_per_year(cfg.step_secs));
    let monte_carlo = run_monte_carlo(runner, &returns, &mc_cfg, &wf.mc);

    let mut reasons = Vec::new();
    if windows.is_empty() {
        reasons.push("no windows completed".to_string());
    }
    for mc in monte_carlo.iter().filter(|m| !m.pass) {
        for r in &mc.reasons {
            reasons.push(format!("block {}: {}", mc.block_size, r));
        }
    }
    let pass = reasons.is_empty();
    let config_hash = cfg.fingerprint();

    logging::log(
        Level::Info,
        Domain::Validation,
        "walk_forward",
        obj(&[
            ("config_hash", v_str(&config_hash)),
            ("windows", json!(windows.len())),
            ("failed", json!(failed_windows.len())),
            ("test_mean_sharpe", v_num(test_mean_sharpe)),
            ("overfit_ratio", v_num(overfit_ratio)),
            ("pass", json!(pass)),
        ]),
    );

    Ok(WalkForwardReport {
        config_hash,
        windows,
        failed_windows,
        train_mean_sharpe,
        test_mean_sharpe,
        overfit_ratio,
        test_returns: returns.len(),
        monte_carlo,
        pass,
        reasons,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceBar;
    use crate::signals::{Direction, Signal, StaticSignals};

    fn bars(n: u64) -> Vec<PriceBar> {
        (0..n).map(|i| PriceBar::flat("X", i * 86_400, 100.0 + (i as f64 * 0.1).sin() * 5.0 + i as f64 * 0.05)).collect()
    }

    #[test]
    fn test_windows_train_precedes_test() {
        let b = bars(700);
        let src = StaticSignals::new();
        let data = Dataset::new("X", &b, &src);
        let specs = build_windows(&data, 4, 0.6, 60);
        assert_eq!(specs.len(), 4);
        for w in &specs {
            assert!(w.train.from < w.train.to);
            assert_eq!(w.train.to, w.test.from);
            assert!(w.test.from < w.test.to);
        }
        assert!(specs.windows(2).all(|p| p[0].train.from < p[1].train.from));
    }

    #[test]
    fn test_too_little_data_errors() {
        let b = bars(10);
        let src = StaticSignals::new();
        let data = Dataset::new("X", &b, &src);
        let runner = BatchRunner::new(1).unwrap();
        let h = HarnessConfig { mc_iterations: 5, ..Default::default() };
        let err = run_walk_forward(&runner, &data, &SimulationConfig::default(), &SignalParams::default(), &WalkForwardConfig::default(), &h);
        assert!(err.is_err());
    }

    #[test]
    fn test_failed_train_run_fails_window() {
        // a single window whose train part holds one bar
        let b = bars(20);
        let src = StaticSignals::from_series("X", vec![(0, Signal::new(Direction::Long, 0.9))]);
        let data = Dataset::new("X", &b, &src);
        let runner = BatchRunner::new(1).unwrap();
        let h = HarnessConfig { mc_iterations: 5, mc_block_sizes: vec![4], ..Default::default() };
        let wf = WalkForwardConfig { num_windows: 1, train_fraction: 0.05, min_window_bars: 2, ..Default::default() };
        let specs = build_windows(&data, 1, 0.05, 2);
        assert_eq!(specs.len(), 1);
        assert!(data.simulate(&SimulationConfig::default(), &SignalParams::default(), specs[0].test).unwrap().success);

        let report = run_walk_forward(&runner, &data, &SimulationConfig::default(), &SignalParams::default(), &wf, &h).unwrap();
        assert!(report.windows.is_empty());
        assert_eq!(report.failed_windows.len(), 1);
        assert!(report.failed_windows[0].1.starts_with("train:"));
        assert_eq!(report.train_mean_sharpe, 0.0);
        assert!(!report.pass);
    }

    #[test]
    fn test_walk_forward_runs_end_to_end() {
        let b = bars(1400);
        let src = StaticSignals::from_series("X", vec![(0, Signal::new(Direction::Long, 0.9))]);
        let data = Dataset::new("X", &b, &src);
        let runner = BatchRunner::new(2).unwrap();
        let h = HarnessConfig { mc_iterations: 40, mc_block_sizes: vec![4], seed: 9, ..Default::default() };
        let wf = WalkForwardConfig { num_windows: 3, ..Default::default() };
        let report = run_walk_forward(&runner, &data, &SimulationConfig::default(), &SignalParams::default(), &wf, &h).unwrap();
        assert_eq!(report.windows.len() + report.failed_windows.len(), 3);
        assert!(!report.windows.is_empty());
        assert!(report.test_returns > 0);
        assert_eq!(report.monte_carlo.len(), 1);
        assert_eq!(report.monte_carlo[0].iterations, 40);
    }
}
