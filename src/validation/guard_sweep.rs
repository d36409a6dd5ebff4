//! Grid search over the entropy guard.
//!
//! Every (warn, hard, min_scale, smoothing) combination is applied to the
//! base configuration and run over the test range of each split. Combos are
//! ranked by a weighted objective where lower is better: tail drawdown is
//! the primary term; low Sharpe, low worst-split Sharpe, low tail CAGR and
//! too few trades add penalties.

use serde::{Deserialize, Serialize};

use super::{Dataset, ValidationSplit};
use crate::batch::{BatchRunner, UnitOutcome};
use crate::config::{ConfigPatch, EntropyPatch, SimulationConfig};
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::metrics::{mean, percentile, PerformanceSummary};
use crate::signals::SignalParams;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardGrid {
    pub warn: Vec<f64>,
    pub hard: Vec<f64>,
    pub min_scale: Vec<f64>,
    pub smoothing: Vec<f64>,
}

impl Default for GuardGrid {
    fn default() -> Self {
        Self {
            warn: vec![0.80, 0.85, 0.90],
            hard: vec![0.95, 0.97, 0.99],
            min_scale: vec![0.2, 0.3, 0.5],
            smoothing: vec![0.0, 0.3, 0.6],
        }
    }
}

impl GuardGrid {
    pub fn size(&self) -> usize {
        self.warn.len() * self.hard.len() * self.min_scale.len() * self.smoothing.len()
    }
}

/// Objective weights. These are calibration constants, not derived values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepWeights {
    pub tail_drawdown: f64,
    pub mean_sharpe: f64,
    pub worst_sharpe: f64,
    pub tail_cagr: f64,
    pub min_trades: usize,
    /// Added per trade short of `min_trades`.
    pub trade_shortfall: f64,
}

impl Default for SweepWeights {
    fn default() -> Self {
        Self {
            tail_drawdown: 1.0,
            mean_sharpe: 0.10,
            worst_sharpe: 0.05,
            tail_cagr: 0.50,
            min_trades: 8,
            trade_shortfall: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardCombo {
    pub warn: f64,
    pub hard: f64,
    pub min_scale: f64,
    pub smoothing: f64,
}

impl GuardCombo {
    pub fn label(&self) -> String {
        format!("w{}-h{}-m{}-s{}", self.warn, self.hard, self.min_scale, self.smoothing)
    }

    pub fn patch(&self) -> ConfigPatch {
        ConfigPatch {
            entropy: Some(EntropyPatch {
                enabled: Some(true),
                warn: Some(self.warn),
                hard: Some(self.hard),
                min_scale: Some(self.min_scale),
                smoothing: Some(self.smoothing),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComboResult {
    pub combo: GuardCombo,
    pub config_hash: String,
    /// `None` when the combo failed.
    pub score: Option<f64>,
    pub tail_drawdown: f64,
    pub mean_sharpe: f64,
    pub worst_sharpe: f64,
    pub tail_cagr: f64,
    pub total_trades: usize,
    pub per_split: Vec<(String, PerformanceSummary)>,
    pub error: Option<String>,
}

impl ComboResult {
    fn failed(combo: GuardCombo, config_hash: String, error: String) -> Self {
        Self {
            combo,
            config_hash,
            score: None,
            tail_drawdown: 0.0,
            mean_sharpe: 0.0,
            worst_sharpe: 0.0,
            tail_cagr: 0.0,
            total_trades: 0,
            per_split: Vec::new(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub evaluated: usize,
    pub skipped_invalid: Vec<(GuardCombo, String)>,
    pub failed: Vec<ComboResult>,
    /// Scored combos, best (lowest score) first.
    pub ranking: Vec<ComboResult>,
    pub best: Option<GuardCombo>,
    pub canceled: bool,
}

/// Expand the grid; combos with `hard <= warn` are returned separately.
pub fn combos(grid: &GuardGrid) -> (Vec<GuardCombo>, Vec<(GuardCombo, String)>) {
    let mut valid = Vec::with_capacity(grid.size());
    let mut skipped = Vec::new();
    for &warn in &grid.warn {
        for &hard in &grid.hard {
            for &min_scale in &grid.min_scale {
                for &smoothing in &grid.smoothing {
                    let c = GuardCombo { warn, hard, min_scale, smoothing };
                    if hard <= warn {
                        skipped.push((c, format!("hard {} <= warn {}", hard, warn)));
                    } else {
                        valid.push(c);
                    }
                }
            }
        }
    }
    (valid, skipped)
}

/// Weighted objective over per-split summaries; lower is better.
pub fn score(summaries: &[&PerformanceSummary], w: &SweepWeights) -> (f64, f64, f64, f64, f64, usize) {
    let dds: Vec<f64> = summaries.iter().map(|s| s.max_drawdown).collect();
    let sharpes: Vec<f64> = summaries.iter().map(|s| s.sharpe).collect();
    let cagrs: Vec<f64> = summaries.iter().map(|s| s.cagr).collect();
    let tail_drawdown = percentile(&dds, 95.0);
    let mean_sharpe = mean(&sharpes);
    let worst_sharpe = sharpes.iter().copied().fold(f64::INFINITY, f64::min);
    let worst_sharpe = if worst_sharpe.is_finite() { worst_sharpe } else { 0.0 };
    let tail_cagr = percentile(&cagrs, 5.0);
    let trades: usize = summaries.iter().map(|s| s.trades).sum();
    let shortfall = w.min_trades.saturating_sub(trades) as f64;

    let s = w.tail_drawdown * tail_drawdown - w.mean_sharpe * mean_sharpe - w.worst_sharpe * worst_sharpe
        - w.tail_cagr * tail_cagr
        + w.trade_shortfall * shortfall;
    (s, tail_drawdown, mean_sharpe, worst_sharpe, tail_cagr, trades)
}

pub fn run_guard_sweep(
    runner: &BatchRunner,
    data: &Dataset<'_>,
    base: &SimulationConfig,
    params: &SignalParams,
    splits: &[ValidationSplit],
    grid: &GuardGrid,
    weights: &SweepWeights,
) -> SweepReport {
    let (candidates, mut skipped_invalid) = combos(grid);
    let mut units: Vec<(GuardCombo, SimulationConfig)> = Vec::with_capacity(candidates.len());
    for c in candidates {
        match base.apply(&c.patch()) {
            Ok(cfg) => units.push((c, cfg)),
            Err(e) => skipped_invalid.push((c, e.to_string())),
        }
    }

    let batch = runner.map("guard_sweep", &units, |(c, _)| c.label(), |(_, cfg)| {
        let mut per_split = Vec::new();
        for split in splits {
            let res = data.simulate(cfg, params, split.test_range)?;
            // Splits without enough history are left out of the objective.
            if res.success {
                per_split.push((split.name.clone(), res.summary));
            }
        }
        if per_split.is_empty() {
            anyhow::bail!("no split could be evaluated");
        }
        Ok(per_split)
    });
    let canceled = !batch.is_complete();

    let mut ranking = Vec::new();
    let mut failed = Vec::new();
    for ((combo, cfg), unit) in units.iter().zip(batch.units) {
        let hash = cfg.fingerprint();
        match unit.outcome {
            UnitOutcome::Done(per_split) => {
                let refs: Vec<&PerformanceSummary> = per_split.iter().map(|(_, s)| s).collect();
                let (s, tail_drawdown, mean_sharpe, worst_sharpe, tail_cagr, total_trades) = score(&refs, weights);
                ranking.push(ComboResult {
                    combo: *combo,
                    config_hash: hash,
                    score: Some(s),
                    tail_drawdown,
                    mean_sharpe,
                    worst_sharpe,
                    tail_cagr,
                    total_trades,
                    per_split,
                    error: None,
                });
            }
            UnitOutcome::Failed(e) => failed.push(ComboResult::failed(*combo, hash, e)),
            UnitOutcome::Canceled => failed.push(ComboResult::failed(*combo, hash, "canceled".to_string())),
        }
    }
    ranking.sort_by(|a, b| a.score.unwrap_or(f64::INFINITY).total_cmp(&b.score.unwrap_or(f64::INFINITY)));
    let best = ranking.first().map(|r| r.combo);

    let mut fields = vec![
        ("evaluated", json!(ranking.len())),
        ("skipped_invalid", json!(skipped_invalid.len())),
        ("failed", json!(failed.len())),
        ("canceled", json!(canceled)),
    ];
    if let Some(top) = ranking.first() {
        fields.push(("best", v_str(&top.combo.label())));
        fields.push(("best_score", v_num(top.score.unwrap_or(0.0))));
    }
    logging::log(Level::Info, Domain::Validation, "guard_sweep", obj(&fields));

    SweepReport { evaluated: ranking.len(), skipped_invalid, failed, ranking, best, canceled }
}
