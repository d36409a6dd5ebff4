//! Parameter perturbation: does performance survive small changes to the
//! signal parameters?
//!
//! Variants are generated either one parameter at a time or at the corners
//! of the perturbation box. A parameter is fragile when any variant that
//! moves it drops Sharpe below the fragility threshold.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Dataset, Distribution, TimeRange};
use crate::batch::{BatchRunner, UnitOutcome};
use crate::config::SimulationConfig;
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::metrics::PerformanceSummary;
use crate::signals::{SignalParams, PARAM_NAMES};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerturbMode {
    OneAtATime,
    GridCorners,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerturbConfig {
    pub mode: PerturbMode,
    /// Relative changes, e.g. -0.2 for "20% lower".
    pub deltas: Vec<f64>,
    pub params: Vec<String>,
    pub fragility_sharpe: f64,
}

impl Default for PerturbConfig {
    fn default() -> Self {
        Self {
            mode: PerturbMode::OneAtATime,
            deltas: vec![-0.2, -0.1, 0.1, 0.2],
            params: PARAM_NAMES.iter().map(|s| s.to_string()).collect(),
            fragility_sharpe: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Variant {
    pub name: String,
    pub changes: Vec<(String, f64)>,
    #[serde(skip)]
    pub params: SignalParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantResult {
    pub name: String,
    pub changes: Vec<(String, f64)>,
    pub summary: PerformanceSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamSensitivity {
    pub variants: usize,
    pub min_sharpe: f64,
    pub max_sharpe: f64,
    pub fragile: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerturbReport {
    pub mode: PerturbMode,
    pub baseline: Option<PerformanceSummary>,
    pub variants: Vec<VariantResult>,
    pub invalid_variants: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    pub sharpe: Distribution,
    pub max_drawdown: Distribution,
    pub cagr: Distribution,
    pub sensitivity: BTreeMap<String, ParamSensitivity>,
    pub fragile_params: Vec<String>,
}

fn scaled(base: f64, delta: f64) -> f64 {
    base * (1.0 + delta)
}

/// Build variants; invalid parameter sets come back in the second vector.
pub fn variants(base: &SignalParams, cfg: &PerturbConfig) -> (Vec<Variant>, Vec<(String, String)>) {
    let params: Vec<(&str, f64)> = cfg
        .params
        .iter()
        .filter_map(|p| base.get(p).map(|v| (p.as_str(), v)))
        .collect();
    let mut out = Vec::new();
    let mut invalid = Vec::new();
    let mut push = |changes: Vec<(String, f64)>| {
        let name = changes
            .iter()
            .map(|(p, v)| format!("{}={}", p, v))
            .collect::<Vec<_>>()
            .join(",");
        let built = changes.iter().try_fold(base.clone(), |acc, (p, v)| acc.with(p, *v));
        match built {
            Ok(params) => out.push(Variant { name, changes, params }),
            Err(e) => invalid.push((name, e.to_string())),
        }
    };
    match cfg.mode {
        PerturbMode::OneAtATime => {
            for (p, v) in &params {
                for d in &cfg.deltas {
                    push(vec![(p.to_string(), scaled(*v, *d))]);
                }
            }
        }
        PerturbMode::GridCorners => {
            let lo = cfg.deltas.iter().copied().fold(0.0_f64, f64::min);
            let hi = cfg.deltas.iter().copied().fold(0.0_f64, f64::max);
            let k = params.len();
            if k == 0 {
                return (out, invalid);
            }
            for mask in 0..(1usize << k) {
                let changes = params
                    .iter()
                    .enumerate()
                    .map(|(i, (p, v))| {
                        let d = if mask & (1 << i) != 0 { hi } else { lo };
                        (p.to_string(), scaled(*v, d))
                    })
                    .collect();
                push(changes);
            }
        }
    }
    (out, invalid)
}

pub fn run_perturbation(
    runner: &BatchRunner,
    data: &Dataset<'_>,
    cfg: &SimulationConfig,
    base: &SignalParams,
    range: TimeRange,
    pcfg: &PerturbConfig,
) -> PerturbReport {
    let (mut all, invalid_variants) = variants(base, pcfg);
    all.insert(0, Variant { name: "baseline".to_string(), changes: Vec::new(), params: base.clone() });

    let batch = runner.map("perturbation", &all, |v| v.name.clone(), |v| {
        let res = data.simulate(cfg, &v.params, range)?;
        if !res.success {
            anyhow::bail!(res.failure.unwrap_or_else(|| "simulation failed".to_string()));
        }
        Ok(res.summary)
    });

    let mut baseline = None;
    let mut results = Vec::new();
    let mut failed = Vec::new();
    for (variant, unit) in all.into_iter().zip(batch.units) {
        match unit.outcome {
            UnitOutcome::Done(summary) if variant.changes.is_empty() => baseline = Some(summary),
            UnitOutcome::Done(summary) => results.push(VariantResult { name: variant.name, changes: variant.changes, summary }),
            UnitOutcome::Failed(e) => failed.push((variant.name, e)),
            UnitOutcome::Canceled => failed.push((variant.name, "canceled".to_string())),
        }
    }

    let mut sensitivity: BTreeMap<String, ParamSensitivity> = BTreeMap::new();
    for r in &results {
        for (p, _) in &r.changes {
            let s = sensitivity.entry(p.clone()).or_insert(ParamSensitivity {
                variants: 0,
                min_sharpe: f64::INFINITY,
                max_sharpe: f64::NEG_INFINITY,
                fragile: false,
            });
            s.variants += 1;
            s.min_sharpe = s.min_sharpe.min(r.summary.sharpe);
            s.max_sharpe = s.max_sharpe.max(r.summary.sharpe);
            s.fragile |= r.summary.sharpe < pcfg.fragility_sharpe;
        }
    }
    let fragile_params: Vec<String> = sensitivity.iter().filter(|(_, s)| s.fragile).map(|(p, _)| p.clone()).collect();

    let sharpes: Vec<f64> = results.iter().map(|r| r.summary.sharpe).collect();
    let dds: Vec<f64> = results.iter().map(|r| r.summary.max_drawdown).collect();
    let cagrs: Vec<f64> = results.iter().map(|r| r.summary.cagr).collect();

    logging::log(
        Level::Info,
        Domain::Validation,
        "perturbation",
        obj(&[
            ("variants", json!(results.len())),
            ("failed", json!(failed.len())),
            ("invalid", json!(invalid_variants.len())),
            ("fragile", v_str(&fragile_params.join(","))),
        ]),
    );

    PerturbReport {
        mode: pcfg.mode,
        baseline,
        variants: results,
        invalid_variants,
        failed,
        sharpe: Distribution::of(&sharpes),
        max_drawdown: Distribution::of(&dds),
        cagr: Distribution::of(&cagrs),
        sensitivity,
        fragile_params,
    }
}
