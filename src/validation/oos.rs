//! Out-of-sample gate.
//!
//! One frozen configuration runs over every curated split's test range.
//! A split passes on Sharpe, drawdown and a trade count that scales with
//! the split's length. The gate passes when enough splits pass and none is
//! catastrophic (Sharpe below a hard floor with a material trade count).

use serde::{Deserialize, Serialize};

use super::{Dataset, ValidationSplit, ValidationVerdict};
use crate::batch::{BatchRunner, UnitOutcome};
use crate::config::SimulationConfig;
use crate::logging::{self, obj, v_str, Domain, Level};
use crate::metrics::PerformanceSummary;
use crate::regime;
use crate::signals::SignalParams;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OosThresholds {
    pub min_sharpe: f64,
    pub max_drawdown: f64,
    pub min_trades_per_year: f64,
    pub min_passes: usize,
    pub catastrophic_sharpe: f64,
    pub catastrophic_min_trades: usize,
}

impl Default for OosThresholds {
    fn default() -> Self {
        Self {
            min_sharpe: 0.0,
            max_drawdown: 0.35,
            min_trades_per_year: 2.0,
            min_passes: 3,
            catastrophic_sharpe: -1.0,
            catastrophic_min_trades: 5,
        }
    }
}

impl OosThresholds {
    pub fn required_trades(&self, years: f64) -> usize {
        ((self.min_trades_per_year * years).ceil() as usize).max(1)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitReport {
    pub verdict: ValidationVerdict,
    pub regime_label: String,
    /// Price trend actually observed over the test range.
    pub observed_trend: String,
    pub required_trades: usize,
    pub catastrophic: bool,
    pub summary: Option<PerformanceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OosReport {
    pub config_hash: String,
    pub splits: Vec<SplitReport>,
    pub passes: usize,
    pub catastrophic: Vec<String>,
    pub pass: bool,
    pub reasons: Vec<String>,
}

impl OosReport {
    pub fn verdicts(&self) -> Vec<&ValidationVerdict> {
        self.splits.iter().map(|s| &s.verdict).collect()
    }
}

/// Judge one split's summary. Returns (pass, reasons, catastrophic).
pub fn evaluate_split(summary: &PerformanceSummary, years: f64, t: &OosThresholds) -> (bool, Vec<String>, bool) {
    let mut reasons = Vec::new();
    if summary.sharpe < t.min_sharpe {
        reasons.push(format!("sharpe {:.2} < {:.2}", summary.sharpe, t.min_sharpe));
    }
    if summary.max_drawdown > t.max_drawdown {
        reasons.push(format!("max drawdown {:.1}% > {:.1}%", summary.max_drawdown * 100.0, t.max_drawdown * 100.0));
    }
    let need = t.required_trades(years);
    if summary.trades < need {
        reasons.push(format!("{} trades < {} required for {:.1} years", summary.trades, need, years));
    }
    let catastrophic = summary.sharpe < t.catastrophic_sharpe && summary.trades >= t.catastrophic_min_trades;
    if catastrophic {
        reasons.push(format!(
            "catastrophic: sharpe {:.2} below {:.2} over {} trades",
            summary.sharpe, t.catastrophic_sharpe, summary.trades
        ));
    }
    (reasons.is_empty(), reasons, catastrophic)
}

pub fn run_oos_gate(
    runner: &BatchRunner,
    data: &Dataset<'_>,
    cfg: &SimulationConfig,
    params: &SignalParams,
    splits: &[ValidationSplit],
    thresholds: &OosThresholds,
) -> OosReport {
    let batch = runner.map("oos", splits, |s| s.name.clone(), |split| data.simulate(cfg, params, split.test_range));

    let mut reports = Vec::with_capacity(splits.len());
    for (split, unit) in splits.iter().zip(batch.units) {
        let years = split.test_range.years();
        let required_trades = thresholds.required_trades(years);
        let observed_trend = regime::classify_trend(data.bars_in(split.test_range)).to_string();
        let mut report = SplitReport {
            verdict: ValidationVerdict::failed(&split.name, "not evaluated"),
            regime_label: split.regime_label.clone(),
            observed_trend,
            required_trades,
            catastrophic: false,
            summary: None,
        };
        match unit.outcome {
            UnitOutcome::Done(result) if result.success => {
                let (pass, reasons, catastrophic) = evaluate_split(&result.summary, years, thresholds);
                report.verdict = ValidationVerdict { split_name: split.name.clone(), pass, reasons };
                report.catastrophic = catastrophic;
                report.summary = Some(result.summary);
            }
            UnitOutcome::Done(result) => {
                let reason = result.failure.unwrap_or_else(|| "simulation failed".to_string());
                report.verdict = ValidationVerdict::failed(&split.name, reason);
            }
            UnitOutcome::Failed(e) => report.verdict = ValidationVerdict::failed(&split.name, e),
            UnitOutcome::Canceled => report.verdict = ValidationVerdict::failed(&split.name, "canceled"),
        }
        logging::log_verdict(&split.name, report.verdict.pass, &report.verdict.reasons);
        reports.push(report);
    }

    let passes = reports.iter().filter(|r| r.verdict.pass).count();
    let catastrophic: Vec<String> = reports
        .iter()
        .filter(|r| r.catastrophic)
        .map(|r| r.verdict.split_name.clone())
        .collect();
    let mut reasons = Vec::new();
    if passes < thresholds.min_passes {
        reasons.push(format!("{} of {} splits passed, {} required", passes, reports.len(), thresholds.min_passes));
    }
    if !catastrophic.is_empty() {
        reasons.push(format!("catastrophic splits: {}", catastrophic.join(", ")));
    }
    let pass = reasons.is_empty();
    let config_hash = cfg.fingerprint();

    logging::log(
        Level::Info,
        Domain::Validation,
        "oos_gate",
        obj(&[
            ("config_hash", v_str(&config_hash)),
            ("passes", json!(passes)),
            ("splits", json!(reports.len())),
            ("pass", json!(pass)),
        ]),
    );

    OosReport { config_hash, splits: reports, passes, catastrophic, pass, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(sharpe: f64, dd: f64, trades: usize) -> PerformanceSummary {
        PerformanceSummary { sharpe, max_drawdown: dd, trades, ..Default::default() }
    }

    #[test]
    fn test_trade_threshold_scales_with_years() {
        let t = OosThresholds::default();
        assert_eq!(t.required_trades(0.1), 1);
        assert_eq!(t.required_trades(1.5), 3);
        assert_eq!(t.required_trades(3.0), 6);
    }

    #[test]
    fn test_evaluate_pass_and_fail_reasons() {
        let t = OosThresholds::default();
        let (pass, reasons, cat) = evaluate_split(&summary(0.8, 0.1, 10), 2.0, &t);
        assert!(pass && reasons.is_empty() && !cat);

        let (pass, reasons, cat) = evaluate_split(&summary(-0.2, 0.5, 1), 2.0, &t);
        assert!(!pass);
        assert_eq!(reasons.len(), 3);
        assert!(!cat);
    }

    #[test]
    fn test_catastrophic_needs_material_trades() {
        let t = OosThresholds::default();
        let (_, _, cat) = evaluate_split(&summary(-1.5, 0.2, 2), 2.0, &t);
        assert!(!cat);
        let (_, _, cat) = evaluate_split(&summary(-1.5, 0.2, 8), 2.0, &t);
        assert!(cat);
    }
}
