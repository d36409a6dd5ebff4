use analogfx::batch::BatchRunner;
use analogfx::config::SimulationConfig;
use analogfx::data::PriceBar;
use analogfx::signals::{Direction, Signal, SignalParams, StaticSignals};
use analogfx::validation::oos::{run_oos_gate, OosThresholds};
use analogfx::validation::{default_splits, Dataset};

const DAY: u64 = 86_400;
// 1999-01-01
const START: u64 = 915_148_800;

/// Daily bars through late 2015: the last curated split has no data.
fn history() -> Vec<PriceBar> {
    (0..6200u64)
        .map(|i| {
            let x = i as f64;
            PriceBar::flat("SPX", START + i * DAY, 100.0 + (x / 40.0).sin() * 10.0 + x * 0.01)
        })
        .collect()
}

#[test]
fn oos_gate_isolates_split_without_data() {
    let bars = history();
    let src = StaticSignals::from_series(
        "SPX",
        (0..6200u64).step_by(30).map(|i| {
            let dir = if (i / 90) % 2 == 0 { Direction::Long } else { Direction::Short };
            (START + i * DAY, Signal::new(dir, 0.85))
        }),
    );
    let data = Dataset::new("SPX", &bars, &src);
    let runner = BatchRunner::new(4).unwrap();
    let report = run_oos_gate(
        &runner,
        &data,
        &SimulationConfig::default(),
        &SignalParams::default(),
        &default_splits(),
        &OosThresholds::default(),
    );

    assert_eq!(report.splits.len(), 4);
    let evaluated = report.splits.iter().filter(|s| s.summary.is_some()).count();
    assert_eq!(evaluated, 3);

    let missing = report.splits.iter().find(|s| s.verdict.split_name == "late_cycle_melt_up").unwrap();
    assert!(!missing.verdict.pass);
    assert!(!missing.verdict.reasons.is_empty());
    assert!(missing.summary.is_none());
    assert_eq!(report.config_hash, SimulationConfig::default().fingerprint());
    assert_eq!(report.verdicts().len(), 4);
}

#[test]
fn canceled_runner_still_reports_every_split() {
    let bars = history();
    let src = StaticSignals::new();
    let data = Dataset::new("SPX", &bars, &src);
    let runner = BatchRunner::new(2).unwrap();
    runner.token().cancel();
    let report = run_oos_gate(
        &runner,
        &data,
        &SimulationConfig::default(),
        &SignalParams::default(),
        &default_splits(),
        &OosThresholds::default(),
    );
    assert_eq!(report.splits.len(), 4);
    assert!(report.splits.iter().all(|s| !s.verdict.pass));
    assert!(!report.pass);
}
