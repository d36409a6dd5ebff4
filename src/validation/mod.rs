//! Validation harness: protocols that run many simulations and turn them
//! into pass/fail verdicts.
//!
//! - `oos`: one fixed configuration over hand-curated historical eras
//! - `walk_forward`: rolling windows plus block-bootstrap Monte-Carlo
//! - `perturbation`: signal-parameter variants and fragility flags
//! - `guard_sweep`: 4-D grid over the entropy guard
//!
//! Every protocol fans its independent units out on a `BatchRunner` and
//! records failed units instead of aborting.

pub mod guard_sweep;
pub mod monte_carlo;
pub mod oos;
pub mod perturbation;
pub mod walk_forward;

use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::data::{slice_range, PriceBar};
use crate::metrics::{percentile, SECS_PER_YEAR};
use crate::signals::{SignalParams, SignalSource};
use crate::simulation::{simulate, SimulationResult};

/// Half-open `[from, to)` range of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: u64,
    pub to: u64,
}

impl TimeRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    pub fn years(&self) -> f64 {
        self.to.saturating_sub(self.from) as f64 / SECS_PER_YEAR
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.from < other.to && other.from < self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSplit {
    pub name: String,
    pub train_range: TimeRange,
    pub test_range: TimeRange,
    pub regime_label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub split_name: String,
    pub pass: bool,
    pub reasons: Vec<String>,
}

impl ValidationVerdict {
    pub fn failed(split_name: &str, reason: impl Into<String>) -> Self {
        Self { split_name: split_name.to_string(), pass: false, reasons: vec![reason.into()] }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> u64 {
    NaiveDate::from_ymd_opt(y, m, d)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp().max(0) as u64)
        .unwrap_or(0)
}

/// The curated eras. Test ranges are pairwise disjoint; each train range
/// ends before its test range starts.
pub fn default_splits() -> Vec<ValidationSplit> {
    let split = |name: &str, train: (u64, u64), test: (u64, u64), label: &str| ValidationSplit {
        name: name.to_string(),
        train_range: TimeRange::new(train.0, train.1),
        test_range: TimeRange::new(test.0, test.1),
        regime_label: label.to_string(),
    };
    vec![
        split(
            "dotcom_bear",
            (ymd(1990, 1, 1), ymd(2000, 1, 1)),
            (ymd(2000, 3, 1), ymd(2002, 10, 1)),
            "structural_bear",
        ),
        split(
            "gfc_crash",
            (ymd(1998, 1, 1), ymd(2007, 6, 1)),
            (ymd(2007, 10, 1), ymd(2009, 4, 1)),
            "crash",
        ),
        split(
            "range_chop",
            (ymd(2005, 1, 1), ymd(2014, 12, 1)),
            (ymd(2015, 1, 1), ymd(2016, 6, 1)),
            "sideways_chop",
        ),
        split(
            "late_cycle_melt_up",
            (ymd(2008, 1, 1), ymd(2016, 6, 1)),
            (ymd(2016, 6, 1), ymd(2018, 2, 1)),
            "melt_up",
        ),
    ]
}

/// One instrument's history plus the signal source to drive it.
#[derive(Clone, Copy)]
pub struct Dataset<'a> {
    pub symbol: &'a str,
    pub bars: &'a [PriceBar],
    pub source: &'a dyn SignalSource,
}

impl<'a> Dataset<'a> {
    pub fn new(symbol: &'a str, bars: &'a [PriceBar], source: &'a dyn SignalSource) -> Self {
        Self { symbol, bars, source }
    }

    pub fn bars_in(&self, range: TimeRange) -> &'a [PriceBar] {
        slice_range(self.bars, range.from, range.to)
    }

    pub fn span(&self) -> Option<TimeRange> {
        let first = self.bars.first()?;
        let last = self.bars.last()?;
        Some(TimeRange::new(first.ts, last.ts + 1))
    }

    pub fn simulate(&self, cfg: &SimulationConfig, params: &SignalParams, range: TimeRange) -> Result<SimulationResult> {
        Ok(simulate(cfg, self.bars, self.source, self.symbol, params, range.from, range.to)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

impl Distribution {
    pub fn of(xs: &[f64]) -> Self {
        Self { p5: percentile(xs, 5.0), p50: percentile(xs, 50.0), p95: percentile(xs, 95.0) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_splits_are_disjoint_and_ordered() {
        let splits = default_splits();
        assert_eq!(splits.len(), 4);
        for (i, a) in splits.iter().enumerate() {
            assert!(a.train_range.to <= a.test_range.from, "{}", a.name);
            assert!(a.test_range.from < a.test_range.to);
            for b in splits.iter().skip(i + 1) {
                assert!(!a.test_range.overlaps(&b.test_range), "{} vs {}", a.name, b.name);
            }
        }
    }

    #[test]
    fn test_ymd_epoch() {
        assert_eq!(ymd(1970, 1, 2), 86_400);
        assert_eq!(ymd(2000, 1, 1), 946_684_800);
    }

    #[test]
    fn test_distribution() {
        let xs: Vec<f64> = (0..=100).map(|i| i as f64).collect();
        let d = Distribution::of(&xs);
        assert_eq!((d.p5, d.p50, d.p95), (5.0, 50.0, 95.0));
    }
}
