//! Block-bootstrap Monte-Carlo over a step-return series.
//!
//! Each synthetic path is stitched from contiguous blocks drawn (circularly)
//! from the observed returns, which keeps short-range autocorrelation that
//! an i.i.d. shuffle would destroy. Iteration `i` of block size `b` always
//! uses the same seed, so results do not depend on worker scheduling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::Distribution;
use crate::batch::BatchRunner;
use crate::config::HarnessConfig;
use crate::logging::{self, obj, v_num, Domain, Level};
use crate::metrics::{cagr, max_drawdown, sharpe};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McConfig {
    pub iterations: usize,
    pub block_sizes: Vec<usize>,
    pub seed: u64,
    pub periods_per_year: f64,
}

impl McConfig {
    pub fn from_harness(h: &HarnessConfig, periods_per_year: f64) -> Self {
        Self {
            iterations: h.mc_iterations,
            block_sizes: h.mc_block_sizes.clone(),
            seed: h.seed,
            periods_per_year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McThresholds {
    pub max_p95_drawdown: f64,
    pub min_p50_sharpe: f64,
    pub max_prob_loss: f64,
}

impl Default for McThresholds {
    fn default() -> Self {
        Self { max_p95_drawdown: 0.40, min_p50_sharpe: 0.0, max_prob_loss: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct McReport {
    pub block_size: usize,
    pub iterations: usize,
    pub failed_iterations: usize,
    pub drawdown: Distribution,
    pub sharpe: Distribution,
    pub cagr: Distribution,
    pub prob_loss: f64,
    pub pass: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PathStats {
    pub max_drawdown: f64,
    pub sharpe: f64,
    pub cagr: f64,
    pub total_return: f64,
}

pub fn iteration_seed(base: u64, block: usize, iteration: usize) -> u64 {
    base ^ (block as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (iteration as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9)
}

/// Resample `len` returns from circular blocks of `block` consecutive values.
pub fn block_bootstrap<R: Rng>(returns: &[f64], block: usize, len: usize, rng: &mut R) -> Vec<f64> {
    let n = returns.len();
    if n == 0 || len == 0 {
        return Vec::new();
    }
    let block = block.clamp(1, n);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let start = rng.gen_range(0..n);
        for k in 0..block {
            if out.len() == len {
                break;
            }
            out.push(returns[(start + k) % n]);
        }
    }
    out
}

pub fn path_stats(returns: &[f64], periods_per_year: f64) -> PathStats {
    let mut equity = Vec::with_capacity(returns.len() + 1);
    let mut e = 1.0_f64;
    equity.push(e);
    for r in returns {
        e = (e * (1.0 + r)).max(1e-12);
        equity.push(e);
    }
    let years = if periods_per_year > 0.0 { returns.len() as f64 / periods_per_year } else { 0.0 };
    PathStats {
        max_drawdown: max_drawdown(&equity),
        sharpe: sharpe(returns, periods_per_year),
        cagr: cagr(1.0, e, years),
        total_return: e - 1.0,
    }
}

/// One report per block size.
pub fn run_monte_carlo(runner: &BatchRunner, returns: &[f64], cfg: &McConfig, t: &McThresholds) -> Vec<McReport> {
    let iterations: Vec<usize> = (0..cfg.iterations).collect();
    let mut reports = Vec::with_capacity(cfg.block_sizes.len());
    for &block in &cfg.block_sizes {
        let batch = runner.map(
            "monte_carlo",
            &iterations,
            |i| format!("b{}-i{}", block, i),
            |&i| {
                if returns.is_empty() {
                    anyhow::bail!("no returns to resample");
                }
                let mut rng = StdRng::seed_from_u64(iteration_seed(cfg.seed, block, i));
                let path = block_bootstrap(returns, block, returns.len(), &mut rng);
                Ok(path_stats(&path, cfg.periods_per_year))
            },
        );
        let stats: Vec<PathStats> = batch.completed().map(|(_, s)| *s).collect();
        let failed_iterations = cfg.iterations - stats.len();
        let dds: Vec<f64> = stats.iter().map(|s| s.max_drawdown).collect();
        let sharpes: Vec<f64> = stats.iter().map(|s| s.sharpe).collect();
        let cagrs: Vec<f64> = stats.iter().map(|s| s.cagr).collect();
        let prob_loss = if stats.is_empty() {
            1.0
        } else {
            stats.iter().filter(|s| s.total_return < 0.0).count() as f64 / stats.len() as f64
        };

        let drawdown = Distribution::of(&dds);
        let sharpe_d = Distribution::of(&sharpes);
        let mut reasons = Vec::new();
        if stats.is_empty() {
            reasons.push("no completed iterations".to_string());
        }
        if drawdown.p95 > t.max_p95_drawdown {
            reasons.push(format!("p95 drawdown {:.1}% > {:.1}%", drawdown.p95 * 100.0, t.max_p95_drawdown * 100.0));
        }
        if sharpe_d.p50 < t.min_p50_sharpe {
            reasons.push(format!("median sharpe {:.2} < {:.2}", sharpe_d.p50, t.min_p50_sharpe));
        }
        if prob_loss > t.max_prob_loss {
            reasons.push(format!("probability of loss {:.2} > {:.2}", prob_loss, t.max_prob_loss));
        }

        logging::log(
            Level::Info,
            Domain::Validation,
            "monte_carlo",
            obj(&[
                ("block_size", json!(block)),
                ("iterations", json!(stats.len())),
                ("p95_drawdown", v_num(drawdown.p95)),
                ("p50_sharpe", v_num(sharpe_d.p50)),
                ("prob_loss", v_num(prob_loss)),
            ]),
        );

        reports.push(McReport {
            block_size: block,
            iterations: stats.len(),
            failed_iterations,
            drawdown,
            sharpe: sharpe_d,
            cagr: Distribution::of(&cagrs),
            prob_loss,
            pass: reasons.is_empty(),
            reasons,
        });
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_bootstrap_keeps_blocks_contiguous() {
        let returns: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let path = block_bootstrap(&returns, 5, 20, &mut rng);
        assert_eq!(path.len(), 20);
        for chunk in path.chunks(5) {
            for w in chunk.windows(2) {
                assert_eq!((w[0] as usize + 1) % 10, w[1] as usize);
            }
        }
    }

    #[test]
    fn test_same_seed_same_path() {
        let returns = [0.01, -0.02, 0.03, 0.0, 0.015];
        let a = block_bootstrap(&returns, 2, 12, &mut StdRng::seed_from_u64(iteration_seed(42, 2, 3)));
        let b = block_bootstrap(&returns, 2, 12, &mut StdRng::seed_from_u64(iteration_seed(42, 2, 3)));
        assert_eq!(a, b);
        assert_ne!(iteration_seed(42, 2, 3), iteration_seed(42, 2, 4));
    }

    #[test]
    fn test_path_stats() {
        let s = path_stats(&[0.1, -0.5, 0.2], 52.0);
        assert!((s.max_drawdown - 0.5).abs() < 1e-12);
        assert!(s.total_return < 0.0);
    }

    #[test]
    fn test_all_positive_returns_pass() {
        let runner = BatchRunner::new(2).unwrap();
        let returns: Vec<f64> = (0..104).map(|i| 0.002 + 0.001 * ((i % 3) as f64)).collect();
        let cfg = McConfig { iterations: 50, block_sizes: vec![4, 8], seed: 1, periods_per_year: 52.0 };
        let reports = run_monte_carlo(&runner, &returns, &cfg, &McThresholds::default());
        assert_eq!(reports.len(), 2);
        for r in &reports {
            assert_eq!(r.iterations, 50);
            assert_eq!(r.prob_loss, 0.0);
            assert_eq!(r.drawdown.p95, 0.0);
            assert!(r.pass, "{:?}", r.reasons);
        }
    }

    #[test]
    fn test_empty_returns_fail() {
        let runner = BatchRunner::new(1).unwrap();
        let cfg = McConfig { iterations: 5, block_sizes: vec![4], seed: 1, periods_per_year: 52.0 };
        let reports = run_monte_carlo(&runner, &[], &cfg, &McThresholds::default());
        assert!(!reports[0].pass);
        assert_eq!(reports[0].failed_iterations, 5);
    }
}
