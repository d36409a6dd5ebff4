//! Performance statistics over equity curves and trade ledgers.
//!
//! Drawdowns are reported as positive fractions of the running peak.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::simulation::{ClosedTrade, EquityPoint};

pub const SECS_PER_YEAR: f64 = 365.25 * 86_400.0;

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Sample standard deviation; 0 for fewer than two points.
pub fn std_dev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let var = xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
    var.max(0.0).sqrt()
}

/// Linear-interpolated percentile, `p` in [0, 100]. NaNs are ignored.
pub fn percentile(xs: &[f64], p: f64) -> f64 {
    let mut v: Vec<f64> = xs.iter().copied().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    v[lo] + (v[hi] - v[lo]) * frac
}

pub fn periods_per_year(step_secs: u64) -> f64 {
    if step_secs == 0 {
        return 0.0;
    }
    SECS_PER_YEAR / step_secs as f64
}

/// Simple returns between consecutive equity values.
pub fn step_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Annualized Sharpe ratio (zero risk-free rate). 0 when volatility vanishes.
pub fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    let sd = std_dev(returns);
    if sd < 1e-12 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let s = mean(returns) / sd * periods_per_year.sqrt();
    if s.is_finite() {
        s
    } else {
        0.0
    }
}

pub fn max_drawdown(equity: &[f64]) -> f64 {
    drawdown_episode(equity).map(|e| e.depth).unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownEpisode {
    pub peak_idx: usize,
    pub trough_idx: usize,
    pub depth: f64,
}

/// The deepest peak-to-trough decline, if any.
pub fn drawdown_episode(equity: &[f64]) -> Option<DrawdownEpisode> {
    let mut peak = f64::NEG_INFINITY;
    let mut peak_idx = 0;
    let mut worst: Option<DrawdownEpisode> = None;
    for (i, &e) in equity.iter().enumerate() {
        if e > peak {
            peak = e;
            peak_idx = i;
        }
        if peak > 0.0 {
            let dd = 1.0 - e / peak;
            if dd > 0.0 && worst.map_or(true, |w| dd > w.depth) {
                worst = Some(DrawdownEpisode { peak_idx, trough_idx: i, depth: dd });
            }
        }
    }
    worst
}

/// Compound annual growth; `years <= 0` or a non-positive start yields 0.
pub fn cagr(start: f64, end: f64, years: f64) -> f64 {
    if years <= 0.0 || start <= 0.0 || end <= 0.0 {
        return 0.0;
    }
    (end / start).powf(1.0 / years) - 1.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub steps: usize,
    pub years: f64,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub trades: usize,
    pub win_rate: f64,
    pub avg_trade_return: f64,
    pub total_costs: f64,
}

pub fn summarize(curve: &[EquityPoint], trades: &[ClosedTrade], initial_equity: f64, step_secs: u64) -> PerformanceSummary {
    let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
    let final_equity = equity.last().copied().unwrap_or(initial_equity);
    let years = match (curve.first(), curve.last()) {
        (Some(a), Some(b)) if b.ts > a.ts => (b.ts - a.ts) as f64 / SECS_PER_YEAR,
        _ => 0.0,
    };
    let mut with_start = Vec::with_capacity(equity.len() + 1);
    with_start.push(initial_equity);
    with_start.extend_from_slice(&equity);
    let returns = step_returns(&with_start);
    let wins = trades.iter().filter(|t| t.pnl > 0.0).count();
    let trade_returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
    PerformanceSummary {
        steps: curve.len(),
        years,
        initial_equity,
        final_equity,
        total_return: if initial_equity > 0.0 { final_equity / initial_equity - 1.0 } else { 0.0 },
        cagr: cagr(initial_equity, final_equity, years),
        sharpe: sharpe(&returns, periods_per_year(step_secs)),
        max_drawdown: max_drawdown(&with_start),
        trades: trades.len(),
        win_rate: if trades.is_empty() { 0.0 } else { wins as f64 / trades.len() as f64 },
        avg_trade_return: mean(&trade_returns),
        total_costs: trades.iter().map(|t| t.costs).sum(),
    }
}

/// Where the loss of the deepest drawdown episode came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownAttribution {
    pub depth: f64,
    pub peak_ts: u64,
    pub trough_ts: u64,
    /// Share of realized losses closed inside the episode, by exit reason.
    pub by_exit_reason: BTreeMap<String, f64>,
    /// Share of realized losses by position side.
    pub by_side: BTreeMap<String, f64>,
    pub costs_in_episode: f64,
    /// Fraction of the episode's equity decline not explained by trades
    /// closed inside it (still-open positions at the trough).
    pub unrealized_share: f64,
}

pub fn attribute_drawdown(curve: &[EquityPoint], trades: &[ClosedTrade]) -> Option<DrawdownAttribution> {
    let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
    let ep = drawdown_episode(&equity)?;
    let peak_ts = curve[ep.peak_idx].ts;
    let trough_ts = curve[ep.trough_idx].ts;
    let inside: Vec<&ClosedTrade> = trades
        .iter()
        .filter(|t| t.exit_ts > peak_ts && t.exit_ts <= trough_ts)
        .collect();

    let mut by_reason: BTreeMap<String, f64> = BTreeMap::new();
    let mut by_side: BTreeMap<String, f64> = BTreeMap::new();
    let mut total_loss = 0.0;
    for t in inside.iter().filter(|t| t.pnl < 0.0) {
        let loss = -t.pnl;
        total_loss += loss;
        *by_reason.entry(t.exit_reason.as_str().to_string()).or_default() += loss;
        *by_side.entry(t.side.as_str().to_string()).or_default() += loss;
    }
    if total_loss > 0.0 {
        for v in by_reason.values_mut().chain(by_side.values_mut()) {
            *v /= total_loss;
        }
    }
    let decline = equity[ep.peak_idx] - equity[ep.trough_idx];
    let unrealized_share = if decline > 0.0 { ((decline - total_loss) / decline).clamp(0.0, 1.0) } else { 0.0 };

    Some(DrawdownAttribution {
        depth: ep.depth,
        peak_ts,
        trough_ts,
        by_exit_reason: by_reason,
        by_side,
        costs_in_episode: inside.iter().map(|t| t.costs).sum(),
        unrealized_share,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let xs = [5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(percentile(&xs, 0.0), 1.0);
        assert_eq!(percentile(&xs, 50.0), 3.0);
        assert_eq!(percentile(&xs, 100.0), 5.0);
        assert!((percentile(&xs, 25.0) - 2.0).abs() < 1e-12);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_max_drawdown_positive_fraction() {
        let eq = [1.0, 1.2, 0.9, 1.1, 0.6, 1.3];
        assert!((max_drawdown(&eq) - 0.5).abs() < 1e-12);
        let ep = drawdown_episode(&eq).unwrap();
        assert_eq!((ep.peak_idx, ep.trough_idx), (1, 4));
        assert_eq!(max_drawdown(&[1.0, 1.1, 1.2]), 0.0);
    }

    #[test]
    fn test_sharpe_zero_when_flat() {
        assert_eq!(sharpe(&[0.01, 0.01, 0.01], 52.0), 0.0);
        let r = [0.01, -0.005, 0.02, 0.0, 0.01];
        assert!(sharpe(&r, 52.0) > 0.0);
    }

    #[test]
    fn test_cagr() {
        assert!((cagr(1.0, 4.0, 2.0) - 1.0).abs() < 1e-12);
        assert_eq!(cagr(1.0, 2.0, 0.0), 0.0);
    }

    #[test]
    fn test_step_returns() {
        let r = step_returns(&[1.0, 1.1, 0.99]);
        assert_eq!(r.len(), 2);
        assert!((r[0] - 0.1).abs() < 1e-12);
        assert!((r[1] + 0.1).abs() < 1e-12);
    }
}
