//! Regime flags from trailing price data.
//!
//! The signal layer attaches these flags to every signal. The simulator
//! uses them to force exits and block entries whose side conflicts with
//! the prevailing regime.

use serde::{Deserialize, Serialize};

use crate::data::PriceBar;
use crate::signals::Direction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeFlags {
    /// Close above a rising trend average. Shorts are blocked.
    pub bull_trend: bool,
    /// Close stretched far above the long average. Longs are blocked.
    pub bubble: bool,
    /// Deep drawdown from the high with a sharp recent drop. Longs are blocked.
    pub crash_transition: bool,
}

impl RegimeFlags {
    /// The guard that rejects holding `side` in this regime, if any.
    pub fn conflict(&self, side: Direction) -> Option<&'static str> {
        match side {
            Direction::Short if self.bull_trend => Some("bull_trend_short_block"),
            Direction::Long if self.bubble => Some("bubble_guard"),
            Direction::Long if self.crash_transition => Some("crash_transition_guard"),
            _ => None,
        }
    }

    pub fn any(&self) -> bool {
        self.bull_trend || self.bubble || self.crash_transition
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    pub trend_window: usize,
    pub slope_lookback: usize,
    pub bubble_window: usize,
    /// Close / long average above this flags a bubble.
    pub bubble_multiple: f64,
    pub crash_drawdown: f64,
    pub crash_lookback: usize,
    pub crash_drop: f64,
}

impl Default for RegimeParams {
    fn default() -> Self {
        Self {
            trend_window: 50,
            slope_lookback: 10,
            bubble_window: 200,
            bubble_multiple: 1.6,
            crash_drawdown: 0.20,
            crash_lookback: 20,
            crash_drop: 0.10,
        }
    }
}

fn sma(closes: &[f64], end: usize, window: usize) -> Option<f64> {
    if window == 0 || end < window {
        return None;
    }
    Some(closes[end - window..end].iter().sum::<f64>() / window as f64)
}

/// Flags for the most recent bar of `bars`. Too little history leaves the
/// affected flag unset.
pub fn detect(bars: &[PriceBar], p: &RegimeParams) -> RegimeFlags {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let n = closes.len();
    let Some(&last) = closes.last() else {
        return RegimeFlags::default();
    };

    let bull_trend = match (
        sma(&closes, n, p.trend_window),
        sma(&closes, n.saturating_sub(p.slope_lookback), p.trend_window),
    ) {
        (Some(now), Some(before)) => last > now && now > before,
        _ => false,
    };

    let bubble = sma(&closes, n, p.bubble_window)
        .map(|avg| avg > 0.0 && last / avg > p.bubble_multiple)
        .unwrap_or(false);

    let high = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let drawdown = if high > 0.0 { 1.0 - last / high } else { 0.0 };
    let recent_drop = if n > p.crash_lookback && closes[n - 1 - p.crash_lookback] > 0.0 {
        1.0 - last / closes[n - 1 - p.crash_lookback]
    } else {
        0.0
    };
    let crash_transition = drawdown > p.crash_drawdown && recent_drop > p.crash_drop;

    RegimeFlags { bull_trend, bubble, crash_transition }
}

/// Coarse trend label for a whole period, attached to split reports.
pub fn classify_trend(bars: &[PriceBar]) -> &'static str {
    let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
        return "unknown";
    };
    if first.close <= 0.0 {
        return "unknown";
    }
    let change_pct = (last.close - first.close) / first.close * 100.0;
    if change_pct > 10.0 {
        "strong_bull"
    } else if change_pct > 2.0 {
        "mild_bull"
    } else if change_pct < -10.0 {
        "strong_bear"
    } else if change_pct < -2.0 {
        "mild_bear"
    } else {
        "ranging"
    }
}
