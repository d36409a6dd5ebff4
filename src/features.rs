//! Per-instrument feature rows for the clustering engine.
//!
//! A row combines trailing price behaviour with the outcome statistics of
//! the instrument's analog matches, so clusters group instruments that both
//! look alike now and whose historical analogs resolved alike.

use serde::Serialize;

use crate::data::PriceBar;
use crate::error::{EngineError, EngineResult};
use crate::scanner::{AnalogOutlook, MatchCandidate};

pub const MOMENTUM: &str = "momentum";
pub const VOLATILITY: &str = "volatility";
pub const MEAN_REVERSION: &str = "mean_reversion";
pub const TREND_STRENGTH: &str = "trend_strength";
pub const ANALOG_EDGE: &str = "analog_edge";
pub const ANALOG_HIT_RATE: &str = "analog_hit_rate";

pub const FEATURE_NAMES: [&str; 6] = [
    MOMENTUM,
    VOLATILITY,
    MEAN_REVERSION,
    TREND_STRENGTH,
    ANALOG_EDGE,
    ANALOG_HIT_RATE,
];

const SHORT_WINDOW: usize = 20;
const LONG_WINDOW: usize = 50;

/// Mean and sample deviation of the last `n` values of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Tail {
    mean: f64,
    sd: f64,
}

fn tail(xs: &[f64], n: usize) -> Tail {
    let w = &xs[xs.len().saturating_sub(n)..];
    if w.is_empty() {
        return Tail::default();
    }
    let mean = w.iter().sum::<f64>() / w.len() as f64;
    let sd = if w.len() < 2 {
        0.0
    } else {
        (w.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64).sqrt()
    };
    Tail { mean, sd }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRow {
    pub symbol: String,
    pub values: Vec<f64>,
}

/// Extract the standard feature row (order of `FEATURE_NAMES`).
///
/// Needs at least 51 bars for the long trend window.
pub fn extract(symbol: &str, bars: &[PriceBar], matches: &[MatchCandidate]) -> EngineResult<FeatureRow> {
    let need = LONG_WINDOW + 1;
    if bars.len() < need {
        return Err(EngineError::InsufficientData { need, got: bars.len() });
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    if closes.iter().any(|c| !c.is_finite() || *c <= 0.0) {
        return Err(EngineError::invalid_input(format!("{}: non-positive or non-finite close", symbol)));
    }

    let log_returns: Vec<f64> = closes.windows(2).map(|p| (p[1] / p[0]).ln()).collect();
    let short = tail(&closes, SHORT_WINDOW);
    let long = tail(&closes, LONG_WINDOW);

    let last = closes[closes.len() - 1];
    let past = closes[closes.len() - 1 - SHORT_WINDOW];
    let momentum = last / past - 1.0;
    let volatility = tail(&log_returns, SHORT_WINDOW).sd;
    let mean_reversion = if short.sd > 1e-12 { (short.mean - last) / short.sd } else { 0.0 };
    let trend_strength = if long.mean > 0.0 { short.mean / long.mean - 1.0 } else { 0.0 };

    let (analog_edge, analog_hit_rate) = match AnalogOutlook::from_matches(matches) {
        Some(o) => (o.mean_terminal, o.hit_rate - 0.5),
        None => (0.0, 0.0),
    };

    let values = vec![
        momentum,
        volatility,
        mean_reversion,
        trend_strength,
        analog_edge,
        analog_hit_rate,
    ]
    .into_iter()
    .map(|v| if v.is_finite() { v } else { 0.0 })
    .collect();

    Ok(FeatureRow { symbol: symbol.to_string(), values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar::flat("T", i as u64 * 86_400, *c))
            .collect()
    }

    #[test]
    fn test_tail_uses_last_values_only() {
        let t = tail(&[1.0, 2.0, 3.0, 4.0], 3);
        assert!((t.mean - 3.0).abs() < 1e-12);
        assert!((t.sd - 1.0).abs() < 1e-12);
        assert_eq!(tail(&[7.0], 3), Tail { mean: 7.0, sd: 0.0 });
        assert_eq!(tail(&[], 3), Tail::default());
    }

    #[test]
    fn test_insufficient_history() {
        let bars = bars_from(&[100.0; 30]);
        assert!(matches!(
            extract("T", &bars, &[]),
            Err(EngineError::InsufficientData { need: 51, got: 30 })
        ));
    }

    #[test]
    fn test_sell_off_reads_as_negative_momentum_and_stretched() {
        let mut closes = vec![100.0; 60];
        for (k, c) in closes.iter_mut().skip(50).enumerate() {
            *c = 100.0 - 3.0 * (k as f64 + 1.0);
        }
        let row = extract("T", &bars_from(&closes), &[]).unwrap();
        assert_eq!(row.values.len(), FEATURE_NAMES.len());
        assert!(row.values[0] < -0.2, "momentum {}", row.values[0]);
        assert!(row.values[2] > 1.0, "mean reversion {}", row.values[2]);
        assert!(row.values[3] < 0.0, "trend {}", row.values[3]);
        assert_eq!(row.values[4], 0.0);
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let row = extract("T", &bars_from(&[50.0; 80]), &[]).unwrap();
        for v in &row.values {
            assert!(v.abs() < 1e-9);
        }
    }
}
