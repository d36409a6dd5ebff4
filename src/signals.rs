//! Directional signals consumed by the simulator.
//!
//! A `SignalSource` answers "what does the model say about `symbol` as of
//! `ts`" using only information available at `ts`. The analog source runs
//! the pattern scanner on history truncated at `as_of`; the static source
//! replays a pre-computed series.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::data::{upto, PriceBar};
use crate::error::{EngineError, EngineResult};
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use crate::regime::{self, RegimeFlags, RegimeParams};
use crate::scanner::{AnalogOutlook, PatternScanner, ScanConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

impl Direction {
    pub fn from_score(score: f64) -> Self {
        if score > 0.0 {
            Direction::Long
        } else if score < 0.0 {
            Direction::Short
        } else {
            Direction::Neutral
        }
    }

    /// +1 long, -1 short, 0 neutral.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::Neutral => 0.0,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Neutral => Direction::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Neutral => "NEUTRAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    /// In [0, 1].
    pub confidence: f64,
    pub regime_flags: RegimeFlags,
}

impl Signal {
    pub fn new(direction: Direction, confidence: f64) -> Self {
        let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };
        Self { direction, confidence, regime_flags: RegimeFlags::default() }
    }

    pub fn neutral() -> Self {
        Self::new(Direction::Neutral, 0.0)
    }

    pub fn with_flags(mut self, flags: RegimeFlags) -> Self {
        self.regime_flags = flags;
        self
    }
}

/// Tunable parameters of the signal layer. Perturbation sweeps address them
/// by name through `get` / `with`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalParams {
    pub window_len: usize,
    pub aftermath_len: usize,
    pub top_k: usize,
    pub min_similarity: f64,
    pub min_gap_bars: usize,
    pub regime: RegimeParams,
}

pub const PARAM_NAMES: [&str; 4] = ["window_len", "aftermath_len", "top_k", "min_similarity"];

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            window_len: 30,
            aftermath_len: 20,
            top_k: 10,
            min_similarity: 70.0,
            min_gap_bars: 5,
            regime: RegimeParams::default(),
        }
    }
}

impl SignalParams {
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "window_len" => Some(self.window_len as f64),
            "aftermath_len" => Some(self.aftermath_len as f64),
            "top_k" => Some(self.top_k as f64),
            "min_similarity" => Some(self.min_similarity),
            "min_gap_bars" => Some(self.min_gap_bars as f64),
            _ => None,
        }
    }

    /// Copy with one parameter replaced. Integer parameters are rounded.
    pub fn with(&self, name: &str, value: f64) -> EngineResult<Self> {
        if !value.is_finite() {
            return Err(EngineError::invalid_config(format!("{} must be finite", name)));
        }
        let as_count = || value.round().max(0.0) as usize;
        let mut next = self.clone();
        match name {
            "window_len" => next.window_len = as_count(),
            "aftermath_len" => next.aftermath_len = as_count(),
            "top_k" => next.top_k = as_count(),
            "min_similarity" => next.min_similarity = value,
            "min_gap_bars" => next.min_gap_bars = as_count(),
            other => return Err(EngineError::invalid_config(format!("unknown signal parameter '{}'", other))),
        }
        next.scan_config().validate()?;
        Ok(next)
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            window_len: self.window_len,
            aftermath_len: self.aftermath_len,
            top_k: self.top_k,
            min_similarity: self.min_similarity,
            exclude_recent: self.window_len,
            min_gap_bars: self.min_gap_bars,
            ..ScanConfig::default()
        }
    }
}

pub trait SignalSource: Send + Sync {
    fn signal(&self, symbol: &str, as_of: u64, params: &SignalParams) -> Option<Signal>;
}

/// Signals derived from the instrument's own historical analogs.
///
/// Direction follows the sign of the analogs' mean terminal return;
/// confidence is the share of analogs agreeing with that sign weighted by
/// their mean similarity.
#[derive(Debug, Clone, Default)]
pub struct AnalogSignalSource {
    history: HashMap<String, Arc<[PriceBar]>>,
}

impl AnalogSignalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, bars: Arc<[PriceBar]>) {
        self.history.insert(symbol.to_string(), bars);
    }

    pub fn with_history(symbol: &str, bars: Arc<[PriceBar]>) -> Self {
        let mut s = Self::new();
        s.insert(symbol, bars);
        s
    }
}

pub fn signal_from_outlook(outlook: Option<&AnalogOutlook>, flags: RegimeFlags) -> Signal {
    let Some(o) = outlook else {
        return Signal::neutral().with_flags(flags);
    };
    let direction = Direction::from_score(o.mean_terminal);
    let agreement = match direction {
        Direction::Long => o.hit_rate,
        Direction::Short => 1.0 - o.hit_rate,
        Direction::Neutral => 0.0,
    };
    Signal::new(direction, agreement * o.mean_similarity / 100.0).with_flags(flags)
}

impl SignalSource for AnalogSignalSource {
    fn signal(&self, symbol: &str, as_of: u64, params: &SignalParams) -> Option<Signal> {
        let bars = self.history.get(symbol)?;
        let visible = upto(bars, as_of);
        let scanner = PatternScanner::new(params.scan_config()).ok()?;
        let flags = regime::detect(visible, &params.regime);
        let matches = match scanner.scan_latest(visible) {
            Ok(m) => m,
            Err(e) => {
                logging::log(
                    Level::Trace,
                    Domain::Scan,
                    "signal_unavailable",
                    obj(&[("symbol", v_str(symbol)), ("as_of", v_num(as_of as f64)), ("reason", v_str(&e.to_string()))]),
                );
                return None;
            }
        };
        Some(signal_from_outlook(AnalogOutlook::from_matches(&matches).as_ref(), flags))
    }
}

/// Pre-computed signals; lookups return the latest entry at or before `as_of`.
#[derive(Debug, Clone, Default)]
pub struct StaticSignals {
    series: HashMap<String, BTreeMap<u64, Signal>>,
}

impl StaticSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, ts: u64, signal: Signal) {
        self.series.entry(symbol.to_string()).or_default().insert(ts, signal);
    }

    pub fn from_series(symbol: &str, points: impl IntoIterator<Item = (u64, Signal)>) -> Self {
        let mut s = Self::new();
        for (ts, sig) in points {
            s.insert(symbol, ts, sig);
        }
        s
    }
}

impl SignalSource for StaticSignals {
    fn signal(&self, symbol: &str, as_of: u64, _params: &SignalParams) -> Option<Signal> {
        self.series.get(symbol)?.range(..=as_of).next_back().map(|(_, s)| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_helpers() {
        assert_eq!(Direction::from_score(0.2), Direction::Long);
        assert_eq!(Direction::from_score(-0.2), Direction::Short);
        assert_eq!(Direction::from_score(0.0), Direction::Neutral);
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.sign(), -1.0);
    }

    #[test]
    fn test_signal_confidence_clamped() {
        assert_eq!(Signal::new(Direction::Long, 1.7).confidence, 1.0);
        assert_eq!(Signal::new(Direction::Long, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_params_with_validates() {
        let p = SignalParams::default();
        let q = p.with("window_len", 24.4).unwrap();
        assert_eq!(q.window_len, 24);
        assert_eq!(p.window_len, 30);
        assert!(p.with("top_k", 0.0).is_err());
        assert!(p.with("min_similarity", 120.0).is_err());
        assert!(p.with("nonsense", 1.0).is_err());
        assert_eq!(q.get("window_len"), Some(24.0));
    }

    #[test]
    fn test_static_signals_latest_at_or_before() {
        let src = StaticSignals::from_series(
            "X",
            vec![(10, Signal::new(Direction::Long, 0.8)), (20, Signal::new(Direction::Short, 0.7))],
        );
        let p = SignalParams::default();
        assert!(src.signal("X", 5, &p).is_none());
        assert_eq!(src.signal("X", 10, &p).map(|s| s.direction), Some(Direction::Long));
        assert_eq!(src.signal("X", 19, &p).map(|s| s.direction), Some(Direction::Long));
        assert_eq!(src.signal("X", 25, &p).map(|s| s.direction), Some(Direction::Short));
        assert!(src.signal("Y", 25, &p).is_none());
    }

    #[test]
    fn test_outlook_to_signal() {
        let o = AnalogOutlook {
            matches: 4,
            mean_similarity: 90.0,
            mean_terminal: -0.05,
            median_terminal: -0.04,
            hit_rate: 0.25,
            worst_drawdown: 0.1,
            best_excursion: 0.02,
        };
        let s = signal_from_outlook(Some(&o), RegimeFlags::default());
        assert_eq!(s.direction, Direction::Short);
        assert!((s.confidence - 0.675).abs() < 1e-12);
        assert_eq!(signal_from_outlook(None, RegimeFlags::default()).direction, Direction::Neutral);
    }

    #[test]
    fn test_analog_source_uses_only_past() {
        // repeating saw-tooth: every window has exact analogs
        let bars: Vec<PriceBar> = (0..400)
            .map(|i| PriceBar::flat("S", i as u64 * 86_400, 100.0 + (i % 40) as f64))
            .collect();
        let src = AnalogSignalSource::with_history("S", bars.into());
        let p = SignalParams { window_len: 20, aftermath_len: 10, ..Default::default() };
        // too little visible history for any window
        assert!(src.signal("S", 10 * 86_400, &p).is_none());
        let s = src.signal("S", 300 * 86_400, &p).unwrap();
        assert!(s.confidence > 0.5, "confidence {}", s.confidence);
        assert!(src.signal("missing", 300 * 86_400, &p).is_none());
    }
}
