//! Sliding-window analog scanner.
//!
//! For a query window of length W, every historical window of the same
//! length is normalized and scored; windows at or above the similarity
//! threshold are paired with the A bars that follow them ("aftermath").
//! The most recent `exclude_recent` bars never serve as candidates so the
//! query cannot match itself or its immediate neighbourhood.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::data::{format_date, ts_to_date, PriceBar};
use crate::error::{EngineError, EngineResult};
use crate::logging::{self, ProfileScope};
use crate::normalize::normalize;
use crate::similarity::{composite_from, pearson, rmse, SimilarityWeights};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub window_len: usize,
    pub aftermath_len: usize,
    pub top_k: usize,
    pub min_similarity: f64,
    pub exclude_recent: usize,
    /// Minimum distance between accepted window starts; 0 keeps overlapping matches.
    pub min_gap_bars: usize,
    pub weights: SimilarityWeights,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            window_len: 30,
            aftermath_len: 20,
            top_k: 10,
            min_similarity: 70.0,
            exclude_recent: 30,
            min_gap_bars: 0,
            weights: SimilarityWeights::default(),
        }
    }
}

impl ScanConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            window_len: std::env::var("SCAN_WINDOW").ok().and_then(|v| v.parse().ok()).unwrap_or(d.window_len),
            aftermath_len: std::env::var("SCAN_AFTERMATH").ok().and_then(|v| v.parse().ok()).unwrap_or(d.aftermath_len),
            top_k: std::env::var("SCAN_TOP_K").ok().and_then(|v| v.parse().ok()).unwrap_or(d.top_k),
            min_similarity: std::env::var("SCAN_MIN_SIM").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_similarity),
            exclude_recent: std::env::var("SCAN_EXCLUDE_RECENT").ok().and_then(|v| v.parse().ok()).unwrap_or(d.exclude_recent),
            min_gap_bars: std::env::var("SCAN_MIN_GAP").ok().and_then(|v| v.parse().ok()).unwrap_or(d.min_gap_bars),
            weights: d.weights,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.window_len < 2 {
            return Err(EngineError::invalid_config("window_len must be >= 2"));
        }
        if self.aftermath_len == 0 {
            return Err(EngineError::invalid_config("aftermath_len must be >= 1"));
        }
        if self.top_k == 0 {
            return Err(EngineError::invalid_config("top_k must be >= 1"));
        }
        if !(0.0..=100.0).contains(&self.min_similarity) {
            return Err(EngineError::invalid_config("min_similarity must be within [0, 100]"));
        }
        Ok(())
    }

    /// Bars required before any candidate can exist.
    pub fn min_history(&self) -> usize {
        self.window_len + self.aftermath_len + self.exclude_recent
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    /// Anchor date (window end), `YYYY-MM-DD`.
    pub id: String,
    pub anchor_ts: u64,
    pub window_start: usize,
    pub similarity: f64,
    pub correlation: f64,
    pub window_series: Vec<f64>,
    pub aftermath_series: Vec<f64>,
    pub terminal_return: f64,
    /// Largest adverse move below the window's end close, as a positive fraction.
    pub max_drawdown: f64,
    /// Largest favorable move above the window's end close.
    pub max_excursion: f64,
    pub cohort_tag: String,
}

/// Outcome statistics aggregated over a match set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalogOutlook {
    pub matches: usize,
    pub mean_similarity: f64,
    pub mean_terminal: f64,
    pub median_terminal: f64,
    pub hit_rate: f64,
    pub worst_drawdown: f64,
    pub best_excursion: f64,
}

impl AnalogOutlook {
    pub fn from_matches(matches: &[MatchCandidate]) -> Option<Self> {
        if matches.is_empty() {
            return None;
        }
        let n = matches.len() as f64;
        let mut terminals: Vec<f64> = matches.iter().map(|m| m.terminal_return).collect();
        terminals.sort_by(|a, b| a.total_cmp(b));
        let mid = terminals.len() / 2;
        let median_terminal = if terminals.len() % 2 == 0 {
            (terminals[mid - 1] + terminals[mid]) / 2.0
        } else {
            terminals[mid]
        };
        Some(Self {
            matches: matches.len(),
            mean_similarity: matches.iter().map(|m| m.similarity).sum::<f64>() / n,
            mean_terminal: terminals.iter().sum::<f64>() / n,
            median_terminal,
            hit_rate: matches.iter().filter(|m| m.terminal_return > 0.0).count() as f64 / n,
            worst_drawdown: matches.iter().map(|m| m.max_drawdown).fold(0.0, f64::max),
            best_excursion: matches.iter().map(|m| m.max_excursion).fold(0.0, f64::max),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PatternScanner {
    cfg: ScanConfig,
}

impl PatternScanner {
    pub fn new(cfg: ScanConfig) -> EngineResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.cfg
    }

    /// Scan `history` for analogs of `current` (raw prices, length W).
    ///
    /// Short history is not an error: the result is simply empty.
    pub fn scan(&self, current: &[f64], history: &[PriceBar]) -> EngineResult<Vec<MatchCandidate>> {
        let _p = ProfileScope::new("scan");
        let cfg = &self.cfg;
        if current.len() != cfg.window_len {
            return Err(EngineError::invalid_input(format!(
                "query window has {} points, expected {}",
                current.len(),
                cfg.window_len
            )));
        }
        let query = normalize(current)?;
        if history.len() < cfg.min_history() {
            return Ok(Vec::new());
        }

        let closes: Vec<f64> = history.iter().map(|b| b.close).collect();
        let last_end = history.len() - cfg.exclude_recent - cfg.aftermath_len;
        let mut candidates = Vec::new();
        let mut scored = 0usize;

        for end in cfg.window_len..=last_end {
            let start = end - cfg.window_len;
            let Ok(window) = normalize(&closes[start..end]) else {
                continue;
            };
            scored += 1;
            let err = rmse(&query.values, &window.values);
            let corr = pearson(&query.values, &window.values);
            let sim = composite_from(err, corr, &cfg.weights);
            if sim < cfg.min_similarity {
                continue;
            }
            let anchor_close = closes[end - 1];
            let aftermath = &closes[end..end + cfg.aftermath_len];
            if anchor_close <= 0.0 || aftermath.iter().any(|p| !p.is_finite()) {
                continue;
            }
            let rel: Vec<f64> = aftermath.iter().map(|p| p / anchor_close - 1.0).collect();
            let terminal_return = rel.last().copied().unwrap_or(0.0);
            let max_drawdown = rel.iter().fold(0.0_f64, |acc, r| acc.max(-r));
            let max_excursion = rel.iter().fold(0.0_f64, |acc, r| acc.max(*r));
            let anchor_ts = history[end - 1].ts;
            candidates.push(MatchCandidate {
                id: format_date(anchor_ts),
                anchor_ts,
                window_start: start,
                similarity: sim,
                correlation: corr,
                window_series: window.values,
                aftermath_series: rel,
                terminal_return,
                max_drawdown,
                max_excursion,
                cohort_tag: cohort_tag(anchor_ts),
            });
        }

        // stable: equal scores keep the earlier anchor first
        candidates.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        let kept = self.select(candidates);

        logging::log_scan_summary(
            history.first().map(|b| b.symbol.as_str()).unwrap_or(""),
            scored,
            kept.len(),
            kept.first().map(|m| m.similarity).unwrap_or(0.0),
        );
        Ok(kept)
    }

    /// Use the last W closes of `history` as the query.
    pub fn scan_latest(&self, history: &[PriceBar]) -> EngineResult<Vec<MatchCandidate>> {
        if history.len() < self.cfg.window_len {
            return Err(EngineError::InsufficientData {
                need: self.cfg.window_len,
                got: history.len(),
            });
        }
        let current: Vec<f64> = history[history.len() - self.cfg.window_len..]
            .iter()
            .map(|b| b.close)
            .collect();
        self.scan(&current, history)
    }

    fn select(&self, sorted: Vec<MatchCandidate>) -> Vec<MatchCandidate> {
        let gap = self.cfg.min_gap_bars;
        let mut kept: Vec<MatchCandidate> = Vec::with_capacity(self.cfg.top_k);
        for cand in sorted {
            if kept.len() >= self.cfg.top_k {
                break;
            }
            if gap > 0 && kept.iter().any(|k| k.window_start.abs_diff(cand.window_start) < gap) {
                continue;
            }
            kept.push(cand);
        }
        kept
    }
}

fn cohort_tag(ts: u64) -> String {
    match ts_to_date(ts) {
        Some(d) => format!("{}s", d.year() / 10 * 10),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SECS_PER_DAY;

    const DAY0: u64 = 946_684_800; // 2000-01-01

    fn bars_from(closes: &[f64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar::flat("TEST", DAY0 + i as u64 * SECS_PER_DAY, *c))
            .collect()
    }

    fn small_cfg() -> ScanConfig {
        ScanConfig {
            window_len: 5,
            aftermath_len: 3,
            top_k: 3,
            min_similarity: 90.0,
            exclude_recent: 5,
            ..ScanConfig::default()
        }
    }

    #[test]
    fn test_short_history_returns_empty() {
        let scanner = PatternScanner::new(small_cfg()).unwrap();
        let history = bars_from(&[1.0; 12]);
        let out = scanner.scan(&[1.0, 1.0, 1.0, 1.0, 1.1], &history).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_rejects_wrong_query_length() {
        let scanner = PatternScanner::new(small_cfg()).unwrap();
        let history = bars_from(&[1.0; 40]);
        assert!(matches!(
            scanner.scan(&[1.0, 2.0], &history),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let cfg = ScanConfig { window_len: 1, ..small_cfg() };
        assert!(matches!(PatternScanner::new(cfg), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_aftermath_stats_relative_to_window_end() {
        let mut closes = vec![100.0; 40];
        // pattern at 10..15 ends at 110, then 121, 99, 115.5
        closes[10..15].copy_from_slice(&[100.0, 102.0, 104.0, 106.0, 110.0]);
        closes[15..18].copy_from_slice(&[121.0, 99.0, 115.5]);
        let scanner = PatternScanner::new(small_cfg()).unwrap();
        let history = bars_from(&closes);
        let out = scanner.scan(&[50.0, 51.0, 52.0, 53.0, 55.0], &history).unwrap();
        let m = out.iter().find(|m| m.window_start == 10).expect("pattern found");
        assert!(m.similarity > 99.0);
        assert!((m.terminal_return - 0.05).abs() < 1e-9);
        assert!((m.max_drawdown - 0.10).abs() < 1e-9);
        assert!((m.max_excursion - 0.10).abs() < 1e-9);
        assert_eq!(m.aftermath_series.len(), 3);
        assert_eq!(m.cohort_tag, "2000s");
        assert_eq!(m.id, "2000-01-15");
    }

    #[test]
    fn test_aftermath_never_overlaps_window_or_recent() {
        let closes: Vec<f64> = (0..200).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let history = bars_from(&closes);
        let cfg = ScanConfig { min_similarity: 0.0, top_k: 1000, ..small_cfg() };
        let scanner = PatternScanner::new(cfg.clone()).unwrap();
        let out = scanner.scan_latest(&history).unwrap();
        assert!(!out.is_empty());
        for m in &out {
            let end = m.window_start + cfg.window_len;
            let anchor_idx = end - 1;
            assert_eq!(history[anchor_idx].ts, m.anchor_ts);
            assert!(end + cfg.aftermath_len <= history.len() - cfg.exclude_recent);
        }
    }

    #[test]
    fn test_sorted_and_truncated() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + (i as f64 * 0.2).sin() * 3.0).collect();
        let history = bars_from(&closes);
        let cfg = ScanConfig { min_similarity: 0.0, top_k: 7, ..small_cfg() };
        let scanner = PatternScanner::new(cfg).unwrap();
        let out = scanner.scan_latest(&history).unwrap();
        assert_eq!(out.len(), 7);
        for pair in out.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn test_min_gap_suppresses_neighbours() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + (i as f64 * 0.2).sin() * 3.0).collect();
        let history = bars_from(&closes);
        let cfg = ScanConfig { min_similarity: 0.0, top_k: 5, min_gap_bars: 10, ..small_cfg() };
        let out = PatternScanner::new(cfg).unwrap().scan_latest(&history).unwrap();
        for (i, a) in out.iter().enumerate() {
            for b in &out[i + 1..] {
                assert!(a.window_start.abs_diff(b.window_start) >= 10);
            }
        }
    }

    #[test]
    fn test_outlook_aggregates() {
        let mk = |t: f64| MatchCandidate {
            id: String::new(),
            anchor_ts: 0,
            window_start: 0,
            similarity: 80.0,
            correlation: 0.9,
            window_series: vec![],
            aftermath_series: vec![],
            terminal_return: t,
            max_drawdown: (-t).max(0.0),
            max_excursion: t.max(0.0),
            cohort_tag: String::new(),
        };
        let o = AnalogOutlook::from_matches(&[mk(0.1), mk(-0.05), mk(0.02), mk(0.04)]).unwrap();
        assert_eq!(o.matches, 4);
        assert!((o.hit_rate - 0.75).abs() < 1e-12);
        assert!((o.median_terminal - 0.03).abs() < 1e-12);
        assert!((o.worst_drawdown - 0.05).abs() < 1e-12);
        assert!(AnalogOutlook::from_matches(&[]).is_none());
    }
}
