//! Price history records and the CSV boundary.
//!
//! The engine consumes ascending `PriceBar` slices handed over by the
//! external price store. For offline runs the binaries load the same shape
//! from CSV (`ts,open,high,low,close[,volume]`, epoch seconds).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{EngineError, EngineResult};

pub const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub timeframe: String,
    pub ts: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

impl PriceBar {
    /// Daily bar with open/high/low all equal to close.
    pub fn flat(symbol: &str, ts: u64, close: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe: "1d".to_string(),
            ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: None,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

pub fn parse_csv_line(symbol: &str, timeframe: &str, line: &str) -> Result<PriceBar> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 5 {
        return Err(anyhow!("expected 5+ columns, got {}", parts.len()));
    }
    let volume = match parts.get(5).map(|p| p.trim()) {
        Some(v) if !v.is_empty() => Some(v.parse()?),
        _ => None,
    };
    Ok(PriceBar {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        ts: parts[0].trim().parse()?,
        open: parts[1].trim().parse()?,
        high: parts[2].trim().parse()?,
        low: parts[3].trim().parse()?,
        close: parts[4].trim().parse()?,
        volume,
    })
}

/// Load a CSV file into ascending bars. Header, comment and unparseable
/// lines are skipped; duplicate timestamps keep the first occurrence.
pub fn load_csv(path: &Path, symbol: &str, timeframe: &str) -> Result<Vec<PriceBar>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut bars: Vec<PriceBar> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.to_lowercase().starts_with("ts"))
        .filter_map(|l| parse_csv_line(symbol, timeframe, l).ok())
        .filter(PriceBar::is_finite)
        .collect();
    bars.sort_by_key(|b| b.ts);
    bars.dedup_by_key(|b| b.ts);
    Ok(bars)
}

/// Bars must be strictly ascending by timestamp with finite prices.
pub fn validate_bars(bars: &[PriceBar]) -> EngineResult<()> {
    for (i, bar) in bars.iter().enumerate() {
        if !bar.is_finite() {
            return Err(EngineError::invalid_input(format!("non-finite price at index {}", i)));
        }
        if i > 0 && bar.ts <= bars[i - 1].ts {
            return Err(EngineError::invalid_input(format!(
                "bars not ascending at index {} ({} <= {})",
                i,
                bar.ts,
                bars[i - 1].ts
            )));
        }
    }
    Ok(())
}

pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

/// Sub-slice with `from <= ts < to`.
pub fn slice_range(bars: &[PriceBar], from: u64, to: u64) -> &[PriceBar] {
    let start = bars.partition_point(|b| b.ts < from);
    let end = bars.partition_point(|b| b.ts < to).max(start);
    &bars[start..end]
}

/// Bars known at `as_of` (inclusive).
pub fn upto(bars: &[PriceBar], as_of: u64) -> &[PriceBar] {
    let end = bars.partition_point(|b| b.ts <= as_of);
    &bars[..end]
}

/// SHA-256 over the (ts, close) pairs; identifies the history a result came from.
pub fn history_fingerprint(bars: &[PriceBar]) -> String {
    let mut hasher = Sha256::new();
    for bar in bars {
        hasher.update(bar.ts.to_le_bytes());
        hasher.update(bar.close.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn ts_to_date(ts: u64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(ts as i64, 0).map(|dt| dt.date_naive())
}

pub fn format_date(ts: u64) -> String {
    ts_to_date(ts)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Parse `YYYY-MM-DD` into epoch seconds at midnight UTC.
pub fn parse_date_ts(s: &str) -> EngineResult<u64> {
    let date = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::invalid_input(format!("bad date '{}': {}", s, e)))?;
    let ts = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or_else(|| EngineError::invalid_input(format!("bad date '{}'", s)))?;
    if ts < 0 {
        return Err(EngineError::invalid_input(format!("date before epoch: {}", s)));
    }
    Ok(ts as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_csv_line_valid() {
        let bar = parse_csv_line("SPX", "1d", "86400,1,2,0.5,1.5,1000").unwrap();
        assert_eq!(bar.ts, 86_400);
        assert_eq!(bar.close, 1.5);
        assert_eq!(bar.volume, Some(1000.0));
    }

    #[test]
    fn test_parse_csv_line_without_volume() {
        let bar = parse_csv_line("SPX", "1d", "86400,1,2,0.5,1.5").unwrap();
        assert_eq!(bar.volume, None);
    }

    #[test]
    fn test_parse_csv_line_rejects_short_rows() {
        assert!(parse_csv_line("SPX", "1d", "86400,1,2").is_err());
    }

    #[test]
    fn test_load_csv_sorts_and_skips_noise() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "ts,open,high,low,close,volume").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "172800,2,2,2,2,10").unwrap();
        writeln!(file, "86400,1,1,1,1,10").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file, "86400,9,9,9,9,10").unwrap();
        let bars = load_csv(file.path(), "SPX", "1d").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ts, 86_400);
        assert_eq!(bars[0].close, 1.0);
        assert!(validate_bars(&bars).is_ok());
    }

    #[test]
    fn test_validate_rejects_descending() {
        let bars = vec![PriceBar::flat("X", 10, 1.0), PriceBar::flat("X", 5, 1.0)];
        assert!(validate_bars(&bars).is_err());
    }

    #[test]
    fn test_slice_range_and_upto() {
        let bars: Vec<PriceBar> = (0..10).map(|i| PriceBar::flat("X", i * 10, 1.0)).collect();
        assert_eq!(slice_range(&bars, 20, 50).len(), 3);
        assert_eq!(slice_range(&bars, 50, 20).len(), 0);
        assert_eq!(upto(&bars, 45).len(), 5);
        assert_eq!(upto(&bars, 40).len(), 5);
    }

    #[test]
    fn test_dates_round_trip() {
        let ts = parse_date_ts("2008-09-15").unwrap();
        assert_eq!(format_date(ts), "2008-09-15");
        assert!(parse_date_ts("2008-13-40").is_err());
    }

    #[test]
    fn test_fingerprint_changes_with_prices() {
        let a = vec![PriceBar::flat("X", 1, 1.0)];
        let b = vec![PriceBar::flat("X", 1, 1.5)];
        assert_eq!(history_fingerprint(&a), history_fingerprint(&a));
        assert_ne!(history_fingerprint(&a), history_fingerprint(&b));
        assert_eq!(history_fingerprint(&a).len(), 64);
    }
}
