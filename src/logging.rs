//! Structured logging for the analysis engine.
//!
//! Every record is a single JSON line on stderr carrying a run id, a
//! monotonically increasing sequence number, level, domain and a `data`
//! object. The engine never writes log files itself; callers redirect
//! stderr wherever they keep run artifacts.
//!
//! Filtering:
//! - `LOG_LEVEL`   trace | debug | info | warn | error | fatal (default info)
//! - `LOG_DOMAINS` comma separated domain list or `all` (default all)
//! - `RUN_ID`      overrides the generated run id

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::io::Write;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Scan,       // Pattern scanning, analog outlooks
    Cluster,    // DBSCAN runs, labels
    Sim,        // Simulation lifecycle, trades
    Risk,       // Kill switches, gates, guards
    Autopilot,  // Drift / retrain / rollback bookkeeping
    Validation, // OOS gate, walk-forward, sweeps
    Batch,      // Worker pool, cancellation
    System,     // Startup, data loading
    Profile,    // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Scan => "scan",
            Domain::Cluster => "cluster",
            Domain::Sim => "sim",
            Domain::Risk => "risk",
            Domain::Autopilot => "autopilot",
            Domain::Validation => "validation",
            Domain::Batch => "batch",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match &filter().domains {
            None => true,
            Some(list) => list.iter().any(|d| d == self.as_str()),
        }
    }
}

// =============================================================================
// Process-wide context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_ID: OnceLock<String> = OnceLock::new();
static FILTER: OnceLock<Filter> = OnceLock::new();

struct Filter {
    min_level: Level,
    domains: Option<Vec<String>>,
}

fn filter() -> &'static Filter {
    FILTER.get_or_init(|| Filter {
        min_level: Level::from_env(),
        domains: match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => None,
            Ok(list) => Some(list.split(',').map(|d| d.trim().to_string()).collect()),
        },
    })
}

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

pub fn run_id() -> &'static str {
    RUN_ID.get_or_init(|| {
        std::env::var("RUN_ID").unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()))
    })
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn enabled(level: Level, domain: Domain) -> bool {
    level >= filter().min_level && domain.is_enabled()
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if !enabled(level, domain) {
        return;
    }
    let line = render(level, domain, event, fields);
    let stderr = std::io::stderr();
    let mut lock = stderr.lock();
    let _ = writeln!(lock, "{}", line);
}

fn render(level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) -> String {
    let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(run_id()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for key in ["symbol", "split", "config_hash"] {
        if let Some(value) = fields.remove(key) {
            entry.insert(key.to_string(), value);
        }
    }
    entry.insert("data".to_string(), Value::Object(fields));
    Value::Object(entry).to_string()
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_scan_summary(symbol: &str, candidates: usize, kept: usize, best: f64) {
    log(
        Level::Debug,
        Domain::Scan,
        "scan_complete",
        obj(&[
            ("symbol", v_str(symbol)),
            ("candidates", json!(candidates)),
            ("kept", json!(kept)),
            ("best_similarity", v_num(best)),
        ]),
    );
}

pub fn log_risk_trigger(check: &str, step: u64, value: f64, threshold: f64) {
    log(
        Level::Debug,
        Domain::Risk,
        "guard",
        obj(&[
            ("check", v_str(check)),
            ("step", json!(step)),
            ("value", v_num(value)),
            ("threshold", v_num(threshold)),
        ]),
    );
}

pub fn log_unit_failure(protocol: &str, unit: &str, error: &str) {
    log(
        Level::Warn,
        Domain::Validation,
        "unit_failed",
        obj(&[
            ("protocol", v_str(protocol)),
            ("unit", v_str(unit)),
            ("error", v_str(error)),
        ]),
    );
}

pub fn log_verdict(split: &str, pass: bool, reasons: &[String]) {
    log(
        Level::Info,
        Domain::Validation,
        "verdict",
        obj(&[
            ("split", v_str(split)),
            ("pass", Value::Bool(pass)),
            (
                "reasons",
                Value::Array(reasons.iter().map(|r| v_str(r)).collect()),
            ),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

/// Non-finite numbers render as null rather than failing serialization.
pub fn v_num(n: f64) -> Value {
    if n.is_finite() {
        json!(n)
    } else {
        Value::Null
    }
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Profiling scope that emits structured timing on drop.
pub struct ProfileScope {
    label: &'static str,
    context: Option<Map<String, Value>>,
    started: Instant,
    enabled: bool,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            context: None,
            started: Instant::now(),
            enabled: enabled(Level::Trace, Domain::Profile),
        }
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let enabled = enabled(Level::Trace, Domain::Profile);
        Self {
            label,
            context: if enabled { Some(obj(fields)) } else { None },
            started: Instant::now(),
            enabled,
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = self.context.take().unwrap_or_default();
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_non_finite_numbers_become_null() {
        assert_eq!(v_num(f64::NAN), Value::Null);
        assert_eq!(v_num(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_render_hoists_top_level_keys() {
        let line = render(
            Level::Info,
            Domain::Validation,
            "verdict",
            obj(&[("split", v_str("gfc")), ("msg", v_str("hello")), ("x", v_num(1.0))]),
        );
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["split"], "gfc");
        assert_eq!(parsed["msg"], "hello");
        assert_eq!(parsed["component"], "validation");
        assert_eq!(parsed["lvl"], "INFO");
        assert_eq!(parsed["data"]["x"], 1.0);
        assert!(parsed["data"].get("split").is_none());
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
