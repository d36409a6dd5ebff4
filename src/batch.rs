//! Bounded worker pool for independent validation units.
//!
//! Units run on a dedicated rayon pool. A failing or panicking unit is
//! recorded and never aborts its siblings. Cancellation and the optional
//! deadline stop units that have not started yet; already running units
//! finish, so a canceled batch still returns every completed result.

use serde::Serialize;
use serde_json::json;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::config::HarnessConfig;
use crate::logging::{self, obj, v_str, Domain, Level, ProfileScope};

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum UnitOutcome<T> {
    Done(T),
    Failed(String),
    Canceled,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitResult<T> {
    pub name: String,
    pub outcome: UnitOutcome<T>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<T> {
    pub protocol: String,
    pub units: Vec<UnitResult<T>>,
    pub canceled: bool,
    pub timed_out: bool,
}

impl<T> BatchReport<T> {
    pub fn completed(&self) -> impl Iterator<Item = (&str, &T)> {
        self.units.iter().filter_map(|u| match &u.outcome {
            UnitOutcome::Done(v) => Some((u.name.as_str(), v)),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.units.iter().filter_map(|u| match &u.outcome {
            UnitOutcome::Failed(e) => Some((u.name.as_str(), e.as_str())),
            _ => None,
        })
    }

    pub fn completed_count(&self) -> usize {
        self.completed().count()
    }

    pub fn is_complete(&self) -> bool {
        !self.canceled && !self.timed_out
    }
}

pub struct BatchRunner {
    pool: rayon::ThreadPool,
    workers: usize,
    token: CancelToken,
    timeout: Option<Duration>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl BatchRunner {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("harness-{}", i))
            .build()
            .context("failed to build worker pool")?;
        Ok(Self { pool, workers, token: CancelToken::new(), timeout: None })
    }

    pub fn from_harness(cfg: &HarnessConfig) -> Result<Self> {
        let runner = Self::new(cfg.workers)?;
        Ok(match cfg.timeout_secs {
            Some(s) => runner.with_timeout(Duration::from_secs(s)),
            None => runner,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Evaluate `f` for every item; results keep the input order.
    pub fn map<I, T, L, F>(&self, protocol: &str, items: &[I], label: L, f: F) -> BatchReport<T>
    where
        I: Sync,
        T: Send,
        L: Fn(&I) -> String + Sync,
        F: Fn(&I) -> Result<T> + Sync,
    {
        let _p = ProfileScope::with_context("batch", &[("protocol", v_str(protocol))]);
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let timed_out = AtomicBool::new(false);
        let token = &self.token;

        let units: Vec<UnitResult<T>> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    let name = label(item);
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        timed_out.store(true, Ordering::SeqCst);
                        return UnitResult { name, outcome: UnitOutcome::Canceled, elapsed_ms: 0 };
                    }
                    if token.is_canceled() {
                        return UnitResult { name, outcome: UnitOutcome::Canceled, elapsed_ms: 0 };
                    }
                    let started = Instant::now();
                    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| f(item))) {
                        Ok(Ok(v)) => UnitOutcome::Done(v),
                        Ok(Err(e)) => UnitOutcome::Failed(format!("{:#}", e)),
                        Err(payload) => UnitOutcome::Failed(format!("panic: {}", panic_message(payload))),
                    };
                    if let UnitOutcome::Failed(e) = &outcome {
                        logging::log_unit_failure(protocol, &name, e);
                    }
                    UnitResult { name, outcome, elapsed_ms: started.elapsed().as_millis() as u64 }
                })
                .collect()
        });

        let report = BatchReport {
            protocol: protocol.to_string(),
            canceled: token.is_canceled(),
            timed_out: timed_out.load(Ordering::SeqCst),
            units,
        };
        logging::log(
            if report.is_complete() { Level::Info } else { Level::Warn },
            Domain::Batch,
            "batch_complete",
            obj(&[
                ("protocol", v_str(protocol)),
                ("units", json!(report.units.len())),
                ("completed", json!(report.completed_count())),
                ("failed", json!(report.failures().count())),
                ("canceled", json!(report.canceled)),
                ("timed_out", json!(report.timed_out)),
            ]),
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_results_keep_order_and_isolate_failures() {
        let runner = BatchRunner::new(3).unwrap();
        let items: Vec<u32> = (0..8).collect();
        let report = runner.map("test", &items, |i| format!("u{}", i), |&i| {
            if i == 3 {
                anyhow::bail!("unit {} broke", i);
            }
            Ok(i * 10)
        });
        assert_eq!(report.units.len(), 8);
        assert_eq!(report.units[2].name, "u2");
        assert_eq!(report.completed_count(), 7);
        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures, vec![("u3", "unit 3 broke")]);
        assert!(report.is_complete());
    }

    #[test]
    fn test_panic_becomes_failure() {
        let runner = BatchRunner::new(2).unwrap();
        let report = runner.map("test", &[1, 2], |i| i.to_string(), |&i| {
            if i == 2 {
                panic!("boom");
            }
            Ok(i)
        });
        assert_eq!(report.completed_count(), 1);
        assert!(report.failures().any(|(_, e)| e.contains("boom")));
    }

    #[test]
    fn test_cancel_returns_partial() {
        let runner = BatchRunner::new(1).unwrap();
        let token = runner.token();
        let ran = AtomicUsize::new(0);
        let items: Vec<u32> = (0..20).collect();
        let report = runner.map("test", &items, |i| i.to_string(), |&i| {
            ran.fetch_add(1, Ordering::SeqCst);
            if i == 4 {
                token.cancel();
            }
            Ok(i)
        });
        assert!(report.canceled);
        assert!(!report.is_complete());
        let done = report.completed_count();
        assert!(done >= 1 && done < 20, "done {}", done);
        assert_eq!(done, ran.load(Ordering::SeqCst));
        assert!(report.units.iter().any(|u| u.outcome == UnitOutcome::Canceled));
    }

    #[test]
    fn test_zero_timeout_cancels_everything() {
        let runner = BatchRunner::new(2).unwrap().with_timeout(Duration::from_secs(0));
        let report = runner.map("test", &[1, 2, 3], |i| i.to_string(), |&i| Ok(i));
        assert!(report.timed_out);
        assert_eq!(report.completed_count(), 0);
    }
}
