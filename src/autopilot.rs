//! Adaptive maintenance loop run inside a simulation.
//!
//! Every `interval_steps` ticks the loop classifies drift from the current
//! drawdown and updates its counters: retrains are scheduled after a streak
//! of DEGRADED cycles and promoted once the system recovers, rollbacks fire
//! after confirmed CRITICAL cycles, and the prediction horizon follows drift
//! status subject to hysteresis.
//!
//! This is bookkeeping only. Nothing here changes how the simulator trades.

use serde::{Deserialize, Serialize};

use crate::config::AutopilotConfig;
use crate::logging::{self, obj, v_num, v_str, Domain, Level};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DriftStatus {
    Ok,
    Warn,
    Degraded,
    Critical,
}

impl DriftStatus {
    pub fn classify(drawdown: f64, cfg: &AutopilotConfig) -> Self {
        if drawdown >= cfg.critical_drawdown {
            DriftStatus::Critical
        } else if drawdown >= cfg.degraded_drawdown {
            DriftStatus::Degraded
        } else if drawdown >= cfg.warn_drawdown {
            DriftStatus::Warn
        } else {
            DriftStatus::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Ok => "OK",
            DriftStatus::Warn => "WARN",
            DriftStatus::Degraded => "DEGRADED",
            DriftStatus::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutopilotEvent {
    RetrainScheduled { step: u64 },
    RetrainPromoted { step: u64 },
    Rollback { step: u64 },
    HorizonChanged { step: u64, from: u32, to: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutopilotCounters {
    pub cycles: u64,
    pub warn_cycles: u64,
    pub degraded_cycles: u64,
    pub critical_cycles: u64,
    pub retrains_scheduled: u64,
    pub retrains_promoted: u64,
    pub rollbacks: u64,
    pub horizon_changes: u64,
    pub pending_retrain: bool,
    pub current_horizon: u32,
}

#[derive(Debug, Clone)]
pub struct Autopilot {
    cfg: AutopilotConfig,
    horizons: Vec<u32>,
    counters: AutopilotCounters,
    degraded_streak: u32,
    critical_streak: u32,
    last_retrain: Option<u64>,
    last_rollback: Option<u64>,
    last_horizon_change: Option<u64>,
}

fn elapsed(since: Option<u64>, now: u64, min: u32) -> bool {
    since.map_or(true, |s| now.saturating_sub(s) >= min as u64)
}

impl Autopilot {
    pub fn new(cfg: &AutopilotConfig) -> Self {
        let mut horizons = cfg.horizons.clone();
        horizons.sort_unstable();
        horizons.dedup();
        let current_horizon = horizons.last().copied().unwrap_or(0);
        Self {
            cfg: cfg.clone(),
            horizons,
            counters: AutopilotCounters { current_horizon, ..Default::default() },
            degraded_streak: 0,
            critical_streak: 0,
            last_retrain: None,
            last_rollback: None,
            last_horizon_change: None,
        }
    }

    pub fn counters(&self) -> &AutopilotCounters {
        &self.counters
    }

    pub fn is_cycle(&self, step: u64) -> bool {
        self.cfg.enabled && step > 0 && step % self.cfg.interval_steps.max(1) as u64 == 0
    }

    /// Called once per tick; runs a maintenance cycle when due.
    pub fn on_step(&mut self, step: u64, drawdown: f64) -> Vec<AutopilotEvent> {
        if !self.is_cycle(step) {
            return Vec::new();
        }
        self.cycle(step, drawdown)
    }

    fn cycle(&mut self, step: u64, drawdown: f64) -> Vec<AutopilotEvent> {
        let status = DriftStatus::classify(drawdown, &self.cfg);
        let mut events = Vec::new();
        self.counters.cycles += 1;
        match status {
            DriftStatus::Ok => {}
            DriftStatus::Warn => self.counters.warn_cycles += 1,
            DriftStatus::Degraded => self.counters.degraded_cycles += 1,
            DriftStatus::Critical => self.counters.critical_cycles += 1,
        }

        // retrain
        if status == DriftStatus::Degraded {
            self.degraded_streak += 1;
            if self.degraded_streak >= self.cfg.retrain_after
                && !self.counters.pending_retrain
                && elapsed(self.last_retrain, step, self.cfg.min_retrain_interval_steps)
            {
                self.counters.pending_retrain = true;
                self.counters.retrains_scheduled += 1;
                self.last_retrain = Some(step);
                self.degraded_streak = 0;
                events.push(AutopilotEvent::RetrainScheduled { step });
            }
        } else {
            self.degraded_streak = 0;
            if self.counters.pending_retrain && status < DriftStatus::Degraded {
                self.counters.pending_retrain = false;
                self.counters.retrains_promoted += 1;
                events.push(AutopilotEvent::RetrainPromoted { step });
            }
        }

        // rollback
        if status == DriftStatus::Critical {
            self.critical_streak += 1;
            if self.critical_streak >= self.cfg.rollback_confirmations
                && elapsed(self.last_rollback, step, self.cfg.rollback_cooldown_steps)
            {
                self.counters.rollbacks += 1;
                self.counters.pending_retrain = false;
                self.last_rollback = Some(step);
                self.critical_streak = 0;
                events.push(AutopilotEvent::Rollback { step });
            }
        } else {
            self.critical_streak = 0;
        }

        // horizon
        if let Some(target) = self.target_horizon(status) {
            let from = self.counters.current_horizon;
            if target != from && elapsed(self.last_horizon_change, step, self.cfg.horizon_hysteresis_steps) {
                self.counters.current_horizon = target;
                self.counters.horizon_changes += 1;
                self.last_horizon_change = Some(step);
                events.push(AutopilotEvent::HorizonChanged { step, from, to: target });
            }
        }

        logging::log(
            Level::Debug,
            Domain::Autopilot,
            "cycle",
            obj(&[
                ("step", json!(step)),
                ("status", v_str(status.as_str())),
                ("drawdown", v_num(drawdown)),
                ("events", json!(events.len())),
            ]),
        );
        events
    }

    /// Healthy runs use the longest horizon, stressed runs the shortest.
    fn target_horizon(&self, status: DriftStatus) -> Option<u32> {
        let n = self.horizons.len();
        if n == 0 {
            return None;
        }
        let idx = match status {
            DriftStatus::Ok => n - 1,
            DriftStatus::Warn => n / 2,
            DriftStatus::Degraded | DriftStatus::Critical => 0,
        };
        self.horizons.get(idx).copied()
    }
}
