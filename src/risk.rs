//! Risk gates: drawdown kill switches and the entry sizing chain.
//!
//! The engine is stateful across one simulation: it remembers whether the
//! soft kill already fired in the current drawdown episode and keeps the
//! smoothed signal entropy. An episode ends when equity sets a new peak.

use serde::Serialize;

use crate::config::{ConfidenceGate, EntropyGuard, SimulationConfig};
use crate::logging;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KillAction {
    None,
    /// Halve the open position.
    Soft,
    /// Close everything and enter the extended cooldown.
    Hard,
}

/// Normalized binary entropy of `p` in bits; 1.0 at p = 0.5, 0.0 at 0 or 1.
pub fn binary_entropy(p: f64) -> f64 {
    if !p.is_finite() {
        return 1.0;
    }
    let p = p.clamp(0.0, 1.0);
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    let q = 1.0 - p;
    -(p * p.log2() + q * q.log2())
}

/// `1 - dd / hard`, clamped to [0, 1].
pub fn drawdown_multiplier(drawdown: f64, hard: f64) -> f64 {
    if hard <= 0.0 || !drawdown.is_finite() {
        return 0.0;
    }
    (1.0 - drawdown / hard).clamp(0.0, 1.0)
}

impl ConfidenceGate {
    /// Exposure scale for `confidence`, or `None` when the gate blocks.
    /// Monotonic non-decreasing in confidence.
    pub fn scale(&self, confidence: f64) -> Option<f64> {
        if !confidence.is_finite() || confidence < self.min_confidence {
            return None;
        }
        let span = 1.0 - self.min_confidence;
        let t = if span > 1e-12 { (confidence - self.min_confidence) / span } else { 1.0 };
        Some(self.min_scale + (self.max_scale - self.min_scale) * t.clamp(0.0, 1.0))
    }
}

impl EntropyGuard {
    /// Scale for a smoothed entropy: 1 below `warn`, linear down to
    /// `min_scale` at `hard`, and 0 (block) at or above `hard`.
    pub fn scale(&self, entropy: f64) -> f64 {
        if !self.enabled {
            return 1.0;
        }
        if entropy >= self.hard {
            return 0.0;
        }
        if entropy <= self.warn {
            return 1.0;
        }
        let t = (entropy - self.warn) / (self.hard - self.warn);
        1.0 - (1.0 - self.min_scale) * t
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EntryDecision {
    pub exposure: f64,
    pub gate_scale: f64,
    pub entropy_scale: f64,
    pub dd_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    soft_drawdown: f64,
    hard_drawdown: f64,
    min_dd_multiplier: f64,
    base_exposure: f64,
    gate: ConfidenceGate,
    entropy: EntropyGuard,
    soft_fired: bool,
    hard_kills: u32,
    smoothed_entropy: Option<f64>,
}

impl RiskEngine {
    pub fn new(cfg: &SimulationConfig) -> Self {
        Self {
            soft_drawdown: cfg.soft_drawdown,
            hard_drawdown: cfg.hard_drawdown,
            min_dd_multiplier: cfg.min_drawdown_multiplier,
            base_exposure: cfg.base_exposure,
            gate: cfg.gate.clone(),
            entropy: cfg.entropy.clone(),
            soft_fired: false,
            hard_kills: 0,
            smoothed_entropy: None,
        }
    }

    /// Kill decision for the current drawdown. `holding` gates the soft kill
    /// since halving a flat book is meaningless.
    pub fn assess_drawdown(&mut self, drawdown: f64, holding: bool, step: u64) -> KillAction {
        if drawdown <= 0.0 {
            self.soft_fired = false;
            return KillAction::None;
        }
        if drawdown >= self.hard_drawdown {
            if !holding {
                return KillAction::None;
            }
            self.hard_kills += 1;
            logging::log_risk_trigger("hard_kill", step, drawdown, self.hard_drawdown);
            return KillAction::Hard;
        }
        if drawdown >= self.soft_drawdown && holding && !self.soft_fired {
            self.soft_fired = true;
            logging::log_risk_trigger("soft_kill", step, drawdown, self.soft_drawdown);
            return KillAction::Soft;
        }
        KillAction::None
    }

    pub fn hard_kills(&self) -> u32 {
        self.hard_kills
    }

    /// Feed the latest signal confidence into the entropy smoother.
    pub fn observe_confidence(&mut self, confidence: f64) -> f64 {
        let raw = binary_entropy(confidence);
        let s = self.entropy.smoothing;
        let next = match self.smoothed_entropy {
            Some(prev) => s * prev + (1.0 - s) * raw,
            None => raw,
        };
        self.smoothed_entropy = Some(next);
        next
    }

    pub fn smoothed_entropy(&self) -> Option<f64> {
        self.smoothed_entropy
    }

    /// Sizing chain for a new entry. `Err` carries the name of the guard
    /// that blocked it.
    pub fn entry(&self, confidence: f64, drawdown: f64, step: u64) -> Result<EntryDecision, &'static str> {
        let dd_multiplier = drawdown_multiplier(drawdown, self.hard_drawdown);
        if dd_multiplier <= self.min_dd_multiplier {
            logging::log_risk_trigger("drawdown_floor", step, dd_multiplier, self.min_dd_multiplier);
            return Err("drawdown_floor");
        }
        let gate_scale = match self.gate.scale(confidence) {
            Some(s) => s,
            None => {
                logging::log_risk_trigger("confidence_gate", step, confidence, self.gate.min_confidence);
                return Err("confidence_gate");
            }
        };
        let entropy = self.smoothed_entropy.unwrap_or_else(|| binary_entropy(confidence));
        let entropy_scale = self.entropy.scale(entropy);
        if entropy_scale <= 0.0 {
            logging::log_risk_trigger("entropy_guard", step, entropy, self.entropy.hard);
            return Err("entropy_guard");
        }
        let exposure = self.base_exposure * gate_scale * entropy_scale * dd_multiplier;
        if exposure < self.gate.min_exposure {
            logging::log_risk_trigger("min_exposure", step, exposure, self.gate.min_exposure);
            return Err("min_exposure");
        }
        Ok(EntryDecision { exposure, gate_scale, entropy_scale, dd_multiplier })
    }
}
