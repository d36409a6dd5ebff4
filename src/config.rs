//! Simulation and harness configuration.
//!
//! `SimulationConfig` is immutable per run. Variants are produced with
//! `apply(&ConfigPatch)`: every field set in the patch replaces the base
//! value, nested sections merge field by field, and the merged value is
//! validated before it is returned. Nothing is mutated in place.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Maps signal confidence to a block decision or an exposure scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceGate {
    /// Below this confidence entries are blocked outright.
    pub min_confidence: f64,
    /// Scale at `min_confidence`; rises linearly to `max_scale` at 1.0.
    pub min_scale: f64,
    pub max_scale: f64,
    /// Resulting exposure below this is treated as no trade.
    pub min_exposure: f64,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self { min_confidence: 0.55, min_scale: 0.25, max_scale: 1.0, min_exposure: 0.05 }
    }
}

/// Scales exposure down as the (smoothed) entropy of the signal rises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyGuard {
    pub enabled: bool,
    pub warn: f64,
    pub hard: f64,
    pub min_scale: f64,
    /// EMA weight on the previous smoothed value; 0 disables smoothing.
    pub smoothing: f64,
}

impl Default for EntropyGuard {
    fn default() -> Self {
        Self { enabled: true, warn: 0.90, hard: 0.99, min_scale: 0.30, smoothing: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutopilotConfig {
    pub enabled: bool,
    pub interval_steps: u32,
    pub warn_drawdown: f64,
    pub degraded_drawdown: f64,
    pub critical_drawdown: f64,
    /// Consecutive DEGRADED cycles before a retrain.
    pub retrain_after: u32,
    pub min_retrain_interval_steps: u32,
    /// Consecutive CRITICAL cycles before a rollback.
    pub rollback_confirmations: u32,
    pub rollback_cooldown_steps: u32,
    /// Candidate horizons, longest preferred when healthy.
    pub horizons: Vec<u32>,
    pub horizon_hysteresis_steps: u32,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_steps: 4,
            warn_drawdown: 0.05,
            degraded_drawdown: 0.10,
            critical_drawdown: 0.20,
            retrain_after: 2,
            min_retrain_interval_steps: 8,
            rollback_confirmations: 1,
            rollback_cooldown_steps: 12,
            horizons: vec![4, 8, 13],
            horizon_hysteresis_steps: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub initial_equity: f64,
    pub step_secs: u64,
    /// A bar counts for a tick when `tick <= bar.ts < tick + bar_tolerance_secs`.
    pub bar_tolerance_secs: u64,
    pub fee_bps: f64,
    pub slippage_bps: f64,
    pub spread_bps: f64,
    pub enter_threshold: f64,
    pub exit_threshold: f64,
    pub min_hold_steps: u32,
    pub max_hold_steps: u32,
    pub cooldown_steps: u32,
    pub hard_kill_cooldown_steps: u32,
    pub soft_drawdown: f64,
    pub hard_drawdown: f64,
    /// Loss from entry that triggers the intrabar stop; 0 disables it.
    pub position_stop_loss_pct: f64,
    pub allow_short: bool,
    pub base_exposure: f64,
    /// Entries need the drawdown multiplier strictly above this floor.
    pub min_drawdown_multiplier: f64,
    pub gate: ConfidenceGate,
    pub entropy: EntropyGuard,
    pub autopilot: AutopilotConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_equity: 1.0,
            step_secs: 7 * 86_400,
            bar_tolerance_secs: 86_400,
            fee_bps: 10.0,
            slippage_bps: 5.0,
            spread_bps: 5.0,
            enter_threshold: 0.60,
            exit_threshold: 0.45,
            min_hold_steps: 2,
            max_hold_steps: 26,
            cooldown_steps: 1,
            hard_kill_cooldown_steps: 8,
            soft_drawdown: 0.15,
            hard_drawdown: 0.30,
            position_stop_loss_pct: 0.10,
            allow_short: true,
            base_exposure: 1.0,
            min_drawdown_multiplier: 0.25,
            gate: ConfidenceGate::default(),
            entropy: EntropyGuard::default(),
            autopilot: AutopilotConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            initial_equity: env_or("SIM_INITIAL_EQUITY", d.initial_equity),
            step_secs: env_or("SIM_STEP_SECS", d.step_secs),
            bar_tolerance_secs: env_or("SIM_BAR_TOLERANCE_SECS", d.bar_tolerance_secs),
            fee_bps: env_or("SIM_FEE_BPS", d.fee_bps),
            slippage_bps: env_or("SIM_SLIPPAGE_BPS", d.slippage_bps),
            spread_bps: env_or("SIM_SPREAD_BPS", d.spread_bps),
            enter_threshold: env_or("SIM_ENTER_TH", d.enter_threshold),
            exit_threshold: env_or("SIM_EXIT_TH", d.exit_threshold),
            min_hold_steps: env_or("SIM_MIN_HOLD", d.min_hold_steps),
            max_hold_steps: env_or("SIM_MAX_HOLD", d.max_hold_steps),
            cooldown_steps: env_or("SIM_COOLDOWN", d.cooldown_steps),
            hard_kill_cooldown_steps: env_or("SIM_HARD_KILL_COOLDOWN", d.hard_kill_cooldown_steps),
            soft_drawdown: env_or("SIM_SOFT_DD", d.soft_drawdown),
            hard_drawdown: env_or("SIM_HARD_DD", d.hard_drawdown),
            position_stop_loss_pct: env_or("SIM_STOP_LOSS", d.position_stop_loss_pct),
            allow_short: env_flag("SIM_ALLOW_SHORT", d.allow_short),
            base_exposure: env_or("SIM_BASE_EXPOSURE", d.base_exposure),
            min_drawdown_multiplier: env_or("SIM_MIN_DD_MULT", d.min_drawdown_multiplier),
            gate: ConfidenceGate {
                min_confidence: env_or("SIM_GATE_MIN_CONF", d.gate.min_confidence),
                min_scale: env_or("SIM_GATE_MIN_SCALE", d.gate.min_scale),
                max_scale: env_or("SIM_GATE_MAX_SCALE", d.gate.max_scale),
                min_exposure: env_or("SIM_GATE_MIN_EXPOSURE", d.gate.min_exposure),
            },
            entropy: EntropyGuard {
                enabled: env_flag("SIM_ENTROPY", d.entropy.enabled),
                warn: env_or("SIM_ENTROPY_WARN", d.entropy.warn),
                hard: env_or("SIM_ENTROPY_HARD", d.entropy.hard),
                min_scale: env_or("SIM_ENTROPY_MIN_SCALE", d.entropy.min_scale),
                smoothing: env_or("SIM_ENTROPY_SMOOTHING", d.entropy.smoothing),
            },
            autopilot: AutopilotConfig {
                enabled: env_flag("SIM_AUTOPILOT", d.autopilot.enabled),
                interval_steps: env_or("SIM_AUTOPILOT_INTERVAL", d.autopilot.interval_steps),
                ..d.autopilot
            },
        }
    }

    /// Half of the round-trip cost, as a fraction of notional.
    pub fn half_cost_rate(&self) -> f64 {
        (self.fee_bps + self.slippage_bps + self.spread_bps) / 2.0 / 10_000.0
    }

    pub fn validate(&self) -> EngineResult<()> {
        let bad = |msg: String| Err(EngineError::InvalidConfig(msg));
        if !(self.initial_equity.is_finite() && self.initial_equity > 0.0) {
            return bad(format!("initial_equity must be > 0, got {}", self.initial_equity));
        }
        if self.step_secs == 0 {
            return bad("step_secs must be > 0".into());
        }
        for (name, v) in [
            ("fee_bps", self.fee_bps),
            ("slippage_bps", self.slippage_bps),
            ("spread_bps", self.spread_bps),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return bad(format!("{} must be >= 0, got {}", name, v));
            }
        }
        if !(0.0..=1.0).contains(&self.enter_threshold) || !(0.0..=1.0).contains(&self.exit_threshold) {
            return bad("enter/exit thresholds must lie in [0, 1]".into());
        }
        if self.exit_threshold > self.enter_threshold {
            return bad(format!(
                "exit_threshold {} above enter_threshold {}",
                self.exit_threshold, self.enter_threshold
            ));
        }
        if self.max_hold_steps == 0 || self.min_hold_steps > self.max_hold_steps {
            return bad(format!(
                "hold steps must satisfy 0 < min ({}) <= max ({})",
                self.min_hold_steps, self.max_hold_steps
            ));
        }
        if !(self.soft_drawdown > 0.0 && self.hard_drawdown <= 1.0) {
            return bad("drawdown thresholds must lie in (0, 1]".into());
        }
        if self.hard_drawdown <= self.soft_drawdown {
            return bad(format!(
                "hard_drawdown {} must exceed soft_drawdown {}",
                self.hard_drawdown, self.soft_drawdown
            ));
        }
        if !(0.0..1.0).contains(&self.position_stop_loss_pct) {
            return bad(format!("position_stop_loss_pct must lie in [0, 1), got {}", self.position_stop_loss_pct));
        }
        if !(self.base_exposure > 0.0 && self.base_exposure <= 1.0) {
            return bad(format!("base_exposure must lie in (0, 1], got {}", self.base_exposure));
        }
        if !(0.0..1.0).contains(&self.min_drawdown_multiplier) {
            return bad("min_drawdown_multiplier must lie in [0, 1)".into());
        }
        let g = &self.gate;
        if !(0.0..=1.0).contains(&g.min_confidence)
            || !(0.0..=1.0).contains(&g.min_scale)
            || !(0.0..=1.0).contains(&g.max_scale)
            || g.min_scale > g.max_scale
            || !(g.min_exposure >= 0.0 && g.min_exposure <= 1.0)
        {
            return bad("confidence gate parameters out of range".into());
        }
        validate_entropy(&self.entropy)?;
        let a = &self.autopilot;
        if a.enabled {
            if a.interval_steps == 0 || a.rollback_confirmations == 0 {
                return bad("autopilot interval and confirmations must be >= 1".into());
            }
            if !(a.warn_drawdown > 0.0 && a.warn_drawdown < a.degraded_drawdown && a.degraded_drawdown < a.critical_drawdown) {
                return bad("autopilot drawdowns must satisfy 0 < warn < degraded < critical".into());
            }
            if a.horizons.is_empty() {
                return bad("autopilot needs at least one horizon".into());
            }
        }
        Ok(())
    }

    /// Overlay `patch` onto this config; the patch wins field by field.
    pub fn apply(&self, patch: &ConfigPatch) -> EngineResult<SimulationConfig> {
        let pick = |p: Option<f64>, b: f64| p.unwrap_or(b);
        let gate = match &patch.gate {
            Some(g) => ConfidenceGate {
                min_confidence: pick(g.min_confidence, self.gate.min_confidence),
                min_scale: pick(g.min_scale, self.gate.min_scale),
                max_scale: pick(g.max_scale, self.gate.max_scale),
                min_exposure: pick(g.min_exposure, self.gate.min_exposure),
            },
            None => self.gate.clone(),
        };
        let entropy = match &patch.entropy {
            Some(e) => EntropyGuard {
                enabled: e.enabled.unwrap_or(self.entropy.enabled),
                warn: pick(e.warn, self.entropy.warn),
                hard: pick(e.hard, self.entropy.hard),
                min_scale: pick(e.min_scale, self.entropy.min_scale),
                smoothing: pick(e.smoothing, self.entropy.smoothing),
            },
            None => self.entropy.clone(),
        };
        let autopilot = match &patch.autopilot {
            Some(a) => {
                let b = &self.autopilot;
                AutopilotConfig {
                    enabled: a.enabled.unwrap_or(b.enabled),
                    interval_steps: a.interval_steps.unwrap_or(b.interval_steps),
                    warn_drawdown: pick(a.warn_drawdown, b.warn_drawdown),
                    degraded_drawdown: pick(a.degraded_drawdown, b.degraded_drawdown),
                    critical_drawdown: pick(a.critical_drawdown, b.critical_drawdown),
                    retrain_after: a.retrain_after.unwrap_or(b.retrain_after),
                    min_retrain_interval_steps: a.min_retrain_interval_steps.unwrap_or(b.min_retrain_interval_steps),
                    rollback_confirmations: a.rollback_confirmations.unwrap_or(b.rollback_confirmations),
                    rollback_cooldown_steps: a.rollback_cooldown_steps.unwrap_or(b.rollback_cooldown_steps),
                    horizons: a.horizons.clone().unwrap_or_else(|| b.horizons.clone()),
                    horizon_hysteresis_steps: a.horizon_hysteresis_steps.unwrap_or(b.horizon_hysteresis_steps),
                }
            }
            None => self.autopilot.clone(),
        };
        let merged = SimulationConfig {
            initial_equity: pick(patch.initial_equity, self.initial_equity),
            step_secs: patch.step_secs.unwrap_or(self.step_secs),
            bar_tolerance_secs: patch.bar_tolerance_secs.unwrap_or(self.bar_tolerance_secs),
            fee_bps: pick(patch.fee_bps, self.fee_bps),
            slippage_bps: pick(patch.slippage_bps, self.slippage_bps),
            spread_bps: pick(patch.spread_bps, self.spread_bps),
            enter_threshold: pick(patch.enter_threshold, self.enter_threshold),
            exit_threshold: pick(patch.exit_threshold, self.exit_threshold),
            min_hold_steps: patch.min_hold_steps.unwrap_or(self.min_hold_steps),
            max_hold_steps: patch.max_hold_steps.unwrap_or(self.max_hold_steps),
            cooldown_steps: patch.cooldown_steps.unwrap_or(self.cooldown_steps),
            hard_kill_cooldown_steps: patch.hard_kill_cooldown_steps.unwrap_or(self.hard_kill_cooldown_steps),
            soft_drawdown: pick(patch.soft_drawdown, self.soft_drawdown),
            hard_drawdown: pick(patch.hard_drawdown, self.hard_drawdown),
            position_stop_loss_pct: pick(patch.position_stop_loss_pct, self.position_stop_loss_pct),
            allow_short: patch.allow_short.unwrap_or(self.allow_short),
            base_exposure: pick(patch.base_exposure, self.base_exposure),
            min_drawdown_multiplier: pick(patch.min_drawdown_multiplier, self.min_drawdown_multiplier),
            gate,
            entropy,
            autopilot,
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Short SHA-256 of the serialized config; stamped on results.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(json.as_bytes());
        hex::encode(&digest[..8])
    }
}

pub(crate) fn validate_entropy(e: &EntropyGuard) -> EngineResult<()> {
    if !e.enabled {
        return Ok(());
    }
    if !(0.0..=1.0).contains(&e.warn) || !(0.0..=1.0).contains(&e.hard) {
        return Err(EngineError::invalid_config("entropy thresholds must lie in [0, 1]"));
    }
    if e.hard <= e.warn {
        return Err(EngineError::invalid_config(format!(
            "entropy hard {} must exceed warn {}",
            e.hard, e.warn
        )));
    }
    if !(0.0..=1.0).contains(&e.min_scale) || !(0.0..1.0).contains(&e.smoothing) {
        return Err(EngineError::invalid_config("entropy min_scale / smoothing out of range"));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePatch {
    pub min_confidence: Option<f64>,
    pub min_scale: Option<f64>,
    pub max_scale: Option<f64>,
    pub min_exposure: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyPatch {
    pub enabled: Option<bool>,
    pub warn: Option<f64>,
    pub hard: Option<f64>,
    pub min_scale: Option<f64>,
    pub smoothing: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutopilotPatch {
    pub enabled: Option<bool>,
    pub interval_steps: Option<u32>,
    pub warn_drawdown: Option<f64>,
    pub degraded_drawdown: Option<f64>,
    pub critical_drawdown: Option<f64>,
    pub retrain_after: Option<u32>,
    pub min_retrain_interval_steps: Option<u32>,
    pub rollback_confirmations: Option<u32>,
    pub rollback_cooldown_steps: Option<u32>,
    pub horizons: Option<Vec<u32>>,
    pub horizon_hysteresis_steps: Option<u32>,
}

/// Partial overlay for `SimulationConfig::apply`. Unset fields keep the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub initial_equity: Option<f64>,
    pub step_secs: Option<u64>,
    pub bar_tolerance_secs: Option<u64>,
    pub fee_bps: Option<f64>,
    pub slippage_bps: Option<f64>,
    pub spread_bps: Option<f64>,
    pub enter_threshold: Option<f64>,
    pub exit_threshold: Option<f64>,
    pub min_hold_steps: Option<u32>,
    pub max_hold_steps: Option<u32>,
    pub cooldown_steps: Option<u32>,
    pub hard_kill_cooldown_steps: Option<u32>,
    pub soft_drawdown: Option<f64>,
    pub hard_drawdown: Option<f64>,
    pub position_stop_loss_pct: Option<f64>,
    pub allow_short: Option<bool>,
    pub base_exposure: Option<f64>,
    pub min_drawdown_multiplier: Option<f64>,
    pub gate: Option<GatePatch>,
    pub entropy: Option<EntropyPatch>,
    pub autopilot: Option<AutopilotPatch>,
}

/// Batch-level knobs for the validation harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub workers: usize,
    pub seed: u64,
    pub mc_iterations: usize,
    pub mc_block_sizes: Vec<usize>,
    pub timeout_secs: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            seed: 42,
            mc_iterations: 1000,
            mc_block_sizes: vec![4, 8, 13],
            timeout_secs: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            workers: env_or("HARNESS_WORKERS", d.workers).max(1),
            seed: env_or("HARNESS_SEED", d.seed),
            mc_iterations: env_or("MC_ITERATIONS", d.mc_iterations),
            mc_block_sizes: std::env::var("MC_BLOCK_SIZES")
                .ok()
                .map(|v| v.split(',').filter_map(|s| s.trim().parse().ok()).collect::<Vec<usize>>())
                .filter(|v| !v.is_empty())
                .unwrap_or(d.mc_block_sizes),
            timeout_secs: std::env::var("HARNESS_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_hard_must_exceed_soft() {
        let cfg = SimulationConfig { soft_drawdown: 0.3, hard_drawdown: 0.3, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_patch_overrides_and_keeps_base() {
        let base = SimulationConfig::default();
        let patch = ConfigPatch {
            fee_bps: Some(1.0),
            entropy: Some(EntropyPatch { warn: Some(0.8), ..Default::default() }),
            ..Default::default()
        };
        let merged = base.apply(&patch).unwrap();
        assert_eq!(merged.fee_bps, 1.0);
        assert_eq!(merged.entropy.warn, 0.8);
        assert_eq!(merged.entropy.hard, base.entropy.hard);
        assert_eq!(merged.slippage_bps, base.slippage_bps);
        // base untouched
        assert_eq!(base.fee_bps, 10.0);
    }

    #[test]
    fn test_patch_result_is_validated() {
        let patch = ConfigPatch { hard_drawdown: Some(0.1), ..Default::default() };
        assert!(SimulationConfig::default().apply(&patch).is_err());
    }

    #[test]
    fn test_patch_from_json() {
        let patch: ConfigPatch =
            serde_json::from_str(r#"{"enter_threshold": 0.7, "gate": {"min_confidence": 0.6}}"#).unwrap();
        let merged = SimulationConfig::default().apply(&patch).unwrap();
        assert_eq!(merged.enter_threshold, 0.7);
        assert_eq!(merged.gate.min_confidence, 0.6);
        assert_eq!(merged.gate.min_scale, ConfidenceGate::default().min_scale);
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let base = SimulationConfig::default();
        assert_eq!(base.apply(&ConfigPatch::default()).unwrap(), base);
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = SimulationConfig::default();
        let b = a.apply(&ConfigPatch { fee_bps: Some(0.0), ..Default::default() }).unwrap();
        assert_eq!(a.fingerprint(), SimulationConfig::default().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
    }

    #[test]
    fn test_half_cost_rate() {
        let cfg = SimulationConfig { fee_bps: 10.0, slippage_bps: 6.0, spread_bps: 4.0, ..Default::default() };
        assert!((cfg.half_cost_rate() - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_entropy_hard_must_exceed_warn() {
        let e = EntropyGuard { warn: 0.9, hard: 0.9, ..Default::default() };
        assert!(validate_entropy(&e).is_err());
        let off = EntropyGuard { enabled: false, ..e };
        assert!(validate_entropy(&off).is_ok());
    }
}
