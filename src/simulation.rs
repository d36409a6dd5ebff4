//! Position state machine driven one tick at a time.
//!
//! Each tick is evaluated in a fixed priority order:
//!
//! 1. mark-to-market P&L (to the stop price when the stop was breached)
//! 2. intrabar stop-loss
//! 3. regime-forced exit
//! 4. hard kill (full exit, extended cooldown)
//! 5. soft kill (halve size, once per drawdown episode)
//! 6. max-hold exit
//! 7. signal exit (flip, neutral, or confidence below the exit threshold)
//! 8. entry
//!
//! At most one of 2-7 fires per tick and no entry follows an exit in the
//! same tick, so a position never flips directly between LONG and SHORT.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::autopilot::{Autopilot, AutopilotCounters, AutopilotEvent};
use crate::config::SimulationConfig;
use crate::data::{slice_range, PriceBar};
use crate::error::{EngineError, EngineResult};
use crate::ids::{IdGenerator, SequentialIds};
use crate::logging::{self, obj, v_num, v_str, Domain, Level, ProfileScope};
use crate::metrics::{attribute_drawdown, summarize, DrawdownAttribution, PerformanceSummary};
use crate::risk::{KillAction, RiskEngine};
use crate::signals::{Direction, Signal, SignalParams, SignalSource};
use crate::store::{InMemoryRepository, Repository};

/// Equity never drops below this fraction of the initial equity.
const EQUITY_FLOOR_FRAC: f64 = 1e-9;

/// Ticks with a bar needed before a run means anything.
pub const MIN_BARS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Position {
    #[default]
    Flat,
    Long,
    Short,
}

impl Position {
    pub fn sign(&self) -> f64 {
        match self {
            Position::Flat => 0.0,
            Position::Long => 1.0,
            Position::Short => -1.0,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Position::Flat => Direction::Neutral,
            Position::Long => Direction::Long,
            Position::Short => Direction::Short,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Flat => "FLAT",
            Position::Long => "LONG",
            Position::Short => "SHORT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    RegimeGuard,
    HardKill,
    MaxHold,
    SignalFlip,
    SignalNeutral,
    LowConfidence,
    EndOfRun,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::RegimeGuard => "regime_guard",
            ExitReason::HardKill => "hard_kill",
            ExitReason::MaxHold => "max_hold",
            ExitReason::SignalFlip => "signal_flip",
            ExitReason::SignalNeutral => "signal_neutral",
            ExitReason::LowConfidence => "low_confidence",
            ExitReason::EndOfRun => "end_of_run",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepBar {
    pub close: f64,
    pub low: f64,
    pub high: f64,
}

impl From<&PriceBar> for StepBar {
    fn from(b: &PriceBar) -> Self {
        Self { close: b.close, low: b.low, high: b.high }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub ts: u64,
    pub bar: Option<StepBar>,
    pub signal: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub id: String,
    pub side: Position,
    pub entry_ts: u64,
    pub entry_price: f64,
    pub units: f64,
    pub equity_at_entry: f64,
    pub confidence: f64,
    pub realized: f64,
    pub costs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: String,
    pub side: Position,
    pub entry_ts: u64,
    pub exit_ts: u64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub hold_steps: u32,
    /// Net of costs, in equity units.
    pub pnl: f64,
    /// `pnl` over equity at entry.
    pub return_pct: f64,
    pub costs: f64,
    pub exit_reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Entry { ts: u64, trade_id: String, side: Position, price: f64, exposure: f64, confidence: f64 },
    Exit { ts: u64, trade_id: String, side: Position, price: f64, reason: ExitReason, pnl: f64 },
    SoftKill { ts: u64, trade_id: String, drawdown: f64, remaining_units: f64 },
    BarMissing { ts: u64 },
    Autopilot { ts: u64, event: AutopilotEvent },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: u64,
    pub equity: f64,
    pub price: f64,
    pub position: Position,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub equity: f64,
    pub peak_equity: f64,
    pub position: Position,
    /// Instrument units held; notional is `units * price`.
    pub position_size: f64,
    pub entry_price: f64,
    pub last_price: Option<f64>,
    pub hold_steps: u32,
    /// First tick on which a new entry is allowed.
    pub cooldown_until: u64,
    /// Set by a hard kill; the drawdown reference restarts once its cooldown ends.
    pub rebase_pending: bool,
    pub step: u64,
    pub open_trade_id: Option<String>,
}

impl SimulationState {
    pub fn drawdown(&self) -> f64 {
        if self.peak_equity > 0.0 {
            (1.0 - self.equity / self.peak_equity).max(0.0)
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StepAction {
    Skipped,
    Hold,
    Entered(Position),
    Exited(ExitReason),
    Reduced,
}

impl StepAction {
    fn label(&self) -> Option<String> {
        match self {
            StepAction::Skipped | StepAction::Hold => None,
            StepAction::Entered(p) => Some(format!("enter_{}", p.as_str().to_lowercase())),
            StepAction::Exited(r) => Some(format!("exit_{}", r.as_str())),
            StepAction::Reduced => Some("soft_kill".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub symbol: String,
    pub config_hash: String,
    pub success: bool,
    pub failure: Option<String>,
    pub summary: PerformanceSummary,
    pub equity_curve: Vec<EquityPoint>,
    pub events: Vec<SimEvent>,
    pub trades: Vec<ClosedTrade>,
    pub attribution: Option<DrawdownAttribution>,
    pub autopilot: Option<AutopilotCounters>,
}

impl SimulationResult {
    /// Explicit failed result for a range with too few bars.
    pub fn insufficient(symbol: &str, cfg: &SimulationConfig, need: usize, got: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            config_hash: cfg.fingerprint(),
            success: false,
            failure: Some(EngineError::InsufficientData { need, got }.to_string()),
            summary: PerformanceSummary {
                initial_equity: cfg.initial_equity,
                final_equity: cfg.initial_equity,
                ..Default::default()
            },
            equity_curve: Vec::new(),
            events: Vec::new(),
            trades: Vec::new(),
            attribution: None,
            autopilot: None,
        }
    }

    /// Per-step equity returns, starting from the initial equity.
    pub fn step_returns(&self) -> Vec<f64> {
        let mut eq = Vec::with_capacity(self.equity_curve.len() + 1);
        eq.push(self.summary.initial_equity);
        eq.extend(self.equity_curve.iter().map(|p| p.equity));
        crate::metrics::step_returns(&eq)
    }
}

pub struct Simulator {
    cfg: SimulationConfig,
    config_hash: String,
    ids: Arc<dyn IdGenerator>,
    open: Box<dyn Repository<String, OpenTrade> + Send>,
    risk: RiskEngine,
    autopilot: Autopilot,
    state: SimulationState,
    events: Vec<SimEvent>,
    trades: Vec<ClosedTrade>,
    curve: Vec<EquityPoint>,
}

impl Simulator {
    pub fn new(
        cfg: SimulationConfig,
        ids: Arc<dyn IdGenerator>,
        open: Box<dyn Repository<String, OpenTrade> + Send>,
    ) -> EngineResult<Self> {
        cfg.validate()?;
        let state = SimulationState {
            equity: cfg.initial_equity,
            peak_equity: cfg.initial_equity,
            ..Default::default()
        };
        Ok(Self {
            config_hash: cfg.fingerprint(),
            risk: RiskEngine::new(&cfg),
            autopilot: Autopilot::new(&cfg.autopilot),
            ids,
            open,
            state,
            events: Vec::new(),
            trades: Vec::new(),
            curve: Vec::new(),
            cfg,
        })
    }

    /// Sequential ids and an in-memory open-trade repository.
    pub fn with_defaults(cfg: SimulationConfig) -> EngineResult<Self> {
        Self::new(cfg, Arc::new(SequentialIds::new()), Box::new(InMemoryRepository::new()))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.cfg
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn open_trades(&self) -> usize {
        self.open.len()
    }

    fn floor(&self) -> f64 {
        self.cfg.initial_equity * EQUITY_FLOOR_FRAC
    }

    fn stop_breach(&self, bar: &StepBar) -> Option<f64> {
        let pct = self.cfg.position_stop_loss_pct;
        if pct <= 0.0 {
            return None;
        }
        let entry = self.state.entry_price;
        match self.state.position {
            Position::Long => {
                let stop = entry * (1.0 - pct);
                (bar.low <= stop).then_some(stop)
            }
            Position::Short => {
                let stop = entry * (1.0 + pct);
                (bar.high >= stop).then_some(stop)
            }
            Position::Flat => None,
        }
    }

    fn charge(&mut self, notional: f64) -> f64 {
        let cost = notional.abs() * self.cfg.half_cost_rate();
        self.state.equity = (self.state.equity - cost).max(self.floor());
        cost
    }

    fn close(&mut self, ts: u64, price: f64, reason: ExitReason) {
        let side = self.state.position;
        let units = self.state.position_size;
        let cost = self.charge(units * price);
        let hold_steps = self.state.hold_steps;
        let id = self.state.open_trade_id.take().unwrap_or_default();
        if let Some(t) = self.open.delete(&id) {
            let pnl = t.realized - t.costs - cost;
            self.events.push(SimEvent::Exit { ts, trade_id: id.clone(), side, price, reason, pnl });
            self.trades.push(ClosedTrade {
                id,
                side,
                entry_ts: t.entry_ts,
                exit_ts: ts,
                entry_price: t.entry_price,
                exit_price: price,
                hold_steps,
                pnl,
                return_pct: if t.equity_at_entry > 0.0 { pnl / t.equity_at_entry } else { 0.0 },
                costs: t.costs + cost,
                exit_reason: reason,
            });
        }
        self.state.position = Position::Flat;
        self.state.position_size = 0.0;
        self.state.entry_price = 0.0;
        self.state.hold_steps = 0;
        let cooldown = match reason {
            ExitReason::HardKill => self.cfg.hard_kill_cooldown_steps,
            _ => self.cfg.cooldown_steps,
        };
        self.state.cooldown_until = self.state.step + cooldown as u64 + 1;
        self.state.rebase_pending |= reason == ExitReason::HardKill;
        logging::log(
            Level::Debug,
            Domain::Sim,
            "exit",
            obj(&[
                ("ts", json!(ts)),
                ("side", v_str(side.as_str())),
                ("reason", v_str(reason.as_str())),
                ("price", v_num(price)),
                ("equity", v_num(self.state.equity)),
            ]),
        );
    }

    fn reduce_half(&mut self, ts: u64, price: f64, drawdown: f64) {
        let sold = self.state.position_size / 2.0;
        let cost = self.charge(sold * price);
        self.state.position_size -= sold;
        let id = self.state.open_trade_id.clone().unwrap_or_default();
        if let Some(mut t) = self.open.get(&id) {
            t.units = self.state.position_size;
            t.costs += cost;
            self.open.put(id.clone(), t);
        }
        self.events.push(SimEvent::SoftKill {
            ts,
            trade_id: id,
            drawdown,
            remaining_units: self.state.position_size,
        });
    }

    fn enter(&mut self, ts: u64, price: f64, side: Position, exposure: f64, confidence: f64) {
        let notional = exposure * self.state.equity;
        let units = notional / price;
        let cost = self.charge(notional);
        let id = self.ids.next_id("trade");
        self.open.put(
            id.clone(),
            OpenTrade {
                id: id.clone(),
                side,
                entry_ts: ts,
                entry_price: price,
                units,
                equity_at_entry: self.state.equity + cost,
                confidence,
                realized: 0.0,
                costs: cost,
            },
        );
        self.state.position = side;
        self.state.position_size = units;
        self.state.entry_price = price;
        self.state.hold_steps = 0;
        self.state.open_trade_id = Some(id.clone());
        self.events.push(SimEvent::Entry { ts, trade_id: id, side, price, exposure, confidence });
    }

    fn signal_exit(&self, signal: Option<&Signal>) -> Option<ExitReason> {
        let held = self.state.position.direction();
        match signal {
            None => Some(ExitReason::SignalNeutral),
            Some(s) if s.direction == Direction::Neutral => Some(ExitReason::SignalNeutral),
            Some(s) if s.direction == held.opposite() => Some(ExitReason::SignalFlip),
            Some(s) if s.confidence < self.cfg.exit_threshold => Some(ExitReason::LowConfidence),
            _ => None,
        }
    }

    fn entry_side(&self, signal: &Signal) -> Option<Position> {
        let side = match signal.direction {
            Direction::Long => Position::Long,
            Direction::Short if self.cfg.allow_short => Position::Short,
            _ => return None,
        };
        if signal.confidence < self.cfg.enter_threshold {
            return None;
        }
        if let Some(guard) = signal.regime_flags.conflict(signal.direction) {
            logging::log_risk_trigger(guard, self.state.step, signal.confidence, self.cfg.enter_threshold);
            return None;
        }
        Some(side)
    }

    /// Autopilot runs on every tick, including skipped ones.
    fn maintain(&mut self, ts: u64, step: u64) {
        for ev in self.autopilot.on_step(step, self.state.drawdown()) {
            self.events.push(SimEvent::Autopilot { ts, event: ev });
        }
    }

    /// Advance one tick.
    pub fn step(&mut self, tick: &Tick) -> StepAction {
        self.state.step += 1;
        let step = self.state.step;
        let Some(bar) = tick.bar.filter(|b| b.close.is_finite() && b.close > 0.0) else {
            self.events.push(SimEvent::BarMissing { ts: tick.ts });
            self.maintain(tick.ts, step);
            return StepAction::Skipped;
        };
        let signal = tick.signal.as_ref();
        if let Some(s) = signal {
            self.risk.observe_confidence(s.confidence);
        }

        // 1. mark to market
        let stop = self.stop_breach(&bar);
        let holding = self.state.position != Position::Flat;
        if holding {
            let mark = stop.unwrap_or(bar.close);
            let prev = self.state.last_price.unwrap_or(self.state.entry_price);
            let pnl = self.state.position.sign() * self.state.position_size * (mark - prev);
            self.state.equity = (self.state.equity + pnl).max(self.floor());
            self.state.hold_steps += 1;
            if let Some(id) = self.state.open_trade_id.clone() {
                if let Some(mut t) = self.open.get(&id) {
                    t.realized += pnl;
                    self.open.put(id, t);
                }
            }
        }
        if self.state.rebase_pending && !holding && step >= self.state.cooldown_until {
            self.state.peak_equity = self.state.equity;
            self.state.rebase_pending = false;
        }
        self.state.peak_equity = self.state.peak_equity.max(self.state.equity);
        let drawdown = self.state.drawdown();

        let mut action = StepAction::Hold;

        // 2. stop
        if let Some(stop_px) = stop {
            logging::log_risk_trigger("stop_loss", step, bar.close, stop_px);
            self.close(tick.ts, stop_px, ExitReason::StopLoss);
            action = StepAction::Exited(ExitReason::StopLoss);
        }

        // 3. regime
        if action == StepAction::Hold && holding {
            let conflict = signal.and_then(|s| s.regime_flags.conflict(self.state.position.direction()));
            if let Some(guard) = conflict {
                logging::log_risk_trigger(guard, step, drawdown, 0.0);
                self.close(tick.ts, bar.close, ExitReason::RegimeGuard);
                action = StepAction::Exited(ExitReason::RegimeGuard);
            }
        }

        // 4-5. kill switches; assessed every tick so episodes re-arm
        let still_holding = self.state.position != Position::Flat;
        let kill = self.risk.assess_drawdown(drawdown, still_holding, step);
        if action == StepAction::Hold {
            match kill {
                KillAction::Hard => {
                    self.close(tick.ts, bar.close, ExitReason::HardKill);
                    action = StepAction::Exited(ExitReason::HardKill);
                }
                KillAction::Soft => {
                    self.reduce_half(tick.ts, bar.close, drawdown);
                    action = StepAction::Reduced;
                }
                KillAction::None => {}
            }
        }

        // 6. max hold
        if matches!(action, StepAction::Hold | StepAction::Reduced)
            && self.state.position != Position::Flat
            && self.state.hold_steps >= self.cfg.max_hold_steps
        {
            self.close(tick.ts, bar.close, ExitReason::MaxHold);
            action = StepAction::Exited(ExitReason::MaxHold);
        }

        // 7. signal exit
        if matches!(action, StepAction::Hold | StepAction::Reduced)
            && self.state.position != Position::Flat
            && self.state.hold_steps >= self.cfg.min_hold_steps
        {
            if let Some(reason) = self.signal_exit(signal) {
                self.close(tick.ts, bar.close, reason);
                action = StepAction::Exited(reason);
            }
        }

        // 8. entry
        if action == StepAction::Hold && self.state.position == Position::Flat && step >= self.state.cooldown_until {
            if let Some(s) = signal {
                if let Some(side) = self.entry_side(s) {
                    let current_dd = self.state.drawdown();
                    if let Ok(d) = self.risk.entry(s.confidence, current_dd, step) {
                        self.enter(tick.ts, bar.close, side, d.exposure, s.confidence);
                        action = StepAction::Entered(side);
                    }
                }
            }
        }

        self.state.last_price = Some(bar.close);
        self.maintain(tick.ts, step);
        self.curve.push(EquityPoint {
            ts: tick.ts,
            equity: self.state.equity,
            price: bar.close,
            position: self.state.position,
            action: action.label(),
        });
        action
    }

    /// Close any open position at the last price and assemble the result.
    pub fn finish(mut self, symbol: &str) -> SimulationResult {
        if self.state.position != Position::Flat {
            let ts = self.curve.last().map(|p| p.ts).unwrap_or(0);
            let price = self.state.last_price.unwrap_or(self.state.entry_price);
            self.close(ts, price, ExitReason::EndOfRun);
            if let Some(last) = self.curve.last_mut() {
                last.equity = self.state.equity;
                last.position = Position::Flat;
                last.action = Some(format!("exit_{}", ExitReason::EndOfRun.as_str()));
            }
        }
        let summary = summarize(&self.curve, &self.trades, self.cfg.initial_equity, self.cfg.step_secs);
        let attribution = attribute_drawdown(&self.curve, &self.trades);
        SimulationResult {
            symbol: symbol.to_string(),
            config_hash: self.config_hash,
            success: true,
            failure: None,
            summary,
            equity_curve: self.curve,
            events: self.events,
            trades: self.trades,
            attribution,
            autopilot: self.cfg.autopilot.enabled.then(|| self.autopilot.counters().clone()),
        }
    }

    /// Drive the simulator over `[from, to)` in `step_secs` ticks.
    ///
    /// A bar belongs to the tick at `t` when `t <= bar.ts < t + bar_tolerance_secs`;
    /// ticks without one are skipped.
    pub fn run(
        mut self,
        bars: &[PriceBar],
        source: &dyn SignalSource,
        symbol: &str,
        params: &SignalParams,
        from: u64,
        to: u64,
    ) -> EngineResult<SimulationResult> {
        if from >= to {
            return Err(EngineError::invalid_input(format!("empty range [{}, {})", from, to)));
        }
        let _p = ProfileScope::with_context("simulate", &[("symbol", v_str(symbol))]);
        let in_range = slice_range(bars, from, to);
        if in_range.len() < MIN_BARS {
            logging::log(
                Level::Warn,
                Domain::Sim,
                "insufficient_bars",
                obj(&[("symbol", v_str(symbol)), ("got", json!(in_range.len())), ("need", json!(MIN_BARS))]),
            );
            return Ok(SimulationResult::insufficient(symbol, &self.cfg, MIN_BARS, in_range.len()));
        }

        let tolerance = self.cfg.bar_tolerance_secs.max(1);
        let mut t = from;
        while t < to {
            let idx = in_range.partition_point(|b| b.ts < t);
            let bar = in_range.get(idx).filter(|b| b.ts < t.saturating_add(tolerance));
            let tick = match bar {
                Some(b) => Tick { ts: b.ts, bar: Some(StepBar::from(b)), signal: source.signal(symbol, b.ts, params) },
                None => Tick { ts: t, bar: None, signal: None },
            };
            self.step(&tick);
            t = t.saturating_add(self.cfg.step_secs);
        }

        let result = self.finish(symbol);
        logging::log(
            Level::Info,
            Domain::Sim,
            "run_complete",
            obj(&[
                ("symbol", v_str(symbol)),
                ("config_hash", v_str(&result.config_hash)),
                ("trades", json!(result.summary.trades)),
                ("sharpe", v_num(result.summary.sharpe)),
                ("max_drawdown", v_num(result.summary.max_drawdown)),
                ("final_equity", v_num(result.summary.final_equity)),
            ]),
        );
        Ok(result)
    }
}

/// Run one simulation with default ids and repository.
pub fn simulate(
    cfg: &SimulationConfig,
    bars: &[PriceBar],
    source: &dyn SignalSource,
    symbol: &str,
    params: &SignalParams,
    from: u64,
    to: u64,
) -> EngineResult<SimulationResult> {
    Simulator::with_defaults(cfg.clone())?.run(bars, source, symbol, params, from, to)
}
