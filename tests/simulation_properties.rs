use analogfx::config::SimulationConfig;
use analogfx::data::PriceBar;
use analogfx::signals::{Direction, Signal, SignalParams, StaticSignals};
use analogfx::simulation::{simulate, Position};
use proptest::prelude::*;

const DAY: u64 = 86_400;

fn path(moves: &[f64]) -> Vec<PriceBar> {
    let mut price = 100.0;
    let mut out = Vec::with_capacity(moves.len() + 1);
    out.push(PriceBar::flat("P", 0, price));
    for (i, m) in moves.iter().enumerate() {
        price = (price * (1.0 + m)).max(0.01);
        out.push(PriceBar::flat("P", (i as u64 + 1) * DAY, price));
    }
    out
}

fn signals(raw: &[(u8, f64)]) -> StaticSignals {
    StaticSignals::from_series(
        "P",
        raw.iter().enumerate().map(|(i, (d, c))| {
            let dir = match d % 3 {
                0 => Direction::Long,
                1 => Direction::Short,
                _ => Direction::Neutral,
            };
            (i as u64 * DAY, Signal::new(dir, *c))
        }),
    )
}

fn daily_cfg() -> SimulationConfig {
    SimulationConfig { step_secs: DAY, bar_tolerance_secs: DAY, min_hold_steps: 1, ..Default::default() }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn equity_stays_positive_and_one_position(
        moves in prop::collection::vec(-0.35f64..0.35, 50..400),
        raw in prop::collection::vec((0u8..3, 0.0f64..1.0), 400),
    ) {
        let bars = path(&moves);
        let src = signals(&raw);
        let to = bars.len() as u64 * DAY;
        let res = simulate(&daily_cfg(), &bars, &src, "P", &SignalParams::default(), 0, to).unwrap();
        prop_assert!(res.success);
        for p in &res.equity_curve {
            prop_assert!(p.equity > 0.0, "equity {} at {}", p.equity, p.ts);
        }
        for w in res.equity_curve.windows(2) {
            let flip = matches!(
                (w[0].position, w[1].position),
                (Position::Long, Position::Short) | (Position::Short, Position::Long)
            );
            prop_assert!(!flip, "direct flip at {}", w[1].ts);
        }
        for t in &res.trades {
            prop_assert!(t.exit_ts >= t.entry_ts);
        }
    }
}

#[test]
fn hard_kill_ends_flat_after_crash() {
    let mut bars: Vec<PriceBar> = (0..10).map(|i| PriceBar::flat("P", i * DAY, 100.0)).collect();
    bars.extend((10..60).map(|i| PriceBar::flat("P", i * DAY, 50.0)));
    let src = StaticSignals::from_series("P", vec![(0, Signal::new(Direction::Long, 0.95))]);
    let cfg = SimulationConfig {
        hard_drawdown: 0.30,
        position_stop_loss_pct: 0.0,
        ..daily_cfg()
    };
    let res = simulate(&cfg, &bars, &src, "P", &SignalParams::default(), 0, 60 * DAY).unwrap();
    assert!(res.success);
    let last = res.equity_curve.last().unwrap();
    assert_eq!(last.position, Position::Flat);
    assert!(res.trades.iter().any(|t| t.exit_reason.as_str() == "hard_kill"));
    assert!(last.equity > 0.0);
}
