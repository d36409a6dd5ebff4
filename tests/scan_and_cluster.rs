use std::sync::Arc;

use analogfx::cluster::{ClusterConfig, ClusterEngine};
use analogfx::data::PriceBar;
use analogfx::features::{FeatureRow, FEATURE_NAMES};
use analogfx::ids::SequentialIds;
use analogfx::scanner::{PatternScanner, ScanConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DAY: u64 = 86_400;

fn random_walk(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut p = 100.0;
    (0..n)
        .map(|_| {
            p *= 1.0 + rng.gen_range(-0.02..0.02);
            p
        })
        .collect()
}

#[test]
fn finds_pattern_embedded_at_day_500() {
    let mut closes = random_walk(1000, 11);
    let pattern: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.4).sin() * 12.0 + i as f64).collect();
    for (i, p) in pattern.iter().enumerate() {
        closes[500 + i] = p * 0.5;
        closes[970 + i] = *p;
    }
    let bars: Vec<PriceBar> = closes.iter().enumerate().map(|(i, c)| PriceBar::flat("SPX", i as u64 * DAY, *c)).collect();

    let scanner = PatternScanner::new(ScanConfig::default()).unwrap();
    let matches = scanner.scan_latest(&bars).unwrap();
    let hit = matches.iter().find(|m| m.window_start == 500).expect("embedded window not found");
    assert!(hit.similarity >= 95.0, "similarity {}", hit.similarity);
    assert_eq!(hit.anchor_ts, 529 * DAY);
    assert_eq!(hit.aftermath_series.len(), 20);
    assert!(matches.iter().all(|m| (0.0..=100.0).contains(&m.similarity)));
    assert!(matches.windows(2).all(|w| w[0].similarity >= w[1].similarity));
}

#[test]
fn finds_flat_then_rally_window_at_day_500() {
    // 20 flat days, then a steady 10% climb over the last 10
    let shape: Vec<f64> = (0..30).map(|i| if i < 20 { 1.0 } else { 1.0 + 0.01 * (i - 19) as f64 }).collect();
    assert!((shape[29] / shape[0] - 1.10).abs() < 1e-12);

    let mut closes = random_walk(1000, 23);
    for (i, s) in shape.iter().enumerate() {
        closes[500 + i] = 60.0 * s;
        closes[970 + i] = 100.0 * s;
    }
    let bars: Vec<PriceBar> = closes.iter().enumerate().map(|(i, c)| PriceBar::flat("SPX", i as u64 * DAY, *c)).collect();

    let scanner = PatternScanner::new(ScanConfig::default()).unwrap();
    let matches = scanner.scan_latest(&bars).unwrap();
    let best = &matches[0];
    assert_eq!(best.window_start, 500);
    assert!(best.similarity >= 95.0, "similarity {}", best.similarity);
    assert_eq!(best.anchor_ts, 529 * DAY);
}

#[test]
fn dbscan_recovers_two_groups_and_noise() {
    let row = |name: &str, base: f64, jitter: f64| FeatureRow {
        symbol: name.to_string(),
        values: vec![base + jitter, base - jitter, base, base + jitter * 0.5, base, base],
    };
    let mut rows = Vec::new();
    for i in 0..5 {
        rows.push(row(&format!("A{}", i), 0.0, i as f64 * 0.05));
        rows.push(row(&format!("B{}", i), 10.0, i as f64 * 0.05));
    }
    rows.push(row("OUT", 40.0, 0.0));

    let cfg = ClusterConfig { eps: 0.5, min_pts: 3, normalize: false };
    let mut engine = ClusterEngine::new(cfg, Arc::new(SequentialIds::new())).unwrap();
    let report = engine.run(&FEATURE_NAMES, &rows).unwrap();

    assert_eq!(report.clusters.len(), 2);
    assert_eq!(report.noise_symbols, vec!["OUT".to_string()]);
    for c in &report.clusters {
        assert_eq!(c.member_symbols.len(), 5);
        let prefix = &c.member_symbols[0][..1];
        assert!(c.member_symbols.iter().all(|s| s.starts_with(prefix)));
    }
}
