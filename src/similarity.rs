//! Resemblance measures between two normalized series.
//!
//! RMSE, Pearson correlation and the composite 0..100 score are symmetric in
//! their arguments. Banded DTW tolerates small phase shifts.

use serde::{Deserialize, Serialize};

/// Calibration for the composite score. The defaults were tuned for
/// daily-return-scale series and are pending calibration review; changing
/// them must bump `version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    pub version: String,
    pub rmse_scale: f64,
    pub rmse_weight: f64,
    pub corr_weight: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            version: "sim-v1".to_string(),
            rmse_scale: 300.0,
            rmse_weight: 0.6,
            corr_weight: 0.4,
        }
    }
}

/// Root-mean-square pointwise difference over the shared length.
/// Empty input yields infinity (nothing to compare).
pub fn rmse(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return f64::INFINITY;
    }
    let sum: f64 = a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum();
    (sum / n as f64).sqrt()
}

/// Pearson correlation over the shared length; 0 for fewer than 3 points,
/// zero variance, or any non-finite intermediate.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 3 {
        return 0.0;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a <= 1e-18 || var_b <= 1e-18 {
        return 0.0;
    }
    let r = cov / (var_a * var_b).sqrt();
    if r.is_finite() {
        r.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Composite similarity in [0, 100] from an RMSE and a correlation.
pub fn composite_from(rmse: f64, corr: f64, weights: &SimilarityWeights) -> f64 {
    let rmse_term = if rmse.is_finite() {
        (100.0 - rmse * weights.rmse_scale).max(0.0)
    } else {
        0.0
    };
    let corr = if corr.is_finite() { corr.clamp(-1.0, 1.0) } else { 0.0 };
    let corr_term = (corr + 1.0) * 50.0;
    let score = rmse_term * weights.rmse_weight + corr_term * weights.corr_weight;
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Composite similarity with the default calibration.
pub fn similarity(a: &[f64], b: &[f64]) -> f64 {
    similarity_with(a, b, &SimilarityWeights::default())
}

pub fn similarity_with(a: &[f64], b: &[f64], weights: &SimilarityWeights) -> f64 {
    composite_from(rmse(a, b), pearson(a, b), weights)
}

/// Dynamic time warping distance restricted to a Sakoe-Chiba band of
/// `band` cells around the diagonal. The band is widened to the length
/// difference so a path always exists. Empty input yields infinity.
pub fn dtw_distance(a: &[f64], b: &[f64], band: usize) -> f64 {
    let (n, m) = (a.len(), b.len());
    if n == 0 || m == 0 {
        return f64::INFINITY;
    }
    let band = band.max(n.abs_diff(m));
    let width = m + 1;
    let mut cost = vec![f64::INFINITY; (n + 1) * width];
    cost[0] = 0.0;
    for i in 1..=n {
        let lo = i.saturating_sub(band).max(1);
        let hi = (i + band).min(m);
        for j in lo..=hi {
            let d = (a[i - 1] - b[j - 1]).abs();
            let best = cost[(i - 1) * width + j]
                .min(cost[i * width + j - 1])
                .min(cost[(i - 1) * width + j - 1]);
            cost[i * width + j] = d + best;
        }
    }
    cost[n * width + m]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_series_score_100() {
        let a = [0.0, 0.01, 0.03, 0.02, 0.05];
        assert_eq!(rmse(&a, &a), 0.0);
        assert!((pearson(&a, &a) - 1.0).abs() < 1e-12);
        assert!((similarity(&a, &a) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_anti_correlated_scores_low() {
        let a = [0.0, 0.1, 0.2, 0.3];
        let b = [0.0, -0.1, -0.2, -0.3];
        assert!((pearson(&a, &b) + 1.0).abs() < 1e-12);
        // rmse term is floored at 0 and corr term is 0
        assert!(similarity(&a, &b) < 1e-9);
    }

    #[test]
    fn test_pearson_degenerate_cases() {
        assert_eq!(pearson(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[], &[]), 0.0);
    }

    #[test]
    fn test_composite_formula() {
        let w = SimilarityWeights::default();
        // rmse 0.1 -> 100 - 30 = 70 * 0.6 = 42; corr 0.5 -> 75 * 0.4 = 30
        assert!((composite_from(0.1, 0.5, &w) - 72.0).abs() < 1e-9);
        assert_eq!(composite_from(f64::NAN, f64::NAN, &w), 20.0);
    }

    #[test]
    fn test_symmetry() {
        let a = [0.0, 0.02, -0.01, 0.04, 0.03, 0.07];
        let b = [0.0, 0.01, 0.00, 0.02, 0.05, 0.04];
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
        assert_eq!(pearson(&a, &b), pearson(&b, &a));
    }

    #[test]
    fn test_dtw_handles_phase_shift() {
        let a = [0.0, 0.0, 1.0, 2.0, 1.0, 0.0];
        let b = [0.0, 1.0, 2.0, 1.0, 0.0, 0.0];
        let shifted = dtw_distance(&a, &b, 2);
        assert!(shifted < 1e-12);
        assert!(rmse(&a, &b) > 0.5);
        assert_eq!(dtw_distance(&[], &b, 2), f64::INFINITY);
    }

    #[test]
    fn test_dtw_unequal_lengths_find_path() {
        let d = dtw_distance(&[0.0, 1.0, 2.0], &[0.0, 1.0, 1.0, 2.0, 2.0], 0);
        assert!(d.is_finite());
    }
}
