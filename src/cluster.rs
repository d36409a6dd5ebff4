//! Density-based clustering of instrument feature rows into archetypes.
//!
//! DBSCAN over the feature matrix (optionally z-scored per column). A point
//! first marked noise can later be absorbed as a border point of a cluster
//! grown from another seed. Border points claimed by an earlier cluster stay
//! there (first seen wins), and any cluster left with fewer than `min_pts`
//! members afterwards is dissolved back into noise.
//!
//! Every run recomputes the whole report; there is no incremental path.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::features::{
    FeatureRow, ANALOG_EDGE, ANALOG_HIT_RATE, MEAN_REVERSION, MOMENTUM, TREND_STRENGTH, VOLATILITY,
};
use crate::ids::IdGenerator;
use crate::logging::{self, obj, v_num, Domain, Level};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub eps: f64,
    pub min_pts: usize,
    pub normalize: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { eps: 0.8, min_pts: 3, normalize: true }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(EngineError::invalid_config(format!("eps must be > 0, got {}", self.eps)));
        }
        if self.min_pts == 0 {
            return Err(EngineError::invalid_config("min_pts must be >= 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bin {
    VeryLow,
    Low,
    Normal,
    High,
    VeryHigh,
}

impl Bin {
    pub fn from_z(z: f64) -> Self {
        if z < -1.5 {
            Bin::VeryLow
        } else if z < -0.5 {
            Bin::Low
        } else if z <= 0.5 {
            Bin::Normal
        } else if z <= 1.5 {
            Bin::High
        } else {
            Bin::VeryHigh
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bin::VeryLow => "VERY_LOW",
            Bin::Low => "LOW",
            Bin::Normal => "NORMAL",
            Bin::High => "HIGH",
            Bin::VeryHigh => "VERY_HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternCluster {
    pub cluster_id: String,
    /// Centroid in raw feature units.
    pub centroid: Vec<f64>,
    /// Centroid in column z-scores; drives bins and labels.
    pub centroid_z: Vec<f64>,
    pub member_symbols: Vec<String>,
    /// Mean distance of members to the centroid, in clustering space.
    pub dispersion: f64,
    pub label: String,
    pub signature: String,
    #[serde(skip)]
    space_centroid: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub feature_names: Vec<String>,
    pub clusters: Vec<PatternCluster>,
    pub noise_symbols: Vec<String>,
    pub column_means: Vec<f64>,
    pub column_stds: Vec<f64>,
    pub normalized: bool,
    pub eps: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Cluster(usize),
}

/// Owns its id source and the latest report; callers own its lifecycle.
pub struct ClusterEngine {
    cfg: ClusterConfig,
    ids: Arc<dyn IdGenerator>,
    latest: Option<ClusterReport>,
}

impl ClusterEngine {
    pub fn new(cfg: ClusterConfig, ids: Arc<dyn IdGenerator>) -> EngineResult<Self> {
        cfg.validate()?;
        Ok(Self { cfg, ids, latest: None })
    }

    pub fn latest(&self) -> Option<&ClusterReport> {
        self.latest.as_ref()
    }

    pub fn run(&mut self, feature_names: &[&str], rows: &[FeatureRow]) -> EngineResult<&ClusterReport> {
        let dims = feature_names.len();
        for row in rows {
            if row.values.len() != dims {
                return Err(EngineError::invalid_input(format!(
                    "{}: {} values for {} features",
                    row.symbol,
                    row.values.len(),
                    dims
                )));
            }
            if row.values.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::invalid_input(format!("{}: non-finite feature", row.symbol)));
            }
        }

        let (means, stds) = column_stats(rows, dims);
        let zrows: Vec<Vec<f64>> = rows.iter().map(|r| zscore(&r.values, &means, &stds)).collect();
        let space: Vec<Vec<f64>> = if self.cfg.normalize {
            zrows.clone()
        } else {
            rows.iter().map(|r| r.values.clone()).collect()
        };

        let labels = dbscan(&space, self.cfg.eps, self.cfg.min_pts);
        let groups = finalize_groups(&labels, self.cfg.min_pts);

        let mut clusters = Vec::with_capacity(groups.len());
        let mut in_cluster = vec![false; rows.len()];
        for members in &groups {
            for &m in members {
                in_cluster[m] = true;
            }
            let centroid = mean_of(members.iter().map(|&m| rows[m].values.as_slice()), dims);
            let space_centroid = mean_of(members.iter().map(|&m| space[m].as_slice()), dims);
            let centroid_z = zscore(&centroid, &means, &stds);
            let dispersion = members
                .iter()
                .map(|&m| euclidean(&space[m], &space_centroid))
                .sum::<f64>()
                / members.len() as f64;
            let bins: Vec<Bin> = centroid_z.iter().map(|z| Bin::from_z(*z)).collect();
            let signature = feature_names
                .iter()
                .zip(&bins)
                .map(|(name, bin)| format!("{}={}", name, bin.as_str()))
                .collect::<Vec<_>>()
                .join("|");
            let label = infer_label(feature_names, &bins).to_string();
            clusters.push(PatternCluster {
                cluster_id: self.ids.next_id("cluster"),
                centroid,
                centroid_z,
                member_symbols: members.iter().map(|&m| rows[m].symbol.clone()).collect(),
                dispersion,
                label,
                signature,
                space_centroid,
            });
        }

        let noise_symbols = rows
            .iter()
            .zip(&in_cluster)
            .filter(|(_, c)| !**c)
            .map(|(r, _)| r.symbol.clone())
            .collect::<Vec<_>>();

        logging::log(
            Level::Info,
            Domain::Cluster,
            "clustered",
            obj(&[
                ("rows", serde_json::json!(rows.len())),
                ("clusters", serde_json::json!(clusters.len())),
                ("noise", serde_json::json!(noise_symbols.len())),
                ("eps", v_num(self.cfg.eps)),
            ]),
        );

        let report = ClusterReport {
            feature_names: feature_names.iter().map(|s| s.to_string()).collect(),
            clusters,
            noise_symbols,
            column_means: means,
            column_stds: stds,
            normalized: self.cfg.normalize,
            eps: self.cfg.eps,
        };
        Ok(&*self.latest.insert(report))
    }

    /// Nearest cluster whose centroid lies within eps of `values`.
    pub fn assign(&self, values: &[f64]) -> Option<&PatternCluster> {
        let report = self.latest.as_ref()?;
        if values.len() != report.feature_names.len() {
            return None;
        }
        let point = if report.normalized {
            zscore(values, &report.column_means, &report.column_stds)
        } else {
            values.to_vec()
        };
        report
            .clusters
            .iter()
            .map(|c| (c, euclidean(&point, &c.space_centroid)))
            .filter(|(_, d)| *d <= report.eps)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(c, _)| c)
    }
}

fn column_stats(rows: &[FeatureRow], dims: usize) -> (Vec<f64>, Vec<f64>) {
    let n = rows.len().max(1) as f64;
    let mut means = vec![0.0; dims];
    for row in rows {
        for (m, v) in means.iter_mut().zip(&row.values) {
            *m += v / n;
        }
    }
    let mut stds = vec![0.0; dims];
    for row in rows {
        for ((s, v), m) in stds.iter_mut().zip(&row.values).zip(&means) {
            *s += (v - m) * (v - m) / n;
        }
    }
    for s in stds.iter_mut() {
        *s = s.sqrt();
    }
    (means, stds)
}

/// Zero-variance columns map to 0.
fn zscore(values: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    values
        .iter()
        .zip(means)
        .zip(stds)
        .map(|((v, m), s)| if *s > 1e-12 { (v - m) / s } else { 0.0 })
        .collect()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum::<f64>().sqrt()
}

fn mean_of<'a>(points: impl Iterator<Item = &'a [f64]>, dims: usize) -> Vec<f64> {
    let mut sum = vec![0.0; dims];
    let mut n = 0usize;
    for p in points {
        for (s, v) in sum.iter_mut().zip(p) {
            *s += v;
        }
        n += 1;
    }
    if n > 0 {
        for s in sum.iter_mut() {
            *s /= n as f64;
        }
    }
    sum
}

fn region(points: &[Vec<f64>], idx: usize, eps: f64) -> Vec<usize> {
    points
        .iter()
        .enumerate()
        .filter(|(_, p)| euclidean(p, &points[idx]) <= eps)
        .map(|(i, _)| i)
        .collect()
}

fn dbscan(points: &[Vec<f64>], eps: f64, min_pts: usize) -> Vec<Label> {
    let mut labels = vec![Label::Unvisited; points.len()];
    let mut next_cluster = 0usize;
    for p in 0..points.len() {
        if labels[p] != Label::Unvisited {
            continue;
        }
        let neighbours = region(points, p, eps);
        if neighbours.len() < min_pts {
            labels[p] = Label::Noise;
            continue;
        }
        let c = next_cluster;
        next_cluster += 1;
        labels[p] = Label::Cluster(c);
        let mut queue: VecDeque<usize> = neighbours.into_iter().filter(|&q| q != p).collect();
        while let Some(q) = queue.pop_front() {
            match labels[q] {
                Label::Noise => {
                    // border point reclaimed from noise; not expanded
                    labels[q] = Label::Cluster(c);
                    continue;
                }
                Label::Cluster(_) => continue,
                Label::Unvisited => {}
            }
            labels[q] = Label::Cluster(c);
            let qn = region(points, q, eps);
            if qn.len() >= min_pts {
                queue.extend(qn.into_iter().filter(|&r| labels[r] == Label::Unvisited || labels[r] == Label::Noise));
            }
        }
    }
    labels
}

/// Member index lists per surviving cluster, in order of cluster creation.
fn finalize_groups(labels: &[Label], min_pts: usize) -> Vec<Vec<usize>> {
    let count = labels
        .iter()
        .filter_map(|l| match l {
            Label::Cluster(c) => Some(*c + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let mut groups = vec![Vec::new(); count];
    for (i, l) in labels.iter().enumerate() {
        if let Label::Cluster(c) = l {
            groups[*c].push(i);
        }
    }
    groups.into_iter().filter(|g| g.len() >= min_pts).collect()
}

fn infer_label(names: &[&str], bins: &[Bin]) -> &'static str {
    let get = |name: &str| -> Bin {
        names
            .iter()
            .position(|n| *n == name)
            .and_then(|i| bins.get(i).copied())
            .unwrap_or(Bin::Normal)
    };
    let momentum = get(MOMENTUM);
    let volatility = get(VOLATILITY);
    let reversion = get(MEAN_REVERSION);
    let trend = get(TREND_STRENGTH);
    let edge = get(ANALOG_EDGE);
    let hit = get(ANALOG_HIT_RATE);

    if momentum <= Bin::Low && reversion >= Bin::High {
        "oversold_bounce"
    } else if volatility == Bin::VeryHigh && momentum <= Bin::Low {
        "capitulation"
    } else if momentum >= Bin::High && trend >= Bin::High {
        "momentum_breakout"
    } else if momentum >= Bin::High && reversion <= Bin::Low {
        "overextended_rally"
    } else if trend <= Bin::Low && momentum <= Bin::Low {
        "downtrend_continuation"
    } else if volatility <= Bin::Low && momentum == Bin::Normal {
        "quiet_consolidation"
    } else if edge >= Bin::High && hit >= Bin::High {
        "historically_bullish"
    } else if edge <= Bin::Low && hit <= Bin::Low {
        "historically_bearish"
    } else {
        "mixed"
    }
}
