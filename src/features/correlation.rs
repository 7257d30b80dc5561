//! Pairwise Pearson correlations across sources and the derived heatmap
//! summary (dense/sparse regions, clusters, outlier sources, and half-split
//! correlation gradients) that the prompt narrates from.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::series::AggregatedPayload;
use crate::stat;

use super::Significance;

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    /// Upper-triangle pairs in source order. Pairs with fewer than 2 joint
    /// observations are omitted.
    pub pairs: Vec<PairCorrelation>,
}

impl CorrelationMatrix {
    pub fn get(&self, a: &str, b: &str) -> Option<&PairCorrelation> {
        self.pairs.iter().find(|p| {
            (p.source_a == a && p.source_b == b) || (p.source_a == b && p.source_b == a)
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PairCorrelation {
    pub source_a: String,
    pub source_b: String,
    pub correlation: f64,
    pub p_value: f64,
    pub significance: Significance,
    pub strength: CorrelationStrength,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
    VeryWeak,
}

impl CorrelationStrength {
    pub fn from_r(r: f64) -> Self {
        let a = r.abs();
        if a >= 0.8 {
            CorrelationStrength::VeryStrong
        } else if a >= 0.6 {
            CorrelationStrength::Strong
        } else if a >= 0.4 {
            CorrelationStrength::Moderate
        } else if a >= 0.2 {
            CorrelationStrength::Weak
        } else {
            CorrelationStrength::VeryWeak
        }
    }
}

/// Correlate every source pair on their jointly present rows.
pub fn analyze(payload: &AggregatedPayload, names: &[&str]) -> CorrelationMatrix {
    let mut pairs = Vec::new();
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            if let Some((x, y)) = joint_pair(payload, names[i], names[j], 0, payload.len()) {
                if x.len() < 2 {
                    continue;
                }
                let (r, p) = stat::pearson(&x, &y);
                pairs.push(PairCorrelation {
                    source_a: names[i].to_string(),
                    source_b: names[j].to_string(),
                    correlation: r,
                    p_value: p,
                    significance: Significance::from_p(p),
                    strength: CorrelationStrength::from_r(r),
                    sample_size: x.len(),
                });
            }
        }
    }
    CorrelationMatrix { pairs }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeatmapSummary {
    pub value_ranges: BTreeMap<String, ValueRange>,
    /// Pairs with |r| > 0.7, described. At most 5.
    pub most_dense_regions: Vec<String>,
    /// Pairs with |r| < 0.3, described. At most 5.
    pub least_dense_regions: Vec<String>,
    /// Sources strongly correlated (|r| > 0.6) with at least two others.
    /// At most 3; empty with fewer than 3 sources.
    pub detected_clusters: Vec<String>,
    /// Sources whose pairwise correlations are at least 80% high (|r| > 0.7)
    /// or 80% low (|r| < 0.2). At most 3.
    pub detected_outliers: Vec<String>,
    /// Pairs whose correlation moved by more than 0.4 between the early and
    /// late halves of the series.
    pub gradients: BTreeMap<String, String>,
    pub matrix_summary: MatrixSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatrixSummary {
    pub strongest_positive: f64,
    pub strongest_negative: f64,
    pub average_correlation: f64,
}

pub fn heatmap_summary(
    payload: &AggregatedPayload,
    names: &[&str],
    matrix: &CorrelationMatrix,
) -> HeatmapSummary {
    let mut value_ranges = BTreeMap::new();
    for name in names {
        let values: Vec<f64> = payload
            .column_observations(name)
            .iter()
            .map(|(_, v)| *v)
            .collect();
        if values.is_empty() {
            continue;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        value_ranges.insert(
            name.to_string(),
            ValueRange {
                min,
                max,
                mean: stat::mean(&values),
                std: stat::std_dev(&values),
            },
        );
    }

    let mut most_dense_regions = Vec::new();
    let mut least_dense_regions = Vec::new();
    for p in &matrix.pairs {
        if p.correlation.abs() > 0.7 {
            most_dense_regions.push(format!(
                "Strong correlation between {} and {} (r={:.3})",
                p.source_a, p.source_b, p.correlation
            ));
        } else if p.correlation.abs() < 0.3 {
            least_dense_regions.push(format!(
                "Weak correlation between {} and {} (r={:.3})",
                p.source_a, p.source_b, p.correlation
            ));
        }
    }
    most_dense_regions.truncate(5);
    least_dense_regions.truncate(5);

    let mut detected_clusters = Vec::new();
    if names.len() >= 3 {
        for a in names {
            let correlated: Vec<&str> = names
                .iter()
                .filter(|b| {
                    *b != a
                        && matrix
                            .get(a, b)
                            .map(|p| p.correlation.abs() > 0.6)
                            .unwrap_or(false)
                })
                .copied()
                .collect();
            if correlated.len() >= 2 {
                detected_clusters.push(format!(
                    "Cluster identified: {} correlated with {}",
                    a,
                    correlated.join(", ")
                ));
            }
        }
        detected_clusters.truncate(3);
    }

    let mut detected_outliers = Vec::new();
    for a in names {
        let others: Vec<f64> = matrix
            .pairs
            .iter()
            .filter(|p| p.source_a == *a || p.source_b == *a)
            .map(|p| p.correlation.abs())
            .collect();
        if others.is_empty() {
            continue;
        }
        let high = others.iter().filter(|r| **r > 0.7).count();
        let low = others.iter().filter(|r| **r < 0.2).count();
        if high as f64 >= others.len() as f64 * 0.8 {
            detected_outliers.push(format!("{a}: high-correlation pattern with other sources"));
        } else if low as f64 >= others.len() as f64 * 0.8 {
            detected_outliers.push(format!("{a}: low-correlation pattern with other sources"));
        }
    }
    detected_outliers.truncate(3);

    let gradients = correlation_gradients(payload, names);

    let rs: Vec<f64> = matrix.pairs.iter().map(|p| p.correlation).collect();
    let matrix_summary = MatrixSummary {
        strongest_positive: rs.iter().copied().fold(0.0, f64::max),
        strongest_negative: rs.iter().copied().fold(0.0, f64::min),
        average_correlation: stat::mean(&rs),
    };

    HeatmapSummary {
        value_ranges,
        most_dense_regions,
        least_dense_regions,
        detected_clusters,
        detected_outliers,
        gradients,
        matrix_summary,
    }
}

/// Correlation change between the early and late halves of the series.
/// Needs at least a year of rows and 3 joint observations per half per pair.
fn correlation_gradients(payload: &AggregatedPayload, names: &[&str]) -> BTreeMap<String, String> {
    let mut gradients = BTreeMap::new();
    let n = payload.len();
    if n < 12 {
        return gradients;
    }
    let split = n / 2;
    for i in 0..names.len() {
        for j in (i + 1)..names.len() {
            let early = joint_pair(payload, names[i], names[j], 0, split);
            let late = joint_pair(payload, names[i], names[j], split, n);
            if let (Some((ex, ey)), Some((lx, ly))) = (early, late) {
                if ex.len() < 3 || lx.len() < 3 {
                    continue;
                }
                let (early_r, _) = stat::pearson(&ex, &ey);
                let (late_r, _) = stat::pearson(&lx, &ly);
                let change = late_r - early_r;
                if change.abs() > 0.4 {
                    let direction = if change > 0.0 { "increased" } else { "decreased" };
                    gradients.insert(
                        format!("{}_{}", names[i], names[j]),
                        format!(
                            "Correlation between {} and {} {} from {:.3} to {:.3}",
                            names[i], names[j], direction, early_r, late_r
                        ),
                    );
                }
            }
        }
    }
    gradients
}

/// Jointly present values of two columns over a row range.
fn joint_pair(
    payload: &AggregatedPayload,
    a: &str,
    b: &str,
    from: usize,
    to: usize,
) -> Option<(Vec<f64>, Vec<f64>)> {
    let ca = payload.column(a)?;
    let cb = payload.column(b)?;
    let mut x = Vec::new();
    let mut y = Vec::new();
    for i in from..to.min(ca.len()) {
        if let (Some(va), Some(vb)) = (ca[i], cb[i]) {
            x.push(va);
            y.push(vb);
        }
    }
    Some((x, y))
}
