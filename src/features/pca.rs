//! Principal component analysis over the joint (all-sources-present) rows.
//! Columns are standardized, the covariance matrix is diagonalized with a
//! cyclic Jacobi sweep, and the top components are interpreted through their
//! loadings (eigenvector scaled by the square root of the variance ratio).

use serde::Serialize;

use crate::error::PipelineError;
use crate::stat;

use super::MIN_PCA_POINTS;

#[derive(Debug, Clone, Serialize)]
pub struct PcaResult {
    pub components_analyzed: usize,
    pub total_variance_explained_pct: f64,
    /// Variance ratio per component, descending. Non-negative, sums to at
    /// most 1.
    pub variance_by_component: Vec<f64>,
    pub cumulative_variance: Vec<f64>,
    /// Up to the top 3 components, interpreted.
    pub dominant_patterns: Vec<PcaComponent>,
    pub data_points_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PcaComponent {
    pub component: String,
    pub variance_explained_pct: f64,
    pub cumulative_variance_pct: f64,
    pub dominant_sources: Vec<String>,
    /// Loading per source, in source order.
    pub loadings: Vec<(String, f64)>,
    pub source_contributions: Vec<SourceContribution>,
    pub pattern_type: ComponentPattern,
    pub interpretation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceContribution {
    pub source: String,
    pub loading: f64,
    pub contribution_level: ContributionLevel,
    pub role: &'static str,
    pub direction: LoadingDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingDirection {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentPattern {
    ContrastPattern,
    AlignmentPattern,
    InversePattern,
    MixedPattern,
}

/// `columns` are the joint rows per source, all of equal length; `names`
/// parallels `columns`.
pub fn analyze(columns: &[Vec<f64>], names: &[String]) -> Result<PcaResult, PipelineError> {
    let p = columns.len();
    if p < 2 {
        return Err(PipelineError::DataInsufficient {
            analysis: "pca",
            needed: 2,
            got: p,
        });
    }
    let n = columns[0].len();
    if n < MIN_PCA_POINTS {
        return Err(PipelineError::DataInsufficient {
            analysis: "pca",
            needed: MIN_PCA_POINTS,
            got: n,
        });
    }

    // Standardize each column; constant columns contribute nothing.
    let standardized: Vec<Vec<f64>> = columns
        .iter()
        .map(|col| {
            let m = stat::mean(col);
            let s = stat::std_dev_pop(col);
            if s == 0.0 {
                vec![0.0; n]
            } else {
                col.iter().map(|v| (v - m) / s).collect()
            }
        })
        .collect();

    // Covariance matrix of the standardized columns.
    let mut cov = vec![vec![0.0; p]; p];
    for i in 0..p {
        for j in i..p {
            let mut s = 0.0;
            for k in 0..n {
                s += standardized[i][k] * standardized[j][k];
            }
            let c = s / (n - 1) as f64;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    let (mut eigvals, eigvecs) = jacobi_eigen(&cov);

    // Sort descending by eigenvalue, clamp numeric noise below zero.
    let mut order: Vec<usize> = (0..p).collect();
    order.sort_by(|&a, &b| {
        eigvals[b]
            .partial_cmp(&eigvals[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    for v in &mut eigvals {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
    let total: f64 = eigvals.iter().sum();
    let ratios: Vec<f64> = order
        .iter()
        .map(|&i| if total > 0.0 { eigvals[i] / total } else { 0.0 })
        .collect();
    let mut cumulative = Vec::with_capacity(p);
    let mut acc = 0.0;
    for r in &ratios {
        acc += r;
        cumulative.push(acc);
    }

    let mut dominant_patterns = Vec::new();
    for (rank, &col) in order.iter().enumerate().take(3.min(p)) {
        let ratio = ratios[rank];
        let mut loadings: Vec<f64> = (0..p).map(|row| eigvecs[row][col] * ratio.sqrt()).collect();
        // Fix the sign so the largest-magnitude loading is positive.
        if let Some(max) = loadings
            .iter()
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(std::cmp::Ordering::Equal))
        {
            if *max < 0.0 {
                for l in &mut loadings {
                    *l = -*l;
                }
            }
        }
        dominant_patterns.push(interpret_component(rank, ratio, cumulative[rank], &loadings, names));
    }

    Ok(PcaResult {
        components_analyzed: p,
        total_variance_explained_pct: ratios.iter().sum::<f64>() * 100.0,
        variance_by_component: ratios,
        cumulative_variance: cumulative,
        dominant_patterns,
        data_points_used: n,
    })
}

fn interpret_component(
    rank: usize,
    ratio: f64,
    cumulative: f64,
    loadings: &[f64],
    names: &[String],
) -> PcaComponent {
    let num = rank + 1;

    let mut contributions: Vec<SourceContribution> = loadings
        .iter()
        .zip(names)
        .map(|(&loading, name)| {
            let (level, role) = if loading.abs() >= 0.6 {
                (ContributionLevel::High, "dominant driver")
            } else if loading.abs() >= 0.3 {
                (ContributionLevel::Medium, "significant contributor")
            } else {
                (ContributionLevel::Low, "minor contributor")
            };
            let direction = if loading > 0.0 {
                LoadingDirection::Positive
            } else if loading < 0.0 {
                LoadingDirection::Negative
            } else {
                LoadingDirection::Neutral
            };
            SourceContribution {
                source: name.clone(),
                loading,
                contribution_level: level,
                role,
                direction,
            }
        })
        .collect();
    contributions.sort_by(|a, b| {
        b.loading
            .abs()
            .partial_cmp(&a.loading.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let positive = loadings.iter().filter(|&&l| l > 0.3).count();
    let negative = loadings.iter().filter(|&&l| l < -0.3).count();
    let (pattern_type, mut interpretation) = if positive > 1 && negative > 1 {
        (
            ComponentPattern::ContrastPattern,
            format!("Component {num} reveals contrasting patterns between different source types"),
        )
    } else if positive >= 2 {
        (
            ComponentPattern::AlignmentPattern,
            format!("Component {num} shows alignment and synergy between multiple sources"),
        )
    } else if negative >= 2 {
        (
            ComponentPattern::InversePattern,
            format!("Component {num} demonstrates inverse relationships between sources"),
        )
    } else {
        (
            ComponentPattern::MixedPattern,
            format!("Component {num} represents a complex interaction pattern between sources"),
        )
    };

    match pattern_type {
        ComponentPattern::ContrastPattern => {
            let pos = join_sources(&contributions, LoadingDirection::Positive);
            let neg = join_sources(&contributions, LoadingDirection::Negative);
            interpretation.push_str(&format!(
                ", where {pos} show positive correlation while {neg} show inverse correlation with the main pattern"
            ));
        }
        ComponentPattern::AlignmentPattern => {
            let dom: Vec<&str> = contributions
                .iter()
                .filter(|c| c.contribution_level == ContributionLevel::High)
                .take(2)
                .map(|c| c.source.as_str())
                .collect();
            if !dom.is_empty() {
                interpretation.push_str(&format!(
                    ", with {} working in synergy to define this pattern",
                    dom.join(", ")
                ));
            }
        }
        ComponentPattern::InversePattern => {
            let neg = join_sources(&contributions, LoadingDirection::Negative);
            interpretation.push_str(&format!(
                ", characterized by inverse relationships among {neg}"
            ));
        }
        ComponentPattern::MixedPattern => {}
    }

    let dominant_sources: Vec<String> = contributions
        .iter()
        .take(3)
        .map(|c| c.source.clone())
        .collect();

    PcaComponent {
        component: format!("PC{num}"),
        variance_explained_pct: ratio * 100.0,
        cumulative_variance_pct: cumulative * 100.0,
        dominant_sources,
        loadings: names.iter().cloned().zip(loadings.iter().copied()).collect(),
        source_contributions: contributions,
        pattern_type,
        interpretation,
    }
}

fn join_sources(contributions: &[SourceContribution], direction: LoadingDirection) -> String {
    contributions
        .iter()
        .filter(|c| c.direction == direction)
        .map(|c| c.source.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Cyclic Jacobi diagonalization of a symmetric matrix. Returns eigenvalues
/// and the matrix of eigenvectors as columns. The matrices here are tiny
/// (at most 5x5) so convergence takes a handful of sweeps.
fn jacobi_eigen(a: &[Vec<f64>]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let p = a.len();
    let mut m: Vec<Vec<f64>> = a.to_vec();
    let mut v = vec![vec![0.0; p]; p];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for _sweep in 0..50 {
        let mut off = 0.0;
        for i in 0..p {
            for j in (i + 1)..p {
                off += m[i][j] * m[i][j];
            }
        }
        if off < 1e-18 {
            break;
        }
        for i in 0..p {
            for j in (i + 1)..p {
                if m[i][j].abs() < 1e-300 {
                    continue;
                }
                let theta = (m[j][j] - m[i][i]) / (2.0 * m[i][j]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..p {
                    let mik = m[i][k];
                    let mjk = m[j][k];
                    m[i][k] = c * mik - s * mjk;
                    m[j][k] = s * mik + c * mjk;
                }
                for k in 0..p {
                    let mki = m[k][i];
                    let mkj = m[k][j];
                    m[k][i] = c * mki - s * mkj;
                    m[k][j] = s * mki + c * mkj;
                }
                for k in 0..p {
                    let vki = v[k][i];
                    let vkj = v[k][j];
                    v[k][i] = c * vki - s * vkj;
                    v[k][j] = s * vki + c * vkj;
                }
            }
        }
    }

    let eigvals = (0..p).map(|i| m[i][i]).collect();
    (eigvals, v)
}
