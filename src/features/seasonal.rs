//! Calendar seasonality for a single source: monthly and quarterly profiles,
//! year-over-year growth, and a seasonality-strength score.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::PipelineError;
use crate::stat;

use super::MIN_FOURIER_POINTS;

#[derive(Debug, Clone, Serialize)]
pub struct SeasonalInsights {
    pub monthly: MonthlyPatterns,
    pub quarterly: QuarterlyPatterns,
    pub year_over_year: YearOverYear,
    pub strength: SeasonalityStrength,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyPatterns {
    /// Mean per calendar month (1-12), only months with observations.
    pub means: BTreeMap<u32, f64>,
    pub stds: BTreeMap<u32, f64>,
    pub peak_month: u32,
    pub low_month: u32,
    pub peak_value: f64,
    pub low_value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuarterlyPatterns {
    pub means: BTreeMap<u32, f64>,
    pub stds: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearOverYear {
    pub yearly_means: BTreeMap<i32, f64>,
    /// Mean percentage change between consecutive yearly means. 0 with fewer
    /// than two years of data.
    pub average_growth_rate_pct: f64,
}

/// Dispersion of the monthly standard deviations relative to the overall
/// monthly level.
#[derive(Debug, Clone, Serialize)]
pub struct SeasonalityStrength {
    pub value: f64,
    pub level: SeasonalityLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityLevel {
    Strong,
    Moderate,
    Weak,
}

impl SeasonalityLevel {
    fn from_value(v: f64) -> Self {
        if v > 0.3 {
            SeasonalityLevel::Strong
        } else if v > 0.1 {
            SeasonalityLevel::Moderate
        } else {
            SeasonalityLevel::Weak
        }
    }
}

pub fn analyze(obs: &[(NaiveDate, f64)]) -> Result<SeasonalInsights, PipelineError> {
    if obs.len() < MIN_FOURIER_POINTS {
        return Err(PipelineError::DataInsufficient {
            analysis: "seasonal",
            needed: MIN_FOURIER_POINTS,
            got: obs.len(),
        });
    }

    let mut by_month: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut by_quarter: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    let mut by_year: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (date, value) in obs {
        by_month.entry(date.month()).or_default().push(*value);
        by_quarter
            .entry((date.month() - 1) / 3 + 1)
            .or_default()
            .push(*value);
        by_year.entry(date.year()).or_default().push(*value);
    }

    let monthly_means: BTreeMap<u32, f64> =
        by_month.iter().map(|(m, v)| (*m, stat::mean(v))).collect();
    let monthly_stds: BTreeMap<u32, f64> =
        by_month.iter().map(|(m, v)| (*m, stat::std_dev(v))).collect();

    let (&peak_month, &peak_value) = monthly_means
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or(PipelineError::DataInsufficient {
            analysis: "seasonal",
            needed: 1,
            got: 0,
        })?;
    let (&low_month, &low_value) = monthly_means
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or(PipelineError::DataInsufficient {
            analysis: "seasonal",
            needed: 1,
            got: 0,
        })?;

    let yearly_means: BTreeMap<i32, f64> =
        by_year.iter().map(|(y, v)| (*y, stat::mean(v))).collect();
    let growth = if yearly_means.len() > 1 {
        let means: Vec<f64> = yearly_means.values().copied().collect();
        let changes: Vec<f64> = means
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        stat::mean(&changes) * 100.0
    } else {
        0.0
    };

    let level_mean = stat::mean(&monthly_means.values().copied().collect::<Vec<_>>());
    let std_values: Vec<f64> = monthly_stds.values().copied().collect();
    let strength_value = if level_mean != 0.0 {
        stat::std_dev(&std_values) / level_mean
    } else {
        0.0
    };

    Ok(SeasonalInsights {
        monthly: MonthlyPatterns {
            means: monthly_means,
            stds: monthly_stds,
            peak_month,
            low_month,
            peak_value,
            low_value,
        },
        quarterly: QuarterlyPatterns {
            means: by_quarter.iter().map(|(q, v)| (*q, stat::mean(v))).collect(),
            stds: by_quarter
                .iter()
                .map(|(q, v)| (*q, stat::std_dev(v)))
                .collect(),
        },
        year_over_year: YearOverYear {
            yearly_means,
            average_growth_rate_pct: growth,
        },
        strength: SeasonalityStrength {
            value: strength_value,
            level: SeasonalityLevel::from_value(strength_value),
        },
    })
}
