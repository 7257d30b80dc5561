//! Data-quality assessment (completeness, consistency, timeliness) and
//! per-source descriptive statistics.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::series::AggregatedPayload;
use crate::stat;

#[derive(Debug, Clone, Serialize)]
pub struct DataQuality {
    pub completeness: BTreeMap<String, Completeness>,
    pub consistency: BTreeMap<String, Consistency>,
    pub timeliness: Option<Timeliness>,
    /// Mean completeness percentage across sources.
    pub overall_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completeness {
    pub completeness_percentage: f64,
    pub missing_count: usize,
    pub missing_percentage: f64,
}

/// Share of rows outside the 1.5 x IQR fences.
#[derive(Debug, Clone, Serialize)]
pub struct Consistency {
    pub consistency_percentage: f64,
    pub outlier_count: usize,
    pub outlier_percentage: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Timeliness {
    pub latest_date: NaiveDate,
    pub days_since_latest: i64,
    /// 100 at the latest date, decaying to 0 over a year.
    pub timeliness_score: f64,
}

pub fn assess(payload: &AggregatedPayload, names: &[&str], today: NaiveDate) -> DataQuality {
    let total = payload.len();
    let mut completeness = BTreeMap::new();
    let mut consistency = BTreeMap::new();
    let mut completeness_scores = Vec::new();

    for name in names {
        let Some(col) = payload.column(name) else {
            continue;
        };
        let missing = col.iter().filter(|v| v.is_none()).count();
        let score = if total > 0 {
            (total - missing) as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        completeness_scores.push(score);
        completeness.insert(
            name.to_string(),
            Completeness {
                completeness_percentage: score,
                missing_count: missing,
                missing_percentage: if total > 0 {
                    missing as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
            },
        );

        let values: Vec<f64> = col.iter().flatten().copied().collect();
        if values.is_empty() {
            continue;
        }
        let q1 = stat::quantile(&values, 0.25);
        let q3 = stat::quantile(&values, 0.75);
        let iqr = q3 - q1;
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;
        let outliers = values.iter().filter(|v| **v < lower || **v > upper).count();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        consistency.insert(
            name.to_string(),
            Consistency {
                consistency_percentage: if total > 0 {
                    (total - outliers) as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                outlier_count: outliers,
                outlier_percentage: if total > 0 {
                    outliers as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                min,
                max,
                range: max - min,
            },
        );
    }

    let timeliness = payload.date_range().map(|(_, latest)| {
        let days = (today - latest).num_days();
        Timeliness {
            latest_date: latest,
            days_since_latest: days,
            timeliness_score: (100.0 - days as f64 / 365.0 * 100.0).max(0.0),
        }
    });

    DataQuality {
        completeness,
        consistency,
        timeliness,
        overall_score: stat::mean(&completeness_scores),
    }
}

/// Descriptive statistics for one source's present values.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub q25: f64,
    pub q75: f64,
    pub iqr: f64,
    pub missing_percentage: f64,
}

pub fn describe(values: &[f64], missing: usize, total_rows: usize) -> SourceStats {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let q25 = stat::quantile(values, 0.25);
    let q75 = stat::quantile(values, 0.75);
    SourceStats {
        count: values.len(),
        mean: stat::mean(values),
        median: stat::median(values),
        std: stat::std_dev(values),
        min: if min.is_finite() { min } else { 0.0 },
        max: if max.is_finite() { max } else { 0.0 },
        range: if min.is_finite() && max.is_finite() {
            max - min
        } else {
            0.0
        },
        q25,
        q75,
        iqr: q75 - q25,
        missing_percentage: if total_rows > 0 {
            missing as f64 / total_rows as f64 * 100.0
        } else {
            0.0
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{SourceId, SourceSeries};
    use std::collections::BTreeMap as Map;

    fn d(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    #[test]
    fn complete_series_scores_100() {
        let mut m = Map::new();
        m.insert(
            SourceId::GoogleTrends,
            SourceSeries::new((1..=6).map(|i| (d(2024, i), i as f64)).collect()).unwrap(),
        );
        let payload = AggregatedPayload::join(&m);
        let q = assess(&payload, &["Google Trends"], d(2024, 7));
        assert_eq!(q.overall_score, 100.0);
        let c = &q.completeness["Google Trends"];
        assert_eq!(c.missing_count, 0);
    }

    #[test]
    fn misaligned_sources_lower_completeness() {
        let mut m = Map::new();
        m.insert(
            SourceId::GoogleTrends,
            SourceSeries::new((1..=4).map(|i| (d(2024, i), 1.0)).collect()).unwrap(),
        );
        m.insert(
            SourceId::Crossref,
            SourceSeries::new((3..=6).map(|i| (d(2024, i), 2.0)).collect()).unwrap(),
        );
        let payload = AggregatedPayload::join(&m);
        let q = assess(&payload, &["Google Trends", "Crossref"], d(2024, 7));
        // 6 rows total, each source present on 4.
        assert_eq!(q.completeness["Google Trends"].missing_count, 2);
        assert!((q.overall_score - 4.0 / 6.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn timeliness_decays_over_a_year() {
        let mut m = Map::new();
        m.insert(
            SourceId::GoogleTrends,
            SourceSeries::new(vec![(d(2023, 1), 1.0), (d(2023, 7), 2.0)]).unwrap(),
        );
        let payload = AggregatedPayload::join(&m);

        let fresh = assess(&payload, &["Google Trends"], d(2023, 7));
        assert_eq!(fresh.timeliness.as_ref().unwrap().timeliness_score, 100.0);

        let stale = assess(&payload, &["Google Trends"], d(2025, 7));
        assert_eq!(stale.timeliness.as_ref().unwrap().timeliness_score, 0.0);
    }

    #[test]
    fn iqr_outlier_is_counted() {
        let mut values = vec![10.0, 11.0, 9.0, 10.5, 9.5, 10.2, 9.8, 10.1];
        values.push(100.0);
        let mut m = Map::new();
        m.insert(
            SourceId::GoogleTrends,
            SourceSeries::new(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (d(2024, i as u32 + 1), *v))
                    .collect(),
            )
            .unwrap(),
        );
        let payload = AggregatedPayload::join(&m);
        let q = assess(&payload, &["Google Trends"], d(2024, 12));
        assert_eq!(q.consistency["Google Trends"].outlier_count, 1);
    }

    #[test]
    fn describe_reports_spread() {
        let s = describe(&[1.0, 2.0, 3.0, 4.0], 1, 5);
        assert_eq!(s.count, 4);
        assert_eq!(s.range, 3.0);
        assert!((s.iqr - 1.5).abs() < 1e-12);
        assert!((s.missing_percentage - 20.0).abs() < 1e-12);
    }
}
