//! Z-score anomaly detection per source. A point is anomalous when it sits
//! more than 2.5 population standard deviations from the series mean.

use chrono::NaiveDate;
use serde::Serialize;

use crate::stat;

pub const ANOMALY_Z_THRESHOLD: f64 = 2.5;

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub count: usize,
    pub percentage: f64,
    pub max_z_score: f64,
    /// The five most recent anomalous observations.
    pub recent_anomalies: Vec<AnomalyPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyPoint {
    pub date: NaiveDate,
    pub value: f64,
    pub z_score: f64,
}

/// `None` when the series has no anomalies (or is too short to score).
pub fn detect(obs: &[(NaiveDate, f64)]) -> Option<AnomalyReport> {
    if obs.len() < 2 {
        return None;
    }
    let values: Vec<f64> = obs.iter().map(|(_, v)| *v).collect();
    let z = stat::z_scores(&values);

    let flagged: Vec<AnomalyPoint> = obs
        .iter()
        .zip(&z)
        .filter(|(_, z)| z.abs() > ANOMALY_Z_THRESHOLD)
        .map(|((date, value), z)| AnomalyPoint {
            date: *date,
            value: *value,
            z_score: z.abs(),
        })
        .collect();
    if flagged.is_empty() {
        return None;
    }

    let max_z = z.iter().map(|v| v.abs()).fold(0.0, f64::max);
    let count = flagged.len();
    let recent = flagged
        .into_iter()
        .rev()
        .take(5)
        .rev()
        .collect();

    Some(AnomalyReport {
        count,
        percentage: count as f64 / obs.len() as f64 * 100.0,
        max_z_score: max_z,
        recent_anomalies: recent,
    })
}
