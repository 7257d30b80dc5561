//! # Feature Extractor
//! Turns the joined multi-source dataset into the structured analysis payload
//! the prompt is built from: trend/seasonal/frequency features for a single
//! source, PCA/correlation/heatmap features for two or more, plus anomaly and
//! data-quality metrics either way.
//!
//! Every sub-analysis is fault-isolated: a shortfall (too few points, constant
//! series) produces an `Unavailable` sub-result and the rest of the extraction
//! proceeds.

pub mod anomaly;
pub mod correlation;
pub mod pca;
pub mod quality;
pub mod seasonal;
pub mod spectral;
pub mod trend;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::PipelineError;
use crate::series::AggregatedPayload;

use anomaly::AnomalyReport;
use correlation::{CorrelationMatrix, HeatmapSummary};
use pca::PcaResult;
use quality::{DataQuality, SourceStats};
use seasonal::SeasonalInsights;
use spectral::FrequencyInsights;
use trend::TemporalInsights;

/// Minimum joint rows for PCA.
pub const MIN_PCA_POINTS: usize = 10;
/// Minimum points for the temporal (trend) path.
pub const MIN_TEMPORAL_POINTS: usize = 12;
/// Minimum points for Fourier and seasonal sub-analyses.
pub const MIN_FOURIER_POINTS: usize = 24;

/// A fault-isolated sub-analysis outcome. Serializes as either the value
/// itself or `{"error": "..."}`, which is the shape the prompt renders.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Sub<T> {
    Ready(T),
    Unavailable { error: String },
}

impl<T> Sub<T> {
    pub fn from_result(r: Result<T, PipelineError>) -> Self {
        match r {
            Ok(v) => Sub::Ready(v),
            Err(e) => Sub::Unavailable {
                error: e.to_string(),
            },
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Sub::Ready(v) => Some(v),
            Sub::Unavailable { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Sub::Ready(_))
    }
}

/// Direction of a fitted or observed movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    pub fn from_signed(v: f64) -> Self {
        if v > 0.0 {
            TrendDirection::Increasing
        } else if v < 0.0 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

/// Statistical significance at the 0.05 level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Significant,
    NotSignificant,
}

impl Significance {
    pub fn from_p(p: f64) -> Self {
        if p < 0.05 {
            Significance::Significant
        } else {
            Significance::NotSignificant
        }
    }
}

/// Everything the prompt builder needs, in one place.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFeatures {
    pub tool_name: String,
    pub sources: Vec<String>,
    pub data_points_analyzed: usize,
    pub date_range_start: Option<NaiveDate>,
    pub date_range_end: Option<NaiveDate>,
    // Single-source path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal: Option<Sub<TemporalInsights>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seasonal: Option<Sub<SeasonalInsights>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Sub<FrequencyInsights>>,
    // Cross-source path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pca: Option<Sub<PcaResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlations: Option<Sub<CorrelationMatrix>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<Sub<HeatmapSummary>>,
    // Cross-cutting
    pub anomalies: BTreeMap<String, AnomalyReport>,
    pub statistics: BTreeMap<String, SourceStats>,
    pub quality: DataQuality,
}

impl AnalysisFeatures {
    pub fn is_single_source(&self) -> bool {
        self.sources.len() == 1
    }
}

/// Extract features for the requested sources.
///
/// A requested source missing from the joined columns fails the request only
/// when it is the sole requested source; otherwise extraction proceeds with
/// the columns that are present.
pub fn extract(
    tool_name: &str,
    payload: &AggregatedPayload,
    requested_sources: &[String],
    today: NaiveDate,
) -> Result<AnalysisFeatures, PipelineError> {
    let available: Vec<String> = requested_sources
        .iter()
        .filter(|s| payload.column(s).is_some())
        .cloned()
        .collect();

    if available.is_empty() {
        if requested_sources.len() == 1 {
            return Err(PipelineError::SourceNotFound(requested_sources[0].clone()));
        }
        return Err(PipelineError::NoData(tool_name.to_string()));
    }

    let names: Vec<&str> = available.iter().map(String::as_str).collect();
    let (start, end) = match payload.date_range() {
        Some((a, b)) => (Some(a), Some(b)),
        None => (None, None),
    };

    let mut features = AnalysisFeatures {
        tool_name: tool_name.to_string(),
        sources: available.clone(),
        data_points_analyzed: payload.len(),
        date_range_start: start,
        date_range_end: end,
        temporal: None,
        seasonal: None,
        frequency: None,
        pca: None,
        correlations: None,
        heatmap: None,
        anomalies: BTreeMap::new(),
        statistics: BTreeMap::new(),
        quality: quality::assess(payload, &names, today),
    };

    if available.len() == 1 {
        let obs = payload.column_observations(&available[0]);
        let values: Vec<f64> = obs.iter().map(|(_, v)| *v).collect();
        features.temporal = Some(Sub::from_result(trend::analyze(&values)));
        features.seasonal = Some(Sub::from_result(seasonal::analyze(&obs)));
        features.frequency = Some(Sub::from_result(spectral::analyze(&values)));
    } else {
        let joint = payload.joint_columns(&names);
        features.pca = Some(Sub::from_result(pca::analyze(&joint, &available)));
        let matrix = correlation::analyze(payload, &names);
        features.heatmap = Some(Sub::Ready(correlation::heatmap_summary(
            payload, &names, &matrix,
        )));
        features.correlations = Some(Sub::Ready(matrix));
    }

    for name in &names {
        let obs = payload.column_observations(name);
        if let Some(report) = anomaly::detect(&obs) {
            features.anomalies.insert(name.to_string(), report);
        }
        let values: Vec<f64> = obs.iter().map(|(_, v)| *v).collect();
        let missing = payload
            .column(name)
            .map(|c| c.iter().filter(|v| v.is_none()).count())
            .unwrap_or(0);
        features
            .statistics
            .insert(name.to_string(), quality::describe(&values, missing, payload.len()));
    }

    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{SourceId, SourceSeries};
    use std::collections::BTreeMap as Map;

    fn monthly(values: &[f64]) -> SourceSeries {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let year = 2020 + (i / 12) as i32;
                let month = (i % 12) as u32 + 1;
                (NaiveDate::from_ymd_opt(year, month, 1).unwrap(), *v)
            })
            .collect();
        SourceSeries::new(points).unwrap()
    }

    #[test]
    fn single_source_populates_temporal_branch_only() {
        let mut m = Map::new();
        let values: Vec<f64> = (0..30).map(|i| 10.0 + i as f64).collect();
        m.insert(SourceId::GoogleTrends, monthly(&values));
        let payload = AggregatedPayload::join(&m);
        let features = extract(
            "Benchmarking",
            &payload,
            &["Google Trends".to_string()],
            NaiveDate::from_ymd_opt(2022, 7, 1).unwrap(),
        )
        .unwrap();

        assert!(features.is_single_source());
        assert!(features.temporal.is_some());
        assert!(features.frequency.is_some());
        assert!(features.pca.is_none());
        assert!(features.heatmap.is_none());
    }

    #[test]
    fn sole_missing_source_fails_the_request() {
        let mut m = Map::new();
        m.insert(SourceId::GoogleTrends, monthly(&[1.0, 2.0, 3.0]));
        let payload = AggregatedPayload::join(&m);
        let err = extract(
            "Benchmarking",
            &payload,
            &["Crossref".to_string()],
            NaiveDate::from_ymd_opt(2022, 7, 1).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound(_)));
    }

    #[test]
    fn missing_source_tolerated_when_others_present() {
        let mut m = Map::new();
        let a: Vec<f64> = (0..24).map(|i| i as f64).collect();
        let b: Vec<f64> = (0..24).map(|i| 24.0 - i as f64).collect();
        m.insert(SourceId::GoogleTrends, monthly(&a));
        m.insert(SourceId::GoogleBooks, monthly(&b));
        let payload = AggregatedPayload::join(&m);
        let features = extract(
            "Benchmarking",
            &payload,
            &[
                "Google Trends".to_string(),
                "Google Books".to_string(),
                "Crossref".to_string(),
            ],
            NaiveDate::from_ymd_opt(2022, 7, 1).unwrap(),
        )
        .unwrap();
        assert_eq!(features.sources.len(), 2);
        assert!(features.pca.is_some());
    }
}
