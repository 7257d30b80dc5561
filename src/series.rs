//! # Source Series & Aggregation
//! Date-indexed observations per data source and the joined multi-source
//! dataset the feature extractors operate on.
//!
//! The series store itself (keyword → series lookup) is an external
//! collaborator behind [`SeriesStore`]; this module only owns the shapes and
//! the date join.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The fixed catalogue of adoption-signal sources. Enum order is the reference
/// ordering used when rendering `sources_text` for cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    GoogleTrends,
    GoogleBooks,
    BainUsability,
    Crossref,
    BainSatisfaction,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::GoogleTrends,
        SourceId::GoogleBooks,
        SourceId::BainUsability,
        SourceId::Crossref,
        SourceId::BainSatisfaction,
    ];

    /// Human-readable name used in prompts, findings, and cache keys.
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::GoogleTrends => "Google Trends",
            SourceId::GoogleBooks => "Google Books",
            SourceId::BainUsability => "Bain Usability",
            SourceId::Crossref => "Crossref",
            SourceId::BainSatisfaction => "Bain Satisfaction",
        }
    }

    /// Accepts snake_case ids, display names, and legacy numeric ids (1-5).
    pub fn parse(s: &str) -> Option<SourceId> {
        let t = s.trim();
        match t.to_ascii_lowercase().as_str() {
            "google_trends" | "google trends" | "1" => Some(SourceId::GoogleTrends),
            "google_books" | "google books" | "2" => Some(SourceId::GoogleBooks),
            "bain_usability" | "bain usability" | "3" => Some(SourceId::BainUsability),
            "crossref" | "4" => Some(SourceId::Crossref),
            "bain_satisfaction" | "bain satisfaction" | "5" => Some(SourceId::BainSatisfaction),
            _ => None,
        }
    }
}

/// One source's observations. Invariant: dates strictly increasing (checked at
/// construction), so there can be no duplicate dates per source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl SourceSeries {
    pub fn new(points: Vec<(NaiveDate, f64)>) -> Result<Self> {
        for w in points.windows(2) {
            if w[1].0 <= w[0].0 {
                return Err(anyhow!(
                    "series dates must be strictly increasing ({} then {})",
                    w[0].0,
                    w[1].0
                ));
            }
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }
}

/// Black-box keyword → series lookup, implemented elsewhere (database, files,
/// fixtures in tests).
#[async_trait]
pub trait SeriesStore: Send + Sync {
    async fn get_series(
        &self,
        keyword: &str,
        sources: &[SourceId],
    ) -> Result<BTreeMap<SourceId, SourceSeries>>;
}

/// Join of selected sources on date. Rows are the union of all observed
/// dates, sorted ascending; a source missing an observation on a date holds
/// `None` there.
#[derive(Debug, Clone)]
pub struct AggregatedPayload {
    dates: Vec<NaiveDate>,
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl AggregatedPayload {
    /// Build the joined dataset. Rows where every source is missing are
    /// dropped. Column order follows the reference ordering of `SourceId`.
    pub fn join(series: &BTreeMap<SourceId, SourceSeries>) -> Self {
        let mut all_dates: Vec<NaiveDate> = series
            .values()
            .flat_map(|s| s.points().iter().map(|(d, _)| *d))
            .collect();
        all_dates.sort_unstable();
        all_dates.dedup();

        let mut columns = Vec::with_capacity(series.len());
        for (id, s) in series {
            let by_date: BTreeMap<NaiveDate, f64> = s.points().iter().copied().collect();
            let col: Vec<Option<f64>> = all_dates.iter().map(|d| by_date.get(d).copied()).collect();
            columns.push((id.display_name().to_string(), col));
        }

        // Drop rows where all sources are missing.
        let keep: Vec<bool> = (0..all_dates.len())
            .map(|i| columns.iter().any(|(_, col)| col[i].is_some()))
            .collect();
        let dates = all_dates
            .iter()
            .zip(&keep)
            .filter(|(_, k)| **k)
            .map(|(d, _)| *d)
            .collect();
        for (_, col) in &mut columns {
            let mut i = 0;
            col.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }

        Self { dates, columns }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.as_slice())
    }

    /// Present values of one column with their dates, missing rows skipped.
    pub fn column_observations(&self, name: &str) -> Vec<(NaiveDate, f64)> {
        match self.column(name) {
            Some(col) => self
                .dates
                .iter()
                .zip(col)
                .filter_map(|(d, v)| v.map(|x| (*d, x)))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Rows where *every* named column is present, as per-column vectors.
    /// This is the dropna() view PCA and correlation work on.
    pub fn joint_columns(&self, names: &[&str]) -> Vec<Vec<f64>> {
        let cols: Vec<&[Option<f64>]> = names.iter().filter_map(|n| self.column(n)).collect();
        if cols.len() != names.len() {
            return Vec::new();
        }
        let mut out = vec![Vec::new(); cols.len()];
        for i in 0..self.dates.len() {
            if cols.iter().all(|c| c[i].is_some()) {
                for (j, c) in cols.iter().enumerate() {
                    out[j].push(c[i].unwrap());
                }
            }
        }
        out
    }

    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        match (self.dates.first(), self.dates.last()) {
            (Some(a), Some(b)) => Some((*a, *b)),
            _ => None,
        }
    }
}

/// File-backed [`SeriesStore`]: one JSON document per tool keyword under a
/// data directory, mapping source ids to dated observations.
pub struct JsonSeriesStore {
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ObservationRow {
    date: NaiveDate,
    value: f64,
}

impl JsonSeriesStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, keyword: &str) -> PathBuf {
        let slug: String = keyword
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{slug}.json"))
    }
}

#[async_trait]
impl SeriesStore for JsonSeriesStore {
    async fn get_series(
        &self,
        keyword: &str,
        sources: &[SourceId],
    ) -> Result<BTreeMap<SourceId, SourceSeries>> {
        let path = self.path_for(keyword);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("no series data for '{keyword}' at {}", path.display()))?;
        let raw: BTreeMap<String, Vec<ObservationRow>> =
            serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;

        let mut out = BTreeMap::new();
        for (name, rows) in raw {
            let Some(id) = SourceId::parse(&name) else {
                continue;
            };
            if !sources.contains(&id) {
                continue;
            }
            let mut points: Vec<(NaiveDate, f64)> =
                rows.into_iter().map(|r| (r.date, r.value)).collect();
            points.sort_by_key(|(d, _)| *d);
            out.insert(id, SourceSeries::new(points)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn strictly_increasing_dates_enforced() {
        let ok = SourceSeries::new(vec![(d(2024, 1, 1), 1.0), (d(2024, 2, 1), 2.0)]);
        assert!(ok.is_ok());
        let dup = SourceSeries::new(vec![(d(2024, 1, 1), 1.0), (d(2024, 1, 1), 2.0)]);
        assert!(dup.is_err());
        let backwards = SourceSeries::new(vec![(d(2024, 2, 1), 1.0), (d(2024, 1, 1), 2.0)]);
        assert!(backwards.is_err());
    }

    #[test]
    fn join_aligns_on_union_of_dates() {
        let mut m = BTreeMap::new();
        m.insert(
            SourceId::GoogleTrends,
            SourceSeries::new(vec![(d(2024, 1, 1), 10.0), (d(2024, 2, 1), 20.0)]).unwrap(),
        );
        m.insert(
            SourceId::Crossref,
            SourceSeries::new(vec![(d(2024, 2, 1), 5.0), (d(2024, 3, 1), 6.0)]).unwrap(),
        );
        let payload = AggregatedPayload::join(&m);
        assert_eq!(payload.len(), 3);
        assert_eq!(payload.column_names(), vec!["Google Trends", "Crossref"]);
        assert_eq!(
            payload.column("Google Trends").unwrap(),
            &[Some(10.0), Some(20.0), None]
        );
        assert_eq!(
            payload.column("Crossref").unwrap(),
            &[None, Some(5.0), Some(6.0)]
        );

        let joint = payload.joint_columns(&["Google Trends", "Crossref"]);
        assert_eq!(joint, vec![vec![20.0], vec![5.0]]);
    }

    #[tokio::test]
    async fn json_store_reads_requested_sources_only() {
        let dir = tempfile::tempdir().unwrap();
        let body = serde_json::json!({
            "google_trends": [
                {"date": "2024-01-01", "value": 10.0},
                {"date": "2024-02-01", "value": 12.0}
            ],
            "crossref": [
                {"date": "2024-01-01", "value": 3.0}
            ]
        });
        std::fs::write(dir.path().join("benchmarking.json"), body.to_string()).unwrap();

        let store = JsonSeriesStore::new(dir.path());
        let series = store
            .get_series("Benchmarking", &[SourceId::GoogleTrends])
            .await
            .unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[&SourceId::GoogleTrends].len(), 2);

        assert!(store
            .get_series("unknown tool", &[SourceId::GoogleTrends])
            .await
            .is_err());
    }

    #[test]
    fn source_id_parsing_accepts_aliases() {
        assert_eq!(SourceId::parse("Google Trends"), Some(SourceId::GoogleTrends));
        assert_eq!(SourceId::parse("google_books"), Some(SourceId::GoogleBooks));
        assert_eq!(SourceId::parse("5"), Some(SourceId::BainSatisfaction));
        assert_eq!(SourceId::parse("unknown"), None);
    }
}
