// tests/pipeline_cache.rs
//
// Cache-first behavior of the orchestrator:
// - a stored record is returned verbatim without touching the model chain
// - force_refresh bypasses the cache and generates live
// - the canonical key ignores source order and casing

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use adoption_trends_analyzer::cache::{canonical_key, CacheRecord, FindingsCache};
use adoption_trends_analyzer::chain::{
    CallError, Completion, CompletionProvider, ModelCallChain,
};
use adoption_trends_analyzer::config::{ModelConfig, RetryPolicy};
use adoption_trends_analyzer::counters::PerformanceCounters;
use adoption_trends_analyzer::findings::{Language, NormalizedFindings};
use adoption_trends_analyzer::orchestrator::{AnalysisRequest, Orchestrator};
use adoption_trends_analyzer::series::{SeriesStore, SourceId, SourceSeries};

struct FixtureStore;

#[async_trait]
impl SeriesStore for FixtureStore {
    async fn get_series(
        &self,
        _keyword: &str,
        sources: &[SourceId],
    ) -> anyhow::Result<BTreeMap<SourceId, SourceSeries>> {
        let mut out = BTreeMap::new();
        for (k, id) in sources.iter().enumerate() {
            let points: Vec<(NaiveDate, f64)> = (0..36)
                .map(|i| {
                    let date = NaiveDate::from_ymd_opt(2021 + i / 12, ((i % 12) + 1) as u32, 1).unwrap();
                    (date, 30.0 + i as f64 + k as f64 * 5.0)
                })
                .collect();
            out.insert(*id, SourceSeries::new(points)?);
        }
        Ok(out)
    }
}

struct CountingProvider {
    calls: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl CompletionProvider for CountingProvider {
    async fn complete(
        &self,
        _model: &ModelConfig,
        _system: &str,
        _user: &str,
    ) -> Result<Completion, CallError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Completion {
            content: serde_json::json!({
                "executive_summary": "Fresh text from the model.",
                "principal_findings": [{"bullet_point": "fresh bullet"}],
                "pca_analysis": "fresh pca",
                "heatmap_analysis": "fresh heatmap"
            })
            .to_string(),
            total_tokens: 500,
        })
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn build(
    dir: &std::path::Path,
) -> (Orchestrator, Arc<std::sync::atomic::AtomicUsize>) {
    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let provider = CountingProvider {
        calls: Arc::clone(&calls),
    };
    let chain = ModelCallChain::new(
        Arc::new(provider),
        vec![ModelConfig {
            id: "test/model:free".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_s: 5,
        }],
        RetryPolicy {
            rate_limit_retries: 0,
            rate_limit_delay_ms: 1,
        },
    );
    let orch = Orchestrator::new(
        Arc::new(FixtureStore),
        chain,
        FindingsCache::new(dir),
        Arc::new(PerformanceCounters::new()),
    );
    (orch, calls)
}

fn request(sources: &[&str], force_refresh: bool) -> AnalysisRequest {
    AnalysisRequest {
        tool_name: "Benchmarking".to_string(),
        sources: sources.iter().map(|s| s.to_string()).collect(),
        language: Language::Es,
        force_refresh,
        model: None,
    }
}

fn stored_record() -> CacheRecord {
    CacheRecord {
        findings: NormalizedFindings {
            executive_summary: "stored summary".to_string(),
            pca_analysis: "stored pca".to_string(),
            heatmap_analysis: "stored heatmap".to_string(),
            model_used: "precomputed".to_string(),
            confidence_score: 0.91,
            ..NormalizedFindings::default()
        },
        is_active: true,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn hit_returns_record_verbatim_without_model_calls() {
    let dir = tempfile::tempdir().unwrap();
    let (orch, calls) = build(dir.path());

    let key = canonical_key(
        "Benchmarking",
        &["Google Trends".to_string(), "Crossref".to_string()],
        Language::Es,
    );
    orch.cache().store(&key, &stored_record()).unwrap();

    // Sources given in a different order and casing than the stored key.
    let resp = orch
        .analyze(&request(&["CROSSREF", "google trends"], false))
        .await;

    assert!(resp.success);
    assert!(resp.cache_hit);
    assert_eq!(resp.source, "precomputed");
    let data = resp.data.unwrap();
    assert_eq!(data.executive_summary, "stored summary");
    assert_eq!(data.model_used, "precomputed");
    assert!((data.confidence_score - 0.91).abs() < 1e-12);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn force_refresh_bypasses_a_valid_record() {
    let dir = tempfile::tempdir().unwrap();
    let (orch, calls) = build(dir.path());

    let key = canonical_key(
        "Benchmarking",
        &["Google Trends".to_string(), "Crossref".to_string()],
        Language::Es,
    );
    orch.cache().store(&key, &stored_record()).unwrap();

    let resp = orch
        .analyze(&request(&["google_trends", "crossref"], true))
        .await;

    assert!(resp.success);
    assert!(!resp.cache_hit);
    assert_eq!(resp.source, "fresh_generation");
    assert_eq!(resp.data.unwrap().executive_summary, "Fresh text from the model.");
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn miss_generates_and_counters_track_the_split() {
    let dir = tempfile::tempdir().unwrap();
    let (orch, calls) = build(dir.path());

    let resp = orch
        .analyze(&request(&["google_trends", "crossref"], false))
        .await;
    assert!(resp.success);
    assert!(!resp.cache_hit);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let s = orch.counters().snapshot();
    assert_eq!(s.total_requests, 1);
    assert_eq!(s.cache_hits, 0);
    assert_eq!(s.live_generations, 1);
    assert_eq!(s.models["test/model:free"].successes, 1);
}

#[tokio::test]
async fn inactive_record_is_regenerated() {
    let dir = tempfile::tempdir().unwrap();
    let (orch, calls) = build(dir.path());

    let key = canonical_key(
        "Benchmarking",
        &["Google Trends".to_string()],
        Language::Es,
    );
    let mut record = stored_record();
    record.is_active = false;
    orch.cache().store(&key, &record).unwrap();

    let resp = orch.analyze(&request(&["google_trends"], false)).await;
    assert!(resp.success);
    assert!(!resp.cache_hit);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
