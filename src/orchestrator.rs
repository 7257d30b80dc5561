//! # Cache-First Orchestrator
//! Drives one analysis request end to end: canonical key, cache lookup, and on
//! a miss the full generation pipeline (aggregate series, extract features,
//! build prompt, call the model chain, recover the output). Callers always get
//! a well-formed envelope; pipeline failures surface as `success: false` with
//! the error text, never as a panic or a bare transport error.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::{canonical_key, FindingsCache};
use crate::chain::ModelCallChain;
use crate::counters::PerformanceCounters;
use crate::error::PipelineError;
use crate::features;
use crate::findings::{Language, NormalizedFindings};
use crate::prompt::PromptBuilder;
use crate::recovery;
use crate::series::{AggregatedPayload, SeriesStore, SourceId};

/// Inbound analysis request. `sources` accepts snake_case ids, display names,
/// or legacy numeric ids; duplicates collapse.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisRequest {
    pub tool_name: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub force_refresh: bool,
    /// Optional model to try first; the configured chain order applies after.
    #[serde(default)]
    pub model: Option<String>,
}

/// Response envelope. `source` tells the caller whether the result came from
/// the precomputed cache or a live generation.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    pub data: Option<NormalizedFindings>,
    pub cache_hit: bool,
    pub response_time_ms: u64,
    pub source: &'static str,
    pub error: Option<String>,
}

impl AnalysisResponse {
    fn hit(findings: NormalizedFindings, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(findings),
            cache_hit: true,
            response_time_ms: elapsed_ms,
            source: "precomputed",
            error: None,
        }
    }

    fn fresh(findings: NormalizedFindings, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(findings),
            cache_hit: false,
            response_time_ms: elapsed_ms,
            source: "fresh_generation",
            error: None,
        }
    }

    fn failure(error: String, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            cache_hit: false,
            response_time_ms: elapsed_ms,
            source: "fresh_generation",
            error: Some(error),
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn SeriesStore>,
    chain: ModelCallChain,
    cache: FindingsCache,
    counters: Arc<PerformanceCounters>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        chain: ModelCallChain,
        cache: FindingsCache,
        counters: Arc<PerformanceCounters>,
    ) -> Self {
        Self {
            store,
            chain,
            cache,
            counters,
        }
    }

    pub fn counters(&self) -> &Arc<PerformanceCounters> {
        &self.counters
    }

    pub fn cache(&self) -> &FindingsCache {
        &self.cache
    }

    /// Run one request through the pipeline. Never returns an error; failures
    /// are folded into the envelope.
    pub async fn analyze(&self, req: &AnalysisRequest) -> AnalysisResponse {
        let start = Instant::now();
        self.counters.record_request();

        let (ids, names) = match resolve_sources(&req.sources) {
            Ok(resolved) => resolved,
            Err(e) => {
                self.counters.record_error();
                warn!(tool = %req.tool_name, error = %e, "request rejected");
                return AnalysisResponse::failure(e.to_string(), elapsed_ms(start));
            }
        };

        let key = canonical_key(&req.tool_name, &names, req.language);

        if !req.force_refresh {
            if let Some(record) = self.cache.lookup_or_miss(&key) {
                self.counters.record_cache_hit();
                info!(tool = %req.tool_name, key = %&key[..8], "cache hit");
                return AnalysisResponse::hit(record.findings, elapsed_ms(start));
            }
        }

        match self.generate_fresh(req, &ids, &names).await {
            Ok(findings) => {
                let elapsed = elapsed_ms(start);
                info!(
                    tool = %req.tool_name,
                    model = %findings.model_used,
                    elapsed_ms = elapsed,
                    "generated fresh analysis"
                );
                AnalysisResponse::fresh(findings, elapsed)
            }
            Err(e) => {
                self.counters.record_error();
                warn!(tool = %req.tool_name, error = %e, "generation failed");
                AnalysisResponse::failure(e.to_string(), elapsed_ms(start))
            }
        }
    }

    async fn generate_fresh(
        &self,
        req: &AnalysisRequest,
        ids: &[SourceId],
        names: &[String],
    ) -> Result<NormalizedFindings> {
        self.counters.record_live_generation();

        let series = self
            .store
            .get_series(&req.tool_name, ids)
            .await
            .with_context(|| format!("fetching series for '{}'", req.tool_name))?;
        let payload = AggregatedPayload::join(&series);
        if payload.is_empty() {
            return Err(PipelineError::NoData(req.tool_name.clone()).into());
        }

        // Numeric extraction is CPU-bound, keep it off the I/O threads.
        let tool = req.tool_name.clone();
        let requested: Vec<String> = names.to_vec();
        let today = Utc::now().date_naive();
        let extracted = tokio::task::spawn_blocking(move || {
            features::extract(&tool, &payload, &requested, today)
        })
        .await
        .context("feature extraction task failed")??;

        let builder = PromptBuilder::new(req.language);
        let user_prompt = builder.analysis_prompt(&extracted)?;
        let raw = self
            .chain
            .generate(
                builder.system_prompt(),
                &user_prompt,
                req.model.as_deref(),
                &self.counters,
            )
            .await?;

        let recovered = recovery::parse(&raw.raw_text, req.language);
        let mut findings = recovered.findings;

        // Metadata is ours to report, whatever the model claimed.
        findings.model_used = raw.model_used;
        findings.data_points_analyzed = extracted.data_points_analyzed;
        let single_source = extracted.is_single_source();
        findings.analysis_type = if single_source {
            "single_source".to_string()
        } else {
            "multi_source".to_string()
        };
        // Cross-source narratives need at least two variables behind them.
        if single_source {
            findings.pca_analysis.clear();
            findings.heatmap_analysis.clear();
        }
        findings.confidence_score = confidence_score(&findings);

        Ok(findings)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Parse and dedupe requested sources, keeping the fixed reference ordering.
/// A single unknown source fails the request; unknowns among several are
/// dropped with a warning.
fn resolve_sources(raw: &[String]) -> Result<(Vec<SourceId>, Vec<String>)> {
    if raw.is_empty() {
        bail!("at least one source must be requested");
    }
    let mut ids = BTreeSet::new();
    for s in raw {
        match SourceId::parse(s) {
            Some(id) => {
                ids.insert(id);
            }
            None if raw.len() == 1 => {
                return Err(PipelineError::SourceNotFound(s.clone()).into());
            }
            None => warn!(source = %s, "ignoring unknown source"),
        }
    }
    if ids.is_empty() {
        return Err(PipelineError::SourceNotFound(raw[0].clone()).into());
    }
    let ids: Vec<SourceId> = ids.into_iter().collect();
    let names = ids.iter().map(|id| id.display_name().to_string()).collect();
    Ok((ids, names))
}

static NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[+-]?\d+\.?\d*").unwrap());

const NARRATIVE_TERMS: [&str; 12] = [
    "análisis",
    "componente",
    "varianza",
    "carga",
    "patrón",
    "tendencia",
    "analysis",
    "component",
    "variance",
    "loading",
    "pattern",
    "trend",
];

/// Length- and structure-based quality score for generated content, averaged
/// over whichever signals are present. 0.5 when nothing is scorable.
pub fn confidence_score(findings: &NormalizedFindings) -> f64 {
    let mut factors: Vec<f64> = Vec::new();

    let findings_text: String = findings
        .principal_findings
        .iter()
        .map(|f| f.bullet_point.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    if !findings_text.trim().is_empty() {
        factors.push((findings_text.chars().count() as f64 / 500.0).min(1.0));
        let lower = findings_text.to_lowercase();
        let term_count = NARRATIVE_TERMS.iter().filter(|t| lower.contains(**t)).count();
        if term_count >= 2 {
            factors.push(0.8);
        }
    }

    let pca = findings.pca_analysis.trim();
    if !pca.is_empty() {
        factors.push((pca.chars().count() as f64 / 400.0).min(1.0));
        let paragraphs = pca.split("\n\n").filter(|p| !p.trim().is_empty()).count();
        if paragraphs >= 3 {
            factors.push(0.8);
        } else if paragraphs >= 2 {
            factors.push(0.4);
        }
        if NUMERIC_RE.find_iter(pca).count() >= 3 {
            factors.push(0.7);
        }
    }

    let summary = findings.executive_summary.trim();
    if !summary.is_empty() {
        factors.push((summary.chars().count() as f64 / 150.0).min(1.0));
    }

    if factors.is_empty() {
        0.5
    } else {
        (factors.iter().sum::<f64>() / factors.len() as f64).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRecord;
    use crate::chain::{CallError, Completion, CompletionProvider};
    use crate::config::{ModelConfig, RetryPolicy};
    use crate::findings::Finding;
    use crate::series::SourceSeries;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

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
                        (date, 50.0 + (i as f64) * (k as f64 + 1.0) + (i % 4) as f64)
                    })
                    .collect();
                out.insert(*id, SourceSeries::new(points)?);
            }
            Ok(out)
        }
    }

    struct FixedProvider {
        body: String,
    }

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        async fn complete(
            &self,
            _model: &ModelConfig,
            _system: &str,
            _user: &str,
        ) -> Result<Completion, CallError> {
            Ok(Completion {
                content: self.body.clone(),
                total_tokens: 900,
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl CompletionProvider for FailingProvider {
        async fn complete(
            &self,
            _model: &ModelConfig,
            _system: &str,
            _user: &str,
        ) -> Result<Completion, CallError> {
            Err(CallError::Failed("upstream down".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            id: "test/model:free".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_s: 5,
        }
    }

    fn good_body() -> String {
        serde_json::json!({
            "executive_summary": "Adoption keeps climbing across the observed period.",
            "principal_findings": [
                {"bullet_point": "Sustained upward trend in every source"}
            ],
            "pca_analysis": "Component 1 explains most variance.\n\nLoadings near 0.9 and 0.8 across 2 sources.",
            "heatmap_analysis": "Strong positive correlation throughout.",
            "model_used": "model-claimed-name",
            "data_points_analyzed": 99999
        })
        .to_string()
    }

    fn orchestrator(
        provider: Arc<dyn CompletionProvider>,
        dir: &std::path::Path,
    ) -> Orchestrator {
        let chain = ModelCallChain::new(
            provider,
            vec![model()],
            RetryPolicy {
                rate_limit_retries: 0,
                rate_limit_delay_ms: 1,
            },
        );
        Orchestrator::new(
            Arc::new(FixtureStore),
            chain,
            FindingsCache::new(dir),
            Arc::new(PerformanceCounters::new()),
        )
    }

    fn request(sources: &[&str]) -> AnalysisRequest {
        AnalysisRequest {
            tool_name: "Benchmarking".to_string(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            language: Language::En,
            force_refresh: false,
            model: None,
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_model_chain_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FailingProvider), dir.path());

        let req = request(&["google_trends", "crossref"]);
        let key = canonical_key(
            &req.tool_name,
            &["Google Trends".to_string(), "Crossref".to_string()],
            req.language,
        );
        let record = CacheRecord {
            findings: NormalizedFindings {
                executive_summary: "precomputed text".to_string(),
                heatmap_analysis: "stored heatmap".to_string(),
                model_used: "precomputed".to_string(),
                ..NormalizedFindings::default()
            },
            is_active: true,
            created_at: Utc::now(),
        };
        orch.cache().store(&key, &record).unwrap();

        let resp = orch.analyze(&req).await;
        assert!(resp.success);
        assert!(resp.cache_hit);
        assert_eq!(resp.source, "precomputed");
        assert_eq!(resp.data.unwrap().executive_summary, "precomputed text");

        let s = orch.counters().snapshot();
        assert_eq!(s.cache_hits, 1);
        assert_eq!(s.live_generations, 0);
        assert!(s.models.is_empty());
    }

    #[tokio::test]
    async fn fresh_generation_overrides_model_claimed_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FixedProvider { body: good_body() }), dir.path());

        let resp = orch.analyze(&request(&["google_trends", "crossref"])).await;
        assert!(resp.success);
        assert!(!resp.cache_hit);
        assert_eq!(resp.source, "fresh_generation");

        let data = resp.data.unwrap();
        assert_eq!(data.model_used, "test/model:free");
        assert_ne!(data.data_points_analyzed, 99999);
        assert!(data.data_points_analyzed > 0);
        assert_eq!(data.analysis_type, "multi_source");
        assert!(!data.pca_analysis.is_empty());
        assert!(data.confidence_score > 0.0 && data.confidence_score <= 1.0);
    }

    #[tokio::test]
    async fn single_source_forces_cross_source_fields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FixedProvider { body: good_body() }), dir.path());

        let resp = orch.analyze(&request(&["google_trends"])).await;
        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data.analysis_type, "single_source");
        assert!(data.pca_analysis.is_empty());
        assert!(data.heatmap_analysis.is_empty());
        assert!(!data.executive_summary.is_empty());
    }

    #[tokio::test]
    async fn all_models_failing_yields_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FailingProvider), dir.path());

        let resp = orch.analyze(&request(&["google_trends", "crossref"])).await;
        assert!(!resp.success);
        assert!(resp.data.is_none());
        let err = resp.error.unwrap();
        assert!(err.contains("test/model:free"));

        let s = orch.counters().snapshot();
        assert_eq!(s.error_count, 1);
        assert_eq!(s.live_generations, 1);
    }

    #[tokio::test]
    async fn unknown_sole_source_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Arc::new(FailingProvider), dir.path());

        let resp = orch.analyze(&request(&["not_a_source"])).await;
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("not_a_source"));
    }

    #[test]
    fn confidence_score_defaults_and_bounds() {
        assert_eq!(confidence_score(&NormalizedFindings::default()), 0.5);

        let rich = NormalizedFindings {
            executive_summary: "s".repeat(200),
            principal_findings: vec![Finding::from_bullet(
                "The variance pattern shows a clear trend across components.",
            )],
            pca_analysis: format!("{}\n\n{}\n\n{}", "a".repeat(150), "0.91 0.82", "0.35 more"),
            ..NormalizedFindings::default()
        };
        let score = confidence_score(&rich);
        assert!(score > 0.5 && score <= 1.0);
    }
}
