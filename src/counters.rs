//! Process-lifetime performance counters: request totals, cache hit/miss
//! split, per-model success/failure/latency/token accounting. Reset only by
//! explicit admin action. Every update is mirrored to the `metrics` recorder
//! so Prometheus sees the same numbers.

use std::collections::BTreeMap;
use std::sync::Mutex;

use metrics::{counter, histogram};
use serde::Serialize;

#[derive(Debug, Default)]
pub struct PerformanceCounters {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default, Clone)]
struct Inner {
    total_requests: u64,
    cache_hits: u64,
    live_generations: u64,
    error_count: u64,
    models: BTreeMap<String, ModelStats>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ModelStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
    pub total_tokens: u64,
}

impl ModelStats {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.successes as f64
        }
    }
}

/// Point-in-time copy handed to the debug route and to tests.
#[derive(Debug, Clone, Serialize)]
pub struct CountersSnapshot {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub live_generations: u64,
    pub error_count: u64,
    pub cache_hit_rate: f64,
    pub models: BTreeMap<String, ModelSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
}

impl PerformanceCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut g = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut g)
    }

    pub fn record_request(&self) {
        self.with(|i| i.total_requests += 1);
        counter!("analysis_requests_total").increment(1);
    }

    pub fn record_cache_hit(&self) {
        self.with(|i| i.cache_hits += 1);
        counter!("analysis_cache_hits_total").increment(1);
    }

    pub fn record_live_generation(&self) {
        self.with(|i| i.live_generations += 1);
        counter!("analysis_live_generations_total").increment(1);
    }

    pub fn record_error(&self) {
        self.with(|i| i.error_count += 1);
        counter!("analysis_errors_total").increment(1);
    }

    pub fn record_model_attempt(&self, model: &str) {
        self.with(|i| i.models.entry(model.to_string()).or_default().requests += 1);
        counter!("model_attempts_total", "model" => model.to_string()).increment(1);
    }

    pub fn record_model_success(&self, model: &str, latency_ms: u64, tokens: u64) {
        self.with(|i| {
            let s = i.models.entry(model.to_string()).or_default();
            s.successes += 1;
            s.total_latency_ms += latency_ms;
            s.total_tokens += tokens;
        });
        counter!("model_successes_total", "model" => model.to_string()).increment(1);
        histogram!("model_latency_ms", "model" => model.to_string()).record(latency_ms as f64);
    }

    pub fn record_model_failure(&self, model: &str) {
        self.with(|i| i.models.entry(model.to_string()).or_default().failures += 1);
        counter!("model_failures_total", "model" => model.to_string()).increment(1);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        self.with(|i| {
            let models = i
                .models
                .iter()
                .map(|(name, s)| {
                    (
                        name.clone(),
                        ModelSnapshot {
                            requests: s.requests,
                            successes: s.successes,
                            failures: s.failures,
                            success_rate: s.success_rate(),
                            avg_latency_ms: s.avg_latency_ms(),
                            total_tokens: s.total_tokens,
                        },
                    )
                })
                .collect();
            CountersSnapshot {
                total_requests: i.total_requests,
                cache_hits: i.cache_hits,
                live_generations: i.live_generations,
                error_count: i.error_count,
                cache_hit_rate: if i.total_requests == 0 {
                    0.0
                } else {
                    i.cache_hits as f64 / i.total_requests as f64
                },
                models,
            }
        })
    }

    /// Admin reset. The Prometheus counters keep accumulating; only the
    /// in-process snapshot starts over.
    pub fn reset(&self) {
        self.with(|i| *i = Inner::default());
    }
}
