// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod cache;
pub mod chain;
pub mod config;
pub mod counters;
pub mod error;
pub mod features;
pub mod findings;
pub mod metrics;
pub mod orchestrator;
pub mod prompt;
pub mod recovery;
pub mod series;
pub mod stat;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::error::PipelineError;
pub use crate::findings::{Finding, Language, NormalizedFindings};
pub use crate::orchestrator::{AnalysisRequest, AnalysisResponse, Orchestrator};
