//! Pipeline error taxonomy.
//!
//! Sub-analysis shortfalls (`DataInsufficient`) are recovered locally and never
//! abort a request; only `SourceNotFound` (sole source) and `AllModelsFailed`
//! surface to the caller, and even those arrive wrapped in the response
//! envelope rather than as a transport error.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A sub-analysis was skipped because the series is below its minimum
    /// point count (10 for PCA, 12 for temporal, 24 for Fourier).
    DataInsufficient {
        analysis: &'static str,
        needed: usize,
        got: usize,
    },
    /// A requested source is absent from the joined dataset's columns.
    SourceNotFound(String),
    /// Every candidate model was exhausted; carries the last failure.
    AllModelsFailed(String),
    /// Cache file was unreadable or malformed; treated as a miss upstream.
    CacheLookupFailure(String),
    /// Series provider returned no usable data for the keyword.
    NoData(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::DataInsufficient {
                analysis,
                needed,
                got,
            } => write!(
                f,
                "insufficient data for {analysis} analysis (need at least {needed} points, got {got})"
            ),
            PipelineError::SourceNotFound(s) => {
                write!(f, "source '{s}' not found in combined dataset")
            }
            PipelineError::AllModelsFailed(last) => {
                write!(f, "all models failed; last error: {last}")
            }
            PipelineError::CacheLookupFailure(e) => write!(f, "cache lookup failed: {e}"),
            PipelineError::NoData(tool) => write!(f, "no data available for tool '{tool}'"),
        }
    }
}

impl std::error::Error for PipelineError {}
