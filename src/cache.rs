//! # Findings Cache
//! File-backed store of precomputed findings, one JSON file per canonical
//! key. The pipeline only reads; a separate population process writes (tests
//! use [`FindingsCache::store`], which performs the same atomic tmp-rename
//! write). A damaged or unreadable record is reported as a lookup failure and
//! treated as a miss by the orchestrator.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::PipelineError;
use crate::findings::{Language, NormalizedFindings};

/// Canonical cache key: SHA-256 over the sorted-key JSON of the normalized
/// scenario. Case- and order-insensitive in `sources`.
pub fn canonical_key(tool_name: &str, sources: &[String], language: Language) -> String {
    let mut normalized: Vec<String> = sources
        .iter()
        .map(|s| s.trim().to_lowercase())
        .collect();
    normalized.sort();

    let scenario = json!({
        "language": language.as_str(),
        "sources": normalized,
        "tool": tool_name.trim().to_lowercase(),
    });
    // Keys are emitted in the order built above, which is already sorted.
    let payload = serde_json::to_string(&scenario).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One stored scenario result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub findings: NormalizedFindings,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

pub struct FindingsCache {
    dir: PathBuf,
}

impl FindingsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = fs::create_dir_all(&dir);
        Self { dir }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// `Ok(None)` is a plain miss; `Err` is a damaged record, which callers
    /// also treat as a miss. Inactive records behave like misses.
    pub fn lookup(&self, key: &str) -> Result<Option<CacheRecord>, PipelineError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .map_err(|e| PipelineError::CacheLookupFailure(e.to_string()))?;
        let record: CacheRecord = serde_json::from_str(&data)
            .map_err(|e| PipelineError::CacheLookupFailure(e.to_string()))?;
        if !record.is_active {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Miss-on-failure wrapper around [`lookup`](Self::lookup).
    pub fn lookup_or_miss(&self, key: &str) -> Option<CacheRecord> {
        match self.lookup(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key, error = %e, "cache record unreadable, treating as miss");
                None
            }
        }
    }

    /// Atomic write: tmp file then rename, so readers never see a partial
    /// record.
    pub fn store(&self, key: &str, record: &CacheRecord) -> std::io::Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string());
        let mut f = fs::File::create(&tmp)?;
        f.write_all(body.as_bytes())?;
        fs::rename(tmp, path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
