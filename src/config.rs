//! Typed pipeline configuration, constructed once at startup from a JSON file
//! with environment fallbacks. Replaces ad-hoc string-keyed settings with a
//! validated structure.

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// One candidate completion model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
}

fn default_max_tokens() -> u32 {
    2000
}
fn default_temperature() -> f64 {
    0.7
}
fn default_timeout_s() -> u64 {
    8
}

/// Handling of HTTP 429 from the model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub rate_limit_retries: u32,
    pub rate_limit_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_retries: 1,
            rate_limit_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Candidate models in fallback order.
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the env var holding the provider key. "ENV" semantics follow
    /// the config file; the key itself never lives in the file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache/findings")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let models = [
            ("nvidia/nemotron-nano-9b-v2:free", 6),
            ("openai/gpt-oss-20b:free", 8),
            ("mistralai/mistral-small-3.2-24b-instruct:free", 8),
            ("cognitivecomputations/dolphin-mistral-24b-venice-edition:free", 10),
            ("google/gemma-3-27b-it:free", 12),
        ]
        .into_iter()
        .map(|(id, timeout_s)| ModelConfig {
            id: id.to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_s,
        })
        .collect();

        Self {
            models,
            retry: RetryPolicy::default(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl PipelineConfig {
    /// Accepts `.toml` or JSON, picked by extension.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: PipelineConfig = if path.extension().is_some_and(|e| e == "toml") {
            toml::from_str(&data).context("parsing config TOML")?
        } else {
            serde_json::from_str(&data).context("parsing config JSON")?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// `ANALYZER_CONFIG` points at a config file; otherwise the built-in
    /// defaults apply.
    pub fn load() -> Result<Self> {
        match env::var("ANALYZER_CONFIG") {
            Ok(path) => Self::load_from_file(path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            bail!("config must list at least one model");
        }
        for m in &self.models {
            if m.id.trim().is_empty() {
                bail!("model id must not be empty");
            }
            if m.timeout_s == 0 {
                bail!("model '{}' has a zero timeout", m.id);
            }
            if !(0.0..=2.0).contains(&m.temperature) {
                bail!("model '{}' temperature out of range", m.id);
            }
        }
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        Ok(())
    }

    /// Resolve the provider key; empty when unset (the provider then refuses
    /// real calls).
    pub fn api_key(&self) -> String {
        env::var(&self.api_key_env).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.models.len(), 5);
        assert!(cfg.models[0].id.contains("nemotron"));
    }

    #[test]
    fn file_roundtrip_with_partial_fields() {
        let json = r#"{
            "models": [{"id": "some/model:free"}],
            "base_url": "https://example.test/v1"
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        let cfg = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.models[0].max_tokens, 2000);
        assert_eq!(cfg.models[0].timeout_s, 8);
        assert_eq!(cfg.base_url, "https://example.test/v1");
        assert_eq!(cfg.retry.rate_limit_retries, 1);
    }

    #[test]
    fn toml_config_is_accepted_by_extension() {
        let body = r#"
            base_url = "https://example.test/v1"

            [[models]]
            id = "some/model:free"
            timeout_s = 3
        "#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        let cfg = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(cfg.models[0].timeout_s, 3);
        assert_eq!(cfg.models[0].max_tokens, 2000);
    }

    #[test]
    fn empty_model_list_is_rejected() {
        let cfg = PipelineConfig {
            models: vec![],
            ..PipelineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
