//! # Normalized Findings
//! The canonical structured result every code path converges on, plus the
//! `ContentField` sum type that replaces "maybe string, maybe object" model
//! output with one explicit coercion point.

use serde::{Deserialize, Serialize};

/// Analysis language of a request and of the generated narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    #[default]
    Es,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Es => "es",
        }
    }

    /// Placeholder injected when no heatmap narrative could be recovered.
    /// The field must never be absent from a returned result.
    pub fn heatmap_placeholder(&self) -> &'static str {
        match self {
            Language::En => "Correlation analysis not available in the model response.",
            Language::Es => "Análisis de correlación no disponible en la respuesta del modelo.",
        }
    }
}

/// Self-assessed confidence attached to each finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingConfidence {
    Low,
    Medium,
    High,
}

impl Default for FindingConfidence {
    fn default() -> Self {
        FindingConfidence::Medium
    }
}

/// One bullet of the principal findings list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub bullet_point: String,
    #[serde(default = "Finding::default_reasoning")]
    pub reasoning: String,
    #[serde(default = "Finding::default_source")]
    pub data_source: Vec<String>,
    #[serde(default)]
    pub confidence: FindingConfidence,
}

impl Finding {
    fn default_reasoning() -> String {
        "Generated by AI".to_string()
    }

    fn default_source() -> Vec<String> {
        vec!["AI Analysis".to_string()]
    }

    /// A finding carrying only a bullet, with defaults everywhere else.
    pub fn from_bullet(bullet: impl Into<String>) -> Self {
        Finding {
            bullet_point: bullet.into(),
            reasoning: Self::default_reasoning(),
            data_source: Self::default_source(),
            confidence: FindingConfidence::Medium,
        }
    }

    pub fn low_confidence(bullet: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Finding {
            bullet_point: bullet.into(),
            reasoning: reasoning.into(),
            data_source: Self::default_source(),
            confidence: FindingConfidence::Low,
        }
    }
}

/// Canonical result object. The four content fields are always present;
/// `heatmap_analysis` gets a language placeholder rather than ever being
/// absent. Metadata fields are authoritative system measurements, never
/// model-reported values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct NormalizedFindings {
    pub executive_summary: String,
    pub principal_findings: Vec<Finding>,
    pub pca_analysis: String,
    pub heatmap_analysis: String,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub data_points_analyzed: usize,
    #[serde(default)]
    pub analysis_type: String,
}

/// Model output fields arrive as either plain text or a nested object.
/// All call sites go through [`ContentField::into_text`] instead of branching
/// on shape themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentField {
    Text(String),
    Structured(serde_json::Value),
}

impl ContentField {
    /// Coerce to displayable text. Objects prefer an `analysis` member (the
    /// shape models produce for `pca_insights`), then fall back to compact
    /// JSON; arrays join their string members with newlines.
    pub fn into_text(self) -> String {
        match self {
            ContentField::Text(s) => s,
            ContentField::Structured(v) => value_to_text(&v),
        }
    }
}

fn value_to_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        serde_json::Value::Object(map) => {
            if let Some(a) = map.get("analysis") {
                value_to_text(a)
            } else {
                serde_json::to_string(v).unwrap_or_default()
            }
        }
        other => other.to_string(),
    }
}
