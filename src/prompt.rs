//! # Prompt Builder
//! Serializes extracted features into the instruction document sent to the
//! completion models. Bilingual; the single-source and cross-source paths get
//! different section guidance because their feature payloads differ.

use std::fmt::Write as _;

use anyhow::Result;

use crate::features::AnalysisFeatures;
use crate::findings::Language;

#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder {
    language: Language,
}

impl PromptBuilder {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    /// System message fixing the analyst role and the JSON response contract.
    pub fn system_prompt(&self) -> &'static str {
        match self.language {
            Language::Es => {
                "Eres un analista de investigación doctoral especializado en herramientas de \
                 gestión empresarial. Analiza datos multi-fuente y genera insights de nivel \
                 ejecutivo con énfasis en análisis de componentes principales (PCA).\n\
                 Responde siempre en formato JSON estructurado con:\n\
                 - executive_summary: resumen ejecutivo conciso\n\
                 - principal_findings: array de objetos con bullet_point, reasoning, data_source, confidence\n\
                 - pca_analysis: análisis de componentes principales\n\
                 - heatmap_analysis: análisis del mapa de calor de correlaciones"
            }
            Language::En => {
                "You are a doctoral-level research analyst specializing in business management \
                 tools. Analyze multi-source data and generate executive-level insights with \
                 emphasis on Principal Component Analysis (PCA).\n\
                 Always respond in structured JSON format with:\n\
                 - executive_summary: concise executive summary\n\
                 - principal_findings: array of objects with bullet_point, reasoning, data_source, confidence\n\
                 - pca_analysis: principal component analysis narrative\n\
                 - heatmap_analysis: correlation heatmap narrative\n\
                 Your entire response must be in English."
            }
        }
    }

    /// User message: request header, the serialized feature payload, and the
    /// section guidance for the applicable path.
    pub fn analysis_prompt(&self, features: &AnalysisFeatures) -> Result<String> {
        let payload = serde_json::to_string_pretty(features)?;
        let mut out = String::with_capacity(payload.len() + 2048);

        let period = match (features.date_range_start, features.date_range_end) {
            (Some(a), Some(b)) => format!("{a} — {b}"),
            _ => "N/A".to_string(),
        };

        match self.language {
            Language::Es => {
                writeln!(out, "ANÁLISIS NARRATIVO DE HERRAMIENTAS DE GESTIÓN")?;
                writeln!(out, "Herramienta analizada: {}", features.tool_name)?;
                writeln!(out, "Fuentes de datos: {}", features.sources.join(", "))?;
                writeln!(out, "Período: {period}")?;
                writeln!(
                    out,
                    "Puntos de datos integrados: {}",
                    features.data_points_analyzed
                )?;
                writeln!(out, "\n=== RESULTADOS CUANTITATIVOS REALES ===")?;
                writeln!(out, "{payload}")?;
                writeln!(out, "\n=== INSTRUCCIONES ===")?;
                if features.is_single_source() {
                    writeln!(
                        out,
                        "Interprete la tendencia, la estacionalidad y el contenido espectral de \
                         la única fuente disponible. No invente correlaciones entre fuentes: con \
                         una sola fuente no hay análisis PCA ni mapa de calor."
                    )?;
                } else {
                    writeln!(
                        out,
                        "Interprete las cargas reales de cada fuente en cada componente \
                         principal, el alineamiento o desalineamiento entre fuentes y los \
                         patrones del mapa de calor. Base cada conclusión en los resultados \
                         cuantitativos anteriores, no en significados predeterminados."
                    )?;
                }
                writeln!(
                    out,
                    "Responda únicamente con el objeto JSON requerido, sin texto adicional."
                )?;
            }
            Language::En => {
                writeln!(out, "MANAGEMENT TOOL NARRATIVE ANALYSIS")?;
                writeln!(out, "Tool analyzed: {}", features.tool_name)?;
                writeln!(out, "Data sources: {}", features.sources.join(", "))?;
                writeln!(out, "Period: {period}")?;
                writeln!(
                    out,
                    "Integrated data points: {}",
                    features.data_points_analyzed
                )?;
                writeln!(out, "\n=== ACTUAL QUANTITATIVE RESULTS ===")?;
                writeln!(out, "{payload}")?;
                writeln!(out, "\n=== INSTRUCTIONS ===")?;
                if features.is_single_source() {
                    writeln!(
                        out,
                        "Interpret the trend, seasonality, and spectral content of the single \
                         available source. Do not invent cross-source correlations: with one \
                         source there is no PCA or heatmap analysis."
                    )?;
                } else {
                    writeln!(
                        out,
                        "Interpret the actual loadings of each source on each principal \
                         component, the alignment or misalignment between sources, and the \
                         heatmap patterns. Ground every conclusion in the quantitative results \
                         above, not in predetermined meanings."
                    )?;
                }
                writeln!(
                    out,
                    "Respond with the required JSON object only, no additional text."
                )?;
            }
        }

        Ok(out)
    }
}
