use std::path::Path;

use serde::Deserialize;

use crate::error::{DeidError, Result};
use crate::stages::{
    AnnotateConfig, Stage0Config, Stage1Config, Stage2Config, Stage3Config, Stage5Config,
};

/// Settings for running many documents at once
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Documents processed concurrently
    pub concurrency: usize,
    /// Add the model annotation pass to the recognizer ensemble
    pub use_llm: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            use_llm: false,
        }
    }
}

/// Every stage's configuration, loadable from one TOML file.
///
/// Sections that are missing keep their defaults:
///
/// ```toml
/// [cluster]
/// similarity_threshold = 0.8
///
/// [cite]
/// scheme = "speaker_identity"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub segment: Stage0Config,
    pub extract: Stage1Config,
    pub cluster: Stage2Config,
    pub disambiguate: Stage3Config,
    pub cite: Stage5Config,
    pub annotate: AnnotateConfig,
    pub batch: BatchConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeidError::io(path, e))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, context: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content).map_err(|source| DeidError::Toml {
            context: context.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.cluster.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(DeidError::Config(format!(
                "similarity_threshold must be within 0..=1, got {threshold}"
            )));
        }
        if self.batch.concurrency == 0 {
            return Err(DeidError::Config("batch concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::CitationScheme;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [cluster]
            similarity_threshold = 0.8

            [cite]
            scheme = "contiguous_run"
            lines_per_page = 20
            "#,
            "test",
        )
        .unwrap();
        assert_eq!(config.cluster.similarity_threshold, 0.8);
        assert_eq!(config.cite.scheme, CitationScheme::ContiguousRun);
        assert_eq!(config.cite.lines_per_page, Some(20));
        assert_eq!(config.extract.min_confidence, 0.3);
        assert_eq!(config.batch.concurrency, 4);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = PipelineConfig::from_toml_str("[cluster]\nsimilarity_threshold = 1.5", "test");
        assert!(matches!(err, Err(DeidError::Config(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = PipelineConfig::from_toml_str("[batch]\nconcurrency = 0", "test").unwrap_err();
        assert!(matches!(err, DeidError::Config(_)));
        assert!(err.to_string().starts_with("invalid configuration"));
    }

    #[test]
    fn test_empty_config() {
        let config = PipelineConfig::from_toml_str("", "test").unwrap();
        assert_eq!(config.cite.scheme, CitationScheme::SpeakerIdentity);
        assert!(!config.batch.use_llm);
    }
}
