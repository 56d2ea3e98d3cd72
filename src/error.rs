use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading pipeline inputs (rules, lookup data, config, transcripts)
#[derive(Debug, Error)]
pub enum DeidError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML in {context}: {source}")]
    Toml {
        context: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse JSON in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid pattern in {context}: {source}")]
    Pattern {
        context: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid rule table: {0}")]
    Rules(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("document {0} contains no usable utterances")]
    EmptyDocument(String),
}

pub type Result<T> = std::result::Result<T, DeidError>;

impl DeidError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeidError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn pattern(context: impl Into<String>, source: regex::Error) -> Self {
        DeidError::Pattern {
            context: context.into(),
            source,
        }
    }
}
