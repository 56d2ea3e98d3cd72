pub mod audit;
pub mod batch;
pub mod config;
pub mod error;
pub mod io;
pub mod llm;
pub mod lookup;
pub mod models;
pub mod pipeline;
pub mod recognizers;
pub mod rules;
pub mod stages;
pub mod text;

pub use audit::{AuditReport, audit_document};
pub use batch::{BatchSummary, DocumentReport, process_batch};
pub use config::{BatchConfig, PipelineConfig};
pub use error::{DeidError, Result};
pub use io::{MappingFile, SourceDocument, collect_inputs, read_source};
pub use llm::{AnthropicClient, AnthropicConfig};
pub use lookup::{LookupService, LookupStore};
pub use models::{
    CanonicalEntity, CitationAddress, EntityKind, Mention, PseudonymCode, TagRecord, Transcript,
    Utterance,
};
pub use pipeline::{DocumentOutput, DocumentStats, Pipeline};
pub use recognizers::Recognizer;
pub use rules::RuleSet;
pub use stages::{CitationScheme, Stage2Config, Stage5Config};
