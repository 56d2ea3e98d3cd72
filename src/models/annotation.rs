use serde::{Deserialize, Serialize};

use super::Candidate;

/// One entity proposed by the language model for a batch of utterances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityAnnotation {
    /// Index of the utterance the entity occurs in
    pub utterance_index: usize,
    /// Exact text of the entity as it appears in the utterance
    pub text: String,
    /// person, location, organization or ambiguous
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Model confidence (0-1)
    pub confidence: f64,
}

/// Tool output for one batch of utterances
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationBatch {
    /// ID of the batch being annotated
    pub batch_id: String,
    pub entities: Vec<EntityAnnotation>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AnnotationBatch {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Result of validating an annotation batch
#[derive(Debug, Clone, Default)]
pub struct AnnotationValidation {
    /// Whether the batch as a whole is acceptable
    pub is_valid: bool,
    /// Problems found, one line per rejected annotation
    pub errors: Vec<String>,
    /// Annotations that passed, located as candidates
    pub accepted: Vec<Candidate>,
}

impl AnnotationValidation {
    pub fn valid(accepted: Vec<Candidate>, errors: Vec<String>) -> Self {
        Self {
            is_valid: true,
            errors,
            accepted,
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
            accepted: Vec::new(),
        }
    }
}
