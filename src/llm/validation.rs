use std::ops::Range;

use crate::models::{
    AnnotationBatch, AnnotationValidation, Candidate, EntityAnnotation, ProposedType, Span,
    Transcript,
};

/// Recognizer id recorded in the provenance of model proposals
pub const LLM_RECOGNIZER_ID: &str = "llm";

/// Configuration for annotation validation
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Share of annotations that may be rejected before the whole batch is retried
    pub max_rejected_fraction: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_rejected_fraction: 0.25,
        }
    }
}

/// Validate a batch against the utterances it was asked about and locate each
/// accepted annotation as text spans
pub fn validate_annotations(
    batch: &AnnotationBatch,
    transcript: &Transcript,
    range: Range<usize>,
    config: &ValidationConfig,
) -> AnnotationValidation {
    let mut errors = Vec::new();
    let mut accepted = Vec::new();

    for annotation in &batch.entities {
        match locate(annotation, transcript, &range) {
            Ok(candidates) => accepted.extend(candidates),
            Err(e) => errors.push(e),
        }
    }

    let total = batch.entities.len();
    let rejected_fraction = if total == 0 {
        0.0
    } else {
        errors.len() as f64 / total as f64
    };

    if rejected_fraction > config.max_rejected_fraction {
        AnnotationValidation::invalid(errors)
    } else {
        AnnotationValidation::valid(accepted, errors)
    }
}

fn parse_type(raw: &str) -> Option<ProposedType> {
    match raw.trim().to_lowercase().as_str() {
        "person" => Some(ProposedType::Person),
        "location" | "place" => Some(ProposedType::Location),
        "organization" | "organisation" | "tribe" => Some(ProposedType::Organization),
        "ambiguous" => Some(ProposedType::Ambiguous),
        _ => None,
    }
}

fn locate(
    annotation: &EntityAnnotation,
    transcript: &Transcript,
    range: &Range<usize>,
) -> Result<Vec<Candidate>, String> {
    if !range.contains(&annotation.utterance_index) {
        return Err(format!(
            "Utterance {} is not in the batch ({:?})",
            annotation.utterance_index, range
        ));
    }
    let proposed = parse_type(&annotation.entity_type)
        .ok_or_else(|| format!("Unknown entity type {:?}", annotation.entity_type))?;
    if !(0.0..=1.0).contains(&annotation.confidence) {
        return Err(format!(
            "Confidence {} for {:?} is out of range",
            annotation.confidence, annotation.text
        ));
    }
    let needle = annotation.text.trim();
    if needle.is_empty() {
        return Err("Empty entity text".to_string());
    }
    let utterance = transcript
        .get(annotation.utterance_index)
        .ok_or_else(|| format!("Utterance {} does not exist", annotation.utterance_index))?;

    let spans = whole_word_occurrences(&utterance.text, needle);
    if spans.is_empty() {
        return Err(format!(
            "{:?} does not occur in utterance {}",
            needle, annotation.utterance_index
        ));
    }
    Ok(spans
        .into_iter()
        .map(|(start, end)| Candidate {
            span: Span::text(utterance.index, start, end),
            proposed,
            confidence: annotation.confidence,
            recognizer: LLM_RECOGNIZER_ID.to_string(),
        })
        .collect())
}

/// Byte ranges of `needle` in `haystack` that are not part of a longer word
fn whole_word_occurrences(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    for (start, _) in haystack.match_indices(needle) {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            found.push((start, end));
        }
    }
    found
}
