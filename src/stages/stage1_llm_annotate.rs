use std::ops::Range;

use anyhow::Result;
use tracing::{info, warn};

use crate::llm::{
    AnthropicClient, LLM_RECOGNIZER_ID, SYSTEM_PROMPT, ValidationConfig, build_batch_prompt,
    validate_annotations,
};
use crate::models::{Candidate, Transcript};
use crate::recognizers::AnnotatedRecognizer;

/// Configuration for the model annotation pass
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    /// Utterances sent per request
    pub batch_utterances: usize,
    /// Validation configuration
    pub validation: ValidationConfig,
    /// Maximum retries per batch on validation failure
    pub max_retries: u32,
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            batch_utterances: 40,
            validation: ValidationConfig::default(),
            max_retries: 2,
        }
    }
}

/// Result of the model annotation pass
#[derive(Debug)]
pub struct AnnotateResult {
    /// Validated proposals, replayed by the extractor as one more recognizer
    pub recognizer: AnnotatedRecognizer,
    /// Number of batches sent
    pub batches_processed: usize,
    /// Number of batches that failed after retries
    pub batches_failed: usize,
}

/// Execute the model annotation pass
///
/// For each batch of utterances:
/// 1. Build the prompt with the utterance texts
/// 2. Call Claude API with tool use
/// 3. Validate the returned entities against the utterances
/// 4. Collect the located spans as candidates
///
/// A failed batch contributes nothing; the other recognizers still cover it.
pub async fn execute_annotate(
    client: &AnthropicClient,
    transcript: &Transcript,
    config: &AnnotateConfig,
) -> Result<AnnotateResult> {
    let batch_size = config.batch_utterances.max(1);
    let ranges: Vec<Range<usize>> = (0..transcript.len())
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(transcript.len()))
        .collect();

    info!(
        "Annotating {} with {}: {} batches",
        transcript.name,
        client.model(),
        ranges.len()
    );

    let mut candidates = Vec::new();
    let mut batches_failed = 0;

    for (n, range) in ranges.iter().enumerate() {
        let batch_id = format!("{}-{}", transcript.name, n);
        match process_batch(client, transcript, &batch_id, range.clone(), config).await {
            Ok(found) => {
                info!("Batch {}: {} spans", batch_id, found.len());
                candidates.extend(found);
            }
            Err(e) => {
                warn!("Batch {} failed: {}", batch_id, e);
                batches_failed += 1;
            }
        }
    }

    Ok(AnnotateResult {
        recognizer: AnnotatedRecognizer::new(LLM_RECOGNIZER_ID, candidates),
        batches_processed: ranges.len(),
        batches_failed,
    })
}

/// Process a single batch
async fn process_batch(
    client: &AnthropicClient,
    transcript: &Transcript,
    batch_id: &str,
    range: Range<usize>,
    config: &AnnotateConfig,
) -> Result<Vec<Candidate>> {
    let prompt = build_batch_prompt(transcript, batch_id, range.clone());

    let mut last_error = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            info!("Batch {}: retry {} of {}", batch_id, attempt, config.max_retries);
        }

        match client.send_with_tool(SYSTEM_PROMPT, &prompt).await {
            Ok(batch) => {
                let validation =
                    validate_annotations(&batch, transcript, range.clone(), &config.validation);

                if validation.is_valid {
                    if !validation.errors.is_empty() {
                        warn!(
                            "Batch {}: {} annotations rejected: {:?}",
                            batch_id,
                            validation.errors.len(),
                            validation.errors
                        );
                    }
                    return Ok(validation.accepted);
                }
                last_error = Some(anyhow::anyhow!(
                    "Validation failed: {:?}",
                    validation.errors
                ));
                warn!(
                    "Batch {} validation failed: {:?}",
                    batch_id, validation.errors
                );
            }
            Err(e) => {
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Unknown error")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_config_default() {
        let config = AnnotateConfig::default();
        assert_eq!(config.batch_utterances, 40);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.validation.max_rejected_fraction, 0.25);
    }
}
