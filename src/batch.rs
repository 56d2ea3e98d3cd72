use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::AuditReport;
use crate::io::{ExportedFiles, read_source};
use crate::llm::AnthropicClient;
use crate::pipeline::{DocumentStats, Pipeline};
use crate::recognizers::Recognizer;
use crate::stages::{execute_annotate, execute_stage7};

/// Name of the run summary written next to the document outputs
pub const SUMMARY_FILE: &str = "processing_summary.json";

/// Outcome for one input file
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DocumentStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<ExportedFiles>,
    /// Model annotations accepted for this document, when the model pass ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentReport {
    fn failed(source: PathBuf, error: &anyhow::Error) -> Self {
        Self {
            source,
            stats: None,
            audit: None,
            files: None,
            annotations: None,
            error: Some(format!("{error:#}")),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// `processing_summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub rules_version: String,
    pub recognizers: Vec<String>,
    /// Reports sorted by source path
    pub documents: Vec<DocumentReport>,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.documents.iter().filter(|d| d.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.documents.len() - self.succeeded()
    }

    pub fn audit_failures(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| d.audit.as_ref().is_some_and(|a| !a.passed()))
            .count()
    }

    /// Write to a JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write JSON")?;
        Ok(())
    }
}

/// Process every input concurrently and write the per-document files plus the summary.
///
/// A failing document is recorded in the summary; the others continue.
pub async fn process_batch(
    pipeline: Arc<Pipeline>,
    inputs: Vec<PathBuf>,
    output_dir: &Path,
    llm: Option<Arc<AnthropicClient>>,
) -> Result<BatchSummary> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;

    let concurrency = pipeline.config().batch.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let run_id = Uuid::new_v4();
    info!(
        "Run {}: {} documents, concurrency {}",
        run_id,
        inputs.len(),
        concurrency
    );

    let mut tasks = JoinSet::new();
    for path in inputs {
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();
        let llm = llm.clone();
        let output_dir = output_dir.to_path_buf();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            match process_document(pipeline, path.clone(), output_dir, llm).await {
                Ok(report) => report,
                Err(e) => {
                    error!("{}: {:#}", path.display(), e);
                    DocumentReport::failed(path, &e)
                }
            }
        });
    }

    let mut documents = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => documents.push(report),
            Err(e) => error!("Document task panicked: {}", e),
        }
    }
    documents.sort_by(|a, b| a.source.cmp(&b.source));

    let summary = BatchSummary {
        run_id,
        generated_at: Utc::now(),
        rules_version: pipeline.rules().version.clone(),
        recognizers: pipeline
            .recognizer_ids()
            .into_iter()
            .map(str::to_string)
            .chain(llm.as_ref().map(|_| crate::llm::LLM_RECOGNIZER_ID.to_string()))
            .collect(),
        documents,
    };
    summary.write_json(&output_dir.join(SUMMARY_FILE))?;

    info!(
        "Run {} complete: {} succeeded, {} failed, {} with audit findings",
        run_id,
        summary.succeeded(),
        summary.failed(),
        summary.audit_failures()
    );
    Ok(summary)
}

async fn process_document(
    pipeline: Arc<Pipeline>,
    path: PathBuf,
    output_dir: PathBuf,
    llm: Option<Arc<AnthropicClient>>,
) -> Result<DocumentReport> {
    let segmented = {
        let pipeline = pipeline.clone();
        let path = path.clone();
        tokio::task::spawn_blocking(move || -> Result<_> {
            let document = read_source(&path)?;
            let segmented = pipeline
                .segment(&document)
                .with_context(|| format!("Failed to segment {:?}", path))?;
            Ok(segmented)
        })
        .await
        .context("Segmentation task failed")??
    };

    let mut extra: Vec<Arc<dyn Recognizer>> = Vec::new();
    let mut annotations = None;
    if let Some(client) = llm {
        match execute_annotate(&client, &segmented.transcript, &pipeline.config().annotate).await
        {
            Ok(result) => {
                annotations = Some(result.recognizer.candidate_count());
                extra.push(Arc::new(result.recognizer));
            }
            Err(e) => warn!(
                "{}: model annotation unavailable, continuing with pattern and lexicon: {:#}",
                path.display(),
                e
            ),
        }
    }

    let skipped = segmented.skipped;
    let (stats, audit, files) = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut output = pipeline.run(segmented.transcript, &extra)?;
        output.skipped = skipped;
        let exported = execute_stage7(&output, &output_dir)?;
        Ok((output.stats(), output.audit, exported.files))
    })
    .await
    .context("Pipeline task failed")??;

    Ok(DocumentReport {
        source: path,
        stats: Some(stats),
        audit: Some(audit),
        files: Some(files),
        annotations,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::lookup::{LookupData, LookupStore};
    use crate::rules::RuleSet;

    fn pipeline() -> Arc<Pipeline> {
        let data: LookupData =
            serde_json::from_str(r#"{"first_names": ["Jodi", "Pam"]}"#).unwrap();
        Arc::new(
            Pipeline::new(
                RuleSet::builtin().unwrap(),
                Arc::new(LookupStore::from_data(data)),
                PipelineConfig::default(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let good = input.path().join("a.txt");
        std::fs::write(&good, "Jodi: Pam and I run the board.\nPam: Yes.\n").unwrap();
        let empty = input.path().join("b.txt");
        std::fs::write(&empty, "\n\n").unwrap();
        let missing = input.path().join("c.txt");

        let summary = process_batch(
            pipeline(),
            vec![missing.clone(), good.clone(), empty.clone()],
            output.path(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(summary.documents.len(), 3);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.documents[0].source, good);
        assert!(summary.documents[0].is_ok());
        assert!(output.path().join("a_deidentified.txt").exists());
        assert!(output.path().join("a_mapping.json").exists());
        assert!(output.path().join(SUMMARY_FILE).exists());
        assert_eq!(summary.recognizers, vec!["pattern", "lexicon"]);
    }
}
