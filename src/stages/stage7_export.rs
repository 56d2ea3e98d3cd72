use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::io::{
    CitationRow, ExportedFiles, MappingEntity, MappingFile, MappingSpan, write_citations_csv,
    write_tags_csv, write_text,
};
use crate::models::{CanonicalEntity, CitationAddress, Redaction, Transcript};
use crate::pipeline::DocumentOutput;

/// Result of Stage 7
#[derive(Debug, Clone)]
pub struct Stage7Result {
    pub files: ExportedFiles,
}

/// Build the mapping document: one entry per coded entity with every span it replaced
pub fn build_mapping(
    source: &str,
    rules_version: &str,
    entities: &[CanonicalEntity],
    redactions: &[Redaction],
    addresses: &[CitationAddress],
    unresolved: &[usize],
) -> MappingFile {
    let entries = entities
        .iter()
        .filter_map(|entity| {
            let code = entity.code?;
            let spans = redactions
                .iter()
                .filter(|r| r.entity_id == entity.id)
                .filter_map(|r| {
                    let address = addresses.get(r.span.utterance)?;
                    Some(MappingSpan {
                        utterance: r.span.utterance,
                        address: *address,
                        field: r.span.field,
                        start: r.span.start,
                        end: r.span.end,
                        original: r.original.clone(),
                        method: r.method,
                    })
                })
                .collect();
            Some(MappingEntity {
                code,
                kind: entity.kind,
                resolution: entity.resolution,
                canonical: entity.canonical.clone(),
                variants: entity.variants.clone(),
                spans,
            })
        })
        .collect();

    MappingFile {
        source: source.to_string(),
        rules_version: rules_version.to_string(),
        entities: entries,
        unresolved: unresolved
            .iter()
            .filter_map(|id| entities.get(*id).and_then(|e| e.code))
            .collect(),
    }
}

/// One citation row per utterance, in transcript order
pub fn citation_rows(
    original: &Transcript,
    redacted: &Transcript,
    addresses: &[CitationAddress],
) -> Vec<CitationRow> {
    original
        .utterances
        .iter()
        .zip(&redacted.utterances)
        .zip(addresses)
        .map(|((source, output), address)| CitationRow {
            address: *address,
            timestamp: source.timestamp,
            speaker: output.speaker.clone(),
        })
        .collect()
}

/// Execute Stage 7: write the four per-document files into `output_dir`
pub fn execute_stage7(output: &DocumentOutput, output_dir: &Path) -> Result<Stage7Result> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;
    let files = ExportedFiles::for_stem(output_dir, &output.original.name);

    write_text(&files.text, &output.citations.rendered)?;
    output.mapping.write_json(&files.mapping)?;
    write_tags_csv(&files.tags, &output.tags.tags)?;
    let rows = citation_rows(&output.original, &output.redacted, &output.citations.addresses);
    write_citations_csv(&files.citations, &rows)?;

    info!(
        "Stage 7: wrote {} ({} entities, {} tag records)",
        files.text.display(),
        output.mapping.entities.len(),
        output.tags.tags.len()
    );
    Ok(Stage7Result { files })
}
