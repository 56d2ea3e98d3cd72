use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{
    CitationAddress, EntityKind, PseudonymCode, RedactionMethod, Resolution, SpanField,
    TagRecord, Timestamp,
};

/// `<stem>_mapping.json`: every code with the text it replaced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingFile {
    /// Source transcript name
    pub source: String,
    /// Version of the rule table used
    pub rules_version: String,
    pub entities: Vec<MappingEntity>,
    /// Codes whose type fell back to the default, for manual audit
    pub unresolved: Vec<PseudonymCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingEntity {
    pub code: PseudonymCode,
    #[serde(rename = "type")]
    pub kind: EntityKind,
    pub resolution: Resolution,
    pub canonical: String,
    pub variants: BTreeSet<String>,
    pub spans: Vec<MappingSpan>,
}

/// One replaced range of the original transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSpan {
    pub utterance: usize,
    pub address: CitationAddress,
    pub field: SpanField,
    /// Byte offsets into the original field
    pub start: usize,
    pub end: usize,
    pub original: String,
    pub method: RedactionMethod,
}

impl MappingFile {
    /// Write to a JSON file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;
        serde_json::to_writer_pretty(file, self).context("Failed to write JSON")?;
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse mapping: {:?}", path))
    }

    pub fn span_count(&self) -> usize {
        self.entities.iter().map(|e| e.spans.len()).sum()
    }
}

#[derive(Debug, Serialize)]
struct TagRow<'a> {
    address: CitationAddress,
    category: &'a str,
    matched_phrase: &'a str,
}

/// One row of `<stem>_citations.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitationRow {
    pub address: CitationAddress,
    pub timestamp: Option<Timestamp>,
    /// Redacted speaker label
    pub speaker: Option<String>,
}

/// Paths of the files written for one document
#[derive(Debug, Clone, Serialize)]
pub struct ExportedFiles {
    pub text: PathBuf,
    pub mapping: PathBuf,
    pub tags: PathBuf,
    pub citations: PathBuf,
}

impl ExportedFiles {
    pub fn for_stem(output_dir: &Path, stem: &str) -> Self {
        Self {
            text: output_dir.join(format!("{stem}_deidentified.txt")),
            mapping: output_dir.join(format!("{stem}_mapping.json")),
            tags: output_dir.join(format!("{stem}_tags.csv")),
            citations: output_dir.join(format!("{stem}_citations.csv")),
        }
    }
}

/// Write the rendered transcript
pub fn write_text(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("Failed to write file: {:?}", path))
}

/// Write `address,category,matched_phrase`
pub fn write_tags_csv(path: &Path, tags: &[TagRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    for tag in tags {
        writer
            .serialize(TagRow {
                address: tag.address,
                category: &tag.category,
                matched_phrase: &tag.matched_phrase,
            })
            .context("Failed to write tag row")?;
    }
    writer.flush().context("Failed to flush tags")?;
    Ok(())
}

/// Write `address,timestamp,speaker`; absent values are empty cells
pub fn write_citations_csv(path: &Path, rows: &[CitationRow]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    for row in rows {
        writer.serialize(row).context("Failed to write citation row")?;
    }
    writer.flush().context("Failed to flush citations")?;
    Ok(())
}
