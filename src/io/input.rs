use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::Timestamp;

/// Recognized transcript layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// WEBVTT captions with cue timings
    WebVtt,
    /// Standalone timestamp lines (optionally preceded by a speaker name) followed by dialogue
    TimestampedLines,
    /// One utterance per non-empty line, optional `Name:` prefixes
    PlainText,
    /// JSON list of utterances
    Structured,
}

/// A transcript file read into memory, not yet segmented
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// File stem, used to name outputs
    pub name: String,
    pub path: Option<PathBuf>,
    pub format: SourceFormat,
    pub content: String,
}

impl SourceDocument {
    /// Build a document from in-memory text, detecting its format
    pub fn from_text(name: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            name: name.into(),
            path: None,
            format: detect_format(&content, None),
            content,
        }
    }
}

/// One utterance in the structured JSON input
#[derive(Debug, Clone, Deserialize)]
pub struct StructuredUtterance {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StructuredTranscript {
    Wrapped { utterances: Vec<StructuredUtterance> },
    Bare(Vec<StructuredUtterance>),
}

/// Read a transcript file from disk
pub fn read_source(path: &Path) -> Result<SourceDocument> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read file: {:?}", path))?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "transcript".to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    Ok(SourceDocument {
        name,
        path: Some(path.to_path_buf()),
        format: detect_format(&content, extension.as_deref()),
        content,
    })
}

/// Collect transcript files from a list of files and directories (non-recursive)
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Failed to list directory: {:?}", path))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_transcript_file(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn is_transcript_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .as_deref(),
        Some("txt" | "vtt" | "json")
    )
}

/// Guess the layout from the extension and the first lines of content.
///
/// Content is only read as JSON for a `.json` file, or for extensionless content that
/// actually parses; `[00:00:03] Jodi: ...` lines stay line-based.
pub fn detect_format(content: &str, extension: Option<&str>) -> SourceFormat {
    let trimmed = content.trim_start_matches('\u{FEFF}').trim_start();
    match extension {
        Some("vtt") => return SourceFormat::WebVtt,
        Some("json") => return SourceFormat::Structured,
        _ => {}
    }
    if trimmed.starts_with("WEBVTT") {
        return SourceFormat::WebVtt;
    }
    if extension.is_none() && is_json_document(trimmed) {
        return SourceFormat::Structured;
    }
    let has_timestamp_lines = trimmed
        .lines()
        .take(200)
        .any(|line| parse_timestamp_line(line).is_some());
    if has_timestamp_lines {
        SourceFormat::TimestampedLines
    } else {
        SourceFormat::PlainText
    }
}

fn is_json_document(content: &str) -> bool {
    (content.starts_with('[') || content.starts_with('{'))
        && serde_json::from_str::<serde::de::IgnoredAny>(content).is_ok()
}

/// A line that only carries a timestamp, optionally after a speaker name:
/// `00:01:02`, `00:01:02.500`, `Jodi Burshia  0:01`
pub fn parse_timestamp_line(line: &str) -> Option<(Option<String>, Timestamp)> {
    let line = line.trim();
    let (head, last) = match line.rsplit_once(char::is_whitespace) {
        Some((head, last)) => (head.trim(), last),
        None => ("", line),
    };
    if !looks_like_clock(last) {
        return None;
    }
    let timestamp = Timestamp::parse(last)?;
    // `Pam: 00:09` is an utterance whose text is only a timestamp
    if head.ends_with(':') {
        return None;
    }
    if head.is_empty() {
        return Some((None, timestamp));
    }
    let label_like = head.split_whitespace().count() <= 4
        && head
            .split_whitespace()
            .all(|w| w.chars().next().is_some_and(|c| c.is_uppercase() || c.is_ascii_digit()));
    label_like.then(|| (Some(head.to_string()), timestamp))
}

fn looks_like_clock(token: &str) -> bool {
    let core = token.split(['.', ',']).next().unwrap_or("");
    let parts: Vec<&str> = core.split(':').collect();
    (2..=3).contains(&parts.len())
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.len() <= 2 && p.chars().all(|c| c.is_ascii_digit()))
}

/// Parse the structured JSON layout
pub fn parse_structured(content: &str) -> serde_json::Result<Vec<StructuredUtterance>> {
    let parsed: StructuredTranscript = serde_json::from_str(content)?;
    Ok(match parsed {
        StructuredTranscript::Wrapped { utterances } => utterances,
        StructuredTranscript::Bare(utterances) => utterances,
    })
}
