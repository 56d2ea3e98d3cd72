use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{DeidError, Result};
use crate::io::{SourceDocument, SourceFormat, parse_structured, parse_timestamp_line};
use crate::models::{Timestamp, Transcript, Utterance};

static VTT_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*((?:\d{1,2}:)?\d{1,2}:\d{2}[.,]\d{1,3})\s*-->")
        .expect("vtt timing pattern should compile")
});

static VOICE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<v(?:\.[^\s>]+)*\s+([^>]+)>").expect("voice tag pattern should compile")
});

static MARKUP_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("markup pattern should compile"));

static LEADING_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\[(](\d{1,2}:\d{2}(?::\d{2})?(?:[.,]\d+)?)[\])]\s*")
        .expect("leading timestamp pattern should compile")
});

static INLINE_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\[(]?\b\d{1,2}:\d{2}:\d{2}(?:[.,]\d+)?\b[\])]?")
        .expect("inline timestamp pattern should compile")
});

/// Configuration for Stage 0 segmentation
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Stage0Config {
    /// Longest `Name:` prefix accepted as a speaker label, in words
    pub max_label_words: usize,
    /// Longest `Name:` prefix accepted as a speaker label, in characters
    pub max_label_chars: usize,
    /// Remove `HH:MM:SS` tokens from utterance text
    pub strip_inline_timestamps: bool,
}

impl Default for Stage0Config {
    fn default() -> Self {
        Self {
            max_label_words: 4,
            max_label_chars: 48,
            strip_inline_timestamps: true,
        }
    }
}

/// Result of Stage 0
#[derive(Debug)]
pub struct Stage0Result {
    pub transcript: Transcript,
    /// Utterances dropped because nothing usable was left after cleanup
    pub skipped: usize,
}

/// Utterance before cleanup and indexing
#[derive(Debug, Clone)]
struct RawUtterance {
    line: usize,
    speaker: Option<String>,
    text: String,
    timestamp: Option<Timestamp>,
}

/// Execute Stage 0: split a source document into ordered utterances
pub fn execute_stage0(document: &SourceDocument, config: &Stage0Config) -> Result<Stage0Result> {
    let raws = match document.format {
        SourceFormat::WebVtt => segment_vtt(&document.content, config),
        SourceFormat::TimestampedLines | SourceFormat::PlainText => {
            segment_lines(&document.content, config)
        }
        SourceFormat::Structured => segment_structured(document)?,
    };

    let mut utterances = Vec::with_capacity(raws.len());
    let mut skipped = 0;
    for raw in raws {
        let text = clean_text(&raw.text, config);
        if text.is_empty() {
            warn!(
                "{}: skipping malformed utterance at line {} (no text)",
                document.name, raw.line
            );
            skipped += 1;
            continue;
        }
        let speaker = raw.speaker.and_then(|s| {
            let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
            if s.chars().any(char::is_alphanumeric) {
                Some(s)
            } else {
                debug!("{}: ignoring garbled speaker label at line {}", document.name, raw.line);
                None
            }
        });
        utterances.push(Utterance {
            index: utterances.len(),
            speaker,
            text,
            timestamp: raw.timestamp,
        });
    }

    if utterances.is_empty() {
        return Err(DeidError::EmptyDocument(document.name.clone()));
    }

    info!(
        "Stage 0: {} utterances from {} ({:?}), {} skipped",
        utterances.len(),
        document.name,
        document.format,
        skipped
    );

    Ok(Stage0Result {
        transcript: Transcript {
            name: document.name.clone(),
            utterances,
        },
        skipped,
    })
}

/// Split `Name: text` into label and text. The label must look like a name or role:
/// a few capitalized words, digits ("Speaker 2") or honorifics ("Dr.").
pub fn split_label<'a>(line: &'a str, config: &Stage0Config) -> (Option<&'a str>, &'a str) {
    let Some(colon) = line.find(':') else {
        return (None, line);
    };
    let head = line[..colon].trim();
    let rest = &line[colon + 1..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return (None, line);
    }
    if head.is_empty() || head.chars().count() > config.max_label_chars {
        return (None, line);
    }
    let words: Vec<&str> = head.split_whitespace().collect();
    if words.len() > config.max_label_words {
        return (None, line);
    }
    let valid = words.iter().all(|w| {
        let mut chars = w.chars();
        let first_ok = chars
            .next()
            .is_some_and(|c| c.is_uppercase() || c.is_ascii_digit());
        first_ok
            && w.chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '.' | '\'' | '-' | '\u{2019}'))
    });
    if valid {
        (Some(head), rest.trim())
    } else {
        (None, line)
    }
}

fn clean_text(text: &str, config: &Stage0Config) -> String {
    let without_tags = MARKUP_TAG.replace_all(text, " ");
    let without_ts = if config.strip_inline_timestamps {
        INLINE_TIMESTAMP.replace_all(&without_tags, " ").into_owned()
    } else {
        without_tags.into_owned()
    };
    without_ts.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn segment_vtt(content: &str, config: &Stage0Config) -> Vec<RawUtterance> {
    let lines: Vec<&str> = content.lines().collect();
    let mut raws = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        // gather one blank-line separated block
        while i < lines.len() && lines[i].trim().is_empty() {
            i += 1;
        }
        let block_start = i;
        while i < lines.len() && !lines[i].trim().is_empty() {
            i += 1;
        }
        let block = &lines[block_start..i];
        let Some(first) = block.first() else { continue };
        let first = first.trim_start_matches('\u{FEFF}').trim();
        if first.starts_with("WEBVTT")
            || first.starts_with("NOTE")
            || first.starts_with("STYLE")
            || first.starts_with("REGION")
        {
            continue;
        }

        let Some(timing_at) = block.iter().position(|l| l.contains("-->")) else {
            warn!("Skipping WEBVTT block at line {} without cue timing", block_start + 1);
            continue;
        };
        let timestamp = VTT_TIMING
            .captures(block[timing_at])
            .and_then(|c| c.get(1))
            .and_then(|m| Timestamp::parse(m.as_str()));
        let joined = block[timing_at + 1..]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ");

        let (speaker, text) = match VOICE_TAG.captures(&joined) {
            Some(caps) => {
                let speaker = caps.get(1).map(|m| m.as_str().trim().to_string());
                (speaker, joined.clone())
            }
            None => {
                let (label, text) = split_label(&joined, config);
                (label.map(str::to_string), text.to_string())
            }
        };
        raws.push(RawUtterance {
            line: block_start + timing_at + 2,
            speaker,
            text,
            timestamp,
        });
    }
    raws
}

/// Plain text and timestamped layouts. Timestamp lines (and `Name  0:01` headers) set
/// context for the utterances that follow; a label-only line sets the speaker of the
/// following lines.
fn segment_lines(content: &str, config: &Stage0Config) -> Vec<RawUtterance> {
    let mut raws = Vec::new();
    let mut pending_timestamp: Option<Timestamp> = None;
    let mut block_speaker: Option<String> = None;

    for (n, line) in content.lines().enumerate() {
        let trimmed = line.trim().trim_start_matches('\u{FEFF}');
        if trimmed.is_empty() {
            continue;
        }
        if let Some((speaker, timestamp)) = parse_timestamp_line(trimmed) {
            pending_timestamp = Some(timestamp);
            block_speaker = speaker;
            continue;
        }

        let (lead_timestamp, rest) = match LEADING_TIMESTAMP.captures(trimmed) {
            Some(caps) => {
                let ts = caps.get(1).and_then(|m| Timestamp::parse(m.as_str()));
                let end = caps.get(0).map_or(0, |m| m.end());
                (ts, &trimmed[end..])
            }
            None => (None, trimmed),
        };

        let (label, text) = split_label(rest, config);
        if let Some(label) = label {
            if text.is_empty() {
                block_speaker = Some(label.to_string());
                if lead_timestamp.is_some() {
                    pending_timestamp = lead_timestamp;
                }
                continue;
            }
        }

        raws.push(RawUtterance {
            line: n + 1,
            speaker: label.map(str::to_string).or_else(|| block_speaker.clone()),
            text: text.to_string(),
            timestamp: lead_timestamp.or_else(|| pending_timestamp.take()),
        });
    }
    raws
}

fn segment_structured(document: &SourceDocument) -> Result<Vec<RawUtterance>> {
    let items = parse_structured(&document.content).map_err(|source| DeidError::Json {
        context: format!("transcript {}", document.name),
        source,
    })?;
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let timestamp = item.timestamp.as_deref().and_then(|raw| {
                let parsed = Timestamp::parse(raw);
                if parsed.is_none() {
                    warn!("{}: unreadable timestamp {:?} at item {}", document.name, raw, i);
                }
                parsed
            });
            RawUtterance {
                line: i + 1,
                speaker: item.speaker,
                text: item.text,
                timestamp,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(content: &str) -> Transcript {
        let doc = SourceDocument::from_text("test", content);
        execute_stage0(&doc, &Stage0Config::default())
            .unwrap()
            .transcript
    }

    #[test]
    fn test_plain_text_labels() {
        let t = segment("Jodi Burshia: My name is Jodi.\nInterviewer: Thanks.\nand more words\n");
        assert_eq!(t.len(), 3);
        assert_eq!(t.utterances[0].speaker.as_deref(), Some("Jodi Burshia"));
        assert_eq!(t.utterances[0].text, "My name is Jodi.");
        assert_eq!(t.utterances[1].speaker.as_deref(), Some("Interviewer"));
        assert_eq!(t.utterances[2].speaker, None);
    }

    #[test]
    fn test_colon_in_sentence_is_not_label() {
        let config = Stage0Config::default();
        assert_eq!(
            split_label("here is the thing: we grew", &config),
            (None, "here is the thing: we grew")
        );
        assert_eq!(
            split_label("See https://example.org", &config).0,
            None
        );
        assert_eq!(split_label("Speaker 2: yes", &config), (Some("Speaker 2"), "yes"));
        assert_eq!(split_label("Dr. Ariza: yes", &config), (Some("Dr. Ariza"), "yes"));
    }

    #[test]
    fn test_webvtt_cues() {
        let vtt = "WEBVTT\n\n1\n00:00:01.900 --> 00:00:12.490\nJodi: Welcome everyone.\n\n2\n00:00:13.000 --> 00:00:15.000\n<v Pam Standing>Glad to be here.</v>\n\nNOTE this is ignored\n\n3\n00:00:16.000 --> 00:00:17.000\n\n";
        let t = segment(vtt);
        assert_eq!(t.len(), 2);
        assert_eq!(t.utterances[0].timestamp.unwrap().to_string(), "00:00:01");
        assert_eq!(t.utterances[0].speaker.as_deref(), Some("Jodi"));
        assert_eq!(t.utterances[1].speaker.as_deref(), Some("Pam Standing"));
        assert_eq!(t.utterances[1].text, "Glad to be here.");
    }

    #[test]
    fn test_timestamped_lines() {
        let text = "00:00:05\nJodi: Hello there.\nStill talking.\n00:01:10.250\nPam: Hi.\n";
        let t = segment(text);
        assert_eq!(t.len(), 3);
        assert_eq!(t.utterances[0].timestamp.unwrap().to_string(), "00:00:05");
        assert_eq!(t.utterances[1].timestamp, None);
        assert_eq!(t.utterances[2].timestamp.unwrap().to_string(), "00:01:10");
    }

    #[test]
    fn test_header_style_speaker_blocks() {
        let text = "Jodi Burshia  0:01\nWe started in 2015.\n\nPam  0:45\nRight.\n";
        let t = segment(text);
        assert_eq!(t.utterances[0].speaker.as_deref(), Some("Jodi Burshia"));
        assert_eq!(t.utterances[1].speaker.as_deref(), Some("Pam"));
        assert_eq!(t.utterances[1].timestamp.unwrap().to_string(), "00:00:45");
    }

    #[test]
    fn test_label_only_line_sets_speaker() {
        let t = segment("Jodi:\nHello there.\n");
        assert_eq!(t.len(), 1);
        assert_eq!(t.utterances[0].speaker.as_deref(), Some("Jodi"));
    }

    #[test]
    fn test_inline_timestamps_removed_and_empty_skipped() {
        let doc = SourceDocument::from_text("t", "[00:00:03] Jodi: yes 00:00:04 indeed\nPam: 00:00:09\n");
        let result = execute_stage0(&doc, &Stage0Config::default()).unwrap();
        assert_eq!(result.transcript.len(), 1);
        assert_eq!(result.skipped, 1);
        let utt = &result.transcript.utterances[0];
        assert_eq!(utt.text, "yes indeed");
        assert_eq!(utt.timestamp.unwrap().to_string(), "00:00:03");
    }

    #[test]
    fn test_structured_input() {
        let json = r#"{"utterances": [
            {"speaker": "Jodi", "text": "Hello", "timestamp": "00:00:01"},
            {"text": "  "},
            {"speaker": "???", "text": "Hi", "timestamp": "garbage"}
        ]}"#;
        let doc = SourceDocument::from_text("s", json);
        let result = execute_stage0(&doc, &Stage0Config::default()).unwrap();
        assert_eq!(result.transcript.len(), 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.transcript.utterances[1].speaker, None);
        assert_eq!(result.transcript.utterances[1].timestamp, None);
        assert_eq!(result.transcript.utterances[1].index, 1);
    }

    #[test]
    fn test_malformed_structured_transcript_is_json_error() {
        let doc = SourceDocument::from_text("broken", r#"{"utterances": [{"text": 3}]}"#);
        assert_eq!(doc.format, SourceFormat::Structured);
        let err = execute_stage0(&doc, &Stage0Config::default()).unwrap_err();
        assert!(matches!(err, DeidError::Json { .. }));
        assert!(err.to_string().contains("transcript broken"));
    }

    #[test]
    fn test_empty_document_is_error() {
        let doc = SourceDocument::from_text("empty", "\n\n   \n");
        assert!(matches!(
            execute_stage0(&doc, &Stage0Config::default()),
            Err(DeidError::EmptyDocument(_))
        ));
    }
}
