use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{CitationAddress, CitationEntry, CitationIndex, Transcript};

/// How speaker letters are allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CitationScheme {
    /// One letter per distinct speaker; verses keep counting when the speaker returns
    #[default]
    SpeakerIdentity,
    /// Every change of speaker starts a new letter at verse 1
    ContiguousRun,
}

/// Configuration for Stage 5 citation formatting
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Stage5Config {
    pub scheme: CitationScheme,
    /// Utterances per page in the rendered transcript; `None` disables page markers
    pub lines_per_page: Option<usize>,
}

impl Default for Stage5Config {
    fn default() -> Self {
        Self {
            scheme: CitationScheme::SpeakerIdentity,
            lines_per_page: Some(50),
        }
    }
}

/// Result of Stage 5
#[derive(Debug, Clone)]
pub struct Stage5Result {
    /// Address of each utterance, by utterance index
    pub addresses: Vec<CitationAddress>,
    pub index: CitationIndex,
    /// Redacted transcript with page markers and `[A.1]` prefixes
    pub rendered: String,
}

/// Address every utterance. Utterances without a detectable speaker continue the
/// current letter; a leading run of them belongs to the first detected speaker.
pub fn assign_addresses(transcript: &Transcript, scheme: CitationScheme) -> Vec<CitationAddress> {
    let first_speaker = transcript.utterances.iter().find_map(|u| u.speaker_key());
    let mut addresses = Vec::with_capacity(transcript.len());

    match scheme {
        CitationScheme::ContiguousRun => {
            let mut current = first_speaker;
            let mut letter = 0;
            let mut verse = 0;
            for utterance in &transcript.utterances {
                if let Some(key) = utterance.speaker_key() {
                    if current.as_ref() != Some(&key) {
                        letter += 1;
                        verse = 0;
                        current = Some(key);
                    }
                }
                verse += 1;
                addresses.push(CitationAddress::new(letter, verse));
            }
        }
        CitationScheme::SpeakerIdentity => {
            let mut letters: HashMap<String, usize> = HashMap::new();
            if let Some(first) = first_speaker {
                letters.insert(first, 0);
            }
            let mut verses: Vec<usize> = vec![0];
            let mut current = 0;
            for utterance in &transcript.utterances {
                if let Some(key) = utterance.speaker_key() {
                    let next = letters.len();
                    current = *letters.entry(key).or_insert(next);
                    if verses.len() <= current {
                        verses.resize(current + 1, 0);
                    }
                }
                verses[current] += 1;
                addresses.push(CitationAddress::new(current, verses[current]));
            }
        }
    }
    addresses
}

/// Render `[A.1] text` lines with `Page N` markers
pub fn render_cited(
    redacted: &Transcript,
    addresses: &[CitationAddress],
    lines_per_page: Option<usize>,
) -> String {
    let mut out = String::new();
    for (i, (utterance, address)) in redacted.utterances.iter().zip(addresses).enumerate() {
        if let Some(per_page) = lines_per_page.filter(|n| *n > 0) {
            if i % per_page == 0 {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str(&format!("Page {}\n\n", i / per_page + 1));
            }
        }
        out.push_str(&format!("[{}] {}\n", address, utterance.text));
    }
    out
}

/// Execute Stage 5: address every utterance and build the citation index
///
/// Speaker changes are read from the original labels; the rendered text comes from the
/// redacted transcript.
pub fn execute_stage5(
    original: &Transcript,
    redacted: &Transcript,
    config: &Stage5Config,
) -> Stage5Result {
    let addresses = assign_addresses(original, config.scheme);

    let mut index = CitationIndex::default();
    for (utterance, address) in original.utterances.iter().zip(&addresses) {
        index.entries.insert(
            *address,
            CitationEntry {
                utterance: utterance.index,
                timestamp: utterance.timestamp,
            },
        );
    }

    let rendered = render_cited(redacted, &addresses, config.lines_per_page);
    let letters = addresses.iter().map(|a| a.letter).max().map_or(0, |m| m + 1);
    info!(
        "Stage 5: {} addresses across {} letters ({:?})",
        addresses.len(),
        letters,
        config.scheme
    );

    Stage5Result {
        addresses,
        index,
        rendered,
    }
}
