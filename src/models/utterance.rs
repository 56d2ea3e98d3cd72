use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Original recording time of an utterance, kept at second precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveTime);

impl Timestamp {
    pub fn from_hms(hours: u32, minutes: u32, seconds: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hours, minutes, seconds).map(Self)
    }

    /// Parse `HH:MM:SS`, `H:MM:SS` or `HH:MM:SS.fff`; fractional seconds are dropped
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let whole = raw.split(['.', ',']).next()?;
        let mut parts = whole.split(':');
        let hours: u32 = parts.next()?.parse().ok()?;
        let minutes: u32 = parts.next()?.parse().ok()?;
        let seconds: u32 = match parts.next() {
            Some(s) => s.parse().ok()?,
            None => return Self::from_hms(0, hours, minutes),
        };
        if parts.next().is_some() {
            return None;
        }
        Self::from_hms(hours, minutes, seconds)
    }

    pub fn as_time(&self) -> NaiveTime {
        self.0
    }

    pub fn total_seconds(&self) -> u32 {
        self.0.num_seconds_from_midnight()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S"))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// One speaker turn of a transcript. Immutable once segmented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Position in the transcript (0-based, contiguous)
    pub index: usize,
    /// Raw speaker label as written in the source, if one could be detected
    pub speaker: Option<String>,
    /// Spoken text with the speaker label and inline timestamps removed
    pub text: String,
    /// Original recording time, when the source carried one
    pub timestamp: Option<Timestamp>,
}

impl Utterance {
    /// Speaker label folded for identity comparisons ("Jodi  Burshia" == "jodi burshia")
    pub fn speaker_key(&self) -> Option<String> {
        self.speaker.as_deref().map(fold_label).filter(|k| !k.is_empty())
    }

    /// Text of the given field
    pub fn field(&self, field: SpanField) -> &str {
        match field {
            SpanField::Speaker => self.speaker.as_deref().unwrap_or(""),
            SpanField::Text => &self.text,
        }
    }
}

/// Which part of an utterance a span points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanField {
    Speaker,
    Text,
}

fn fold_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// A segmented transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// Source document name (file stem)
    pub name: String,
    pub utterances: Vec<Utterance>,
}

impl Transcript {
    pub fn get(&self, index: usize) -> Option<&Utterance> {
        self.utterances.get(index)
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Distinct speaker keys in order of first appearance
    pub fn speakers(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for key in self.utterances.iter().filter_map(Utterance::speaker_key) {
            if !seen.contains(&key) {
                seen.push(key);
            }
        }
        seen
    }
}
