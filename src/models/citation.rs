use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Timestamp;

/// Speaker letter plus verse number, rendered `A.1`, `B.3`, `AA.2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CitationAddress {
    /// 0-based letter index (0 = A, 25 = Z, 26 = AA)
    pub letter: usize,
    /// 1-based verse within the letter
    pub verse: usize,
}

impl CitationAddress {
    pub fn new(letter: usize, verse: usize) -> Self {
        Self { letter, verse }
    }

    pub fn letter_label(&self) -> String {
        letter_label(self.letter)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (letters, verse) = raw.trim().split_once('.')?;
        let letter = letter_index(letters)?;
        let verse: usize = verse.parse().ok()?;
        (verse > 0).then_some(Self { letter, verse })
    }
}

impl fmt::Display for CitationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", letter_label(self.letter), self.verse)
    }
}

impl Serialize for CitationAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CitationAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CitationAddress::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid citation address: {raw}")))
    }
}

/// Spreadsheet-column style letters: 0 -> A, 25 -> Z, 26 -> AA, 701 -> ZZ, 702 -> AAA
pub fn letter_label(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Inverse of [`letter_label`]
pub fn letter_index(label: &str) -> Option<usize> {
    if label.is_empty() || !label.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let mut index = 0usize;
    for b in label.bytes() {
        index = index.checked_mul(26)?.checked_add((b - b'A') as usize + 1)?;
    }
    Some(index - 1)
}

/// Row of the citation index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitationEntry {
    pub utterance: usize,
    pub timestamp: Option<Timestamp>,
}

/// Address -> original timestamp, built once by the citation formatter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationIndex {
    pub entries: BTreeMap<CitationAddress, CitationEntry>,
}

impl CitationIndex {
    pub fn timestamp(&self, address: &CitationAddress) -> Option<Timestamp> {
        self.entries.get(address).and_then(|e| e.timestamp)
    }

    pub fn has_timestamps(&self) -> bool {
        self.entries.values().any(|e| e.timestamp.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
