use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{EntityKind, Span};

/// Stable redaction token, e.g. `Person_3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PseudonymCode {
    pub kind: EntityKind,
    /// 1-based, in order of first appearance within the kind
    pub number: usize,
}

impl PseudonymCode {
    pub fn new(kind: EntityKind, number: usize) -> Self {
        Self { kind, number }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (prefix, number) = raw.rsplit_once('_')?;
        let kind = EntityKind::ALL
            .into_iter()
            .find(|k| k.code_prefix() == prefix)?;
        let number: usize = number.parse().ok()?;
        (number > 0).then_some(Self { kind, number })
    }
}

impl fmt::Display for PseudonymCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.code_prefix(), self.number)
    }
}

impl Serialize for PseudonymCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PseudonymCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PseudonymCode::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid pseudonym code: {raw}")))
    }
}

/// How an entity's final type was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Every recognizer vote agreed
    Unanimous,
    /// Surrounding-context cues settled it
    ContextCues,
    /// Cues conflicted; majority across the cluster won
    Majority,
    /// A homograph with conflicting cues was split into one entity per type
    Split,
    /// No cues; lookup prior applied
    Prior,
    /// Nothing to go on; defaulted to person and left for manual audit
    Default,
}

/// A cluster of mentions that refer to the same real-world entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// Stable id, in order of first mention
    pub id: usize,
    pub kind: EntityKind,
    pub resolution: Resolution,
    /// Most frequent surface form (earliest on ties)
    pub canonical: String,
    /// Every surface form seen, exactly as written
    pub variants: BTreeSet<String>,
    /// Normalized forms of the variants
    pub normalized: BTreeSet<String>,
    /// Member mention ids in transcript order
    pub mention_ids: Vec<usize>,
    /// Span of the earliest member mention
    pub first_span: Span,
    /// Assigned once the whole transcript has been resolved
    pub code: Option<PseudonymCode>,
}

impl CanonicalEntity {
    pub fn mention_count(&self) -> usize {
        self.mention_ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionMethod {
    /// Replaced at a span proposed by the extractor
    Span,
    /// Found by the whole-word variant sweep
    Sweep,
}

/// One replaced range of original text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Redaction {
    pub span: Span,
    /// Original text that was replaced
    pub original: String,
    pub code: PseudonymCode,
    pub entity_id: usize,
    pub method: RedactionMethod,
}
