use std::fmt;

use serde::{Deserialize, Serialize};

use super::SpanField;

/// Type a recognizer proposes for a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedType {
    Person,
    Location,
    Organization,
    /// Recognizers disagree, or the string is a known person/place homograph
    Ambiguous,
}

impl ProposedType {
    /// The resolved kind, if this proposal is unambiguous
    pub fn kind(self) -> Option<EntityKind> {
        match self {
            ProposedType::Person => Some(EntityKind::Person),
            ProposedType::Location => Some(EntityKind::Location),
            ProposedType::Organization => Some(EntityKind::Organization),
            ProposedType::Ambiguous => None,
        }
    }
}

impl From<EntityKind> for ProposedType {
    fn from(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Person => ProposedType::Person,
            EntityKind::Location => ProposedType::Location,
            EntityKind::Organization => ProposedType::Organization,
        }
    }
}

/// Final type of a canonical entity; also the prefix of its pseudonym code
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Location,
    /// Organizations, including tribal nations and affiliations
    Organization,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::Person,
        EntityKind::Location,
        EntityKind::Organization,
    ];

    pub fn code_prefix(self) -> &'static str {
        match self {
            EntityKind::Person => "Person",
            EntityKind::Location => "Location",
            EntityKind::Organization => "Organization",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code_prefix())
    }
}

/// Location of a mention: utterance, field and byte range within that field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub utterance: usize,
    pub field: SpanField,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn text(utterance: usize, start: usize, end: usize) -> Self {
        Self {
            utterance,
            field: SpanField::Text,
            start,
            end,
        }
    }

    pub fn speaker(utterance: usize, start: usize, end: usize) -> Self {
        Self {
            utterance,
            field: SpanField::Speaker,
            start,
            end,
        }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True if both spans are in the same field and their byte ranges intersect
    pub fn overlaps(&self, other: &Span) -> bool {
        self.utterance == other.utterance
            && self.field == other.field
            && self.start < other.end
            && other.start < self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.utterance == other.utterance
            && self.field == other.field
            && self.start <= other.start
            && other.end <= self.end
    }
}

/// A raw proposal emitted by one recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub span: Span,
    pub proposed: ProposedType,
    /// Recognizer confidence (0-1)
    pub confidence: f64,
    /// Identifier of the recognizer that produced this candidate
    pub recognizer: String,
}

/// One recognizer's vote on a mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub recognizer: String,
    pub proposed: ProposedType,
    pub confidence: f64,
}

/// A candidate occurrence of an identifying entity, after ensemble merging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Position in the transcript-wide mention list
    pub id: usize,
    pub span: Span,
    /// Text covered by the span, exactly as in the source
    pub surface: String,
    /// Consensus type across recognizers
    pub proposed: ProposedType,
    /// Every recognizer vote that landed on this span
    pub provenance: Vec<Provenance>,
    /// Highest confidence among the votes
    pub confidence: f64,
}

impl Mention {
    /// Distinct non-ambiguous kinds proposed by any recognizer
    pub fn proposed_kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self
            .provenance
            .iter()
            .filter_map(|p| p.proposed.kind())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}
