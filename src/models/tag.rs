use serde::{Deserialize, Serialize};

use super::CitationAddress;

/// Category given to non-empty utterances that matched nothing in the taxonomy
pub const UNCATEGORIZED: &str = "Uncategorized";

/// An utterance's membership in one research category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub utterance: usize,
    pub address: CitationAddress,
    pub category: String,
    /// Literal text of the first occurrence that satisfied the category
    pub matched_phrase: String,
}

impl TagRecord {
    pub fn is_uncategorized(&self) -> bool {
        self.category == UNCATEGORIZED
    }
}
