pub mod annotated;
pub mod lexicon;
pub mod pattern;

pub use annotated::*;
pub use lexicon::*;
pub use pattern::*;

use crate::models::{Candidate, Utterance};

/// An independent entity recognizer, one member of the extraction ensemble.
///
/// Recognizers are built once per process and shared by every worker, so they must be
/// `Send + Sync` and must not keep per-document state.
pub trait Recognizer: Send + Sync {
    /// Short identifier recorded in mention provenance ("pattern", "lexicon", "llm")
    fn id(&self) -> &str;

    /// Propose typed spans for one utterance. Spans use byte offsets into the field.
    fn recognize(&self, utterance: &Utterance) -> Vec<Candidate>;
}

/// Drop a trailing possessive `'s` from a capture so "Jodi's" yields "Jodi"
pub(crate) fn trim_possessive(text: &str, start: usize, mut end: usize) -> usize {
    let slice = &text[start..end];
    for suffix in ["'s", "\u{2019}s"] {
        if slice.len() > suffix.len() && slice.ends_with(suffix) {
            end -= suffix.len();
            break;
        }
    }
    end
}
