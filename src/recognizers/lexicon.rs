use std::sync::Arc;

use super::{Recognizer, trim_possessive};
use crate::lookup::{LookupEntry, LookupService};
use crate::models::{Candidate, ProposedType, Span, Utterance};
use crate::rules::RuleSet;
use crate::text::{self, Word, normalize_key};

const MAX_NGRAM: usize = 3;

/// Scoring weights for lexicon evidence
#[derive(Debug, Clone)]
pub struct LexiconConfig {
    pub full_name: f64,
    pub first_name: f64,
    pub last_name: f64,
    pub place: f64,
    pub tribal_name: f64,
    pub ambiguous: f64,
    /// Subtracted when the span starts a sentence (capitalization is weaker evidence there)
    pub sentence_initial_penalty: f64,
    /// Added when a speech verb follows a name
    pub speech_verb_bonus: f64,
}

impl Default for LexiconConfig {
    fn default() -> Self {
        Self {
            full_name: 0.85,
            first_name: 0.6,
            last_name: 0.45,
            place: 0.7,
            tribal_name: 0.75,
            ambiguous: 0.6,
            sentence_initial_penalty: 0.15,
            speech_verb_bonus: 0.1,
        }
    }
}

/// Statistical recognizer: scores capitalized n-grams using lookup-store evidence
/// (known first/last names, places, tribal names, homographs) and position features.
pub struct LexiconRecognizer {
    lookup: Arc<dyn LookupService>,
    rules: Arc<RuleSet>,
    config: LexiconConfig,
}

impl LexiconRecognizer {
    pub fn new(lookup: Arc<dyn LookupService>, rules: Arc<RuleSet>) -> Self {
        Self::with_config(lookup, rules, LexiconConfig::default())
    }

    pub fn with_config(
        lookup: Arc<dyn LookupService>,
        rules: Arc<RuleSet>,
        config: LexiconConfig,
    ) -> Self {
        Self {
            lookup,
            rules,
            config,
        }
    }

    /// Look up a key, retrying with the misspelling correction applied
    fn lookup_corrected(&self, key: &str) -> LookupEntry {
        let entry = self.lookup.lookup(key);
        if entry.is_known() {
            return entry;
        }
        let corrected = self.rules.correct(key);
        if corrected != key {
            self.lookup.lookup(&corrected)
        } else {
            entry
        }
    }

    fn is_candidate_word(&self, word: &Word<'_>) -> bool {
        word.is_capitalized()
            && !self.rules.extraction.non_entity_words.contains(&normalize_key(word.text))
    }

    /// Score the n-gram `words[i..i + n]`, if the lookup store knows it
    fn score(&self, words: &[Word<'_>], i: usize, n: usize) -> Option<(ProposedType, f64)> {
        let joined = words[i..i + n]
            .iter()
            .map(|w| w.text)
            .collect::<Vec<_>>()
            .join(" ");
        let key = strip_possessive_key(&normalize_key(&joined));
        let entry = self.lookup_corrected(&key);
        let c = &self.config;

        if entry.is_ambiguous() {
            return Some((ProposedType::Ambiguous, c.ambiguous));
        }
        if entry.tribal_name {
            return Some((ProposedType::Organization, c.tribal_name));
        }
        if entry.is_place() {
            return Some((ProposedType::Location, c.place + if n > 1 { 0.1 } else { 0.0 }));
        }
        if entry.is_name() {
            let base = if entry.first_name { c.first_name } else { c.last_name };
            return Some((ProposedType::Person, base));
        }

        // First name followed by a capitalized surname the store does not know
        if n == 2 {
            let head = self.lookup_corrected(&normalize_key(words[i].text));
            let tail = normalize_key(words[i + 1].text);
            if head.first_name && !head.is_place() && !self.rules.is_false_positive(&tail) {
                return Some((ProposedType::Person, c.full_name));
            }
        }
        None
    }
}

fn strip_possessive_key(key: &str) -> String {
    key.strip_suffix("'s").unwrap_or(key).to_string()
}

impl Recognizer for LexiconRecognizer {
    fn id(&self) -> &str {
        "lexicon"
    }

    fn recognize(&self, utterance: &Utterance) -> Vec<Candidate> {
        let text = utterance.text.as_str();
        let words = text::words(text);
        let mut candidates = Vec::new();
        let mut i = 0;

        while i < words.len() {
            if !self.is_candidate_word(&words[i]) {
                i += 1;
                continue;
            }
            let run = words[i..]
                .iter()
                .take(MAX_NGRAM)
                .take_while(|w| self.is_candidate_word(w))
                .count();

            let mut matched = None;
            for n in (1..=run).rev() {
                if let Some(hit) = self.score(&words, i, n) {
                    matched = Some((n, hit));
                    break;
                }
            }
            let Some((n, (proposed, mut confidence))) = matched else {
                i += 1;
                continue;
            };

            let start = words[i].start;
            let end = trim_possessive(text, start, words[i + n - 1].end);
            if text::is_sentence_initial(text, &words, i) {
                confidence -= self.config.sentence_initial_penalty;
            }
            let next_is_verb = words.get(i + n).is_some_and(|w| {
                let key = normalize_key(w.text);
                self.rules.cues.speech_verbs.iter().any(|v| *v == key)
            });
            if next_is_verb && proposed == ProposedType::Person {
                confidence += self.config.speech_verb_bonus;
            }

            candidates.push(Candidate {
                span: Span::text(utterance.index, start, end),
                proposed,
                confidence: confidence.clamp(0.0, 1.0),
                recognizer: self.id().to_string(),
            });
            i += n;
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupData, LookupStore};

    fn recognizer() -> LexiconRecognizer {
        let data: LookupData = serde_json::from_str(
            r#"{
                "first_names": ["Jodi", "Pam", "Anna"],
                "last_names": ["Sattler"],
                "tribal_names": ["Ho-Chunk"],
                "places": [{"name": "Bethel", "subtype": "city"}, {"name": "Hooper Bay", "subtype": "village"}],
                "ambiguous": [{"name": "Washington", "primarily_place": true}]
            }"#,
        )
        .unwrap();
        LexiconRecognizer::new(
            Arc::new(LookupStore::from_data(data)),
            Arc::new(RuleSet::builtin().unwrap()),
        )
    }

    fn found(text: &str) -> Vec<(String, ProposedType, f64)> {
        let utt = Utterance {
            index: 0,
            speaker: None,
            text: text.to_string(),
            timestamp: None,
        };
        recognizer()
            .recognize(&utt)
            .into_iter()
            .map(|c| (text[c.span.start..c.span.end].to_string(), c.proposed, c.confidence))
            .collect()
    }

    #[test]
    fn test_known_names_and_places() {
        let hits = found("I work with Pam in Bethel and Hooper Bay with the Ho-Chunk.");
        let kinds: Vec<(&str, ProposedType)> =
            hits.iter().map(|(s, k, _)| (s.as_str(), *k)).collect();
        assert_eq!(
            kinds,
            vec![
                ("Pam", ProposedType::Person),
                ("Bethel", ProposedType::Location),
                ("Hooper Bay", ProposedType::Location),
                ("Ho-Chunk", ProposedType::Organization),
            ]
        );
    }

    #[test]
    fn test_first_plus_unknown_surname() {
        let hits = found("We met Jodi Littlewolf yesterday.");
        assert_eq!(hits[0].0, "Jodi Littlewolf");
        assert_eq!(hits[0].1, ProposedType::Person);
    }

    #[test]
    fn test_misspelling_correction_lookup() {
        let hits = found("Then Jody called.");
        assert_eq!(hits[0].0, "Jody");
        assert_eq!(hits[0].1, ProposedType::Person);
    }

    #[test]
    fn test_homograph_is_ambiguous() {
        let hits = found("We talked about Washington.");
        assert_eq!(hits[0].1, ProposedType::Ambiguous);
    }

    #[test]
    fn test_sentence_initial_penalty_and_possessive() {
        let hits = found("Pam's idea came from Pam.");
        assert_eq!(hits[0].0, "Pam");
        assert_eq!(hits[1].0, "Pam");
        assert!(hits[0].2 < hits[1].2);
    }

    #[test]
    fn test_lowercase_ignored() {
        assert!(found("we saw pam in bethel").is_empty());
    }
}
