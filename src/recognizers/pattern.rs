use regex::Regex;

use super::{Recognizer, trim_possessive};
use crate::error::{DeidError, Result};
use crate::models::{Candidate, ProposedType, Span, Utterance};
use crate::rules::RuleSet;
use crate::text::normalize_key;

/// A capitalized name token: Jodi, O'Brien, Ho-Chunk, O'odham
const NAME: &str = r"\p{Lu}\p{L}*(?:['\u{2019}\-]\p{L}+)*";

const US_STATE_CODES: &[&str] = &[
    "AK", "AL", "AR", "AZ", "CA", "CO", "CT", "DC", "DE", "FL", "GA", "HI", "IA", "ID", "IL",
    "IN", "KS", "KY", "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE",
    "NH", "NJ", "NM", "NV", "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VA", "VT", "WA", "WI", "WV", "WY",
];

/// One cue-driven extraction rule. Capture group 1 is the proposed span.
#[derive(Debug)]
struct PatternRule {
    name: &'static str,
    regex: Regex,
    proposed: ProposedType,
    confidence: f64,
}

/// Rule-based recognizer: speaker labels, dialogue cues, honorifics, quoted names,
/// jurisdictional suffixes and organization suffixes.
#[derive(Debug)]
pub struct PatternRecognizer {
    rules: Vec<PatternRule>,
    role_labels: Vec<String>,
    stopwords: Vec<String>,
    honorifics: Vec<String>,
}

impl PatternRecognizer {
    pub fn new(ruleset: &RuleSet) -> Result<Self> {
        let cues = &ruleset.cues;
        let names = |extra: usize| format!(r"{NAME}(?:[ \t]+{NAME}){{0,{extra}}}");
        let names3 = names(2);

        let specs: Vec<(&'static str, String, ProposedType, f64)> = vec![
            (
                "introduction",
                format!(
                    r#"(?i:\b(?:my name is|my name's|named|called|introduced as|known as|goes by))[ \t]+["\u{{201C}}]?({names3})"#
                ),
                ProposedType::Person,
                0.85,
            ),
            (
                "honorific",
                format!(
                    r"(?i:\b(?:{}))\.?[ \t]+({names3})",
                    alternation(&cues.honorifics)
                ),
                ProposedType::Person,
                0.9,
            ),
            (
                "speech_verb",
                format!(
                    r"\b({names3})[ \t]+(?:{})\b",
                    alternation(&cues.person_cue_verbs)
                ),
                ProposedType::Person,
                0.6,
            ),
            (
                "greeting",
                format!(
                    r"(?i:\b(?:{})),?[ \t]+({NAME})\b",
                    alternation(&cues.greetings)
                ),
                ProposedType::Person,
                0.55,
            ),
            (
                "quoted",
                format!(r#"["\u{{201C}}]({NAME}(?:[ \t]+{NAME})?)["\u{{201D}}]"#),
                ProposedType::Person,
                0.45,
            ),
            (
                "place_suffix",
                format!(
                    r"\b({names3}[ \t]+(?:{}))\b",
                    capitalized_alternation(&cues.place_suffixes)
                ),
                ProposedType::Location,
                0.8,
            ),
            (
                "tribal_suffix",
                format!(
                    r"\b({names3}[ \t]+(?:{}))\b",
                    capitalized_alternation(&cues.tribal_suffixes)
                ),
                ProposedType::Organization,
                0.8,
            ),
            (
                "organization_suffix",
                format!(
                    r"\b((?:{NAME}[ \t]+(?:(?:of|and|for|the)[ \t]+)?){{1,5}}(?:{}))\b",
                    capitalized_alternation(&cues.organization_suffixes)
                ),
                ProposedType::Organization,
                0.75,
            ),
            (
                "city_state",
                format!(r"\b({names3}),[ \t]*(?:{})\b", US_STATE_CODES.join("|")),
                ProposedType::Location,
                0.7,
            ),
            (
                "geographic_determiner",
                format!(
                    r"(?i:\b(?:{}))[ \t]+({names3})",
                    alternation(&cues.geographic_determiners)
                ),
                ProposedType::Location,
                0.8,
            ),
            (
                "location_preposition",
                format!(
                    r"\b(?:{})[ \t]+({names3})",
                    alternation(&cues.location_prepositions)
                ),
                ProposedType::Location,
                0.4,
            ),
        ];

        let mut rules = Vec::with_capacity(specs.len());
        for (name, pattern, proposed, confidence) in specs {
            let regex = Regex::new(&pattern).map_err(|e| DeidError::pattern(name, e))?;
            rules.push(PatternRule {
                name,
                regex,
                proposed,
                confidence,
            });
        }

        let mut stopwords: Vec<String> = ruleset
            .extraction
            .non_entity_words
            .iter()
            .chain(ruleset.extraction.calendar_words.iter())
            .cloned()
            .collect();
        stopwords.sort();

        Ok(Self {
            rules,
            role_labels: ruleset.extraction.role_labels.iter().cloned().collect(),
            stopwords,
            honorifics: cues.honorifics.iter().map(|h| normalize_key(h)).collect(),
        })
    }

    fn is_stopword(&self, word: &str) -> bool {
        self.stopwords.binary_search(&normalize_key(word)).is_ok()
    }

    /// Move `start` past leading stopwords ("So Jodi" -> "Jodi")
    fn trim_leading_stopwords(&self, text: &str, mut start: usize, end: usize) -> usize {
        loop {
            let slice = &text[start..end];
            let Some(space) = slice.find([' ', '\t']) else {
                return start;
            };
            if !self.is_stopword(&slice[..space]) {
                return start;
            }
            let rest = &slice[space..];
            start += space + (rest.len() - rest.trim_start().len());
        }
    }

    fn recognize_speaker(&self, utterance: &Utterance) -> Option<Candidate> {
        let label = utterance.speaker.as_deref()?;
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return None;
        }
        let key = normalize_key(trimmed);
        let base = key.trim_end_matches(|c: char| c.is_ascii_digit()).trim();
        if self.role_labels.iter().any(|r| r == base) || self.is_stopword(trimmed) {
            return None;
        }
        let looks_like_name = trimmed.split_whitespace().all(|w| {
            let w = w.trim_end_matches('.');
            self.honorifics.contains(&normalize_key(w))
                || (w.chars().next().is_some_and(char::is_uppercase)
                    && w
                        .chars()
                        .all(|c| c.is_alphabetic() || matches!(c, '\'' | '-' | '\u{2019}')))
        });
        if !looks_like_name || trimmed.split_whitespace().count() > 4 {
            return None;
        }
        let start = label.len() - label.trim_start().len();
        Some(Candidate {
            span: Span::speaker(utterance.index, start, start + trimmed.len()),
            proposed: ProposedType::Person,
            confidence: 0.9,
            recognizer: self.id().to_string(),
        })
    }
}

impl Recognizer for PatternRecognizer {
    fn id(&self) -> &str {
        "pattern"
    }

    fn recognize(&self, utterance: &Utterance) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = self.recognize_speaker(utterance).into_iter().collect();
        let text = utterance.text.as_str();

        for rule in &self.rules {
            for caps in rule.regex.captures_iter(text) {
                let Some(m) = caps.get(1) else { continue };
                let start = self.trim_leading_stopwords(text, m.start(), m.end());
                let end = trim_possessive(text, start, m.end());
                if start >= end || self.is_stopword(&text[start..end]) {
                    continue;
                }
                tracing::trace!(rule = rule.name, surface = &text[start..end], "pattern match");
                candidates.push(Candidate {
                    span: Span::text(utterance.index, start, end),
                    proposed: rule.proposed,
                    confidence: rule.confidence,
                    recognizer: self.id().to_string(),
                });
            }
        }
        candidates
    }
}

/// Escaped, longest-first alternation; spaces inside phrases match any run of blanks
fn alternation(words: &[String]) -> String {
    let mut sorted: Vec<&String> = words.iter().filter(|w| !w.trim().is_empty()).collect();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    sorted
        .iter()
        .map(|w| {
            w.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[ \t]+")
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Alternation of the capitalized and all-caps forms ("County", "COUNTY", "DC")
fn capitalized_alternation(words: &[String]) -> String {
    let mut forms = Vec::new();
    for word in words {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            forms.push(first.to_uppercase().chain(chars).collect::<String>());
        }
        forms.push(word.to_uppercase());
    }
    forms.sort();
    forms.dedup();
    alternation(&forms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> PatternRecognizer {
        PatternRecognizer::new(&RuleSet::builtin().unwrap()).unwrap()
    }

    fn utterance(speaker: Option<&str>, text: &str) -> Utterance {
        Utterance {
            index: 0,
            speaker: speaker.map(str::to_string),
            text: text.to_string(),
            timestamp: None,
        }
    }

    fn surfaces(utt: &Utterance, candidates: &[Candidate]) -> Vec<(String, ProposedType)> {
        candidates
            .iter()
            .map(|c| (utt.field(c.span.field)[c.span.start..c.span.end].to_string(), c.proposed))
            .collect()
    }

    #[test]
    fn test_introduction_and_preposition() {
        let utt = utterance(None, "My name is Jodi and I work with Pam in Bethel.");
        let found = surfaces(&utt, &recognizer().recognize(&utt));
        assert!(found.contains(&("Jodi".to_string(), ProposedType::Person)));
        assert!(found.contains(&("Bethel".to_string(), ProposedType::Location)));
    }

    #[test]
    fn test_speaker_label_is_person() {
        let utt = utterance(Some("Jodi Burshia"), "Thanks for having me.");
        let candidates = recognizer().recognize(&utt);
        let speaker = candidates
            .iter()
            .find(|c| c.span.field == crate::models::SpanField::Speaker)
            .unwrap();
        assert_eq!(speaker.span.start, 0);
        assert_eq!(speaker.span.end, "Jodi Burshia".len());
    }

    #[test]
    fn test_role_labels_ignored() {
        let r = recognizer();
        for label in ["Interviewer", "Speaker 2", "Q"] {
            let utt = utterance(Some(label), "hello");
            assert!(r.recognize_speaker(&utt).is_none(), "{label}");
        }
    }

    #[test]
    fn test_jurisdiction_and_determiner() {
        let utt = utterance(
            None,
            "We drove from Jackson County to the state of Washington. Washington said no.",
        );
        let found = surfaces(&utt, &recognizer().recognize(&utt));
        assert!(found.contains(&("Jackson County".to_string(), ProposedType::Location)));
        assert!(found.contains(&("Washington".to_string(), ProposedType::Location)));
        assert!(found.contains(&("Washington".to_string(), ProposedType::Person)));
    }

    #[test]
    fn test_organizations_and_tribes() {
        let utt = utterance(
            None,
            "The Navajo Nation joined the Intertribal Agriculture Council last year.",
        );
        let found = surfaces(&utt, &recognizer().recognize(&utt));
        assert!(found.contains(&("Navajo Nation".to_string(), ProposedType::Organization)));
        assert!(found.contains(&(
            "Intertribal Agriculture Council".to_string(),
            ProposedType::Organization
        )));
    }

    #[test]
    fn test_leading_stopword_and_possessive_trimmed() {
        let utt = utterance(None, "So Pam said we should meet at Dr. Ariza's office.");
        let found = surfaces(&utt, &recognizer().recognize(&utt));
        assert!(found.contains(&("Pam".to_string(), ProposedType::Person)));
        assert!(found.contains(&("Ariza".to_string(), ProposedType::Person)));
    }

    #[test]
    fn test_alternation_longest_first() {
        let alt = alternation(&["in".to_string(), "grew up in".to_string()]);
        assert!(alt.starts_with(r"grew[ \t]+up[ \t]+in|"));
    }
}
