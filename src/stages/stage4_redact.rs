use std::collections::{BTreeMap, HashMap};

use regex::Regex;
use tracing::{debug, info};

use crate::error::{DeidError, Result};
use crate::lookup::LookupService;
use crate::models::{
    CanonicalEntity, EntityKind, Mention, PseudonymCode, Redaction, RedactionMethod, Span,
    SpanField, Transcript, Utterance,
};
use crate::rules::RuleSet;
use crate::text::normalize_key;

/// Result of Stage 4
#[derive(Debug, Clone)]
pub struct Stage4Result {
    /// Entities with their pseudonym codes
    pub entities: Vec<CanonicalEntity>,
    /// Every replaced range, sorted by span
    pub redactions: Vec<Redaction>,
    /// Utterances with every redaction applied
    pub redacted: Transcript,
}

impl Stage4Result {
    pub fn sweep_count(&self) -> usize {
        self.redactions
            .iter()
            .filter(|r| r.method == RedactionMethod::Sweep)
            .count()
    }
}

/// Give each entity its code: numbered per kind in order of first mention
pub fn assign_codes(entities: &mut [CanonicalEntity]) {
    let mut order: Vec<usize> = (0..entities.len()).collect();
    order.sort_by_key(|&i| (entities[i].first_span, entities[i].id));
    let mut next: HashMap<EntityKind, usize> = HashMap::new();
    for i in order {
        let counter = next.entry(entities[i].kind).or_insert(0);
        *counter += 1;
        entities[i].code = Some(PseudonymCode::new(entities[i].kind, *counter));
    }
}

/// Every string that must not survive redaction, keyed by its normalized form, with the
/// entity that owns it. A form claimed by several entities goes to the one with more
/// mentions, then the earliest.
pub fn sweep_variants(
    entities: &[CanonicalEntity],
    lookup: &dyn LookupService,
    rules: &RuleSet,
) -> BTreeMap<String, (String, usize)> {
    let mut owners: BTreeMap<String, (String, usize)> = BTreeMap::new();

    for entity in entities {
        let mut forms: Vec<String> = entity.variants.iter().cloned().collect();
        for norm in &entity.normalized {
            forms.push(norm.clone());
            forms.extend(rules.misspellings_of(norm).into_iter().map(str::to_string));
            if entity.kind == EntityKind::Person && norm.contains(' ') {
                for token in norm
                    .split(' ')
                    .filter(|t| t.chars().count() > 1 && lookup.lookup(t).is_name())
                {
                    forms.push(token.to_string());
                    forms.extend(rules.misspellings_of(token).into_iter().map(str::to_string));
                }
            }
        }

        for form in forms {
            let key = normalize_key(&form);
            if key.is_empty() || rules.is_false_positive(&key) {
                continue;
            }
            let replace = match owners.get(&key).map(|(_, owner)| *owner) {
                Some(owner) => entities
                    .get(owner)
                    .is_some_and(|current| entity.mention_count() > current.mention_count()),
                None => true,
            };
            if replace {
                owners.insert(key, (form, entity.id));
            }
        }
    }
    owners
}

/// Whole-word, case-insensitive matcher for all sweep variants, longest first
pub fn variant_matcher(variants: &BTreeMap<String, (String, usize)>) -> Result<Option<Regex>> {
    let mut forms: Vec<&str> = variants
        .iter()
        .flat_map(|(key, (form, _))| [key.as_str(), form.as_str()])
        .filter(|f| {
            f.chars().next().is_some_and(char::is_alphanumeric)
                && f.chars().next_back().is_some_and(char::is_alphanumeric)
        })
        .collect();
    if forms.is_empty() {
        return Ok(None);
    }
    forms.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    forms.dedup();
    let alternation = forms
        .iter()
        .map(|f| {
            f.split_whitespace()
                .map(|w| regex::escape(w).replace('\'', "['\u{2019}]"))
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
        .map(Some)
        .map_err(|e| DeidError::pattern("redaction sweep", e))
}

/// Execute Stage 4: assign codes, replace every mention and sweep for leftover variants
pub fn execute_stage4(
    transcript: &Transcript,
    mentions: &[Mention],
    mut entities: Vec<CanonicalEntity>,
    lookup: &dyn LookupService,
    rules: &RuleSet,
) -> Result<Stage4Result> {
    assign_codes(&mut entities);

    let mut redactions = Vec::new();
    for entity in &entities {
        let Some(code) = entity.code else { continue };
        for mention in entity.mention_ids.iter().filter_map(|id| mentions.get(*id)) {
            redactions.push(Redaction {
                span: mention.span,
                original: mention.surface.clone(),
                code,
                entity_id: entity.id,
                method: RedactionMethod::Span,
            });
        }
    }

    let variants = sweep_variants(&entities, lookup, rules);
    if let Some(matcher) = variant_matcher(&variants)? {
        let swept = sweep(transcript, &matcher, &variants, &entities, &redactions);
        debug!("Sweep found {} additional occurrences", swept.len());
        redactions.extend(swept);
    }
    redactions.sort_by_key(|r| r.span);

    let redacted = apply_redactions(transcript, &redactions);
    let result = Stage4Result {
        entities,
        redactions,
        redacted,
    };

    info!(
        "Stage 4: {} entities coded, {} redactions ({} from sweep)",
        result.entities.len(),
        result.redactions.len(),
        result.sweep_count()
    );
    Ok(result)
}

fn sweep(
    transcript: &Transcript,
    matcher: &Regex,
    variants: &BTreeMap<String, (String, usize)>,
    entities: &[CanonicalEntity],
    existing: &[Redaction],
) -> Vec<Redaction> {
    let mut found: Vec<Redaction> = Vec::new();
    for utterance in &transcript.utterances {
        for field in [SpanField::Speaker, SpanField::Text] {
            let text = utterance.field(field);
            let masked = mask_redacted(text, utterance.index, field, existing);
            for m in matcher.find_iter(&masked) {
                let span = Span {
                    utterance: utterance.index,
                    field,
                    start: m.start(),
                    end: m.end(),
                };
                if existing.iter().chain(found.iter()).any(|r| r.span.overlaps(&span)) {
                    continue;
                }
                let Some((_, owner)) = variants.get(&normalize_key(m.as_str())) else {
                    continue;
                };
                let Some(code) = entities.get(*owner).and_then(|e| e.code) else {
                    continue;
                };
                found.push(Redaction {
                    span,
                    original: m.as_str().to_string(),
                    code,
                    entity_id: *owner,
                    method: RedactionMethod::Sweep,
                });
            }
        }
    }
    found
}

/// Blank out ranges already covered by a redaction, keeping byte offsets intact
fn mask_redacted(text: &str, utterance: usize, field: SpanField, redactions: &[Redaction]) -> String {
    let covered: Vec<&Span> = redactions
        .iter()
        .map(|r| &r.span)
        .filter(|s| s.utterance == utterance && s.field == field)
        .collect();
    if covered.is_empty() {
        return text.to_string();
    }
    text.char_indices()
        .flat_map(|(i, c)| {
            let hidden = covered.iter().any(|s| s.start <= i && i < s.end);
            let width = if hidden { c.len_utf8() } else { 0 };
            let keep = if hidden { None } else { Some(c) };
            keep.into_iter().chain(std::iter::repeat_n(' ', width))
        })
        .collect()
}

/// Rewrite every field with its redactions applied; spans are replaced by their code
pub fn apply_redactions(transcript: &Transcript, redactions: &[Redaction]) -> Transcript {
    let mut by_field: HashMap<(usize, SpanField), Vec<&Redaction>> = HashMap::new();
    for r in redactions {
        by_field
            .entry((r.span.utterance, r.span.field))
            .or_default()
            .push(r);
    }

    let rewrite = |index: usize, field: SpanField, text: &str| -> String {
        let Some(list) = by_field.get(&(index, field)) else {
            return text.to_string();
        };
        let mut list = list.clone();
        list.sort_by_key(|r| r.span.start);
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for r in list {
            if r.span.start < cursor || r.span.end > text.len() {
                continue;
            }
            out.push_str(&text[cursor..r.span.start]);
            out.push_str(&r.code.to_string());
            cursor = r.span.end;
        }
        out.push_str(&text[cursor..]);
        out
    };

    Transcript {
        name: transcript.name.clone(),
        utterances: transcript
            .utterances
            .iter()
            .map(|u| Utterance {
                index: u.index,
                speaker: u
                    .speaker
                    .as_deref()
                    .map(|s| rewrite(u.index, SpanField::Speaker, s)),
                text: rewrite(u.index, SpanField::Text, &u.text),
                timestamp: u.timestamp,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupData, LookupStore};
    use crate::models::{ProposedType, Provenance};
    use crate::stages::{Stage2Config, Stage3Config, execute_stage2, execute_stage3};

    fn utterance(index: usize, speaker: Option<&str>, text: &str) -> Utterance {
        Utterance {
            index,
            speaker: speaker.map(str::to_string),
            text: text.to_string(),
            timestamp: None,
        }
    }

    fn mention(id: usize, span: Span, surface: &str, proposed: ProposedType) -> Mention {
        Mention {
            id,
            span,
            surface: surface.to_string(),
            proposed,
            provenance: vec![Provenance {
                recognizer: "test".to_string(),
                proposed,
                confidence: 0.8,
            }],
            confidence: 0.8,
        }
    }

    fn run(transcript: &Transcript, mentions: &[Mention]) -> Stage4Result {
        let data: LookupData = serde_json::from_str(
            r#"{"first_names": ["Jodi", "Pam"], "last_names": ["Burshia"], "places": [{"name": "Bethel"}]}"#,
        )
        .unwrap();
        let lookup = LookupStore::from_data(data);
        let rules = RuleSet::builtin().unwrap();
        let clusters = execute_stage2(mentions, &lookup, &rules, &Stage2Config::default()).clusters;
        let entities = execute_stage3(
            transcript,
            mentions,
            &clusters,
            &lookup,
            &rules,
            &Stage3Config::default(),
        )
        .entities;
        execute_stage4(transcript, mentions, entities, &lookup, &rules).unwrap()
    }

    #[test]
    fn test_scenario_redaction() {
        let text = "My name is Jodi and I work with Pam in Bethel.";
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: vec![utterance(0, None, text)],
        };
        let mentions = vec![
            mention(0, Span::text(0, 11, 15), "Jodi", ProposedType::Person),
            mention(1, Span::text(0, 32, 35), "Pam", ProposedType::Person),
            mention(2, Span::text(0, 39, 45), "Bethel", ProposedType::Location),
        ];
        let result = run(&transcript, &mentions);
        assert_eq!(
            result.redacted.utterances[0].text,
            "My name is Person_1 and I work with Person_2 in Location_1."
        );
        let codes: Vec<String> = result
            .entities
            .iter()
            .map(|e| e.code.unwrap().to_string())
            .collect();
        assert_eq!(codes, vec!["Person_1", "Person_2", "Location_1"]);
        assert_eq!(result.sweep_count(), 0);
    }

    #[test]
    fn test_sweep_catches_missed_variants_and_speaker() {
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: vec![
                utterance(0, Some("Jodi Burshia"), "I am Jodi Burshia."),
                utterance(1, Some("Pam"), "Thanks JODI, and jody too. burshia said hi."),
            ],
        };
        let mentions = vec![
            mention(0, Span::speaker(0, 0, 12), "Jodi Burshia", ProposedType::Person),
            mention(1, Span::text(0, 5, 17), "Jodi Burshia", ProposedType::Person),
        ];
        let result = run(&transcript, &mentions);
        assert_eq!(result.redacted.utterances[0].speaker.as_deref(), Some("Person_1"));
        assert_eq!(result.redacted.utterances[0].text, "I am Person_1.");
        assert_eq!(
            result.redacted.utterances[1].text,
            "Thanks Person_1, and Person_1 too. Person_1 said hi."
        );
        // "Pam" was never proposed, so the label stays
        assert_eq!(result.redacted.utterances[1].speaker.as_deref(), Some("Pam"));
        assert_eq!(result.sweep_count(), 3);
    }

    #[test]
    fn test_sweep_is_whole_word() {
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: vec![utterance(0, None, "Pam met Pamela at the Pamphlet shop")],
        };
        let mentions = vec![mention(0, Span::text(0, 0, 3), "Pam", ProposedType::Person)];
        let result = run(&transcript, &mentions);
        assert_eq!(
            result.redacted.utterances[0].text,
            "Person_1 met Pamela at the Pamphlet shop"
        );
    }

    #[test]
    fn test_sweep_finds_fragment_next_to_partial_mention() {
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: vec![
                utterance(0, None, "Jodi Burshia runs it."),
                utterance(1, None, "Ask Jodi Burshia later."),
            ],
        };
        let mentions = vec![
            mention(0, Span::text(0, 0, 12), "Jodi Burshia", ProposedType::Person),
            mention(1, Span::text(1, 4, 8), "Jodi", ProposedType::Person),
        ];
        let result = run(&transcript, &mentions);
        assert_eq!(result.redacted.utterances[1].text, "Ask Person_1 Person_1 later.");
        assert!(
            result
                .redactions
                .iter()
                .any(|r| r.method == RedactionMethod::Sweep && r.original == "Burshia")
        );
    }

    #[test]
    fn test_codes_follow_first_appearance_per_kind() {
        let mut entities: Vec<CanonicalEntity> = [
            (EntityKind::Location, Span::text(0, 0, 1)),
            (EntityKind::Person, Span::text(0, 5, 6)),
            (EntityKind::Person, Span::text(1, 0, 1)),
            (EntityKind::Organization, Span::speaker(1, 0, 1)),
        ]
        .into_iter()
        .enumerate()
        .map(|(id, (kind, first_span))| CanonicalEntity {
            id,
            kind,
            resolution: crate::models::Resolution::Unanimous,
            canonical: String::new(),
            variants: Default::default(),
            normalized: Default::default(),
            mention_ids: vec![id],
            first_span,
            code: None,
        })
        .collect();
        assign_codes(&mut entities);
        let codes: Vec<String> = entities.iter().map(|e| e.code.unwrap().to_string()).collect();
        assert_eq!(codes, vec!["Location_1", "Person_1", "Person_2", "Organization_1"]);
    }
}
