use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::lookup::{LookupEntry, LookupService};
use crate::models::{Candidate, Mention, ProposedType, Provenance, Span, Transcript, Utterance};
use crate::recognizers::Recognizer;
use crate::rules::RuleSet;
use crate::text::{self, normalize_key};

/// Provenance id for full names assembled from a known single-token name
pub const NAME_EXTENSION_ID: &str = "name_extension";

/// Configuration for Stage 1 extraction
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Stage1Config {
    /// Mentions below this confidence are dropped unless the lookup store knows the string
    pub min_confidence: f64,
}

impl Default for Stage1Config {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
        }
    }
}

/// Result of Stage 1
#[derive(Debug, Clone, Default)]
pub struct Stage1Result {
    /// Merged mentions in transcript order; `mentions[i].id == i`
    pub mentions: Vec<Mention>,
    /// Raw candidates across all recognizers
    pub candidates: usize,
    /// Merged spans rejected by the false-positive filter or the confidence floor
    pub dropped: usize,
    /// Mentions widened to the capitalized word in front of a known name
    pub extended: usize,
}

impl Stage1Result {
    pub fn ambiguous_count(&self) -> usize {
        self.mentions
            .iter()
            .filter(|m| m.proposed == ProposedType::Ambiguous)
            .count()
    }
}

/// Execute Stage 1: run every recognizer over every utterance and merge their proposals
pub fn execute_stage1(
    transcript: &Transcript,
    recognizers: &[Arc<dyn Recognizer>],
    lookup: &dyn LookupService,
    rules: &RuleSet,
    config: &Stage1Config,
) -> Stage1Result {
    let mut result = Stage1Result::default();
    let mut merged: Vec<(Span, String, Vec<Provenance>)> = Vec::new();

    for utterance in &transcript.utterances {
        let mut candidates = Vec::new();
        for recognizer in recognizers {
            for candidate in recognizer.recognize(utterance) {
                if valid_span(utterance, &candidate) {
                    candidates.push(candidate);
                } else {
                    debug!(
                        "Discarding out-of-range span {:?} from {}",
                        candidate.span,
                        recognizer.id()
                    );
                }
            }
        }
        result.candidates += candidates.len();
        merged.extend(merge_candidates(utterance, candidates));
    }

    merged.sort_by_key(|(span, _, _)| *span);

    let mut kept = Vec::with_capacity(merged.len());
    for (span, surface, provenance) in merged {
        let key = normalize_key(&surface);
        if rules.is_false_positive(&key) || rules.is_false_positive(&rules.correct(&key)) {
            debug!("Filtered false positive {:?}", surface);
            result.dropped += 1;
            continue;
        }

        let entry = lookup_corrected(lookup, rules, &key);
        let confidence = max_confidence(&provenance);
        if confidence < config.min_confidence && !entry.is_known() {
            debug!("Dropped low-confidence mention {:?} ({:.2})", surface, confidence);
            result.dropped += 1;
            continue;
        }
        kept.push((span, surface, provenance));
    }

    result.extended = extend_person_names(transcript, &mut kept, rules);
    kept.sort_by_key(|(span, _, _)| *span);

    for (span, surface, provenance) in kept {
        let entry = lookup_corrected(lookup, rules, &normalize_key(&surface));
        let confidence = max_confidence(&provenance);
        let proposed = consensus(&provenance, &entry);
        result.mentions.push(Mention {
            id: result.mentions.len(),
            span,
            surface,
            proposed,
            provenance,
            confidence,
        });
    }

    info!(
        "Stage 1: {} candidates -> {} mentions ({} ambiguous), {} dropped",
        result.candidates,
        result.mentions.len(),
        result.ambiguous_count(),
        result.dropped
    );
    result
}

fn max_confidence(provenance: &[Provenance]) -> f64 {
    provenance
        .iter()
        .map(|p| p.confidence)
        .fold(0.0_f64, f64::max)
}

/// Widen `Quillby` to `Zorvath Quillby` wherever a capitalized word sits directly in
/// front of a single-token person name found elsewhere in the document. Only text
/// fields are touched; spans overlapping another mention are left alone.
fn extend_person_names(
    transcript: &Transcript,
    mentions: &mut Vec<(Span, String, Vec<Provenance>)>,
    rules: &RuleSet,
) -> usize {
    let names: BTreeSet<String> = mentions
        .iter()
        .filter(|(_, surface, provenance)| {
            !surface.contains(char::is_whitespace)
                && provenance.iter().any(|p| p.proposed == ProposedType::Person)
        })
        .map(|(_, surface, _)| normalize_key(surface))
        .collect();
    if names.is_empty() {
        return 0;
    }
    let honorifics: BTreeSet<String> =
        rules.cues.honorifics.iter().map(|h| normalize_key(h)).collect();

    let mut extended = 0;
    for utterance in &transcript.utterances {
        let field = utterance.text.as_str();
        for pair in text::words(field).windows(2) {
            let (head, tail) = (pair[0], pair[1]);
            if !head.is_capitalized()
                || !tail.is_capitalized()
                || !names.contains(&normalize_key(tail.text))
                || !field[head.end..tail.start].chars().all(|c| c == ' ' || c == '\t')
            {
                continue;
            }
            let head_key = normalize_key(head.text);
            if honorifics.contains(&head_key) || rules.is_false_positive(&head_key) {
                continue;
            }

            let span = Span::text(utterance.index, head.start, tail.end);
            let tail_span = Span::text(utterance.index, tail.start, tail.end);
            if mentions
                .iter()
                .any(|(s, _, _)| *s != tail_span && s.overlaps(&span))
            {
                continue;
            }
            let mut provenance = vec![Provenance {
                recognizer: NAME_EXTENSION_ID.to_string(),
                proposed: ProposedType::Person,
                confidence: 0.6,
            }];
            if let Some(pos) = mentions.iter().position(|(s, _, _)| *s == tail_span) {
                provenance.extend(mentions.remove(pos).2);
            }
            let surface = field[span.start..span.end].to_string();
            debug!("Extended person name to {:?}", surface);
            mentions.push((span, surface, provenance));
            extended += 1;
        }
    }
    extended
}

fn valid_span(utterance: &Utterance, candidate: &Candidate) -> bool {
    let span = candidate.span;
    let field = utterance.field(span.field);
    span.utterance == utterance.index
        && !span.is_empty()
        && span.end <= field.len()
        && field.is_char_boundary(span.start)
        && field.is_char_boundary(span.end)
}

/// Pool candidates of one utterance by span. Longer spans win: a span contained in a
/// kept span folds its votes into it, a partially overlapping span is discarded.
fn merge_candidates(
    utterance: &Utterance,
    candidates: Vec<Candidate>,
) -> Vec<(Span, String, Vec<Provenance>)> {
    let mut by_span: BTreeMap<Span, Vec<Provenance>> = BTreeMap::new();
    for c in candidates {
        by_span.entry(c.span).or_default().push(Provenance {
            recognizer: c.recognizer,
            proposed: c.proposed,
            confidence: c.confidence,
        });
    }

    let mut groups: Vec<(Span, Vec<Provenance>)> = by_span.into_iter().collect();
    groups.sort_by(|(a, pa), (b, pb)| {
        b.len()
            .cmp(&a.len())
            .then(pb.len().cmp(&pa.len()))
            .then(a.cmp(b))
    });

    let mut kept: Vec<(Span, Vec<Provenance>)> = Vec::new();
    for (span, provenance) in groups {
        if let Some((_, votes)) = kept.iter_mut().find(|(k, _)| k.contains(&span)) {
            votes.extend(provenance);
        } else if kept.iter().any(|(k, _)| k.overlaps(&span)) {
            debug!("Discarding span {:?} overlapping a longer mention", span);
        } else {
            kept.push((span, provenance));
        }
    }

    kept.into_iter()
        .map(|(span, provenance)| {
            let surface = utterance.field(span.field)[span.start..span.end].to_string();
            (span, surface, provenance)
        })
        .collect()
}

fn lookup_corrected(lookup: &dyn LookupService, rules: &RuleSet, key: &str) -> LookupEntry {
    let entry = lookup.lookup(key);
    if entry.is_known() {
        return entry;
    }
    let corrected = rules.correct(key);
    if corrected == key {
        entry
    } else {
        lookup.lookup(&corrected)
    }
}

/// Consensus type: agreement among non-ambiguous votes, unless any vote or the lookup
/// store marks the string ambiguous
fn consensus(provenance: &[Provenance], entry: &LookupEntry) -> ProposedType {
    if entry.is_ambiguous() || provenance.iter().any(|p| p.proposed == ProposedType::Ambiguous) {
        return ProposedType::Ambiguous;
    }
    let mut kinds = provenance.iter().filter_map(|p| p.proposed.kind());
    let Some(first) = kinds.next() else {
        return ProposedType::Ambiguous;
    };
    if kinds.all(|k| k == first) {
        first.into()
    } else {
        ProposedType::Ambiguous
    }
}
