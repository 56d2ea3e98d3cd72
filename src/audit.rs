//! Post-run checks over a finished document.
//!
//! Every check reports what it found; nothing here aborts a run. Failures are logged with
//! `warn!` and carried into the batch summary.

use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::io::MappingFile;
use crate::lookup::LookupService;
use crate::models::{CanonicalEntity, CitationAddress, Redaction, Span, SpanField, TagRecord, Transcript};
use crate::rules::RuleSet;
use crate::stages::{CitationScheme, apply_redactions, sweep_variants, variant_matcher};

static CODE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Person|Location|Organization)_\d+\b").expect("code pattern should compile")
});

/// A variant of a known entity still present in redacted output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leak {
    pub address: CitationAddress,
    pub field: SpanField,
    pub text: String,
}

/// Outcome of all checks for one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub leaks: Vec<Leak>,
    pub citation_errors: Vec<String>,
    /// Non-empty utterances with no tag record
    pub untagged: Vec<CitationAddress>,
    /// Utterances where re-applying the mapping does not reproduce the output
    pub round_trip_mismatches: Vec<CitationAddress>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.leaks.is_empty()
            && self.citation_errors.is_empty()
            && self.untagged.is_empty()
            && self.round_trip_mismatches.is_empty()
    }
}

/// Everything a document audit needs
pub struct AuditInput<'a> {
    pub original: &'a Transcript,
    pub redacted: &'a Transcript,
    pub entities: &'a [CanonicalEntity],
    pub addresses: &'a [CitationAddress],
    pub scheme: CitationScheme,
    pub tags: &'a [TagRecord],
    pub mapping: &'a MappingFile,
}

/// Run every check and log each failure
pub fn audit_document(
    input: &AuditInput<'_>,
    lookup: &dyn LookupService,
    rules: &RuleSet,
) -> Result<AuditReport> {
    let report = AuditReport {
        leaks: check_no_leaks(input.redacted, input.addresses, input.entities, lookup, rules)?,
        citation_errors: check_citations(input.original, input.addresses, input.scheme),
        untagged: check_tag_coverage(input.redacted, input.addresses, input.tags),
        round_trip_mismatches: check_round_trip(
            input.original,
            input.redacted,
            input.addresses,
            input.mapping,
        ),
    };

    let name = &input.original.name;
    for leak in &report.leaks {
        warn!("{}: [{}] '{}' survived redaction", name, leak.address, leak.text);
    }
    for error in &report.citation_errors {
        warn!("{}: citation check failed: {}", name, error);
    }
    if !report.untagged.is_empty() {
        warn!("{}: {} utterances have no tag record", name, report.untagged.len());
    }
    for address in &report.round_trip_mismatches {
        warn!("{}: [{}] mapping does not reproduce the redacted text", name, address);
    }
    Ok(report)
}

/// Whole-word, case-insensitive search for every entity variant in the redacted output
pub fn check_no_leaks(
    redacted: &Transcript,
    addresses: &[CitationAddress],
    entities: &[CanonicalEntity],
    lookup: &dyn LookupService,
    rules: &RuleSet,
) -> Result<Vec<Leak>> {
    let variants = sweep_variants(entities, lookup, rules);
    let Some(matcher) = variant_matcher(&variants)? else {
        return Ok(Vec::new());
    };

    let mut leaks = Vec::new();
    for (utterance, address) in redacted.utterances.iter().zip(addresses) {
        for field in [SpanField::Speaker, SpanField::Text] {
            let text = utterance.field(field);
            let codes: Vec<(usize, usize)> =
                CODE_TOKEN.find_iter(text).map(|m| (m.start(), m.end())).collect();
            for m in matcher.find_iter(text) {
                if codes.iter().any(|(s, e)| m.start() < *e && *s < m.end()) {
                    continue;
                }
                leaks.push(Leak {
                    address: *address,
                    field,
                    text: m.as_str().to_string(),
                });
            }
        }
    }
    Ok(leaks)
}

/// Addresses must follow the state machine of the scheme, one per utterance
pub fn check_citations(
    original: &Transcript,
    addresses: &[CitationAddress],
    scheme: CitationScheme,
) -> Vec<String> {
    let mut errors = Vec::new();
    if addresses.len() != original.len() {
        errors.push(format!(
            "{} addresses for {} utterances",
            addresses.len(),
            original.len()
        ));
    }
    if let Some(first) = addresses.first() {
        if *first != CitationAddress::new(0, 1) {
            errors.push(format!("first address is {first}, expected A.1"));
        }
    }

    match scheme {
        CitationScheme::ContiguousRun => {
            for pair in addresses.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                let continues = next.letter == prev.letter && next.verse == prev.verse + 1;
                let advances = next.letter == prev.letter + 1 && next.verse == 1;
                if !continues && !advances {
                    errors.push(format!("{prev} is followed by {next}"));
                }
            }
        }
        CitationScheme::SpeakerIdentity => {
            let mut last_verse: BTreeMap<usize, usize> = BTreeMap::new();
            for address in addresses {
                let known = last_verse.len();
                match last_verse.get_mut(&address.letter) {
                    Some(verse) if address.verse == *verse + 1 => *verse = address.verse,
                    Some(verse) => {
                        errors.push(format!("{address} does not follow verse {verse}"));
                        *verse = address.verse;
                    }
                    None if address.letter == known && address.verse == 1 => {
                        last_verse.insert(address.letter, 1);
                    }
                    None => {
                        errors.push(format!("{address} opens a letter out of order"));
                        last_verse.insert(address.letter, address.verse);
                    }
                }
            }
        }
    }
    errors
}

/// Addresses of non-empty utterances that have no tag record at all
pub fn check_tag_coverage(
    redacted: &Transcript,
    addresses: &[CitationAddress],
    tags: &[TagRecord],
) -> Vec<CitationAddress> {
    let tagged: HashSet<usize> = tags.iter().map(|t| t.utterance).collect();
    redacted
        .utterances
        .iter()
        .zip(addresses)
        .filter(|(u, _)| !u.text.trim().is_empty() && !tagged.contains(&u.index))
        .map(|(_, a)| *a)
        .collect()
}

/// Rebuild the redactions from the mapping alone and compare with the output
pub fn check_round_trip(
    original: &Transcript,
    redacted: &Transcript,
    addresses: &[CitationAddress],
    mapping: &MappingFile,
) -> Vec<CitationAddress> {
    let redactions: Vec<Redaction> = mapping
        .entities
        .iter()
        .enumerate()
        .flat_map(|(entity_id, entity)| {
            entity.spans.iter().map(move |span| Redaction {
                span: Span {
                    utterance: span.utterance,
                    field: span.field,
                    start: span.start,
                    end: span.end,
                },
                original: span.original.clone(),
                code: entity.code,
                entity_id,
                method: span.method,
            })
        })
        .collect();

    let replayed = apply_redactions(original, &redactions);
    replayed
        .utterances
        .iter()
        .zip(&redacted.utterances)
        .zip(addresses)
        .filter(|((a, b), _)| a.text != b.text || a.speaker != b.speaker)
        .map(|(_, address)| *address)
        .collect()
}
