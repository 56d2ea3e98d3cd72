use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::{MentionCluster, cluster_key};
use crate::lookup::{LookupEntry, LookupService, TypePrior};
use crate::models::{CanonicalEntity, EntityKind, Mention, Resolution, SpanField, Transcript};
use crate::rules::RuleSet;
use crate::text::{self, normalize_key};

/// Configuration for Stage 3 disambiguation
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Stage3Config {
    /// Tokens inspected on each side of a mention for cues
    pub window_tokens: usize,
}

impl Default for Stage3Config {
    fn default() -> Self {
        Self { window_tokens: 4 }
    }
}

/// Result of Stage 3
#[derive(Debug, Clone, Default)]
pub struct Stage3Result {
    /// Typed entities in order of first mention; codes not yet assigned
    pub entities: Vec<CanonicalEntity>,
    /// Ids of entities typed by the last-resort default, for manual audit
    pub unresolved: Vec<usize>,
}

/// Cue tally for one mention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cues {
    person: usize,
    place: usize,
}

impl Cues {
    fn verdict(self) -> Option<EntityKind> {
        match self.person.cmp(&self.place) {
            std::cmp::Ordering::Greater => Some(EntityKind::Person),
            std::cmp::Ordering::Less => Some(EntityKind::Location),
            std::cmp::Ordering::Equal => None,
        }
    }
}

struct Disambiguator<'a> {
    transcript: &'a Transcript,
    lookup: &'a dyn LookupService,
    rules: &'a RuleSet,
    config: &'a Stage3Config,
}

impl Disambiguator<'_> {
    /// Lookup entries for every member form, misspelling corrections included
    fn entries(&self, cluster: &MentionCluster) -> Vec<LookupEntry> {
        std::iter::once(&cluster.canonical_key)
            .chain(cluster.normalized.iter())
            .map(|key| self.lookup.lookup(key))
            .filter(LookupEntry::is_known)
            .collect()
    }

    fn cues(&self, mention: &Mention, entries: &[LookupEntry]) -> Cues {
        let mut cues = Cues::default();
        if mention.span.field == SpanField::Speaker {
            cues.person += 1;
            return cues;
        }
        let Some(utterance) = self.transcript.get(mention.span.utterance) else {
            return cues;
        };
        let field = utterance.field(mention.span.field);
        let words = text::words(field);
        let window = self.config.window_tokens;

        let before: Vec<String> = words
            .iter()
            .filter(|w| w.end <= mention.span.start)
            .map(|w| normalize_key(w.text))
            .collect();
        let before = before[before.len().saturating_sub(window)..].join(" ");
        let after = words
            .iter()
            .filter(|w| w.start >= mention.span.end)
            .take(window)
            .map(|w| normalize_key(w.text))
            .collect::<Vec<_>>()
            .join(" ");
        let surface = normalize_key(&mention.surface);
        let last_surface_word = surface.rsplit(' ').next().unwrap_or("");

        let c = &self.rules.cues;
        if c.person_cue_verbs.iter().any(|v| starts_with_phrase(&after, v)) {
            cues.person += 1;
        }
        if c.honorifics.iter().any(|h| ends_with_phrase(&before, h)) {
            cues.person += 1;
        }
        if c.location_prepositions.iter().any(|p| ends_with_phrase(&before, p))
            || c.geographic_determiners.iter().any(|p| ends_with_phrase(&before, p))
        {
            cues.place += 1;
        }
        let suffixed = |s: &String| {
            starts_with_phrase(&after, s) || (surface.contains(' ') && last_surface_word == s.as_str())
        };
        if c.place_suffixes.iter().any(suffixed) {
            cues.place += 1;
        }

        let context = format!("{before} {surface} {after}");
        for hint in entries.iter().filter_map(|e| e.ambiguity.as_ref()) {
            if hint.person_patterns.iter().any(|p| contains_phrase(&context, &normalize_key(p))) {
                cues.person += 1;
            }
            if hint.place_patterns.iter().any(|p| contains_phrase(&context, &normalize_key(p))) {
                cues.place += 1;
            }
        }
        cues
    }

    /// Resolve one cluster into one entity, or two for a split homograph.
    /// Returns (kind, resolution, mention ids) groups.
    fn resolve(
        &self,
        cluster: &MentionCluster,
        mentions: &[Mention],
    ) -> Vec<(EntityKind, Resolution, Vec<usize>)> {
        if !cluster.has_ambiguous && cluster.kinds.len() == 1 {
            if let Some(kind) = cluster.kinds.first() {
                return vec![(*kind, Resolution::Unanimous, cluster.mention_ids.clone())];
            }
        }

        let entries = self.entries(cluster);
        let prior = entries.iter().find_map(LookupEntry::prior).map(TypePrior::kind);
        let homograph = entries.iter().any(LookupEntry::is_ambiguous);

        // per-mention vote: context cues first, then the mention's own typed proposal
        let votes: Vec<(usize, Option<EntityKind>, bool)> = cluster
            .mention_ids
            .iter()
            .filter_map(|id| mentions.get(*id))
            .map(|m| {
                let cue = self.cues(m, &entries).verdict();
                (m.id, cue.or_else(|| m.proposed.kind()), cue.is_some())
            })
            .collect();

        let mut tally: BTreeMap<EntityKind, usize> = BTreeMap::new();
        for kind in votes.iter().filter_map(|(_, k, _)| *k) {
            *tally.entry(kind).or_default() += 1;
        }
        let any_context_cue = votes.iter().any(|(_, _, from_cue)| *from_cue);

        if tally.is_empty() {
            return match prior {
                Some(kind) => vec![(kind, Resolution::Prior, cluster.mention_ids.clone())],
                None => {
                    warn!(
                        "No type evidence for {:?}; defaulting to person",
                        cluster.canonical_key
                    );
                    vec![(EntityKind::Person, Resolution::Default, cluster.mention_ids.clone())]
                }
            };
        }

        if let (1, Some(&kind)) = (tally.len(), tally.keys().next()) {
            let resolution = if any_context_cue {
                Resolution::ContextCues
            } else {
                Resolution::Majority
            };
            return vec![(kind, resolution, cluster.mention_ids.clone())];
        }

        let majority = pick_majority(&tally, prior);
        // divergent local context splits a cluster even when the lookup knows one reading only
        let cued = |kind: EntityKind| {
            votes
                .iter()
                .any(|(_, vote, from_cue)| *from_cue && *vote == Some(kind))
        };
        let split = tally.contains_key(&EntityKind::Person)
            && tally.contains_key(&EntityKind::Location)
            && (homograph || (cued(EntityKind::Person) && cued(EntityKind::Location)));

        if !split {
            debug!(
                "Conflicting cues for {:?} {:?}; majority {}",
                cluster.canonical_key, tally, majority
            );
            return vec![(majority, Resolution::Majority, cluster.mention_ids.clone())];
        }

        let majority_side = if majority == EntityKind::Location {
            EntityKind::Location
        } else {
            EntityKind::Person
        };
        let mut person = Vec::new();
        let mut place = Vec::new();
        for (id, vote, _) in votes {
            let side = match vote {
                Some(EntityKind::Person) => EntityKind::Person,
                Some(EntityKind::Location) => EntityKind::Location,
                _ => majority_side,
            };
            if side == EntityKind::Person {
                person.push(id);
            } else {
                place.push(id);
            }
        }
        info!(
            "Split homograph {:?}: {} person, {} place mentions",
            cluster.canonical_key,
            person.len(),
            place.len()
        );
        vec![
            (EntityKind::Person, Resolution::Split, person),
            (EntityKind::Location, Resolution::Split, place),
        ]
    }
}

/// Most votes; ties go to the prior, then to person, then to the first kind
fn pick_majority(tally: &BTreeMap<EntityKind, usize>, prior: Option<EntityKind>) -> EntityKind {
    let top = tally.values().copied().max().unwrap_or(0);
    let leaders: Vec<EntityKind> = tally
        .iter()
        .filter(|(_, n)| **n == top)
        .map(|(k, _)| *k)
        .collect();
    if let Some(prior) = prior.filter(|p| leaders.contains(p)) {
        return prior;
    }
    if leaders.contains(&EntityKind::Person) {
        return EntityKind::Person;
    }
    leaders.first().copied().unwrap_or(EntityKind::Person)
}

fn starts_with_phrase(haystack: &str, phrase: &str) -> bool {
    haystack == phrase
        || haystack
            .strip_prefix(phrase)
            .is_some_and(|rest| rest.starts_with(' '))
}

fn ends_with_phrase(haystack: &str, phrase: &str) -> bool {
    haystack == phrase
        || haystack
            .strip_suffix(phrase)
            .is_some_and(|rest| rest.ends_with(' '))
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    !phrase.is_empty() && format!(" {haystack} ").contains(&format!(" {phrase} "))
}

/// Most frequent surface form, earliest on ties
fn canonical_surface(members: &[&Mention]) -> String {
    let mut counts: Vec<(&str, usize, usize)> = Vec::new();
    for (order, m) in members.iter().enumerate() {
        match counts.iter_mut().find(|(s, _, _)| *s == m.surface) {
            Some(entry) => entry.1 += 1,
            None => counts.push((&m.surface, 1, order)),
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
        .map(|(s, _, _)| s.to_string())
        .unwrap_or_default()
}

/// Execute Stage 3: settle the type of every cluster and emit canonical entities
pub fn execute_stage3(
    transcript: &Transcript,
    mentions: &[Mention],
    clusters: &[MentionCluster],
    lookup: &dyn LookupService,
    rules: &RuleSet,
    config: &Stage3Config,
) -> Stage3Result {
    let disambiguator = Disambiguator {
        transcript,
        lookup,
        rules,
        config,
    };

    let mut groups: Vec<(EntityKind, Resolution, Vec<usize>)> = clusters
        .iter()
        .flat_map(|cluster| disambiguator.resolve(cluster, mentions))
        .filter(|(_, _, ids)| !ids.is_empty())
        .collect();
    for (_, _, ids) in &mut groups {
        ids.sort_unstable();
    }
    groups.sort_by_key(|(_, _, ids)| ids.first().copied().unwrap_or(usize::MAX));

    let mut result = Stage3Result::default();
    for (kind, resolution, mention_ids) in groups {
        let members: Vec<&Mention> = mention_ids.iter().filter_map(|id| mentions.get(*id)).collect();
        let Some(first) = members.first() else { continue };
        let id = result.entities.len();
        if resolution == Resolution::Default {
            result.unresolved.push(id);
        }
        result.entities.push(CanonicalEntity {
            id,
            kind,
            resolution,
            canonical: canonical_surface(&members),
            variants: members.iter().map(|m| m.surface.clone()).collect(),
            normalized: members
                .iter()
                .map(|m| cluster_key(&m.surface, rules))
                .collect::<BTreeSet<_>>(),
            first_span: first.span,
            mention_ids,
            code: None,
        });
    }

    info!(
        "Stage 3: {} clusters -> {} entities ({} unresolved)",
        clusters.len(),
        result.entities.len(),
        result.unresolved.len()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupData, LookupStore};
    use crate::models::{ProposedType, Provenance, Span, Utterance};
    use crate::stages::{Stage2Config, execute_stage2};

    fn setup(texts: &[&str], spans: &[(usize, &str, ProposedType)]) -> (Transcript, Vec<Mention>) {
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: texts
                .iter()
                .enumerate()
                .map(|(i, t)| Utterance {
                    index: i,
                    speaker: None,
                    text: t.to_string(),
                    timestamp: None,
                })
                .collect(),
        };
        let mentions = spans
            .iter()
            .enumerate()
            .map(|(id, (u, surface, proposed))| {
                let start = texts[*u].find(surface).unwrap();
                Mention {
                    id,
                    span: Span::text(*u, start, start + surface.len()),
                    surface: surface.to_string(),
                    proposed: *proposed,
                    provenance: vec![Provenance {
                        recognizer: "test".to_string(),
                        proposed: *proposed,
                        confidence: 0.7,
                    }],
                    confidence: 0.7,
                }
            })
            .collect();
        (transcript, mentions)
    }

    fn store() -> LookupStore {
        let data: LookupData = serde_json::from_str(
            r#"{
                "first_names": ["Pam"],
                "places": [{"name": "Bethel"}],
                "ambiguous": [
                    {"name": "Washington", "primarily_place": true},
                    {"name": "Jackson", "primarily_place": false, "context_patterns": ["Jackson said", "Jackson Hole"]}
                ]
            }"#,
        )
        .unwrap();
        LookupStore::from_data(data)
    }

    fn run(texts: &[&str], spans: &[(usize, &str, ProposedType)]) -> Stage3Result {
        run_with(store(), texts, spans)
    }

    fn run_with(
        lookup: LookupStore,
        texts: &[&str],
        spans: &[(usize, &str, ProposedType)],
    ) -> Stage3Result {
        let (transcript, mentions) = setup(texts, spans);
        let rules = RuleSet::builtin().unwrap();
        let clusters = execute_stage2(&mentions, &lookup, &rules, &Stage2Config::default()).clusters;
        execute_stage3(&transcript, &mentions, &clusters, &lookup, &rules, &Stage3Config::default())
    }

    use ProposedType::{Ambiguous, Location, Person};

    #[test]
    fn test_unanimous_keeps_type() {
        let result = run(&["I met Pam twice"], &[(0, "Pam", Person)]);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        assert_eq!(result.entities[0].resolution, Resolution::Unanimous);
    }

    #[test]
    fn test_homograph_split_person_and_place() {
        let result = run(
            &["We moved to the state of Washington last year", "Washington said it was fine"],
            &[(0, "Washington", Ambiguous), (1, "Washington", Ambiguous)],
        );
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].kind, EntityKind::Location);
        assert_eq!(result.entities[0].resolution, Resolution::Split);
        assert_eq!(result.entities[0].mention_ids, vec![0]);
        assert_eq!(result.entities[1].kind, EntityKind::Person);
        assert_eq!(result.entities[1].mention_ids, vec![1]);
    }

    #[test]
    fn test_context_cue_resolves_single_type() {
        let result = run(
            &["Dr. Washington came by", "we thanked Washington"],
            &[(0, "Washington", Ambiguous), (1, "Washington", Ambiguous)],
        );
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        assert_eq!(result.entities[0].resolution, Resolution::ContextCues);
    }

    #[test]
    fn test_prior_without_cues() {
        let result = run(&["Washington"], &[(0, "Washington", Ambiguous)]);
        assert_eq!(result.entities[0].kind, EntityKind::Location);
        assert_eq!(result.entities[0].resolution, Resolution::Prior);
    }

    #[test]
    fn test_lookup_context_pattern() {
        let result = run(&["and then Jackson said no"], &[(0, "Jackson", Ambiguous)]);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        let result = run(&["we drove Jackson Hole way"], &[(0, "Jackson", Ambiguous)]);
        assert_eq!(result.entities[0].kind, EntityKind::Location);
    }

    #[test]
    fn test_default_person_is_unresolved() {
        let result = run(&["Zorblax"], &[(0, "Zorblax", Ambiguous)]);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        assert_eq!(result.entities[0].resolution, Resolution::Default);
        assert_eq!(result.unresolved, vec![0]);
    }

    #[test]
    fn test_divergent_context_splits_without_homograph_entry() {
        let data: LookupData = serde_json::from_str(r#"{"last_names": ["Washington"]}"#).unwrap();
        let result = run_with(
            LookupStore::from_data(data),
            &["We moved to the state of Washington last year", "Washington said it was fine"],
            &[(0, "Washington", Ambiguous), (1, "Washington", Ambiguous)],
        );
        let kinds: Vec<(EntityKind, Resolution, Vec<usize>)> = result
            .entities
            .iter()
            .map(|e| (e.kind, e.resolution, e.mention_ids.clone()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (EntityKind::Location, Resolution::Split, vec![0]),
                (EntityKind::Person, Resolution::Split, vec![1]),
            ]
        );
    }

    #[test]
    fn test_one_sided_cue_against_proposals_uses_majority() {
        let result = run(
            &["we live in Kenai", "Kenai again", "Kenai too"],
            &[(0, "Kenai", Ambiguous), (1, "Kenai", Person), (2, "Kenai", Person)],
        );
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].kind, EntityKind::Person);
        assert_eq!(result.entities[0].resolution, Resolution::Majority);
    }

    #[test]
    fn test_entities_ordered_and_canonical() {
        let result = run(
            &["Pam and Bethel", "pam again, Pam"],
            &[(0, "Pam", Person), (0, "Bethel", Location), (1, "pam", Person), (1, "Pam", Person)],
        );
        assert_eq!(result.entities.len(), 2);
        assert_eq!(result.entities[0].canonical, "Pam");
        assert_eq!(result.entities[0].variants.len(), 2);
        assert_eq!(result.entities[1].kind, EntityKind::Location);
    }
}
