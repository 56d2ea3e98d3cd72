use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::lookup::LookupService;
use crate::models::{EntityKind, Mention, ProposedType};
use crate::rules::RuleSet;
use crate::text::normalize_key;

/// Configuration for Stage 2 variant clustering
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct Stage2Config {
    /// Minimum similarity (0-1) for a mention to join an existing cluster
    pub similarity_threshold: f64,
}

impl Default for Stage2Config {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
        }
    }
}

/// Mentions believed to name one real-world entity, before type resolution
#[derive(Debug, Clone, PartialEq)]
pub struct MentionCluster {
    pub id: usize,
    /// Representative normalized form; upgraded to the full name when a partial name came first
    pub canonical_key: String,
    pub normalized: BTreeSet<String>,
    /// Non-ambiguous kinds proposed by member mentions
    pub kinds: BTreeSet<EntityKind>,
    /// True if any member mention was ambiguous
    pub has_ambiguous: bool,
    /// Member mention ids in transcript order
    pub mention_ids: Vec<usize>,
}

impl MentionCluster {
    fn new(id: usize, key: String, mention: &Mention) -> Self {
        let mut cluster = Self {
            id,
            canonical_key: key.clone(),
            normalized: BTreeSet::new(),
            kinds: BTreeSet::new(),
            has_ambiguous: false,
            mention_ids: Vec::new(),
        };
        cluster.add(key, mention);
        cluster
    }

    fn add(&mut self, key: String, mention: &Mention) {
        match mention.proposed.kind() {
            Some(kind) => {
                self.kinds.insert(kind);
            }
            None => self.has_ambiguous = true,
        }
        self.normalized.insert(key);
        self.mention_ids.push(mention.id);
    }

    /// An ambiguous mention fits anywhere; a typed one only next to its own type
    fn accepts(&self, proposed: ProposedType) -> bool {
        match proposed.kind() {
            None => true,
            Some(kind) => self.kinds.iter().all(|k| *k == kind),
        }
    }

    fn allows_partial_names(&self) -> bool {
        self.kinds.iter().all(|k| *k == EntityKind::Person)
    }
}

/// Result of Stage 2
#[derive(Debug, Clone, Default)]
pub struct Stage2Result {
    /// Clusters in order of first mention
    pub clusters: Vec<MentionCluster>,
}

/// Normalized comparison key of a surface string: normalization, misspelling
/// correction and possessive removal
pub fn cluster_key(surface: &str, rules: &RuleSet) -> String {
    let key = normalize_key(surface);
    let key = key.strip_suffix("'s").unwrap_or(&key);
    rules.correct(key)
}

/// How well `key` matches `cluster`. Returns the score and whether `key` is a fuller
/// form of the cluster's single-token canonical.
fn score(
    key: &str,
    proposed: ProposedType,
    cluster: &MentionCluster,
    lookup: &dyn LookupService,
) -> (f64, bool) {
    if cluster.normalized.contains(key) {
        return (1.0, false);
    }
    if cluster
        .normalized
        .iter()
        .any(|member| lookup.same_referent(key, member))
    {
        return (1.0, false);
    }

    let partial_ok = cluster.allows_partial_names()
        && matches!(proposed, ProposedType::Person | ProposedType::Ambiguous);
    if partial_ok {
        let key_tokens: Vec<&str> = key.split(' ').collect();
        let canon_tokens: Vec<&str> = cluster.canonical_key.split(' ').collect();
        let edge_match = |tokens: &[&str], single: &str| {
            tokens.first() == Some(&single) || tokens.last() == Some(&single)
        };
        if key_tokens.len() == 1 && canon_tokens.len() > 1 && edge_match(&canon_tokens, key) {
            return (1.0, false);
        }
        if key_tokens.len() > 1
            && canon_tokens.len() == 1
            && edge_match(&key_tokens, cluster.canonical_key.as_str())
        {
            return (1.0, true);
        }
    }

    (strsim::normalized_levenshtein(key, &cluster.canonical_key), false)
}

/// Execute Stage 2: group mention variants into clusters
pub fn execute_stage2(
    mentions: &[Mention],
    lookup: &dyn LookupService,
    rules: &RuleSet,
    config: &Stage2Config,
) -> Stage2Result {
    let mut clusters: Vec<MentionCluster> = Vec::new();

    for mention in mentions {
        let key = cluster_key(&mention.surface, rules);

        let scored: Vec<(usize, f64, bool)> = clusters
            .iter()
            .enumerate()
            .filter(|(_, c)| c.accepts(mention.proposed))
            .map(|(i, c)| {
                let (s, upgrade) = score(&key, mention.proposed, c, lookup);
                (i, s, upgrade)
            })
            .filter(|(_, s, _)| *s >= config.similarity_threshold)
            .collect();

        let best_score = scored.iter().map(|(_, s, _)| *s).fold(f64::MIN, f64::max);
        let best: Vec<&(usize, f64, bool)> =
            scored.iter().filter(|(_, s, _)| *s == best_score).collect();
        let most_seen = best
            .iter()
            .map(|(i, _, _)| clusters[*i].mention_ids.len())
            .max()
            .unwrap_or(0);
        let leaders: Vec<&&(usize, f64, bool)> = best
            .iter()
            .filter(|(i, _, _)| clusters[*i].mention_ids.len() == most_seen)
            .collect();

        match leaders.as_slice() {
            [(index, _, upgrade)] => {
                let cluster = &mut clusters[*index];
                if *upgrade {
                    debug!("Cluster {}: {:?} -> {:?}", cluster.id, cluster.canonical_key, key);
                    cluster.canonical_key = key.clone();
                }
                cluster.add(key, mention);
            }
            [] => {
                let id = clusters.len();
                clusters.push(MentionCluster::new(id, key, mention));
            }
            _ => {
                debug!(
                    "Mention {:?} ties between {} clusters; starting a new one",
                    mention.surface,
                    leaders.len()
                );
                let id = clusters.len();
                clusters.push(MentionCluster::new(id, key, mention));
            }
        }
    }

    info!(
        "Stage 2: {} mentions -> {} clusters",
        mentions.len(),
        clusters.len()
    );
    Stage2Result { clusters }
}
