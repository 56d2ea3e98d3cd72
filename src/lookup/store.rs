use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use super::{AmbiguityHint, LookupEntry, LookupService, PlaceInfo, TypePrior};
use crate::error::{DeidError, Result};
use crate::text::normalize_key;

const PATTERN_SPEECH_VERBS: &[&str] = &["said", "says", "asked", "told", "stated", "mentioned"];

/// On-disk layout of the reference data (JSON)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LookupData {
    pub version: Option<String>,
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
    pub tribal_names: Vec<String>,
    pub places: Vec<PlaceRecord>,
    pub ambiguous: Vec<AmbiguousRecord>,
    /// Groups of strings naming the same referent ("Pam", "Pamela")
    pub aliases: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceRecord {
    pub name: String,
    #[serde(default = "default_subtype")]
    pub subtype: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tribe: Option<String>,
}

fn default_subtype() -> String {
    "place".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AmbiguousRecord {
    pub name: String,
    #[serde(default)]
    pub primarily_place: Option<bool>,
    #[serde(default)]
    pub context_patterns: Vec<String>,
}

/// In-memory lookup store loaded once at startup and shared read-only
#[derive(Debug, Clone, Default)]
pub struct LookupStore {
    entries: HashMap<String, LookupEntry>,
    alias_groups: HashMap<String, usize>,
}

impl LookupStore {
    /// A store that knows nothing; every lookup is unknown
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeidError::io(path, e))?;
        let data: LookupData = serde_json::from_str(&content).map_err(|source| DeidError::Json {
            context: path.display().to_string(),
            source,
        })?;
        let store = Self::from_data(data);
        info!(
            "Loaded lookup store from {:?}: {} keys, {} alias keys",
            path,
            store.entries.len(),
            store.alias_groups.len()
        );
        Ok(store)
    }

    /// Open the store, or fall back to an empty one when it cannot be read
    pub fn open_or_empty(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                warn!("Lookup store unavailable ({}); all lookups will be unknown", e);
                Self::empty()
            }
        }
    }

    pub fn from_data(data: LookupData) -> Self {
        let mut store = Self::default();

        for name in &data.first_names {
            store.entry(name).first_name = true;
        }
        for name in &data.last_names {
            store.entry(name).last_name = true;
        }
        for name in &data.tribal_names {
            store.entry(name).tribal_name = true;
        }
        for place in data.places {
            store.entry(&place.name).place = Some(PlaceInfo {
                subtype: place.subtype,
                region: place.region,
                tribe: place.tribe,
            });
        }
        for record in data.ambiguous {
            let key = normalize_key(&record.name);
            let hint = classify_patterns(&key, &record);
            let entry = store.entry(&record.name);
            match entry.ambiguity.as_mut() {
                // duplicate rows in the source data: keep the first prior, merge patterns
                Some(existing) => {
                    existing.place_patterns.extend(hint.place_patterns);
                    existing.person_patterns.extend(hint.person_patterns);
                }
                None => entry.ambiguity = Some(hint),
            }
        }
        for (group, names) in data.aliases.iter().enumerate() {
            for name in names {
                let key = normalize_key(name);
                if !key.is_empty() {
                    store.alias_groups.insert(key, group);
                }
            }
        }
        store
    }

    fn entry(&mut self, name: &str) -> &mut LookupEntry {
        self.entries.entry(normalize_key(name)).or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sort context patterns into place and person readings.
///
/// A pattern reads as a person when the name is followed by a speech verb or preceded
/// by another capitalized word ("John Adams"); otherwise as a place ("Madison County").
fn classify_patterns(key: &str, record: &AmbiguousRecord) -> AmbiguityHint {
    let mut hint = AmbiguityHint {
        prior: record.primarily_place.map(|place| {
            if place {
                TypePrior::Place
            } else {
                TypePrior::Person
            }
        }),
        ..Default::default()
    };

    for pattern in &record.context_patterns {
        let words: Vec<&str> = pattern.split_whitespace().collect();
        let position = words
            .iter()
            .position(|w| normalize_key(w) == key);
        let is_person = match position {
            Some(i) => {
                let next_is_verb = words
                    .get(i + 1)
                    .is_some_and(|w| PATTERN_SPEECH_VERBS.contains(&normalize_key(w).as_str()));
                let prev_is_name = i > 0
                    && words[i - 1].chars().next().is_some_and(char::is_uppercase)
                    && !words[i - 1].ends_with(',');
                next_is_verb || (prev_is_name && i + 1 == words.len())
            }
            None => false,
        };
        if is_person {
            hint.person_patterns.push(pattern.clone());
        } else {
            hint.place_patterns.push(pattern.clone());
        }
    }
    hint
}

impl LookupService for LookupStore {
    fn lookup(&self, key: &str) -> LookupEntry {
        self.entries.get(key).cloned().unwrap_or_default()
    }

    fn same_referent(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        match (self.alias_groups.get(a), self.alias_groups.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }
}
