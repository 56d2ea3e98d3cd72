pub mod store;

pub use store::*;

use serde::{Deserialize, Serialize};

use crate::models::EntityKind;

/// Which reading of a homograph is more common
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypePrior {
    Person,
    Place,
}

impl TypePrior {
    pub fn kind(self) -> EntityKind {
        match self {
            TypePrior::Person => EntityKind::Person,
            TypePrior::Place => EntityKind::Location,
        }
    }
}

/// Known place with its classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInfo {
    /// city, village, county, reservation, pueblo, state, river, ...
    pub subtype: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Tribe the place is affiliated with, for tribal places
    #[serde(default)]
    pub tribe: Option<String>,
}

/// A string that is both a common name and a place
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AmbiguityHint {
    pub prior: Option<TypePrior>,
    /// Literal phrases that indicate the place reading ("Washington State")
    pub place_patterns: Vec<String>,
    /// Literal phrases that indicate the person reading ("Jackson said")
    pub person_patterns: Vec<String>,
}

/// Everything the lookup store knows about one normalized string.
/// The default value means "unknown".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LookupEntry {
    pub first_name: bool,
    pub last_name: bool,
    /// Tribal nation or affiliation name
    pub tribal_name: bool,
    pub place: Option<PlaceInfo>,
    pub ambiguity: Option<AmbiguityHint>,
}

impl LookupEntry {
    pub fn is_known(&self) -> bool {
        self.is_name() || self.tribal_name || self.place.is_some() || self.ambiguity.is_some()
    }

    pub fn is_name(&self) -> bool {
        self.first_name || self.last_name
    }

    pub fn is_place(&self) -> bool {
        self.place.is_some()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguity.is_some() || (self.is_name() && self.is_place())
    }

    /// Type prior for the disambiguator; explicit hints win over list membership
    pub fn prior(&self) -> Option<TypePrior> {
        if let Some(prior) = self.ambiguity.as_ref().and_then(|a| a.prior) {
            return Some(prior);
        }
        match (self.is_name(), self.is_place()) {
            (true, false) => Some(TypePrior::Person),
            (false, true) => Some(TypePrior::Place),
            _ => None,
        }
    }
}

/// Read-only reference store of known names, places and tribal affiliations.
///
/// Implementations are shared across worker threads and must never fail:
/// a miss is reported as an unknown entry.
pub trait LookupService: Send + Sync {
    /// Look up a normalized key (see [`crate::text::normalize_key`])
    fn lookup(&self, key: &str) -> LookupEntry;

    /// True if the two normalized keys are registered aliases of one referent
    fn same_referent(&self, a: &str, b: &str) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_entry_is_unknown() {
        let entry = LookupEntry::default();
        assert!(!entry.is_known());
        assert_eq!(entry.prior(), None);
    }

    #[test]
    fn test_prior_from_membership() {
        let name = LookupEntry {
            first_name: true,
            ..Default::default()
        };
        assert_eq!(name.prior(), Some(TypePrior::Person));

        let place = LookupEntry {
            place: Some(PlaceInfo {
                subtype: "city".to_string(),
                region: Some("AK".to_string()),
                tribe: None,
            }),
            ..Default::default()
        };
        assert_eq!(place.prior(), Some(TypePrior::Place));

        let both = LookupEntry {
            last_name: true,
            ..place.clone()
        };
        assert!(both.is_ambiguous());
        assert_eq!(both.prior(), None);
    }

    #[test]
    fn test_explicit_prior_wins() {
        let entry = LookupEntry {
            last_name: true,
            ambiguity: Some(AmbiguityHint {
                prior: Some(TypePrior::Place),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(entry.prior(), Some(TypePrior::Place));
        assert_eq!(TypePrior::Place.kind(), EntityKind::Location);
    }
}
