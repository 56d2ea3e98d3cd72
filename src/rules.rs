use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{DeidError, Result};
use crate::text::normalize_key;

const BUILTIN_RULES: &str = include_str!("../rules/default.toml");

/// Vocabulary the extractor must never treat as an identifying entity
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    /// Product/platform/topic names; also rejected when they appear as one token of a longer span
    pub false_positives: BTreeSet<String>,
    pub calendar_words: BTreeSet<String>,
    /// Speaker labels naming a role ("Interviewer"), not a person
    pub role_labels: BTreeSet<String>,
    pub non_entity_words: BTreeSet<String>,
}

/// Context cues shared by the recognizers and the disambiguator
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CueRules {
    pub speech_verbs: Vec<String>,
    pub person_cue_verbs: Vec<String>,
    pub honorifics: Vec<String>,
    pub greetings: Vec<String>,
    pub location_prepositions: Vec<String>,
    pub place_suffixes: Vec<String>,
    pub tribal_suffixes: Vec<String>,
    pub organization_suffixes: Vec<String>,
    pub geographic_determiners: Vec<String>,
}

/// A broad phrase that only counts with supporting context
#[derive(Debug, Clone, Deserialize)]
pub struct ContextualPhrase {
    pub phrase: String,
    pub requires: Vec<String>,
}

/// One category of the research taxonomy
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub name: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default)]
    pub contextual: Vec<ContextualPhrase>,
}

/// A numeric mention that is significant at or above `min_value`
#[derive(Debug, Clone, Deserialize)]
pub struct MetricRule {
    pub category: String,
    pub pattern: String,
    #[serde(default)]
    pub min_value: Option<f64>,
}

/// Versioned declarative rule table: stoplists, cues, corrections and the tagging taxonomy
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    pub version: String,
    #[serde(default)]
    pub extraction: ExtractionRules,
    /// Normalized misspelling -> normalized correct form
    #[serde(default)]
    pub corrections: BTreeMap<String, String>,
    #[serde(default)]
    pub cues: CueRules,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    #[serde(default)]
    pub metrics: Vec<MetricRule>,
    /// Normalized taxonomy phrases, derived at load
    #[serde(skip)]
    vocabulary: BTreeSet<String>,
}

impl RuleSet {
    /// The rule table compiled into the binary
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_RULES, "built-in rules")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DeidError::io(path, e))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    pub fn from_toml_str(content: &str, context: &str) -> Result<Self> {
        let mut rules: RuleSet = toml::from_str(content).map_err(|source| DeidError::Toml {
            context: context.to_string(),
            source,
        })?;
        rules.prepare()?;
        Ok(rules)
    }

    /// Normalize keys and validate every pattern once at load time
    fn prepare(&mut self) -> Result<()> {
        let norm_set = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter().map(|s| normalize_key(s)).filter(|s| !s.is_empty()).collect()
        };
        self.extraction.false_positives = norm_set(&self.extraction.false_positives);
        self.extraction.calendar_words = norm_set(&self.extraction.calendar_words);
        self.extraction.role_labels = norm_set(&self.extraction.role_labels);
        self.extraction.non_entity_words = norm_set(&self.extraction.non_entity_words);

        self.corrections = self
            .corrections
            .iter()
            .map(|(k, v)| (normalize_key(k), normalize_key(v)))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty() && k != v)
            .collect();

        let mut seen = BTreeSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(DeidError::Rules("category with empty name".to_string()));
            }
            if !seen.insert(category.name.as_str()) {
                return Err(DeidError::Rules(format!(
                    "duplicate category: {}",
                    category.name
                )));
            }
            for pattern in &category.exclusions {
                compile_ci(pattern, &category.name)?;
            }
            for ctx in &category.contextual {
                for pattern in &ctx.requires {
                    compile_ci(pattern, &category.name)?;
                }
            }
        }
        for metric in &self.metrics {
            let re = compile_ci(&metric.pattern, &metric.category)?;
            if re.captures_len() < 2 {
                return Err(DeidError::Rules(format!(
                    "metric pattern for {} needs a numeric capture group",
                    metric.category
                )));
            }
        }

        self.vocabulary = self
            .categories
            .iter()
            .flat_map(|c| {
                c.phrases
                    .iter()
                    .chain(c.contextual.iter().map(|p| &p.phrase))
            })
            .map(|p| normalize_key(p))
            .collect();
        Ok(())
    }

    /// Apply the correction table: whole string first, then token by token
    pub fn correct(&self, key: &str) -> String {
        if let Some(fixed) = self.corrections.get(key) {
            return fixed.clone();
        }
        key.split(' ')
            .map(|token| {
                self.corrections
                    .get(token)
                    .map(String::as_str)
                    .unwrap_or(token)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Known misspellings that correct to `key` (whole-string entries only)
    pub fn misspellings_of(&self, key: &str) -> Vec<&str> {
        self.corrections
            .iter()
            .filter(|(_, fixed)| fixed.as_str() == key)
            .map(|(wrong, _)| wrong.as_str())
            .collect()
    }

    pub fn is_role_label(&self, key: &str) -> bool {
        let key = key.trim_end_matches(|c: char| c.is_ascii_digit()).trim();
        self.extraction.role_labels.contains(key)
    }

    pub fn is_taxonomy_phrase(&self, key: &str) -> bool {
        self.vocabulary.contains(key)
    }

    /// Never an identifying entity, whatever the recognizers say
    pub fn is_false_positive(&self, key: &str) -> bool {
        if key.is_empty() || !key.chars().any(char::is_alphabetic) {
            return true;
        }
        let ex = &self.extraction;
        if ex.false_positives.contains(key)
            || ex.calendar_words.contains(key)
            || ex.non_entity_words.contains(key)
            || self.is_role_label(key)
            || self.is_taxonomy_phrase(key)
        {
            return true;
        }
        key.split(' ').any(|token| ex.false_positives.contains(token))
    }
}

/// Compile a case-insensitive rule pattern
pub fn compile_ci(pattern: &str, context: &str) -> Result<Regex> {
    Regex::new(&format!("(?i){pattern}")).map_err(|e| DeidError::pattern(context, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_rules_load() {
        let rules = RuleSet::builtin().unwrap();
        assert!(!rules.version.is_empty());
        assert!(rules.categories.iter().any(|c| c.name == "Finance"));
        assert!(rules.categories.iter().any(|c| c.name == "Q4_OutsideAssistance"));
        assert!(!rules.metrics.is_empty());
        assert!(rules.cues.person_cue_verbs.contains(&"said".to_string()));
    }

    #[test]
    fn test_corrections_whole_then_token() {
        let rules = RuleSet::builtin().unwrap();
        assert_eq!(rules.correct("jody brochure"), "jodi burshia");
        assert_eq!(rules.correct("jody smith"), "jodi smith");
        assert_eq!(rules.correct("ho-chump"), "ho-chunk");
        assert_eq!(rules.correct("pam"), "pam");
    }

    #[test]
    fn test_misspellings_of() {
        let rules = RuleSet::builtin().unwrap();
        let wrong = rules.misspellings_of("jodi burshia");
        assert!(wrong.contains(&"jody brochure"));
        assert!(wrong.contains(&"jody burche"));
    }

    #[test]
    fn test_false_positive_filter() {
        let rules = RuleSet::builtin().unwrap();
        assert!(rules.is_false_positive("instagram"));
        assert!(rules.is_false_positive("facebook messenger"));
        assert!(rules.is_false_positive("instagram page"));
        assert!(rules.is_false_positive("january"));
        assert!(rules.is_false_positive("00:57:34"));
        assert!(rules.is_false_positive("interviewer"));
        assert!(rules.is_false_positive("speaker 2"));
        assert!(rules.is_false_positive("governance"));
        assert!(!rules.is_false_positive("jodi"));
        assert!(!rules.is_false_positive("bethel"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let toml = r#"
            version = "test"
            [[categories]]
            name = "Broken"
            phrases = ["x"]
            exclusions = ["(unclosed"]
        "#;
        let err = RuleSet::from_toml_str(toml, "inline").unwrap_err();
        assert!(matches!(err, DeidError::Pattern { .. }));
    }

    #[test]
    fn test_duplicate_category_rejected() {
        let toml = r#"
            version = "test"
            [[categories]]
            name = "A"
            [[categories]]
            name = "A"
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(toml, "inline"),
            Err(DeidError::Rules(_))
        ));
    }

    #[test]
    fn test_metric_requires_capture_group() {
        let toml = r#"
            version = "test"
            [[metrics]]
            category = "Metric_X"
            pattern = '\d+ widgets'
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(toml, "inline"),
            Err(DeidError::Rules(_))
        ));
    }
}
