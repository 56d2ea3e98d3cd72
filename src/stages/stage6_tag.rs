use regex::Regex;
use tracing::{debug, info};

use crate::error::{DeidError, Result};
use crate::models::{CitationAddress, TagRecord, Transcript, UNCATEGORIZED};
use crate::rules::{RuleSet, compile_ci};

/// Bytes inspected on each side of an occurrence for exclusions and required context
pub const CONTEXT_WINDOW: usize = 30;

/// A broad phrase and the context that must surround it
#[derive(Debug)]
struct ContextualMatcher {
    phrase: Regex,
    requires: Vec<Regex>,
}

#[derive(Debug)]
struct MetricMatcher {
    regex: Regex,
    min_value: Option<f64>,
}

/// One category with every pattern compiled
#[derive(Debug)]
struct CompiledCategory {
    name: String,
    phrases: Option<Regex>,
    contextual: Vec<ContextualMatcher>,
    exclusions: Vec<Regex>,
    metrics: Vec<MetricMatcher>,
}

/// An occurrence that may satisfy a category
#[derive(Debug, Clone, Copy)]
struct Occurrence {
    start: usize,
    end: usize,
}

/// The research taxonomy compiled once and shared by every document
#[derive(Debug)]
pub struct Tagger {
    categories: Vec<CompiledCategory>,
}

/// Whole-word, case-insensitive alternation; words of a phrase are separated by any whitespace
fn phrase_regex(phrases: &[String], context: &str) -> Result<Option<Regex>> {
    let mut sorted: Vec<&String> = phrases.iter().filter(|p| !p.trim().is_empty()).collect();
    if sorted.is_empty() {
        return Ok(None);
    }
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let alternation = sorted
        .iter()
        .map(|p| {
            p.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect::<Vec<_>>()
        .join("|");
    compile_ci(&format!(r"\b(?:{alternation})\b"), context).map(Some)
}

impl Tagger {
    pub fn new(rules: &RuleSet) -> Result<Self> {
        let mut categories = Vec::new();
        for rule in &rules.categories {
            let mut contextual = Vec::new();
            for ctx in &rule.contextual {
                let phrase = phrase_regex(std::slice::from_ref(&ctx.phrase), &rule.name)?
                    .ok_or_else(|| {
                        DeidError::Rules(format!("empty contextual phrase in {}", rule.name))
                    })?;
                let requires = ctx
                    .requires
                    .iter()
                    .map(|r| compile_ci(r, &rule.name))
                    .collect::<Result<Vec<_>>>()?;
                contextual.push(ContextualMatcher { phrase, requires });
            }
            categories.push(CompiledCategory {
                name: rule.name.clone(),
                phrases: phrase_regex(&rule.phrases, &rule.name)?,
                contextual,
                exclusions: rule
                    .exclusions
                    .iter()
                    .map(|e| compile_ci(e, &rule.name))
                    .collect::<Result<Vec<_>>>()?,
                metrics: Vec::new(),
            });
        }

        for metric in &rules.metrics {
            let matcher = MetricMatcher {
                regex: compile_ci(&metric.pattern, &metric.category)?,
                min_value: metric.min_value,
            };
            match categories.iter_mut().find(|c| c.name == metric.category) {
                Some(category) => category.metrics.push(matcher),
                None => categories.push(CompiledCategory {
                    name: metric.category.clone(),
                    phrases: None,
                    contextual: Vec::new(),
                    exclusions: Vec::new(),
                    metrics: vec![matcher],
                }),
            }
        }

        Ok(Self { categories })
    }

    pub fn category_names(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(|c| c.name.as_str())
    }

    /// Every category the text belongs to, with the first occurrence that satisfied it
    pub fn tag_text<'t>(&self, text: &'t str) -> Vec<(&str, &'t str)> {
        self.categories
            .iter()
            .filter_map(|category| {
                first_match(category, text).map(|o| (category.name.as_str(), &text[o.start..o.end]))
            })
            .collect()
    }
}

fn first_match(category: &CompiledCategory, text: &str) -> Option<Occurrence> {
    let mut occurrences: Vec<Occurrence> = Vec::new();

    if let Some(phrases) = &category.phrases {
        occurrences.extend(phrases.find_iter(text).map(|m| Occurrence {
            start: m.start(),
            end: m.end(),
        }));
    }
    for ctx in &category.contextual {
        for m in ctx.phrase.find_iter(text) {
            let window = context_window(text, m.start(), m.end());
            let supported = ctx.requires.iter().any(|r| r.is_match(window));
            if supported {
                occurrences.push(Occurrence {
                    start: m.start(),
                    end: m.end(),
                });
            }
        }
    }
    for metric in &category.metrics {
        for caps in metric.regex.captures_iter(text) {
            let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(value) = metric_value(number.as_str(), caps.get(2).map(|m| m.as_str())) else {
                continue;
            };
            if metric.min_value.is_none_or(|min| value >= min) {
                occurrences.push(Occurrence {
                    start: whole.start(),
                    end: whole.end(),
                });
            }
        }
    }

    occurrences.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
    occurrences
        .into_iter()
        .find(|o| !is_excluded(category, text, *o))
}

/// True if an exclusion pattern, evaluated in the window around the occurrence, overlaps it
fn is_excluded(category: &CompiledCategory, text: &str, occurrence: Occurrence) -> bool {
    if category.exclusions.is_empty() {
        return false;
    }
    let start = floor_boundary(text, occurrence.start.saturating_sub(CONTEXT_WINDOW));
    let window = context_window(text, occurrence.start, occurrence.end);
    category.exclusions.iter().any(|exclusion| {
        exclusion.find_iter(window).any(|m| {
            let (m_start, m_end) = (start + m.start(), start + m.end());
            m_start < occurrence.end && occurrence.start < m_end
        })
    })
}

/// The occurrence plus up to `CONTEXT_WINDOW` bytes on each side, at char boundaries
fn context_window(text: &str, start: usize, end: usize) -> &str {
    let from = floor_boundary(text, start.saturating_sub(CONTEXT_WINDOW));
    let to = ceil_boundary(text, (end + CONTEXT_WINDOW).min(text.len()));
    &text[from..to]
}

fn floor_boundary(text: &str, mut i: usize) -> usize {
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, mut i: usize) -> usize {
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Parse "1,200" / "2.5" and apply a scale word
fn metric_value(number: &str, scale: Option<&str>) -> Option<f64> {
    let base: f64 = number.replace(',', "").parse().ok()?;
    let multiplier = match scale.map(str::to_lowercase).as_deref() {
        Some("thousand" | "k") => 1e3,
        Some("million" | "m") => 1e6,
        Some("billion") => 1e9,
        _ => 1.0,
    };
    Some(base * multiplier)
}

/// Result of Stage 6
#[derive(Debug, Clone, Default)]
pub struct Stage6Result {
    /// Records in utterance order, categories in taxonomy order within an utterance
    pub tags: Vec<TagRecord>,
    /// Utterances flagged for manual review
    pub uncategorized: usize,
}

/// Execute Stage 6: tag every utterance of the redacted transcript
pub fn execute_stage6(
    tagger: &Tagger,
    redacted: &Transcript,
    addresses: &[CitationAddress],
) -> Stage6Result {
    let mut result = Stage6Result::default();

    for (utterance, address) in redacted.utterances.iter().zip(addresses) {
        let matches = tagger.tag_text(&utterance.text);
        if matches.is_empty() {
            if utterance.text.trim().is_empty() {
                continue;
            }
            debug!("[{}] matched no category", address);
            result.uncategorized += 1;
            result.tags.push(TagRecord {
                utterance: utterance.index,
                address: *address,
                category: UNCATEGORIZED.to_string(),
                matched_phrase: String::new(),
            });
            continue;
        }
        for (category, phrase) in matches {
            result.tags.push(TagRecord {
                utterance: utterance.index,
                address: *address,
                category: category.to_string(),
                matched_phrase: phrase.to_string(),
            });
        }
    }

    info!(
        "Stage 6: {} tag records, {} utterances uncategorized",
        result.tags.len() - result.uncategorized,
        result.uncategorized
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagger() -> Tagger {
        Tagger::new(&RuleSet::builtin().unwrap()).unwrap()
    }

    fn categories(text: &str) -> Vec<(String, String)> {
        tagger()
            .tag_text(text)
            .into_iter()
            .map(|(c, p)| (c.to_string(), p.to_string()))
            .collect()
    }

    fn has(text: &str, category: &str) -> bool {
        categories(text).iter().any(|(c, _)| c == category)
    }

    #[test]
    fn test_whole_word_case_insensitive() {
        let found = categories("Our BOARD   MEMBERS met.");
        assert!(found.contains(&("Governance".to_string(), "BOARD   MEMBERS".to_string())));
        assert!(!has("the clipboard broke", "Governance"));
    }

    #[test]
    fn test_exclusion_only_removes_that_occurrence() {
        assert!(!has("there was no problem with that", "Risk"));
        assert!(!has("no problems at all", "Risk"));
        assert!(has("no problems at first, but later serious problems appeared", "Risk"));
    }

    #[test]
    fn test_contextual_phrase_needs_context() {
        assert!(!has("good job everyone", "Employment"));
        assert!(!has("that was a job", "Employment"));
        assert!(has("my job is to manage the warehouse", "Employment"));
        assert!(has("we had to solve a problem with the supplier", "Risk"));
        assert!(!has("we can't help it", "Q4_OutsideAssistance"));
        assert!(has("we need help with the grant", "Q4_OutsideAssistance"));
    }

    #[test]
    fn test_year_context() {
        assert!(!has("this year was slow", "Timeline"));
        assert!(has("the co-op, which began in 2015", "Timeline"));
        assert!(has("from 2012 it was a slow year", "Timeline"));
    }

    #[test]
    fn test_metric_thresholds() {
        assert!(has("we have 150 members now", "Metric_Members"));
        assert!(!has("just 1 member", "Metric_Members"));
        assert!(has("a $50,000 grant", "Metric_DollarAmount"));
        assert!(has("about $2 million", "Metric_DollarAmount"));
        assert!(!has("it cost $20", "Metric_DollarAmount"));
        assert!(has("nearly 3 million dollars", "Metric_DollarAmount"));
    }

    #[test]
    fn test_metric_value_scaling() {
        assert_eq!(metric_value("1,200", None), Some(1200.0));
        assert_eq!(metric_value("2.5", Some("k")), Some(2500.0));
        assert_eq!(metric_value("3", Some("Million")), Some(3e6));
        assert_eq!(metric_value("x", None), None);
    }

    #[test]
    fn test_uncategorized_and_one_record_per_category() {
        let transcript = Transcript {
            name: "t".to_string(),
            utterances: vec![
                crate::models::Utterance {
                    index: 0,
                    speaker: None,
                    text: "Members and more members joined.".to_string(),
                    timestamp: None,
                },
                crate::models::Utterance {
                    index: 1,
                    speaker: None,
                    text: "Okay.".to_string(),
                    timestamp: None,
                },
            ],
        };
        let addresses = vec![CitationAddress::new(0, 1), CitationAddress::new(0, 2)];
        let result = execute_stage6(&tagger(), &transcript, &addresses);
        let membership: Vec<&TagRecord> = result
            .tags
            .iter()
            .filter(|t| t.category == "Membership")
            .collect();
        assert_eq!(membership.len(), 1);
        assert_eq!(membership[0].matched_phrase, "Members");
        assert_eq!(result.uncategorized, 1);
        let last = result.tags.last().unwrap();
        assert!(last.is_uncategorized());
        assert_eq!(last.address.to_string(), "A.2");
    }
}
