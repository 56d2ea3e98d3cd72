use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::audit::{AuditInput, AuditReport, audit_document};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::io::{MappingFile, SourceDocument};
use crate::lookup::LookupService;
use crate::models::{CanonicalEntity, EntityKind, Redaction, Transcript};
use crate::recognizers::{LexiconRecognizer, PatternRecognizer, Recognizer};
use crate::rules::RuleSet;
use crate::stages::{
    Stage0Result, Stage1Result, Stage5Result, Stage6Result, Tagger, build_mapping,
    execute_stage0, execute_stage1, execute_stage2, execute_stage3, execute_stage4,
    execute_stage5, execute_stage6,
};

/// Everything produced for one document, ready for export
#[derive(Debug, Clone)]
pub struct DocumentOutput {
    /// Segmented source transcript, never modified
    pub original: Transcript,
    /// Utterances dropped during segmentation
    pub skipped: usize,
    pub extraction: Stage1Result,
    pub entities: Vec<CanonicalEntity>,
    pub redactions: Vec<Redaction>,
    pub redacted: Transcript,
    pub citations: Stage5Result,
    pub tags: Stage6Result,
    pub mapping: MappingFile,
    pub audit: AuditReport,
}

/// Per-document counts for the batch summary
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStats {
    pub name: String,
    pub utterances: usize,
    pub skipped: usize,
    pub mentions: usize,
    pub ambiguous_mentions: usize,
    pub persons: usize,
    pub locations: usize,
    pub organizations: usize,
    pub redactions: usize,
    pub swept: usize,
    pub tag_records: usize,
    pub uncategorized: usize,
    pub unresolved: usize,
    pub audit_passed: bool,
}

impl DocumentOutput {
    pub fn stats(&self) -> DocumentStats {
        let count_kind = |kind| self.entities.iter().filter(|e| e.kind == kind).count();
        DocumentStats {
            name: self.original.name.clone(),
            utterances: self.original.len(),
            skipped: self.skipped,
            mentions: self.extraction.mentions.len(),
            ambiguous_mentions: self.extraction.ambiguous_count(),
            persons: count_kind(EntityKind::Person),
            locations: count_kind(EntityKind::Location),
            organizations: count_kind(EntityKind::Organization),
            redactions: self.redactions.len(),
            swept: self
                .redactions
                .iter()
                .filter(|r| r.method == crate::models::RedactionMethod::Sweep)
                .count(),
            tag_records: self.tags.tags.len() - self.tags.uncategorized,
            uncategorized: self.tags.uncategorized,
            unresolved: self.mapping.unresolved.len(),
            audit_passed: self.audit.passed(),
        }
    }
}

/// The de-identification pipeline for one document at a time.
///
/// Built once per process; recognizers, lookup data, rules and the compiled taxonomy are
/// immutable afterwards, so one `Arc<Pipeline>` can serve every worker.
pub struct Pipeline {
    recognizers: Vec<Arc<dyn Recognizer>>,
    lookup: Arc<dyn LookupService>,
    rules: Arc<RuleSet>,
    tagger: Tagger,
    config: PipelineConfig,
}

impl Pipeline {
    /// Build the pipeline with the pattern and lexicon recognizers
    pub fn new(
        rules: RuleSet,
        lookup: Arc<dyn LookupService>,
        config: PipelineConfig,
    ) -> Result<Self> {
        let rules = Arc::new(rules);
        let tagger = Tagger::new(&rules)?;
        let recognizers: Vec<Arc<dyn Recognizer>> = vec![
            Arc::new(PatternRecognizer::new(&rules)?),
            Arc::new(LexiconRecognizer::new(lookup.clone(), rules.clone())),
        ];
        Ok(Self {
            recognizers,
            lookup,
            rules,
            tagger,
            config,
        })
    }

    /// Add another member to the extraction ensemble
    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizers.push(recognizer);
        self
    }

    pub fn recognizer_ids(&self) -> Vec<&str> {
        self.recognizers.iter().map(|r| r.id()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn lookup(&self) -> &dyn LookupService {
        self.lookup.as_ref()
    }

    pub fn segment(&self, document: &SourceDocument) -> Result<Stage0Result> {
        execute_stage0(document, &self.config.segment)
    }

    /// Segment and run a source document
    pub fn process(
        &self,
        document: &SourceDocument,
        extra: &[Arc<dyn Recognizer>],
    ) -> Result<DocumentOutput> {
        let segmented = self.segment(document)?;
        let mut output = self.run(segmented.transcript, extra)?;
        output.skipped = segmented.skipped;
        Ok(output)
    }

    /// Run stages 1 through 6 on a segmented transcript and audit the result.
    ///
    /// `extra` recognizers join the ensemble for this document only (e.g. model annotations
    /// fetched for it).
    pub fn run(
        &self,
        transcript: Transcript,
        extra: &[Arc<dyn Recognizer>],
    ) -> Result<DocumentOutput> {
        info!("Processing {} ({} utterances)", transcript.name, transcript.len());

        let recognizers: Vec<Arc<dyn Recognizer>> =
            self.recognizers.iter().chain(extra).cloned().collect();
        debug!("Recognizers: {:?}", recognizers.iter().map(|r| r.id()).collect::<Vec<_>>());

        let lookup = self.lookup.as_ref();
        let rules = self.rules.as_ref();
        let config = &self.config;

        let extraction =
            execute_stage1(&transcript, &recognizers, lookup, rules, &config.extract);
        let clusters =
            execute_stage2(&extraction.mentions, lookup, rules, &config.cluster).clusters;
        let resolved = execute_stage3(
            &transcript,
            &extraction.mentions,
            &clusters,
            lookup,
            rules,
            &config.disambiguate,
        );
        let redaction =
            execute_stage4(&transcript, &extraction.mentions, resolved.entities, lookup, rules)?;
        let citations = execute_stage5(&transcript, &redaction.redacted, &config.cite);
        let tags = execute_stage6(&self.tagger, &redaction.redacted, &citations.addresses);

        let mapping = build_mapping(
            &transcript.name,
            &rules.version,
            &redaction.entities,
            &redaction.redactions,
            &citations.addresses,
            &resolved.unresolved,
        );
        let audit = audit_document(
            &AuditInput {
                original: &transcript,
                redacted: &redaction.redacted,
                entities: &redaction.entities,
                addresses: &citations.addresses,
                scheme: config.cite.scheme,
                tags: &tags.tags,
                mapping: &mapping,
            },
            lookup,
            rules,
        )?;

        Ok(DocumentOutput {
            original: transcript,
            skipped: 0,
            extraction,
            entities: redaction.entities,
            redactions: redaction.redactions,
            redacted: redaction.redacted,
            citations,
            tags,
            mapping,
            audit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupData, LookupStore};

    fn pipeline() -> Pipeline {
        let data: LookupData = serde_json::from_str(
            r#"{"first_names": ["Jodi", "Pam"], "places": [{"name": "Bethel", "subtype": "city"}]}"#,
        )
        .unwrap();
        Pipeline::new(
            RuleSet::builtin().unwrap(),
            Arc::new(LookupStore::from_data(data)),
            PipelineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_ensemble() {
        assert_eq!(pipeline().recognizer_ids(), vec!["pattern", "lexicon"]);
    }

    #[test]
    fn test_scenario_end_to_end() {
        let doc = SourceDocument::from_text(
            "interview",
            "Interviewer: My name is Jodi and I work with Pam in Bethel.\n",
        );
        let output = pipeline().process(&doc, &[]).unwrap();
        assert_eq!(
            output.redacted.utterances[0].text,
            "My name is Person_1 and I work with Person_2 in Location_1."
        );
        assert!(output.citations.rendered.contains("[A.1] My name is Person_1"));
        assert!(output.audit.passed(), "{:?}", output.audit);

        let stats = output.stats();
        assert_eq!(stats.persons, 2);
        assert_eq!(stats.locations, 1);
        assert_eq!(stats.utterances, 1);
    }
}
