use std::sync::Arc;

use deidentify::io::SourceFormat;
use deidentify::lookup::LookupData;
use deidentify::models::{EntityKind, Resolution};
use deidentify::stages::execute_stage7;
use deidentify::{
    CitationScheme, LookupStore, MappingFile, Pipeline, PipelineConfig, RuleSet, SourceDocument,
};

fn sample_lookup() -> Arc<LookupStore> {
    let data: LookupData =
        serde_json::from_str(include_str!("../data/lookup.sample.json")).unwrap();
    Arc::new(LookupStore::from_data(data))
}

fn pipeline_with(config: PipelineConfig) -> Pipeline {
    Pipeline::new(RuleSet::builtin().unwrap(), sample_lookup(), config).unwrap()
}

fn pipeline() -> Pipeline {
    pipeline_with(PipelineConfig::default())
}

#[test]
fn test_scenario_writes_all_outputs() {
    let doc = SourceDocument::from_text(
        "int01",
        "Interviewer: Tell me about yourself.\n\
         Participant: My name is Jodi and I work with Pam in Bethel.\n",
    );
    let output = pipeline().process(&doc, &[]).unwrap();
    assert_eq!(
        output.redacted.utterances[1].text,
        "My name is Person_1 and I work with Person_2 in Location_1."
    );
    assert!(output.audit.passed(), "{:?}", output.audit);

    let dir = tempfile::tempdir().unwrap();
    let files = execute_stage7(&output, dir.path()).unwrap().files;

    let text = std::fs::read_to_string(&files.text).unwrap();
    assert!(text.starts_with("Page 1\n\n[A.1] Tell me about yourself.\n"));
    assert!(text.contains("[B.1] My name is Person_1 and I work with Person_2 in Location_1.\n"));

    let mapping = MappingFile::read_json(&files.mapping).unwrap();
    assert_eq!(mapping.source, "int01");
    let summary: Vec<(String, EntityKind, String)> = mapping
        .entities
        .iter()
        .map(|e| (e.code.to_string(), e.kind, e.canonical.clone()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Person_1".to_string(), EntityKind::Person, "Jodi".to_string()),
            ("Person_2".to_string(), EntityKind::Person, "Pam".to_string()),
            ("Location_1".to_string(), EntityKind::Location, "Bethel".to_string()),
        ]
    );
    let jodi = &mapping.entities[0].spans[0];
    assert_eq!(jodi.address.to_string(), "B.1");
    assert_eq!(&output.original.utterances[1].text[jodi.start..jodi.end], "Jodi");

    let tags = std::fs::read_to_string(&files.tags).unwrap();
    assert!(tags.starts_with("address,category,matched_phrase\n"));
    let citations = std::fs::read_to_string(&files.citations).unwrap();
    assert_eq!(
        citations,
        "address,timestamp,speaker\nA.1,,Interviewer\nB.1,,Participant\n"
    );
}

#[test]
fn test_homograph_becomes_two_entities() {
    let doc = SourceDocument::from_text(
        "int02",
        "We moved to the state of Washington last year.\nWashington said it was fine.\n",
    );
    let output = pipeline().process(&doc, &[]).unwrap();
    let kinds: Vec<(EntityKind, Resolution)> =
        output.entities.iter().map(|e| (e.kind, e.resolution)).collect();
    assert_eq!(
        kinds,
        vec![
            (EntityKind::Location, Resolution::Split),
            (EntityKind::Person, Resolution::Split)
        ]
    );
    assert!(output.redacted.utterances[0].text.contains("state of Location_1"));
    assert!(output.redacted.utterances[1].text.starts_with("Person_1 said"));
}

#[test]
fn test_context_split_with_surname_only_lookup() {
    let data: LookupData = serde_json::from_str(r#"{"last_names": ["Washington"]}"#).unwrap();
    let pipeline = Pipeline::new(
        RuleSet::builtin().unwrap(),
        Arc::new(LookupStore::from_data(data)),
        PipelineConfig::default(),
    )
    .unwrap();
    let doc = SourceDocument::from_text(
        "int07",
        "We moved to the state of Washington last year.\nWashington said it was fine.\n",
    );
    let output = pipeline.process(&doc, &[]).unwrap();
    assert_eq!(
        output.redacted.utterances[0].text,
        "We moved to the state of Location_1 last year."
    );
    assert_eq!(output.redacted.utterances[1].text, "Person_1 said it was fine.");
    assert!(output.audit.leaks.is_empty(), "{:?}", output.audit.leaks);
}

#[test]
fn test_given_name_before_honorific_surname_is_redacted() {
    let doc = SourceDocument::from_text(
        "int08",
        "I work with Zorvath Quillby every spring.\nMr. Quillby agreed with that.\n",
    );
    let output = pipeline().process(&doc, &[]).unwrap();
    assert_eq!(output.redacted.utterances[0].text, "I work with Person_1 every spring.");
    assert_eq!(output.redacted.utterances[1].text, "Mr. Person_1 agreed with that.");
    assert!(output.audit.leaks.is_empty(), "{:?}", output.audit.leaks);
}

#[test]
fn test_citation_schemes_end_to_end() {
    let content = "Speaker 1: one\nSpeaker 1: two\nSpeaker 2: three\nSpeaker 1: four\n";
    let doc = SourceDocument::from_text("int03", content);

    let identity = pipeline().process(&doc, &[]).unwrap();
    let addresses: Vec<String> = identity
        .citations
        .addresses
        .iter()
        .map(|a| a.to_string())
        .collect();
    assert_eq!(addresses, vec!["A.1", "A.2", "B.1", "A.3"]);
    assert!(identity.citations.rendered.contains("[A.3] four\n"));
    assert!(identity.audit.citation_errors.is_empty());

    let mut config = PipelineConfig::default();
    config.cite.scheme = CitationScheme::ContiguousRun;
    let contiguous = pipeline_with(config).process(&doc, &[]).unwrap();
    let addresses: Vec<String> = contiguous
        .citations
        .addresses
        .iter()
        .map(|a| a.to_string())
        .collect();
    assert_eq!(addresses, vec!["A.1", "A.2", "B.1", "C.1"]);
    assert!(contiguous.audit.citation_errors.is_empty());
}

#[test]
fn test_bracketed_timestamp_transcript() {
    let doc = SourceDocument::from_text(
        "int06",
        "[00:00:03] Anna: I met Jodi there.\n[00:00:09] Barry: ok\n",
    );
    assert_ne!(doc.format, SourceFormat::Structured);

    let output = pipeline().process(&doc, &[]).unwrap();
    assert_eq!(output.original.len(), 2);
    assert_eq!(output.original.utterances[0].speaker.as_deref(), Some("Anna"));
    let first = &output.redacted.utterances[0].text;
    assert!(first.starts_with("I met Person_") && !first.contains("Jodi"), "{first}");
    let b1 = output.citations.addresses[1];
    assert_eq!(b1.to_string(), "B.1");
    assert_eq!(output.citations.index.timestamp(&b1).unwrap().to_string(), "00:00:09");
}

#[test]
fn test_vtt_timestamps_reach_citation_index() {
    let vtt = "WEBVTT\n\n\
               1\n00:00:01.000 --> 00:00:04.000\n<v Jodi Burshia>We started the co-op in Bethel.\n\n\
               2\n00:00:05.500 --> 00:00:07.000\n<v Interviewer>When was that?\n";
    let doc = SourceDocument::from_text("int04", vtt);
    assert_eq!(doc.format, SourceFormat::WebVtt);

    let output = pipeline().process(&doc, &[]).unwrap();
    assert_eq!(output.original.len(), 2);
    assert_eq!(
        output.redacted.utterances[0].speaker.as_deref(),
        Some("Person_1")
    );
    assert!(!output.redacted.utterances[0].text.contains("Bethel"));

    let a1 = output.citations.addresses[0];
    assert_eq!(output.citations.index.timestamp(&a1).unwrap().to_string(), "00:00:01");
    let b1 = output.citations.addresses[1];
    assert_eq!(output.citations.index.timestamp(&b1).unwrap().to_string(), "00:00:05");
}

#[test]
fn test_rerun_is_identical() {
    let doc = SourceDocument::from_text(
        "int05",
        "Jodi Burshia: I grew up in Bethel with Pam.\n\
         Interviewer: And jody, how did the board start?\n\
         Jodi Burshia: Pamela and Sam Andrews helped us get the grant.\n",
    );
    let pipeline = pipeline();
    let first = pipeline.process(&doc, &[]).unwrap();
    let second = pipeline.process(&doc, &[]).unwrap();

    assert_eq!(
        serde_json::to_string(&first.mapping).unwrap(),
        serde_json::to_string(&second.mapping).unwrap()
    );
    assert_eq!(first.citations.rendered, second.citations.rendered);
    assert_eq!(first.citations.addresses, second.citations.addresses);
    assert!(first.audit.leaks.is_empty(), "{:?}", first.audit.leaks);
    assert!(!first.redacted.utterances[1].text.to_lowercase().contains("jody"));
}
