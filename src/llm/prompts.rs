use std::ops::Range;

use crate::models::Transcript;

/// System prompt for the entity annotation pass
pub const SYSTEM_PROMPT: &str = r#"You are annotating an interview transcript for de-identification. You MUST follow these rules:

1. Report every mention of a real person's name, a place name, or an organization or tribal affiliation.
2. Copy the entity text EXACTLY as it appears in the utterance, including misspellings and case.
3. Report each distinct text once per utterance; repeated occurrences in the same utterance are found automatically.
4. Output MUST be valid JSON matching the provided schema.
5. If unsure whether a word is a name, report it with a low confidence rather than omitting it.

TYPES (use only these):
- person: an individual's first name, last name or full name
- location: a city, village, county, reservation, state, river or other place
- organization: a company, agency, council, cooperative, tribe or nation
- ambiguous: could be a person or a place and the utterance does not settle it

DO NOT REPORT:
- Product, platform or app names (Facebook, Zoom, Instagram)
- Months, weekdays, holidays
- Role words used as speaker labels (Interviewer, Speaker 2)
- Generic words that happen to be capitalized at the start of a sentence"#;

/// Build the user prompt for one batch of utterances
pub fn build_batch_prompt(transcript: &Transcript, batch_id: &str, range: Range<usize>) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("# Batch: {}\n", batch_id));
    prompt.push_str(&format!(
        "Utterances {} to {} of {}\n\n",
        range.start,
        range.end.saturating_sub(1),
        transcript.len()
    ));

    prompt.push_str("## Utterances\n");
    prompt.push_str("```json\n");
    for utterance in transcript
        .utterances
        .iter()
        .skip(range.start)
        .take(range.len())
    {
        let line = serde_json::json!({
            "index": utterance.index,
            "speaker": utterance.speaker,
            "text": utterance.text,
        });
        prompt.push_str(&line.to_string());
        prompt.push('\n');
    }
    prompt.push_str("```\n\n");

    prompt.push_str("Call submit_entities with every entity found in these utterances. ");
    prompt.push_str("Use the utterance index shown above for each entity.\n");
    prompt
}
