//! Classification contract: prompt construction and strict response parsing

use serde::Deserialize;

use crate::database::AgeRating;
use crate::error::{PipelineError, Result};

pub const SYSTEM_PROMPT: &str =
    "You rate video transcripts for a children's viewing app. Respond with one JSON object and nothing else.";

const INSTRUCTIONS: &str = r#"Strict JSON ONLY:
{ "safe": bool, "loud": 0-10, "age": "all|7+|13+", "junk": 0-10, "reason": str }
Rules: Analyze if this transcript is safe for children. Assess:
- safe: Is it appropriate for children (no violence, profanity, adult themes)?
- loud: How loud/energetic is the content (0=calm, 10=extremely hyper)?
- age: Minimum appropriate age category (all, 7+, 13+)
- junk: How low-quality is the content (0=educational, 10=pure entertainment junk)
- reason: Brief explanation of your rating"#;

/// The five fields the classifier must return, exactly.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawVerdict {
    pub safe: bool,
    pub loud: u8,
    pub age: AgeRating,
    pub junk: u8,
    pub reason: String,
}

/// First `cap` characters of `text`. Never splits a UTF-8 sequence.
pub fn truncate_chars(text: &str, cap: usize) -> &str {
    match text.char_indices().nth(cap) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(transcript: &str, char_cap: usize) -> String {
    format!(
        "{}\n\nTranscript:\n{}",
        INSTRUCTIONS,
        truncate_chars(transcript, char_cap)
    )
}

/// The JSON text of a response: either the whole (trimmed) body, or the
/// contents of a single ```json fenced block.
fn json_payload(response: &str) -> Option<&str> {
    let trimmed = response.trim();
    if trimmed.starts_with('{') {
        return Some(trimmed);
    }

    let start = trimmed.find("```json")?;
    let after_marker = &trimmed[start + "```json".len()..];
    let end = after_marker.find("```")?;
    let rest = &after_marker[end + 3..];
    if rest.contains("```") {
        // More than one fenced block is ambiguous
        return None;
    }
    Some(after_marker[..end].trim())
}

/// Parse a classifier response into the verdict shape. Anything that is not
/// exactly the five fields with in-range values is rejected.
pub fn parse_verdict(response: &str) -> Result<RawVerdict> {
    let payload = json_payload(response).ok_or_else(|| {
        PipelineError::MalformedResponse(format!(
            "no JSON object in classifier response: {:?}",
            response.chars().take(120).collect::<String>()
        ))
    })?;

    let verdict: RawVerdict = serde_json::from_str(payload)
        .map_err(|e| PipelineError::MalformedResponse(format!("verdict shape: {}", e)))?;

    if verdict.loud > 10 {
        return Err(PipelineError::MalformedResponse(format!(
            "loud out of range: {}",
            verdict.loud
        )));
    }
    if verdict.junk > 10 {
        return Err(PipelineError::MalformedResponse(format!(
            "junk out of range: {}",
            verdict.junk
        )));
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str =
        r#"{"safe": true, "loud": 2, "age": "all", "junk": 1, "reason": "gentle nursery rhyme"}"#;

    #[test]
    fn test_parse_bare_json() {
        let verdict = parse_verdict(GOOD).unwrap();
        assert!(verdict.safe);
        assert_eq!(verdict.loud, 2);
        assert_eq!(verdict.age, AgeRating::All);
        assert_eq!(verdict.junk, 1);
        assert_eq!(verdict.reason, "gentle nursery rhyme");
    }

    #[test]
    fn test_parse_fenced_json() {
        let response = format!("Here is my rating:\n```json\n{}\n```\n", GOOD);
        assert!(parse_verdict(&response).is_ok());
    }

    #[test]
    fn test_rejects_non_json() {
        let err = parse_verdict("I think this video is fine for kids.").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn test_rejects_missing_field() {
        let response = r#"{"safe": true, "loud": 2, "age": "all", "junk": 1}"#;
        assert!(parse_verdict(response).is_err());
    }

    #[test]
    fn test_rejects_extra_field() {
        let response =
            r#"{"safe": true, "loud": 2, "age": "all", "junk": 1, "reason": "ok", "score": 9}"#;
        assert!(parse_verdict(response).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_and_wrong_types() {
        for response in [
            r#"{"safe": true, "loud": 11, "age": "all", "junk": 1, "reason": "x"}"#,
            r#"{"safe": true, "loud": 2, "age": "all", "junk": -1, "reason": "x"}"#,
            r#"{"safe": true, "loud": 2.5, "age": "all", "junk": 1, "reason": "x"}"#,
            r#"{"safe": "yes", "loud": 2, "age": "all", "junk": 1, "reason": "x"}"#,
            r#"{"safe": true, "loud": 2, "age": "18+", "junk": 1, "reason": "x"}"#,
            r#"{"safe": true, "loud": 2, "age": "all", "junk": 1, "reason": null}"#,
        ] {
            assert!(parse_verdict(response).is_err(), "{}", response);
        }
    }

    #[test]
    fn test_rejects_two_fenced_blocks() {
        let response = format!("```json\n{}\n```\nor maybe\n```json\n{}\n```", GOOD, GOOD);
        assert!(parse_verdict(&response).is_err());
    }

    #[test]
    fn test_truncate_keeps_head() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        // Multi-byte characters are counted, not bytes
        assert_eq!(truncate_chars("héllo wörld", 7), "héllo w");
        assert_eq!(truncate_chars("🎵🎵🎵", 2), "🎵🎵");
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let transcript = "a".repeat(20_000);
        let first = build_prompt(&transcript, 12_000);
        let second = build_prompt(&transcript, 12_000);
        assert_eq!(first, second);
        assert!(first.starts_with("Strict JSON ONLY:"));
        assert!(first.ends_with(&"a".repeat(12_000)));
        assert!(!first.ends_with(&"a".repeat(12_001)));
    }
}
