//! Classification request and model-answer parsing.
//!
//! The request carries the bibliographic metadata plus the candidate
//! subject paths. The answer must be a JSON object with at least
//! `subject_name` and `confidence`; models wrap JSON in prose or code
//! fences often enough that both are unwrapped before parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MalformedResponse;
use crate::models::Metadata;

/// Longest abstract sent to the model, in characters.
const PROMPT_ABSTRACT_CHARS: usize = 2000;

pub const SYSTEM_PROMPT: &str = "You classify academic papers into a subject taxonomy. \
Pick the single best subject from the candidate list. If none fits, answer with a short \
new subject name. Reply with one JSON object only: \
{\"subject_name\": string, \"confidence\": number between 0 and 1, \
\"sub_field\": string, \"paper_type\": string, \"summary\": string}.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifyRequest {
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub candidate_subjects: Vec<String>,
}

impl ClassifyRequest {
    pub fn new(metadata: &Metadata, candidate_subjects: Vec<String>) -> Self {
        Self {
            title: metadata.title.clone(),
            authors: metadata.authors.clone(),
            abstract_text: metadata
                .abstract_text
                .chars()
                .take(PROMPT_ABSTRACT_CHARS)
                .collect(),
            keywords: metadata.keywords.clone(),
            candidate_subjects,
        }
    }

    /// User-message body sent alongside [`SYSTEM_PROMPT`].
    pub fn to_prompt(&self) -> String {
        let payload = serde_json::to_string_pretty(self).unwrap_or_default();
        format!("Classify this paper.\n\n{}", payload)
    }
}

/// Parsed model answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAnswer {
    pub subject_name: String,
    pub confidence: f64,
    pub sub_field: Option<String>,
    pub paper_type: Option<String>,
    pub summary: Option<String>,
}

/// Parses a raw model reply.
///
/// Tries, in order: the whole reply, the first fenced code block, and the
/// span from the first `{` to the last `}`.
pub fn parse_answer(raw: &str) -> Result<ModelAnswer, MalformedResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(MalformedResponse::new("empty reply"));
    }

    let mut candidates: Vec<&str> = vec![trimmed];
    if let Some(block) = fenced_block(trimmed) {
        candidates.push(block);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            candidates.push(&trimmed[start..=end]);
        }
    }

    let mut last_reason = "reply is not JSON".to_string();
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => return answer_from_object(&map),
            Ok(_) => last_reason = "reply is JSON but not an object".to_string(),
            Err(_) => {}
        }
    }
    Err(MalformedResponse::new(last_reason))
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip an info string such as `json`.
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn answer_from_object(map: &Map<String, Value>) -> Result<ModelAnswer, MalformedResponse> {
    let subject_name = ["subject_name", "subject", "discipline"]
        .iter()
        .find_map(|k| non_empty_string(map.get(*k)))
        .ok_or_else(|| MalformedResponse::new("missing subject_name"))?;

    let confidence = match map.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| MalformedResponse::new("missing or non-numeric confidence"))?;

    if !confidence.is_finite() || confidence < 0.0 {
        return Err(MalformedResponse::new(format!(
            "confidence out of range: {}",
            confidence
        )));
    }

    Ok(ModelAnswer {
        subject_name,
        confidence: confidence.min(1.0),
        sub_field: non_empty_string(map.get("sub_field")),
        paper_type: non_empty_string(map.get("paper_type")),
        summary: non_empty_string(map.get("summary")),
    })
}

fn non_empty_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_json() {
        let a = parse_answer(r#"{"subject_name": "Machine Learning", "confidence": 0.91}"#)
            .unwrap();
        assert_eq!(a.subject_name, "Machine Learning");
        assert!((a.confidence - 0.91).abs() < 1e-12);
        assert_eq!(a.summary, None);
    }

    #[test]
    fn fenced_json_with_extras() {
        let raw = "Sure, here you go:\n```json\n{\"discipline\": \"Biology\", \"confidence\": \"0.7\", \"sub_field\": \"Genomics\", \"paper_type\": \"Survey\"}\n```\nThanks";
        let a = parse_answer(raw).unwrap();
        assert_eq!(a.subject_name, "Biology");
        assert_eq!(a.sub_field.as_deref(), Some("Genomics"));
        assert_eq!(a.paper_type.as_deref(), Some("Survey"));
    }

    #[test]
    fn embedded_object() {
        let raw = "The answer is {\"subject\": \"Databases\", \"confidence\": 1.4} as requested";
        let a = parse_answer(raw).unwrap();
        assert_eq!(a.subject_name, "Databases");
        assert_eq!(a.confidence, 1.0);
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(parse_answer(r#"{"confidence": 0.5}"#).is_err());
        assert!(parse_answer(r#"{"subject_name": "X"}"#).is_err());
        assert!(parse_answer(r#"{"subject_name": "  ", "confidence": 0.5}"#).is_err());
        assert!(parse_answer(r#"{"subject_name": "X", "confidence": -1}"#).is_err());
    }

    #[test]
    fn non_json_is_malformed() {
        assert!(parse_answer("I think it is biology").is_err());
        assert!(parse_answer("").is_err());
        assert!(parse_answer("[1, 2]").is_err());
    }

    #[test]
    fn request_prompt_lists_candidates() {
        let meta = Metadata {
            title: "Graph Neural Networks".into(),
            authors: vec!["Ada Lovelace".into()],
            ..Default::default()
        };
        let req = ClassifyRequest::new(&meta, vec!["Computer Science".into()]);
        let prompt = req.to_prompt();
        assert!(prompt.contains("Graph Neural Networks"));
        assert!(prompt.contains("candidate_subjects"));
        assert!(prompt.contains("Computer Science"));
    }
}
