use crate::error::PipelineError;

const OPEN_TAG: &str = "```json";
const FENCE: &str = "```";

/// Pulls the first ```json fenced object out of a model answer.
///
/// Gemini wraps its JSON in a markdown code fence somewhere inside a larger
/// message; everything outside the first fence is ignored.
pub fn extract_json_value(text: &str) -> Result<serde_json::Value, PipelineError> {
    let start = text
        .find(OPEN_TAG)
        .ok_or_else(|| PipelineError::MalformedResponse("no ```json fence in response".into()))?
        + OPEN_TAG.len();
    let body = match text[start..].find(FENCE) {
        Some(end) => &text[start..start + end],
        None => &text[start..],
    };
    serde_json::from_str(body.trim())
        .map_err(|e| PipelineError::MalformedResponse(format!("fenced block is not JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn extracts_embedded_object() {
        let text = "Here is the analysis:\n```json\n{\"positive\": \"a cat\", \"negative\": \"blur\"}\n```\nHope that helps!";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value, json!({"positive": "a cat", "negative": "blur"}));
    }

    #[test]
    fn first_fence_wins() {
        let text = "```json\n{\"a\": 1}\n```\nand also\n```json\n{\"b\": 2}\n```";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn trailing_content_ignored() {
        let text = "```json {\"k\": [1, 2, 3]} ``` trailing prose ``` more";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value, json!({"k": [1, 2, 3]}));
    }

    #[test]
    fn unterminated_fence_still_parses() {
        let text = "```json\n{\"open\": true}";
        let value = extract_json_value(text).unwrap();
        assert_eq!(value, json!({"open": true}));
    }

    #[test]
    fn missing_fence_is_malformed() {
        let err = extract_json_value("{\"no\": \"fence\"}").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = extract_json_value("```json\nnot json at all\n```").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
    }
}
