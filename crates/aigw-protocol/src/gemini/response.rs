use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::gemini::types::{Candidate, UsageMetadata};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Decode a generate-content response, unwrapping the internal-endpoint
/// `{"response": ...}` envelope when present. The public endpoint returns the
/// body bare; both shapes are accepted.
pub fn decode_response(bytes: &[u8]) -> Result<GenerateContentResponse, serde_json::Error> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    serde_json::from_value(unwrap_envelope(value))
}

pub fn unwrap_envelope(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(mut map) => match map.remove("response") {
            Some(inner) => inner,
            None => JsonValue::Object(map),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_envelope() {
        let raw = br#"{"response":{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1}}}"#;
        let response = decode_response(raw).unwrap();
        assert_eq!(response.candidates.len(), 1);
        assert_eq!(response.usage_metadata.unwrap().prompt_token_count, Some(5));
    }

    #[test]
    fn decodes_bare_body() {
        let raw = br#"{"candidates":[{"content":{"parts":[{"text":"ok"}]}}]}"#;
        let response = decode_response(raw).unwrap();
        let content = response.candidates[0].content.as_ref().unwrap();
        assert_eq!(content.parts[0].text.as_deref(), Some("ok"));
    }

    #[test]
    fn trailing_chunk_without_content_decodes() {
        let raw = br#"{"candidates":[{"finishReason":"STOP","index":0}]}"#;
        let response = decode_response(raw).unwrap();
        assert!(response.candidates[0].content.is_none());
    }
}
