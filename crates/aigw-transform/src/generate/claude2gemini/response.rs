use aigw_protocol::claude::response::{Message, MessageType};
use aigw_protocol::claude::types::{ContentBlock, Role, StopReason, Usage};
use aigw_protocol::gemini::response::GenerateContentResponse;
use aigw_protocol::gemini::types::{Content, FinishReason, Part, UsageMetadata};
use serde_json::Value as JsonValue;

/// Convert a Gemini generate-content response into the canonical message.
pub fn translate_response(model: &str, response: GenerateContentResponse) -> Message {
    let candidate = response.candidates.first();

    let content = candidate
        .and_then(|candidate| candidate.content.as_ref())
        .map(map_content)
        .unwrap_or_default();

    let stop_reason = candidate
        .and_then(|candidate| candidate.finish_reason)
        .map(map_finish_reason);

    Message {
        id: response
            .response_id
            .unwrap_or_else(|| "response".to_string()),
        r#type: MessageType::Message,
        role: Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: map_usage(response.usage_metadata.as_ref()),
    }
}

fn map_content(content: &Content) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    for part in &content.parts {
        blocks.extend(map_part(part));
    }
    blocks
}

fn map_part(part: &Part) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(text) = &part.text
        && !text.is_empty()
    {
        if part.thought.unwrap_or(false) {
            blocks.push(ContentBlock::Thinking {
                thinking: text.clone(),
                signature: part.thought_signature.clone(),
            });
        } else {
            blocks.push(ContentBlock::text(text.clone()));
        }
    }

    if let Some(call) = &part.function_call {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone().unwrap_or_else(|| call.name.clone()),
            name: call.name.clone(),
            input: args_to_object(call.args.as_ref()),
        });
    }

    blocks
}

fn args_to_object(args: Option<&JsonValue>) -> serde_json::Map<String, JsonValue> {
    match args {
        Some(JsonValue::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("arguments".to_string(), other.clone());
            map
        }
        None => serde_json::Map::new(),
    }
}

pub(crate) fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::MaxTokens => StopReason::MaxTokens,
        FinishReason::MalformedFunctionCall => StopReason::ToolUse,
        FinishReason::Safety
        | FinishReason::Blocklist
        | FinishReason::ProhibitedContent
        | FinishReason::Spii
        | FinishReason::Recitation => StopReason::Refusal,
        FinishReason::Unspecified | FinishReason::Other => StopReason::EndTurn,
    }
}

fn map_usage(usage: Option<&UsageMetadata>) -> Usage {
    Usage {
        input_tokens: usage.and_then(|usage| usage.prompt_token_count).unwrap_or(0),
        output_tokens: usage
            .and_then(|usage| usage.candidates_token_count)
            .unwrap_or(0),
        cache_creation_input_tokens: None,
        cache_read_input_tokens: usage
            .and_then(|usage| usage.cached_content_token_count)
            .filter(|count| *count > 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::gemini::response::decode_response;

    #[test]
    fn upstream_reply_maps_to_canonical_message() {
        let raw = br#"{"response":{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1}}}"#;
        let message = translate_response("gemini-2.5-flash", decode_response(raw).unwrap());

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, vec![ContentBlock::text("Hello")]);
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.input_tokens, 5);
        assert_eq!(message.usage.output_tokens, 1);
    }

    #[test]
    fn function_call_becomes_tool_use_block() {
        let raw = br#"{"candidates":[{"content":{"role":"model","parts":[{"functionCall":{"id":"c1","name":"lookup","args":{"q":"x"}}}]},"finishReason":"STOP"}]}"#;
        let message = translate_response("m", decode_response(raw).unwrap());

        match &message.content[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "lookup");
                assert_eq!(input["q"], "x");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn empty_candidates_degrade_to_empty_content() {
        let message = translate_response("m", GenerateContentResponse::default());
        assert!(message.content.is_empty());
        assert_eq!(message.usage.input_tokens, 0);
    }
}
