use aigw_protocol::claude::response::{Message, MessageType};
use aigw_protocol::claude::types::{ContentBlock, Role, StopReason, Usage};
use aigw_protocol::openai::response::ChatCompletion;
use aigw_protocol::openai::types::{FinishReason, MessageText, ToolCall, Usage as OpenAiUsage};
use serde_json::Value as JsonValue;

/// Convert an OpenAI chat-completions response into the canonical message.
pub fn translate_response(model: &str, completion: ChatCompletion) -> Message {
    let choice = completion.choices.into_iter().next();

    let mut content = Vec::new();
    let mut stop_reason = None;

    if let Some(choice) = choice {
        if let Some(text) = choice.message.content {
            let text = match text {
                MessageText::Text(text) => text,
                parts @ MessageText::Parts(_) => parts.plain(),
            };
            if !text.is_empty() {
                content.push(ContentBlock::text(text));
            }
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            content.push(tool_use_block(call));
        }
        stop_reason = choice.finish_reason.map(map_finish_reason);
    }

    Message {
        id: completion.id,
        r#type: MessageType::Message,
        role: Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: map_usage(completion.usage.as_ref()),
    }
}

/// Tool-call arguments arrive as a JSON-encoded string; they must leave here
/// as a structured object.
fn tool_use_block(call: ToolCall) -> ContentBlock {
    let input = match serde_json::from_str::<JsonValue>(&call.function.arguments) {
        Ok(JsonValue::Object(map)) => map,
        Ok(other) => {
            let mut map = serde_json::Map::new();
            map.insert("arguments".to_string(), other);
            map
        }
        Err(_) => serde_json::Map::new(),
    };
    ContentBlock::ToolUse {
        id: call.id,
        name: call.function.name,
        input,
    }
}

pub(crate) fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::Refusal,
    }
}

fn map_usage(usage: Option<&OpenAiUsage>) -> Usage {
    Usage {
        input_tokens: usage.map(|usage| usage.prompt_tokens).unwrap_or(0),
        output_tokens: usage.map(|usage| usage.completion_tokens).unwrap_or(0),
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_maps_to_canonical_message() {
        let raw = r#"{
            "id":"chatcmpl-1","object":"chat.completion","created":1,"model":"gpt-4o-mini",
            "choices":[{"index":0,"message":{"role":"assistant","content":"Hello"},"finish_reason":"stop"}],
            "usage":{"prompt_tokens":7,"completion_tokens":2,"total_tokens":9}
        }"#;
        let completion: ChatCompletion = serde_json::from_str(raw).unwrap();
        let message = translate_response("mycheapmodel", completion);

        assert_eq!(message.model, "mycheapmodel");
        assert_eq!(message.content, vec![ContentBlock::text("Hello")]);
        assert_eq!(message.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(message.usage.input_tokens, 7);
        assert_eq!(message.usage.output_tokens, 2);
    }

    #[test]
    fn tool_call_arguments_are_parsed_into_objects() {
        let raw = r#"{
            "id":"chatcmpl-2","object":"chat.completion","created":1,"model":"m",
            "choices":[{"index":0,"message":{"role":"assistant","content":null,
              "tool_calls":[{"id":"c1","type":"function","function":{"name":"lookup","arguments":"{\"q\":\"x\"}"}}]},
              "finish_reason":"tool_calls"}]
        }"#;
        let completion: ChatCompletion = serde_json::from_str(raw).unwrap();
        let message = translate_response("m", completion);

        assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
        match &message.content[0] {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input["q"], "x"),
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_input() {
        let raw = r#"{
            "id":"chatcmpl-3","object":"chat.completion","created":1,"model":"m",
            "choices":[{"index":0,"message":{"role":"assistant",
              "tool_calls":[{"id":"c1","type":"function","function":{"name":"lookup","arguments":"{broken"}}]},
              "finish_reason":"tool_calls"}]
        }"#;
        let completion: ChatCompletion = serde_json::from_str(raw).unwrap();
        let message = translate_response("m", completion);
        match &message.content[0] {
            ContentBlock::ToolUse { input, .. } => assert!(input.is_empty()),
            other => panic!("unexpected block: {other:?}"),
        }
    }
}
