use aigw_protocol::claude::response::Message;
use aigw_protocol::claude::types::{ContentBlock, StopReason};
use aigw_protocol::openai::response::{ChatCompletion, Choice};
use aigw_protocol::openai::types::{
    ChatMessage, ChatRole, FinishReason, FunctionSpec, MessageText, ToolCall,
    Usage as OpenAiUsage,
};
use serde_json::Value as JsonValue;

/// Render a canonical message as an OpenAI chat completion.
pub fn translate_response(message: Message, created: i64) -> ChatCompletion {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionSpec {
                    name: name.clone(),
                    arguments: JsonValue::Object(input.clone()).to_string(),
                },
            }),
            // Thinking and tool results have no slot on this wire.
            _ => {}
        }
    }

    let finish_reason = message.stop_reason.map(map_stop_reason);

    ChatCompletion {
        id: message.id,
        object: "chat.completion".to_string(),
        created,
        model: message.model,
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: ChatRole::Assistant,
                content: (!text_parts.is_empty())
                    .then(|| MessageText::Text(text_parts.join(""))),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            },
            finish_reason,
        }],
        usage: Some(OpenAiUsage {
            prompt_tokens: message.usage.input_tokens,
            completion_tokens: message.usage.output_tokens,
            total_tokens: message.usage.input_tokens + message.usage.output_tokens,
        }),
    }
}

pub(crate) fn map_stop_reason(reason: StopReason) -> FinishReason {
    match reason {
        StopReason::EndTurn | StopReason::StopSequence => FinishReason::Stop,
        StopReason::MaxTokens => FinishReason::Length,
        StopReason::ToolUse => FinishReason::ToolCalls,
        StopReason::Refusal => FinishReason::ContentFilter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::claude::response::MessageType;
    use aigw_protocol::claude::types::{Role, Usage};

    #[test]
    fn canonical_message_renders_as_completion() {
        let message = Message {
            id: "msg_1".to_string(),
            r#type: MessageType::Message,
            role: Role::Assistant,
            model: "mycheapmodel".to_string(),
            content: vec![
                ContentBlock::text("Hello"),
                ContentBlock::ToolUse {
                    id: "c1".to_string(),
                    name: "lookup".to_string(),
                    input: serde_json::from_str(r#"{"q":"x"}"#).unwrap(),
                },
            ],
            stop_reason: Some(StopReason::ToolUse),
            stop_sequence: None,
            usage: Usage {
                input_tokens: 4,
                output_tokens: 2,
                ..Usage::default()
            },
        };

        let completion = translate_response(message, 1_700_000_000);
        let choice = &completion.choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(
            choice.message.content,
            Some(MessageText::Text("Hello".to_string()))
        );
        let call = &choice.message.tool_calls.as_ref().unwrap()[0];
        assert_eq!(call.function.name, "lookup");
        assert_eq!(completion.usage.as_ref().unwrap().total_tokens, 6);
    }
}
