use aigw_protocol::claude::request::MessagesRequest;
use aigw_protocol::claude::types::{
    ContentBlock, ImageSource, MessageContent, MessageParam, Metadata, Role, SystemPrompt,
    Tool, ToolChoice as ClaudeToolChoice, ToolInputSchema, ToolResultContent,
};
use aigw_protocol::openai::request::ChatCompletionRequest;
use aigw_protocol::openai::types::{
    ChatMessage, ChatRole, ContentPart, MessageText, ToolChoice, ToolDef,
};
use serde_json::Value as JsonValue;

/// Normalise an OpenAI chat-completions request into the canonical format.
pub fn translate_request(request: &ChatCompletionRequest) -> MessagesRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<MessageParam> = Vec::new();

    for message in &request.messages {
        match message.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = &message.content {
                    let text = content.plain();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            ChatRole::User => messages.push(MessageParam {
                role: Role::User,
                content: map_user_content(message),
            }),
            ChatRole::Assistant => messages.push(MessageParam {
                role: Role::Assistant,
                content: map_assistant_content(message),
            }),
            ChatRole::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: message.tool_call_id.clone().unwrap_or_default(),
                    content: message
                        .content
                        .as_ref()
                        .map(|content| ToolResultContent::Text(content.plain())),
                    is_error: None,
                };
                // Tool results ride on user turns in the canonical format;
                // coalesce with a preceding tool-result turn when possible.
                match messages.last_mut() {
                    Some(MessageParam {
                        role: Role::User,
                        content: MessageContent::Blocks(blocks),
                    }) if blocks
                        .iter()
                        .all(|block| matches!(block, ContentBlock::ToolResult { .. })) =>
                    {
                        blocks.push(block);
                    }
                    _ => messages.push(MessageParam {
                        role: Role::User,
                        content: MessageContent::Blocks(vec![block]),
                    }),
                }
            }
        }
    }

    MessagesRequest {
        model: request.model.clone(),
        messages,
        system: (!system_parts.is_empty()).then(|| SystemPrompt::Text(system_parts.join("\n"))),
        tools: map_tools(request.tools.as_deref()),
        tool_choice: map_tool_choice(request.tool_choice.as_ref()),
        max_tokens: request.output_limit(),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        stop_sequences: request.stop.clone().map(|stop| stop.into_vec()),
        thinking: None,
        stream: request.stream,
        metadata: request.user.clone().map(|user_id| Metadata {
            user_id: Some(user_id),
        }),
    }
}

fn map_user_content(message: &ChatMessage) -> MessageContent {
    match &message.content {
        Some(MessageText::Text(text)) => MessageContent::Text(text.clone()),
        Some(MessageText::Parts(parts)) => MessageContent::Blocks(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => ContentBlock::text(text.clone()),
                    ContentPart::ImageUrl { image_url } => ContentBlock::Image {
                        source: parse_image_url(&image_url.url),
                    },
                })
                .collect(),
        ),
        None => MessageContent::Text(String::new()),
    }
}

fn parse_image_url(url: &str) -> ImageSource {
    // data:image/png;base64,<payload>
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return ImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    ImageSource::Url {
        url: url.to_string(),
    }
}

fn map_assistant_content(message: &ChatMessage) -> MessageContent {
    let mut blocks = Vec::new();

    if let Some(content) = &message.content {
        let text = content.plain();
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
    }

    for call in message.tool_calls.as_deref().unwrap_or_default() {
        let input = match serde_json::from_str::<JsonValue>(&call.function.arguments) {
            Ok(JsonValue::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }

    if blocks.len() == 1
        && let Some(ContentBlock::Text { text }) = blocks.first()
    {
        return MessageContent::Text(text.clone());
    }
    MessageContent::Blocks(blocks)
}

fn map_tools(tools: Option<&[ToolDef]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| Tool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: schema_from_json(tool.function.parameters.as_ref()),
            })
            .collect(),
    )
}

fn schema_from_json(parameters: Option<&JsonValue>) -> ToolInputSchema {
    parameters
        .and_then(|value| serde_json::from_value(value.clone()).ok())
        .unwrap_or(ToolInputSchema {
            r#type: "object".to_string(),
            properties: None,
            required: None,
            extra: serde_json::Map::new(),
        })
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> Option<ClaudeToolChoice> {
    match choice? {
        ToolChoice::Mode(mode) => match mode.as_str() {
            "none" => Some(ClaudeToolChoice::None),
            "required" => Some(ClaudeToolChoice::Any),
            _ => Some(ClaudeToolChoice::Auto),
        },
        ToolChoice::Named { function, .. } => Some(ClaudeToolChoice::Tool {
            name: function.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(raw: &str) -> ChatCompletionRequest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn system_messages_collapse_into_system_field() {
        let request = wire(
            r#"{"model":"gpt-4o","messages":[
                {"role":"system","content":"Be terse."},
                {"role":"user","content":"Hi"}
            ],"max_completion_tokens":64}"#,
        );
        let canonical = translate_request(&request);

        assert_eq!(
            canonical.system,
            Some(SystemPrompt::Text("Be terse.".to_string()))
        );
        assert_eq!(canonical.messages.len(), 1);
        assert_eq!(canonical.max_tokens, Some(64));
    }

    #[test]
    fn tool_flow_round_trips_through_canonical_blocks() {
        let request = wire(
            r#"{"model":"m","messages":[
                {"role":"assistant","content":null,"tool_calls":[{"id":"c1","type":"function","function":{"name":"lookup","arguments":"{\"q\":\"x\"}"}}]},
                {"role":"tool","tool_call_id":"c1","content":"found"}
            ]}"#,
        );
        let canonical = translate_request(&request);

        match &canonical.messages[0].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolUse { id, input, .. } => {
                    assert_eq!(id, "c1");
                    assert_eq!(input["q"], "x");
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
        match &canonical.messages[1].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    assert_eq!(tool_use_id, "c1");
                    assert_eq!(
                        content,
                        &Some(ToolResultContent::Text("found".to_string()))
                    );
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn data_url_images_become_base64_sources() {
        let request = wire(
            r#"{"model":"m","messages":[{"role":"user","content":[
                {"type":"image_url","image_url":{"url":"data:image/jpeg;base64,QUJD"}}
            ]}]}"#,
        );
        let canonical = translate_request(&request);
        match &canonical.messages[0].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::Image {
                    source: ImageSource::Base64 { media_type, data },
                } => {
                    assert_eq!(media_type, "image/jpeg");
                    assert_eq!(data, "QUJD");
                }
                other => panic!("unexpected block: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
