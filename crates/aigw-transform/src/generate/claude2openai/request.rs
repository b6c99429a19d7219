use aigw_protocol::claude::request::MessagesRequest;
use aigw_protocol::claude::types::{
    ContentBlock as ClaudeBlock, ImageSource, MessageContent, MessageParam, Role,
    Tool as ClaudeTool, ToolChoice as ClaudeToolChoice, ToolResultContent,
};
use aigw_protocol::openai::request::ChatCompletionRequest;
use aigw_protocol::openai::types::{
    ChatMessage, ChatRole, ContentPart, FunctionDef, FunctionSpec, ImageUrl, MessageText,
    NamedFunction, StopSequences, ToolCall, ToolChoice, ToolDef,
};
use serde_json::Value as JsonValue;

/// Convert a canonical messages request into an OpenAI chat-completions
/// request for the given upstream model name.
pub fn translate_request(
    upstream_model: &str,
    request: &MessagesRequest,
    stream: bool,
) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.joined();
        if !text.is_empty() {
            messages.push(ChatMessage {
                role: ChatRole::System,
                content: Some(MessageText::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for message in &request.messages {
        messages.extend(map_message(message));
    }

    ChatCompletionRequest {
        model: upstream_model.to_string(),
        messages,
        tools: map_tools(request.tools.as_deref()),
        tool_choice: map_tool_choice(request.tool_choice.as_ref()),
        max_tokens: request.max_tokens,
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request
            .stop_sequences
            .clone()
            .map(StopSequences::Many),
        stream: stream.then_some(true),
        user: request
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.user_id.clone()),
    }
}

/// One canonical message can fan out into several wire messages: every
/// tool_result block becomes its own `role: tool` message.
fn map_message(message: &MessageParam) -> Vec<ChatMessage> {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            return vec![ChatMessage {
                role: map_role(message.role),
                content: Some(MessageText::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut out = Vec::new();
    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ClaudeBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ClaudeBlock::Image { source } => parts.push(map_image(source)),
            ClaudeBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: "function".to_string(),
                function: FunctionSpec {
                    name: name.clone(),
                    arguments: JsonValue::Object(input.clone()).to_string(),
                },
            }),
            ClaudeBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => out.push(ChatMessage {
                role: ChatRole::Tool,
                content: Some(MessageText::Text(tool_result_text(content.as_ref()))),
                tool_calls: None,
                tool_call_id: Some(tool_use_id.clone()),
                name: None,
            }),
            // Thinking is provider-internal; the OpenAI wire has no slot for it.
            ClaudeBlock::Thinking { .. } => {}
        }
    }

    if !parts.is_empty() || !tool_calls.is_empty() {
        let content = match parts.len() {
            0 => None,
            1 => match parts.pop() {
                Some(ContentPart::Text { text }) => Some(MessageText::Text(text)),
                Some(part) => Some(MessageText::Parts(vec![part])),
                None => None,
            },
            _ => Some(MessageText::Parts(parts)),
        };
        out.insert(
            0,
            ChatMessage {
                role: map_role(message.role),
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
                name: None,
            },
        );
    }

    out
}

fn map_role(role: Role) -> ChatRole {
    match role {
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
    }
}

fn map_image(source: &ImageSource) -> ContentPart {
    let url = match source {
        ImageSource::Url { url } => url.clone(),
        ImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
    };
    ContentPart::ImageUrl {
        image_url: ImageUrl { url },
    }
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .filter_map(|block| match block {
                ClaudeBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<&str>>()
            .join("\n"),
        None => String::new(),
    }
}

fn map_tools(tools: Option<&[ClaudeTool]>) -> Option<Vec<ToolDef>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ToolDef {
                r#type: "function".to_string(),
                function: FunctionDef {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: serde_json::to_value(&tool.input_schema).ok(),
                },
            })
            .collect(),
    )
}

fn map_tool_choice(choice: Option<&ClaudeToolChoice>) -> Option<ToolChoice> {
    Some(match choice? {
        ClaudeToolChoice::Auto => ToolChoice::Mode("auto".to_string()),
        ClaudeToolChoice::Any => ToolChoice::Mode("required".to_string()),
        ClaudeToolChoice::None => ToolChoice::Mode("none".to_string()),
        ClaudeToolChoice::Tool { name } => ToolChoice::Named {
            r#type: "function".to_string(),
            function: NamedFunction { name: name.clone() },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(raw: &str) -> MessagesRequest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn system_prompt_leads_the_message_list() {
        let request = canonical(
            r#"{"model":"gpt-4o","system":"Be terse.","messages":[{"role":"user","content":"Hi"}]}"#,
        );
        let wire = translate_request("gpt-4o-mini", &request, false);

        assert_eq!(wire.model, "gpt-4o-mini");
        assert_eq!(wire.messages[0].role, ChatRole::System);
        assert_eq!(wire.messages[1].role, ChatRole::User);
        assert!(wire.stream.is_none());
    }

    #[test]
    fn tool_use_serialises_arguments_as_json_string() {
        let request = canonical(
            r#"{"model":"m","messages":[
                {"role":"assistant","content":[{"type":"text","text":"calling"},{"type":"tool_use","id":"c1","name":"lookup","input":{"q":"x"}}]},
                {"role":"user","content":[{"type":"tool_result","tool_use_id":"c1","content":"found"}]}
            ]}"#,
        );
        let wire = translate_request("m", &request, true);

        let assistant = &wire.messages[0];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(
            serde_json::from_str::<JsonValue>(&calls[0].function.arguments).unwrap()["q"],
            "x"
        );

        let tool = &wire.messages[1];
        assert_eq!(tool.role, ChatRole::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(wire.stream, Some(true));
    }

    #[test]
    fn base64_image_becomes_data_url() {
        let request = canonical(
            r#"{"model":"m","messages":[{"role":"user","content":[{"type":"image","source":{"type":"base64","media_type":"image/png","data":"QUJD"}}]}]}"#,
        );
        let wire = translate_request("m", &request, false);
        match wire.messages[0].content.as_ref().unwrap() {
            MessageText::Parts(parts) => match &parts[0] {
                ContentPart::ImageUrl { image_url } => {
                    assert_eq!(image_url.url, "data:image/png;base64,QUJD");
                }
                other => panic!("unexpected part: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        }
    }
}
