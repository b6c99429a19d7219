use aigw_protocol::claude::request::MessagesRequest;
use aigw_protocol::claude::types::{
    ContentBlock as ClaudeBlock, ImageSource, MessageContent, MessageParam, Role,
    SystemPrompt, ThinkingConfig as ClaudeThinking, Tool as ClaudeTool, ToolChoice,
    ToolInputSchema, ToolResultContent,
};
use aigw_protocol::gemini::request::{GenerateContentBody, GenerateContentEnvelope};
use aigw_protocol::gemini::types::{
    Blob, Content, ContentRole, FileData, FunctionCall, FunctionCallingConfig,
    FunctionCallingMode, FunctionDeclaration, FunctionResponse, GenerationConfig, Part,
    ThinkingConfig, Tool, ToolConfig,
};
use serde_json::{Value as JsonValue, json};

/// Convert a canonical messages request into the Gemini generate-content
/// envelope for the given upstream model name.
pub fn translate_request(upstream_model: &str, request: &MessagesRequest) -> GenerateContentEnvelope {
    GenerateContentEnvelope {
        model: upstream_model.to_string(),
        request: GenerateContentBody {
            contents: map_messages(&request.messages),
            system_instruction: map_system(request.system.as_ref()),
            tools: map_tools(request.tools.as_deref()),
            tool_config: map_tool_choice(request.tool_choice.as_ref()),
            generation_config: map_generation_config(request),
        },
    }
}

fn map_system(system: Option<&SystemPrompt>) -> Option<Content> {
    let text = system?.joined();
    if text.is_empty() {
        return None;
    }
    Some(Content {
        parts: vec![Part::text(text)],
        role: None,
    })
}

fn map_messages(messages: &[MessageParam]) -> Vec<Content> {
    messages.iter().filter_map(map_message).collect()
}

fn map_message(message: &MessageParam) -> Option<Content> {
    let role = match message.role {
        Role::User => ContentRole::User,
        Role::Assistant => ContentRole::Model,
    };

    let parts: Vec<Part> = match &message.content {
        MessageContent::Text(text) => vec![Part::text(text.clone())],
        MessageContent::Blocks(blocks) => blocks.iter().filter_map(map_block).collect(),
    };

    if parts.is_empty() {
        None
    } else {
        Some(Content {
            parts,
            role: Some(role),
        })
    }
}

fn map_block(block: &ClaudeBlock) -> Option<Part> {
    match block {
        ClaudeBlock::Text { text } => Some(Part::text(text.clone())),
        ClaudeBlock::Image { source } => Some(map_image(source)),
        ClaudeBlock::ToolUse { id, name, input } => Some(Part {
            function_call: Some(FunctionCall {
                id: Some(id.clone()),
                name: name.clone(),
                args: Some(JsonValue::Object(input.clone())),
            }),
            ..Part::default()
        }),
        ClaudeBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(Part {
            function_response: Some(FunctionResponse {
                id: Some(tool_use_id.clone()),
                name: tool_use_id.clone(),
                response: tool_result_payload(content.as_ref(), *is_error),
            }),
            ..Part::default()
        }),
        ClaudeBlock::Thinking {
            thinking,
            signature,
        } => Some(Part {
            text: Some(thinking.clone()),
            thought: Some(true),
            thought_signature: signature.clone(),
            ..Part::default()
        }),
    }
}

fn map_image(source: &ImageSource) -> Part {
    match source {
        ImageSource::Base64 { media_type, data } => Part {
            inline_data: Some(Blob {
                mime_type: media_type.clone(),
                data: data.clone(),
            }),
            ..Part::default()
        },
        ImageSource::Url { url } => Part {
            file_data: Some(FileData {
                mime_type: None,
                file_uri: url.clone(),
            }),
            ..Part::default()
        },
    }
}

fn tool_result_payload(content: Option<&ToolResultContent>, is_error: Option<bool>) -> JsonValue {
    let text = match content {
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
    };

    if is_error.unwrap_or(false) {
        json!({ "error": text })
    } else {
        json!({ "result": text })
    }
}

fn map_tools(tools: Option<&[ClaudeTool]>) -> Option<Vec<Tool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }

    let declarations = tools
        .iter()
        .map(|tool| FunctionDeclaration {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            parameters: Some(schema_to_json(&tool.input_schema)),
        })
        .collect();

    Some(vec![Tool {
        function_declarations: Some(declarations),
    }])
}

fn schema_to_json(schema: &ToolInputSchema) -> JsonValue {
    let mut map = serde_json::Map::new();
    map.insert("type".to_string(), JsonValue::String(schema.r#type.clone()));
    if let Some(properties) = &schema.properties {
        map.insert("properties".to_string(), JsonValue::Object(properties.clone()));
    }
    if let Some(required) = &schema.required {
        map.insert(
            "required".to_string(),
            JsonValue::Array(
                required
                    .iter()
                    .map(|name| JsonValue::String(name.clone()))
                    .collect(),
            ),
        );
    }
    JsonValue::Object(map)
}

fn map_tool_choice(choice: Option<&ToolChoice>) -> Option<ToolConfig> {
    let config = match choice? {
        ToolChoice::Auto => FunctionCallingConfig {
            mode: Some(FunctionCallingMode::Auto),
            allowed_function_names: None,
        },
        ToolChoice::Any => FunctionCallingConfig {
            mode: Some(FunctionCallingMode::Any),
            allowed_function_names: None,
        },
        ToolChoice::None => FunctionCallingConfig {
            mode: Some(FunctionCallingMode::None),
            allowed_function_names: None,
        },
        ToolChoice::Tool { name } => FunctionCallingConfig {
            mode: Some(FunctionCallingMode::Any),
            allowed_function_names: Some(vec![name.clone()]),
        },
    };

    Some(ToolConfig {
        function_calling_config: Some(config),
    })
}

fn map_generation_config(request: &MessagesRequest) -> Option<GenerationConfig> {
    let thinking_config = request.thinking.as_ref().map(|thinking| match thinking {
        ClaudeThinking::Enabled { budget_tokens } => ThinkingConfig {
            include_thoughts: true,
            thinking_budget: *budget_tokens,
        },
        ClaudeThinking::Disabled => ThinkingConfig {
            include_thoughts: false,
            thinking_budget: 0,
        },
    });

    let has_config = request.max_tokens.is_some()
        || request.temperature.is_some()
        || request.top_p.is_some()
        || request.top_k.is_some()
        || request.stop_sequences.is_some()
        || thinking_config.is_some();
    if !has_config {
        return None;
    }

    Some(GenerationConfig {
        stop_sequences: request.stop_sequences.clone(),
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        thinking_config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(raw: &str) -> MessagesRequest {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn system_prompt_becomes_system_instruction() {
        let request = canonical(
            r#"{"model":"gemini-2.5-flash","system":"You are helpful.","messages":[{"role":"user","content":"Hi"}],"max_tokens":32}"#,
        );
        let envelope = translate_request("gemini-2.5-flash", &request);

        let system = envelope.request.system_instruction.unwrap();
        assert_eq!(system.parts[0].text.as_deref(), Some("You are helpful."));
        assert_eq!(
            envelope.request.contents[0].role,
            Some(ContentRole::User)
        );
        assert_eq!(
            envelope
                .request
                .generation_config
                .unwrap()
                .max_output_tokens,
            Some(32)
        );
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let request = canonical(
            r#"{"model":"m","messages":[{"role":"assistant","content":"prev"},{"role":"user","content":"next"}]}"#,
        );
        let envelope = translate_request("m", &request);
        assert_eq!(envelope.request.contents[0].role, Some(ContentRole::Model));
        assert_eq!(envelope.request.contents[1].role, Some(ContentRole::User));
    }

    #[test]
    fn tool_use_and_result_become_function_parts() {
        let request = canonical(
            r#"{"model":"m","messages":[
                {"role":"assistant","content":[{"type":"tool_use","id":"call_1","name":"lookup","input":{"q":"x"}}]},
                {"role":"user","content":[{"type":"tool_result","tool_use_id":"call_1","content":"found"}]}
            ]}"#,
        );
        let envelope = translate_request("m", &request);

        let call = envelope.request.contents[0].parts[0]
            .function_call
            .as_ref()
            .unwrap();
        assert_eq!(call.name, "lookup");
        assert_eq!(call.id.as_deref(), Some("call_1"));

        let response = envelope.request.contents[1].parts[0]
            .function_response
            .as_ref()
            .unwrap();
        assert_eq!(response.response["result"], "found");
    }

    #[test]
    fn tool_schema_flattens_into_parameters() {
        let request = canonical(
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}],
               "tools":[{"name":"lookup","description":"d","input_schema":{"type":"object","properties":{"q":{"type":"string"}},"required":["q"]}}],
               "tool_choice":{"type":"tool","name":"lookup"}}"#,
        );
        let envelope = translate_request("m", &request);

        let tools = envelope.request.tools.unwrap();
        let declaration = &tools[0].function_declarations.as_ref().unwrap()[0];
        assert_eq!(declaration.name, "lookup");
        assert_eq!(declaration.parameters.as_ref().unwrap()["required"][0], "q");

        let config = envelope
            .request
            .tool_config
            .unwrap()
            .function_calling_config
            .unwrap();
        assert_eq!(config.mode, Some(FunctionCallingMode::Any));
        assert_eq!(config.allowed_function_names.unwrap()[0], "lookup");
    }
}
