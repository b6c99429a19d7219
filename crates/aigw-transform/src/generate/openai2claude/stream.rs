use std::collections::BTreeMap;

use aigw_protocol::claude::stream::{ContentDelta, StreamEvent};
use aigw_protocol::claude::types::ContentBlock;
use aigw_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionDelta, ToolCallDelta,
};
use aigw_protocol::openai::types::{ChatRole, Usage as OpenAiUsage};

use super::response::map_stop_reason;

/// Renders canonical stream events as OpenAI chat-completion chunks for the
/// `/v1/chat/completions` ingress. One instance per client stream.
#[derive(Debug)]
pub struct ChunkRenderer {
    id: String,
    model: String,
    created: i64,
    role_sent: bool,
    /// canonical block index → wire tool index
    tool_indexes: BTreeMap<u32, u32>,
    next_tool_index: u32,
    usage: Option<OpenAiUsage>,
}

impl ChunkRenderer {
    pub fn new(created: i64) -> Self {
        Self {
            id: "chatcmpl-stream".to_string(),
            model: String::new(),
            created,
            role_sent: false,
            tool_indexes: BTreeMap::new(),
            next_tool_index: 0,
            usage: None,
        }
    }

    pub fn render(&mut self, event: &StreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = format!("chatcmpl-{}", message.id);
                self.model = message.model.clone();
                Vec::new()
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_indexes.insert(*index, tool_index);
                    let role = self.role_delta();
                    vec![self.chunk(
                        ChunkDelta {
                            role,
                            content: None,
                            tool_calls: Some(vec![ToolCallDelta {
                                index: tool_index,
                                id: Some(id.clone()),
                                r#type: Some("function".to_string()),
                                function: Some(FunctionDelta {
                                    name: Some(name.clone()),
                                    arguments: None,
                                }),
                            }]),
                        },
                        None,
                    )]
                }
                _ => Vec::new(),
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentDelta::TextDelta { text } => {
                    let role = self.role_delta();
                    vec![self.chunk(
                        ChunkDelta {
                            role,
                            content: Some(text.clone()),
                            tool_calls: None,
                        },
                        None,
                    )]
                }
                ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(tool_index) = self.tool_indexes.get(index).copied() else {
                        return Vec::new();
                    };
                    vec![self.chunk(
                        ChunkDelta {
                            role: None,
                            content: None,
                            tool_calls: Some(vec![ToolCallDelta {
                                index: tool_index,
                                id: None,
                                r#type: None,
                                function: Some(FunctionDelta {
                                    name: None,
                                    arguments: Some(partial_json.clone()),
                                }),
                            }]),
                        },
                        None,
                    )]
                }
                ContentDelta::ThinkingDelta { .. } | ContentDelta::SignatureDelta { .. } => {
                    Vec::new()
                }
            },
            StreamEvent::ContentBlockStop { .. } | StreamEvent::Ping => Vec::new(),
            StreamEvent::MessageDelta { delta, usage } => {
                self.usage = Some(OpenAiUsage {
                    prompt_tokens: usage.input_tokens.unwrap_or(0),
                    completion_tokens: usage.output_tokens.unwrap_or(0),
                    total_tokens: usage.input_tokens.unwrap_or(0)
                        + usage.output_tokens.unwrap_or(0),
                });
                let Some(stop_reason) = delta.stop_reason else {
                    return Vec::new();
                };
                let mut chunk = self.chunk(ChunkDelta::default(), None);
                chunk.choices[0].finish_reason = Some(map_stop_reason(stop_reason));
                vec![chunk]
            }
            StreamEvent::MessageStop => {
                let usage = self.usage.take();
                match usage {
                    Some(usage) => {
                        let mut chunk = self.chunk(ChunkDelta::default(), Some(usage));
                        chunk.choices.clear();
                        vec![chunk]
                    }
                    None => Vec::new(),
                }
            }
            StreamEvent::Error { .. } => Vec::new(),
        }
    }

    fn role_delta(&mut self) -> Option<ChatRole> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(ChatRole::Assistant)
        }
    }

    fn chunk(&self, delta: ChunkDelta, usage: Option<OpenAiUsage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: None,
            }],
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::claude::response::{Message, MessageType};
    use aigw_protocol::claude::stream::{DeltaUsage, MessageDeltaBody};
    use aigw_protocol::claude::types::{Role, StopReason, Usage};
    use aigw_protocol::openai::types::FinishReason;

    fn start_event() -> StreamEvent {
        StreamEvent::MessageStart {
            message: Message {
                id: "abc".to_string(),
                r#type: MessageType::Message,
                role: Role::Assistant,
                model: "m".to_string(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }

    #[test]
    fn first_text_delta_carries_the_role() {
        let mut renderer = ChunkRenderer::new(1);
        renderer.render(&start_event());

        let chunks = renderer.render(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "Hi".to_string(),
            },
        });
        assert_eq!(chunks[0].id, "chatcmpl-abc");
        assert_eq!(chunks[0].choices[0].delta.role, Some(ChatRole::Assistant));
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hi"));

        let more = renderer.render(&StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "!".to_string(),
            },
        });
        assert_eq!(more[0].choices[0].delta.role, None);
    }

    #[test]
    fn stop_reason_and_usage_close_the_stream() {
        let mut renderer = ChunkRenderer::new(1);
        renderer.render(&start_event());

        let finish = renderer.render(&StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(StopReason::EndTurn),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                input_tokens: Some(3),
                output_tokens: Some(2),
            },
        });
        assert_eq!(
            finish[0].choices[0].finish_reason,
            Some(FinishReason::Stop)
        );

        let tail = renderer.render(&StreamEvent::MessageStop);
        assert!(tail[0].choices.is_empty());
        assert_eq!(tail[0].usage.as_ref().unwrap().total_tokens, 5);
    }
}
