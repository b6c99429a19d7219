use std::collections::BTreeMap;

use aigw_protocol::claude::response::{Message, MessageType};
use aigw_protocol::claude::stream::{ContentDelta, DeltaUsage, MessageDeltaBody, StreamEvent};
use aigw_protocol::claude::types::{ContentBlock, Role, Usage};
use aigw_protocol::gemini::response::GenerateContentResponse;
use aigw_protocol::gemini::types::{FunctionCall, Part, UsageMetadata};

use super::response::map_finish_reason;

#[derive(Debug, Clone)]
struct ToolBlock {
    index: u32,
    arguments: String,
}

/// Stateful translator turning a sequence of Gemini stream chunks into
/// canonical stream events. One instance per upstream stream; chunks must be
/// fed in arrival order.
#[derive(Debug)]
pub struct GeminiStreamTranslator {
    model: String,
    response_id: Option<String>,
    message_started: bool,
    finished: bool,
    next_index: u32,
    text_index: Option<u32>,
    thinking_index: Option<u32>,
    tools: BTreeMap<String, ToolBlock>,
    usage: Option<UsageMetadata>,
}

impl GeminiStreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response_id: None,
            message_started: false,
            finished: false,
            next_index: 0,
            text_index: None,
            thinking_index: None,
            tools: BTreeMap::new(),
            usage: None,
        }
    }

    pub fn push_chunk(&mut self, chunk: GenerateContentResponse) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if self.response_id.is_none() {
            self.response_id = chunk.response_id.clone();
        }
        if chunk.usage_metadata.is_some() {
            self.usage = chunk.usage_metadata.clone();
        }

        let mut events = self.ensure_message_start();

        let Some(candidate) = chunk.candidates.first() else {
            return events;
        };

        if let Some(content) = &candidate.content {
            for part in &content.parts {
                events.extend(self.push_part(part));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finished = true;
            events.extend(self.close_blocks());
            events.push(StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(map_finish_reason(reason)),
                    stop_sequence: None,
                },
                usage: delta_usage(self.usage.as_ref()),
            });
            events.push(StreamEvent::MessageStop);
        }

        events
    }

    /// Flush for streams that end without a finish reason. Emits the closing
    /// frames exactly once.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = self.ensure_message_start();
        events.extend(self.close_blocks());
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody::default(),
            usage: delta_usage(self.usage.as_ref()),
        });
        events.push(StreamEvent::MessageStop);
        events
    }

    fn push_part(&mut self, part: &Part) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(text) = &part.text
            && !text.is_empty()
        {
            if part.thought.unwrap_or(false) {
                events.extend(self.emit_thinking(text, part.thought_signature.as_deref()));
            } else {
                events.extend(self.emit_text(text));
            }
        }

        if let Some(call) = &part.function_call {
            events.extend(self.emit_tool_call(call));
        }

        events
    }

    fn emit_text(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.text_index {
            Some(index) => index,
            None => {
                let index = self.claim_index();
                self.text_index = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::text(""),
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
        events
    }

    fn emit_thinking(&mut self, thinking: &str, signature: Option<&str>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.thinking_index {
            Some(index) => index,
            None => {
                let index = self.claim_index();
                self.thinking_index = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Thinking {
                        thinking: String::new(),
                        signature: None,
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::ThinkingDelta {
                thinking: thinking.to_string(),
            },
        });
        if let Some(signature) = signature
            && !signature.is_empty()
        {
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::SignatureDelta {
                    signature: signature.to_string(),
                },
            });
        }
        events
    }

    fn emit_tool_call(&mut self, call: &FunctionCall) -> Vec<StreamEvent> {
        let key = call.id.clone().unwrap_or_else(|| call.name.clone());
        let mut events = Vec::new();

        if !self.tools.contains_key(&key) {
            let index = self.claim_index();
            self.tools.insert(
                key.clone(),
                ToolBlock {
                    index,
                    arguments: String::new(),
                },
            );
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlock::ToolUse {
                    id: key.clone(),
                    name: call.name.clone(),
                    input: serde_json::Map::new(),
                },
            });
        }

        let arguments = call
            .args
            .as_ref()
            .and_then(|args| serde_json::to_string(args).ok())
            .unwrap_or_default();

        let block = self.tools.get_mut(&key).expect("tool block just inserted");
        // Gemini repeats the full argument object; emit only the unseen tail.
        let delta = if arguments.starts_with(&block.arguments) {
            arguments[block.arguments.len()..].to_string()
        } else {
            arguments.clone()
        };
        block.arguments = arguments;

        if !delta.is_empty() {
            let index = block.index;
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: delta,
                },
            });
        }

        events
    }

    fn close_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.text_index.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        if let Some(index) = self.thinking_index.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        for (_, block) in std::mem::take(&mut self.tools) {
            events.push(StreamEvent::ContentBlockStop { index: block.index });
        }
        events
    }

    fn ensure_message_start(&mut self) -> Vec<StreamEvent> {
        if self.message_started {
            return Vec::new();
        }
        self.message_started = true;
        vec![StreamEvent::MessageStart {
            message: Message {
                id: self
                    .response_id
                    .clone()
                    .unwrap_or_else(|| "response".to_string()),
                r#type: MessageType::Message,
                role: Role::Assistant,
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }]
    }

    fn claim_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

fn delta_usage(usage: Option<&UsageMetadata>) -> DeltaUsage {
    DeltaUsage {
        input_tokens: usage.and_then(|usage| usage.prompt_token_count),
        output_tokens: usage.and_then(|usage| usage.candidates_token_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::gemini::response::decode_response;

    fn chunk(raw: &str) -> GenerateContentResponse {
        decode_response(raw.as_bytes()).unwrap()
    }

    fn collect_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_chunks_share_one_block() {
        let mut translator = GeminiStreamTranslator::new("m");
        let mut events = translator.push_chunk(chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
        ));
        events.extend(translator.push_chunk(chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":5,"candidatesTokenCount":1}}"#,
        )));

        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        assert_eq!(collect_text(&events), "Hello");

        let starts = events
            .iter()
            .filter(|event| matches!(event, StreamEvent::ContentBlockStart { .. }))
            .count();
        assert_eq!(starts, 1);
        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));

        let delta = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::MessageDelta { delta, usage } => Some((delta.clone(), usage.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(
            delta.0.stop_reason,
            Some(aigw_protocol::claude::types::StopReason::EndTurn)
        );
        assert_eq!(delta.1.output_tokens, Some(1));
    }

    #[test]
    fn function_call_opens_tool_block_and_streams_arguments() {
        let mut translator = GeminiStreamTranslator::new("m");
        let events = translator.push_chunk(chunk(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"id":"c1","name":"lookup","args":{"q":"x"}}}]},"finishReason":"STOP"}]}"#,
        ));

        let start = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::ContentBlockStart {
                    content_block: ContentBlock::ToolUse { id, name, .. },
                    index,
                } => Some((*index, id.clone(), name.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(start.1, "c1");
        assert_eq!(start.2, "lookup");

        let json: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(serde_json::from_str::<serde_json::Value>(&json).unwrap()["q"], "x");
    }

    #[test]
    fn finish_without_reason_still_terminates_once() {
        let mut translator = GeminiStreamTranslator::new("m");
        translator.push_chunk(chunk(
            r#"{"candidates":[{"content":{"parts":[{"text":"partial"}]}}]}"#,
        ));
        let tail = translator.finish();
        assert!(matches!(tail.last(), Some(StreamEvent::MessageStop)));
        assert!(translator.finish().is_empty());
    }
}
