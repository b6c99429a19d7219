use std::collections::BTreeMap;

use aigw_protocol::claude::response::{Message, MessageType};
use aigw_protocol::claude::stream::{ContentDelta, DeltaUsage, MessageDeltaBody, StreamEvent};
use aigw_protocol::claude::types::{ContentBlock, Role, Usage};
use aigw_protocol::openai::stream::{ChatCompletionChunk, ToolCallDelta};
use aigw_protocol::openai::types::Usage as OpenAiUsage;

use super::response::map_finish_reason;

#[derive(Debug, Clone)]
struct ToolBlock {
    index: u32,
    started: bool,
    id: String,
    name: String,
}

/// Stateful translator turning OpenAI chat-completions chunks into canonical
/// stream events. Tool calls are keyed by the wire's per-choice tool index;
/// argument fragments pass through as `input_json_delta`.
#[derive(Debug)]
pub struct OpenAiStreamTranslator {
    model: String,
    message_started: bool,
    finished: bool,
    next_index: u32,
    text_index: Option<u32>,
    tools: BTreeMap<u32, ToolBlock>,
    usage: Option<OpenAiUsage>,
    pending_stop: Option<MessageDeltaBody>,
}

impl OpenAiStreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message_started: false,
            finished: false,
            next_index: 0,
            text_index: None,
            tools: BTreeMap::new(),
            usage: None,
            pending_stop: None,
        }
    }

    pub fn push_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }

        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }

        let mut events = self.ensure_message_start(&chunk.id);

        for choice in &chunk.choices {
            if let Some(text) = &choice.delta.content
                && !text.is_empty()
            {
                events.extend(self.emit_text(text));
            }
            for delta in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                events.extend(self.emit_tool_delta(delta));
            }
            if let Some(reason) = choice.finish_reason {
                // Usage often arrives in a trailing chunk after finish_reason;
                // hold the stop until the stream ends.
                self.pending_stop = Some(MessageDeltaBody {
                    stop_reason: Some(map_finish_reason(reason)),
                    stop_sequence: None,
                });
            }
        }

        events
    }

    /// Terminate the canonical stream. Called when the upstream emits
    /// `[DONE]` or the body ends.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = self.ensure_message_start("stream");
        if let Some(index) = self.text_index.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        for (_, block) in std::mem::take(&mut self.tools) {
            events.push(StreamEvent::ContentBlockStop { index: block.index });
        }
        events.push(StreamEvent::MessageDelta {
            delta: self.pending_stop.take().unwrap_or_default(),
            usage: DeltaUsage {
                input_tokens: self.usage.as_ref().map(|usage| usage.prompt_tokens),
                output_tokens: self.usage.as_ref().map(|usage| usage.completion_tokens),
            },
        });
        events.push(StreamEvent::MessageStop);
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

    fn emit_tool_delta(&mut self, delta: &ToolCallDelta) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        let block = self.tools.entry(delta.index).or_insert_with(|| ToolBlock {
            index: 0,
            started: false,
            id: String::new(),
            name: String::new(),
        });
        if let Some(id) = &delta.id {
            block.id = id.clone();
        }
        if let Some(name) = delta.function.as_ref().and_then(|f| f.name.clone()) {
            block.name = name;
        }

        if !block.started && !block.name.is_empty() {
            block.started = true;
            block.index = {
                let index = self.next_index;
                self.next_index += 1;
                index
            };
            let id = if block.id.is_empty() {
                format!("tool_{}", delta.index)
            } else {
                block.id.clone()
            };
            events.push(StreamEvent::ContentBlockStart {
                index: block.index,
                content_block: ContentBlock::ToolUse {
                    id,
                    name: block.name.clone(),
                    input: serde_json::Map::new(),
                },
            });
        }

        if block.started
            && let Some(arguments) = delta.function.as_ref().and_then(|f| f.arguments.clone())
            && !arguments.is_empty()
        {
            events.push(StreamEvent::ContentBlockDelta {
                index: block.index,
                delta: ContentDelta::InputJsonDelta {
                    partial_json: arguments,
                },
            });
        }

        events
    }

    fn ensure_message_start(&mut self, id: &str) -> Vec<StreamEvent> {
        if self.message_started {
            return Vec::new();
        }
        self.message_started = true;
        vec![StreamEvent::MessageStart {
            message: Message {
                id: id.to_string(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_protocol::claude::types::StopReason;

    fn chunk(raw: &str) -> ChatCompletionChunk {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn text_deltas_accumulate_under_one_block() {
        let mut translator = OpenAiStreamTranslator::new("m");
        let mut events = translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#,
        ));
        events.extend(translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
        )));
        events.extend(translator.finish());

        let text: String = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hello");

        let stop = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::MessageDelta { delta, .. } => delta.stop_reason,
                _ => None,
            })
            .unwrap();
        assert_eq!(stop, StopReason::EndTurn);
        assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
    }

    #[test]
    fn tool_call_fragments_stream_as_input_json() {
        let mut translator = OpenAiStreamTranslator::new("m");
        let mut events = translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"lookup","arguments":""}}]}}]}"#,
        ));
        events.extend(translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"q\":"}}]}}]}"#,
        )));
        events.extend(translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"x\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        )));
        events.extend(translator.finish());

        let started = events.iter().any(|event| {
            matches!(
                event,
                StreamEvent::ContentBlockStart {
                    content_block: ContentBlock::ToolUse { id, name, .. },
                    ..
                } if id == "call_1" && name == "lookup"
            )
        });
        assert!(started);

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
    fn trailing_usage_chunk_reaches_message_delta() {
        let mut translator = OpenAiStreamTranslator::new("m");
        translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"x"},"finish_reason":"stop"}]}"#,
        ));
        translator.push_chunk(chunk(
            r#"{"id":"c","object":"chat.completion.chunk","created":1,"model":"m","choices":[],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        ));
        let events = translator.finish();
        let usage = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::MessageDelta { usage, .. } => Some(usage.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(usage.input_tokens, Some(3));
        assert_eq!(usage.output_tokens, Some(1));
    }
}
