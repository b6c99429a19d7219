use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::claude::error::ErrorDetail;
use crate::claude::response::Message;
use crate::claude::types::{ContentBlock, StopReason};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    TextDelta {
        text: String,
    },
    /// Partial JSON string; consumers accumulate until `content_block_stop`.
    InputJsonDelta {
        partial_json: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    SignatureDelta {
        signature: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: Message,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: ContentDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: DeltaUsage,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorDetail,
    },
}

impl StreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Serialize into a wire SSE frame (`event:` + `data:` + blank line).
    pub fn to_frame(&self) -> Bytes {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event_name(), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claude::types::ContentBlock;

    #[test]
    fn event_tag_matches_event_name() {
        let event = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentDelta::TextDelta {
                text: "hi".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "content_block_delta");
        assert_eq!(value["delta"]["type"], "text_delta");
        assert_eq!(event.event_name(), "content_block_delta");
    }

    #[test]
    fn frame_has_event_and_data_lines() {
        let frame = StreamEvent::ContentBlockStop { index: 2 }.to_frame();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: content_block_stop\ndata: "));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn content_block_start_round_trips() {
        let event = StreamEvent::ContentBlockStart {
            index: 1,
            content_block: ContentBlock::text(""),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
