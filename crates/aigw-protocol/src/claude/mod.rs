pub mod error;
pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use error::{ErrorDetail, ErrorEnvelope};
pub use request::MessagesRequest;
pub use response::Message;
pub use stream::{ContentDelta, DeltaUsage, MessageDeltaBody, StreamEvent};
pub use types::{
    ContentBlock, ImageSource, MessageContent, MessageParam, Metadata, Role, StopReason,
    SystemPrompt, ThinkingConfig, Tool, ToolChoice, ToolInputSchema, ToolResultContent, Usage,
};
