pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use request::ChatCompletionRequest;
pub use response::{ChatCompletion, Choice};
pub use stream::{ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionDelta, ToolCallDelta};
pub use types::{
    ChatMessage, ChatRole, ContentPart, FinishReason, FunctionDef, FunctionSpec, ImageUrl,
    MessageText, StopSequences, ToolCall, ToolChoice, ToolDef, Usage,
};
