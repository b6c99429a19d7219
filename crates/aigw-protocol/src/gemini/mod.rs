pub mod request;
pub mod response;
pub mod types;

pub use request::{GenerateContentBody, GenerateContentEnvelope};
pub use response::{GenerateContentResponse, decode_response, unwrap_envelope};
pub use types::{
    Blob, Candidate, Content, ContentRole, FileData, FinishReason, FunctionCall,
    FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration, FunctionResponse,
    GenerationConfig, Part, ThinkingConfig, Tool, ToolConfig, UsageMetadata,
};
