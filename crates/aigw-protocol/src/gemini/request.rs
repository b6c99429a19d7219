use serde::{Deserialize, Serialize};

use crate::gemini::types::{Content, GenerationConfig, Tool, ToolConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentBody {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// Wire envelope for the internal generate endpoint: the upstream wants the
/// model name beside the request body rather than in the URL path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateContentEnvelope {
    pub model: String,
    pub request: GenerateContentBody,
}
