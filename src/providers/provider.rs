//! Completion provider trait for agentmesh.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{Entry, ToolCallRequest};
use crate::tools::ToolDefinition;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

impl ProviderError {
    pub fn other(s: impl Into<String>) -> Self {
        ProviderError::Other(s.into())
    }
}

/// How the model may use the tools it is offered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    /// Force a call to the named tool.
    Function(String),
}

/// Everything the completion service needs for one turn.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Agent issuing the request.
    pub agent: &'a str,
    pub model: &'a str,
    pub messages: &'a [Entry],
    /// Empty when the agent has no tools.
    pub tools: &'a [ToolDefinition],
    /// Only sent when `tools` is non-empty.
    pub tool_choice: Option<&'a ToolChoice>,
    pub temperature: f32,
}

/// One assistant response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Language-model completion service.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name.
    fn name(&self) -> &str;

    /// Run one completion over the agent's buffer.
    async fn complete(&self, request: CompletionRequest<'_>) -> Result<CompletionResponse>;
}
