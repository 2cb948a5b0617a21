//! Error types for agentmesh.

use thiserror::Error;

use crate::providers::provider::ProviderError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A topology fragment did not match `<name> (-> | <->) <name>`.
    #[error("Un-parsable topology fragment: {0:?}")]
    Parse(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Duplicate agent: {0}")]
    DuplicateAgent(String),

    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),

    /// A tool result or tool-call argument blob broke the tool contract.
    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn topology(s: impl Into<String>) -> Self {
        Error::Topology(s.into())
    }

    pub fn contract(s: impl Into<String>) -> Self {
        Error::Contract(s.into())
    }
}
