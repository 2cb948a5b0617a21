//! Completion providers module.

use std::sync::Arc;

pub mod openai;
pub mod provider;

pub use provider::{CompletionRequest, CompletionResponse, Provider, ProviderError, ToolChoice};

use crate::config::ProviderSettings;

/// Provider factory.
pub fn create_provider(settings: &ProviderSettings) -> Arc<dyn Provider> {
    let mut provider = openai::OpenAiProvider::with_base_url(&settings.base_url);
    if let Some(key) = settings.resolve_api_key() {
        provider = provider.with_api_key(key);
    } else {
        tracing::warn!(
            base_url = %settings.base_url,
            "no API key configured; sending unauthenticated requests"
        );
    }
    Arc::new(provider)
}
