//! LLM client boundary
//!
//! The trait, the Anthropic implementation, the retry helper, and the wire
//! types the orchestrator exchanges with the model service.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
mod client;
mod error;
pub mod mock;
mod retry;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use retry::{with_retries, RetryPolicy};
pub use types::{
    strip_code_fences, Decomposition, DecomposedTaskSpec, DependencySignature, GenerationContext,
    RegenerationContext,
};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        other => Err(LlmError::InvalidResponse(format!(
            "Unknown LLM provider: '{}'. Supported: anthropic",
            other
        ))),
    }
}
