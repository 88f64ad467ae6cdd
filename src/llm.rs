//! Completion provider seam
//!
//! Every generation and classification call ends up as one
//! `LlmService::complete`. The registry picks the provider; `LoggingService`
//! wraps whatever it picks.

mod error;
mod openai;
mod registry;
mod types;

pub use error::LlmError;
pub use openai::{OpenAIModel, OpenAIService};
pub use registry::{LlmConfig, ModelRegistry};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

/// Emits one event per completion with latency and token counts
pub struct LoggingService {
    inner: Arc<dyn LlmService>,
}

impl LoggingService {
    pub fn new(inner: Arc<dyn LlmService>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LlmService for LoggingService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let result = self.inner.complete(request).await;
        let elapsed_ms = start.elapsed().as_millis();

        match &result {
            Ok(response) => tracing::info!(
                model = %self.inner.model_id(),
                elapsed_ms,
                messages = request.messages.len(),
                offered = request.tools.len(),
                forced = request.forced_tool.as_deref().unwrap_or("-"),
                prompt_tokens = response.usage.prompt,
                completion_tokens = response.usage.completion,
                calls = response.calls.len(),
                "Completion finished"
            ),
            Err(e) => tracing::error!(
                model = %self.inner.model_id(),
                elapsed_ms,
                error = %e,
                retryable = e.is_retryable(),
                "Completion failed"
            ),
        }

        result
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
