//! Completion failures, classified for the retry policy

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("provider unreachable: {0}")]
    Network(String),
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("provider error {status}: {message}")]
    Unavailable {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("credentials rejected: {0}")]
    Auth(String),
    #[error("request rejected: {0}")]
    InvalidRequest(String),
    /// Unexpected status or a body that is not a completion
    #[error("unusable provider response: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        LlmError::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn unavailable(status: u16, message: impl Into<String>) -> Self {
        LlmError::Unavailable {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::RateLimited { .. } | LlmError::Unavailable { .. }
        )
    }

    /// Delay the provider asked for, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after, .. } | LlmError::Unavailable { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Attach a provider-requested delay; ignored on non-retryable errors
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        if let LlmError::RateLimited { retry_after, .. } | LlmError::Unavailable { retry_after, .. } =
            &mut self
        {
            *retry_after = Some(delay);
        }
        self
    }
}
