//! The model-call collaborator.
//!
//! The engine never talks to a provider directly. It calls a [`ChatModel`]
//! for a single response or a [`StreamingChatModel`] for an ordered event
//! stream, passing the full conversation and the tool definitions.
//!
//! Implementations report failures as [`ModelError`]. The engine never
//! retries a model error itself; it surfaces it as
//! [`Error::Model`](crate::Error::Model) and leaves the decision to the
//! caller through [`ModelError::is_retryable`].

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::ChatEventStream;
use crate::message::{ChatResponse, Message, ToolDefinition};

/// A model that answers with one complete response.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Call the model with the conversation so far.
    async fn invoke(&self, history: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse>;
}

/// A model that answers with an ordered stream of [`ChatEvent`](crate::event::ChatEvent)s.
///
/// The stream has a single producer and ends after the
/// [`Completed`](crate::event::ChatEvent::Completed) event.
pub trait StreamingChatModel: Send + Sync {
    /// Start a streaming call with the conversation so far.
    fn invoke_streaming(&self, history: &[Message], tools: &[ToolDefinition]) -> ChatEventStream;
}

/// Error type for model-call failures.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ModelError {
    /// The error kind.
    pub kind: ModelErrorKind,
    /// The provider name (e.g., "openai", "ollama").
    pub provider: Option<String>,
    /// Error message.
    pub message: String,
}

/// Categories of model errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelErrorKind {
    /// Rate limit exceeded.
    RateLimited,
    /// Network or connection error.
    Network,
    /// Streaming error.
    Stream,
    /// Provider-specific error.
    Provider,
}

impl ModelError {
    /// Create a rate limit error.
    #[must_use]
    pub fn rate_limited(provider: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::RateLimited,
            provider: Some(provider.into()),
            message: "Rate limit exceeded. Please retry after some time.".into(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Network,
            provider: None,
            message: message.into(),
        }
    }

    /// Create a streaming error.
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Stream,
            provider: None,
            message: message.into(),
        }
    }

    /// Create a provider-specific error.
    #[must_use]
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::Provider,
            provider: Some(provider.into()),
            message: message.into(),
        }
    }

    /// Check if this is a retryable error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind, ModelErrorKind::RateLimited | ModelErrorKind::Network)
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{provider}] ")?;
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for ModelError {}
