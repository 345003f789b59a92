//! Events produced by the streaming model-call path.
//!
//! Events are created per streamed item, forwarded immediately in arrival
//! order, and never persisted.

use std::fmt;
use std::pin::Pin;

use futures::Stream;

use crate::error::Result;
use crate::message::{ChatResponse, Content, ResponseMetadata, ToolExecution};

/// An ordered stream of chat events.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// One event of a streamed model invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The model finished; carries the final response and its metadata.
    Completed(ChatResponse),
    /// A tool requested by the model was executed.
    ToolExecuted(ToolExecution),
    /// A fragment of response text.
    PartialResponse(String),
    /// Retrieval augmentation produced content for this request.
    ContentFetched(Vec<Content>),
    /// Text accumulated from partial responses, ready for output guardrails.
    AccumulatedResponse {
        /// Accumulated text.
        text: String,
        /// Metadata of the completed response, or empty metadata if the
        /// stream had not completed yet.
        metadata: ResponseMetadata,
    },
}

impl ChatEvent {
    /// The discriminant of this event.
    #[must_use]
    pub const fn kind(&self) -> ChatEventKind {
        match self {
            Self::Completed(_) => ChatEventKind::Completed,
            Self::ToolExecuted(_) => ChatEventKind::ToolExecuted,
            Self::PartialResponse(_) => ChatEventKind::PartialResponse,
            Self::ContentFetched(_) => ChatEventKind::ContentFetched,
            Self::AccumulatedResponse { .. } => ChatEventKind::AccumulatedResponse,
        }
    }
}

/// Discriminant of a [`ChatEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatEventKind {
    /// See [`ChatEvent::Completed`].
    Completed,
    /// See [`ChatEvent::ToolExecuted`].
    ToolExecuted,
    /// See [`ChatEvent::PartialResponse`].
    PartialResponse,
    /// See [`ChatEvent::ContentFetched`].
    ContentFetched,
    /// See [`ChatEvent::AccumulatedResponse`].
    AccumulatedResponse,
}

impl fmt::Display for ChatEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::ToolExecuted => "tool_executed",
            Self::PartialResponse => "partial_response",
            Self::ContentFetched => "content_fetched",
            Self::AccumulatedResponse => "accumulated_response",
        })
    }
}
