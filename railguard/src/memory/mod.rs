//! Conversation history the engine reads from and appends to.
//!
//! The [`ChatMemory`] trait is the engine's only view of history: append a
//! turn, read the ordered turns back. Retention (windowing, summarisation,
//! persistence) is the implementation's business.
//!
//! The engine appends in exactly these places:
//!
//! - the (possibly rewritten) user message, before the first model call;
//! - each model turn;
//! - a reprompt requested by an output guardrail, before the retried call.

mod error;

pub use error::{MemoryError, MemoryResult};

use std::sync::Mutex;

use async_trait::async_trait;

use crate::message::Message;

/// Async trait for ordered conversation history.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
#[diagnostic::on_unimplemented(
    message = "`{Self}` does not implement the `ChatMemory` trait",
    label = "this type cannot be used as conversation history",
    note = "implement `ChatMemory` to give the engine a place to record turns"
)]
pub trait ChatMemory: Send + Sync {
    /// Appends a message at the end of the history.
    async fn add_message(&self, message: Message) -> MemoryResult<()>;

    /// Returns all messages in chronological order.
    async fn messages(&self) -> MemoryResult<Vec<Message>>;
}

/// A shared, reference-counted history for use across tasks.
pub type SharedMemory = std::sync::Arc<dyn ChatMemory>;

/// Unbounded in-process history.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    messages: Mutex<Vec<Message>>,
}

impl InMemoryHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history seeded with `messages`.
    #[must_use]
    pub const fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    fn lock(&self) -> MemoryResult<std::sync::MutexGuard<'_, Vec<Message>>> {
        self.messages
            .lock()
            .map_err(|e| MemoryError::Lock(e.to_string()))
    }
}

#[async_trait]
impl ChatMemory for InMemoryHistory {
    async fn add_message(&self, message: Message) -> MemoryResult<()> {
        self.lock()?.push(message);
        Ok(())
    }

    async fn messages(&self) -> MemoryResult<Vec<Message>> {
        Ok(self.lock()?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_history_preserves_order() {
        let history = InMemoryHistory::with_messages(vec![Message::system("sys")]);
        history.add_message(Message::user("hi")).await.expect("add");
        history.add_message(Message::assistant("hello")).await.expect("add");

        let texts: Vec<_> = history
            .messages()
            .await
            .expect("messages")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(texts, ["sys", "hi", "hello"]);
    }

    #[test]
    fn test_shared_history_behind_trait_object() {
        let history: SharedMemory = std::sync::Arc::new(InMemoryHistory::new());
        tokio_test::block_on(history.add_message(Message::user("hi"))).expect("add");

        let messages = tokio_test::block_on(history.messages()).expect("messages");
        assert_eq!(messages, [Message::user("hi")]);
    }

    #[test]
    fn test_lock_error_is_retryable() {
        assert!(MemoryError::Lock("poisoned".into()).is_retryable());
        assert!(!MemoryError::storage("redis", "down").is_retryable());
    }
}
