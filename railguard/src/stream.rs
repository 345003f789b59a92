//! Accumulation of streamed response fragments into checkable units.
//!
//! Output guardrails validate whole pieces of text, not token fragments. This
//! module folds the [`ChatEvent`] stream of a streaming model call into
//! [`ChatEvent::AccumulatedResponse`] events:
//!
//! - **Default**: concatenate every `PartialResponse` chunk and emit exactly
//!   one accumulated response once the stream ends, carrying the metadata of
//!   the `Completed` event.
//! - **Custom**: an [`OutputTokenAccumulator`] receives the chunk stream and
//!   decides when to emit, e.g. once per sentence. Each emitted string gets
//!   the most recent `Completed` metadata, or empty metadata before completion.
//!
//! Both pipelines are pull-based and keep arrival order. Nothing is buffered
//! beyond the accumulated text and whatever the strategy itself retains.

use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Stream, StreamExt, future};
use tracing::debug;

use crate::error::Result;
use crate::event::{ChatEvent, ChatEventStream};
use crate::message::ResponseMetadata;

/// A stream of response text: chunks going into an accumulator, or the
/// accumulated strings coming out of it.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Strategy deciding how streamed chunks are grouped before validation.
///
/// Errors from the model stream arrive in order as `Err` items; an
/// accumulator should forward them.
///
/// ```rust,ignore
/// struct PerSentence;
///
/// impl OutputTokenAccumulator for PerSentence {
///     fn accumulate(&self, tokens: TokenStream) -> TokenStream {
///         Box::pin(async_stream::try_stream! {
///             let mut tokens = tokens;
///             let mut sentence = String::new();
///             while let Some(chunk) = tokens.next().await {
///                 sentence.push_str(&chunk?);
///                 if sentence.ends_with('.') {
///                     yield std::mem::take(&mut sentence);
///                 }
///             }
///             if !sentence.is_empty() {
///                 yield sentence;
///             }
///         })
///     }
/// }
/// ```
pub trait OutputTokenAccumulator: Send + Sync {
    /// Transform the chunk stream into a stream of accumulated strings.
    fn accumulate(&self, tokens: TokenStream) -> TokenStream;
}

/// Fold state of one in-flight default accumulation.
#[derive(Debug, Default)]
struct AccumulationState {
    text: String,
    metadata: Option<ResponseMetadata>,
}

impl AccumulationState {
    fn observe(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::PartialResponse(chunk) => self.text.push_str(&chunk),
            ChatEvent::Completed(response) => self.metadata = Some(response.metadata),
            ChatEvent::ToolExecuted(_)
            | ChatEvent::ContentFetched(_)
            | ChatEvent::AccumulatedResponse { .. } => {}
        }
    }

    fn finish(self) -> ChatEvent {
        ChatEvent::AccumulatedResponse {
            text: self.text,
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

/// Concatenate all partial responses and emit one accumulated response at end of stream.
#[must_use]
pub fn accumulate_default(upstream: ChatEventStream) -> ChatEventStream {
    Box::pin(async_stream::try_stream! {
        let mut upstream = upstream;
        let mut state = AccumulationState::default();
        while let Some(event) = upstream.next().await {
            state.observe(event?);
        }
        debug!(chars = state.text.len(), "stream accumulated");
        yield state.finish();
    })
}

/// Run the partial responses of `upstream` through `accumulator`.
#[must_use]
pub fn accumulate_with(upstream: ChatEventStream, accumulator: &dyn OutputTokenAccumulator) -> ChatEventStream {
    let latest = Arc::new(Mutex::new(None::<ResponseMetadata>));
    let recorder = Arc::clone(&latest);

    let tokens: TokenStream = Box::pin(upstream.filter_map(move |event| {
        let chunk = match event {
            Ok(ChatEvent::PartialResponse(chunk)) => Some(Ok(chunk)),
            Ok(ChatEvent::Completed(response)) => {
                *lock(&recorder) = Some(response.metadata);
                None
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        };
        future::ready(chunk)
    }));

    Box::pin(accumulator.accumulate(tokens).map(move |item| {
        item.map(|text| ChatEvent::AccumulatedResponse {
            text,
            metadata: lock(&latest).clone().unwrap_or_default(),
        })
    }))
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::error::Error;
    use crate::message::{ChatResponse, Content, Message};
    use crate::model::ModelError;

    fn events(items: Vec<Result<ChatEvent>>) -> ChatEventStream {
        Box::pin(stream::iter(items))
    }

    fn completed(id: &str) -> ChatEvent {
        ChatEvent::Completed(
            ChatResponse::new(Message::assistant("Hello"))
                .with_metadata(ResponseMetadata::default().with_id(id)),
        )
    }

    fn accumulated(event: &ChatEvent) -> (&str, Option<&str>) {
        match event {
            ChatEvent::AccumulatedResponse { text, metadata } => (text, metadata.id.as_deref()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Emits after every `n` chunks and once more for any remainder.
    struct EveryN(usize);

    impl OutputTokenAccumulator for EveryN {
        fn accumulate(&self, tokens: TokenStream) -> TokenStream {
            let n = self.0;
            Box::pin(async_stream::try_stream! {
                let mut tokens = tokens;
                let mut buffer = String::new();
                let mut count = 0;
                while let Some(chunk) = tokens.next().await {
                    buffer.push_str(&chunk?);
                    count += 1;
                    if count == n {
                        count = 0;
                        yield std::mem::take(&mut buffer);
                    }
                }
                if !buffer.is_empty() {
                    yield buffer;
                }
            })
        }
    }

    #[tokio::test]
    async fn test_default_emits_once_at_end() {
        let upstream = events(vec![
            Ok(ChatEvent::PartialResponse("Hel".into())),
            Ok(ChatEvent::ContentFetched(vec![Content::new("doc")])),
            Ok(ChatEvent::PartialResponse("lo".into())),
            Ok(completed("M")),
        ]);

        let out: Vec<_> = accumulate_default(upstream).collect().await;

        assert_eq!(out.len(), 1);
        let event = out[0].as_ref().expect("accumulated");
        assert_eq!(accumulated(event), ("Hello", Some("M")));
    }

    #[tokio::test]
    async fn test_default_on_empty_stream_emits_empty_text() {
        let out: Vec<_> = accumulate_default(events(Vec::new())).collect().await;
        assert_eq!(out.len(), 1);
        let event = out[0].as_ref().expect("accumulated");
        assert_eq!(accumulated(event), ("", None));
    }

    #[tokio::test]
    async fn test_default_propagates_stream_error() {
        let upstream = events(vec![
            Ok(ChatEvent::PartialResponse("Hel".into())),
            Err(ModelError::stream("connection reset").into()),
            Ok(ChatEvent::PartialResponse("lo".into())),
        ]);

        let out: Vec<_> = accumulate_default(upstream).collect().await;

        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(Error::Model(_))));
    }

    #[tokio::test]
    async fn test_custom_emits_incrementally_in_order() {
        let upstream = events(vec![
            Ok(ChatEvent::PartialResponse("a".into())),
            Ok(ChatEvent::PartialResponse("b".into())),
            Ok(ChatEvent::PartialResponse("c".into())),
            Ok(ChatEvent::PartialResponse("d".into())),
            Ok(ChatEvent::PartialResponse("e".into())),
            Ok(completed("M")),
        ]);

        let out: Vec<_> = accumulate_with(upstream, &EveryN(2)).collect().await;
        let out: Vec<_> = out.iter().map(|e| accumulated(e.as_ref().expect("ok"))).collect();

        // Chunks emitted before completion carry empty metadata.
        assert_eq!(out, [("ab", None), ("cd", None), ("e", Some("M"))]);
    }

    #[tokio::test]
    async fn test_custom_may_emit_nothing() {
        struct Silent;
        impl OutputTokenAccumulator for Silent {
            fn accumulate(&self, tokens: TokenStream) -> TokenStream {
                Box::pin(tokens.filter_map(|_| future::ready(None)))
            }
        }

        let upstream = events(vec![Ok(ChatEvent::PartialResponse("a".into())), Ok(completed("M"))]);
        let out: Vec<_> = accumulate_with(upstream, &Silent).collect().await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_custom_sees_only_partial_chunks() {
        struct Echo;
        impl OutputTokenAccumulator for Echo {
            fn accumulate(&self, tokens: TokenStream) -> TokenStream {
                tokens
            }
        }

        let upstream = events(vec![
            Ok(ChatEvent::ContentFetched(Vec::new())),
            Ok(ChatEvent::PartialResponse("x".into())),
            Ok(completed("M")),
            Ok(ChatEvent::PartialResponse("y".into())),
        ]);
        let out: Vec<_> = accumulate_with(upstream, &Echo).collect().await;
        let out: Vec<_> = out.iter().map(|e| accumulated(e.as_ref().expect("ok"))).collect();

        assert_eq!(out, [("x", None), ("y", Some("M"))]);
    }
}
