#![cfg_attr(docsrs, feature(doc_cfg))]
//! Railguard is a guardrail execution engine for language-model calls.
//!
//! It runs ordered chains of validators around a model invocation:
//!
//! - **Input guardrails** check (and may rewrite) the user message before the
//!   model is called.
//! - **Output guardrails** check (and may rewrite) the model response, and may
//!   ask for the model to be called again, optionally with a reprompt.
//! - **Streamed responses** are accumulated into checkable pieces before the
//!   output guardrails see them.
//!
//! The model, the conversation history and the audit sink are collaborators
//! behind traits ([`ChatModel`], [`StreamingChatModel`], [`ChatMemory`],
//! [`GuardrailObserver`]); guardrails are looked up by identifier in a
//! [`GuardrailRegistry`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use railguard::prelude::*;
//!
//! let engine = GuardrailEngine::new(
//!     GuardrailRegistry::new()
//!         .input_guardrail("no-secrets", NoSecrets)
//!         .output_guardrail("json", JsonOnly),
//! );
//! let ctx = MethodContext::new(
//!     "Assistant",
//!     "chat",
//!     MethodConfig::new()
//!         .with_input_guardrail("no-secrets")
//!         .with_output_guardrail("json")
//!         .with_max_retry(2),
//! );
//!
//! let memory = InMemoryHistory::new();
//! let response = engine
//!     .chat(&ctx, &memory, &model, ChatRequest::new(Message::user("List three colors")))
//!     .await?;
//! println!("{}", response.final_text());
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod event;
pub mod guardrail;
pub mod memory;
pub mod message;
pub mod model;
pub mod observer;
pub mod prelude;
pub mod registry;
pub mod retry;
pub mod stream;

pub use config::MethodConfig;
pub use context::MethodContext;
pub use engine::{ChatRequest, GuardrailEngine};
pub use error::{Error, GuardrailViolation, Result};
pub use event::{ChatEvent, ChatEventStream};
pub use guardrail::{
    Guardrail, GuardrailFailure, GuardrailParams, GuardrailPhase, GuardrailResult, InputGuardrailParams,
    OutputGuardrailParams, Rewrite,
};
pub use memory::{ChatMemory, InMemoryHistory};
pub use message::{ChatResponse, Message, ResponseMetadata, Role};
pub use model::{ChatModel, ModelError, StreamingChatModel};
pub use observer::{AuditSource, GuardrailObserver, NoopObserver, TracingObserver};
pub use registry::GuardrailRegistry;
pub use retry::OutputGuardrailResponse;
pub use stream::{OutputTokenAccumulator, TokenStream};
