//! Commonly used types, for glob import.

pub use crate::config::MethodConfig;
pub use crate::context::MethodContext;
pub use crate::engine::{ChatRequest, GuardrailEngine};
pub use crate::error::{Error, Result};
pub use crate::event::{ChatEvent, ChatEventStream};
pub use crate::guardrail::{
    Guardrail, GuardrailFailure, GuardrailResult, InputGuardrailParams, OutputGuardrailParams,
};
pub use crate::memory::{ChatMemory, InMemoryHistory};
pub use crate::message::{ChatResponse, Message};
pub use crate::model::{ChatModel, StreamingChatModel};
pub use crate::observer::{GuardrailObserver, TracingObserver};
pub use crate::registry::GuardrailRegistry;
pub use crate::retry::OutputGuardrailResponse;
pub use crate::stream::{OutputTokenAccumulator, TokenStream};
