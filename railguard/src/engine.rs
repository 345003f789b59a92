//! The guardrail engine: guarded model invocations.
//!
//! [`GuardrailEngine`] ties the pieces together for one call of a guarded
//! method:
//!
//! 1. Run the input chain; abort on failure, substitute an accepted rewrite
//!    into the outgoing user message.
//! 2. Record the user message and call the model.
//! 3. Run the output chain, retrying the model call when a guardrail asks
//!    for it ([`chat`](GuardrailEngine::chat)), or check each accumulated
//!    piece of a streamed response
//!    ([`chat_streaming`](GuardrailEngine::chat_streaming)).
//!
//! The engine holds no per-invocation state and can be cloned and shared
//! freely. Per-method caches live in the [`MethodContext`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tracing::{Instrument, debug, info_span};

use crate::context::MethodContext;
use crate::error::{Error, GuardrailViolation, Result};
use crate::event::{ChatEvent, ChatEventStream};
use crate::guardrail::{
    GuardrailPhase, GuardrailResult, InputGuardrailParams, OutputGuardrailParams, ResolvedGuardrail, chain,
};
use crate::memory::{ChatMemory, SharedMemory};
use crate::message::{AugmentationResult, ChatResponse, Message, ToolDefinition};
use crate::model::{ChatModel, StreamingChatModel};
use crate::observer::{AuditSource, GuardrailObserver, NoopObserver};
use crate::registry::GuardrailRegistry;
use crate::retry::{self, OutputGuardrailResponse, RetryContext, RetryDeps};
use crate::stream::{OutputTokenAccumulator, accumulate_default, accumulate_with};

/// One request to a guarded method.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// The user turn to validate and send.
    pub user_message: Message,
    /// Retrieval augmentation applied to the request, if any.
    pub augmentation: Option<AugmentationResult>,
    /// User message template, if any.
    pub template: Option<String>,
    /// Template variables.
    pub variables: HashMap<String, Value>,
    /// Tools offered to the model.
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// A request for `user_message` with no context attached.
    #[must_use]
    pub fn new(user_message: Message) -> Self {
        Self {
            user_message,
            augmentation: None,
            template: None,
            variables: HashMap::new(),
            tools: Vec::new(),
        }
    }

    /// Attach the retrieval augmentation result.
    #[must_use]
    pub fn with_augmentation(mut self, augmentation: AugmentationResult) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    /// Attach the user message template.
    #[must_use]
    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Attach the template variables.
    #[must_use]
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Add a tool.
    #[must_use]
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Input guardrail params for this request against `history`.
    #[must_use]
    pub fn input_params(&self, history: Vec<Message>) -> InputGuardrailParams {
        let mut params = InputGuardrailParams::new(self.user_message.clone(), history)
            .with_variables(self.variables.clone());
        if let Some(augmentation) = &self.augmentation {
            params = params.with_augmentation(augmentation.clone());
        }
        if let Some(template) = &self.template {
            params = params.with_template(template.clone());
        }
        params
    }
}

/// Runs guardrail chains around model calls.
#[derive(Clone)]
pub struct GuardrailEngine {
    registry: Arc<GuardrailRegistry>,
    observer: Arc<dyn GuardrailObserver>,
}

impl GuardrailEngine {
    /// Create an engine resolving guardrails from `registry`.
    #[must_use]
    pub fn new(registry: GuardrailRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report every guardrail execution to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: impl GuardrailObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// The registry guardrails are resolved from.
    #[must_use]
    pub fn registry(&self) -> &GuardrailRegistry {
        &self.registry
    }

    /// Run the input chain of `ctx` and return the composed result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a guardrail cannot be resolved.
    pub async fn run_input_guardrails(
        &self,
        ctx: &MethodContext,
        params: InputGuardrailParams,
    ) -> Result<GuardrailResult> {
        let guardrails = ctx.input_guardrails(&self.registry).await?;
        Ok(chain::run(guardrails, params, self.observer.as_ref(), &ctx.audit_source()).await)
    }

    /// Run the input chain and return the user message to send.
    ///
    /// The message is rewritten if the chain accepted a rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GuardrailViolation`] if the chain did not succeed, or
    /// [`Error::Configuration`] if a guardrail cannot be resolved.
    pub async fn invoke_input_guardrails(
        &self,
        ctx: &MethodContext,
        params: InputGuardrailParams,
    ) -> Result<Message> {
        self.guard_input(ctx, params, &ctx.audit_source()).await
    }

    /// Run the output chain of `ctx` once and return the composed result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a guardrail cannot be resolved.
    pub async fn run_output_guardrails(
        &self,
        ctx: &MethodContext,
        params: OutputGuardrailParams,
    ) -> Result<GuardrailResult> {
        let guardrails = ctx.output_guardrails(&self.registry).await?;
        Ok(chain::run(guardrails, params, self.observer.as_ref(), &ctx.audit_source()).await)
    }

    /// Validate a model response, re-invoking the model while an output
    /// guardrail asks for a retry.
    ///
    /// `response` is the first model turn and must already be recorded in
    /// `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetryExhausted`] when the attempt limit is reached,
    /// [`Error::GuardrailViolation`] on any other failure, or the error of a
    /// failing collaborator.
    pub async fn invoke_output_guardrails(
        &self,
        ctx: &MethodContext,
        memory: &dyn ChatMemory,
        model: &dyn ChatModel,
        response: ChatResponse,
        params: OutputGuardrailParams,
        tools: &[ToolDefinition],
    ) -> Result<OutputGuardrailResponse> {
        let guardrails = ctx.output_guardrails(&self.registry).await?;
        let source = ctx.audit_source();
        let deps = RetryDeps {
            memory,
            model,
            tools,
            observer: self.observer.as_ref(),
            source: &source,
        };
        guard_output(ctx, guardrails, response, params, deps).await
    }

    /// Run the output chain once against an accumulated streamed response.
    ///
    /// Streams are never retried by the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetryRequested`] if a guardrail asked for a retry,
    /// [`Error::GuardrailViolation`] on any other failure, or
    /// [`Error::Configuration`] if a guardrail cannot be resolved.
    pub async fn invoke_output_guardrails_for_stream(
        &self,
        ctx: &MethodContext,
        params: OutputGuardrailParams,
    ) -> Result<GuardrailResult> {
        let guardrails = ctx.output_guardrails(&self.registry).await?;
        check_once(guardrails, params, self.observer.as_ref(), &ctx.audit_source()).await
    }

    /// Fold a model event stream into accumulated responses using the
    /// accumulator configured for `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the accumulator cannot be resolved.
    pub async fn accumulate(&self, ctx: &MethodContext, upstream: ChatEventStream) -> Result<ChatEventStream> {
        let accumulator = ctx.accumulator(&self.registry).await?;
        Ok(accumulate_using(ctx, accumulator.as_deref(), upstream))
    }

    /// Guarded non-streaming call.
    ///
    /// Runs the input chain, records the (possibly rewritten) user message,
    /// calls the model, records its turn, then validates the output with
    /// retries. Every guardrail is resolved before history is touched.
    ///
    /// # Errors
    ///
    /// Any error of [`invoke_input_guardrails`](Self::invoke_input_guardrails)
    /// or [`invoke_output_guardrails`](Self::invoke_output_guardrails), and
    /// collaborator failures.
    pub async fn chat(
        &self,
        ctx: &MethodContext,
        memory: &dyn ChatMemory,
        model: &dyn ChatModel,
        request: ChatRequest,
    ) -> Result<OutputGuardrailResponse> {
        let source = ctx.audit_source();
        let span = info_span!(
            "guarded_chat",
            method = %ctx.method_name(),
            invocation_id = %source.invocation_id,
        );

        async {
            let output_guardrails = ctx.output_guardrails(&self.registry).await?;
            let input = request.input_params(memory.messages().await?);
            let user_message = self.guard_input(ctx, input.clone(), &source).await?;
            memory.add_message(user_message).await?;

            let history = memory.messages().await?;
            let response = model.invoke(&history, &request.tools).await?;
            memory.add_message(response.message.clone()).await?;

            let params = input.to_output(response.message.clone(), memory.messages().await?);
            let deps = RetryDeps {
                memory,
                model,
                tools: &request.tools,
                observer: self.observer.as_ref(),
                source: &source,
            };
            guard_output(ctx, output_guardrails, response, params, deps).await
        }
        .instrument(span)
        .await
    }

    /// Guarded streaming call.
    ///
    /// The input chain runs before the model is called. Without output
    /// guardrails the model's events are forwarded unchanged. Otherwise the
    /// events are accumulated and only checked
    /// [`AccumulatedResponse`](ChatEvent::AccumulatedResponse)s are yielded;
    /// a failing check yields the error and ends the stream.
    ///
    /// The model turn is recorded in `memory` when the `Completed` event
    /// arrives.
    ///
    /// # Errors
    ///
    /// Input violations and resolution errors are returned before anything
    /// is recorded or the model is called. Output violations are yielded as
    /// stream items: [`Error::GuardrailViolation`], or
    /// [`Error::RetryRequested`] when a guardrail asked for a retry.
    pub async fn chat_streaming(
        &self,
        ctx: &MethodContext,
        memory: SharedMemory,
        model: &dyn StreamingChatModel,
        request: ChatRequest,
    ) -> Result<ChatEventStream> {
        let source = ctx.audit_source();
        let span = info_span!(
            "guarded_chat_stream",
            method = %ctx.method_name(),
            invocation_id = %source.invocation_id,
        );

        async {
            let guardrails = ctx.output_guardrails(&self.registry).await?.to_vec();
            let accumulator = ctx.accumulator(&self.registry).await?;

            let input = request.input_params(memory.messages().await?);
            let user_message = self.guard_input(ctx, input.clone(), &source).await?;
            memory.add_message(user_message).await?;

            let history = memory.messages().await?;
            let upstream = record_model_turn(model.invoke_streaming(&history, &request.tools), Arc::clone(&memory));
            if guardrails.is_empty() {
                return Ok(upstream);
            }
            let accumulated = accumulate_using(ctx, accumulator.as_deref(), upstream);

            let checked = CheckedStream {
                guardrails,
                input,
                memory,
                observer: Arc::clone(&self.observer),
                source: source.clone(),
            };
            Ok::<_, Error>(checked.wrap(accumulated))
        }
        .instrument(span)
        .await
    }

    async fn guard_input(
        &self,
        ctx: &MethodContext,
        params: InputGuardrailParams,
        source: &AuditSource,
    ) -> Result<Message> {
        let guardrails = ctx.input_guardrails(&self.registry).await?;
        if guardrails.is_empty() {
            return Ok(params.user_message().clone());
        }

        let user_message = params.user_message().clone();
        let result = chain::run(guardrails, params, self.observer.as_ref(), source).await;
        if !result.is_success() {
            return Err(GuardrailViolation::new(GuardrailPhase::Input, result).into());
        }
        match result.successful_text() {
            Some(text) => {
                debug!(method = %ctx.method_name(), "user message rewritten by input guardrails");
                Ok(InputGuardrailParams::rewrite_user_message(&user_message, text))
            }
            None => Ok(user_message),
        }
    }
}

impl fmt::Debug for GuardrailEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardrailEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Validate `response` against already resolved output guardrails, with retries.
async fn guard_output(
    ctx: &MethodContext,
    guardrails: &[ResolvedGuardrail<OutputGuardrailParams>],
    response: ChatResponse,
    params: OutputGuardrailParams,
    deps: RetryDeps<'_>,
) -> Result<OutputGuardrailResponse> {
    if guardrails.is_empty() {
        return Ok(OutputGuardrailResponse::unchecked(response));
    }
    let state = RetryContext::new(ctx.config().effective_max_retry(), response, params);
    retry::orchestrate(guardrails, state, deps).await
}

fn accumulate_using(
    ctx: &MethodContext,
    accumulator: Option<&dyn OutputTokenAccumulator>,
    upstream: ChatEventStream,
) -> ChatEventStream {
    match accumulator {
        Some(accumulator) => {
            debug!(method = %ctx.method_name(), "custom output accumulation");
            accumulate_with(upstream, accumulator)
        }
        None => accumulate_default(upstream),
    }
}

/// Run the output chain once; any non-success becomes an error.
async fn check_once(
    guardrails: &[ResolvedGuardrail<OutputGuardrailParams>],
    params: OutputGuardrailParams,
    observer: &dyn GuardrailObserver,
    source: &AuditSource,
) -> Result<GuardrailResult> {
    match chain::run(guardrails, params, observer, source).await {
        GuardrailResult::Success(rewrite) => Ok(GuardrailResult::Success(rewrite)),
        GuardrailResult::RetryRequested { reprompt, .. } => Err(Error::RetryRequested { reprompt }),
        other => Err(GuardrailViolation::new(GuardrailPhase::Output, other).into()),
    }
}

/// Append the model turn to `memory` when the stream completes.
fn record_model_turn(upstream: ChatEventStream, memory: SharedMemory) -> ChatEventStream {
    Box::pin(async_stream::try_stream! {
        let mut upstream = upstream;
        while let Some(event) = upstream.next().await {
            let event = event?;
            if let ChatEvent::Completed(response) = &event {
                memory.add_message(response.message.clone()).await?;
            }
            yield event;
        }
    })
}

/// Everything needed to check accumulated responses after the call returned.
struct CheckedStream {
    guardrails: Vec<ResolvedGuardrail<OutputGuardrailParams>>,
    input: InputGuardrailParams,
    memory: SharedMemory,
    observer: Arc<dyn GuardrailObserver>,
    source: AuditSource,
}

impl CheckedStream {
    fn wrap(self, accumulated: ChatEventStream) -> ChatEventStream {
        Box::pin(async_stream::try_stream! {
            let mut accumulated = accumulated;
            while let Some(event) = accumulated.next().await {
                yield self.check(event?).await?;
            }
        })
    }

    async fn check(&self, event: ChatEvent) -> Result<ChatEvent> {
        match event {
            ChatEvent::AccumulatedResponse { text, metadata } => {
                let history = self.memory.messages().await?;
                let params = self.input.to_output(Message::assistant(text.clone()), history);
                let result = check_once(&self.guardrails, params, self.observer.as_ref(), &self.source).await?;

                Ok(ChatEvent::AccumulatedResponse {
                    text: result.successful_text().map_or(text, ToOwned::to_owned),
                    metadata,
                })
            }
            other => Ok(other),
        }
    }
}
