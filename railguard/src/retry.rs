//! Output validation with bounded model retries.
//!
//! The orchestrator evaluates the output chain against the current model
//! turn. A [`RetryRequested`](GuardrailResult::RetryRequested) verdict
//! re-invokes the model, after appending the reprompt (if any) as a user
//! turn; any other non-success aborts. The first model call counts as the
//! first attempt, so a limit of `n` allows at most `n` model invocations.
//!
//! History is only touched on the retry path: once for the reprompt and once
//! for each new model turn.

use tracing::{debug, info, warn};

use crate::error::{Error, GuardrailViolation, Result};
use crate::guardrail::{
    GuardrailPhase, GuardrailResult, OutputGuardrailParams, ResolvedGuardrail, Rewrite, chain,
};
use crate::memory::ChatMemory;
use crate::message::{ChatResponse, Message, ToolDefinition};
use crate::model::ChatModel;
use crate::observer::{AuditSource, GuardrailObserver};

/// A model response that passed the output guardrails.
#[derive(Debug, Clone)]
pub struct OutputGuardrailResponse {
    /// The model response that was validated.
    pub response: ChatResponse,
    /// The composed output chain result, always a success.
    pub result: GuardrailResult,
}

impl OutputGuardrailResponse {
    /// A response that went through no output guardrails.
    #[must_use]
    pub const fn unchecked(response: ChatResponse) -> Self {
        Self {
            response,
            result: GuardrailResult::success(),
        }
    }

    /// Returns `true` if an output guardrail rewrote the response.
    #[must_use]
    pub const fn has_rewritten_result(&self) -> bool {
        self.result.has_rewritten_result()
    }

    /// The rewrite accepted by the output chain, if any.
    #[must_use]
    pub const fn rewritten_result(&self) -> Option<&Rewrite> {
        self.result.rewrite()
    }

    /// The rewritten text if there is one, the model's text otherwise.
    #[must_use]
    pub fn final_text(&self) -> &str {
        self.result
            .successful_text()
            .unwrap_or_else(|| self.response.text())
    }

    /// The response with the rewrite applied to its message.
    #[must_use]
    pub fn into_response(self) -> ChatResponse {
        match self.result.successful_text() {
            Some(text) => ChatResponse {
                message: self.response.message.with_text(text),
                metadata: self.response.metadata,
            },
            None => self.response,
        }
    }
}

/// State of one output validation loop.
#[derive(Debug)]
pub(crate) struct RetryContext {
    attempt: usize,
    max_attempts: usize,
    response: ChatResponse,
    params: OutputGuardrailParams,
}

impl RetryContext {
    /// Start a loop for the first model response.
    pub(crate) fn new(max_attempts: usize, response: ChatResponse, params: OutputGuardrailParams) -> Self {
        Self {
            attempt: 0,
            max_attempts: max_attempts.max(1),
            response,
            params,
        }
    }
}

/// Collaborators the orchestrator calls back into.
#[derive(Clone, Copy)]
pub(crate) struct RetryDeps<'a> {
    pub memory: &'a dyn ChatMemory,
    pub model: &'a dyn ChatModel,
    pub tools: &'a [ToolDefinition],
    pub observer: &'a dyn GuardrailObserver,
    pub source: &'a AuditSource,
}

/// Evaluate `guardrails` until they succeed, abort, or run out of attempts.
pub(crate) async fn orchestrate(
    guardrails: &[ResolvedGuardrail<OutputGuardrailParams>],
    mut retry: RetryContext,
    deps: RetryDeps<'_>,
) -> Result<OutputGuardrailResponse> {
    loop {
        let result = chain::run(guardrails, retry.params.clone(), deps.observer, deps.source).await;
        retry.attempt += 1;

        match result {
            GuardrailResult::Success(rewrite) => {
                debug!(attempt = retry.attempt, rewritten = rewrite.is_some(), "output accepted");
                return Ok(OutputGuardrailResponse {
                    response: retry.response,
                    result: GuardrailResult::Success(rewrite),
                });
            }
            GuardrailResult::RetryRequested { failure, reprompt } => {
                if retry.attempt >= retry.max_attempts {
                    warn!(max_attempts = retry.max_attempts, "output retries exhausted");
                    return Err(Error::retry_exhausted(retry.max_attempts, vec![failure]));
                }
                info!(
                    attempt = retry.attempt,
                    max_attempts = retry.max_attempts,
                    reprompt = reprompt.is_some(),
                    reason = %failure.message,
                    "retrying model call"
                );

                if let Some(reprompt) = reprompt {
                    deps.memory.add_message(Message::user(reprompt)).await?;
                }
                let history = deps.memory.messages().await?;
                let response = deps.model.invoke(&history, deps.tools).await?;
                deps.memory.add_message(response.message.clone()).await?;

                let history = deps.memory.messages().await?;
                retry.params = retry.params.with_response(response.message.clone(), history);
                retry.response = response;
            }
            other => {
                return Err(GuardrailViolation::new(GuardrailPhase::Output, other).into());
            }
        }
    }
}
