//! Guardrail module: validation and rewriting of model inputs and outputs.
//!
//! A guardrail inspects the text flowing into or out of a model call and
//! returns a [`GuardrailResult`]:
//!
//! - **Success**, optionally carrying a [`Rewrite`] that replaces the text
//!   seen by later guardrails and by the caller.
//! - **Failure**: one or more [`GuardrailFailure`]s. A failure marked fatal
//!   stops the chain immediately.
//! - **RetryRequested** (output side only) asks the engine to call the model
//!   again, optionally after appending a reprompt to the conversation.
//!
//! Guardrails run sequentially in declaration order because a later
//! guardrail must see the text rewritten by an earlier one.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use railguard::guardrail::{Guardrail, GuardrailResult, InputGuardrailParams};
//!
//! struct NoShouting;
//!
//! #[async_trait::async_trait]
//! impl Guardrail<InputGuardrailParams> for NoShouting {
//!     async fn validate(&self, params: &InputGuardrailParams) -> GuardrailResult {
//!         let text = params.user_message().text();
//!         if text.chars().any(char::is_uppercase) {
//!             GuardrailResult::success_with(text.to_lowercase())
//!         } else {
//!             GuardrailResult::success()
//!         }
//!     }
//! }
//! ```

pub(crate) mod chain;
mod input;
mod output;

pub use input::InputGuardrailParams;
pub use output::OutputGuardrailParams;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::observer::ExecutedParams;

/// Which side of the model call a guardrail protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardrailPhase {
    /// Runs on the user message before the model is called.
    Input,
    /// Runs on the model response.
    Output,
}

impl fmt::Display for GuardrailPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "Input",
            Self::Output => "Output",
        })
    }
}

/// Text (and optionally a structured value) accepted in place of the original.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rewrite {
    /// Replacement text.
    pub text: String,
    /// Structured replacement result, for output guardrails that also parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Rewrite {
    /// A text-only rewrite.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            result: None,
        }
    }
}

/// A single guardrail failure.
#[derive(Clone)]
pub struct GuardrailFailure {
    /// Identifier of the guardrail that reported it, once known.
    pub guardrail: Option<String>,
    /// Human-readable failure message.
    pub message: String,
    /// Underlying error, if the guardrail failed because of one.
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// Whether this failure aborts the chain.
    pub fatal: bool,
    /// Set when a retry was converted into a hard failure by [`GuardrailResult::block_retry`].
    pub retry_blocked: bool,
}

impl GuardrailFailure {
    /// A non-fatal failure with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            guardrail: None,
            message: message.into(),
            cause: None,
            fatal: false,
            retry_blocked: false,
        }
    }

    /// A fatal failure with the given message.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            fatal: true,
            ..Self::new(message)
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    fn attributed_to(mut self, guardrail: &str) -> Self {
        if self.guardrail.is_none() {
            self.guardrail = Some(guardrail.to_owned());
        }
        self
    }
}

impl fmt::Debug for GuardrailFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardrailFailure")
            .field("guardrail", &self.guardrail)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .field("fatal", &self.fatal)
            .field("retry_blocked", &self.retry_blocked)
            .finish()
    }
}

impl fmt::Display for GuardrailFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.guardrail {
            Some(id) => write!(f, "The guardrail {id} failed with this message: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// The outcome of one guardrail, or of a whole chain once composed.
#[derive(Debug, Clone)]
pub enum GuardrailResult {
    /// Validation passed, optionally with a rewrite.
    Success(Option<Rewrite>),
    /// Validation failed. Fatal iff any failure is fatal.
    Failure(Vec<GuardrailFailure>),
    /// The model should be called again (output guardrails only).
    RetryRequested {
        /// Why the retry was requested.
        failure: GuardrailFailure,
        /// Optional user turn to append before the next model call.
        reprompt: Option<String>,
    },
    /// A fatal failure that arrived after an earlier rewrite had been accepted.
    ///
    /// Produced by [`block_retry`](Self::block_retry); keeps the accepted
    /// rewrite so it is reported rather than silently dropped.
    Blocked {
        /// Failures of the blocked result, all fatal and non-retryable.
        failures: Vec<GuardrailFailure>,
        /// The rewrite accepted before the failure.
        accepted: Rewrite,
    },
}

impl Default for GuardrailResult {
    fn default() -> Self {
        Self::success()
    }
}

impl GuardrailResult {
    /// A plain success.
    #[must_use]
    pub const fn success() -> Self {
        Self::Success(None)
    }

    /// A success that rewrites the guarded text.
    #[must_use]
    pub fn success_with(text: impl Into<String>) -> Self {
        Self::Success(Some(Rewrite::text(text)))
    }

    /// A success that rewrites the text and supplies a structured result.
    #[must_use]
    pub fn success_with_result(text: impl Into<String>, result: Value) -> Self {
        Self::Success(Some(Rewrite {
            text: text.into(),
            result: Some(result),
        }))
    }

    /// A single non-fatal failure.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(vec![GuardrailFailure::new(message)])
    }

    /// A single failure carrying its underlying cause.
    #[must_use]
    pub fn failure_with_cause(
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failure(vec![GuardrailFailure::new(message).with_cause(cause)])
    }

    /// A single fatal failure.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Failure(vec![GuardrailFailure::fatal(message)])
    }

    /// Build a failure from a list of failures; an empty list is a success.
    #[must_use]
    pub fn from_failures(failures: Vec<GuardrailFailure>) -> Self {
        if failures.is_empty() {
            Self::success()
        } else {
            Self::Failure(failures)
        }
    }

    /// Ask for the model to be called again with the history unchanged.
    #[must_use]
    pub fn retry(message: impl Into<String>) -> Self {
        Self::RetryRequested {
            failure: GuardrailFailure::fatal(message),
            reprompt: None,
        }
    }

    /// Ask for the model to be called again after appending `reprompt` as a user turn.
    #[must_use]
    pub fn reprompt(message: impl Into<String>, reprompt: impl Into<String>) -> Self {
        Self::RetryRequested {
            failure: GuardrailFailure::fatal(message),
            reprompt: Some(reprompt.into()),
        }
    }

    /// Returns `true` for a success, with or without rewrite.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` if this result terminates a chain.
    ///
    /// A failure is fatal iff any of its failures is fatal. Retry requests
    /// and blocked results are always fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Success(_) => false,
            Self::Failure(failures) => failures.iter().any(|f| f.fatal),
            Self::RetryRequested { .. } | Self::Blocked { .. } => true,
        }
    }

    /// Returns `true` for a retry request.
    #[must_use]
    pub const fn is_retry(&self) -> bool {
        matches!(self, Self::RetryRequested { .. })
    }

    /// Returns the reprompt text of a retry request.
    #[must_use]
    pub fn reprompt_text(&self) -> Option<&str> {
        match self {
            Self::RetryRequested { reprompt, .. } => reprompt.as_deref(),
            _ => None,
        }
    }

    /// Returns the failures of this result (empty for a success).
    #[must_use]
    pub fn failures(&self) -> &[GuardrailFailure] {
        match self {
            Self::Success(_) => &[],
            Self::Failure(failures) | Self::Blocked { failures, .. } => failures,
            Self::RetryRequested { failure, .. } => std::slice::from_ref(failure),
        }
    }

    /// Consumes the result and returns its failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<GuardrailFailure> {
        match self {
            Self::Success(_) => Vec::new(),
            Self::Failure(failures) | Self::Blocked { failures, .. } => failures,
            Self::RetryRequested { failure, .. } => vec![failure],
        }
    }

    /// Returns the rewrite of a successful result.
    #[must_use]
    pub const fn rewrite(&self) -> Option<&Rewrite> {
        match self {
            Self::Success(rewrite) => rewrite.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` if this is a success carrying a rewrite.
    #[must_use]
    pub const fn has_rewritten_result(&self) -> bool {
        self.rewrite().is_some()
    }

    /// The accepted rewritten text; `None` unless this is a rewriting success.
    #[must_use]
    pub fn successful_text(&self) -> Option<&str> {
        self.rewrite().map(|r| r.text.as_str())
    }

    /// The accepted structured result; `None` unless a rewriting success supplied one.
    #[must_use]
    pub fn successful_result(&self) -> Option<&Value> {
        self.rewrite().and_then(|r| r.result.as_ref())
    }

    /// The rewrite that was accepted before this result was blocked.
    #[must_use]
    pub const fn accepted_rewrite(&self) -> Option<&Rewrite> {
        match self {
            Self::Blocked { accepted, .. } => Some(accepted),
            _ => None,
        }
    }

    /// The first underlying cause among the failures, if any.
    #[must_use]
    pub fn first_failure_cause(&self) -> Option<&(dyn std::error::Error + Send + Sync)> {
        self.failures().iter().find_map(|f| f.cause.as_deref())
    }

    /// Stamp `guardrail` on every failure that has no identifier yet.
    #[must_use]
    pub fn validated_by(self, guardrail: &str) -> Self {
        match self {
            Self::Success(_) => self,
            Self::Failure(failures) => {
                Self::Failure(failures.into_iter().map(|f| f.attributed_to(guardrail)).collect())
            }
            Self::RetryRequested { failure, reprompt } => Self::RetryRequested {
                failure: failure.attributed_to(guardrail),
                reprompt,
            },
            Self::Blocked { failures, accepted } => Self::Blocked {
                failures: failures.into_iter().map(|f| f.attributed_to(guardrail)).collect(),
                accepted,
            },
        }
    }

    /// Convert this result into a hard, non-retryable failure that keeps
    /// the previously accepted rewrite.
    ///
    /// A success is returned unchanged.
    #[must_use]
    pub fn block_retry(self, accepted: Rewrite) -> Self {
        if self.is_success() {
            return self;
        }
        let failures = self
            .into_failures()
            .into_iter()
            .map(|f| GuardrailFailure {
                fatal: true,
                retry_blocked: true,
                ..f
            })
            .collect();
        Self::Blocked { failures, accepted }
    }

    /// Fold `next` into this accumulated result.
    ///
    /// Success is the identity: `Success ⊕ X = X` and `X ⊕ Success = X`.
    /// Two failures concatenate their failure lists in execution order.
    /// When both sides succeed, the most recent rewrite wins.
    #[must_use]
    pub fn compose(self, next: Self) -> Self {
        match (self, next) {
            (Self::Success(previous), Self::Success(latest)) => Self::Success(latest.or(previous)),
            (Self::Success(_), other) | (other, Self::Success(_)) => other,
            (Self::Failure(mut failures), Self::Failure(more)) => {
                failures.extend(more);
                Self::Failure(failures)
            }
            (previous, next) => {
                let mut failures = previous.into_failures();
                failures.extend(next.into_failures());
                Self::Failure(failures)
            }
        }
    }
}

/// Parameters handed to a guardrail.
///
/// Params are immutable: a rewrite produces a new value through
/// [`with_text`](Self::with_text).
pub trait GuardrailParams: Clone + Send + Sync + 'static {
    /// Which side of the model call these params belong to.
    const PHASE: GuardrailPhase;

    /// The text under validation.
    fn text(&self) -> &str;

    /// A copy of these params with the guarded text replaced.
    #[must_use]
    fn with_text(&self, text: &str) -> Self;

    /// Borrowed view handed to the observer.
    fn as_executed(&self) -> ExecutedParams<'_>;
}

/// A validator run against the input to, or output from, a model call.
///
/// Implement `Guardrail<InputGuardrailParams>` for an input guardrail and
/// `Guardrail<OutputGuardrailParams>` for an output guardrail.
#[async_trait]
pub trait Guardrail<P: GuardrailParams>: Send + Sync {
    /// Validate the params and return a verdict.
    ///
    /// Errors raised while validating are reported as failures carrying
    /// their cause (see [`GuardrailResult::failure_with_cause`]).
    async fn validate(&self, params: &P) -> GuardrailResult;
}

/// A type-erased input guardrail.
pub type InputGuardrail = dyn Guardrail<InputGuardrailParams>;

/// A type-erased output guardrail.
pub type OutputGuardrail = dyn Guardrail<OutputGuardrailParams>;

/// A guardrail instance resolved from the registry, with its identifier.
pub struct ResolvedGuardrail<P: GuardrailParams> {
    /// Registry identifier.
    pub id: String,
    /// The instance.
    pub guardrail: Arc<dyn Guardrail<P>>,
}

impl<P: GuardrailParams> Clone for ResolvedGuardrail<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            guardrail: Arc::clone(&self.guardrail),
        }
    }
}

impl<P: GuardrailParams> fmt::Debug for ResolvedGuardrail<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedGuardrail")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
