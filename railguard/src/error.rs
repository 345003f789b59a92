//! Unified error types for guarded model invocations.
//!
//! This module provides the error hierarchy surfaced at the chain boundary:
//! - configuration errors (an identifier that cannot be resolved)
//! - guardrail violations, on the input or output side
//! - retry exhaustion of the output retry loop
//! - collaborator failures (model call, conversation history)

use std::fmt;

use crate::guardrail::{GuardrailFailure, GuardrailPhase, GuardrailResult, Rewrite};
use crate::memory::MemoryError;
use crate::model::ModelError;

/// Result type alias for railguard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed, thread-safe error used for factory and collaborator causes.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for railguard.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A guardrail or accumulator identifier could not be resolved.
    ///
    /// Never retried and never wrapped in a guardrail failure.
    #[error("Could not find {kind} implementation: {id}")]
    Configuration {
        /// What was being resolved.
        kind: ComponentKind,
        /// The identifier that failed to resolve.
        id: String,
        /// Underlying resolution failure.
        #[source]
        source: BoxError,
    },

    /// The composed guardrail result was not a success.
    #[error(transparent)]
    GuardrailViolation(#[from] GuardrailViolation),

    /// The output retry loop reached its attempt limit without a success.
    #[error(
        "Output validation failed. The guardrails have reached the maximum number of retries. Guardrail messages:\n{}",
        join_messages(.failures)
    )]
    RetryExhausted {
        /// The attempt limit that was reached.
        max_attempts: usize,
        /// Failures reported by the last evaluation.
        failures: Vec<GuardrailFailure>,
    },

    /// An output guardrail asked for a retry while checking a streamed response.
    ///
    /// Streams are not retried by the engine; the consumer decides whether to
    /// restart the stream, optionally sending the reprompt first.
    #[error("Output guardrail requested a retry of the streamed response")]
    RetryRequested {
        /// Text the guardrail asked to send before retrying.
        reprompt: Option<String>,
    },

    /// The model collaborator failed.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// The conversation history collaborator failed.
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

impl Error {
    /// Create a configuration error for an identifier that failed to resolve.
    #[must_use]
    pub fn configuration(kind: ComponentKind, id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Configuration {
            kind,
            id: id.into(),
            source: source.into(),
        }
    }

    /// Create a retry exhausted error.
    #[must_use]
    pub const fn retry_exhausted(max_attempts: usize, failures: Vec<GuardrailFailure>) -> Self {
        Self::RetryExhausted {
            max_attempts,
            failures,
        }
    }

    /// Returns `true` for guardrail-originated errors (violation or exhaustion).
    #[must_use]
    pub const fn is_guardrail_error(&self) -> bool {
        matches!(
            self,
            Self::GuardrailViolation(_) | Self::RetryExhausted { .. } | Self::RetryRequested { .. }
        )
    }
}

/// The kind of component a [`Error::Configuration`] failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// An input guardrail.
    InputGuardrail,
    /// An output guardrail.
    OutputGuardrail,
    /// An output token accumulator.
    OutputTokenAccumulator,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputGuardrail => "InputGuardrail",
            Self::OutputGuardrail => "OutputGuardrail",
            Self::OutputTokenAccumulator => "OutputTokenAccumulator",
        })
    }
}

/// Aggregate condition raised when a guardrail chain does not succeed.
///
/// Displays every failure message, one per line. [`source`](std::error::Error::source)
/// returns the first failure cause, if any failure carries one.
#[derive(Debug, Clone)]
pub struct GuardrailViolation {
    /// Which side of the model call failed.
    pub phase: GuardrailPhase,
    /// All failures of the composed result, in execution order.
    pub failures: Vec<GuardrailFailure>,
    /// Rewrite that had been accepted before a fatal failure blocked it.
    pub accepted_rewrite: Option<Rewrite>,
}

impl GuardrailViolation {
    /// Build a violation from a non-success result.
    #[must_use]
    pub fn new(phase: GuardrailPhase, result: GuardrailResult) -> Self {
        let accepted_rewrite = result.accepted_rewrite().cloned();
        Self {
            phase,
            failures: result.into_failures(),
            accepted_rewrite,
        }
    }

    /// Returns `true` if any failure is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.failures.iter().any(|f| f.fatal)
    }

    /// Returns all failure messages joined one per line.
    #[must_use]
    pub fn messages(&self) -> String {
        join_messages(&self.failures)
    }
}

impl fmt::Display for GuardrailViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} guardrail validation failed:", self.phase)?;
        f.write_str(&self.messages())
    }
}

impl std::error::Error for GuardrailViolation {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .iter()
            .find_map(|f| f.cause.as_deref())
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

fn join_messages(failures: &[GuardrailFailure]) -> String {
    failures
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
