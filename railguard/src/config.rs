//! Per-method guardrail configuration.
//!
//! A [`MethodConfig`] names the guardrails and accumulator of one guarded
//! method by registry identifier. Where it comes from (code, a file, an
//! environment) is up to the host; it only needs to deserialize.

use serde::{Deserialize, Serialize};

/// Default number of output evaluation attempts.
pub const DEFAULT_MAX_RETRY: i32 = 3;

/// Guardrail configuration of one guarded method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    /// Input guardrail identifiers, in execution order.
    pub input_guardrails: Vec<String>,
    /// Output guardrail identifiers, in execution order.
    pub output_guardrails: Vec<String>,
    /// Maximum number of output evaluations; values `<= 0` mean 1.
    pub max_retry: i32,
    /// Identifier of a custom output token accumulator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulator: Option<String>,
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self {
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_retry: DEFAULT_MAX_RETRY,
            accumulator: None,
        }
    }
}

impl MethodConfig {
    /// Create a config with no guardrails and the default retry limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input guardrail.
    #[must_use]
    pub fn with_input_guardrail(mut self, id: impl Into<String>) -> Self {
        self.input_guardrails.push(id.into());
        self
    }

    /// Append an output guardrail.
    #[must_use]
    pub fn with_output_guardrail(mut self, id: impl Into<String>) -> Self {
        self.output_guardrails.push(id.into());
        self
    }

    /// Set the maximum number of output evaluations.
    #[must_use]
    pub const fn with_max_retry(mut self, max_retry: i32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Use a custom output token accumulator.
    #[must_use]
    pub fn with_accumulator(mut self, id: impl Into<String>) -> Self {
        self.accumulator = Some(id.into());
        self
    }

    /// The retry limit normalised to at least one attempt.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn effective_max_retry(&self) -> usize {
        if self.max_retry <= 0 {
            1
        } else {
            self.max_retry as usize
        }
    }
}
