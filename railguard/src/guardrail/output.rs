//! Output guardrail parameters.
//!
//! Output guardrails validate the model response before it is handed back,
//! enabling rejection of responses that violate policies, contain PII or
//! fail format checks. Unlike input guardrails they may ask for a retry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::message::{AugmentationResult, Message};
use crate::observer::ExecutedParams;

use super::{GuardrailParams, GuardrailPhase};

/// What an output guardrail sees: the model turn and the request context.
#[derive(Debug, Clone)]
pub struct OutputGuardrailParams {
    response_message: Message,
    history: Arc<[Message]>,
    augmentation: Option<AugmentationResult>,
    template: Option<String>,
    variables: Arc<HashMap<String, Value>>,
}

impl OutputGuardrailParams {
    /// Create params for a model turn with a snapshot of the conversation.
    #[must_use]
    pub fn new(response_message: Message, history: impl Into<Arc<[Message]>>) -> Self {
        Self::from_parts(response_message, history.into(), None, None, Arc::default())
    }

    pub(super) const fn from_parts(
        response_message: Message,
        history: Arc<[Message]>,
        augmentation: Option<AugmentationResult>,
        template: Option<String>,
        variables: Arc<HashMap<String, Value>>,
    ) -> Self {
        Self {
            response_message,
            history,
            augmentation,
            template,
            variables,
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

    /// Attach the template variables. Guardrails get read-only access.
    #[must_use]
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    /// Params for a new model turn, keeping the request context.
    #[must_use]
    pub fn with_response(&self, response_message: Message, history: impl Into<Arc<[Message]>>) -> Self {
        Self {
            response_message,
            history: history.into(),
            ..self.clone()
        }
    }

    /// The model turn under validation.
    #[must_use]
    pub const fn response_message(&self) -> &Message {
        &self.response_message
    }

    /// Conversation history, including the model turn once it was recorded.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Retrieval augmentation result, if any.
    #[must_use]
    pub const fn augmentation(&self) -> Option<&AugmentationResult> {
        self.augmentation.as_ref()
    }

    /// User message template, if any.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    /// Template variables.
    #[must_use]
    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }
}

impl GuardrailParams for OutputGuardrailParams {
    const PHASE: GuardrailPhase = GuardrailPhase::Output;

    fn text(&self) -> &str {
        self.response_message.text()
    }

    fn with_text(&self, text: &str) -> Self {
        Self {
            response_message: self.response_message.with_text(text),
            ..self.clone()
        }
    }

    fn as_executed(&self) -> ExecutedParams<'_> {
        ExecutedParams::Output(self)
    }
}
