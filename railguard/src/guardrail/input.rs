//! Input guardrail parameters.
//!
//! Input guardrails validate the user message before the model is called,
//! so that off-topic, unsafe or policy-violating requests are rejected (or
//! rewritten) without incurring a model call.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::message::{AugmentationResult, Message};
use crate::observer::ExecutedParams;

use super::output::OutputGuardrailParams;
use super::{GuardrailParams, GuardrailPhase};

/// What an input guardrail sees: the outgoing user message and its context.
#[derive(Debug, Clone)]
pub struct InputGuardrailParams {
    user_message: Message,
    history: Arc<[Message]>,
    augmentation: Option<AugmentationResult>,
    template: Option<String>,
    variables: Arc<HashMap<String, Value>>,
}

impl InputGuardrailParams {
    /// Create params for `user_message` with a snapshot of the conversation so far.
    #[must_use]
    pub fn new(user_message: Message, history: impl Into<Arc<[Message]>>) -> Self {
        Self {
            user_message,
            history: history.into(),
            augmentation: None,
            template: None,
            variables: Arc::default(),
        }
    }

    /// Attach the retrieval augmentation result.
    #[must_use]
    pub fn with_augmentation(mut self, augmentation: AugmentationResult) -> Self {
        self.augmentation = Some(augmentation);
        self
    }

    /// Attach the user message template the message was rendered from.
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

    /// The user message under validation.
    #[must_use]
    pub const fn user_message(&self) -> &Message {
        &self.user_message
    }

    /// Conversation history preceding the user message.
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

    /// Output params sharing this request's augmentation, template and variables.
    #[must_use]
    pub fn to_output(
        &self,
        response: Message,
        history: impl Into<Arc<[Message]>>,
    ) -> OutputGuardrailParams {
        OutputGuardrailParams::from_parts(
            response,
            history.into(),
            self.augmentation.clone(),
            self.template.clone(),
            Arc::clone(&self.variables),
        )
    }

    /// Replace the text of `user_message` with the text accepted by the input chain.
    #[must_use]
    pub fn rewrite_user_message(user_message: &Message, text: &str) -> Message {
        user_message.with_text(text)
    }
}

impl GuardrailParams for InputGuardrailParams {
    const PHASE: GuardrailPhase = GuardrailPhase::Input;

    fn text(&self) -> &str {
        self.user_message.text()
    }

    fn with_text(&self, text: &str) -> Self {
        Self {
            user_message: self.user_message.with_text(text),
            ..self.clone()
        }
    }

    fn as_executed(&self) -> ExecutedParams<'_> {
        ExecutedParams::Input(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_text_leaves_original_untouched() {
        let mut vars = HashMap::new();
        vars.insert("topic".to_owned(), Value::from("rust"));
        let params = InputGuardrailParams::new(Message::user("Hi there"), vec![Message::system("sys")])
            .with_template("Talk about {topic}")
            .with_variables(vars);

        let rewritten = params.with_text("hi there");

        assert_eq!(params.text(), "Hi there");
        assert_eq!(rewritten.text(), "hi there");
        assert_eq!(rewritten.template(), Some("Talk about {topic}"));
        assert_eq!(rewritten.variables()["topic"], "rust");
        assert_eq!(rewritten.history().len(), 1);
    }

    #[test]
    fn test_to_output_shares_context() {
        let params = InputGuardrailParams::new(Message::user("q"), Vec::new())
            .with_augmentation(AugmentationResult {
                contents: vec![crate::message::Content::new("doc")],
            });
        let output = params.to_output(Message::assistant("a"), vec![Message::user("q")]);

        assert_eq!(output.text(), "a");
        assert_eq!(output.augmentation().map(|a| a.contents.len()), Some(1));
    }
}
