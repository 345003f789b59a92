//! Registry mapping identifiers to guardrail and accumulator factories.
//!
//! Guardrails are configured by identifier; the registry turns an identifier
//! into an instance. Registering an instance shares it across every method
//! that names it; registering a factory lets each method context build its
//! own.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, ComponentKind, Error, Result};
use crate::guardrail::{Guardrail, InputGuardrail, InputGuardrailParams, OutputGuardrail, OutputGuardrailParams};
use crate::stream::OutputTokenAccumulator;

/// Builds a component instance on first resolution.
pub type Factory<T> = Arc<dyn Fn() -> std::result::Result<Arc<T>, BoxError> + Send + Sync>;

/// Raised when no factory is registered under an identifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no implementation registered under '{0}'")]
pub struct NotRegistered(pub String);

/// A collection of guardrail and accumulator factories keyed by identifier.
#[derive(Default, Clone)]
pub struct GuardrailRegistry {
    input: HashMap<String, Factory<InputGuardrail>>,
    output: HashMap<String, Factory<OutputGuardrail>>,
    accumulators: HashMap<String, Factory<dyn OutputTokenAccumulator>>,
}

impl GuardrailRegistry {
    /// Create a new empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shared input guardrail instance.
    #[must_use]
    pub fn input_guardrail(
        self,
        id: impl Into<String>,
        guardrail: impl Guardrail<InputGuardrailParams> + 'static,
    ) -> Self {
        let instance: Arc<InputGuardrail> = Arc::new(guardrail);
        self.input_factory(id, move || Ok(Arc::clone(&instance)))
    }

    /// Register a factory building an input guardrail.
    #[must_use]
    pub fn input_factory<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<Arc<InputGuardrail>, BoxError> + Send + Sync + 'static,
    {
        self.input.insert(id.into(), Arc::new(factory));
        self
    }

    /// Register a shared output guardrail instance.
    #[must_use]
    pub fn output_guardrail(
        self,
        id: impl Into<String>,
        guardrail: impl Guardrail<OutputGuardrailParams> + 'static,
    ) -> Self {
        let instance: Arc<OutputGuardrail> = Arc::new(guardrail);
        self.output_factory(id, move || Ok(Arc::clone(&instance)))
    }

    /// Register a factory building an output guardrail.
    #[must_use]
    pub fn output_factory<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<Arc<OutputGuardrail>, BoxError> + Send + Sync + 'static,
    {
        self.output.insert(id.into(), Arc::new(factory));
        self
    }

    /// Register a shared output token accumulator instance.
    #[must_use]
    pub fn accumulator(self, id: impl Into<String>, accumulator: impl OutputTokenAccumulator + 'static) -> Self {
        let instance: Arc<dyn OutputTokenAccumulator> = Arc::new(accumulator);
        self.accumulator_factory(id, move || Ok(Arc::clone(&instance)))
    }

    /// Register a factory building an output token accumulator.
    #[must_use]
    pub fn accumulator_factory<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> std::result::Result<Arc<dyn OutputTokenAccumulator>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.accumulators.insert(id.into(), Arc::new(factory));
        self
    }

    /// Resolve an input guardrail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `id` is unknown or its factory fails.
    pub fn resolve_input(&self, id: &str) -> Result<Arc<InputGuardrail>> {
        resolve(&self.input, ComponentKind::InputGuardrail, id)
    }

    /// Resolve an output guardrail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `id` is unknown or its factory fails.
    pub fn resolve_output(&self, id: &str) -> Result<Arc<OutputGuardrail>> {
        resolve(&self.output, ComponentKind::OutputGuardrail, id)
    }

    /// Resolve an output token accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `id` is unknown or its factory fails.
    pub fn resolve_accumulator(&self, id: &str) -> Result<Arc<dyn OutputTokenAccumulator>> {
        resolve(&self.accumulators, ComponentKind::OutputTokenAccumulator, id)
    }

    /// Check whether anything is registered under `id` for `kind`.
    #[must_use]
    pub fn contains(&self, kind: ComponentKind, id: &str) -> bool {
        match kind {
            ComponentKind::InputGuardrail => self.input.contains_key(id),
            ComponentKind::OutputGuardrail => self.output.contains_key(id),
            ComponentKind::OutputTokenAccumulator => self.accumulators.contains_key(id),
        }
    }
}

fn resolve<T: ?Sized>(factories: &HashMap<String, Factory<T>>, kind: ComponentKind, id: &str) -> Result<Arc<T>> {
    let factory = factories
        .get(id)
        .ok_or_else(|| Error::configuration(kind, id, NotRegistered(id.to_owned())))?;
    factory().map_err(|source| Error::configuration(kind, id, source))
}

impl fmt::Debug for GuardrailRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardrailRegistry")
            .field("input", &self.input.keys().collect::<Vec<_>>())
            .field("output", &self.output.keys().collect::<Vec<_>>())
            .field("accumulators", &self.accumulators.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::guardrail::GuardrailResult;

    struct Pass;

    #[async_trait]
    impl Guardrail<InputGuardrailParams> for Pass {
        async fn validate(&self, _params: &InputGuardrailParams) -> GuardrailResult {
            GuardrailResult::success()
        }
    }

    #[test]
    fn test_registry_resolves_shared_instance() {
        let registry = GuardrailRegistry::new().input_guardrail("pass", Pass);

        let a = registry.resolve_input("pass").expect("registered");
        let b = registry.resolve_input("pass").expect("registered");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.contains(ComponentKind::InputGuardrail, "pass"));
        assert!(!registry.contains(ComponentKind::OutputGuardrail, "pass"));
    }

    #[test]
    fn test_unknown_identifier_is_configuration_error() {
        let registry = GuardrailRegistry::new();
        let err = registry.resolve_output("missing").err().expect("unknown id");

        match &err {
            Error::Configuration { kind, id, .. } => {
                assert_eq!(*kind, ComponentKind::OutputGuardrail);
                assert_eq!(id, "missing");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.source().map(ToString::to_string).as_deref(),
            Some("no implementation registered under 'missing'")
        );
    }

    #[test]
    fn test_factory_failure_is_configuration_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = GuardrailRegistry::new().input_factory("flaky", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("model weights not found".into())
        });

        let err = registry.resolve_input("flaky").err().expect("factory fails");
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
