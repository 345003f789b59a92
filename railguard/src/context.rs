//! Per-method invocation context.
//!
//! A [`MethodContext`] is created once per guarded method and shared by all
//! of its invocations. It memoizes what the registry resolves for that
//! method: the first invocation resolves, later ones reuse the instances.
//! Concurrent first invocations are serialized on the memo slot; once
//! populated, reads take no lock.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::MethodConfig;
use crate::error::Result;
use crate::guardrail::{InputGuardrailParams, OutputGuardrailParams, ResolvedGuardrail};
use crate::observer::AuditSource;
use crate::registry::GuardrailRegistry;
use crate::stream::OutputTokenAccumulator;

/// Configuration and resolution cache of one guarded method.
pub struct MethodContext {
    interface_name: String,
    method_name: String,
    config: MethodConfig,
    input: OnceCell<Vec<ResolvedGuardrail<InputGuardrailParams>>>,
    output: OnceCell<Vec<ResolvedGuardrail<OutputGuardrailParams>>>,
    accumulator: OnceCell<Option<Arc<dyn OutputTokenAccumulator>>>,
}

impl MethodContext {
    /// Create the context of `interface_name::method_name`.
    #[must_use]
    pub fn new(
        interface_name: impl Into<String>,
        method_name: impl Into<String>,
        config: MethodConfig,
    ) -> Self {
        Self {
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            config,
            input: OnceCell::new(),
            output: OnceCell::new(),
            accumulator: OnceCell::new(),
        }
    }

    /// The method configuration.
    #[must_use]
    pub const fn config(&self) -> &MethodConfig {
        &self.config
    }

    /// Name of the guarded method.
    #[must_use]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// A fresh audit source for one invocation of this method.
    #[must_use]
    pub fn audit_source(&self) -> AuditSource {
        AuditSource::new(&self.interface_name, &self.method_name)
    }

    /// The input guardrails of this method, resolved on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if an
    /// identifier cannot be resolved. Nothing is cached in that case.
    pub async fn input_guardrails(
        &self,
        registry: &GuardrailRegistry,
    ) -> Result<&[ResolvedGuardrail<InputGuardrailParams>]> {
        let resolved = self
            .input
            .get_or_try_init(|| async {
                debug!(method = %self.method_name, ids = ?self.config.input_guardrails, "resolving input guardrails");
                self.config
                    .input_guardrails
                    .iter()
                    .map(|id| {
                        Ok(ResolvedGuardrail {
                            id: id.clone(),
                            guardrail: registry.resolve_input(id)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;
        Ok(resolved)
    }

    /// The output guardrails of this method, resolved on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if an
    /// identifier cannot be resolved. Nothing is cached in that case.
    pub async fn output_guardrails(
        &self,
        registry: &GuardrailRegistry,
    ) -> Result<&[ResolvedGuardrail<OutputGuardrailParams>]> {
        let resolved = self
            .output
            .get_or_try_init(|| async {
                debug!(method = %self.method_name, ids = ?self.config.output_guardrails, "resolving output guardrails");
                self.config
                    .output_guardrails
                    .iter()
                    .map(|id| {
                        Ok(ResolvedGuardrail {
                            id: id.clone(),
                            guardrail: registry.resolve_output(id)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;
        Ok(resolved)
    }

    /// The custom accumulator of this method, resolved on first use.
    ///
    /// `None` means the default accumulation applies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) if the
    /// configured identifier cannot be resolved.
    pub async fn accumulator(
        &self,
        registry: &GuardrailRegistry,
    ) -> Result<Option<Arc<dyn OutputTokenAccumulator>>> {
        let resolved = self
            .accumulator
            .get_or_try_init(|| async {
                self.config
                    .accumulator
                    .as_deref()
                    .map(|id| {
                        debug!(method = %self.method_name, accumulator = %id, "resolving output token accumulator");
                        registry.resolve_accumulator(id)
                    })
                    .transpose()
            })
            .await?;
        Ok(resolved.clone())
    }
}

impl fmt::Debug for MethodContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodContext")
            .field("interface_name", &self.interface_name)
            .field("method_name", &self.method_name)
            .field("config", &self.config)
            .field("resolved", &self.input.initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ComponentKind, Error};
    use crate::guardrail::{Guardrail, GuardrailResult};
    use crate::stream::TokenStream;

    struct Pass;

    #[async_trait]
    impl Guardrail<OutputGuardrailParams> for Pass {
        async fn validate(&self, _params: &OutputGuardrailParams) -> GuardrailResult {
            GuardrailResult::success()
        }
    }

    struct Verbatim;

    impl OutputTokenAccumulator for Verbatim {
        fn accumulate(&self, tokens: TokenStream) -> TokenStream {
            tokens
        }
    }

    fn counting_registry(calls: &Arc<AtomicUsize>) -> GuardrailRegistry {
        let counter = Arc::clone(calls);
        let accumulators = Arc::clone(calls);
        GuardrailRegistry::new()
            .output_factory("pass", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Pass))
            })
            .accumulator_factory("verbatim", move || {
                accumulators.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Verbatim) as Arc<dyn OutputTokenAccumulator>)
            })
    }

    #[tokio::test]
    async fn test_resolution_is_memoized_per_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&calls);
        let config = MethodConfig::new().with_output_guardrail("pass");

        let first = MethodContext::new("Assistant", "chat", config.clone());
        for _ in 0..3 {
            assert_eq!(first.output_guardrails(&registry).await.expect("resolves").len(), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = MethodContext::new("Assistant", "summarize", config);
        second.output_guardrails(&registry).await.expect("resolves");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_resolution_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = Arc::new(counting_registry(&calls));
        let context = Arc::new(MethodContext::new(
            "Assistant",
            "chat",
            MethodConfig::new().with_output_guardrail("pass"),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let context = Arc::clone(&context);
                tokio::spawn(async move { context.output_guardrails(&registry).await.map(<[_]>::len) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.expect("join").expect("resolves"), 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_resolution_is_not_cached() {
        let context = MethodContext::new(
            "Assistant",
            "chat",
            MethodConfig::new().with_input_guardrail("late"),
        );

        let err = context
            .input_guardrails(&GuardrailRegistry::new())
            .await
            .err()
            .expect("unknown id");
        assert!(matches!(err, Error::Configuration { .. }));

        struct Late;
        #[async_trait]
        impl Guardrail<InputGuardrailParams> for Late {
            async fn validate(&self, _params: &InputGuardrailParams) -> GuardrailResult {
                GuardrailResult::success()
            }
        }
        let registry = GuardrailRegistry::new().input_guardrail("late", Late);
        assert_eq!(context.input_guardrails(&registry).await.expect("resolves").len(), 1);
    }

    #[tokio::test]
    async fn test_no_accumulator_configured_means_default() {
        let context = MethodContext::new("Assistant", "chat", MethodConfig::new());
        assert!(context.accumulator(&GuardrailRegistry::new()).await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn test_accumulator_resolution_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(&calls);
        let context = MethodContext::new(
            "Assistant",
            "chat",
            MethodConfig::new().with_accumulator("verbatim"),
        );

        for _ in 0..3 {
            assert!(context.accumulator(&registry).await.expect("resolves").is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_accumulator_is_configuration_error() {
        let context = MethodContext::new(
            "Assistant",
            "chat",
            MethodConfig::new().with_accumulator("sentences"),
        );

        let err = context
            .accumulator(&GuardrailRegistry::new())
            .await
            .err()
            .expect("unknown id");
        assert!(matches!(
            err,
            Error::Configuration { kind: ComponentKind::OutputTokenAccumulator, ref id, .. } if id == "sentences"
        ));
    }
}
