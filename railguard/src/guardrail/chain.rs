//! Sequential execution of a guardrail chain.
//!
//! Both sides share the same mechanics: run each guardrail in declaration
//! order, notify the observer, feed rewrites forward, fold results, and stop
//! at the first fatal result. Only the output side protects an already
//! accepted rewrite with [`GuardrailResult::block_retry`].

use tracing::{debug, warn};

use crate::observer::{AuditSource, GuardrailExecutedEvent, GuardrailObserver};

use super::{GuardrailParams, GuardrailPhase, GuardrailResult, ResolvedGuardrail};

/// Run `guardrails` against `params` and return the composed result.
pub(crate) async fn run<P: GuardrailParams>(
    guardrails: &[ResolvedGuardrail<P>],
    mut params: P,
    observer: &dyn GuardrailObserver,
    source: &AuditSource,
) -> GuardrailResult {
    let mut accumulated = GuardrailResult::success();

    for entry in guardrails {
        let result = entry.guardrail.validate(&params).await.validated_by(&entry.id);

        observer.notify(&GuardrailExecutedEvent {
            source,
            phase: P::PHASE,
            params: params.as_executed(),
            result: &result,
            guardrail: &entry.id,
        });
        debug!(
            phase = %P::PHASE,
            guardrail = %entry.id,
            success = result.is_success(),
            fatal = result.is_fatal(),
            rewrite = result.has_rewritten_result(),
            "guardrail executed"
        );

        if result.is_fatal() {
            return match (P::PHASE, accumulated.rewrite()) {
                (GuardrailPhase::Output, Some(accepted)) => {
                    warn!(guardrail = %entry.id, "fatal output result after an accepted rewrite, blocking retry");
                    result.block_retry(accepted.clone())
                }
                _ => result,
            };
        }

        if let Some(text) = result.successful_text() {
            params = params.with_text(text);
        }
        accumulated = accumulated.compose(result);
    }

    accumulated
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::guardrail::{Guardrail, InputGuardrailParams, OutputGuardrailParams};
    use crate::message::Message;
    use crate::observer::{ExecutedParams, NoopObserver};

    /// Returns a fixed result and records the text it was shown.
    struct Scripted {
        result: GuardrailResult,
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl<P: GuardrailParams> Guardrail<P> for Scripted {
        async fn validate(&self, params: &P) -> GuardrailResult {
            self.seen
                .lock()
                .expect("lock")
                .push(params.text().to_owned());
            self.result.clone()
        }
    }

    fn chain<P: GuardrailParams>(
        results: Vec<GuardrailResult>,
    ) -> (Vec<ResolvedGuardrail<P>>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let guardrails = results
            .into_iter()
            .enumerate()
            .map(|(i, result)| ResolvedGuardrail {
                id: format!("g{i}"),
                guardrail: Arc::new(Scripted {
                    result,
                    seen: Arc::clone(&seen),
                }) as Arc<dyn Guardrail<P>>,
            })
            .collect();
        (guardrails, seen)
    }

    fn input(text: &str) -> InputGuardrailParams {
        InputGuardrailParams::new(Message::user(text), Vec::new())
    }

    fn output(text: &str) -> OutputGuardrailParams {
        OutputGuardrailParams::new(Message::assistant(text), Vec::new())
    }

    #[tokio::test]
    async fn test_empty_chain_succeeds() {
        let result = run::<InputGuardrailParams>(&[], input("x"), &NoopObserver, &AuditSource::default()).await;
        assert!(result.is_success());
        assert!(!result.has_rewritten_result());
    }

    #[tokio::test]
    async fn test_rewrite_is_seen_by_later_guardrails() {
        let (guardrails, seen) = chain(vec![
            GuardrailResult::success(),
            GuardrailResult::success_with("rewritten"),
            GuardrailResult::success(),
            GuardrailResult::success(),
        ]);

        let result = run(&guardrails, input("original"), &NoopObserver, &AuditSource::default()).await;

        assert_eq!(result.successful_text(), Some("rewritten"));
        assert_eq!(
            *seen.lock().expect("lock"),
            ["original", "original", "rewritten", "rewritten"]
        );
    }

    #[tokio::test]
    async fn test_soft_failures_are_all_collected() {
        let (guardrails, seen) = chain(vec![
            GuardrailResult::failure("first"),
            GuardrailResult::success(),
            GuardrailResult::failure("second"),
        ]);

        let result = run(&guardrails, input("x"), &NoopObserver, &AuditSource::default()).await;

        let messages: Vec<_> = result.failures().iter().map(|f| f.message.as_str()).collect();
        assert_eq!(messages, ["first", "second"]);
        assert_eq!(result.failures()[1].guardrail.as_deref(), Some("g2"));
        assert_eq!(seen.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits_input_chain_without_blocking() {
        let (guardrails, seen) = chain(vec![
            GuardrailResult::success_with("rewritten"),
            GuardrailResult::fatal("stop"),
            GuardrailResult::failure("never"),
        ]);

        let result = run(&guardrails, input("x"), &NoopObserver, &AuditSource::default()).await;

        assert!(result.is_fatal());
        assert!(result.accepted_rewrite().is_none());
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_after_rewrite_is_blocked_on_output_chain() {
        let (guardrails, _) = chain(vec![
            GuardrailResult::success_with("redacted"),
            GuardrailResult::fatal("stop"),
        ]);

        let result = run(&guardrails, output("raw"), &NoopObserver, &AuditSource::default()).await;

        assert!(result.is_fatal());
        assert_eq!(result.accepted_rewrite().map(|r| r.text.as_str()), Some("redacted"));
        assert!(result.failures()[0].retry_blocked);
    }

    #[tokio::test]
    async fn test_retry_stops_output_chain_unchanged() {
        let (guardrails, seen) = chain(vec![
            GuardrailResult::failure("soft"),
            GuardrailResult::reprompt("vague", "Please clarify"),
            GuardrailResult::success(),
        ]);

        let result = run(&guardrails, output("raw"), &NoopObserver, &AuditSource::default()).await;

        assert!(result.is_retry());
        assert_eq!(result.reprompt_text(), Some("Please clarify"));
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_rewrite_is_blocked_on_output_chain() {
        let (guardrails, seen) = chain(vec![
            GuardrailResult::success_with("x"),
            GuardrailResult::reprompt("too long", "Be brief"),
            GuardrailResult::success(),
        ]);

        let result = run(&guardrails, output("raw"), &NoopObserver, &AuditSource::default()).await;

        assert!(!result.is_retry());
        assert!(result.is_fatal());
        assert_eq!(result.accepted_rewrite().map(|r| r.text.as_str()), Some("x"));
        assert!(result.failures().iter().all(|f| f.fatal && f.retry_blocked));
        assert_eq!(*seen.lock().expect("lock"), ["raw", "x"]);
    }

    #[tokio::test]
    async fn test_observer_sees_every_execution() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(String, bool, String)>>);

        impl GuardrailObserver for Recorder {
            fn notify(&self, event: &GuardrailExecutedEvent<'_>) {
                let text = match event.params {
                    ExecutedParams::Input(p) => p.user_message().text().to_owned(),
                    ExecutedParams::Output(p) => p.response_message().text().to_owned(),
                };
                self.0
                    .lock()
                    .expect("lock")
                    .push((event.guardrail.to_owned(), event.result.is_success(), text));
            }
        }

        let (guardrails, _) = chain(vec![
            GuardrailResult::success_with("b"),
            GuardrailResult::failure("nope"),
        ]);
        let recorder = Recorder::default();
        let _ = run(&guardrails, input("a"), &recorder, &AuditSource::default()).await;

        let events = recorder.0.lock().expect("lock");
        assert_eq!(
            *events,
            [
                ("g0".to_owned(), true, "a".to_owned()),
                ("g1".to_owned(), false, "b".to_owned()),
            ]
        );
    }
}
