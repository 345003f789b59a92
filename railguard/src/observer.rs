//! Audit notifications for guardrail executions.
//!
//! Every guardrail run is reported to a [`GuardrailObserver`] together with
//! the params it saw, the verdict it returned and the [`AuditSource`] of the
//! invocation. Notification is fire-and-forget: observers cannot fail back
//! into the engine.
//!
//! ```rust,ignore
//! use railguard::observer::TracingObserver;
//!
//! tracing_subscriber::fmt::init();
//! let engine = GuardrailEngine::new(registry).with_observer(TracingObserver);
//! ```

use std::fmt;

use tracing::{info, warn};
use uuid::Uuid;

use crate::guardrail::{GuardrailParams, GuardrailPhase, GuardrailResult, InputGuardrailParams, OutputGuardrailParams};

/// Identifies the logical invocation a guardrail ran for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSource {
    /// Name of the service or interface exposing the guarded method.
    pub interface_name: String,
    /// Name of the guarded method.
    pub method_name: String,
    /// Unique identifier of this invocation.
    pub invocation_id: Uuid,
}

impl AuditSource {
    /// A source for a new invocation of `interface_name::method_name`.
    #[must_use]
    pub fn new(interface_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            invocation_id: Uuid::new_v4(),
        }
    }
}

impl Default for AuditSource {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Borrowed params of an executed guardrail.
#[derive(Debug, Clone, Copy)]
pub enum ExecutedParams<'a> {
    /// Params of an input guardrail.
    Input(&'a InputGuardrailParams),
    /// Params of an output guardrail.
    Output(&'a OutputGuardrailParams),
}

impl ExecutedParams<'_> {
    /// The text the guardrail validated.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Input(params) => params.text(),
            Self::Output(params) => params.text(),
        }
    }
}

/// Event emitted after each guardrail execution.
#[derive(Debug, Clone, Copy)]
pub struct GuardrailExecutedEvent<'a> {
    /// The invocation the guardrail ran for.
    pub source: &'a AuditSource,
    /// Input or output side.
    pub phase: GuardrailPhase,
    /// The params the guardrail validated.
    pub params: ExecutedParams<'a>,
    /// The verdict it returned.
    pub result: &'a GuardrailResult,
    /// Registry identifier of the guardrail.
    pub guardrail: &'a str,
}

/// Receives guardrail execution events.
pub trait GuardrailObserver: Send + Sync {
    /// Called once per guardrail execution, in execution order.
    fn notify(&self, event: &GuardrailExecutedEvent<'_>);
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl GuardrailObserver for NoopObserver {
    fn notify(&self, _event: &GuardrailExecutedEvent<'_>) {}
}

/// Observer that records each execution as a `tracing` event.
///
/// Successes are logged at `INFO`, failures at `WARN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl GuardrailObserver for TracingObserver {
    fn notify(&self, event: &GuardrailExecutedEvent<'_>) {
        let source = event.source;
        if event.result.is_success() {
            info!(
                interface = %source.interface_name,
                method = %source.method_name,
                invocation_id = %source.invocation_id,
                phase = %event.phase,
                guardrail = %event.guardrail,
                rewritten = event.result.has_rewritten_result(),
                "guardrail_passed"
            );
        } else {
            warn!(
                interface = %source.interface_name,
                method = %source.method_name,
                invocation_id = %source.invocation_id,
                phase = %event.phase,
                guardrail = %event.guardrail,
                fatal = event.result.is_fatal(),
                retry = event.result.is_retry(),
                failures = %FailureList(event.result),
                "guardrail_failed"
            );
        }
    }
}

struct FailureList<'a>(&'a GuardrailResult);

impl fmt::Display for FailureList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.failures().iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&failure.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn test_each_source_gets_a_fresh_invocation_id() {
        let a = AuditSource::new("Assistant", "chat");
        let b = AuditSource::new("Assistant", "chat");
        assert_ne!(a.invocation_id, b.invocation_id);
        assert_eq!(a.method_name, "chat");
    }

    #[test]
    fn test_failure_list_joins_messages() {
        let result = GuardrailResult::failure("a").compose(GuardrailResult::failure("b"));
        assert_eq!(FailureList(&result).to_string(), "a; b");
    }

    #[test]
    fn test_tracing_observer_accepts_both_outcomes() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let params = OutputGuardrailParams::new(Message::assistant("hi"), Vec::new());
        let source = AuditSource::new("Assistant", "chat");

        for result in [GuardrailResult::success(), GuardrailResult::retry("again")] {
            let event = GuardrailExecutedEvent {
                source: &source,
                phase: GuardrailPhase::Output,
                params: params.as_executed(),
                result: &result,
                guardrail: "format",
            };
            assert_eq!(event.params.text(), "hi");
            TracingObserver.notify(&event);
        }
    }
}
