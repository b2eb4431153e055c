use spendflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{error, info, warn};

/// Forwards audit events to the tracing subscriber. Refusals log at `warn`,
/// failures (chain misconfiguration) at `error`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let expense_id = event.expense_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none");
        let company_id = event.company_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                expense_id,
                company_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected => warn!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                expense_id,
                company_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event refused"
            ),
            AuditOutcome::Failed => error!(
                event_name = %event.event_type,
                correlation_id = %event.correlation_id,
                expense_id,
                company_id,
                actor = %event.actor,
                metadata = %metadata,
                "audit event failed"
            ),
        }
    }
}
