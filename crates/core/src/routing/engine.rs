use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalRecord, ApprovalRecordId, Decision};
use crate::domain::company::CompanyId;
use crate::domain::expense::RoutingState;
use crate::domain::user::Role;
use crate::routing::states::{CompletionReason, RoutingInput, RoutingOutcome, RoutingTransition};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// The expense does not exist, is no longer pending, or is waiting on
    /// someone else. Deliberately a single case.
    #[error("expense not found or actor is not the current approver")]
    NotCurrentApprover,
    #[error("company `{company_id}` has no approval step for role `{role}`")]
    ChainConfigMissing { company_id: CompanyId, role: Role },
}

/// Decides where an expense goes after its current approver acts.
///
/// The router is pure: callers load the expense, the acting user, the
/// company chain and the role holders inside one transaction, call
/// [`ApprovalRouter::route`], and persist the returned transition in that
/// same transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalRouter;

impl ApprovalRouter {
    pub fn route(&self, input: RoutingInput<'_>) -> Result<RoutingTransition, RoutingError> {
        let RoutingInput { expense, actor, decision, comment, chain, holders, now } = input;

        if !expense.is_awaiting(&actor.user_id) {
            return Err(RoutingError::NotCurrentApprover);
        }

        let outcome = match decision {
            Decision::Rejected => RoutingOutcome::Rejected,
            Decision::Approved if actor.is_special_approver => {
                RoutingOutcome::ApprovedFinal { reason: CompletionReason::SpecialOverride }
            }
            Decision::Approved => {
                let sequence = chain.sequence_of(actor.role).ok_or_else(|| {
                    RoutingError::ChainConfigMissing {
                        company_id: expense.company_id.clone(),
                        role: actor.role,
                    }
                })?;

                // Only the step at exactly sequence + 1 continues the chain;
                // a gap ends it.
                match sequence.checked_add(1).and_then(|next| chain.role_at(next)) {
                    Some(next_role) => match holders.holder_of(next_role) {
                        Some(holder) => {
                            RoutingOutcome::Forwarded { to: holder.clone(), role: next_role }
                        }
                        None => RoutingOutcome::ApprovedFinal {
                            reason: CompletionReason::NoHolderForNextRole,
                        },
                    },
                    None => RoutingOutcome::ApprovedFinal { reason: CompletionReason::ChainComplete },
                }
            }
        };

        let to = match &outcome {
            RoutingOutcome::Forwarded { to, .. } => RoutingState::Pending(to.clone()),
            RoutingOutcome::ApprovedFinal { .. } => RoutingState::Approved,
            RoutingOutcome::Rejected => RoutingState::Rejected,
        };

        Ok(RoutingTransition {
            from: expense.state.clone(),
            to,
            outcome,
            record: ApprovalRecord {
                id: ApprovalRecordId::generate(),
                expense_id: expense.id.clone(),
                approver_id: actor.user_id.clone(),
                decision,
                comment: comment.filter(|text| !text.trim().is_empty()),
                created_at: now,
            },
        })
    }

    pub fn route_with_audit<S>(
        &self,
        input: RoutingInput<'_>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<RoutingTransition, RoutingError>
    where
        S: AuditSink + ?Sized,
    {
        let decision = input.decision;
        let result = self.route(input);
        match &result {
            Ok(transition) => {
                let mut event = audit
                    .event("routing.decision_recorded", AuditCategory::Routing, AuditOutcome::Success)
                    .with_metadata("decision", decision.as_str())
                    .with_metadata("outcome", transition.outcome.label())
                    .with_metadata("to_status", transition.to.status().as_str());
                if let RoutingOutcome::Forwarded { to, role } = &transition.outcome {
                    event = event
                        .with_metadata("next_approver", to.0.clone())
                        .with_metadata("next_role", role.as_str());
                }
                if let RoutingOutcome::ApprovedFinal { reason } = &transition.outcome {
                    event = event.with_metadata("reason", reason.as_str());
                }
                sink.emit(event);
            }
            Err(error) => {
                let outcome = match error {
                    RoutingError::NotCurrentApprover => AuditOutcome::Rejected,
                    RoutingError::ChainConfigMissing { .. } => AuditOutcome::Failed,
                };
                sink.emit(
                    audit
                        .event("routing.decision_refused", AuditCategory::Routing, outcome)
                        .with_metadata("decision", decision.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
