use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::CompanyId;
use crate::domain::expense::ExpenseId;
use crate::domain::user::{Role, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalRecordId(pub String);

impl ApprovalRecordId {
    pub fn generate() -> Self {
        Self(format!("apr_{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// One approver action on one expense. Append-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalRecordId,
    pub expense_id: ExpenseId,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub company_id: CompanyId,
    pub approver_role: Role,
    pub sequence: u32,
}

/// A company's approval steps in ascending sequence order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalChain {
    company_id: CompanyId,
    steps: Vec<ApprovalStep>,
}

impl ApprovalChain {
    pub fn new(company_id: CompanyId, mut steps: Vec<ApprovalStep>) -> Result<Self, DomainError> {
        let mut sequences = BTreeSet::new();
        let mut roles = BTreeSet::new();

        for step in &steps {
            if step.company_id != company_id {
                return Err(DomainError::InvalidChain(format!(
                    "step for role `{}` belongs to company `{}`, expected `{company_id}`",
                    step.approver_role, step.company_id
                )));
            }
            if step.sequence == 0 {
                return Err(DomainError::InvalidChain(format!(
                    "step for role `{}` must have a positive sequence",
                    step.approver_role
                )));
            }
            if !sequences.insert(step.sequence) {
                return Err(DomainError::InvalidChain(format!(
                    "sequence {} is configured more than once",
                    step.sequence
                )));
            }
            if !roles.insert(step.approver_role) {
                return Err(DomainError::InvalidChain(format!(
                    "role `{}` is configured more than once",
                    step.approver_role
                )));
            }
        }

        steps.sort_by_key(|step| step.sequence);
        Ok(Self { company_id, steps })
    }

    pub fn empty(company_id: CompanyId) -> Self {
        Self { company_id, steps: Vec::new() }
    }

    pub fn company_id(&self) -> &CompanyId {
        &self.company_id
    }

    pub fn steps(&self) -> &[ApprovalStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn sequence_of(&self, role: Role) -> Option<u32> {
        self.steps.iter().find(|step| step.approver_role == role).map(|step| step.sequence)
    }

    pub fn role_at(&self, sequence: u32) -> Option<Role> {
        self.steps.iter().find(|step| step.sequence == sequence).map(|step| step.approver_role)
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalChain, ApprovalStep, Decision};
    use crate::domain::company::CompanyId;
    use crate::domain::user::Role;
    use crate::errors::DomainError;

    fn step(role: Role, sequence: u32) -> ApprovalStep {
        ApprovalStep { company_id: CompanyId("acme".to_string()), approver_role: role, sequence }
    }

    #[test]
    fn chain_is_ordered_by_sequence() {
        let chain = ApprovalChain::new(
            CompanyId("acme".to_string()),
            vec![step(Role::Director, 2), step(Role::Manager, 1)],
        )
        .expect("valid chain");

        assert_eq!(chain.steps()[0].approver_role, Role::Manager);
        assert_eq!(chain.sequence_of(Role::Director), Some(2));
        assert_eq!(chain.role_at(1), Some(Role::Manager));
        assert_eq!(chain.role_at(3), None);
        assert_eq!(chain.sequence_of(Role::Admin), None);
    }

    #[test]
    fn duplicate_roles_and_sequences_are_rejected() {
        let company = CompanyId("acme".to_string());

        let duplicate_sequence = ApprovalChain::new(
            company.clone(),
            vec![step(Role::Manager, 1), step(Role::Director, 1)],
        );
        assert!(matches!(duplicate_sequence, Err(DomainError::InvalidChain(_))));

        let duplicate_role =
            ApprovalChain::new(company.clone(), vec![step(Role::Manager, 1), step(Role::Manager, 2)]);
        assert!(matches!(duplicate_role, Err(DomainError::InvalidChain(_))));

        let zero = ApprovalChain::new(company, vec![step(Role::Manager, 0)]);
        assert!(matches!(zero, Err(DomainError::InvalidChain(_))));
    }

    #[test]
    fn foreign_company_steps_are_rejected() {
        let foreign = ApprovalStep {
            company_id: CompanyId("globex".to_string()),
            approver_role: Role::Manager,
            sequence: 1,
        };

        let result = ApprovalChain::new(CompanyId("acme".to_string()), vec![foreign]);
        assert!(matches!(result, Err(DomainError::InvalidChain(_))));
    }

    #[test]
    fn decision_accepts_verb_and_past_tense() {
        assert_eq!(Decision::parse("approve"), Some(Decision::Approved));
        assert_eq!(Decision::parse("Rejected"), Some(Decision::Rejected));
        assert_eq!(Decision::parse("escalate"), None);
    }
}
