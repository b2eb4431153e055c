use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::company::CompanyId;
use crate::domain::user::{User, UserId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpenseId(pub String);

impl ExpenseId {
    pub fn generate() -> Self {
        Self(format!("exp_{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for ExpenseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    Pending,
    Approved,
    Rejected,
}

impl ExpenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Routing position of an expense. A pending expense always names the one
/// user who must act next; terminal states never do.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "current_approver_id", rename_all = "snake_case")]
pub enum RoutingState {
    Pending(UserId),
    Approved,
    Rejected,
}

impl RoutingState {
    pub fn status(&self) -> ExpenseStatus {
        match self {
            Self::Pending(_) => ExpenseStatus::Pending,
            Self::Approved => ExpenseStatus::Approved,
            Self::Rejected => ExpenseStatus::Rejected,
        }
    }

    pub fn current_approver(&self) -> Option<&UserId> {
        match self {
            Self::Pending(approver) => Some(approver),
            Self::Approved | Self::Rejected => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }

    /// Rebuilds the state from its stored `(status, current_approver_id)` pair.
    pub fn from_columns(
        status: ExpenseStatus,
        current_approver_id: Option<UserId>,
    ) -> Result<Self, DomainError> {
        match (status, current_approver_id) {
            (ExpenseStatus::Pending, Some(approver)) => Ok(Self::Pending(approver)),
            (ExpenseStatus::Approved, None) => Ok(Self::Approved),
            (ExpenseStatus::Rejected, None) => Ok(Self::Rejected),
            (ExpenseStatus::Pending, None) => Err(DomainError::InvariantViolation(
                "pending expense has no current approver".to_string(),
            )),
            (terminal, Some(approver)) => Err(DomainError::InvariantViolation(format!(
                "{} expense still names current approver `{approver}`",
                terminal.as_str()
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseDraft {
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
}

impl ExpenseDraft {
    pub fn normalized(self) -> Result<Self, DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::InvalidExpense("amount must be positive".to_string()));
        }

        let currency = self.currency.trim().to_ascii_uppercase();
        if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidExpense(format!(
                "currency `{}` must be a three-letter code",
                self.currency
            )));
        }

        let category = self.category.trim().to_string();
        if category.is_empty() {
            return Err(DomainError::InvalidExpense("category is required".to_string()));
        }

        Ok(Self { amount: self.amount, currency, category, description: self.description })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub employee_id: UserId,
    pub company_id: CompanyId,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub state: RoutingState,
    pub state_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A pending expense as listed in an approver's queue, with the submitter's
/// display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingExpense {
    pub expense: Expense,
    pub employee_name: String,
}

impl Expense {
    /// Creates a pending expense routed to the submitter's direct manager.
    pub fn submit(
        id: ExpenseId,
        employee: &User,
        draft: ExpenseDraft,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let approver = employee.direct_manager()?.clone();
        let draft = draft.normalized()?;

        Ok(Self {
            id,
            employee_id: employee.id.clone(),
            company_id: employee.company_id.clone(),
            amount: draft.amount,
            currency: draft.currency,
            category: draft.category,
            description: draft.description,
            state: RoutingState::Pending(approver),
            state_version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> ExpenseStatus {
        self.state.status()
    }

    pub fn current_approver_id(&self) -> Option<&UserId> {
        self.state.current_approver()
    }

    pub fn is_awaiting(&self, user_id: &UserId) -> bool {
        self.current_approver_id() == Some(user_id)
    }

    pub fn transition_to(
        &mut self,
        next: RoutingState,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.state.is_terminal() {
            return Err(DomainError::InvariantViolation(format!(
                "expense `{}` is already {}",
                self.id,
                self.status().as_str()
            )));
        }

        self.state = next;
        self.state_version += 1;
        self.updated_at = now;
        Ok(())
    }
}
