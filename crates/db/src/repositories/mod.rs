use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use spendflow_core::domain::approval::{ApprovalChain, ApprovalRecord};
use spendflow_core::domain::company::{Company, CompanyId};
use spendflow_core::domain::expense::{Expense, ExpenseId, PendingExpense};
use spendflow_core::domain::user::{User, UserId};
use spendflow_core::errors::ApplicationError;
use spendflow_core::routing::RoleHolders;

pub mod approval_record;
pub mod approval_step;
pub mod company;
pub mod expense;
pub mod user;

pub use approval_record::SqlApprovalRecordRepository;
pub use approval_step::SqlApprovalStepRepository;
pub use company::SqlCompanyRepository;
pub use expense::SqlExpenseRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

#[async_trait]
pub trait CompanyRepository: Send + Sync {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError>;
    async fn save(&self, company: Company) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;
    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError>;
    async fn role_holders(&self, company_id: &CompanyId) -> Result<RoleHolders, RepositoryError>;
    async fn save(&self, user: User) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ApprovalStepRepository: Send + Sync {
    async fn load_chain(&self, company_id: &CompanyId) -> Result<ApprovalChain, RepositoryError>;
}

#[async_trait]
pub trait ExpenseRepository: Send + Sync {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError>;
    async fn list_pending_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingExpense>, RepositoryError>;
    async fn list_submitted_by(&self, employee_id: &UserId)
        -> Result<Vec<Expense>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRecordRepository: Send + Sync {
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column} `{raw}`: {error}")))
}
