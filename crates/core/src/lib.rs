pub mod audit;
pub mod config;
pub mod currency;
pub mod domain;
pub mod errors;
pub mod routing;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use currency::{ConvertedExpense, ExchangeRates, RateError, RateProvider};
pub use domain::approval::{ApprovalChain, ApprovalRecord, ApprovalRecordId, ApprovalStep, Decision};
pub use domain::company::{Company, CompanyId};
pub use domain::expense::{
    Expense, ExpenseDraft, ExpenseId, ExpenseStatus, PendingExpense, RoutingState,
};
pub use domain::user::{Role, User, UserDraft, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use routing::{ApprovalRouter, RoutingError, RoutingOutcome};
