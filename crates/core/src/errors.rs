use thiserror::Error;

use crate::domain::expense::ExpenseId;
use crate::domain::user::UserId;
use crate::routing::RoutingError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error("user `{employee_id}` has no manager assigned")]
    NoManagerAssigned { employee_id: UserId },
    #[error("unknown user `{0}`")]
    UnknownUser(UserId),
    #[error("expense `{0}` is not visible to the caller")]
    ExpenseNotVisible(ExpenseId),
    #[error("unknown role `{0}`")]
    UnknownRole(String),
    #[error("invalid user: {0}")]
    InvalidUser(String),
    #[error("invalid expense: {0}")]
    InvalidExpense(String),
    #[error("invalid approval chain: {0}")]
    InvalidChain(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<RoutingError> for ApplicationError {
    fn from(value: RoutingError) -> Self {
        Self::Domain(DomainError::Routing(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "A verified identity is required for this request.",
            Self::Forbidden { .. } => "You do not have permission to perform this action.",
            Self::NotFound { .. } => {
                "Expense not found or you're not the current approver."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Detail that is safe to show to the caller. Only validation failures
    /// carry one; everything else stays behind `user_message`.
    pub fn public_detail(&self) -> Option<&str> {
        match self {
            Self::BadRequest { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Unauthorized { correlation_id: id, .. }
            | InterfaceError::Forbidden { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Routing(RoutingError::NotCurrentApprover))
            | ApplicationError::Domain(DomainError::UnknownUser(_))
            | ApplicationError::Domain(DomainError::ExpenseNotVisible(_)) => {
                Self::NotFound { message: value_message(&value), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Routing(
                RoutingError::ChainConfigMissing { .. },
            ))
            | ApplicationError::Domain(DomainError::InvariantViolation(_)) => {
                Self::Internal { message: value_message(&value), correlation_id: unassigned() }
            }
            ApplicationError::Domain(
                DomainError::NoManagerAssigned { .. }
                | DomainError::UnknownRole(_)
                | DomainError::InvalidUser(_)
                | DomainError::InvalidExpense(_)
                | DomainError::InvalidChain(_),
            ) => Self::BadRequest { message: value_message(&value), correlation_id: unassigned() },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

fn value_message(value: &ApplicationError) -> String {
    match value {
        ApplicationError::Domain(DomainError::NoManagerAssigned { .. }) => {
            "You don't have a manager assigned. Contact your admin.".to_owned()
        }
        other => other.to_string(),
    }
}
