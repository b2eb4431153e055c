use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use spendflow_core::currency::{self, ConvertedExpense, ExchangeRates, RateProvider};
use spendflow_core::{
    ApplicationError, ApprovalChain, ApprovalRecord, CompanyId, Decision, DomainError, Expense,
    ExpenseDraft, ExpenseId, ExpenseStatus, InterfaceError, PendingExpense, Role, RoutingOutcome,
    User, UserDraft, UserId,
};
use spendflow_db::{DecisionCommand, ExpenseWorkflow};
use tracing::{error, warn};
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const COMPANY_ID_HEADER: &str = "x-company-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<ExpenseWorkflow>,
    pub rates: Arc<dyn RateProvider>,
    pub rate_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub correlation_id: String,
}

type Rejection = (StatusCode, Json<ApiError>);
type ApiResult<T> = Result<Json<T>, Rejection>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseView {
    pub id: ExpenseId,
    pub employee_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_name: Option<String>,
    pub company_id: CompanyId,
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    pub description: String,
    pub status: ExpenseStatus,
    pub current_approver_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_amount: Option<Decimal>,
}

impl From<Expense> for ExpenseView {
    fn from(expense: Expense) -> Self {
        let status = expense.status();
        let current_approver_id = expense.current_approver_id().cloned();
        Self {
            id: expense.id,
            employee_id: expense.employee_id,
            employee_name: None,
            company_id: expense.company_id,
            amount: expense.amount,
            currency: expense.currency,
            category: expense.category,
            description: expense.description,
            status,
            current_approver_id,
            created_at: expense.created_at,
            updated_at: expense.updated_at,
            base_currency: None,
            converted_amount: None,
        }
    }
}

impl From<PendingExpense> for ExpenseView {
    fn from(pending: PendingExpense) -> Self {
        Self { employee_name: Some(pending.employee_name), ..Self::from(pending.expense) }
    }
}

impl From<ConvertedExpense> for ExpenseView {
    fn from(converted: ConvertedExpense) -> Self {
        Self {
            employee_name: Some(converted.employee_name),
            base_currency: Some(converted.base_currency),
            converted_amount: converted.converted_amount,
            ..Self::from(converted.expense)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExpenseRequest {
    pub amount: Decimal,
    pub currency: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub expense: ExpenseView,
    pub outcome: RoutingOutcome,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub manager_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainStepRequest {
    pub approver_role: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceChainRequest {
    pub steps: Vec<ChainStepRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialApproverResponse {
    pub company_id: CompanyId,
    pub special_approver_id: UserId,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/expenses", post(create_expense))
        .route("/api/expenses/mine", get(list_mine))
        .route("/api/expenses/pending", get(list_pending))
        .route("/api/expenses/{id}/approvals", get(approval_history))
        .route("/api/expenses/{id}/approve", put(approve_expense))
        .route("/api/expenses/{id}/reject", put(reject_expense))
        .route("/api/admin/users", get(list_users).post(create_user))
        .route("/api/admin/users/{id}/special-approver", put(set_special_approver))
        .route("/api/admin/approval-steps", get(get_approval_steps).put(replace_approval_steps))
        .with_state(state)
}

/// The verified caller of one request.
struct Caller {
    user: User,
    correlation_id: String,
}

async fn create_expense(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ExpenseView>), Rejection> {
    let caller = identify(&state, &headers).await?;
    let request: CreateExpenseRequest = parse_body(&body, &caller.correlation_id)?;
    let draft = ExpenseDraft {
        amount: request.amount,
        currency: request.currency,
        category: request.category,
        description: request.description.unwrap_or_default(),
    };

    let expense = state
        .workflow
        .create_expense(&caller.user.id, draft, &caller.correlation_id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok((StatusCode::CREATED, Json(ExpenseView::from(expense))))
}

async fn list_mine(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Vec<ExpenseView>> {
    let caller = identify(&state, &headers).await?;
    let expenses = state
        .workflow
        .list_submitted_by(&caller.user.id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(expenses.into_iter().map(ExpenseView::from).collect()))
}

/// Pending queue of the caller with base-currency amounts attached when a
/// rate lookup succeeds in time.
async fn list_pending(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Vec<ExpenseView>> {
    let caller = identify(&state, &headers).await?;
    let pending = state
        .workflow
        .list_pending_for(&caller.user.id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    let company = state
        .workflow
        .find_company(&caller.user.company_id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;
    let Some(company) = company else {
        return Ok(Json(pending.into_iter().map(ExpenseView::from).collect()));
    };

    let needs_conversion = pending
        .iter()
        .any(|entry| !entry.expense.currency.eq_ignore_ascii_case(&company.base_currency));
    let rates = if needs_conversion {
        lookup_rates(&state, &company.base_currency, &caller.correlation_id).await
    } else {
        None
    };

    let enriched = currency::enrich(pending, &company.base_currency, rates.as_ref());
    Ok(Json(enriched.into_iter().map(ExpenseView::from).collect()))
}

async fn lookup_rates(state: &ApiState, base: &str, correlation_id: &str) -> Option<ExchangeRates> {
    match tokio::time::timeout(state.rate_timeout, state.rates.latest(base)).await {
        Ok(Ok(rates)) => Some(rates),
        Ok(Err(error)) => {
            warn!(
                event_name = "currency.rates.unavailable",
                correlation_id,
                base_currency = base,
                error = %error,
                "rate lookup failed; listing without conversion"
            );
            None
        }
        Err(_) => {
            warn!(
                event_name = "currency.rates.timeout",
                correlation_id,
                base_currency = base,
                timeout = ?state.rate_timeout,
                "rate lookup timed out; listing without conversion"
            );
            None
        }
    }
}

async fn approval_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(expense_id): Path<String>,
) -> ApiResult<Vec<ApprovalRecord>> {
    let caller = identify(&state, &headers).await?;
    let records = state
        .workflow
        .approval_history(&caller.user, &ExpenseId(expense_id))
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(records))
}

async fn approve_expense(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(expense_id): Path<String>,
    body: Bytes,
) -> ApiResult<DecisionResponse> {
    decide(state, headers, expense_id, Decision::Approved, body).await
}

async fn reject_expense(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(expense_id): Path<String>,
    body: Bytes,
) -> ApiResult<DecisionResponse> {
    decide(state, headers, expense_id, Decision::Rejected, body).await
}

async fn decide(
    state: ApiState,
    headers: HeaderMap,
    expense_id: String,
    decision: Decision,
    body: Bytes,
) -> ApiResult<DecisionResponse> {
    let caller = identify(&state, &headers).await?;
    let request: DecisionRequest = if body.is_empty() {
        DecisionRequest::default()
    } else {
        parse_body(&body, &caller.correlation_id)?
    };

    let receipt = state
        .workflow
        .record_decision(
            DecisionCommand {
                expense_id: ExpenseId(expense_id),
                actor_id: caller.user.id.clone(),
                decision,
                comment: request.comment,
            },
            &caller.correlation_id,
        )
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(DecisionResponse {
        expense: ExpenseView::from(receipt.expense),
        outcome: receipt.transition.outcome,
    }))
}

async fn list_users(State(state): State<ApiState>, headers: HeaderMap) -> ApiResult<Vec<User>> {
    let caller = identify_admin(&state, &headers).await?;
    let users = state
        .workflow
        .list_company_users(&caller.user.company_id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(users))
}

async fn create_user(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<User>), Rejection> {
    let caller = identify_admin(&state, &headers).await?;
    let request: CreateUserRequest = parse_body(&body, &caller.correlation_id)?;
    let role = parse_role(&request.role, &caller.correlation_id)?;
    let draft = UserDraft {
        name: request.name,
        email: request.email,
        role,
        manager_id: request.manager_id.filter(|id| !id.trim().is_empty()).map(UserId),
    };

    let created = state
        .workflow
        .create_user(&caller.user.company_id, draft, &caller.user.id.0, &caller.correlation_id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_special_approver(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<SpecialApproverResponse> {
    let caller = identify_admin(&state, &headers).await?;
    let target = UserId(user_id);
    state
        .workflow
        .set_special_approver(
            &caller.user.company_id,
            &target,
            &caller.user.id.0,
            &caller.correlation_id,
        )
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(SpecialApproverResponse {
        company_id: caller.user.company_id,
        special_approver_id: target,
    }))
}

async fn get_approval_steps(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<ApprovalChain> {
    let caller = identify_admin(&state, &headers).await?;
    let chain = state
        .workflow
        .approval_chain(&caller.user.company_id)
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(chain))
}

async fn replace_approval_steps(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<ApprovalChain> {
    let caller = identify_admin(&state, &headers).await?;
    let request: ReplaceChainRequest = parse_body(&body, &caller.correlation_id)?;
    let steps = request
        .steps
        .iter()
        .map(|step| -> Result<(Role, u32), Rejection> {
            Ok((parse_role(&step.approver_role, &caller.correlation_id)?, step.sequence))
        })
        .collect::<Result<Vec<_>, Rejection>>()?;

    let chain = state
        .workflow
        .replace_approval_chain(
            &caller.user.company_id,
            steps,
            &caller.user.id.0,
            &caller.correlation_id,
        )
        .await
        .map_err(|error| reject(error, &caller.correlation_id))?;

    Ok(Json(chain))
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, CORRELATION_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Resolves the identity headers set by the upstream identity layer. The
/// claimed role and company must match the stored user.
async fn identify(state: &ApiState, headers: &HeaderMap) -> Result<Caller, Rejection> {
    let correlation_id = correlation_id(headers);

    let (Some(user_id), Some(role), Some(company_id)) = (
        header_value(headers, USER_ID_HEADER),
        header_value(headers, USER_ROLE_HEADER),
        header_value(headers, COMPANY_ID_HEADER),
    ) else {
        return Err(unauthorized("identity headers are missing", correlation_id));
    };
    let Some(role) = Role::parse(role) else {
        return Err(unauthorized("identity role is not recognised", correlation_id));
    };

    let user = state
        .workflow
        .find_user(&UserId(user_id.to_string()))
        .await
        .map_err(|error| reject(error, &correlation_id))?;
    match user {
        Some(user) if user.role == role && user.company_id.0 == company_id => {
            Ok(Caller { user, correlation_id })
        }
        _ => Err(unauthorized("identity does not match a known user", correlation_id)),
    }
}

fn unauthorized(message: &str, correlation_id: String) -> Rejection {
    respond(InterfaceError::Unauthorized { message: message.to_string(), correlation_id })
}

async fn identify_admin(state: &ApiState, headers: &HeaderMap) -> Result<Caller, Rejection> {
    let caller = identify(state, headers).await?;
    if caller.user.role != Role::Admin {
        return Err(respond(InterfaceError::Forbidden {
            message: format!("user `{}` is not an admin", caller.user.id),
            correlation_id: caller.correlation_id,
        }));
    }
    Ok(caller)
}

fn parse_body<T: DeserializeOwned>(body: &Bytes, correlation_id: &str) -> Result<T, Rejection> {
    serde_json::from_slice(body).map_err(|error| {
        respond(InterfaceError::BadRequest {
            message: format!("malformed request body: {error}"),
            correlation_id: correlation_id.to_string(),
        })
    })
}

fn parse_role(value: &str, correlation_id: &str) -> Result<Role, Rejection> {
    Role::parse(value)
        .ok_or_else(|| reject(DomainError::UnknownRole(value.to_string()).into(), correlation_id))
}

fn reject(error: ApplicationError, correlation_id: &str) -> Rejection {
    respond(error.into_interface(correlation_id))
}

fn respond(interface: InterfaceError) -> Rejection {
    let status = match &interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(
            event_name = "api.request.failed",
            correlation_id = interface.correlation_id(),
            status = status.as_u16(),
            error = %interface,
            "request failed"
        );
    }

    let message = interface.public_detail().unwrap_or(interface.user_message()).to_string();
    (
        status,
        Json(ApiError { error: message, correlation_id: interface.correlation_id().to_string() }),
    )
}
