use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use spendflow_core::audit::{
    AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink,
};
use spendflow_core::domain::approval::{ApprovalChain, ApprovalRecord, ApprovalStep, Decision};
use spendflow_core::domain::company::{Company, CompanyId};
use spendflow_core::domain::expense::{Expense, ExpenseDraft, ExpenseId, PendingExpense};
use spendflow_core::domain::user::{Role, User, UserDraft, UserId};
use spendflow_core::errors::{ApplicationError, DomainError};
use spendflow_core::routing::{
    ApprovalRouter, ApproverSnapshot, RoutingError, RoutingInput, RoutingTransition,
};

use crate::repositories::{
    approval_record, approval_step, expense, user, ApprovalRecordRepository,
    ApprovalStepRepository, CompanyRepository, ExpenseRepository, RepositoryError,
    SqlApprovalRecordRepository, SqlApprovalStepRepository, SqlCompanyRepository,
    SqlExpenseRepository, SqlUserRepository, UserRepository,
};
use crate::DbPool;

/// An approver's decision on one expense.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionCommand {
    pub expense_id: ExpenseId,
    pub actor_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionReceipt {
    pub expense: Expense,
    pub transition: RoutingTransition,
}

/// Transactional entry point for every expense mutation.
///
/// Each mutating operation runs in a single SQLite transaction. Any error
/// drops the transaction uncommitted, so callers never observe a partial
/// write.
pub struct ExpenseWorkflow {
    pool: DbPool,
    router: ApprovalRouter,
    audit: Arc<dyn AuditSink>,
    companies: SqlCompanyRepository,
    users: SqlUserRepository,
    steps: SqlApprovalStepRepository,
    expenses: SqlExpenseRepository,
    records: SqlApprovalRecordRepository,
}

impl ExpenseWorkflow {
    pub fn new(pool: DbPool) -> Self {
        Self {
            router: ApprovalRouter,
            audit: Arc::new(NoopAuditSink),
            companies: SqlCompanyRepository::new(pool.clone()),
            users: SqlUserRepository::new(pool.clone()),
            steps: SqlApprovalStepRepository::new(pool.clone()),
            expenses: SqlExpenseRepository::new(pool.clone()),
            records: SqlApprovalRecordRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn create_expense(
        &self,
        employee_id: &UserId,
        draft: ExpenseDraft,
        correlation_id: &str,
    ) -> Result<Expense, ApplicationError> {
        let now = now();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        let employee = user::fetch_user(&mut tx, employee_id)
            .await?
            .ok_or_else(|| DomainError::UnknownUser(employee_id.clone()))?;
        let audit = AuditContext::new(
            None,
            Some(employee.company_id.clone()),
            correlation_id,
            &employee.id.0,
        );

        let expense = match Expense::submit(ExpenseId::generate(), &employee, draft, now) {
            Ok(expense) => expense,
            Err(error) => {
                self.audit.emit(
                    audit
                        .event(
                            "expense.submission_refused",
                            AuditCategory::Submission,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        expense::insert_expense(&mut tx, &expense).await?;
        tx.commit().await.map_err(persistence)?;

        let audit = AuditContext::new(
            Some(expense.id.clone()),
            Some(expense.company_id.clone()),
            correlation_id,
            &employee.id.0,
        );
        let mut event =
            audit.event("expense.submitted", AuditCategory::Submission, AuditOutcome::Success);
        if let Some(approver) = expense.current_approver_id() {
            event = event.with_metadata("current_approver_id", approver.0.clone());
        }
        self.audit.emit(event);

        Ok(expense)
    }

    /// Applies one approver decision.
    ///
    /// The transaction opens with a guarded claim write on the expense row,
    /// which takes the SQLite writer lock before anything is read. Of two
    /// concurrent decisions on the same expense, the second waits for the
    /// lock, then finds the approver changed and fails the claim with
    /// `NotCurrentApprover`.
    pub async fn record_decision(
        &self,
        command: DecisionCommand,
        correlation_id: &str,
    ) -> Result<DecisionReceipt, ApplicationError> {
        let DecisionCommand { expense_id, actor_id, decision, comment } = command;
        let now = now();
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        if !expense::claim_for_decision(&mut tx, &expense_id, &actor_id, &now).await? {
            let audit =
                AuditContext::new(Some(expense_id.clone()), None, correlation_id, &actor_id.0);
            self.audit.emit(
                audit
                    .event(
                        "routing.decision_refused",
                        AuditCategory::Routing,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("decision", decision.as_str())
                    .with_metadata("error", RoutingError::NotCurrentApprover.to_string()),
            );
            return Err(RoutingError::NotCurrentApprover.into());
        }

        let mut expense = expense::fetch_expense(&mut tx, &expense_id).await?.ok_or_else(|| {
            DomainError::InvariantViolation(format!("claimed expense `{expense_id}` vanished"))
        })?;
        let actor = user::fetch_user(&mut tx, &actor_id)
            .await?
            .ok_or(DomainError::Routing(RoutingError::NotCurrentApprover))?;
        let chain = approval_step::fetch_chain(&mut tx, &expense.company_id).await?;
        let holders = user::fetch_role_holders(&mut tx, &expense.company_id).await?;

        let audit = AuditContext::new(
            Some(expense.id.clone()),
            Some(expense.company_id.clone()),
            correlation_id,
            &actor.id.0,
        );
        let snapshot = ApproverSnapshot::from(&actor);
        let transition = self.router.route_with_audit(
            RoutingInput {
                expense: &expense,
                actor: &snapshot,
                decision,
                comment,
                chain: &chain,
                holders: &holders,
                now,
            },
            self.audit.as_ref(),
            &audit,
        )?;

        approval_record::append_record(&mut tx, &transition.record).await?;

        let claimed_version = expense.state_version;
        expense.transition_to(transition.to.clone(), now)?;
        if !expense::store_routing_state(&mut tx, &expense, claimed_version).await? {
            return Err(DomainError::InvariantViolation(format!(
                "expense `{}` changed while its decision was being recorded",
                expense.id
            ))
            .into());
        }

        tx.commit().await.map_err(persistence)?;
        Ok(DecisionReceipt { expense, transition })
    }

    /// Makes `target_id` the company's only special approver. Clearing and
    /// setting commit together; an unknown target leaves the previous flag
    /// in place.
    pub async fn set_special_approver(
        &self,
        company_id: &CompanyId,
        target_id: &UserId,
        actor: &str,
        correlation_id: &str,
    ) -> Result<(), ApplicationError> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        user::clear_special_approver(&mut tx, company_id).await?;
        if !user::mark_special_approver(&mut tx, company_id, target_id).await? {
            return Err(DomainError::UnknownUser(target_id.clone()).into());
        }

        tx.commit().await.map_err(persistence)?;

        self.audit.emit(
            AuditContext::new(None, Some(company_id.clone()), correlation_id, actor)
                .event(
                    "administration.special_approver_set",
                    AuditCategory::Administration,
                    AuditOutcome::Success,
                )
                .with_metadata("special_approver_id", target_id.0.clone()),
        );
        Ok(())
    }

    pub async fn create_user(
        &self,
        company_id: &CompanyId,
        draft: UserDraft,
        actor: &str,
        correlation_id: &str,
    ) -> Result<User, ApplicationError> {
        let draft = draft.normalized()?;
        let mut tx = self.pool.begin().await.map_err(persistence)?;

        if let Some(manager_id) = &draft.manager_id {
            let manager = user::fetch_user(&mut tx, manager_id).await?;
            if manager.map(|manager| manager.company_id) != Some(company_id.clone()) {
                return Err(DomainError::InvalidUser(format!(
                    "manager `{manager_id}` is not a member of company `{company_id}`"
                ))
                .into());
            }
        }
        if user::email_in_use(&mut tx, &draft.email).await? {
            return Err(DomainError::InvalidUser(format!(
                "email `{}` is already registered",
                draft.email
            ))
            .into());
        }

        let created = User {
            id: UserId::generate(),
            company_id: company_id.clone(),
            name: draft.name,
            email: draft.email,
            role: draft.role,
            manager_id: draft.manager_id,
            is_special_approver: false,
        };
        user::upsert_user(&mut tx, &created).await?;
        tx.commit().await.map_err(persistence)?;

        self.audit.emit(
            AuditContext::new(None, Some(company_id.clone()), correlation_id, actor)
                .event(
                    "administration.user_created",
                    AuditCategory::Administration,
                    AuditOutcome::Success,
                )
                .with_metadata("user_id", created.id.0.clone())
                .with_metadata("role", created.role.as_str()),
        );
        Ok(created)
    }

    pub async fn replace_approval_chain(
        &self,
        company_id: &CompanyId,
        steps: Vec<(Role, u32)>,
        actor: &str,
        correlation_id: &str,
    ) -> Result<ApprovalChain, ApplicationError> {
        let steps = steps
            .into_iter()
            .map(|(approver_role, sequence)| ApprovalStep {
                company_id: company_id.clone(),
                approver_role,
                sequence,
            })
            .collect();
        let chain = ApprovalChain::new(company_id.clone(), steps)?;

        let mut tx = self.pool.begin().await.map_err(persistence)?;
        approval_step::replace_chain(&mut tx, &chain).await?;
        tx.commit().await.map_err(persistence)?;

        let summary = chain
            .steps()
            .iter()
            .map(|step| format!("{}:{}", step.approver_role, step.sequence))
            .collect::<Vec<_>>()
            .join(",");
        self.audit.emit(
            AuditContext::new(None, Some(company_id.clone()), correlation_id, actor)
                .event(
                    "administration.chain_replaced",
                    AuditCategory::Administration,
                    AuditOutcome::Success,
                )
                .with_metadata("steps", summary),
        );
        Ok(chain)
    }

    pub async fn find_company(&self, id: &CompanyId) -> Result<Option<Company>, ApplicationError> {
        Ok(self.companies.find_by_id(id).await?)
    }

    pub async fn find_user(&self, id: &UserId) -> Result<Option<User>, ApplicationError> {
        Ok(self.users.find_by_id(id).await?)
    }

    pub async fn find_expense(&self, id: &ExpenseId) -> Result<Option<Expense>, ApplicationError> {
        Ok(self.expenses.find_by_id(id).await?)
    }

    /// Pending expenses waiting on `approver_id`, oldest first, each with the
    /// submitter's name.
    pub async fn list_pending_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingExpense>, ApplicationError> {
        Ok(self.expenses.list_pending_for(approver_id).await?)
    }

    /// The employee's own expenses, newest first.
    pub async fn list_submitted_by(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, ApplicationError> {
        Ok(self.expenses.list_submitted_by(employee_id).await?)
    }

    /// Approval records of an expense in append order. Only the submitter
    /// and admins of the expense's company may read them; everyone else gets
    /// the same answer as for a missing expense.
    pub async fn approval_history(
        &self,
        viewer: &User,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRecord>, ApplicationError> {
        let visible = match self.expenses.find_by_id(expense_id).await? {
            Some(expense) => {
                expense.employee_id == viewer.id
                    || (viewer.role == Role::Admin && viewer.company_id == expense.company_id)
            }
            None => false,
        };
        if !visible {
            return Err(DomainError::ExpenseNotVisible(expense_id.clone()).into());
        }

        Ok(self.records.list_for_expense(expense_id).await?)
    }

    pub async fn list_company_users(
        &self,
        company_id: &CompanyId,
    ) -> Result<Vec<User>, ApplicationError> {
        Ok(self.users.list_by_company(company_id).await?)
    }

    pub async fn approval_chain(
        &self,
        company_id: &CompanyId,
    ) -> Result<ApprovalChain, ApplicationError> {
        Ok(self.steps.load_chain(company_id).await?)
    }
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn persistence(error: sqlx::Error) -> ApplicationError {
    RepositoryError::from(error).into()
}
