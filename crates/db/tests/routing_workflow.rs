use std::sync::Arc;

use rust_decimal::Decimal;
use spendflow_core::audit::InMemoryAuditSink;
use spendflow_core::domain::approval::Decision;
use spendflow_core::domain::company::CompanyId;
use spendflow_core::domain::expense::{Expense, ExpenseDraft, ExpenseId, ExpenseStatus, RoutingState};
use spendflow_core::domain::user::{Role, User, UserDraft, UserId};
use spendflow_core::errors::{ApplicationError, DomainError};
use spendflow_core::routing::{CompletionReason, RoutingError, RoutingOutcome};
use spendflow_db::{
    connect_with_settings, migrations, DbPool, DecisionCommand, DemoTenant, ExpenseWorkflow,
};

type WorkflowTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {{
        let (left, right) = (&$left, &$right);
        if left != right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                left, right
            ));
        }
    }};
}

const CORRELATION_ID: &str = "req-test";

fn uid(id: &str) -> UserId {
    UserId(id.to_string())
}

fn acme() -> CompanyId {
    CompanyId("acme".to_string())
}

async fn memory_workflow() -> WorkflowTestResult<ExpenseWorkflow> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    seeded(pool).await
}

async fn seeded(pool: DbPool) -> WorkflowTestResult<ExpenseWorkflow> {
    migrations::run_pending(&pool).await.map_err(|error| format!("migrations: {error}"))?;
    DemoTenant::load(&pool).await.map_err(|error| format!("seed: {error}"))?;
    Ok(ExpenseWorkflow::new(pool))
}

fn draft(amount: i64) -> ExpenseDraft {
    ExpenseDraft {
        amount: Decimal::new(amount, 2),
        currency: "usd".to_string(),
        category: "Travel".to_string(),
        description: "Client visit".to_string(),
    }
}

async fn submit(workflow: &ExpenseWorkflow) -> WorkflowTestResult<Expense> {
    workflow
        .create_expense(&uid("u-employee"), draft(12_500), CORRELATION_ID)
        .await
        .map_err(|error| format!("submit: {error}"))
}

async fn decide(
    workflow: &ExpenseWorkflow,
    expense_id: &ExpenseId,
    actor: &str,
    decision: Decision,
    comment: Option<&str>,
) -> Result<spendflow_db::DecisionReceipt, ApplicationError> {
    workflow
        .record_decision(
            DecisionCommand {
                expense_id: expense_id.clone(),
                actor_id: uid(actor),
                decision,
                comment: comment.map(str::to_string),
            },
            CORRELATION_ID,
        )
        .await
}

async fn stored(workflow: &ExpenseWorkflow, id: &ExpenseId) -> WorkflowTestResult<Expense> {
    workflow
        .find_expense(id)
        .await
        .map_err(|error| format!("find expense: {error}"))?
        .ok_or_else(|| format!("expense {id} should exist"))
}

async fn admin(workflow: &ExpenseWorkflow) -> WorkflowTestResult<User> {
    workflow
        .find_user(&uid("u-admin"))
        .await
        .map_err(|error| format!("find admin: {error}"))?
        .ok_or_else(|| "admin should exist".to_string())
}

fn is_not_current_approver(result: &Result<spendflow_db::DecisionReceipt, ApplicationError>) -> bool {
    matches!(
        result,
        Err(ApplicationError::Domain(DomainError::Routing(RoutingError::NotCurrentApprover)))
    )
}

#[tokio::test]
async fn scenario_a_manager_forwards_to_director_who_approves() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let expense = submit(&workflow).await?;
    require_eq!(expense.state, RoutingState::Pending(uid("u-manager")));
    require_eq!(expense.currency, "USD");

    let forwarded = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None)
        .await
        .map_err(|error| format!("manager approval: {error}"))?;
    require_eq!(
        forwarded.transition.outcome,
        RoutingOutcome::Forwarded { to: uid("u-director"), role: Role::Director }
    );
    require_eq!(stored(&workflow, &expense.id).await?.state, RoutingState::Pending(uid("u-director")));

    let pending_for_director = workflow
        .list_pending_for(&uid("u-director"))
        .await
        .map_err(|error| format!("pending list: {error}"))?;
    require_eq!(pending_for_director.len(), 1);
    require_eq!(pending_for_director[0].expense.id, expense.id);
    require_eq!(pending_for_director[0].employee_name.as_str(), "Eli Employee");

    let approved = decide(&workflow, &expense.id, "u-director", Decision::Approved, None)
        .await
        .map_err(|error| format!("director approval: {error}"))?;
    require_eq!(
        approved.transition.outcome,
        RoutingOutcome::ApprovedFinal { reason: CompletionReason::ChainComplete }
    );

    let final_state = stored(&workflow, &expense.id).await?;
    require_eq!(final_state.status(), ExpenseStatus::Approved);
    require!(final_state.current_approver_id().is_none(), "approved expense has no approver");
    require_eq!(final_state.state_version, 2);

    let history = workflow
        .approval_history(&admin(&workflow).await?, &expense.id)
        .await
        .map_err(|error| format!("history: {error}"))?;
    let approvers: Vec<_> = history.iter().map(|record| record.approver_id.0.as_str()).collect();
    require_eq!(approvers, ["u-manager", "u-director"]);
    Ok(())
}

#[tokio::test]
async fn scenario_b_special_approver_short_circuits_the_chain() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    workflow
        .set_special_approver(&acme(), &uid("u-manager"), "u-admin", CORRELATION_ID)
        .await
        .map_err(|error| format!("set special approver: {error}"))?;
    let expense = submit(&workflow).await?;

    let receipt = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None)
        .await
        .map_err(|error| format!("special approval: {error}"))?;
    require!(receipt.transition.outcome.special_override(), "outcome should be special override");
    require_eq!(receipt.expense.state, RoutingState::Approved);

    let director_queue = workflow
        .list_pending_for(&uid("u-director"))
        .await
        .map_err(|error| format!("pending list: {error}"))?;
    require!(director_queue.is_empty(), "director should never see the expense");
    Ok(())
}

#[tokio::test]
async fn scenario_c_rejection_keeps_comment_and_clears_approver() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let expense = submit(&workflow).await?;

    decide(&workflow, &expense.id, "u-manager", Decision::Rejected, Some("missing receipt"))
        .await
        .map_err(|error| format!("rejection: {error}"))?;

    let final_state = stored(&workflow, &expense.id).await?;
    require_eq!(final_state.state, RoutingState::Rejected);

    let employee = workflow
        .find_user(&uid("u-employee"))
        .await
        .map_err(|error| format!("find employee: {error}"))?
        .ok_or_else(|| "employee should exist".to_string())?;
    let history = workflow
        .approval_history(&employee, &expense.id)
        .await
        .map_err(|error| format!("history: {error}"))?;
    require_eq!(history.len(), 1);
    require_eq!(history[0].decision, Decision::Rejected);
    require_eq!(history[0].comment.as_deref(), Some("missing receipt"));
    Ok(())
}

#[tokio::test]
async fn scenario_d_single_step_chain_completes_on_manager_approval() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    workflow
        .replace_approval_chain(&acme(), vec![(Role::Manager, 1)], "u-admin", CORRELATION_ID)
        .await
        .map_err(|error| format!("replace chain: {error}"))?;
    let expense = submit(&workflow).await?;

    let receipt = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None)
        .await
        .map_err(|error| format!("approval: {error}"))?;
    require_eq!(
        receipt.transition.outcome,
        RoutingOutcome::ApprovedFinal { reason: CompletionReason::ChainComplete }
    );
    require_eq!(stored(&workflow, &expense.id).await?.state, RoutingState::Approved);
    Ok(())
}

#[tokio::test]
async fn scenario_e_submission_without_manager_creates_nothing() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;

    let result = workflow.create_expense(&uid("u-director"), draft(5_000), CORRELATION_ID).await;
    require!(
        matches!(
            result,
            Err(ApplicationError::Domain(DomainError::NoManagerAssigned { ref employee_id }))
                if *employee_id == uid("u-director")
        ),
        "unexpected result: {result:?}"
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expenses")
        .fetch_one(workflow.pool())
        .await
        .map_err(|error| format!("count: {error}"))?;
    require_eq!(count, 0);
    Ok(())
}

#[tokio::test]
async fn non_current_approver_is_refused_without_side_effects() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let expense = submit(&workflow).await?;

    let by_director = decide(&workflow, &expense.id, "u-director", Decision::Approved, None).await;
    require!(is_not_current_approver(&by_director), "director is not the current approver");

    let missing =
        decide(&workflow, &ExpenseId("exp_missing".to_string()), "u-manager", Decision::Approved, None)
            .await;
    require!(is_not_current_approver(&missing), "missing expense must look the same");

    let unchanged = stored(&workflow, &expense.id).await?;
    require_eq!(unchanged.state, RoutingState::Pending(uid("u-manager")));
    require_eq!(unchanged.state_version, 0);

    decide(&workflow, &expense.id, "u-manager", Decision::Rejected, None)
        .await
        .map_err(|error| format!("rejection: {error}"))?;
    let after_terminal = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None).await;
    require!(is_not_current_approver(&after_terminal), "terminal expenses accept no decisions");
    Ok(())
}

#[tokio::test]
async fn missing_chain_entry_rolls_back_the_whole_decision() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    workflow
        .replace_approval_chain(&acme(), vec![(Role::Director, 1)], "u-admin", CORRELATION_ID)
        .await
        .map_err(|error| format!("replace chain: {error}"))?;
    let expense = submit(&workflow).await?;

    let result = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None).await;
    require!(
        matches!(
            result,
            Err(ApplicationError::Domain(DomainError::Routing(
                RoutingError::ChainConfigMissing { role: Role::Manager, .. }
            )))
        ),
        "unexpected result: {result:?}"
    );

    let unchanged = stored(&workflow, &expense.id).await?;
    require_eq!(unchanged, expense);
    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approvals")
        .fetch_one(workflow.pool())
        .await
        .map_err(|error| format!("count: {error}"))?;
    require_eq!(records, 0);
    Ok(())
}

#[tokio::test]
async fn special_approver_flag_is_exclusive_idempotent_and_company_scoped() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;

    for target in ["u-manager", "u-director", "u-director"] {
        workflow
            .set_special_approver(&acme(), &uid(target), "u-admin", CORRELATION_ID)
            .await
            .map_err(|error| format!("set {target}: {error}"))?;
    }

    let flagged = |users: Vec<User>| -> Vec<String> {
        users.into_iter().filter(|user| user.is_special_approver).map(|user| user.id.0).collect()
    };
    let users = workflow
        .list_company_users(&acme())
        .await
        .map_err(|error| format!("list users: {error}"))?;
    require_eq!(flagged(users), ["u-director"]);

    let unknown = workflow
        .set_special_approver(&acme(), &uid("u-nobody"), "u-admin", CORRELATION_ID)
        .await;
    require!(
        matches!(unknown, Err(ApplicationError::Domain(DomainError::UnknownUser(_)))),
        "unexpected result: {unknown:?}"
    );
    let users = workflow
        .list_company_users(&acme())
        .await
        .map_err(|error| format!("list users: {error}"))?;
    require_eq!(flagged(users), ["u-director"]);
    Ok(())
}

#[tokio::test]
async fn approval_records_are_append_only() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let expense = submit(&workflow).await?;
    decide(&workflow, &expense.id, "u-manager", Decision::Rejected, Some("duplicate"))
        .await
        .map_err(|error| format!("rejection: {error}"))?;

    let update = sqlx::query("UPDATE approvals SET decision = 'approved'")
        .execute(workflow.pool())
        .await;
    require!(update.is_err(), "approval records must not be updated");

    let delete = sqlx::query("DELETE FROM approvals").execute(workflow.pool()).await;
    require!(delete.is_err(), "approval records must not be deleted");
    Ok(())
}

#[tokio::test]
async fn approval_history_is_hidden_from_unrelated_users() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let expense = submit(&workflow).await?;

    let director = workflow
        .find_user(&uid("u-director"))
        .await
        .map_err(|error| format!("find director: {error}"))?
        .ok_or_else(|| "director should exist".to_string())?;
    let hidden = workflow.approval_history(&director, &expense.id).await;
    require!(
        matches!(hidden, Err(ApplicationError::Domain(DomainError::ExpenseNotVisible(_)))),
        "unexpected result: {hidden:?}"
    );
    Ok(())
}

#[tokio::test]
async fn admins_add_users_under_managers_of_their_own_company() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;

    let hire = workflow
        .create_user(
            &acme(),
            UserDraft {
                name: "Nina New".to_string(),
                email: "nina@acme.test".to_string(),
                role: Role::Employee,
                manager_id: Some(uid("u-manager")),
            },
            "u-admin",
            CORRELATION_ID,
        )
        .await
        .map_err(|error| format!("create user: {error}"))?;
    require_eq!(hire.manager_id, Some(uid("u-manager")));

    let expense = workflow
        .create_expense(&hire.id, draft(900), CORRELATION_ID)
        .await
        .map_err(|error| format!("submit: {error}"))?;
    require_eq!(expense.state, RoutingState::Pending(uid("u-manager")));

    let duplicate = workflow
        .create_user(
            &acme(),
            UserDraft {
                name: "Nina Again".to_string(),
                email: "NINA@acme.test".to_string(),
                role: Role::Employee,
                manager_id: None,
            },
            "u-admin",
            CORRELATION_ID,
        )
        .await;
    require!(
        matches!(duplicate, Err(ApplicationError::Domain(DomainError::InvalidUser(_)))),
        "unexpected result: {duplicate:?}"
    );
    Ok(())
}

#[tokio::test]
async fn routing_decisions_reach_the_audit_sink() -> WorkflowTestResult {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    let sink = InMemoryAuditSink::default();
    let workflow = seeded(pool).await?.with_audit_sink(Arc::new(sink.clone()));

    let expense = submit(&workflow).await?;
    decide(&workflow, &expense.id, "u-manager", Decision::Approved, None)
        .await
        .map_err(|error| format!("approval: {error}"))?;
    let _ = decide(&workflow, &expense.id, "u-manager", Decision::Approved, None).await;

    let event_types: Vec<_> = sink.events().into_iter().map(|event| event.event_type).collect();
    require_eq!(
        event_types,
        ["expense.submitted", "routing.decision_recorded", "routing.decision_refused"]
    );
    Ok(())
}

#[tokio::test]
async fn every_terminal_expense_ends_with_a_matching_record() -> WorkflowTestResult {
    let workflow = memory_workflow().await?;
    let admin = admin(&workflow).await?;

    let plans: [&[(&str, Decision)]; 3] = [
        &[("u-manager", Decision::Rejected)],
        &[("u-manager", Decision::Approved), ("u-director", Decision::Rejected)],
        &[("u-manager", Decision::Approved), ("u-director", Decision::Approved)],
    ];

    for plan in plans {
        let expense = submit(&workflow).await?;
        for (actor, decision) in plan {
            decide(&workflow, &expense.id, actor, *decision, None)
                .await
                .map_err(|error| format!("{actor} decision: {error}"))?;
        }

        let final_state = stored(&workflow, &expense.id).await?;
        require!(final_state.state.is_terminal(), "plan should end in a terminal state");
        let history = workflow
            .approval_history(&admin, &expense.id)
            .await
            .map_err(|error| format!("history: {error}"))?;
        let last = history.last().ok_or_else(|| "terminal expense without records".to_string())?;
        let expected = match final_state.status() {
            ExpenseStatus::Approved => Decision::Approved,
            _ => Decision::Rejected,
        };
        require_eq!(last.decision, expected);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decisions_on_one_expense_have_exactly_one_winner() -> WorkflowTestResult {
    let dir = tempfile::tempdir().map_err(|error| error.to_string())?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("race.db").display());
    let pool =
        connect_with_settings(&url, 4, 30).await.map_err(|error| format!("connect: {error}"))?;
    let workflow = Arc::new(seeded(pool).await?);

    for round in 0..5 {
        let expense = submit(&workflow).await?;

        let approve = {
            let workflow = Arc::clone(&workflow);
            let id = expense.id.clone();
            tokio::spawn(async move {
                decide(&workflow, &id, "u-manager", Decision::Approved, None).await
            })
        };
        let reject = {
            let workflow = Arc::clone(&workflow);
            let id = expense.id.clone();
            tokio::spawn(async move {
                decide(&workflow, &id, "u-manager", Decision::Rejected, None).await
            })
        };

        let results = [
            approve.await.map_err(|error| format!("join: {error}"))?,
            reject.await.map_err(|error| format!("join: {error}"))?,
        ];
        let winners = results.iter().filter(|result| result.is_ok()).count();
        let losers = results.iter().filter(|result| is_not_current_approver(result)).count();
        require!(winners == 1 && losers == 1, "round {round}: unexpected results {results:?}");

        let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM approvals WHERE expense_id = ?")
            .bind(&expense.id.0)
            .fetch_one(workflow.pool())
            .await
            .map_err(|error| format!("count: {error}"))?;
        require_eq!(records, 1);
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_special_approver_updates_leave_one_flag() -> WorkflowTestResult {
    let dir = tempfile::tempdir().map_err(|error| error.to_string())?;
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("special.db").display());
    let pool =
        connect_with_settings(&url, 4, 30).await.map_err(|error| format!("connect: {error}"))?;
    let workflow = Arc::new(seeded(pool).await?);

    let mut handles = Vec::new();
    for target in ["u-manager", "u-director", "u-admin", "u-manager", "u-director"] {
        let workflow = Arc::clone(&workflow);
        handles.push(tokio::spawn(async move {
            workflow.set_special_approver(&acme(), &uid(target), "u-admin", CORRELATION_ID).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|error| format!("join: {error}"))?
            .map_err(|error| format!("set special approver: {error}"))?;
    }

    let flagged: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM users WHERE company_id = 'acme' AND is_special_approver = 1",
    )
    .fetch_one(workflow.pool())
    .await
    .map_err(|error| format!("count: {error}"))?;
    require_eq!(flagged, 1);
    Ok(())
}
