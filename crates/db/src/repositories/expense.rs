use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use spendflow_core::domain::company::CompanyId;
use spendflow_core::domain::expense::{
    Expense, ExpenseId, ExpenseStatus, PendingExpense, RoutingState,
};
use spendflow_core::domain::user::UserId;

use super::{decode_timestamp, encode_timestamp, ExpenseRepository, RepositoryError};
use crate::DbPool;

const EXPENSE_COLUMNS: &str = "id, employee_id, company_id, amount, currency, category, description,
     status, current_approver_id, state_version, created_at, updated_at";

const PENDING_QUEUE_COLUMNS: &str = "e.id AS id, e.employee_id AS employee_id,
     e.company_id AS company_id, e.amount AS amount, e.currency AS currency,
     e.category AS category, e.description AS description, e.status AS status,
     e.current_approver_id AS current_approver_id, e.state_version AS state_version,
     e.created_at AS created_at, e.updated_at AS updated_at, u.name AS employee_name";

pub struct SqlExpenseRepository {
    pool: DbPool,
}

impl SqlExpenseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn expense_from_row(row: &SqliteRow) -> Result<Expense, RepositoryError> {
    let amount: String = row.try_get("amount")?;
    let status: String = row.try_get("status")?;
    let current_approver_id: Option<String> = row.try_get("current_approver_id")?;
    let state_version: i64 = row.try_get("state_version")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let status = ExpenseStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown expense status `{status}`")))?;
    let state = RoutingState::from_columns(status, current_approver_id.map(UserId))
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Expense {
        id: ExpenseId(row.try_get("id")?),
        employee_id: UserId(row.try_get("employee_id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        amount: Decimal::from_str(&amount)
            .map_err(|error| RepositoryError::Decode(format!("amount `{amount}`: {error}")))?,
        currency: row.try_get("currency")?,
        category: row.try_get("category")?,
        description: row.try_get("description")?,
        state,
        state_version: u32::try_from(state_version).map_err(|_| {
            RepositoryError::Decode(format!("state_version {state_version} out of range"))
        })?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

pub(crate) async fn fetch_expense(
    conn: &mut SqliteConnection,
    id: &ExpenseId,
) -> Result<Option<Expense>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?"))
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(expense_from_row).transpose()
}

pub(crate) async fn fetch_pending_for(
    conn: &mut SqliteConnection,
    approver_id: &UserId,
) -> Result<Vec<PendingExpense>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {PENDING_QUEUE_COLUMNS} FROM expenses e
         JOIN users u ON u.id = e.employee_id
         WHERE e.current_approver_id = ? AND e.status = 'pending'
         ORDER BY e.created_at ASC, e.rowid ASC"
    ))
    .bind(&approver_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(PendingExpense {
                expense: expense_from_row(row)?,
                employee_name: row.try_get("employee_name")?,
            })
        })
        .collect()
}

pub(crate) async fn fetch_submitted_by(
    conn: &mut SqliteConnection,
    employee_id: &UserId,
) -> Result<Vec<Expense>, RepositoryError> {
    let rows = sqlx::query(&format!(
        "SELECT {EXPENSE_COLUMNS} FROM expenses
         WHERE employee_id = ?
         ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(&employee_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(expense_from_row).collect()
}

pub(crate) async fn insert_expense(
    conn: &mut SqliteConnection,
    expense: &Expense,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO expenses (id, employee_id, company_id, amount, currency, category, description,
                               status, current_approver_id, state_version, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&expense.id.0)
    .bind(&expense.employee_id.0)
    .bind(&expense.company_id.0)
    .bind(expense.amount.to_string())
    .bind(&expense.currency)
    .bind(&expense.category)
    .bind(&expense.description)
    .bind(expense.status().as_str())
    .bind(expense.current_approver_id().map(|id| id.0.as_str()))
    .bind(i64::from(expense.state_version))
    .bind(encode_timestamp(&expense.created_at))
    .bind(encode_timestamp(&expense.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Guarded write that only matches while `approver_id` is the current
/// approver of a pending expense. Must be the first statement of the
/// decision transaction so the writer lock is held before anything is read.
pub(crate) async fn claim_for_decision(
    conn: &mut SqliteConnection,
    id: &ExpenseId,
    approver_id: &UserId,
    now: &DateTime<Utc>,
) -> Result<bool, RepositoryError> {
    let claimed = sqlx::query(
        "UPDATE expenses SET updated_at = ?
         WHERE id = ? AND status = 'pending' AND current_approver_id = ?",
    )
    .bind(encode_timestamp(now))
    .bind(&id.0)
    .bind(&approver_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(claimed.rows_affected() == 1)
}

/// Compare-and-set on `state_version`; false when the row moved on.
pub(crate) async fn store_routing_state(
    conn: &mut SqliteConnection,
    expense: &Expense,
    expected_version: u32,
) -> Result<bool, RepositoryError> {
    let stored = sqlx::query(
        "UPDATE expenses
         SET status = ?, current_approver_id = ?, state_version = ?, updated_at = ?
         WHERE id = ? AND state_version = ?",
    )
    .bind(expense.status().as_str())
    .bind(expense.current_approver_id().map(|id| id.0.as_str()))
    .bind(i64::from(expense.state_version))
    .bind(encode_timestamp(&expense.updated_at))
    .bind(&expense.id.0)
    .bind(i64::from(expected_version))
    .execute(&mut *conn)
    .await?;

    Ok(stored.rows_affected() == 1)
}

#[async_trait::async_trait]
impl ExpenseRepository for SqlExpenseRepository {
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_expense(&mut conn, id).await
    }

    async fn list_pending_for(
        &self,
        approver_id: &UserId,
    ) -> Result<Vec<PendingExpense>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_pending_for(&mut conn, approver_id).await
    }

    async fn list_submitted_by(
        &self,
        employee_id: &UserId,
    ) -> Result<Vec<Expense>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_submitted_by(&mut conn, employee_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use spendflow_core::domain::company::{Company, CompanyId};
    use spendflow_core::domain::expense::{Expense, ExpenseId, RoutingState};
    use spendflow_core::domain::user::{Role, User, UserId};

    use super::{claim_for_decision, insert_expense, store_routing_state, SqlExpenseRepository};
    use crate::repositories::{
        CompanyRepository, ExpenseRepository, SqlCompanyRepository, SqlUserRepository,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        SqlCompanyRepository::new(pool.clone())
            .save(Company {
                id: CompanyId("acme".to_string()),
                name: "Acme".to_string(),
                base_currency: "USD".to_string(),
            })
            .await
            .expect("company");
        let users = SqlUserRepository::new(pool.clone());
        for (id, role) in [("u-emp", Role::Employee), ("u-mgr", Role::Manager)] {
            users
                .save(User {
                    id: UserId(id.to_string()),
                    company_id: CompanyId("acme".to_string()),
                    name: id.to_string(),
                    email: format!("{id}@acme.test"),
                    role,
                    manager_id: None,
                    is_special_approver: false,
                })
                .await
                .expect("user");
        }
        pool
    }

    fn expense(id: &str, minutes: i64) -> Expense {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("timestamp")
            + Duration::minutes(minutes);
        Expense {
            id: ExpenseId(id.to_string()),
            employee_id: UserId("u-emp".to_string()),
            company_id: CompanyId("acme".to_string()),
            amount: Decimal::new(12_550, 2),
            currency: "EUR".to_string(),
            category: "Travel".to_string(),
            description: "Train to Lyon".to_string(),
            state: RoutingState::Pending(UserId("u-mgr".to_string())),
            state_version: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn insert_and_find_preserves_amount_scale_and_state() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_expense(&mut conn, &expense("exp_1", 0)).await.expect("insert");
        drop(conn);

        let found = SqlExpenseRepository::new(pool)
            .find_by_id(&ExpenseId("exp_1".to_string()))
            .await
            .expect("find")
            .expect("expense should exist");
        assert_eq!(found, expense("exp_1", 0));
        assert_eq!(found.amount.to_string(), "125.50");
    }

    #[tokio::test]
    async fn pending_list_is_oldest_first_and_submitted_list_newest_first() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_expense(&mut conn, &expense("exp_late", 30)).await.expect("late");
        insert_expense(&mut conn, &expense("exp_early", 0)).await.expect("early");
        drop(conn);

        let repo = SqlExpenseRepository::new(pool);
        let pending =
            repo.list_pending_for(&UserId("u-mgr".to_string())).await.expect("pending list");
        let ids: Vec<_> = pending.iter().map(|entry| entry.expense.id.0.as_str()).collect();
        assert_eq!(ids, ["exp_early", "exp_late"]);
        assert!(pending.iter().all(|entry| entry.employee_name == "u-emp"));

        let mine = repo.list_submitted_by(&UserId("u-emp".to_string())).await.expect("mine");
        let ids: Vec<_> = mine.iter().map(|expense| expense.id.0.as_str()).collect();
        assert_eq!(ids, ["exp_late", "exp_early"]);
    }

    #[tokio::test]
    async fn claim_only_matches_the_current_approver() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.expect("acquire");
        insert_expense(&mut conn, &expense("exp_1", 0)).await.expect("insert");
        let id = ExpenseId("exp_1".to_string());
        let now = Utc::now();

        assert!(!claim_for_decision(&mut conn, &id, &UserId("u-emp".to_string()), &now)
            .await
            .expect("claim by submitter"));
        assert!(claim_for_decision(&mut conn, &id, &UserId("u-mgr".to_string()), &now)
            .await
            .expect("claim by manager"));
    }

    #[tokio::test]
    async fn table_check_rejects_pending_without_approver_and_stale_versions() {
        let pool = setup().await;
        let mut conn = pool.acquire().await.expect("acquire");
        let mut stored = expense("exp_1", 0);
        insert_expense(&mut conn, &stored).await.expect("insert");

        let broken = sqlx::query(
            "UPDATE expenses SET current_approver_id = NULL WHERE id = 'exp_1'",
        )
        .execute(&mut *conn)
        .await;
        assert!(broken.is_err(), "pending expense must keep its approver");

        stored.state = RoutingState::Approved;
        stored.state_version = 1;
        assert!(!store_routing_state(&mut conn, &stored, 7).await.expect("stale write"));
        assert!(store_routing_state(&mut conn, &stored, 0).await.expect("fresh write"));

        let deleted = sqlx::query("DELETE FROM expenses WHERE id = 'exp_1'")
            .execute(&mut *conn)
            .await;
        assert!(deleted.is_err(), "expenses are never deleted");
    }
}
