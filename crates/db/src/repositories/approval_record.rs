use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use spendflow_core::domain::approval::{ApprovalRecord, ApprovalRecordId, Decision};
use spendflow_core::domain::expense::ExpenseId;
use spendflow_core::domain::user::UserId;

use super::{decode_timestamp, encode_timestamp, ApprovalRecordRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRecordRepository {
    pool: DbPool,
}

impl SqlApprovalRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let decision: String = row.try_get("decision")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ApprovalRecord {
        id: ApprovalRecordId(row.try_get("id")?),
        expense_id: ExpenseId(row.try_get("expense_id")?),
        approver_id: UserId(row.try_get("approver_id")?),
        decision: Decision::parse(&decision)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown decision `{decision}`")))?,
        comment: row.try_get("comment")?,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}

pub(crate) async fn append_record(
    conn: &mut SqliteConnection,
    record: &ApprovalRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO approvals (id, expense_id, approver_id, decision, comment, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id.0)
    .bind(&record.expense_id.0)
    .bind(&record.approver_id.0)
    .bind(record.decision.as_str())
    .bind(record.comment.as_deref())
    .bind(encode_timestamp(&record.created_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Records in append order.
pub(crate) async fn fetch_for_expense(
    conn: &mut SqliteConnection,
    expense_id: &ExpenseId,
) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, expense_id, approver_id, decision, comment, created_at
         FROM approvals WHERE expense_id = ? ORDER BY rowid ASC",
    )
    .bind(&expense_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(record_from_row).collect()
}

#[async_trait::async_trait]
impl ApprovalRecordRepository for SqlApprovalRecordRepository {
    async fn list_for_expense(
        &self,
        expense_id: &ExpenseId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_for_expense(&mut conn, expense_id).await
    }
}
