use sqlx::{Row, SqliteConnection};

use spendflow_core::domain::approval::{ApprovalChain, ApprovalStep};
use spendflow_core::domain::company::CompanyId;
use spendflow_core::domain::user::Role;

use super::{ApprovalStepRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalStepRepository {
    pool: DbPool,
}

impl SqlApprovalStepRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn fetch_chain(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
) -> Result<ApprovalChain, RepositoryError> {
    let rows = sqlx::query(
        "SELECT approver_role, sequence FROM approval_steps
         WHERE company_id = ? ORDER BY sequence ASC",
    )
    .bind(&company_id.0)
    .fetch_all(&mut *conn)
    .await?;

    let steps = rows
        .iter()
        .map(|row| -> Result<ApprovalStep, RepositoryError> {
            let role: String = row.try_get("approver_role")?;
            let sequence: i64 = row.try_get("sequence")?;
            Ok(ApprovalStep {
                company_id: company_id.clone(),
                approver_role: Role::parse(&role).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown approver role `{role}`"))
                })?,
                sequence: u32::try_from(sequence).map_err(|_| {
                    RepositoryError::Decode(format!("approval step sequence {sequence} out of range"))
                })?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    ApprovalChain::new(company_id.clone(), steps)
        .map_err(|error| RepositoryError::Decode(error.to_string()))
}

/// Replaces every step of the chain's company with the given chain.
pub(crate) async fn replace_chain(
    conn: &mut SqliteConnection,
    chain: &ApprovalChain,
) -> Result<(), RepositoryError> {
    sqlx::query("DELETE FROM approval_steps WHERE company_id = ?")
        .bind(&chain.company_id().0)
        .execute(&mut *conn)
        .await?;

    for step in chain.steps() {
        sqlx::query(
            "INSERT INTO approval_steps (company_id, approver_role, sequence) VALUES (?, ?, ?)",
        )
        .bind(&step.company_id.0)
        .bind(step.approver_role.as_str())
        .bind(i64::from(step.sequence))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

#[async_trait::async_trait]
impl ApprovalStepRepository for SqlApprovalStepRepository {
    async fn load_chain(&self, company_id: &CompanyId) -> Result<ApprovalChain, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_chain(&mut conn, company_id).await
    }
}
