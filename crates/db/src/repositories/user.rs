use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use spendflow_core::domain::company::CompanyId;
use spendflow_core::domain::user::{Role, User, UserId};
use spendflow_core::routing::RoleHolders;

use super::{encode_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_role(raw: &str) -> Result<Role, RepositoryError> {
    Role::parse(raw).ok_or_else(|| RepositoryError::Decode(format!("unknown role `{raw}`")))
}

fn user_from_row(row: &SqliteRow) -> Result<User, RepositoryError> {
    let role: String = row.try_get("role")?;
    let manager_id: Option<String> = row.try_get("manager_id")?;

    Ok(User {
        id: UserId(row.try_get("id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        role: parse_role(&role)?,
        manager_id: manager_id.map(UserId),
        is_special_approver: row.try_get("is_special_approver")?,
    })
}

pub(crate) async fn fetch_user(
    conn: &mut SqliteConnection,
    id: &UserId,
) -> Result<Option<User>, RepositoryError> {
    let row = sqlx::query(
        "SELECT id, company_id, name, email, role, manager_id, is_special_approver
         FROM users WHERE id = ?",
    )
    .bind(&id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(user_from_row).transpose()
}

pub(crate) async fn fetch_company_users(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
) -> Result<Vec<User>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT id, company_id, name, email, role, manager_id, is_special_approver
         FROM users WHERE company_id = ? ORDER BY id ASC",
    )
    .bind(&company_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(user_from_row).collect()
}

/// Lowest user id per role within the company.
pub(crate) async fn fetch_role_holders(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
) -> Result<RoleHolders, RepositoryError> {
    let rows = sqlx::query(
        "SELECT role, MIN(id) AS holder FROM users WHERE company_id = ? GROUP BY role",
    )
    .bind(&company_id.0)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| -> Result<(Role, UserId), RepositoryError> {
            let role: String = row.try_get("role")?;
            let holder: String = row.try_get("holder")?;
            Ok((parse_role(&role)?, UserId(holder)))
        })
        .collect()
}

pub(crate) async fn email_in_use(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<bool, RepositoryError> {
    let taken: i64 = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)")
        .bind(email)
        .fetch_one(&mut *conn)
        .await?;

    Ok(taken == 1)
}

pub(crate) async fn upsert_user(
    conn: &mut SqliteConnection,
    user: &User,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO users (id, company_id, name, email, role, manager_id, is_special_approver, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             email = excluded.email,
             role = excluded.role,
             manager_id = excluded.manager_id,
             is_special_approver = excluded.is_special_approver",
    )
    .bind(&user.id.0)
    .bind(&user.company_id.0)
    .bind(&user.name)
    .bind(&user.email)
    .bind(user.role.as_str())
    .bind(user.manager_id.as_ref().map(|id| id.0.as_str()))
    .bind(user.is_special_approver)
    .bind(encode_timestamp(&Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn clear_special_approver(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
) -> Result<u64, RepositoryError> {
    let cleared = sqlx::query(
        "UPDATE users SET is_special_approver = 0
         WHERE company_id = ? AND is_special_approver = 1",
    )
    .bind(&company_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(cleared.rows_affected())
}

/// Returns false when the user is not a member of the company.
pub(crate) async fn mark_special_approver(
    conn: &mut SqliteConnection,
    company_id: &CompanyId,
    user_id: &UserId,
) -> Result<bool, RepositoryError> {
    let marked = sqlx::query(
        "UPDATE users SET is_special_approver = 1 WHERE id = ? AND company_id = ?",
    )
    .bind(&user_id.0)
    .bind(&company_id.0)
    .execute(&mut *conn)
    .await?;

    Ok(marked.rows_affected() == 1)
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    async fn list_by_company(&self, company_id: &CompanyId) -> Result<Vec<User>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_company_users(&mut conn, company_id).await
    }

    async fn role_holders(&self, company_id: &CompanyId) -> Result<RoleHolders, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_role_holders(&mut conn, company_id).await
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_user(&mut conn, &user).await
    }
}
