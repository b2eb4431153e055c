use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use spendflow_core::domain::company::{Company, CompanyId};

use super::{encode_timestamp, CompanyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCompanyRepository {
    pool: DbPool,
}

impl SqlCompanyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn company_from_row(row: &SqliteRow) -> Result<Company, RepositoryError> {
    Ok(Company {
        id: CompanyId(row.try_get("id")?),
        name: row.try_get("name")?,
        base_currency: row.try_get("base_currency")?,
    })
}

pub(crate) async fn fetch_company(
    conn: &mut SqliteConnection,
    id: &CompanyId,
) -> Result<Option<Company>, RepositoryError> {
    let row = sqlx::query("SELECT id, name, base_currency FROM companies WHERE id = ?")
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(company_from_row).transpose()
}

pub(crate) async fn upsert_company(
    conn: &mut SqliteConnection,
    company: &Company,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO companies (id, name, base_currency, created_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             base_currency = excluded.base_currency",
    )
    .bind(&company.id.0)
    .bind(&company.name)
    .bind(company.base_currency.to_ascii_uppercase())
    .bind(encode_timestamp(&Utc::now()))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl CompanyRepository for SqlCompanyRepository {
    async fn find_by_id(&self, id: &CompanyId) -> Result<Option<Company>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        fetch_company(&mut conn, id).await
    }

    async fn save(&self, company: Company) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        upsert_company(&mut conn, &company).await
    }
}

#[cfg(test)]
mod tests {
    use spendflow_core::domain::company::{Company, CompanyId};

    use super::SqlCompanyRepository;
    use crate::repositories::CompanyRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn save_upserts_and_normalizes_currency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlCompanyRepository::new(pool);

        repo.save(Company {
            id: CompanyId("acme".to_string()),
            name: "Acme".to_string(),
            base_currency: "usd".to_string(),
        })
        .await
        .expect("insert");
        repo.save(Company {
            id: CompanyId("acme".to_string()),
            name: "Acme Holdings".to_string(),
            base_currency: "eur".to_string(),
        })
        .await
        .expect("update");

        let found = repo.find_by_id(&CompanyId("acme".to_string())).await.expect("find");
        let found = found.expect("company should exist");
        assert_eq!(found.name, "Acme Holdings");
        assert_eq!(found.base_currency, "EUR");

        let missing = repo.find_by_id(&CompanyId("globex".to_string())).await.expect("find");
        assert!(missing.is_none());
    }
}
