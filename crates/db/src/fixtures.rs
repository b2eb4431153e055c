use serde::Serialize;

use spendflow_core::domain::approval::{ApprovalChain, ApprovalStep};
use spendflow_core::domain::company::{Company, CompanyId};
use spendflow_core::domain::user::{Role, User, UserId};

use crate::connection::DbPool;
use crate::repositories::{approval_step, company, user, RepositoryError};

pub const DEMO_COMPANY_ID: &str = "acme";

/// Deterministic demo tenant: one user per role and a two-step chain.
const DEMO_USERS: &[DemoUser] = &[
    DemoUser {
        id: "u-admin",
        name: "Ada Admin",
        email: "admin@acme.test",
        role: Role::Admin,
        manager_id: None,
    },
    DemoUser {
        id: "u-director",
        name: "Dana Director",
        email: "director@acme.test",
        role: Role::Director,
        manager_id: None,
    },
    DemoUser {
        id: "u-manager",
        name: "Max Manager",
        email: "manager@acme.test",
        role: Role::Manager,
        manager_id: Some("u-director"),
    },
    DemoUser {
        id: "u-employee",
        name: "Eli Employee",
        email: "employee@acme.test",
        role: Role::Employee,
        manager_id: Some("u-manager"),
    },
];

const DEMO_CHAIN: &[(Role, u32)] = &[(Role::Manager, 1), (Role::Director, 2)];

#[derive(Debug, Clone, Copy)]
struct DemoUser {
    id: &'static str,
    name: &'static str,
    email: &'static str,
    role: Role,
    manager_id: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeedResult {
    pub company_id: String,
    pub users_seeded: Vec<String>,
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

pub struct DemoTenant;

impl DemoTenant {
    /// Loads the demo tenant. Re-running overwrites the demo rows in place.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let company_id = CompanyId(DEMO_COMPANY_ID.to_string());
        let mut tx = pool.begin().await?;

        company::upsert_company(
            &mut tx,
            &Company {
                id: company_id.clone(),
                name: "Acme Corp".to_string(),
                base_currency: "USD".to_string(),
            },
        )
        .await?;

        for demo in DEMO_USERS {
            user::upsert_user(&mut tx, &demo.to_user(&company_id)).await?;
        }

        approval_step::replace_chain(&mut tx, &demo_chain(&company_id)?).await?;
        tx.commit().await?;

        Ok(SeedResult {
            company_id: company_id.0,
            users_seeded: DEMO_USERS.iter().map(|demo| demo.id.to_string()).collect(),
            chain: DEMO_CHAIN.iter().map(|(role, sequence)| format!("{role}:{sequence}")).collect(),
        })
    }

    /// Checks that every demo row is present with its seeded role and chain.
    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let company_id = CompanyId(DEMO_COMPANY_ID.to_string());
        let mut conn = pool.acquire().await?;
        let mut checks = Vec::new();

        let company = company::fetch_company(&mut conn, &company_id).await?;
        checks.push(("company".to_string(), company.is_some()));

        for demo in DEMO_USERS {
            let stored = user::fetch_user(&mut conn, &UserId(demo.id.to_string())).await?;
            let matches = stored
                .map(|stored| stored.role == demo.role && stored.company_id == company_id)
                .unwrap_or(false);
            checks.push((format!("user:{}", demo.id), matches));
        }

        let chain = approval_step::fetch_chain(&mut conn, &company_id).await?;
        checks.push(("approval-chain".to_string(), chain == demo_chain(&company_id)?));

        let all_present = checks.iter().all(|(_, present)| *present);
        Ok(VerificationResult { all_present, checks })
    }
}

impl DemoUser {
    fn to_user(self, company_id: &CompanyId) -> User {
        User {
            id: UserId(self.id.to_string()),
            company_id: company_id.clone(),
            name: self.name.to_string(),
            email: self.email.to_string(),
            role: self.role,
            manager_id: self.manager_id.map(|id| UserId(id.to_string())),
            is_special_approver: false,
        }
    }
}

fn demo_chain(company_id: &CompanyId) -> Result<ApprovalChain, RepositoryError> {
    let steps = DEMO_CHAIN
        .iter()
        .map(|(approver_role, sequence)| ApprovalStep {
            company_id: company_id.clone(),
            approver_role: *approver_role,
            sequence: *sequence,
        })
        .collect();
    ApprovalChain::new(company_id.clone(), steps)
        .map_err(|error| RepositoryError::Decode(error.to_string()))
}

/// A new tenant and its first administrator.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub company_id: CompanyId,
    pub company_name: String,
    pub base_currency: String,
    pub admin_name: String,
    pub admin_email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResult {
    pub company: Company,
    pub admin: User,
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("company `{0}` already exists")]
    CompanyExists(CompanyId),
    #[error("email `{0}` is already registered")]
    EmailTaken(String),
    #[error("invalid provisioning request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<sqlx::Error> for ProvisionError {
    fn from(value: sqlx::Error) -> Self {
        Self::Repository(RepositoryError::from(value))
    }
}

/// Creates a company together with its first admin. This is the only way a
/// tenant comes into existence; there is no first-signup promotion.
pub async fn provision(
    pool: &DbPool,
    request: ProvisionRequest,
) -> Result<ProvisionResult, ProvisionError> {
    let base_currency = request.base_currency.trim().to_ascii_uppercase();
    if base_currency.len() != 3 || !base_currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ProvisionError::Invalid(format!(
            "base currency `{}` must be a three-letter code",
            request.base_currency
        )));
    }
    if request.company_id.0.trim().is_empty() || request.company_name.trim().is_empty() {
        return Err(ProvisionError::Invalid("company id and name are required".to_string()));
    }
    let admin_email = request.admin_email.trim().to_ascii_lowercase();
    if !admin_email.contains('@') || request.admin_name.trim().is_empty() {
        return Err(ProvisionError::Invalid("admin name and email are required".to_string()));
    }

    let mut tx = pool.begin().await?;
    if company::fetch_company(&mut tx, &request.company_id).await?.is_some() {
        return Err(ProvisionError::CompanyExists(request.company_id));
    }
    if user::email_in_use(&mut tx, &admin_email).await? {
        return Err(ProvisionError::EmailTaken(admin_email));
    }

    let company = Company {
        id: request.company_id,
        name: request.company_name.trim().to_string(),
        base_currency,
    };
    let admin = User {
        id: UserId::generate(),
        company_id: company.id.clone(),
        name: request.admin_name.trim().to_string(),
        email: admin_email,
        role: Role::Admin,
        manager_id: None,
        is_special_approver: false,
    };

    company::upsert_company(&mut tx, &company).await?;
    user::upsert_user(&mut tx, &admin).await?;
    tx.commit().await?;

    Ok(ProvisionResult { company, admin })
}

#[cfg(test)]
mod tests {
    use spendflow_core::domain::company::CompanyId;
    use spendflow_core::domain::user::Role;

    use super::{provision, DemoTenant, ProvisionError, ProvisionRequest};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn request(company: &str, email: &str) -> ProvisionRequest {
        ProvisionRequest {
            company_id: CompanyId(company.to_string()),
            company_name: "Globex".to_string(),
            base_currency: "eur".to_string(),
            admin_name: "Gina".to_string(),
            admin_email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn demo_tenant_loads_idempotently_and_verifies() {
        let pool = setup().await;

        let first = DemoTenant::load(&pool).await.expect("first seed");
        DemoTenant::load(&pool).await.expect("second seed");
        assert_eq!(first.users_seeded.len(), 4);
        assert_eq!(first.chain, ["manager:1", "director:2"]);

        let verification = DemoTenant::verify(&pool).await.expect("verify");
        assert!(verification.all_present, "checks: {:?}", verification.checks);
    }

    #[tokio::test]
    async fn verification_fails_on_empty_database() {
        let pool = setup().await;
        let verification = DemoTenant::verify(&pool).await.expect("verify");
        assert!(!verification.all_present);
    }

    #[tokio::test]
    async fn provision_creates_company_with_first_admin() {
        let pool = setup().await;
        let result =
            provision(&pool, request("globex", "Gina@Globex.test")).await.expect("provision");

        assert_eq!(result.company.base_currency, "EUR");
        assert_eq!(result.admin.role, Role::Admin);
        assert_eq!(result.admin.email, "gina@globex.test");
        assert_eq!(result.admin.company_id, CompanyId("globex".to_string()));
    }

    #[tokio::test]
    async fn provision_refuses_existing_company_and_bad_currency() {
        let pool = setup().await;
        provision(&pool, request("globex", "gina@globex.test")).await.expect("provision");

        let duplicate = provision(&pool, request("globex", "other@globex.test")).await;
        assert!(matches!(duplicate, Err(ProvisionError::CompanyExists(_))));

        let mut bad_currency = request("initech", "ian@initech.test");
        bad_currency.base_currency = "euro".to_string();
        assert!(matches!(
            provision(&pool, bad_currency).await,
            Err(ProvisionError::Invalid(_))
        ));
    }
}
