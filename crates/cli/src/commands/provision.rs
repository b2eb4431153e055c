use spendflow_core::CompanyId;
use spendflow_db::{provision, ProvisionError, ProvisionRequest, ProvisionResult};

use crate::commands::{migrated_pool, prepare, CommandResult, StepError, EXIT_EXECUTION};

#[derive(Debug, Clone)]
pub struct ProvisionArgs {
    pub company_id: String,
    pub company_name: String,
    pub base_currency: String,
    pub admin_name: String,
    pub admin_email: String,
}

pub fn run(args: ProvisionArgs) -> CommandResult {
    let (config, runtime) = match prepare("provision") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let request = ProvisionRequest {
        company_id: CompanyId(args.company_id.trim().to_string()),
        company_name: args.company_name,
        base_currency: args.base_currency,
        admin_name: args.admin_name,
        admin_email: args.admin_email,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let outcome = provision(&pool, request).await.map_err(classify);
        pool.close().await;
        outcome
    });

    match result {
        Ok(provisioned) => CommandResult::success("provision", summary(&provisioned)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("provision", error_class, message, exit_code)
        }
    }
}

fn classify(error: ProvisionError) -> StepError {
    let error_class = match &error {
        ProvisionError::Invalid(_) => "provision_validation",
        ProvisionError::CompanyExists(_) | ProvisionError::EmailTaken(_) => "provision_conflict",
        ProvisionError::Repository(_) => "provision_execution",
    };
    (error_class, error.to_string(), EXIT_EXECUTION)
}

fn summary(provisioned: &ProvisionResult) -> String {
    format!(
        "company `{}` ({}, base {}) provisioned with admin `{}` <{}>",
        provisioned.company.id,
        provisioned.company.name,
        provisioned.company.base_currency,
        provisioned.admin.id,
        provisioned.admin.email
    )
}
