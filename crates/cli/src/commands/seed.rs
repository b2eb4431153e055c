use spendflow_db::{DemoTenant, SeedResult};

use crate::commands::{
    migrated_pool, prepare, CommandResult, StepError, EXIT_EXECUTION, EXIT_VERIFICATION,
};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;

        let seeded = DemoTenant::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_EXECUTION))?;

        let verification = DemoTenant::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_VERIFICATION))?;

        let run_result: Result<SeedResult, StepError> = if verification.all_present {
            Ok(seeded)
        } else {
            Err(("seed_verification", verification_message(&verification.checks), EXIT_VERIFICATION))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo tenant `{}` loaded: users {}; approval chain {}",
        seeded.company_id,
        seeded.users_seeded.join(", "),
        seeded.chain.join(" -> ")
    )
}

fn verification_message(checks: &[(String, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
        .collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
