pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "spendflow",
    about = "Spendflow operator CLI",
    long_about = "Operate Spendflow migrations, tenant provisioning, demo data, config inspection, and readiness checks.",
    after_help = "Examples:\n  spendflow migrate\n  spendflow provision --company-id globex --company-name Globex --base-currency EUR --admin-name Gina --admin-email gina@globex.test\n  spendflow doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the deterministic demo tenant and verify it")]
    Seed,
    #[command(about = "Create a company together with its first admin user")]
    Provision {
        #[arg(long)]
        company_id: String,
        #[arg(long)]
        company_name: String,
        #[arg(long, default_value = "USD")]
        base_currency: String,
        #[arg(long)]
        admin_name: String,
        #[arg(long)]
        admin_email: String,
    },
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, DB connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Provision { company_id, company_name, base_currency, admin_name, admin_email } => {
            commands::provision::run(commands::provision::ProvisionArgs {
                company_id,
                company_name,
                base_currency,
                admin_name,
                admin_email,
            })
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
