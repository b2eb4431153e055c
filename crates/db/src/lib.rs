pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use connection::{connect, connect_with_config, connect_with_settings, ping, DbPool};
pub use fixtures::{
    provision, DemoTenant, ProvisionError, ProvisionRequest, ProvisionResult, SeedResult,
    VerificationResult,
};
pub use workflow::{DecisionCommand, DecisionReceipt, ExpenseWorkflow};
