pub mod engine;
pub mod states;

pub use engine::{ApprovalRouter, RoutingError};
pub use states::{
    ApproverSnapshot, CompletionReason, RoleHolders, RoutingInput, RoutingOutcome,
    RoutingTransition,
};
