use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalChain, ApprovalRecord, Decision};
use crate::domain::expense::{Expense, RoutingState};
use crate::domain::user::{Role, User, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    SpecialOverride,
    ChainComplete,
    NoHolderForNextRole,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpecialOverride => "special_override",
            Self::ChainComplete => "chain_complete",
            Self::NoHolderForNextRole => "no_holder_for_next_role",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoutingOutcome {
    Forwarded { to: UserId, role: Role },
    ApprovedFinal { reason: CompletionReason },
    Rejected,
}

impl RoutingOutcome {
    pub fn special_override(&self) -> bool {
        matches!(self, Self::ApprovedFinal { reason: CompletionReason::SpecialOverride })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Forwarded { .. } => "forwarded",
            Self::ApprovedFinal { .. } => "approved_final",
            Self::Rejected => "rejected",
        }
    }
}

/// What the router needs to know about the acting user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproverSnapshot {
    pub user_id: UserId,
    pub role: Role,
    pub is_special_approver: bool,
}

impl From<&User> for ApproverSnapshot {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            role: user.role,
            is_special_approver: user.is_special_approver,
        }
    }
}

/// One deterministic occupant per role: when several users share a role the
/// lowest user id wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoleHolders {
    holders: BTreeMap<Role, UserId>,
}

impl RoleHolders {
    pub fn insert(&mut self, role: Role, user_id: UserId) {
        match self.holders.get(&role) {
            Some(current) if *current <= user_id => {}
            _ => {
                self.holders.insert(role, user_id);
            }
        }
    }

    pub fn holder_of(&self, role: Role) -> Option<&UserId> {
        self.holders.get(&role)
    }
}

impl FromIterator<(Role, UserId)> for RoleHolders {
    fn from_iter<T: IntoIterator<Item = (Role, UserId)>>(iter: T) -> Self {
        let mut holders = Self::default();
        for (role, user_id) in iter {
            holders.insert(role, user_id);
        }
        holders
    }
}

pub struct RoutingInput<'a> {
    pub expense: &'a Expense,
    pub actor: &'a ApproverSnapshot,
    pub decision: Decision,
    pub comment: Option<String>,
    pub chain: &'a ApprovalChain,
    pub holders: &'a RoleHolders,
    pub now: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTransition {
    pub from: RoutingState,
    pub to: RoutingState,
    pub outcome: RoutingOutcome,
    pub record: ApprovalRecord,
}
