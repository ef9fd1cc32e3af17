//! Who may do what.

use common::UserId;
use thiserror::Error;

use crate::config::LedgerConfig;

/// An operation subject to authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    CreateInterim,
    CreateFinal,
    ReverseInterim { performed_by: UserId },
    ReverseFinal,
    RecordPayment,
    EditPayment,
    ViewFinalHistory,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::CreateInterim => f.write_str("create an interim settlement"),
            Action::CreateFinal => f.write_str("create a final settlement"),
            Action::ReverseInterim { performed_by } => {
                write!(f, "reverse an interim settlement performed by {performed_by}")
            }
            Action::ReverseFinal => f.write_str("reverse a final settlement"),
            Action::RecordPayment => f.write_str("record a payment"),
            Action::EditPayment => f.write_str("edit a payment"),
            Action::ViewFinalHistory => f.write_str("view final settlement history"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{actor} may not {action}")]
pub struct AccessDenied {
    pub actor: UserId,
    pub action: Action,
}

/// Decides whether an identity may perform an action.
///
/// Consulted before the ledger reads any mutable state.
pub trait AccessPolicy: Send + Sync {
    fn is_allowed(&self, actor: &UserId, action: &Action) -> bool;

    fn authorize(&self, actor: &UserId, action: Action) -> Result<(), AccessDenied> {
        if self.is_allowed(actor, &action) {
            Ok(())
        } else {
            tracing::warn!(%actor, %action, "authorization denied");
            Err(AccessDenied {
                actor: actor.clone(),
                action,
            })
        }
    }
}

/// Role rules with one fixed supervisor and one fixed owner.
#[derive(Debug, Clone)]
pub struct RolePolicy {
    supervisor: UserId,
    owner: UserId,
}

impl RolePolicy {
    pub fn new(supervisor: UserId, owner: UserId) -> Self {
        Self { supervisor, owner }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.supervisor.clone(), config.owner.clone())
    }
}

impl AccessPolicy for RolePolicy {
    fn is_allowed(&self, actor: &UserId, action: &Action) -> bool {
        match action {
            // The owner is the end of the chain; there is nobody to hand to.
            Action::CreateInterim => actor != &self.owner,
            Action::CreateFinal | Action::ReverseFinal | Action::ViewFinalHistory => {
                actor == &self.owner
            }
            Action::ReverseInterim { performed_by } => {
                actor == performed_by || actor == &self.supervisor || actor == &self.owner
            }
            Action::RecordPayment | Action::EditPayment => true,
        }
    }
}
