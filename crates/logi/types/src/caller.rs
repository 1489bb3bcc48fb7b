//! Pre-resolved caller identity and capability
//!
//! Role membership is resolved by the chat transport before a ledger
//! operation is invoked. The ledger only sees the outcome.

use crate::ids::UserId;
use serde::{Deserialize, Serialize};

/// Capability level the transport resolved for a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// Regular member: may add supplies and work on orders
    Member,
    /// Officer: may additionally manage tunnels, delete orders, override
    /// claims and end the war
    Officer,
}

impl Capability {
    pub fn is_elevated(&self) -> bool {
        matches!(self, Capability::Officer)
    }
}

/// The actor invoking a ledger operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user: UserId,
    pub capability: Capability,
}

impl Caller {
    pub fn member(user: impl Into<String>) -> Self {
        Self {
            user: UserId::new(user),
            capability: Capability::Member,
        }
    }

    pub fn officer(user: impl Into<String>) -> Self {
        Self {
            user: UserId::new(user),
            capability: Capability::Officer,
        }
    }

    /// Identity used by the daemon for scheduled actions
    pub fn system() -> Self {
        Self::officer("system")
    }

    pub fn is_elevated(&self) -> bool {
        self.capability.is_elevated()
    }
}
