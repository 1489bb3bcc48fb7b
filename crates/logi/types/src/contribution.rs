//! Contribution events and per-user totals

use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of ledger action, used for the contribution log and audit lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AddSupplies,
    FacilityCreated,
    TunnelAdded,
    TunnelUpdated,
    TunnelDeleted,
    OrderCreated,
    OrderClaimed,
    OrderStatusChanged,
    OrderDeleted,
    LeaderboardReset,
    WarArchived,
}

impl ActionKind {
    /// Supply additions are coalesced per actor, tunnel and day instead
    /// of being logged one by one
    pub fn is_supply_addition(&self) -> bool {
        matches!(self, ActionKind::AddSupplies)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::AddSupplies => "add_supplies",
            ActionKind::FacilityCreated => "facility_created",
            ActionKind::TunnelAdded => "tunnel_added",
            ActionKind::TunnelUpdated => "tunnel_updated",
            ActionKind::TunnelDeleted => "tunnel_deleted",
            ActionKind::OrderCreated => "order_created",
            ActionKind::OrderClaimed => "order_claimed",
            ActionKind::OrderStatusChanged => "order_status_changed",
            ActionKind::OrderDeleted => "order_deleted",
            ActionKind::LeaderboardReset => "leaderboard_reset",
            ActionKind::WarArchived => "war_archived",
        };
        write!(f, "{}", label)
    }
}

/// Append-only record of one contribution. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: UserId,
    pub action: ActionKind,
    pub tunnel: String,
    pub amount: u64,
}

/// Lifetime contribution record of a single user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    pub total: u64,
    #[serde(default)]
    pub events: Vec<ContributionEvent>,
}

impl ContributionRecord {
    pub fn append(&mut self, event: ContributionEvent) {
        self.total = self.total.saturating_add(event.amount);
        self.events.push(event);
    }
}

/// One ranked row of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user: UserId,
    pub total: u64,
}
