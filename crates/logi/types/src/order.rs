//! Production orders

use crate::ids::{OrderId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Rejected textual input for an enumerated field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown order status: {0}")]
    Status(String),

    #[error("unknown priority: {0}")]
    Priority(String),
}

/// Lifecycle state of a production order.
///
/// `Placed` is the only initial state and `Complete` the only terminal
/// one. Any state may be targeted directly from a non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Placed,
    Claimed,
    Started,
    InProgress,
    ReadyForCollection,
    Complete,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Placed,
        OrderStatus::Claimed,
        OrderStatus::Started,
        OrderStatus::InProgress,
        OrderStatus::ReadyForCollection,
        OrderStatus::Complete,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Complete)
    }

    /// Key under which the transition time is stamped in `Order::timestamps`
    pub fn timestamp_key(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Claimed => "claimed",
            OrderStatus::Started => "started",
            OrderStatus::InProgress => "in_progress",
            OrderStatus::ReadyForCollection => "ready_for_collection",
            OrderStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Placed => write!(f, "Placed"),
            OrderStatus::Claimed => write!(f, "Claimed"),
            OrderStatus::Started => write!(f, "Started"),
            OrderStatus::InProgress => write!(f, "In Progress"),
            OrderStatus::ReadyForCollection => write!(f, "Ready for Collection"),
            OrderStatus::Complete => write!(f, "Complete"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ParseError;

    /// Accepts display names and snake/kebab case spellings, case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter_map(|c| match c {
                ' ' | '-' | '_' => None,
                other => Some(other.to_ascii_lowercase()),
            })
            .collect();

        match normalized.as_str() {
            "placed" => Ok(OrderStatus::Placed),
            "claimed" => Ok(OrderStatus::Claimed),
            "started" => Ok(OrderStatus::Started),
            "inprogress" => Ok(OrderStatus::InProgress),
            "readyforcollection" => Ok(OrderStatus::ReadyForCollection),
            "complete" => Ok(OrderStatus::Complete),
            _ => Err(ParseError::Status(s.to_string())),
        }
    }
}

/// Order priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "Low"),
            Priority::Normal => write!(f, "Normal"),
            Priority::High => write!(f, "High"),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" | "medium" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            _ => Err(ParseError::Priority(s.to_string())),
        }
    }
}

/// A production request tracked from placement to collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub item: String,
    pub quantity: u32,
    pub priority: Priority,
    pub status: OrderStatus,
    pub requested_by: UserId,
    pub claimed_by: Option<UserId>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub timestamps: BTreeMap<String, DateTime<Utc>>,
}

impl Order {
    pub fn new(
        id: OrderId,
        item: impl Into<String>,
        quantity: u32,
        priority: Priority,
        requested_by: UserId,
        location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut timestamps = BTreeMap::new();
        timestamps.insert(OrderStatus::Placed.timestamp_key().to_string(), now);

        Self {
            id,
            item: item.into(),
            quantity,
            priority,
            status: OrderStatus::Placed,
            requested_by,
            claimed_by: None,
            location: location.into(),
            timestamps,
        }
    }

    /// Move to `status` and stamp the transition time
    pub fn transition(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.timestamps
            .insert(status.timestamp_key().to_string(), now);
    }
}
