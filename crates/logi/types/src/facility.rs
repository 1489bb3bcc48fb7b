//! Facilities and supply tunnels

use crate::display::StatusTier;
use crate::ids::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A depletable supply counter consumed at a fixed hourly rate.
///
/// `last_updated` is the basis for the next decay computation. It moves
/// forward whenever decay is applied or supplies are mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tunnel {
    pub name: String,
    pub total_supplies: f64,
    /// Units consumed per hour
    pub usage_rate: f64,
    #[serde(default)]
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Tunnel {
    pub fn new(
        name: impl Into<String>,
        total_supplies: f64,
        usage_rate: f64,
        location: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            total_supplies,
            usage_rate,
            location: location.into(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Hours until the tunnel runs dry at the current rate, `None` when
    /// nothing is being consumed
    pub fn hours_remaining(&self) -> Option<f64> {
        if self.usage_rate > 0.0 {
            Some(self.total_supplies / self.usage_rate)
        } else {
            None
        }
    }

    pub fn status_tier(&self) -> StatusTier {
        StatusTier::classify(self.total_supplies, self.hours_remaining())
    }
}

/// Partial tunnel update. `None` leaves the field untouched, which is
/// distinct from setting it to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelUpdate {
    pub total_supplies: Option<f64>,
    pub usage_rate: Option<f64>,
    pub location: Option<String>,
}

impl TunnelUpdate {
    pub fn is_empty(&self) -> bool {
        self.total_supplies.is_none() && self.usage_rate.is_none() && self.location.is_none()
    }
}

/// A named collection of tunnels sharing one dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Facility {
    pub name: String,
    #[serde(default)]
    pub tunnels: BTreeMap<String, Tunnel>,
    pub created_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl Facility {
    pub fn new(name: impl Into<String>, created_by: UserId, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            tunnels: BTreeMap::new(),
            created_at: now,
            created_by,
        }
    }

    pub fn tunnel(&self, name: &str) -> Option<&Tunnel> {
        self.tunnels.get(name)
    }

    pub fn total_supplies(&self) -> f64 {
        self.tunnels.values().map(|t| t.total_supplies).sum()
    }
}
