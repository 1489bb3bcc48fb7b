//! Time-based supply decay.
//!
//! Supplies drain linearly: `usage_rate` units per hour of wall-clock time
//! elapsed since `last_updated`. The same function serves the catch-up pass
//! run at startup and the periodic tick, so a delayed or skipped tick is
//! absorbed by the next one instead of drifting.

use chrono::{DateTime, Utc};
use logi_types::{Facility, Tunnel};
use std::collections::BTreeMap;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Effect of one decay application
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecayOutcome {
    /// Hours covered by this application
    pub elapsed_hours: f64,
    /// Units actually removed (bounded by what was left)
    pub consumed: f64,
}

/// Hours between `from` and `to`, negative if `to` is earlier
pub fn elapsed_hours(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Drain `tunnel` up to `now`.
///
/// Never raises supplies and never goes below zero. A second call with the
/// same `now` is a no-op because no time has elapsed. `last_updated` only
/// moves forward.
pub fn apply_decay(tunnel: &mut Tunnel, now: DateTime<Utc>) -> DecayOutcome {
    let hours = elapsed_hours(tunnel.last_updated, now);
    if hours <= 0.0 {
        return DecayOutcome::default();
    }

    let before = tunnel.total_supplies.max(0.0);
    if tunnel.usage_rate > 0.0 {
        tunnel.total_supplies = (before - tunnel.usage_rate * hours).max(0.0);
    }
    tunnel.last_updated = now;

    DecayOutcome {
        elapsed_hours: hours,
        consumed: before - tunnel.total_supplies,
    }
}

/// Drain every tunnel of one facility. Returns total units consumed.
pub fn apply_facility_decay(facility: &mut Facility, now: DateTime<Utc>) -> f64 {
    facility
        .tunnels
        .values_mut()
        .map(|tunnel| apply_decay(tunnel, now).consumed)
        .sum()
}

/// Drain every tunnel of every facility. Returns total units consumed.
pub fn apply_decay_all(facilities: &mut BTreeMap<String, Facility>, now: DateTime<Utc>) -> f64 {
    facilities
        .values_mut()
        .map(|facility| apply_facility_decay(facility, now))
        .sum()
}
