//! Scheduler for periodic ledger maintenance
//!
//! The scheduler is responsible for:
//! - Periodically settling supply decay
//! - Reconciling bound dashboards with the ledger
//! - Flushing coalesced audit lines
//! - Closing the weekly leaderboard period

mod calendar;
mod runner;

pub use calendar::next_reset;
pub use runner::Scheduler;
