//! Core types for the Logi supply ledger
//!
//! This crate defines the plain data model shared by the ledger engine and
//! the daemon:
//! - Facilities and their depletable supply tunnels
//! - Production orders and their lifecycle states
//! - Contribution events and per-user totals
//! - Display handles, pagination state and dashboard render models
//!
//! Nothing here performs I/O; persistence and reconciliation live in
//! `logi-ledger`.

pub mod caller;
pub mod contribution;
pub mod display;
pub mod facility;
pub mod ids;
pub mod order;

pub use caller::{Caller, Capability};
pub use contribution::{ActionKind, ContributionEvent, ContributionRecord, LeaderboardEntry};
pub use display::{
    BindingKey, DashboardPage, DisplayBinding, DisplayHandle, Nav, PageState, StatusTier,
    TunnelRow,
};
pub use facility::{Facility, Tunnel, TunnelUpdate};
pub use ids::{ContentId, GuildId, OrderId, SurfaceId, UserId};
pub use order::{Order, OrderStatus, ParseError, Priority};
