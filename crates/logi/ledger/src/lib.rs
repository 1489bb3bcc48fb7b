//! Supply ledger and reconciliation engine
//!
//! This crate holds the stateful core behind the logistics daemon:
//! - Time-based supply decay
//! - Whole-document table storage with load-time schema repair
//! - The [`Ledger`] facade: facilities, tunnels, orders, contributions
//! - Dashboard reconciliation against an external display surface
//! - Audit log coalescing
//! - End-of-war archival and reset
//!
//! All mutations go through one lock and are persisted before they are
//! committed in memory. Display and audit I/O happen outside that lock
//! and never roll back a ledger change.

pub mod archive;
pub mod audit;
pub mod decay;
pub mod display;
pub mod error;
pub mod ledger;
pub mod schema;
pub mod store;

pub use archive::{
    ArchiveBundle, ArchiveReceipt, ArchiveWriter, DirectoryArchive, MemoryArchive, WarSnapshot,
    WarSummary,
};
pub use audit::{AuditEvent, AuditLine, AuditLog, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use decay::{apply_decay, apply_decay_all, DecayOutcome};
pub use display::{DisplaySurface, MemorySurface, Reconciler, SyncReport, DEFAULT_PAGE_SIZE};
pub use error::{
    ArchiveError, AuditError, DisplayError, LedgerError, LedgerResult, StorageError,
    StorageResult,
};
pub use ledger::{ContributorStats, Ledger, DEFAULT_LEADERBOARD_LIMIT, WAR_SUMMARY_TOP};
pub use store::{InMemoryStore, JsonFileStore, LedgerStore, Table};
