//! Logi daemon library
//!
//! This module provides the runtime host for the supply ledger:
//! - Layered configuration
//! - Filesystem display surface and audit sink
//! - Scheduler for decay, dashboards, audit flushing and the weekly leaderboard
//! - Server lifecycle management

pub mod audit_sink;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod server;
pub mod surface;

pub use audit_sink::{CompositeSink, FileAuditSink};
pub use config::LogiConfig;
pub use error::{DaemonError, DaemonResult};
pub use scheduler::Scheduler;
pub use server::Server;
pub use surface::FileSurface;
