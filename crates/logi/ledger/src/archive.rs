//! End-of-war archive bundles.
//!
//! A bundle is an immutable, timestamp-named set of documents: every
//! ledger table, a derived summary and a plain-text report. Bundles are
//! written before the ledger is reset; a bundle that cannot be written
//! aborts the reset.

use crate::error::ArchiveError;
use crate::ledger::WAR_SUMMARY_TOP;
use crate::schema::{ContributionsDoc, FacilitiesDoc, OrdersDoc, UsersDoc};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use logi_types::{LeaderboardEntry, OrderStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Full ledger state at the end of a war
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarSnapshot {
    pub taken_at: DateTime<Utc>,
    pub facilities: FacilitiesDoc,
    pub orders: OrdersDoc,
    pub contributions: ContributionsDoc,
    pub users: UsersDoc,
}

/// Figures derived from a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarSummary {
    pub facility_count: usize,
    pub tunnel_count: usize,
    /// Sum of the period totals of every contributor
    pub total_supplies_delivered: u64,
    pub top_contributors: Vec<LeaderboardEntry>,
}

impl WarSummary {
    pub fn from_snapshot(snapshot: &WarSnapshot) -> Self {
        let facilities = &snapshot.facilities.facilities;
        Self {
            facility_count: facilities.len(),
            tunnel_count: facilities.values().map(|f| f.tunnels.len()).sum(),
            total_supplies_delivered: snapshot
                .users
                .totals
                .values()
                .fold(0u64, |acc, total| acc.saturating_add(*total)),
            top_contributors: crate::ledger::rank(&snapshot.users.totals, WAR_SUMMARY_TOP),
        }
    }
}

/// One bundle ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveBundle {
    /// `war_<YYYYmmdd_HHMMSS>`
    pub id: String,
    pub snapshot: WarSnapshot,
    pub summary: WarSummary,
    pub report: String,
}

impl ArchiveBundle {
    pub fn new(snapshot: WarSnapshot) -> Self {
        let summary = WarSummary::from_snapshot(&snapshot);
        let report = render_report(&snapshot, &summary);
        Self {
            id: bundle_id(snapshot.taken_at),
            snapshot,
            summary,
            report,
        }
    }
}

/// What the caller gets back after a successful archive and reset
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveReceipt {
    pub id: String,
    /// Writer-specific location, e.g. the bundle directory
    pub location: String,
    pub summary: WarSummary,
}

pub fn bundle_id(at: DateTime<Utc>) -> String {
    format!("war_{}", at.format("%Y%m%d_%H%M%S"))
}

fn render_report(snapshot: &WarSnapshot, summary: &WarSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "War report - {}", snapshot.taken_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Facilities: {}", summary.facility_count);
    let _ = writeln!(out, "Tunnels: {}", summary.tunnel_count);
    let _ = writeln!(out, "Supplies delivered: {}", summary.total_supplies_delivered);

    let orders = &snapshot.orders.orders;
    let completed = orders
        .values()
        .filter(|o| o.status == OrderStatus::Complete)
        .count();
    let _ = writeln!(out, "Orders: {} ({} complete)", orders.len(), completed);

    let _ = writeln!(out);
    let _ = writeln!(out, "Top contributors:");
    if summary.top_contributors.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for entry in &summary.top_contributors {
        let _ = writeln!(out, "  {}. {} - {}", entry.rank, entry.user, entry.total);
    }

    for facility in snapshot.facilities.facilities.values() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}:", facility.name);
        for tunnel in facility.tunnels.values() {
            let _ = writeln!(
                out,
                "  {} - {:.0} supplies, {}/h",
                tunnel.name, tunnel.total_supplies, tunnel.usage_rate
            );
        }
    }
    out
}

/// Destination for archive bundles
#[async_trait]
pub trait ArchiveWriter: Send + Sync {
    /// Write `bundle` completely or fail. Returns where it was written.
    async fn write_bundle(&self, bundle: &ArchiveBundle) -> Result<String, ArchiveError>;
}

/// Writes each bundle as a directory of JSON documents plus `report.txt`.
///
/// The bundle is assembled in a hidden staging directory and renamed into
/// place, so a bundle directory either exists complete or not at all.
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

async fn write_json<T: Serialize>(dir: &Path, name: &str, doc: &T) -> Result<(), ArchiveError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    tokio::fs::write(dir.join(name), bytes).await?;
    Ok(())
}

#[async_trait]
impl ArchiveWriter for DirectoryArchive {
    async fn write_bundle(&self, bundle: &ArchiveBundle) -> Result<String, ArchiveError> {
        let target = self.root.join(&bundle.id);
        if tokio::fs::try_exists(&target).await? {
            return Err(ArchiveError::AlreadyExists(target.display().to_string()));
        }

        let staging = self.root.join(format!(".{}.partial", bundle.id));
        if tokio::fs::try_exists(&staging).await? {
            tokio::fs::remove_dir_all(&staging).await?;
        }
        tokio::fs::create_dir_all(&staging).await?;

        let snapshot = &bundle.snapshot;
        write_json(&staging, "facilities.json", &snapshot.facilities).await?;
        write_json(&staging, "orders.json", &snapshot.orders).await?;
        write_json(&staging, "contributions.json", &snapshot.contributions).await?;
        write_json(&staging, "users.json", &snapshot.users).await?;
        write_json(&staging, "summary.json", &bundle.summary).await?;
        tokio::fs::write(staging.join("report.txt"), bundle.report.as_bytes()).await?;

        tokio::fs::rename(&staging, &target).await?;
        info!(bundle = %bundle.id, path = %target.display(), "War archive written");
        Ok(target.display().to_string())
    }
}

/// In-memory archive for testing
#[derive(Debug, Default)]
pub struct MemoryArchive {
    bundles: Mutex<Vec<ArchiveBundle>>,
    fail: AtomicBool,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until cleared
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn bundles(&self) -> Vec<ArchiveBundle> {
        self.bundles.lock().clone()
    }
}

#[async_trait]
impl ArchiveWriter for MemoryArchive {
    async fn write_bundle(&self, bundle: &ArchiveBundle) -> Result<String, ArchiveError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "archive storage unavailable",
            )));
        }
        self.bundles.lock().push(bundle.clone());
        Ok(format!("memory://{}", bundle.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use logi_types::{Facility, Tunnel, UserId};

    fn snapshot() -> WarSnapshot {
        let at = Utc.with_ymd_and_hms(2025, 4, 6, 18, 30, 5).unwrap();
        let mut facilities = FacilitiesDoc::default();
        let mut north = Facility::new("North", UserId::new("o"), at);
        north
            .tunnels
            .insert("T1".to_string(), Tunnel::new("T1", 420.0, 12.0, "", at));
        facilities.facilities.insert("North".to_string(), north);

        let mut users = UsersDoc::default();
        users.totals.insert(UserId::new("alice"), 900);
        users.totals.insert(UserId::new("bob"), 100);

        WarSnapshot {
            taken_at: at,
            facilities,
            orders: OrdersDoc::default(),
            contributions: ContributionsDoc::default(),
            users,
        }
    }

    #[test]
    fn test_summary_and_report() {
        let bundle = ArchiveBundle::new(snapshot());
        assert_eq!(bundle.id, "war_20250406_183005");
        assert_eq!(bundle.summary.facility_count, 1);
        assert_eq!(bundle.summary.tunnel_count, 1);
        assert_eq!(bundle.summary.total_supplies_delivered, 1000);
        assert_eq!(bundle.summary.top_contributors[0].user.as_str(), "alice");

        assert!(bundle.report.contains("Supplies delivered: 1000"));
        assert!(bundle.report.contains("1. alice - 900"));
        assert!(bundle.report.contains("T1 - 420 supplies, 12/h"));
    }

    #[tokio::test]
    async fn test_directory_bundle_is_complete_and_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = DirectoryArchive::new(dir.path());
        let bundle = ArchiveBundle::new(snapshot());

        let location = archive.write_bundle(&bundle).await.unwrap();
        let path = PathBuf::from(&location);
        for name in [
            "facilities.json",
            "orders.json",
            "contributions.json",
            "users.json",
            "summary.json",
            "report.txt",
        ] {
            assert!(path.join(name).exists(), "missing {name}");
        }

        let users: UsersDoc =
            serde_json::from_slice(&std::fs::read(path.join("users.json")).unwrap()).unwrap();
        assert_eq!(users, bundle.snapshot.users);

        let err = archive.write_bundle(&bundle).await.unwrap_err();
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
    }
}
