//! War summary, archival and reset

use super::{require_officer, Ledger};
use crate::archive::{ArchiveBundle, ArchiveReceipt, ArchiveWriter, WarSnapshot, WarSummary};
use crate::audit::AuditEvent;
use crate::decay;
use crate::error::LedgerResult;
use crate::store::Table;
use chrono::Utc;
use logi_types::{ActionKind, Caller};
use tracing::{error, info, instrument};

impl Ledger {
    /// Summary of the running war: counts, supplies delivered this period
    /// and the top contributors
    pub async fn war_summary(&self) -> WarSummary {
        WarSummary::from_snapshot(&self.snapshot().await)
    }

    /// Copy of every archived table, decayed to now
    pub async fn snapshot(&self) -> WarSnapshot {
        let state = self.state.lock().await;
        let now = Utc::now();
        let mut facilities = state.facilities.clone();
        decay::apply_decay_all(&mut facilities.facilities, now);
        WarSnapshot {
            taken_at: now,
            facilities,
            orders: state.orders.clone(),
            contributions: state.contributions.clone(),
            users: state.users.clone(),
        }
    }

    /// Archive the ledger, then reset it for the next war.
    ///
    /// The lock is held from snapshot to reset so nothing lands between
    /// them. If the bundle cannot be written nothing is reset. The reset
    /// clears facilities and orders, keeps the order id counter, and zeroes
    /// period totals while keeping user entries and the lifetime log.
    /// Display bindings stay and render empty dashboards.
    #[instrument(skip(self, caller, writer), fields(user = %caller.user))]
    pub async fn end_war(
        &self,
        caller: &Caller,
        writer: &dyn ArchiveWriter,
    ) -> LedgerResult<ArchiveReceipt> {
        require_officer(caller, "archiving the war")?;

        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut facilities = state.facilities.clone();
        decay::apply_decay_all(&mut facilities.facilities, now);
        let bundle = ArchiveBundle::new(WarSnapshot {
            taken_at: now,
            facilities,
            orders: state.orders.clone(),
            contributions: state.contributions.clone(),
            users: state.users.clone(),
        });

        let location = match writer.write_bundle(&bundle).await {
            Ok(location) => location,
            Err(e) => {
                error!(bundle = %bundle.id, error = %e, "War archive failed, reset aborted");
                return Err(e.into());
            }
        };

        let mut cleared = state.facilities.clone();
        cleared.facilities.clear();
        self.persist(Table::Facilities, &cleared).await?;
        state.facilities = cleared;

        let mut orders = state.orders.clone();
        orders.orders.clear();
        self.persist(Table::Orders, &orders).await?;
        state.orders = orders;

        let mut users = state.users.clone();
        users.totals.values_mut().for_each(|total| *total = 0);
        self.persist(Table::Users, &users).await?;
        state.users = users;
        drop(state);

        info!(bundle = %bundle.id, location = %location, "War archived and ledger reset");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::WarArchived,
            bundle.id.clone(),
        )])
        .await;

        Ok(ArchiveReceipt {
            id: bundle.id,
            location,
            summary: bundle.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use crate::archive::MemoryArchive;
    use crate::error::LedgerError;
    use logi_types::{Priority, UserId};

    async fn war_in_progress() -> Harness {
        let h = harness().await;
        h.ledger
            .add_tunnel(&officer(), "North", "T1", 100.0, 0.0, "")
            .await
            .unwrap();
        h.ledger
            .add_supplies(&member("alice"), "T1", 400, None)
            .await
            .unwrap();
        h.ledger
            .add_supplies(&member("bob"), "T1", 100, None)
            .await
            .unwrap();
        h.ledger
            .create_order(&member("bob"), "Pipe", 3, Priority::High, "")
            .await
            .unwrap();
        h
    }

    #[tokio::test]
    async fn test_failed_archive_aborts_reset() {
        let h = war_in_progress().await;
        let archive = MemoryArchive::new();
        archive.fail(true);

        let err = h.ledger.end_war(&officer(), &archive).await.unwrap_err();
        assert!(matches!(err, LedgerError::ArchiveFailure(_)));

        assert!(h.ledger.find_tunnel("T1").await.is_ok());
        assert_eq!(h.ledger.list_orders(None).await.len(), 1);
        assert_eq!(h.ledger.leaderboard(10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_end_war_archives_then_resets() {
        let h = war_in_progress().await;
        let archive = MemoryArchive::new();

        let receipt = h.ledger.end_war(&officer(), &archive).await.unwrap();
        assert!(receipt.id.starts_with("war_"));
        assert_eq!(receipt.summary.total_supplies_delivered, 500);
        assert_eq!(receipt.summary.top_contributors[0].user.as_str(), "alice");

        let bundles = archive.bundles();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].snapshot.orders.orders.len(), 1);
        assert!(bundles[0].snapshot.facilities.facilities.contains_key("North"));

        assert!(h.ledger.facilities_at(chrono::Utc::now()).await.is_empty());
        assert!(h.ledger.list_orders(None).await.is_empty());
        assert!(h.ledger.leaderboard(10).await.is_empty());

        let alice = h.ledger.contributor_stats(&UserId::new("alice")).await;
        assert_eq!(alice.period_total, 0);
        assert_eq!(alice.lifetime_total, 400);

        // the id counter survives the reset
        let next = h
            .ledger
            .create_order(&member("bob"), "Beam", 1, Priority::Low, "")
            .await
            .unwrap();
        assert_eq!(next.value(), 2);
    }

    #[tokio::test]
    async fn test_end_war_requires_officer() {
        let h = war_in_progress().await;
        let archive = MemoryArchive::new();
        assert!(matches!(
            h.ledger.end_war(&member("alice"), &archive).await,
            Err(LedgerError::Unauthorized(_))
        ));
        assert!(archive.bundles().is_empty());
    }
}
