//! Contribution recording and leaderboards

use super::tunnels::checked_name;
use super::{require_officer, Ledger};
use crate::audit::AuditEvent;
use crate::decay;
use crate::error::{LedgerError, LedgerResult};
use crate::store::Table;
use chrono::Utc;
use logi_types::{ActionKind, Caller, ContributionEvent, LeaderboardEntry, Tunnel, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Rows shown on the weekly leaderboard
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Contributors listed in an end-of-war summary
pub const WAR_SUMMARY_TOP: usize = 5;

/// Lifetime and period figures of one contributor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorStats {
    pub user: UserId,
    pub lifetime_total: u64,
    pub period_total: u64,
    pub event_count: usize,
    /// Lifetime supplies per tunnel name
    pub per_tunnel: BTreeMap<String, u64>,
}

/// Rank non-zero totals descending, ties by user id
pub(crate) fn rank(totals: &BTreeMap<UserId, u64>, limit: usize) -> Vec<LeaderboardEntry> {
    let mut ranked: Vec<(&UserId, u64)> = totals
        .iter()
        .filter(|(_, total)| **total > 0)
        .map(|(user, total)| (user, *total))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, (user, total))| LeaderboardEntry {
            rank: i + 1,
            user: user.clone(),
            total,
        })
        .collect()
}

impl Ledger {
    /// Add supplies to a tunnel on behalf of `caller`.
    ///
    /// Pending decay is settled first. The tunnel, the caller's period
    /// total and the lifetime log are committed together: when one of the
    /// three writes fails, the tables already written are put back and
    /// nothing changes in memory, so the call can be retried.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn add_supplies(
        &self,
        caller: &Caller,
        tunnel: &str,
        amount: i64,
        context: Option<&str>,
    ) -> LedgerResult<Tunnel> {
        let amount = u64::try_from(amount)
            .ok()
            .filter(|a| *a > 0)
            .ok_or_else(|| {
                LedgerError::InvalidRange(format!("amount must be > 0, got {}", amount))
            })?;
        let tunnel = checked_name("tunnel", tunnel)?;
        let context = context.map(str::trim);

        let mut state = self.state.lock().await;
        let owner = state.resolve(tunnel, context)?;
        let now = Utc::now();

        let mut facilities = state.facilities.clone();
        let target = facilities
            .facilities
            .get_mut(&owner)
            .and_then(|facility| facility.tunnels.get_mut(tunnel))
            .ok_or_else(|| LedgerError::NotFound(format!("tunnel '{}'", tunnel)))?;
        decay::apply_decay(target, now);
        target.total_supplies += amount as f64;
        target.last_updated = target.last_updated.max(now);
        let updated = target.clone();

        let mut users = state.users.clone();
        let period = users.totals.entry(caller.user.clone()).or_insert(0);
        *period = period.saturating_add(amount);

        let mut contributions = state.contributions.clone();
        contributions
            .users
            .entry(caller.user.clone())
            .or_default()
            .append(ContributionEvent {
                timestamp: now,
                actor: caller.user.clone(),
                action: ActionKind::AddSupplies,
                tunnel: tunnel.to_string(),
                amount,
            });

        self.persist(Table::Facilities, &facilities).await?;
        if let Err(e) = self.persist(Table::Users, &users).await {
            self.restore(Table::Facilities, &state.facilities).await;
            return Err(e);
        }
        if let Err(e) = self.persist(Table::Contributions, &contributions).await {
            self.restore(Table::Users, &state.users).await;
            self.restore(Table::Facilities, &state.facilities).await;
            return Err(e);
        }
        state.facilities = facilities;
        state.users = users;
        state.contributions = contributions;
        drop(state);

        info!(
            facility = %owner,
            tunnel = %tunnel,
            amount,
            total_supplies = updated.total_supplies,
            "Supplies added"
        );
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::AddSupplies,
            tunnel,
        )
        .with_amount(amount)
        .at(now)])
        .await;
        Ok(updated)
    }

    /// Period totals ranked descending
    pub async fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        rank(&self.state.lock().await.users.totals, limit)
    }

    /// Close the current leaderboard period.
    ///
    /// Returns the final standings, then zeroes every period total while
    /// keeping the user entries. Lifetime totals are not touched.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn close_leaderboard_period(
        &self,
        caller: &Caller,
    ) -> LedgerResult<Vec<LeaderboardEntry>> {
        require_officer(caller, "resetting the leaderboard")?;

        let mut state = self.state.lock().await;
        let standings = rank(&state.users.totals, DEFAULT_LEADERBOARD_LIMIT);

        let mut users = state.users.clone();
        users.totals.values_mut().for_each(|total| *total = 0);
        self.persist(Table::Users, &users).await?;
        state.users = users;
        drop(state);

        info!(ranked = standings.len(), "Leaderboard period closed");

        let mut events = vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::LeaderboardReset,
            "leaderboard",
        )];
        events.extend(standings.iter().map(|entry| {
            AuditEvent::new(caller.user.clone(), ActionKind::LeaderboardReset, "leaderboard")
                .with_detail(format!("#{} {}", entry.rank, entry.user))
                .with_amount(entry.total)
        }));
        self.record(events).await;
        Ok(standings)
    }

    /// Figures for a single contributor. Unknown users get zeroes.
    pub async fn contributor_stats(&self, user: &UserId) -> ContributorStats {
        let state = self.state.lock().await;
        let mut stats = ContributorStats {
            user: user.clone(),
            lifetime_total: 0,
            period_total: state.users.totals.get(user).copied().unwrap_or(0),
            event_count: 0,
            per_tunnel: BTreeMap::new(),
        };

        if let Some(record) = state.contributions.users.get(user) {
            stats.lifetime_total = record.total;
            stats.event_count = record.events.len();
            for event in record.events.iter().filter(|e| e.action.is_supply_addition()) {
                let sum = stats.per_tunnel.entry(event.tunnel.clone()).or_insert(0);
                *sum = sum.saturating_add(event.amount);
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    async fn seeded() -> Harness {
        let h = harness().await;
        h.ledger
            .add_tunnel(&officer(), "North", "T1", 100.0, 0.0, "")
            .await
            .unwrap();
        h.ledger
            .add_tunnel(&officer(), "North", "T2", 100.0, 0.0, "")
            .await
            .unwrap();
        h.sink.clear();
        h
    }

    #[tokio::test]
    async fn test_add_supplies_updates_every_table() {
        let h = seeded().await;
        let alice = member("alice");

        let tunnel = h.ledger.add_supplies(&alice, "T1", 250, None).await.unwrap();
        assert_eq!(tunnel.total_supplies, 350.0);
        h.ledger.add_supplies(&alice, "T2", 50, None).await.unwrap();

        let stats = h.ledger.contributor_stats(&alice.user).await;
        assert_eq!(stats.lifetime_total, 300);
        assert_eq!(stats.period_total, 300);
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.per_tunnel.get("T1"), Some(&250));
        assert_eq!(stats.per_tunnel.get("T2"), Some(&50));

        let users = h.store.document(Table::Users).unwrap();
        assert_eq!(users["totals"]["alice"], serde_json::json!(300));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_contribution() {
        let h = seeded().await;
        let facilities = h.store.document(Table::Facilities);
        let contributions = h.store.document(Table::Contributions);

        for table in [Table::Users, Table::Contributions] {
            h.store.reject_table(Some(table));
            assert!(matches!(
                h.ledger.add_supplies(&member("alice"), "T1", 40, None).await,
                Err(LedgerError::PersistenceFailure(_))
            ));
            assert_eq!(h.store.document(Table::Facilities), facilities);
            assert_eq!(h.store.document(Table::Contributions), contributions);
            assert_eq!(stored_tunnel(&h.ledger, "North", "T1").await.total_supplies, 100.0);
        }

        h.store.reject_table(None);
        h.ledger.add_supplies(&member("alice"), "T1", 40, None).await.unwrap();
        let stats = h.ledger.contributor_stats(&UserId::new("alice")).await;
        assert_eq!(stats.lifetime_total, 40);
        assert_eq!(stats.period_total, 40);
        assert_eq!(stored_tunnel(&h.ledger, "North", "T1").await.total_supplies, 140.0);
    }

    #[tokio::test]
    async fn test_add_supplies_rejects_bad_input() {
        let h = seeded().await;
        for amount in [0, -10] {
            assert!(matches!(
                h.ledger.add_supplies(&member("a"), "T1", amount, None).await,
                Err(LedgerError::InvalidRange(_))
            ));
        }
        assert!(matches!(
            h.ledger.add_supplies(&member("a"), "Nope", 10, None).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_supply_audit_is_coalesced() {
        let h = seeded().await;
        for amount in [100, 200, 300] {
            h.ledger
                .add_supplies(&member("alice"), "T1", amount, None)
                .await
                .unwrap();
        }
        assert!(h.sink.texts().is_empty());

        h.ledger.audit().flush().await;
        assert_eq!(
            h.sink.texts(),
            vec!["alice added supplies to T1 (600 today)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_leaderboard_order_and_reset() {
        let h = seeded().await;
        h.ledger.add_supplies(&member("carol"), "T1", 50, None).await.unwrap();
        h.ledger.add_supplies(&member("bob"), "T1", 300, None).await.unwrap();
        h.ledger.add_supplies(&member("alice"), "T1", 300, None).await.unwrap();

        let board = h.ledger.leaderboard(DEFAULT_LEADERBOARD_LIMIT).await;
        let names: Vec<_> = board.iter().map(|e| e.user.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
        assert_eq!(board[0].rank, 1);
        assert_eq!(h.ledger.leaderboard(2).await.len(), 2);

        assert!(matches!(
            h.ledger.close_leaderboard_period(&member("alice")).await,
            Err(LedgerError::Unauthorized(_))
        ));

        let standings = h.ledger.close_leaderboard_period(&officer()).await.unwrap();
        assert_eq!(standings, board);
        assert!(h.ledger.leaderboard(10).await.is_empty());

        let stats = h.ledger.contributor_stats(&UserId::new("bob")).await;
        assert_eq!(stats.period_total, 0);
        assert_eq!(stats.lifetime_total, 300);

        let users = h.store.document(Table::Users).unwrap();
        assert_eq!(users["totals"]["bob"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_unknown_contributor_has_zero_stats() {
        let h = seeded().await;
        let stats = h.ledger.contributor_stats(&UserId::new("ghost")).await;
        assert_eq!(stats.user, UserId::new("ghost"));
        assert_eq!(stats.lifetime_total, 0);
        assert_eq!(stats.period_total, 0);
        assert_eq!(stats.event_count, 0);
        assert!(stats.per_tunnel.is_empty());
    }
}
