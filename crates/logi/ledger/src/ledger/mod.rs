//! The ledger facade.
//!
//! One [`Ledger`] per deployment. Every mutating operation takes the state
//! lock, computes the new table document on a copy, writes it to the store
//! and only then swaps it into memory. A failed write therefore leaves the
//! in-memory state equal to what is on disk.

mod bindings;
mod contributions;
mod orders;
mod tunnels;
mod war;

pub use contributions::{ContributorStats, DEFAULT_LEADERBOARD_LIMIT, WAR_SUMMARY_TOP};
pub(crate) use contributions::rank;

use crate::audit::{AuditEvent, AuditLog};
use crate::decay;
use crate::error::{LedgerError, LedgerResult, StorageError};
use crate::schema::{self, BindingsDoc, ContributionsDoc, FacilitiesDoc, OrdersDoc, UsersDoc};
use crate::store::{LedgerStore, Table};
use chrono::{DateTime, Utc};
use logi_types::Caller;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

/// In-memory copy of every table
#[derive(Debug, Clone, Default)]
pub(crate) struct LedgerState {
    pub facilities: FacilitiesDoc,
    pub users: UsersDoc,
    pub contributions: ContributionsDoc,
    pub orders: OrdersDoc,
    pub bindings: BindingsDoc,
}

/// Single-writer supply ledger
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    state: Mutex<LedgerState>,
    audit: Arc<AuditLog>,
}

impl Ledger {
    /// Load every table, repair legacy records and write back whatever
    /// normalization changed. Must run before any other operation.
    #[instrument(skip_all)]
    pub async fn open(store: Arc<dyn LedgerStore>, audit: Arc<AuditLog>) -> LedgerResult<Self> {
        let mut raw = BTreeMap::new();
        for table in Table::ALL {
            if let Some(document) = store.read(table).await? {
                raw.insert(table, document);
            }
        }

        let tables = schema::normalize(&raw, Utc::now());
        let ledger = Self {
            store,
            state: Mutex::new(LedgerState {
                facilities: tables.facilities,
                users: tables.users,
                contributions: tables.contributions,
                orders: tables.orders,
                bindings: tables.bindings,
            }),
            audit,
        };

        {
            let state = ledger.state.lock().await;
            for table in &tables.repaired {
                match table {
                    Table::Facilities => ledger.persist(*table, &state.facilities).await?,
                    Table::Users => ledger.persist(*table, &state.users).await?,
                    Table::Contributions => ledger.persist(*table, &state.contributions).await?,
                    Table::Orders => ledger.persist(*table, &state.orders).await?,
                    Table::DisplayBindings => ledger.persist(*table, &state.bindings).await?,
                }
            }

            info!(
                facilities = state.facilities.facilities.len(),
                orders = state.orders.orders.len(),
                users = state.users.totals.len(),
                bindings = state.bindings.bindings.len(),
                repaired = tables.repaired.len(),
                "Ledger loaded"
            );
        }

        Ok(ledger)
    }

    /// Audit log this ledger reports to
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Drain every tunnel up to `now` and persist the result.
    ///
    /// Serves both the startup catch-up and the periodic tick. Returns
    /// the number of units consumed.
    #[instrument(skip(self))]
    pub async fn apply_decay(&self, now: DateTime<Utc>) -> LedgerResult<f64> {
        let mut state = self.state.lock().await;
        if state.facilities.facilities.is_empty() {
            return Ok(0.0);
        }

        let mut facilities = state.facilities.clone();
        let consumed = decay::apply_decay_all(&mut facilities.facilities, now);
        self.persist(Table::Facilities, &facilities).await?;
        state.facilities = facilities;

        debug!(consumed, "Decay applied");
        Ok(consumed)
    }

    async fn persist<T: Serialize>(&self, table: Table, document: &T) -> LedgerResult<()> {
        let value = serde_json::to_value(document).map_err(StorageError::from)?;
        self.store.write(table, &value).await?;
        Ok(())
    }

    /// Put a table back after a later write of the same operation failed
    async fn restore<T: Serialize>(&self, table: Table, document: &T) {
        if let Err(e) = self.persist(table, document).await {
            error!(table = %table, error = %e, "Failed to restore table after partial write");
        }
    }

    async fn record(&self, events: Vec<AuditEvent>) {
        for event in events {
            self.audit.record(event).await;
        }
    }
}

fn require_officer(caller: &Caller, operation: &str) -> LedgerResult<()> {
    if caller.is_elevated() {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized(format!(
            "{} requires officer capability",
            operation
        )))
    }
}

/// Reject negative, NaN and infinite values
fn non_negative(field: &str, value: f64) -> LedgerResult<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(LedgerError::InvalidRange(format!(
            "{} must be a finite number >= 0, got {}",
            field, value
        )))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::InMemoryStore;

    pub struct Harness {
        pub ledger: Ledger,
        pub store: Arc<InMemoryStore>,
        pub sink: Arc<MemoryAuditSink>,
    }

    pub async fn harness() -> Harness {
        harness_with(InMemoryStore::new()).await
    }

    pub async fn harness_with(store: InMemoryStore) -> Harness {
        let store = Arc::new(store);
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = Arc::new(AuditLog::new(sink.clone()));
        let ledger = Ledger::open(store.clone(), audit).await.unwrap();
        Harness {
            ledger,
            store,
            sink,
        }
    }

    pub fn officer() -> Caller {
        Caller::officer("officer")
    }

    pub fn member(name: &str) -> Caller {
        Caller::member(name)
    }

    /// Tunnel as held in memory, without read-time decay
    pub async fn stored_tunnel(ledger: &Ledger, facility: &str, name: &str) -> logi_types::Tunnel {
        ledger.state.lock().await.facilities.facilities[facility].tunnels[name].clone()
    }
}
