//! In-memory storage implementation

use super::traits::{LedgerStore, Table};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Value>>,
    reject_writes: AtomicBool,
    rejected_table: Mutex<Option<Table>>,
    writes: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with raw documents
    pub fn with_documents(documents: impl IntoIterator<Item = (Table, Value)>) -> Self {
        let store = Self::new();
        store.tables.write().extend(documents);
        store
    }

    /// Make every subsequent write fail, simulating a broken disk
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make writes to one table fail while every other table still
    /// accepts them
    pub fn reject_table(&self, table: Option<Table>) {
        *self.rejected_table.lock() = table;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current raw document of a table
    pub fn document(&self, table: Table) -> Option<Value> {
        self.tables.read().get(&table).cloned()
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn read(&self, table: Table) -> StorageResult<Option<Value>> {
        Ok(self.tables.read().get(&table).cloned())
    }

    async fn write(&self, table: Table, document: &Value) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst)
            || *self.rejected_table.lock() == Some(table)
        {
            return Err(StorageError::WriteRejected(format!(
                "writes to {} are disabled",
                table
            )));
        }
        self.tables.write().insert(table, document.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
