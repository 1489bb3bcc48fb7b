//! Storage trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// The persisted ledger tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    /// Facilities with their nested tunnel maps
    Facilities,
    /// Period contribution totals per user
    Users,
    /// Lifetime totals and the contribution event log per user
    Contributions,
    /// Order table with its id counter
    Orders,
    /// Dashboard bindings per guild and facility
    DisplayBindings,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Facilities,
        Table::Users,
        Table::Contributions,
        Table::Orders,
        Table::DisplayBindings,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Facilities => "facilities",
            Table::Users => "users",
            Table::Contributions => "contributions",
            Table::Orders => "orders",
            Table::DisplayBindings => "display_bindings",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Whole-document storage for the ledger tables.
///
/// Documents are handed over as raw JSON so that records written by older
/// versions can be repaired by schema normalization before typed decoding.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Read a table, `None` if it was never written
    async fn read(&self, table: Table) -> StorageResult<Option<Value>>;

    /// Replace a table with `document`
    async fn write(&self, table: Table, document: &Value) -> StorageResult<()>;
}
