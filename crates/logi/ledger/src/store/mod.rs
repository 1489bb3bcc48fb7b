//! Storage backends for the ledger tables.
//!
//! Every table is read and written as one whole document; partial updates
//! are computed in memory by the ledger before a full rewrite.

mod json;
mod memory;
mod traits;

pub use json::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::{LedgerStore, Table};
