//! JSON file storage: one pretty-printed document per table

use super::traits::{LedgerStore, Table};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Stores each table as `<dir>/<table>.json`.
///
/// Writes go to a temporary sibling file that is flushed to disk and then
/// renamed over the target, so a crash mid-write leaves the previous
/// document intact. An existing but empty table file is reported as
/// corrupt rather than read as a fresh table.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a data directory
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, table: Table) -> PathBuf {
        self.dir.join(format!("{}.json", table.name()))
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn read(&self, table: Table) -> StorageResult<Option<Value>> {
        let path = self.path_for(table);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(StorageError::Corrupt(format!("{} is empty", path.display())));
        }

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn write(&self, table: Table, document: &Value) -> StorageResult<()> {
        let path = self.path_for(table);
        let tmp = self.dir.join(format!(".{}.json.tmp", table.name()));

        let bytes = serde_json::to_vec_pretty(document)?;
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await?;

        #[cfg(unix)]
        tokio::fs::File::open(&self.dir).await?.sync_all().await?;

        debug!(table = %table, bytes = bytes.len(), "Table written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_table_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(store.read(Table::Orders).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        let doc = json!({"next_id": 3, "orders": {}});
        store.write(Table::Orders, &doc).await.unwrap();

        assert!(dir.path().join("orders.json").exists());
        assert!(!dir.path().join(".orders.json.tmp").exists());
        assert_eq!(store.read(Table::Orders).await.unwrap(), Some(doc));
    }

    #[tokio::test]
    async fn test_empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.json"), "  \n").unwrap();

        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.read(Table::Users).await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();

        store.write(Table::Users, &json!({"totals": {"a": 1}})).await.unwrap();
        store.write(Table::Users, &json!({"totals": {}})).await.unwrap();

        assert_eq!(
            store.read(Table::Users).await.unwrap(),
            Some(json!({"totals": {}}))
        );
    }
}
