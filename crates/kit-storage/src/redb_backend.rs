use crate::{KVStore, Result, StorageError, Transaction as KVTransaction};
use bytes::Bytes;
use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

// Table definitions
const RECORDS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const REVISION_KEY: &str = "revision";

/// redb-based storage backend
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening redb database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref())?;
        Self::init(db)
    }

    /// Database that lives only as long as the process
    pub fn in_memory() -> Result<Self> {
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> Result<Self> {
        // Create tables if they don't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS_TABLE)?;
            let _ = write_txn.open_table(META_TABLE)?;
        }
        write_txn.commit()?;

        debug!("redb database initialized");

        Ok(Self { db: Arc::new(db) })
    }

    /// Current value of the revision counter
    pub fn revision(&self) -> Result<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(META_TABLE)?;
        Ok(table.get(REVISION_KEY)?.map(|v| v.value()).unwrap_or(0))
    }
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        debug!("Getting key: {:?}", String::from_utf8_lossy(key));

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        Ok(table
            .get(key)?
            .map(|value| Bytes::from(value.value().to_vec())))
    }

    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        debug!(
            "Scanning with prefix: {:?}",
            String::from_utf8_lossy(prefix)
        );

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS_TABLE)?;

        let mut results = Vec::new();

        // Keys are ordered, so the matches form one contiguous run
        for entry in table.range::<&[u8]>(prefix..)? {
            let (key, value) = entry?;
            let key_bytes = key.value();
            if !key_bytes.starts_with(prefix) {
                break;
            }
            results.push((
                Bytes::from(key_bytes.to_vec()),
                Bytes::from(value.value().to_vec()),
            ));
        }

        debug!("Scan found {} results", results.len());
        Ok(results)
    }

    fn transaction(&self) -> Result<Box<dyn KVTransaction>> {
        let write_txn = self.db.begin_write()?;
        Ok(Box::new(RedbTransaction {
            txn: Some(write_txn),
        }))
    }
}

/// redb transaction implementation
struct RedbTransaction {
    txn: Option<redb::WriteTransaction>,
}

impl RedbTransaction {
    fn txn(&self) -> Result<&redb::WriteTransaction> {
        self.txn.as_ref().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed")
        })
    }
}

impl KVTransaction for RedbTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let table = self.txn()?.open_table(RECORDS_TABLE)?;
        let result = table
            .get(key)?
            .map(|value| Bytes::from(value.value().to_vec()));
        Ok(result)
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut table = self.txn()?.open_table(RECORDS_TABLE)?;
        table.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let mut table = self.txn()?.open_table(RECORDS_TABLE)?;
        let removed = table.remove(key)?.is_some();
        Ok(removed)
    }

    fn next_revision(&mut self) -> Result<u64> {
        let mut table = self.txn()?.open_table(META_TABLE)?;
        let current = table.get(REVISION_KEY)?.map(|v| v.value()).unwrap_or(0);
        let next = current + 1;
        table.insert(REVISION_KEY, next)?;
        Ok(next)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or_else(|| {
            StorageError::transaction_error("Transaction already committed")
        })?;

        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn put(backend: &RedbBackend, key: &[u8], value: &[u8]) {
        let mut txn = backend.transaction().unwrap();
        txn.put(key, value).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_redb_backend_put_get_delete() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("test.redb")).unwrap();

        put(&backend, b"key1", b"value1");
        assert_eq!(backend.get(b"key1").unwrap(), Some(Bytes::from("value1")));

        let mut txn = backend.transaction().unwrap();
        assert!(txn.delete(b"key1").unwrap());
        assert!(!txn.delete(b"key1").unwrap());
        txn.commit().unwrap();

        assert_eq!(backend.get(b"key1").unwrap(), None);
    }

    #[test]
    fn test_redb_backend_scan_is_prefix_bounded() {
        let backend = RedbBackend::in_memory().unwrap();

        put(&backend, b"a/Vpc/default/one", b"1");
        put(&backend, b"a/Vpc/default/two", b"2");
        put(&backend, b"a/VpcX/default/three", b"3");
        put(&backend, b"b/Vpc/default/four", b"4");

        let results = backend.scan(b"a/Vpc/").unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, Bytes::from("a/Vpc/default/one"));
    }

    #[test]
    fn test_uncommitted_transaction_is_discarded() {
        let backend = RedbBackend::in_memory().unwrap();
        {
            let mut txn = backend.transaction().unwrap();
            txn.put(b"key2", b"value2").unwrap();
            txn.next_revision().unwrap();
        }
        assert_eq!(backend.get(b"key2").unwrap(), None);
        assert_eq!(backend.revision().unwrap(), 0);
    }

    #[test]
    fn test_revision_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");
        {
            let backend = RedbBackend::new(&path).unwrap();
            let mut txn = backend.transaction().unwrap();
            assert_eq!(txn.next_revision().unwrap(), 1);
            assert_eq!(txn.next_revision().unwrap(), 2);
            txn.commit().unwrap();
        }
        let backend = RedbBackend::new(&path).unwrap();
        assert_eq!(backend.revision().unwrap(), 2);
    }
}
