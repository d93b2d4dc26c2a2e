use crate::Result;
use bytes::Bytes;

/// Key-value store holding serialized records
pub trait KVStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Scan keys with a given prefix, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Begin a write transaction
    fn transaction(&self) -> Result<Box<dyn Transaction>>;
}

/// Atomic unit of writes.
///
/// Dropping a transaction without committing discards its writes.
pub trait Transaction: Send {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key, returning whether it was present
    fn delete(&mut self, key: &[u8]) -> Result<bool>;

    /// Advance the store-wide revision counter and return the new value
    fn next_revision(&mut self) -> Result<u64>;

    fn commit(self: Box<Self>) -> Result<()>;
}
