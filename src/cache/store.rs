use bytes::Bytes;
use std::time::Duration;

/// CacheStore is the key-value engine underneath the replicated state machine.
///
/// Reads may come from any number of connection tasks while the state machine writes, so
/// implementations do their own locking.
pub trait CacheStore: Send + Sync {
    /// Returns the live value for `key`, or `None` when absent or expired.
    fn get(&self, key: &[u8]) -> Option<Bytes>;

    /// Stores `value` under `key`, replacing any previous value. `ttl` of `None` never expires.
    fn set(&self, key: Bytes, value: Bytes, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Every live entry, in no particular order. Used to build snapshots.
    fn entries(&self) -> Vec<CacheEntry>;

    /// Drops everything. Used before restoring a snapshot.
    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheEntry {
    pub key: Bytes,
    pub value: Bytes,
    /// Time left before the entry expires. `None` never expires.
    pub ttl: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },
}
