use crate::consensus::Configuration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SnapshotMeta is stored as `meta.json` next to the snapshot's state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    /// Index of the last log entry covered by the snapshot.
    pub index: u64,
    pub term: u64,
    pub configuration: Configuration,
    pub configuration_index: u64,
    /// Bytes of state written.
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl SnapshotMeta {
    pub(super) fn new(term: u64, index: u64, configuration: Configuration, configuration_index: u64) -> Self {
        let created_at = Utc::now();
        SnapshotMeta {
            id: format!("{}-{}-{}", term, index, created_at.timestamp_millis()),
            index,
            term,
            configuration,
            configuration_index,
            size: 0,
            created_at,
        }
    }

    /// Sort key, oldest first.
    pub(super) fn order_key(&self) -> (u64, u64, DateTime<Utc>) {
        (self.term, self.index, self.created_at)
    }
}
