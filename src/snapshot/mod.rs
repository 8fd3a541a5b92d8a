mod error;
mod meta;
mod store;

pub use error::SnapshotError;
pub use meta::SnapshotMeta;
pub use store::FileSnapshotSink;
pub use store::FileSnapshotStore;
