use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unreadable snapshot metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("no snapshot with id {0}")]
    NotFound(String),
}
