use crate::client::ClientError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("server I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to join cluster via {leader_addr} after {attempts} attempts: {last_error}")]
    JoinFailed {
        leader_addr: String,
        attempts: u32,
        last_error: ClientError,
    },
}
