use crate::protocol::{ProtocolError, Status};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("server answered {status}")]
    Rejected { status: Status },
}
