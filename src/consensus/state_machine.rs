use crate::cache::CacheError;
use crate::protocol::{CommandKind, ProtocolError};
use bytes::Bytes;
use std::io::{self, Read, Write};

/// StateMachine is the application specific view of applying the replicated log in sequentially
/// consistent order.
pub trait StateMachine: Send + 'static {
    /// apply_committed_entry is called only once the entry is committed, in log order, one at a
    /// time. It never has to be reversed. Whatever it returns is handed back to the caller that
    /// submitted the entry.
    fn apply_committed_entry(&mut self, entry: Bytes) -> StateMachineOutput;

    /// Captures the current state. The capture must be cheap; writing it out happens later
    /// through `StateMachineSnapshot::persist`.
    fn snapshot(&mut self) -> Result<Box<dyn StateMachineSnapshot>, StateMachineError>;

    /// Replaces the current state with the one in `source`.
    fn restore(&mut self, source: Box<dyn Read + Send>) -> Result<(), StateMachineError>;
}

/// StateMachineSnapshot is a point-in-time capture waiting to be written to a snapshot sink.
pub trait StateMachineSnapshot: Send {
    fn persist(&mut self, sink: &mut dyn Write) -> Result<(), StateMachineError>;

    /// Called once the sink is closed or cancelled.
    fn release(&mut self) {}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StateMachineOutput {
    Data(Bytes),
    NoData,
}

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed snapshot record {position}: {source}")]
    MalformedRecord { position: usize, source: ProtocolError },

    #[error("snapshot record {position} is a {kind:?}, only Set is allowed")]
    UnexpectedRecord { position: usize, kind: CommandKind },

    #[error("cache rejected snapshot record: {0}")]
    Cache(#[from] CacheError),
}
