use crate::cache::{CacheEntry, CacheStore};
use crate::consensus::{StateMachine, StateMachineError, StateMachineOutput, StateMachineSnapshot};
use crate::protocol::{Command, SetResult};
use crate::state_machine::ttl::{seconds_from_ttl, ttl_from_seconds};
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};
use std::sync::Arc;

/// CacheStateMachine turns committed log entries into cache writes. It is the only writer of the
/// cache; the dispatcher only reads.
///
/// Snapshots are a plain concatenation of encoded `Set` commands, one per live entry, carrying
/// the remaining TTL.
pub struct CacheStateMachine<C: CacheStore> {
    logger: slog::Logger,
    cache: Arc<C>,
}

impl<C: CacheStore> CacheStateMachine<C> {
    pub fn new(logger: slog::Logger, cache: Arc<C>) -> Self {
        CacheStateMachine { logger, cache }
    }
}

impl<C: CacheStore + 'static> StateMachine for CacheStateMachine<C> {
    fn apply_committed_entry(&mut self, entry: Bytes) -> StateMachineOutput {
        match Command::decode_entry(entry) {
            Ok(Command::Set { key, value, ttl }) => {
                let result = match self.cache.set(key, value, ttl_from_seconds(ttl)) {
                    Ok(()) => SetResult::ok(),
                    Err(e) => {
                        slog::warn!(self.logger, "Cache rejected committed set: {}", e);
                        SetResult::error()
                    }
                };
                StateMachineOutput::Data(result.to_bytes())
            }
            Ok(other) => {
                slog::error!(self.logger, "Ignoring {:?} command found in the log", other.kind());
                StateMachineOutput::NoData
            }
            Err(e) => {
                slog::error!(self.logger, "Ignoring undecodable log entry: {}", e);
                StateMachineOutput::NoData
            }
        }
    }

    fn snapshot(&mut self) -> Result<Box<dyn StateMachineSnapshot>, StateMachineError> {
        Ok(Box::new(CacheSnapshot {
            entries: self.cache.entries(),
        }))
    }

    /// Decodes the whole stream before touching the cache, so a malformed record leaves the
    /// cache as it was. A cache error part way through keeps the records applied before it.
    fn restore(&mut self, mut source: Box<dyn Read + Send>) -> Result<(), StateMachineError> {
        let mut contents = Vec::new();
        source.read_to_end(&mut contents)?;
        let records = decode_records(Bytes::from(contents))?;

        self.cache.clear();
        let restored = records.len();
        for (key, value, ttl) in records {
            self.cache.set(key, value, ttl_from_seconds(ttl))?;
        }

        slog::info!(self.logger, "Restored {} cache entries from snapshot", restored);
        Ok(())
    }
}

fn decode_records(mut stream: Bytes) -> Result<Vec<(Bytes, Bytes, i32)>, StateMachineError> {
    let mut records = Vec::new();
    while !stream.is_empty() {
        let position = records.len();
        let command =
            Command::decode(&mut stream).map_err(|source| StateMachineError::MalformedRecord { position, source })?;

        match command {
            Command::Set { key, value, ttl } => records.push((key, value, ttl)),
            other => {
                return Err(StateMachineError::UnexpectedRecord {
                    position,
                    kind: other.kind(),
                })
            }
        }
    }

    Ok(records)
}

struct CacheSnapshot {
    entries: Vec<CacheEntry>,
}

impl StateMachineSnapshot for CacheSnapshot {
    fn persist(&mut self, sink: &mut dyn Write) -> Result<(), StateMachineError> {
        let mut buf = BytesMut::new();
        for entry in &self.entries {
            buf.clear();
            Command::Set {
                key: entry.key.clone(),
                value: entry.value.clone(),
                ttl: seconds_from_ttl(entry.ttl),
            }
            .encode(&mut buf);
            sink.write_all(&buf)?;
        }

        Ok(())
    }

    fn release(&mut self) {
        self.entries = Vec::new();
    }
}
