use crate::commitlog;
use bytes::Bytes;
use std::convert::TryFrom;
use std::{fmt, io};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum EntryKind {
    /// Opaque application data for the state machine.
    Command = 1,
    /// A JSON encoded `Configuration`. Never reaches the state machine.
    Configuration = 2,
}

/// Byte representation:
///
/// ```text
/// |                                         1                               |
/// | 0 | 1 | 2 | 3 | 4 | 5 | 6 | 7 | 8 | 9 | 0 | 1 | 2 | 3 | 4 | 5 | 6 | ... |
/// +---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+---+-...-+
/// |Vrs|Knd|       Term (8 bytes)          |   Data (variable size)      ... |
/// +---+---+-------------------------------+-----------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `Knd` - `EntryKind`
/// * `Term` - leadership term when this entry was created, little endian
/// * `Data` - payload, its length is whatever remains
#[derive(Clone, Debug)]
pub(crate) struct LogEntry {
    pub term: Term,
    pub kind: EntryKind,
    pub data: Bytes,
}

const LOG_ENTRY_FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 8;

impl commitlog::Entry for LogEntry {}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

impl TryFrom<Vec<u8>> for LogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, io::Error> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid_data(format!("log entry of {} bytes is too short", bytes.len())));
        }
        if bytes[0] != LOG_ENTRY_FORMAT_VERSION {
            return Err(invalid_data(format!("unknown log entry version {}", bytes[0])));
        }

        let kind = match bytes[1] {
            1 => EntryKind::Command,
            2 => EntryKind::Configuration,
            other => return Err(invalid_data(format!("unknown log entry kind {}", other))),
        };

        let mut term = [0u8; 8];
        term.copy_from_slice(&bytes[2..HEADER_LEN]);

        let data = Bytes::from(bytes).slice(HEADER_LEN..);

        Ok(LogEntry {
            term: Term::new(u64::from_le_bytes(term)),
            kind,
            data,
        })
    }
}

impl From<LogEntry> for Vec<u8> {
    fn from(entry: LogEntry) -> Self {
        let mut bytes: Vec<u8> = Vec::with_capacity(HEADER_LEN + entry.data.len());

        bytes.push(LOG_ENTRY_FORMAT_VERSION);
        bytes.push(entry.kind as u8);
        bytes.extend_from_slice(&entry.term.as_u64().to_le_bytes());
        bytes.extend_from_slice(&entry.data);

        bytes
    }
}
