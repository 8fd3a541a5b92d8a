use crate::commitlog::Index;
use crate::consensus::log_entry::{LogEntry, Term};
use crate::consensus::Configuration;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;
use std::io;

/// AppendEntriesInput carries entries from the leader. `prev` is the entry right before
/// `entries`, `None` when they start the log. An empty `entries` is a heartbeat.
#[derive(Debug)]
pub(super) struct AppendEntriesInput {
    pub term: Term,
    pub leader_id: String,
    pub prev: Option<(Term, Index)>,
    pub leader_commit: Option<Index>,
    pub entries: Vec<LogEntry>,
}

/// InstallSnapshotInput replaces a follower's state when the entries it needs were compacted.
#[derive(Debug)]
pub(super) struct InstallSnapshotInput {
    pub term: Term,
    pub leader_id: String,
    pub last_included: (Term, Index),
    pub configuration: Configuration,
    pub configuration_index: u64,
    pub data: Bytes,
}

#[derive(Debug)]
pub(super) enum PeerRequest {
    AppendEntries(AppendEntriesInput),
    InstallSnapshot(InstallSnapshotInput),
}

/// PeerReply answers either request. `last_index` is the index of the follower's last entry,
/// which tells a rejected leader where to resume.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) struct PeerReply {
    pub term: Term,
    pub success: bool,
    pub last_index: u64,
}

const APPEND_ENTRIES: u8 = 1;
const INSTALL_SNAPSHOT: u8 = 2;
const REPLY_LEN: usize = 8 + 1 + 8;

// Every message is one length delimited frame. Integers are little endian and an absent
// index or term is zero.
//
// AppendEntries:   | 1 | term | leader id | prev term | prev index | leader commit | count | entries |
// InstallSnapshot: | 2 | term | leader id | last term | last index | config index | config json | data |
// Reply:           | term | success | last index |
//
// Strings, entries and the configuration are each prefixed with a u32 length. Snapshot data
// runs to the end of the frame.
impl PeerRequest {
    pub(super) fn encode(&self) -> Result<Bytes, io::Error> {
        let mut buf = BytesMut::new();
        match self {
            PeerRequest::AppendEntries(input) => {
                buf.put_u8(APPEND_ENTRIES);
                buf.put_u64_le(input.term.as_u64());
                put_bytes(&mut buf, input.leader_id.as_bytes())?;
                let (prev_term, prev_index) = input
                    .prev
                    .map(|(term, index)| (term.as_u64(), index.as_u64()))
                    .unwrap_or((0, 0));
                buf.put_u64_le(prev_term);
                buf.put_u64_le(prev_index);
                buf.put_u64_le(input.leader_commit.map(|i| i.as_u64()).unwrap_or(0));
                buf.put_u32_le(len_u32(input.entries.len())?);
                for entry in &input.entries {
                    let bytes: Vec<u8> = entry.clone().into();
                    put_bytes(&mut buf, &bytes)?;
                }
            }
            PeerRequest::InstallSnapshot(input) => {
                buf.put_u8(INSTALL_SNAPSHOT);
                buf.put_u64_le(input.term.as_u64());
                put_bytes(&mut buf, input.leader_id.as_bytes())?;
                let (last_term, last_index) = input.last_included;
                buf.put_u64_le(last_term.as_u64());
                buf.put_u64_le(last_index.as_u64());
                buf.put_u64_le(input.configuration_index);
                let configuration = serde_json::to_vec(&input.configuration).map_err(io::Error::from)?;
                put_bytes(&mut buf, &configuration)?;
                buf.put_slice(&input.data);
            }
        }

        Ok(buf.freeze())
    }

    pub(super) fn decode(mut frame: Bytes) -> Result<Self, io::Error> {
        match take_u8(&mut frame)? {
            APPEND_ENTRIES => {
                let term = Term::new(take_u64(&mut frame)?);
                let leader_id = take_string(&mut frame)?;
                let prev = entry_position(take_u64(&mut frame)?, take_u64(&mut frame)?)?;
                let leader_commit = Index::from_u64(take_u64(&mut frame)?);

                let count = take_u32(&mut frame)? as usize;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let bytes = take_bytes(&mut frame)?;
                    entries.push(LogEntry::try_from(bytes.to_vec())?);
                }
                if frame.has_remaining() {
                    return Err(invalid_data(format!("{} trailing bytes after entries", frame.remaining())));
                }

                Ok(PeerRequest::AppendEntries(AppendEntriesInput {
                    term,
                    leader_id,
                    prev,
                    leader_commit,
                    entries,
                }))
            }
            INSTALL_SNAPSHOT => {
                let term = Term::new(take_u64(&mut frame)?);
                let leader_id = take_string(&mut frame)?;
                let last_included = entry_position(take_u64(&mut frame)?, take_u64(&mut frame)?)?
                    .ok_or_else(|| invalid_data("snapshot covers no log entries".to_string()))?;
                let configuration_index = take_u64(&mut frame)?;
                let configuration = serde_json::from_slice(&take_bytes(&mut frame)?).map_err(io::Error::from)?;

                Ok(PeerRequest::InstallSnapshot(InstallSnapshotInput {
                    term,
                    leader_id,
                    last_included,
                    configuration,
                    configuration_index,
                    data: frame,
                }))
            }
            other => Err(invalid_data(format!("unknown peer request {}", other))),
        }
    }
}

impl PeerReply {
    pub(super) fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REPLY_LEN);
        buf.put_u64_le(self.term.as_u64());
        buf.put_u8(self.success as u8);
        buf.put_u64_le(self.last_index);
        buf.freeze()
    }

    pub(super) fn decode(mut frame: Bytes) -> Result<Self, io::Error> {
        if frame.len() != REPLY_LEN {
            return Err(invalid_data(format!("peer reply of {} bytes", frame.len())));
        }

        Ok(PeerReply {
            term: Term::new(frame.get_u64_le()),
            success: frame.get_u8() != 0,
            last_index: frame.get_u64_le(),
        })
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn entry_position(term: u64, index: u64) -> Result<Option<(Term, Index)>, io::Error> {
    match (term, index) {
        (0, 0) => Ok(None),
        (0, _) => Err(invalid_data(format!("entry {} has term 0", index))),
        (_, 0) => Err(invalid_data(format!("entry of term {} has index 0", term))),
        (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
    }
}

fn len_u32(len: usize) -> Result<u32, io::Error> {
    u32::try_from(len).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "peer message field is too long"))
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), io::Error> {
    buf.put_u32_le(len_u32(bytes.len())?);
    buf.put_slice(bytes);
    Ok(())
}

fn need(frame: &Bytes, len: usize) -> Result<(), io::Error> {
    if frame.remaining() < len {
        return Err(invalid_data(format!(
            "peer message is cut short: need {} more bytes, have {}",
            len,
            frame.remaining()
        )));
    }
    Ok(())
}

fn take_u8(frame: &mut Bytes) -> Result<u8, io::Error> {
    need(frame, 1)?;
    Ok(frame.get_u8())
}

fn take_u32(frame: &mut Bytes) -> Result<u32, io::Error> {
    need(frame, 4)?;
    Ok(frame.get_u32_le())
}

fn take_u64(frame: &mut Bytes) -> Result<u64, io::Error> {
    need(frame, 8)?;
    Ok(frame.get_u64_le())
}

fn take_bytes(frame: &mut Bytes) -> Result<Bytes, io::Error> {
    let len = take_u32(frame)? as usize;
    need(frame, len)?;
    Ok(frame.split_to(len))
}

fn take_string(frame: &mut Bytes) -> Result<String, io::Error> {
    let bytes = take_bytes(frame)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| invalid_data(e.to_string()))
}
