use crate::protocol::wire::{self, LEN_PREFIX};
use crate::protocol::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::convert::TryFrom;

/// Single byte discriminant that opens every command frame.
///
/// `3` is reserved (an unimplemented delete) and decodes as unsupported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum CommandKind {
    Set = 1,
    Get = 2,
    Join = 4,
}

impl TryFrom<u8> for CommandKind {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            1 => Ok(CommandKind::Set),
            2 => Ok(CommandKind::Get),
            4 => Ok(CommandKind::Join),
            other => Err(ProtocolError::UnsupportedCommand(other)),
        }
    }
}

enum Field {
    Prefixed,
    Fixed(usize),
}

impl CommandKind {
    // Fields in declaration order, after the discriminant.
    fn layout(self) -> &'static [Field] {
        match self {
            CommandKind::Set => &[Field::Prefixed, Field::Prefixed, Field::Fixed(4)],
            CommandKind::Get => &[Field::Prefixed],
            CommandKind::Join => &[Field::Prefixed, Field::Prefixed],
        }
    }
}

/// Command is a request from a client (or a joining node) to the cache.
///
/// Only `Set` is ever written to the replicated log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Set { key: Bytes, value: Bytes, ttl: i32 },
    Get { key: Bytes },
    Join { node_id: Bytes, raft_address: Bytes },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Set { .. } => CommandKind::Set,
            Command::Get { .. } => CommandKind::Get,
            Command::Join { .. } => CommandKind::Join,
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Command::Set { key, value, .. } => wire::prefixed_len(key) + wire::prefixed_len(value) + 4,
            Command::Get { key } => wire::prefixed_len(key),
            Command::Join { node_id, raft_address } => wire::prefixed_len(node_id) + wire::prefixed_len(raft_address),
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.encoded_len());
        dst.put_u8(self.kind() as u8);

        match self {
            Command::Set { key, value, ttl } => {
                wire::put_prefixed(dst, key);
                wire::put_prefixed(dst, value);
                dst.put_i32_le(*ttl);
            }
            Command::Get { key } => {
                wire::put_prefixed(dst, key);
            }
            Command::Join { node_id, raft_address } => {
                wire::put_prefixed(dst, node_id);
                wire::put_prefixed(dst, raft_address);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decodes exactly one command from the front of `src`, leaving whatever follows it.
    pub fn decode<B: Buf>(src: &mut B) -> Result<Command, ProtocolError> {
        let kind = CommandKind::try_from(wire::get_u8(src)?)?;

        let command = match kind {
            CommandKind::Set => {
                let key = wire::get_prefixed(src)?;
                let value = wire::get_prefixed(src)?;
                let ttl = wire::get_i32(src)?;
                Command::Set { key, value, ttl }
            }
            CommandKind::Get => Command::Get {
                key: wire::get_prefixed(src)?,
            },
            CommandKind::Join => {
                let node_id = wire::get_prefixed(src)?;
                let raft_address = wire::get_prefixed(src)?;
                Command::Join { node_id, raft_address }
            }
        };

        Ok(command)
    }

    /// Decodes a replicated log entry, which must hold one command and nothing else.
    pub fn decode_entry(mut entry: Bytes) -> Result<Command, ProtocolError> {
        let command = Self::decode(&mut entry)?;
        if entry.has_remaining() {
            return Err(ProtocolError::TrailingBytes(entry.remaining()));
        }

        Ok(command)
    }
}

/// Outcome of inspecting a partially received buffer.
#[derive(Debug, Eq, PartialEq)]
pub(super) enum FrameCheck {
    Complete(usize),
    /// `needed` is a lower bound; later length prefixes are still unknown.
    Incomplete { needed: usize },
}

/// Walks the length prefixes of the frame at the start of `src` without consuming anything.
///
/// Bad discriminants and bad lengths are reported as soon as the offending byte arrives, so a
/// garbage stream fails fast instead of waiting for bytes that will never make sense.
pub(super) fn check_frame(src: &[u8], limit: usize) -> Result<FrameCheck, ProtocolError> {
    let kind = match src.first() {
        Some(byte) => CommandKind::try_from(*byte)?,
        None => return Ok(FrameCheck::Incomplete { needed: 1 }),
    };

    let mut frame_len = 1;
    for field in kind.layout() {
        match field {
            Field::Fixed(width) => frame_len += width,
            Field::Prefixed => {
                let len = match wire::peek_i32(src, frame_len) {
                    Some(len) => wire::checked_len(len)?,
                    None => {
                        return Ok(FrameCheck::Incomplete {
                            needed: frame_len + LEN_PREFIX - src.len(),
                        })
                    }
                };
                frame_len += LEN_PREFIX + len;
            }
        }

        if frame_len > limit {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                limit,
            });
        }
    }

    if src.len() < frame_len {
        return Ok(FrameCheck::Incomplete {
            needed: frame_len - src.len(),
        });
    }

    Ok(FrameCheck::Complete(frame_len))
}
