//! Little-endian primitives shared by commands and responses.
//!
//! Every variable-length field is an `i32` length followed by exactly that many raw bytes.

use crate::protocol::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Upper bound on any single frame. Guards against a hostile length prefix allocating the world.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

pub(super) const LEN_PREFIX: usize = 4;

pub(super) fn put_prefixed(dst: &mut BytesMut, data: &[u8]) {
    dst.put_i32_le(data.len() as i32);
    dst.put_slice(data);
}

pub(super) fn prefixed_len(data: &[u8]) -> usize {
    LEN_PREFIX + data.len()
}

pub(super) fn ensure_remaining<B: Buf>(src: &B, needed: usize) -> Result<(), ProtocolError> {
    let remaining = src.remaining();
    if remaining < needed {
        return Err(ProtocolError::Truncated {
            needed: needed - remaining,
        });
    }

    Ok(())
}

pub(super) fn get_u8<B: Buf>(src: &mut B) -> Result<u8, ProtocolError> {
    ensure_remaining(src, 1)?;
    Ok(src.get_u8())
}

pub(super) fn get_i32<B: Buf>(src: &mut B) -> Result<i32, ProtocolError> {
    ensure_remaining(src, 4)?;
    Ok(src.get_i32_le())
}

pub(super) fn checked_len(len: i32) -> Result<usize, ProtocolError> {
    if len < 0 {
        return Err(ProtocolError::NegativeLength(len));
    }

    let len = len as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_LEN,
        });
    }

    Ok(len)
}

pub(super) fn get_prefixed<B: Buf>(src: &mut B) -> Result<Bytes, ProtocolError> {
    let len = checked_len(get_i32(src)?)?;
    ensure_remaining(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Peeks an `i32` length prefix at `offset` without consuming anything.
pub(super) fn peek_i32(src: &[u8], offset: usize) -> Option<i32> {
    let raw = src.get(offset..offset + LEN_PREFIX)?;
    let mut le = [0u8; LEN_PREFIX];
    le.copy_from_slice(raw);
    Some(i32::from_le_bytes(le))
}
