//! Responses carry no discriminant on the wire. A client knows which shape to read from the command
//! it sent, so each shape has its own reader.

use crate::protocol::wire;
use crate::protocol::{ProtocolError, Status};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// SetResult answers a `Set`, and any write-class command rejected by a non-leader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SetResult {
    pub status: Status,
}

impl SetResult {
    pub fn ok() -> Self {
        SetResult { status: Status::Ok }
    }

    pub fn error() -> Self {
        SetResult { status: Status::Error }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status.as_u8());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1);
        self.encode(&mut buf);
        buf.freeze()
    }

    pub fn decode<B: Buf>(src: &mut B) -> Result<Self, ProtocolError> {
        Ok(SetResult {
            status: Status::from(wire::get_u8(src)?),
        })
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let status = Status::from(reader.read_u8().await?);
        Ok(SetResult { status })
    }
}

/// GetResult answers a `Get`. `value` is only meaningful when `status` is `Ok`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GetResult {
    pub status: Status,
    pub value: Bytes,
}

impl GetResult {
    pub fn found(value: Bytes) -> Self {
        GetResult {
            status: Status::Ok,
            value,
        }
    }

    pub fn not_found() -> Self {
        GetResult {
            status: Status::KeyNotFound,
            value: Bytes::new(),
        }
    }

    // The length and value are always written, even when empty.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(1 + wire::prefixed_len(&self.value));
        dst.put_u8(self.status.as_u8());
        wire::put_prefixed(dst, &self.value);
    }

    pub fn decode<B: Buf>(src: &mut B) -> Result<Self, ProtocolError> {
        let status = Status::from(wire::get_u8(src)?);
        let value = wire::get_prefixed(src)?;
        Ok(GetResult { status, value })
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let status = Status::from(reader.read_u8().await?);
        let len = wire::checked_len(reader.read_i32_le().await?)?;

        let mut value = vec![0u8; len];
        reader.read_exact(&mut value).await?;

        Ok(GetResult {
            status,
            value: Bytes::from(value),
        })
    }
}

/// JoinResult answers a `Join`. Same layout as `SetResult` so a non-leader's rejection reads the
/// same either way.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct JoinResult {
    pub status: Status,
}

impl JoinResult {
    pub fn ok() -> Self {
        JoinResult { status: Status::Ok }
    }

    pub fn error() -> Self {
        JoinResult { status: Status::Error }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.status.as_u8());
    }

    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self, ProtocolError> {
        let status = Status::from(reader.read_u8().await?);
        Ok(JoinResult { status })
    }
}

/// Response is whatever the dispatcher writes back for one command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Response {
    Set(SetResult),
    Get(GetResult),
    Join(JoinResult),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Set(r) => r.status,
            Response::Get(r) => r.status,
            Response::Join(r) => r.status,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Response::Set(r) => r.encode(dst),
            Response::Get(r) => r.encode(dst),
            Response::Join(r) => r.encode(dst),
        }
    }
}
