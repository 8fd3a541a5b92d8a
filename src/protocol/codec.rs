use crate::protocol::command::{self, FrameCheck};
use crate::protocol::wire::MAX_FRAME_LEN;
use crate::protocol::{Command, ProtocolError, Response};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

// Upper bound on what one decode call reserves while a frame is incomplete. The buffer grows
// with the bytes that actually arrive, not with what a length prefix claims.
const READ_CHUNK: usize = 8 * 1024;

/// CommandCodec is the server side of the wire protocol: commands in, responses out.
///
/// Decoding is streaming. A frame is only consumed from the buffer once every byte its length
/// prefixes promise has arrived.
#[derive(Clone, Debug)]
pub struct CommandCodec {
    max_frame_len: usize,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        CommandCodec { max_frame_len }
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CommandCodec {
    type Item = Command;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        match command::check_frame(src, self.max_frame_len)? {
            FrameCheck::Complete(frame_len) => {
                let mut frame = src.split_to(frame_len).freeze();
                Command::decode(&mut frame).map(Some)
            }
            FrameCheck::Incomplete { needed } => {
                src.reserve(needed.min(READ_CHUNK));
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Command>, ProtocolError> {
        match self.decode(src)? {
            Some(command) => Ok(Some(command)),
            None if src.is_empty() => Ok(None),
            None => match command::check_frame(src, self.max_frame_len)? {
                FrameCheck::Incomplete { needed } => Err(ProtocolError::Truncated { needed }),
                // decode() just said otherwise.
                FrameCheck::Complete(_) => Ok(None),
            },
        }
    }
}

impl Encoder<Response> for CommandCodec {
    type Error = ProtocolError;

    fn encode(&mut self, response: Response, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        response.encode(dst);
        Ok(())
    }
}
