use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unsupported command: {0:#04x}")]
    UnsupportedCommand(u8),

    #[error("negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("frame of at least {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    // A buffer ended in the middle of a frame. On a socket this only surfaces at EOF.
    #[error("truncated frame: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// True when the peer went away cleanly between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}
