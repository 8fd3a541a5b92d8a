//! Length-prefixed binary protocol spoken between clients and cache nodes.
mod codec;
mod command;
mod error;
mod response;
mod status;
mod wire;

pub use codec::CommandCodec;
pub use command::Command;
pub use command::CommandKind;
pub use error::ProtocolError;
pub use response::GetResult;
pub use response::JoinResult;
pub use response::Response;
pub use response::SetResult;
pub use status::Status;
pub use wire::MAX_FRAME_LEN;
