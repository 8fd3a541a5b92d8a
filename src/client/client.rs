use crate::client::ClientError;
use crate::protocol::{Command, GetResult, JoinResult, SetResult, Status};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;

/// CacheClient speaks the wire protocol over one TCP connection.
///
/// Responses carry no request id, so only one command is in flight at a time; concurrent callers
/// queue on the connection. Open more clients for parallelism.
pub struct CacheClient {
    stream: Mutex<TcpStream>,
}

impl CacheClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(CacheClient {
            stream: Mutex::new(stream),
        })
    }

    /// `None` when the key is absent or expired.
    pub async fn get(&self, key: impl Into<Bytes>) -> Result<Option<Bytes>, ClientError> {
        let command = Command::Get { key: key.into() };

        let mut stream = self.stream.lock().await;
        write_command(&mut stream, &command).await?;
        let result = GetResult::read_from(&mut *stream).await?;

        match result.status {
            Status::Ok => Ok(Some(result.value)),
            Status::KeyNotFound => Ok(None),
            status => Err(ClientError::Rejected { status }),
        }
    }

    /// Sets `key` through the leader. `ttl` is in seconds; zero or negative never expires.
    ///
    /// A rejection means the outcome is unknown. The write may still commit.
    pub async fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: i32) -> Result<(), ClientError> {
        let command = Command::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        };

        let mut stream = self.stream.lock().await;
        write_command(&mut stream, &command).await?;
        let result = SetResult::read_from(&mut *stream).await?;

        expect_ok(result.status)
    }

    /// Asks the node at the other end (the leader) to add `node_id` as a voter.
    pub async fn join(&self, node_id: &str, raft_address: &str) -> Result<(), ClientError> {
        let command = Command::Join {
            node_id: Bytes::copy_from_slice(node_id.as_bytes()),
            raft_address: Bytes::copy_from_slice(raft_address.as_bytes()),
        };

        let mut stream = self.stream.lock().await;
        write_command(&mut stream, &command).await?;
        let result = JoinResult::read_from(&mut *stream).await?;

        expect_ok(result.status)
    }
}

async fn write_command(stream: &mut TcpStream, command: &Command) -> Result<(), ClientError> {
    let mut buf = BytesMut::with_capacity(command.encoded_len());
    command.encode(&mut buf);
    stream.write_all(&buf).await?;
    Ok(())
}

fn expect_ok(status: Status) -> Result<(), ClientError> {
    match status {
        Status::Ok => Ok(()),
        status => Err(ClientError::Rejected { status }),
    }
}
