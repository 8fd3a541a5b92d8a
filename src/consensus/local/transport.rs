use crate::consensus::local::actor::WeakConsensus;
use crate::consensus::local::rpc::{PeerReply, PeerRequest};
use crate::consensus::RoleChangeListener;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

// Snapshots travel in a single frame.
const MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

fn peer_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .little_endian()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

/// serve_peers answers leader requests until the consensus module stops.
pub(super) async fn serve_peers(
    logger: slog::Logger,
    listener: TcpListener,
    consensus: WeakConsensus,
    mut roles: RoleChangeListener,
) {
    if let Ok(addr) = listener.local_addr() {
        slog::info!(logger, "Serving peers on '{}'", addr);
    }

    loop {
        tokio::select! {
            role = roles.next() => {
                if role.is_none() {
                    slog::info!(logger, "Consensus stopped, closing peer listener");
                    break;
                }
            }
            accept_result = listener.accept() => match accept_result {
                Ok((stream, peer)) => {
                    let conn_logger = logger.new(slog::o!("peer" => peer.to_string()));
                    slog::debug!(conn_logger, "Accepted peer connection");
                    tokio::spawn(serve_peer(conn_logger, stream, consensus.clone()));
                }
                Err(e) => {
                    slog::warn!(logger, "Failed to accept peer connection: {}", e);
                }
            },
        }
    }
}

// One reply per request, in order.
async fn serve_peer(logger: slog::Logger, stream: TcpStream, consensus: WeakConsensus) {
    if let Err(e) = stream.set_nodelay(true) {
        slog::debug!(logger, "Failed to set TCP_NODELAY: {}", e);
    }
    let mut frames = Framed::new(stream, peer_codec());

    while let Some(frame) = frames.next().await {
        let request = match frame.and_then(|frame| PeerRequest::decode(frame.freeze())) {
            Ok(request) => request,
            Err(e) => {
                slog::warn!(logger, "Closing peer connection after bad frame: {}", e);
                break;
            }
        };

        let reply = match request {
            PeerRequest::AppendEntries(input) => consensus.append_entries(input).await,
            PeerRequest::InstallSnapshot(input) => consensus.install_snapshot(input).await,
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                slog::warn!(logger, "Closing peer connection, request failed: {}", e);
                break;
            }
        };

        if let Err(e) = frames.send(reply.encode()).await {
            slog::debug!(logger, "Failed to write peer reply: {}", e);
            break;
        }
    }

    slog::debug!(logger, "Peer connection closed");
}

type PeerConnection = Framed<TcpStream, LengthDelimitedCodec>;

/// PeerClient sends requests to one follower, reusing its connection until something fails.
pub(super) struct PeerClient {
    address: String,
    connection: Option<PeerConnection>,
}

impl PeerClient {
    pub(super) fn new(address: impl Into<String>) -> Self {
        PeerClient {
            address: address.into(),
            connection: None,
        }
    }

    pub(super) async fn call(&mut self, request: &PeerRequest, timeout: Duration) -> Result<PeerReply, io::Error> {
        let frame = request.encode()?;
        // Taken out so a failed or abandoned exchange leaves nothing half read behind.
        let connection = self.connection.take();

        match tokio::time::timeout(timeout, exchange(&self.address, connection, frame)).await {
            Ok(Ok((connection, reply))) => {
                self.connection = Some(connection);
                Ok(reply)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no reply from '{}' within {:?}", self.address, timeout),
            )),
        }
    }
}

async fn exchange(
    address: &str,
    connection: Option<PeerConnection>,
    frame: Bytes,
) -> Result<(PeerConnection, PeerReply), io::Error> {
    let mut connection = match connection {
        Some(connection) => connection,
        None => {
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(true)?;
            Framed::new(stream, peer_codec())
        }
    };

    connection.send(frame).await?;
    let reply = match connection.next().await {
        Some(frame) => PeerReply::decode(frame?.freeze())?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("'{}' closed the connection", address),
            ))
        }
    };

    Ok((connection, reply))
}
