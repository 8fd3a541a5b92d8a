use crate::cache::CacheStore;
use crate::consensus::ConsensusModule;
use crate::protocol::{CommandCodec, Response};
use crate::server::CommandDispatcher;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::{FramedRead, FramedWrite};

/// serve_connection reads commands until EOF or a protocol error, running each on its own task.
///
/// At most `max_in_flight` commands run at once; the reader stops pulling frames while all permits
/// are taken. Responses are written by a single writer task in completion order, not arrival
/// order. The socket is closed once the reader is done and every in-flight response is written.
pub(super) async fn serve_connection<C, M>(
    logger: slog::Logger,
    stream: TcpStream,
    dispatcher: Arc<CommandDispatcher<C, M>>,
    max_in_flight: usize,
) where
    C: CacheStore + 'static,
    M: ConsensusModule + 'static,
{
    if let Err(e) = stream.set_nodelay(true) {
        slog::debug!(logger, "Failed to set TCP_NODELAY: {}", e);
    }

    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, CommandCodec::new());

    let (tx, rx) = mpsc::channel(max_in_flight);
    let writer = tokio::spawn(write_responses(
        logger.clone(),
        FramedWrite::new(write_half, CommandCodec::new()),
        rx,
    ));
    let permits = Arc::new(Semaphore::new(max_in_flight));

    while let Some(frame) = frames.next().await {
        let command = match frame {
            Ok(command) => command,
            Err(e) if e.is_eof() => break,
            Err(e) => {
                slog::error!(logger, "Closing connection after protocol error: {}", e);
                break;
            }
        };
        slog::debug!(logger, "Received {:?}", command.kind());

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Only happens if the semaphore is closed, which it never is.
            Err(_) => break,
        };

        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        let logger = logger.clone();
        tokio::spawn(async move {
            let response = dispatcher.dispatch(command).await;
            if tx.send(response).await.is_err() {
                slog::debug!(logger, "Connection writer is gone, dropping response");
            }
            drop(permit);
        });
    }

    drop(frames);
    drop(tx);
    if let Err(e) = writer.await {
        slog::error!(logger, "Connection writer task failed: {}", e);
    }
    slog::debug!(logger, "Connection closed");
}

async fn write_responses(
    logger: slog::Logger,
    mut sink: FramedWrite<OwnedWriteHalf, CommandCodec>,
    mut rx: mpsc::Receiver<Response>,
) {
    while let Some(response) = rx.recv().await {
        if let Err(e) = sink.send(response).await {
            slog::warn!(logger, "Failed to write response: {}", e);
            break;
        }
    }
}
