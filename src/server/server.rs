use crate::cache::CacheStore;
use crate::consensus::ConsensusModule;
use crate::server::connection::serve_connection;
use crate::server::{CommandDispatcher, ServerError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};

/// Server accepts client connections and hands each one to its own task.
pub struct Server<C: CacheStore, M: ConsensusModule> {
    logger: slog::Logger,
    listener: TcpListener,
    dispatcher: Arc<CommandDispatcher<C, M>>,
    max_in_flight: usize,
}

impl<C, M> Server<C, M>
where
    C: CacheStore + 'static,
    M: ConsensusModule + 'static,
{
    pub async fn bind<A: ToSocketAddrs + std::fmt::Display>(
        logger: slog::Logger,
        addr: A,
        dispatcher: CommandDispatcher<C, M>,
        max_in_flight: usize,
    ) -> Result<Self, ServerError> {
        let display_addr = addr.to_string();
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: display_addr,
            source,
        })?;

        Ok(Server {
            logger,
            listener,
            dispatcher: Arc::new(dispatcher),
            max_in_flight: max_in_flight.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` resolves. Connections already accepted keep running.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            logger,
            listener,
            dispatcher,
            max_in_flight,
        } = self;
        slog::info!(logger, "Listening on '{}'", listener.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    slog::info!(logger, "Server shutting down");
                    break;
                }
                accept_result = listener.accept() => match accept_result {
                    Ok((stream, peer)) => {
                        let conn_logger = logger.new(slog::o!("peer" => peer.to_string()));
                        slog::debug!(conn_logger, "Accepted connection");
                        tokio::spawn(serve_connection(conn_logger, stream, dispatcher.clone(), max_in_flight));
                    }
                    Err(e) => {
                        slog::warn!(logger, "Failed to accept connection: {}", e);
                    }
                },
            }
        }

        Ok(())
    }
}
