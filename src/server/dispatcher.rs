use crate::cache::CacheStore;
use crate::consensus::{ConsensusModule, NodeRole, StateMachineOutput};
use crate::protocol::{Command, GetResult, JoinResult, Response, SetResult};
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::Duration;

/// CommandDispatcher decides what each command means on this node.
///
/// * `Get` reads the local cache, which may be stale on a follower.
/// * `Set` goes through consensus and is only accepted by the leader. The cache is never written
///   here; the state machine does that once the entry commits.
/// * `Join` adds a voter, leader only.
pub struct CommandDispatcher<C, M>
where
    C: CacheStore,
    M: ConsensusModule,
{
    logger: slog::Logger,
    cache: Arc<C>,
    consensus: Arc<M>,
    apply_timeout: Duration,
}

impl<C, M> CommandDispatcher<C, M>
where
    C: CacheStore,
    M: ConsensusModule,
{
    pub fn new(logger: slog::Logger, cache: Arc<C>, consensus: Arc<M>, apply_timeout: Duration) -> Self {
        CommandDispatcher {
            logger,
            cache,
            consensus,
            apply_timeout,
        }
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::Get { key } => Response::Get(self.get(&key)),
            set @ Command::Set { .. } => Response::Set(self.set(set).await),
            Command::Join { node_id, raft_address } => Response::Join(self.join(node_id, raft_address).await),
        }
    }

    fn get(&self, key: &[u8]) -> GetResult {
        match self.cache.get(key) {
            Some(value) => GetResult::found(value),
            None => GetResult::not_found(),
        }
    }

    async fn set(&self, command: Command) -> SetResult {
        let role = self.consensus.state();
        if role != NodeRole::Leader {
            slog::warn!(self.logger, "Rejecting set, node is {}", role);
            return SetResult::error();
        }

        match self.consensus.apply(command.to_bytes(), self.apply_timeout).await {
            Ok(StateMachineOutput::Data(mut data)) => match SetResult::decode(&mut data) {
                Ok(result) => result,
                Err(e) => {
                    slog::error!(self.logger, "State machine produced an unreadable result: {}", e);
                    SetResult::error()
                }
            },
            Ok(StateMachineOutput::NoData) => {
                slog::error!(self.logger, "State machine produced no result for a set");
                SetResult::error()
            }
            Err(e) => {
                // Outcome unknown: the entry may still commit.
                slog::warn!(self.logger, "Apply failed: {}", e);
                SetResult::error()
            }
        }
    }

    async fn join(&self, node_id: Bytes, raft_address: Bytes) -> JoinResult {
        let role = self.consensus.state();
        if role != NodeRole::Leader {
            slog::warn!(self.logger, "Rejecting join, node is {}", role);
            return JoinResult::error();
        }

        let node_id = String::from_utf8(node_id.to_vec());
        let raft_address = String::from_utf8(raft_address.to_vec());
        let (node_id, raft_address) = match (node_id, raft_address) {
            (Ok(node_id), Ok(raft_address)) => (node_id, raft_address),
            _ => {
                slog::warn!(self.logger, "Rejecting join with a non UTF-8 node id or address");
                return JoinResult::error();
            }
        };

        let latest = match self.consensus.configuration().await {
            Ok(latest) => latest,
            Err(e) => {
                slog::error!(self.logger, "Failed to get configuration: {}", e);
                return JoinResult::error();
            }
        };

        if let Some(member) = latest.configuration.member(&node_id) {
            if member.address == raft_address {
                slog::info!(self.logger, "Node {} at {} is already a voter", node_id, raft_address);
                return JoinResult::ok();
            }
        }

        match self
            .consensus
            .add_voter(node_id.clone(), raft_address.clone(), 0, Duration::ZERO)
            .await
        {
            Ok(()) => {
                slog::info!(self.logger, "Node {} at {} joined successfully", node_id, raft_address);
                self.log_stats().await;
                JoinResult::ok()
            }
            Err(e) => {
                slog::error!(self.logger, "Failed to add voter {}: {}", node_id, e);
                JoinResult::error()
            }
        }
    }

    async fn log_stats(&self) {
        match self.consensus.stats().await {
            Ok(stats) => slog::debug!(self.logger, "Consensus stats: {:?}", stats),
            Err(e) => slog::warn!(self.logger, "Failed to read consensus stats: {}", e),
        }
    }
}
