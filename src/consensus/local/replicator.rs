use crate::commitlog::Index;
use crate::consensus::local::actor::WeakConsensus;
use crate::consensus::local::engine::ReplicationBatch;
use crate::consensus::local::rpc::{InstallSnapshotInput, PeerReply, PeerRequest};
use crate::consensus::local::transport::PeerClient;
use crate::consensus::log_entry::Term;
use crate::consensus::{ClusterMember, ConsensusError};
use crate::snapshot::{FileSnapshotStore, SnapshotError, SnapshotMeta};
use bytes::Bytes;
use rand::Rng;
use std::io::Read;
use tokio::sync::{oneshot, watch};
use tokio::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);
const BASE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// ReplicatorHandle owns a running replicator. Dropping it stops the replicator.
pub(super) struct ReplicatorHandle {
    pub address: String,
    _stop: oneshot::Sender<()>,
}

/// spawn() starts shipping the leader's log to `peer`, beginning with entry `next`.
///
/// `progress` carries the leader's next log index. A caught up replicator waits for it to move,
/// or sends a heartbeat once `heartbeat` passes.
pub(super) fn spawn(
    logger: slog::Logger,
    peer: ClusterMember,
    consensus: WeakConsensus,
    snapshots: FileSnapshotStore,
    progress: watch::Receiver<u64>,
    next: Index,
    heartbeat: Duration,
) -> ReplicatorHandle {
    let (stop_tx, stop_rx) = oneshot::channel();
    let address = peer.address.clone();

    slog::info!(logger, "Replicating to {} from {:?}", peer, next);
    let replicator = Replicator {
        logger,
        client: PeerClient::new(peer.address),
        consensus,
        snapshots,
        progress,
        heartbeat,
        next,
        matched: None,
        failures: 0,
    };
    tokio::spawn(replicator.run(stop_rx));

    ReplicatorHandle {
        address,
        _stop: stop_tx,
    }
}

enum Step {
    Continue,
    CaughtUp,
    Retry,
    Stop,
}

struct Replicator {
    logger: slog::Logger,
    client: PeerClient,
    consensus: WeakConsensus,
    snapshots: FileSnapshotStore,
    progress: watch::Receiver<u64>,
    heartbeat: Duration,

    // Next entry to send and the highest one known to be on the follower.
    next: Index,
    matched: Option<Index>,
    failures: u32,
}

impl Replicator {
    async fn run(mut self, mut stop: oneshot::Receiver<()>) {
        loop {
            let step = tokio::select! {
                _ = &mut stop => break,
                step = self.step() => step,
            };

            match step {
                Step::Continue => self.failures = 0,
                Step::CaughtUp => {
                    self.failures = 0;
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = self.progress.changed() => {}
                        _ = tokio::time::sleep(self.heartbeat) => {}
                    }
                }
                Step::Retry => {
                    self.failures += 1;
                    tokio::select! {
                        _ = &mut stop => break,
                        _ = tokio::time::sleep(backoff(self.failures)) => {}
                    }
                }
                Step::Stop => break,
            }
        }

        slog::info!(self.logger, "Stopped replicating, follower matched {:?}", self.matched);
    }

    async fn step(&mut self) -> Step {
        // Anything appended from here on wakes a caught up replicator.
        self.progress.borrow_and_update();

        let batch = match self.consensus.replication_batch(self.next).await {
            Ok(batch) => batch,
            Err(ConsensusError::NotLeader) | Err(ConsensusError::Shutdown) => return Step::Stop,
            Err(e) => {
                slog::warn!(self.logger, "Failed to read entries from {:?}: {}", self.next, e);
                return Step::Retry;
            }
        };

        match batch {
            ReplicationBatch::Entries { request, leader_next } => {
                let term = request.term;
                let prev = request.prev.map(|(_, index)| index);
                let count = request.entries.len() as u64;

                match self
                    .client
                    .call(&PeerRequest::AppendEntries(request), REQUEST_TIMEOUT)
                    .await
                {
                    Ok(reply) => self.handle_append_reply(term, reply, prev, count, leader_next).await,
                    Err(e) => {
                        self.log_failure(&e);
                        Step::Retry
                    }
                }
            }
            ReplicationBatch::Snapshot { term, leader_id } => self.send_snapshot(term, leader_id).await,
        }
    }

    async fn handle_append_reply(
        &mut self,
        term: Term,
        reply: PeerReply,
        prev: Option<Index>,
        count: u64,
        leader_next: Index,
    ) -> Step {
        if reply.term > term {
            self.consensus.observed_term(reply.term).await;
            return Step::Stop;
        }

        if reply.success {
            self.update_log(prev, count);
            if self.next >= leader_next {
                Step::CaughtUp
            } else {
                Step::Continue
            }
        } else if self.rewind_log(reply.last_index) {
            Step::Continue
        } else {
            Step::Retry
        }
    }

    async fn send_snapshot(&mut self, term: Term, leader_id: String) -> Step {
        let snapshots = self.snapshots.clone();
        let latest = match tokio::task::spawn_blocking(move || read_latest(&snapshots)).await {
            Ok(Ok(Some(latest))) => latest,
            Ok(Ok(None)) => {
                slog::warn!(self.logger, "Follower needs a snapshot but none exists yet");
                return Step::Retry;
            }
            Ok(Err(e)) => {
                slog::warn!(self.logger, "Failed to read the newest snapshot: {}", e);
                return Step::Retry;
            }
            Err(e) => {
                slog::error!(self.logger, "Snapshot reader task failed: {}", e);
                return Step::Retry;
            }
        };
        let (meta, data) = latest;
        let index = match Index::from_u64(meta.index) {
            Some(index) => index,
            None => return Step::Retry,
        };

        slog::info!(self.logger, "Sending snapshot {} ({} bytes)", meta.id, data.len());
        let request = PeerRequest::InstallSnapshot(InstallSnapshotInput {
            term,
            leader_id,
            last_included: (Term::new(meta.term), index),
            configuration: meta.configuration,
            configuration_index: meta.configuration_index,
            data: Bytes::from(data),
        });

        match self.client.call(&request, SNAPSHOT_TIMEOUT).await {
            Ok(reply) if reply.term > term => {
                self.consensus.observed_term(reply.term).await;
                Step::Stop
            }
            Ok(reply) if reply.success => {
                self.matched = Some(index);
                self.next = index.plus(1);
                Step::Continue
            }
            Ok(_) => Step::Retry,
            Err(e) => {
                self.log_failure(&e);
                Step::Retry
            }
        }
    }

    fn update_log(&mut self, prev: Option<Index>, count: u64) {
        let last = prev.map(|i| i.as_u64()).unwrap_or(0) + count;
        if let Some(matched) = Index::from_u64(last) {
            self.matched = Some(matched);
            self.next = matched.plus(1);
        }
    }

    /// Steps back after a rejection, jumping straight past the follower's last entry when that
    /// is further back. Returns false when there is nowhere left to go.
    fn rewind_log(&mut self, last_index: u64) -> bool {
        let hint = Index::new(last_index + 1);
        match self.next.checked_minus(1) {
            Some(back) => {
                self.next = back.min(hint);
                true
            }
            None => false,
        }
    }

    fn log_failure(&self, e: &std::io::Error) {
        // The follower may simply not be up yet.
        if self.failures == 0 {
            slog::warn!(self.logger, "Request failed: {}", e);
        } else {
            slog::debug!(self.logger, "Request failed again ({}): {}", self.failures, e);
        }
    }
}

fn read_latest(snapshots: &FileSnapshotStore) -> Result<Option<(SnapshotMeta, Vec<u8>)>, SnapshotError> {
    match snapshots.latest()? {
        Some((meta, mut state)) => {
            let mut data = Vec::with_capacity(meta.size as usize);
            state.read_to_end(&mut data)?;
            Ok(Some((meta, data)))
        }
        None => Ok(None),
    }
}

fn backoff(failures: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1 << failures.saturating_sub(1).min(16));
    let capped = exp.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
    capped + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicator_at(next: u64) -> Replicator {
        let (_, progress) = watch::channel(next);
        let dir = tempfile::tempdir().unwrap();
        let logger = slog::Logger::root(slog::Discard, slog::o!());

        Replicator {
            logger: logger.clone(),
            client: PeerClient::new("127.0.0.1:1"),
            consensus: WeakConsensus::detached(),
            snapshots: FileSnapshotStore::open(logger, dir.path(), 1).unwrap(),
            progress,
            heartbeat: Duration::from_secs(1),
            next: Index::new(next),
            matched: None,
            failures: 0,
        }
    }

    #[test]
    fn test_update_log() {
        let mut replicator = replicator_at(4);
        replicator.update_log(Some(Index::new(3)), 2);
        assert_eq!(replicator.matched, Some(Index::new(5)));
        assert_eq!(replicator.next, Index::new(6));

        // A heartbeat from the start of the log proves nothing.
        let mut replicator = replicator_at(1);
        replicator.update_log(None, 0);
        assert_eq!(replicator.matched, None);
        assert_eq!(replicator.next, Index::new(1));
    }

    #[test]
    fn test_rewind_log() {
        let mut replicator = replicator_at(10);
        assert!(replicator.rewind_log(8));
        assert_eq!(replicator.next, Index::new(9));

        // The follower's last index jumps further back.
        assert!(replicator.rewind_log(2));
        assert_eq!(replicator.next, Index::new(3));

        let mut replicator = replicator_at(1);
        assert!(!replicator.rewind_log(0));
        assert_eq!(replicator.next, Index::new(1));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = backoff(1);
        assert!(first >= BASE_BACKOFF && first <= BASE_BACKOFF + BASE_BACKOFF / 2);

        let huge = backoff(40);
        assert!(huge >= MAX_BACKOFF && huge <= MAX_BACKOFF + MAX_BACKOFF / 2);
    }
}
