use crate::client::{CacheClient, ClientError};
use crate::server::ServerError;
use rand::Rng;
use tokio::time::Duration;

const BASE_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// join_cluster asks the leader at `leader_addr` to add this node as a voter.
///
/// Connection failures and non-OK answers are retried with jittered exponential backoff, up to
/// `attempts` tries in total. The leader treats a repeated join as a no-op, so retrying after a
/// lost response is safe.
pub async fn join_cluster(
    logger: &slog::Logger,
    leader_addr: &str,
    node_id: &str,
    raft_address: &str,
    attempts: u32,
) -> Result<(), ServerError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match try_join(leader_addr, node_id, raft_address).await {
            Ok(()) => {
                slog::info!(logger, "Joined cluster via '{}' as {}@{}", leader_addr, node_id, raft_address);
                return Ok(());
            }
            Err(e) if attempt >= attempts => {
                return Err(ServerError::JoinFailed {
                    leader_addr: leader_addr.to_string(),
                    attempts,
                    last_error: e,
                });
            }
            Err(e) => {
                slog::warn!(logger, "Join attempt {}/{} via '{}' failed: {}", attempt, attempts, leader_addr, e);
                tokio::time::sleep(backoff(attempt)).await;
            }
        }
    }
}

async fn try_join(leader_addr: &str, node_id: &str, raft_address: &str) -> Result<(), ClientError> {
    let client = CacheClient::connect(leader_addr).await?;
    client.join(node_id, raft_address).await
}

fn backoff(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF.saturating_mul(1 << attempt.saturating_sub(1).min(16));
    let capped = exp.min(MAX_BACKOFF);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
    capped + Duration::from_millis(jitter_ms)
}
