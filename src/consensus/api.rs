use crate::consensus::{StateMachineError, StateMachineOutput};
use crate::snapshot::SnapshotError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, io};
use tokio::time::Duration;

/// ConsensusModule is what the cache node needs from a replicated log: ordered, committed writes
/// delivered to a `StateMachine`, plus cluster membership.
#[async_trait::async_trait]
pub trait ConsensusModule: Send + Sync {
    /// Appends `entry` to the log and waits until it is committed and applied, returning what
    /// the state machine produced for it. A zero `timeout` waits forever.
    ///
    /// On `Timeout` the entry may still commit later.
    async fn apply(&self, entry: Bytes, timeout: Duration) -> Result<StateMachineOutput, ConsensusError>;

    /// Adds a voting member. `prev_index` of zero skips the configuration-index check.
    async fn add_voter(
        &self,
        id: String,
        address: String,
        prev_index: u64,
        timeout: Duration,
    ) -> Result<(), ConsensusError>;

    async fn configuration(&self) -> Result<LatestConfiguration, ConsensusError>;

    fn state(&self) -> NodeRole;

    async fn stats(&self) -> Result<BTreeMap<String, String>, ConsensusError>;

    /// Seeds an empty node with its first configuration.
    async fn bootstrap_cluster(&self, configuration: Configuration) -> Result<(), ConsensusError>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRole {
    Leader,
    Follower,
    Candidate,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::Leader => "Leader",
            NodeRole::Follower => "Follower",
            NodeRole::Candidate => "Candidate",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: String,
    /// Consensus transport address.
    pub address: String,
}

impl ClusterMember {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        ClusterMember {
            id: id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for ClusterMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.address)
    }
}

/// Configuration is the set of voters. Every member is a voter.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub members: Vec<ClusterMember>,
}

impl Configuration {
    pub fn new(members: Vec<ClusterMember>) -> Self {
        Configuration { members }
    }

    pub fn member(&self, id: &str) -> Option<&ClusterMember> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Adds `member`, or updates the address of a member with the same id.
    pub(crate) fn upsert(&mut self, member: ClusterMember) {
        match self.members.iter_mut().find(|m| m.id == member.id) {
            Some(existing) => existing.address = member.address,
            None => self.members.push(member),
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", member)?;
        }
        f.write_str("]")
    }
}

/// LatestConfiguration is a configuration together with the log index that introduced it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LatestConfiguration {
    pub configuration: Configuration,
    pub index: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("node is not the leader")]
    NotLeader,

    #[error("timed out waiting for the consensus module")]
    Timeout,

    #[error("cluster already bootstrapped")]
    AlreadyBootstrapped,

    #[error("configuration changed since index {expected} (latest is {latest})")]
    ConfigurationChanged { expected: u64, latest: u64 },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    #[error("consensus module has shut down")]
    Shutdown,

    #[error("log I/O error: {0}")]
    Log(#[from] io::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error("consensus task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
