mod cache;
mod client;
mod commitlog;
mod config;
mod consensus;
mod logging;
mod protocol;
mod server;
mod snapshot;
mod state_machine;

pub use cache::CacheEntry;
pub use cache::CacheError;
pub use cache::CacheStore;
pub use cache::MemoryCache;
pub use client::CacheClient;
pub use client::ClientError;
pub use config::parse_log_level;
pub use config::ConfigError;
pub use config::NodeArgs;
pub use config::NodeConfig;
pub use consensus::ClusterMember;
pub use consensus::Configuration;
pub use consensus::ConsensusError;
pub use consensus::ConsensusModule;
pub use consensus::LatestConfiguration;
pub use consensus::LocalConsensus;
pub use consensus::LocalConsensusOptions;
pub use consensus::NodeRole;
pub use consensus::RoleChangeListener;
pub use consensus::StateMachine;
pub use consensus::StateMachineError;
pub use consensus::StateMachineOutput;
pub use consensus::StateMachineSnapshot;
pub use logging::create_cli_logger;
pub use logging::create_root_logger;
pub use protocol::Command;
pub use protocol::CommandCodec;
pub use protocol::CommandKind;
pub use protocol::GetResult;
pub use protocol::JoinResult;
pub use protocol::ProtocolError;
pub use protocol::Response;
pub use protocol::SetResult;
pub use protocol::Status;
pub use protocol::MAX_FRAME_LEN;
pub use server::join_cluster;
pub use server::shutdown_signal;
pub use server::CommandDispatcher;
pub use server::Server;
pub use server::ServerError;
pub use server::ShutdownHandle;
pub use server::ShutdownSignal;
pub use snapshot::FileSnapshotSink;
pub use snapshot::FileSnapshotStore;
pub use snapshot::SnapshotError;
pub use snapshot::SnapshotMeta;
pub use state_machine::seconds_from_ttl;
pub use state_machine::ttl_from_seconds;
pub use state_machine::CacheStateMachine;

// `crate::{root_mod}` holds no code, only `mod` and `pub use` lines. No `mod` is `pub`; each
// module exports its public surface through individual `pub use` lines.
