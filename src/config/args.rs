use clap::Parser;

/// Command-line flags of a cache node. Every flag can also come from the environment.
#[derive(Clone, Debug, Parser)]
#[command(name = "raftcache", version, about = "Replicated in-memory cache node")]
pub struct NodeArgs {
    /// Address the client protocol listens on.
    #[arg(long, env = "SERVER_LISTEN_ADDR", default_value = "127.0.0.1:3000")]
    pub listen_addr: String,

    /// Client address of the leader to join. Without it this node bootstraps a new cluster.
    #[arg(long, env = "LEADER_ADDR")]
    pub leader_addr: Option<String>,

    #[arg(long, env = "RAFT_NODE_ID")]
    pub node_id: String,

    /// Address the consensus transport listens on. Advertised to the leader when joining.
    #[arg(long, env = "RAFT_ADDR", default_value = "127.0.0.1:1111")]
    pub raft_addr: String,

    /// Directory holding the log and snapshots.
    #[arg(long, env = "RAFT_VOL_DIR")]
    pub volume_dir: std::path::PathBuf,

    #[arg(long, env = "APPLY_TIMEOUT_MS", default_value_t = 500)]
    pub apply_timeout_ms: u64,

    /// Applied entries between automatic snapshots. 0 disables them.
    #[arg(long, env = "SNAPSHOT_THRESHOLD", default_value_t = 1024)]
    pub snapshot_threshold: u64,

    #[arg(long, env = "SNAPSHOT_RETAIN", default_value_t = 2)]
    pub snapshot_retain: usize,

    /// Commands executed concurrently per client connection.
    #[arg(long, env = "MAX_IN_FLIGHT", default_value_t = 64)]
    pub max_in_flight: usize,

    #[arg(long, env = "CACHE_MAX_ENTRIES")]
    pub cache_max_entries: Option<usize>,

    #[arg(long, env = "JOIN_ATTEMPTS", default_value_t = 5)]
    pub join_attempts: u32,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
