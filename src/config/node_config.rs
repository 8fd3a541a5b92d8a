use crate::config::{ConfigError, NodeArgs};
use std::convert::TryFrom;
use std::path::PathBuf;
use tokio::time::Duration;

/// NodeConfig is `NodeArgs` after validation.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub listen_addr: String,
    pub leader_addr: Option<String>,
    pub node_id: String,
    pub raft_addr: String,
    pub volume_dir: PathBuf,
    pub apply_timeout: Duration,
    pub snapshot_threshold: u64,
    pub snapshot_retain: usize,
    pub max_in_flight: usize,
    pub cache_max_entries: Option<usize>,
    pub join_attempts: u32,
    pub log_level: slog::Level,
}

impl NodeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::Invalid("Node id must not be empty"));
        }
        if self.apply_timeout.is_zero() {
            return Err(ConfigError::Invalid("Apply timeout must be greater than zero"));
        }
        if self.snapshot_retain == 0 {
            return Err(ConfigError::Invalid("At least one snapshot must be retained"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("At least one command per connection must be allowed in flight"));
        }
        if self.cache_max_entries == Some(0) {
            return Err(ConfigError::Invalid("Cache capacity must be greater than zero when set"));
        }

        Ok(())
    }
}

impl TryFrom<NodeArgs> for NodeConfig {
    type Error = ConfigError;

    fn try_from(args: NodeArgs) -> Result<Self, Self::Error> {
        let values = NodeConfig {
            log_level: parse_log_level(&args.log_level)?,
            listen_addr: args.listen_addr,
            leader_addr: args.leader_addr.filter(|addr| !addr.is_empty()),
            node_id: args.node_id,
            raft_addr: args.raft_addr,
            volume_dir: args.volume_dir,
            apply_timeout: Duration::from_millis(args.apply_timeout_ms),
            snapshot_threshold: args.snapshot_threshold,
            snapshot_retain: args.snapshot_retain,
            max_in_flight: args.max_in_flight,
            cache_max_entries: args.cache_max_entries,
            join_attempts: args.join_attempts,
        };

        values.validate()?;
        Ok(values)
    }
}

/// Maps a level name, in any case, to its slog level.
pub fn parse_log_level(level: &str) -> Result<slog::Level, ConfigError> {
    match level.to_ascii_lowercase().as_str() {
        "critical" => Ok(slog::Level::Critical),
        "error" => Ok(slog::Level::Error),
        "warn" | "warning" => Ok(slog::Level::Warning),
        "info" => Ok(slog::Level::Info),
        "debug" => Ok(slog::Level::Debug),
        "trace" => Ok(slog::Level::Trace),
        _ => Err(ConfigError::UnknownLogLevel(level.to_string())),
    }
}
