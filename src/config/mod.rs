mod args;
mod error;
mod node_config;

pub use args::NodeArgs;
pub use error::ConfigError;
pub use node_config::parse_log_level;
pub use node_config::NodeConfig;
