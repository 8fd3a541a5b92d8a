#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),

    #[error("unknown log level '{0}'")]
    UnknownLogLevel(String),
}
