use std::convert::TryFrom;
use tokio::time::Duration;

#[derive(Clone, Default)]
pub struct LocalConsensusOptions {
    /// Applied entries between automatic snapshots. Zero disables them.
    pub snapshot_threshold: Option<u64>,
    /// Capacity of the actor's event queue.
    pub event_buffer: Option<usize>,
    /// A log segment stops taking appends once it holds this many bytes.
    pub log_segment_bytes: Option<u64>,
    /// How long the leader lets a caught up follower go without a request.
    pub heartbeat_interval: Option<Duration>,
}

pub(super) struct LocalConsensusOptionsValidated {
    pub snapshot_threshold: u64,
    pub event_buffer: usize,
    pub log_segment_bytes: u64,
    pub heartbeat_interval: Duration,
}

impl LocalConsensusOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.event_buffer == 0 {
            return Err("Event buffer must hold at least one event");
        }
        if self.log_segment_bytes == 0 {
            return Err("Log segments must allow at least one byte");
        }
        if self.heartbeat_interval.is_zero() {
            return Err("Heartbeat interval must be non-zero");
        }

        Ok(())
    }
}

impl TryFrom<LocalConsensusOptions> for LocalConsensusOptionsValidated {
    type Error = &'static str;

    fn try_from(options: LocalConsensusOptions) -> Result<Self, Self::Error> {
        let values = LocalConsensusOptionsValidated {
            snapshot_threshold: options.snapshot_threshold.unwrap_or(1024),
            event_buffer: options.event_buffer.unwrap_or(256),
            log_segment_bytes: options.log_segment_bytes.unwrap_or(16 * 1024 * 1024),
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_secs(1)),
        };

        values.validate()?;
        Ok(values)
    }
}
