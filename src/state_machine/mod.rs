mod cache_state_machine;
mod ttl;

pub use cache_state_machine::CacheStateMachine;
pub use ttl::seconds_from_ttl;
pub use ttl::ttl_from_seconds;
