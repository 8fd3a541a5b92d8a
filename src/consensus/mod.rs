mod api;
mod local;
mod log_entry;
mod options;
mod role;
mod state_machine;

pub use api::ClusterMember;
pub use api::Configuration;
pub use api::ConsensusError;
pub use api::ConsensusModule;
pub use api::LatestConfiguration;
pub use api::NodeRole;
pub use local::LocalConsensus;
pub use options::LocalConsensusOptions;
pub use role::RoleChangeListener;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineError;
pub use state_machine::StateMachineOutput;
pub use state_machine::StateMachineSnapshot;
