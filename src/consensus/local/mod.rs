mod actor;
mod engine;
mod replicator;
mod rpc;
mod transport;

pub use actor::LocalConsensus;
