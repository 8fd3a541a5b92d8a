mod connection;
mod dispatcher;
mod error;
mod join;
mod server;
mod shutdown;

pub use dispatcher::CommandDispatcher;
pub use error::ServerError;
pub use join::join_cluster;
pub use server::Server;
pub use shutdown::shutdown_signal;
pub use shutdown::ShutdownHandle;
pub use shutdown::ShutdownSignal;
