mod client;
mod error;

pub use client::CacheClient;
pub use error::ClientError;
