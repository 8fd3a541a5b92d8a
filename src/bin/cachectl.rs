use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::future::join_all;
use raftcache::{CacheClient, ClientError};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

/// cachectl talks to a cache node over the client protocol.
#[derive(Parser, Debug)]
#[command(name = "cachectl", version, about, long_about = None)]
struct Cli {
    /// Client address of the node to talk to.
    #[arg(long, env = "CACHE_ADDR", default_value = "127.0.0.1:3000", global = true)]
    addr: String,

    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a key. Exits non-zero if it is missing.
    Get { key: String },
    /// Write a key through the leader.
    Set {
        key: String,
        value: String,
        /// Seconds until expiry. Zero never expires.
        #[arg(long, default_value_t = 0)]
        ttl: i32,
    },
    /// Ask the node (a leader) to add a voter.
    Join { node_id: String, raft_addr: String },
    /// Write `count` keys concurrently, then read every one of them back.
    Load {
        #[arg(long, default_value_t = 10)]
        count: usize,
        /// Connections used for each phase.
        #[arg(long, default_value_t = 4)]
        connections: usize,
        #[arg(long, default_value = "K_")]
        key_prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let logger = raftcache::create_cli_logger(raftcache::parse_log_level(&cli.log_level)?);

    match cli.command {
        Commands::Get { key } => {
            let client = CacheClient::connect(&cli.addr).await?;
            match client.get(key.clone()).await? {
                Some(value) => println!("{}", String::from_utf8_lossy(&value)),
                None => return Err(format!("key '{}' not found", key).into()),
            }
        }
        Commands::Set { key, value, ttl } => {
            let client = CacheClient::connect(&cli.addr).await?;
            client.set(key, value, ttl).await?;
            slog::info!(logger, "OK");
        }
        Commands::Join { node_id, raft_addr } => {
            let client = CacheClient::connect(&cli.addr).await?;
            client.join(&node_id, &raft_addr).await?;
            slog::info!(logger, "Joined {}@{}", node_id, raft_addr);
        }
        Commands::Load {
            count,
            connections,
            key_prefix,
        } => load(&logger, &cli.addr, count, connections.max(1), &key_prefix).await?,
    }

    Ok(())
}

async fn load(
    logger: &slog::Logger,
    addr: &str,
    count: usize,
    connections: usize,
    key_prefix: &str,
) -> Result<(), Box<dyn Error>> {
    let keys: Vec<(Bytes, Bytes)> = (0..count)
        .map(|i| {
            let key = Bytes::from(format!("{}{}", key_prefix, i));
            let value = Bytes::from(format!("V_{}", i));
            (key, value)
        })
        .collect();
    let keys = Arc::new(keys);

    let started = Instant::now();
    let results = join_all((0..connections).map(|worker| {
        let keys = keys.clone();
        async move {
            let client = CacheClient::connect(addr).await?;
            for (key, value) in keys.iter().skip(worker).step_by(connections) {
                client.set(key.clone(), value.clone(), 0).await?;
            }
            Ok::<_, ClientError>(())
        }
    }))
    .await;
    results.into_iter().collect::<Result<Vec<_>, _>>()?;
    slog::info!(logger, "Wrote {} keys in {:?}", count, started.elapsed());

    let started = Instant::now();
    let results = join_all((0..connections).map(|worker| {
        let keys = keys.clone();
        async move {
            let client = CacheClient::connect(addr).await?;
            let mut mismatched = Vec::new();
            for (key, value) in keys.iter().skip(worker).step_by(connections) {
                if client.get(key.clone()).await?.as_ref() != Some(value) {
                    mismatched.push(key.clone());
                }
            }
            Ok::<_, ClientError>(mismatched)
        }
    }))
    .await;

    let mut mismatched = Vec::new();
    for result in results {
        mismatched.extend(result?);
    }
    slog::info!(logger, "Read back {} keys in {:?}", count, started.elapsed());

    if !mismatched.is_empty() {
        for key in &mismatched {
            slog::error!(logger, "Key '{}' missing or wrong", String::from_utf8_lossy(key));
        }
        return Err(format!("{} of {} keys did not read back", mismatched.len(), count).into());
    }

    Ok(())
}
