use clap::Parser;
use raftcache::{
    CacheStateMachine, ClusterMember, CommandDispatcher, Configuration, ConsensusError, ConsensusModule,
    FileSnapshotStore, LocalConsensus, LocalConsensusOptions, MemoryCache, NodeArgs, NodeConfig, Server,
};
use std::convert::TryFrom;
use std::error::Error;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = NodeConfig::try_from(NodeArgs::parse())?;
    let logger = raftcache::create_root_logger(config.log_level, &config.node_id);
    slog::info!(logger, "Starting with {:?}", config);

    std::fs::create_dir_all(&config.volume_dir)?;

    let cache = Arc::new(match config.cache_max_entries {
        Some(capacity) => MemoryCache::with_capacity_limit(capacity),
        None => MemoryCache::new(),
    });
    let state_machine = CacheStateMachine::new(logger.new(slog::o!("Component" => "StateMachine")), cache.clone());
    let snapshots = FileSnapshotStore::open(
        logger.new(slog::o!("Component" => "Snapshots")),
        &config.volume_dir,
        config.snapshot_retain,
    )?;
    let consensus = LocalConsensus::start(
        logger.new(slog::o!("Component" => "Consensus")),
        config.node_id.clone(),
        LocalConsensusOptions {
            snapshot_threshold: Some(config.snapshot_threshold),
            ..Default::default()
        },
        &config.volume_dir,
        state_machine,
        snapshots,
    )
    .await?;

    let peer_listener = TcpListener::bind(config.raft_addr.as_str()).await?;
    consensus.serve_peers(peer_listener);

    spawn_role_logger(&logger, &consensus);
    match &config.leader_addr {
        None => bootstrap(&logger, &consensus, &config).await?,
        Some(leader_addr) => {
            slog::info!(logger, "Starting as a follower of an existing cluster");
            spawn_join(&logger, leader_addr.clone(), &config);
        }
    }

    let dispatcher = CommandDispatcher::new(
        logger.new(slog::o!("Component" => "Dispatcher")),
        cache,
        Arc::new(consensus),
        config.apply_timeout,
    );
    let server = Server::bind(
        logger.new(slog::o!("Component" => "Server")),
        config.listen_addr.as_str(),
        dispatcher,
        config.max_in_flight,
    )
    .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                slog::warn!(logger, "Failed to install Ctrl-C handler: {}", e);
            }
        })
        .await?;

    slog::info!(logger, "Exiting");
    Ok(())
}

async fn bootstrap(
    logger: &slog::Logger,
    consensus: &LocalConsensus,
    config: &NodeConfig,
) -> Result<(), ConsensusError> {
    let configuration = Configuration::new(vec![ClusterMember::new(&config.node_id, &config.raft_addr)]);

    match consensus.bootstrap_cluster(configuration).await {
        Ok(()) => {
            slog::info!(logger, "Bootstrapped single-node cluster as {}@{}", config.node_id, config.raft_addr);
            Ok(())
        }
        Err(ConsensusError::AlreadyBootstrapped) => {
            slog::info!(logger, "Cluster state already present, skipping bootstrap");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn spawn_join(logger: &slog::Logger, leader_addr: String, config: &NodeConfig) {
    let logger = logger.new(slog::o!("Component" => "Join"));
    let node_id = config.node_id.clone();
    let raft_addr = config.raft_addr.clone();
    let attempts = config.join_attempts;

    tokio::spawn(async move {
        if let Err(e) = raftcache::join_cluster(&logger, &leader_addr, &node_id, &raft_addr, attempts).await {
            slog::error!(logger, "{}", e);
        }
    });
}

fn spawn_role_logger(logger: &slog::Logger, consensus: &LocalConsensus) {
    let logger = logger.clone();
    let mut roles = consensus.role_listener();

    tokio::spawn(async move {
        while let Some(role) = roles.next().await {
            slog::info!(logger, "Node is now {}", role);
        }
    });
}
