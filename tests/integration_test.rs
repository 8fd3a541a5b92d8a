use bytes::{BufMut, Bytes, BytesMut};
use raftcache::{
    CacheClient, CacheStateMachine, ClientError, ClusterMember, Command, CommandDispatcher, Configuration,
    ConsensusError, ConsensusModule, FileSnapshotStore, GetResult, LocalConsensus, LocalConsensusOptions, MemoryCache,
    NodeRole, Server, ServerError, SetResult, ShutdownHandle, Status,
};
use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn set_then_get() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;

    client.set("Foo", "Bar", 0).await?;
    assert_eq!(client.get("Foo").await?, Some(Bytes::from_static(b"Bar")));

    client.set("Foo", "Baz", 0).await?;
    assert_eq!(client.get("Foo").await?, Some(Bytes::from_static(b"Baz")));

    node.stop().await
}

#[tokio::test]
async fn get_missing_key_is_not_found() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let mut stream = TcpStream::connect(node.addr).await?;

    stream.write_all(&Command::Get { key: "missing".into() }.to_bytes()).await?;
    let result = GetResult::read_from(&mut stream).await?;

    assert_eq!(result, GetResult::not_found());
    node.stop().await
}

#[tokio::test]
async fn entries_expire_after_ttl() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;

    client.set("short", "lived", 1).await?;
    assert!(client.get("short").await?.is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(client.get("short").await?, None);

    node.stop().await
}

#[tokio::test]
async fn follower_rejects_writes_but_serves_reads() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::follower("node-2"), volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;

    assert_rejected(client.set("Foo", "Bar", 0).await);
    assert_rejected(client.join("node-3", "127.0.0.1:1113").await);
    assert_eq!(client.get("Foo").await?, None);

    node.stop().await
}

#[tokio::test]
async fn capacity_errors_reach_the_client() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let mut setup = NodeSetup::leader("node-1");
    setup.cache_max_entries = Some(1);
    let node = TestNode::start(setup, volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;

    client.set("a", "1", 0).await?;
    assert_rejected(client.set("b", "2", 0).await);
    client.set("a", "updated", 0).await?;

    assert_eq!(client.get("a").await?, Some(Bytes::from_static(b"updated")));
    assert_eq!(client.get("b").await?, None);
    node.stop().await
}

#[tokio::test]
async fn concurrent_clients() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;

    let mut handles = Vec::new();
    for worker in 0..8 {
        let addr = node.addr;
        handles.push(tokio::spawn(async move {
            let client = CacheClient::connect(addr).await?;
            for i in 0..25 {
                client.set(format!("K_{}_{}", worker, i), format!("V_{}_{}", worker, i), 0).await?;
            }
            Ok::<_, ClientError>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let client = CacheClient::connect(node.addr).await?;
    for worker in 0..8 {
        for i in 0..25 {
            let value = client.get(format!("K_{}_{}", worker, i)).await?;
            assert_eq!(value, Some(Bytes::from(format!("V_{}_{}", worker, i))));
        }
    }

    node.stop().await
}

#[tokio::test]
async fn pipelined_commands_on_one_connection() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let mut stream = TcpStream::connect(node.addr).await?;
    let count = 20;

    let mut frames = BytesMut::new();
    for i in 0..count {
        let command = Command::Set {
            key: Bytes::from(format!("K_{:02}", i)),
            value: Bytes::from(format!("V_{:02}", i)),
            ttl: 0,
        };
        command.encode(&mut frames);
    }
    stream.write_all(&frames).await?;
    for _ in 0..count {
        assert_eq!(SetResult::read_from(&mut stream).await?, SetResult::ok());
    }

    // Same-shaped responses, so completion order doesn't matter for parsing.
    let mut frames = BytesMut::new();
    for i in 0..count {
        Command::Get {
            key: Bytes::from(format!("K_{:02}", i)),
        }
        .encode(&mut frames);
    }
    stream.write_all(&frames).await?;
    let mut values = Vec::new();
    for _ in 0..count {
        let result = GetResult::read_from(&mut stream).await?;
        assert_eq!(result.status, Status::Ok);
        values.push(result.value);
    }
    values.sort();
    let expected: Vec<Bytes> = (0..count).map(|i| Bytes::from(format!("V_{:02}", i))).collect();
    assert_eq!(values, expected);

    node.stop().await
}

#[tokio::test]
async fn unknown_command_closes_connection() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let mut stream = TcpStream::connect(node.addr).await?;

    stream.write_all(&[9, 0, 0, 0, 0]).await?;
    assert_closed_without_reply(&mut stream).await?;

    // The server keeps serving other connections.
    let client = CacheClient::connect(node.addr).await?;
    client.set("still", "up", 0).await?;
    node.stop().await
}

#[tokio::test]
async fn negative_length_closes_connection() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let mut stream = TcpStream::connect(node.addr).await?;

    let mut frame = BytesMut::new();
    frame.put_u8(2);
    frame.put_i32_le(-1);
    stream.write_all(&frame).await?;
    assert_closed_without_reply(&mut stream).await?;

    node.stop().await
}

#[tokio::test]
async fn truncated_frame_closes_connection() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let mut stream = TcpStream::connect(node.addr).await?;

    let frame = Command::Set {
        key: "Foo".into(),
        value: "Bar".into(),
        ttl: 0,
    }
    .to_bytes();
    stream.write_all(&frame[..frame.len() - 2]).await?;
    stream.shutdown().await?;
    assert_closed_without_reply(&mut stream).await?;

    let client = CacheClient::connect(node.addr).await?;
    assert_eq!(client.get("Foo").await?, None);
    node.stop().await
}

#[tokio::test]
async fn join_adds_voter_once() -> Result<(), Box<dyn Error>> {
    let leader_volume = tempfile::tempdir()?;
    let follower_volume = tempfile::tempdir()?;
    let leader = TestNode::start(NodeSetup::leader("node-1"), leader_volume.path()).await?;
    let follower = TestNode::start(NodeSetup::follower("node-2"), follower_volume.path()).await?;
    let logger = test_logger();
    let leader_addr = leader.addr.to_string();

    raftcache::join_cluster(&logger, &leader_addr, "node-2", &follower.raft_addr, 3).await?;
    // A retry after a lost response must not add a second entry.
    raftcache::join_cluster(&logger, &leader_addr, "node-2", &follower.raft_addr, 3).await?;

    let latest = leader.consensus.configuration().await?;
    assert_eq!(
        latest.configuration.members,
        vec![
            ClusterMember::new("node-1", leader.raft_addr.as_str()),
            ClusterMember::new("node-2", follower.raft_addr.as_str()),
        ]
    );
    assert_eq!(latest.index, 2);
    assert_eq!(follower.consensus.state(), NodeRole::Follower);

    // Joining through the follower fails after the configured attempts.
    let result = raftcache::join_cluster(&logger, &follower.addr.to_string(), "node-3", "127.0.0.1:1113", 2).await;
    assert!(matches!(
        result,
        Err(ServerError::JoinFailed {
            attempts: 2,
            last_error: ClientError::Rejected { status: Status::Error },
            ..
        })
    ));

    leader.stop().await?;
    follower.stop().await
}

#[tokio::test]
async fn joined_follower_receives_writes() -> Result<(), Box<dyn Error>> {
    let leader_volume = tempfile::tempdir()?;
    let follower_volume = tempfile::tempdir()?;
    let leader = TestNode::start(NodeSetup::leader("node-1"), leader_volume.path()).await?;
    let follower = TestNode::start(NodeSetup::follower("node-2"), follower_volume.path()).await?;

    let leader_client = CacheClient::connect(leader.addr).await?;
    leader_client.set("before", "join", 0).await?;
    raftcache::join_cluster(&test_logger(), &leader.addr.to_string(), "node-2", &follower.raft_addr, 3).await?;
    leader_client.set("Foo", "Bar", 0).await?;

    let follower_client = CacheClient::connect(follower.addr).await?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while follower_client.get("Foo").await?.is_none() {
        assert!(tokio::time::Instant::now() < deadline, "follower never saw the write");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(follower_client.get("Foo").await?, Some(Bytes::from_static(b"Bar")));
    assert_eq!(follower_client.get("before").await?, Some(Bytes::from_static(b"join")));

    // Writes still only go through the leader.
    assert_rejected(follower_client.set("Foo", "Baz", 0).await);
    assert_eq!(follower.consensus.state(), NodeRole::Follower);

    drop(leader_client);
    drop(follower_client);
    leader.stop().await?;
    follower.stop().await
}

#[tokio::test]
async fn restart_without_snapshot_keeps_writes() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;

    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;
    client.set("Foo", "Bar", 0).await?;
    drop(client);
    node.stop().await?;
    assert!(FileSnapshotStore::open(test_logger(), volume.path(), RETAIN)?.list()?.is_empty());

    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    assert_eq!(node.consensus.state(), NodeRole::Leader);
    let client = CacheClient::connect(node.addr).await?;
    assert_eq!(client.get("Foo").await?, Some(Bytes::from_static(b"Bar")));

    client.set("Foo", "Baz", 0).await?;
    assert_eq!(client.get("Foo").await?, Some(Bytes::from_static(b"Baz")));
    drop(client);
    node.stop().await
}

#[tokio::test]
async fn restart_restores_latest_snapshot() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;

    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;
    client.set("kept", "forever", 0).await?;
    client.set("ttl", "for a while", 3600).await?;
    client.set("kept", "overwritten", 0).await?;
    let meta = node.consensus.snapshot().await?.ok_or("nothing to snapshot")?;
    assert_eq!(meta.index, 4);
    drop(client);
    node.stop().await?;

    let node = TestNode::start(NodeSetup::leader("node-1"), volume.path()).await?;
    assert_eq!(node.consensus.state(), NodeRole::Leader);

    let client = CacheClient::connect(node.addr).await?;
    assert_eq!(client.get("kept").await?, Some(Bytes::from_static(b"overwritten")));
    assert_eq!(client.get("ttl").await?, Some(Bytes::from_static(b"for a while")));

    // Writes keep working after the restore.
    client.set("after", "restart", 0).await?;
    assert_eq!(client.get("after").await?, Some(Bytes::from_static(b"restart")));

    let stats = node.consensus.stats().await?;
    assert_eq!(stats.get("last_snapshot_index").map(String::as_str), Some("4"));
    node.stop().await
}

#[tokio::test]
async fn automatic_snapshots_respect_retention() -> Result<(), Box<dyn Error>> {
    let volume = tempfile::tempdir()?;
    let mut setup = NodeSetup::leader("node-1");
    setup.snapshot_threshold = 5;
    let node = TestNode::start(setup, volume.path()).await?;
    let client = CacheClient::connect(node.addr).await?;

    for i in 0..30 {
        client.set(format!("K_{}", i), format!("V_{}", i), 0).await?;
    }

    // Snapshots are written in the background.
    let store = FileSnapshotStore::open(test_logger(), volume.path(), RETAIN)?;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let snapshots = loop {
        let snapshots = store.list()?;
        if snapshots.len() == RETAIN {
            break snapshots;
        }
        assert!(tokio::time::Instant::now() < deadline, "found {} snapshots", snapshots.len());
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert!(snapshots[0].index > snapshots[1].index);

    drop(client);
    node.stop().await
}

const RETAIN: usize = 2;

struct NodeSetup {
    node_id: &'static str,
    bootstrap: bool,
    snapshot_threshold: u64,
    cache_max_entries: Option<usize>,
}

impl NodeSetup {
    fn leader(node_id: &'static str) -> Self {
        NodeSetup {
            node_id,
            bootstrap: true,
            snapshot_threshold: 0,
            cache_max_entries: None,
        }
    }

    fn follower(node_id: &'static str) -> Self {
        NodeSetup {
            bootstrap: false,
            ..Self::leader(node_id)
        }
    }
}

struct TestNode {
    addr: SocketAddr,
    raft_addr: String,
    consensus: LocalConsensus,
    shutdown: ShutdownHandle,
    server: JoinHandle<Result<(), ServerError>>,
}

impl TestNode {
    async fn start(setup: NodeSetup, volume: &Path) -> Result<Self, Box<dyn Error>> {
        let logger = test_logger();
        let cache = Arc::new(match setup.cache_max_entries {
            Some(capacity) => MemoryCache::with_capacity_limit(capacity),
            None => MemoryCache::new(),
        });
        let consensus = LocalConsensus::start(
            logger.clone(),
            setup.node_id,
            LocalConsensusOptions {
                snapshot_threshold: Some(setup.snapshot_threshold),
                heartbeat_interval: Some(Duration::from_millis(100)),
                ..Default::default()
            },
            volume,
            CacheStateMachine::new(logger.clone(), cache.clone()),
            FileSnapshotStore::open(logger.clone(), volume, RETAIN)?,
        )
        .await?;

        let peer_listener = TcpListener::bind("127.0.0.1:0").await?;
        let raft_addr = peer_listener.local_addr()?.to_string();
        consensus.serve_peers(peer_listener);

        if setup.bootstrap {
            let configuration = Configuration::new(vec![ClusterMember::new(setup.node_id, raft_addr.as_str())]);
            match consensus.bootstrap_cluster(configuration).await {
                Ok(()) | Err(ConsensusError::AlreadyBootstrapped) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let dispatcher = CommandDispatcher::new(
            logger.clone(),
            cache,
            Arc::new(consensus.clone()),
            Duration::from_millis(500),
        );
        let server = Server::bind(logger, "127.0.0.1:0", dispatcher, 16).await?;
        let addr = server.local_addr()?;
        let (shutdown, signal) = raftcache::shutdown_signal();
        let server = tokio::spawn(server.run_until(signal));

        Ok(TestNode {
            addr,
            raft_addr,
            consensus,
            shutdown,
            server,
        })
    }

    async fn stop(self) -> Result<(), Box<dyn Error>> {
        self.shutdown.shutdown();
        timeout(Duration::from_secs(5), self.server).await???;
        Ok(())
    }
}

fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

fn assert_rejected(result: Result<(), ClientError>) {
    match result {
        Err(ClientError::Rejected { status: Status::Error }) => {}
        other => panic!("expected an Error status, got {:?}", other),
    }
}

async fn assert_closed_without_reply(stream: &mut TcpStream) -> Result<(), Box<dyn Error>> {
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await?;

    match read {
        Ok(0) => Ok(()),
        Ok(n) => Err(format!("server replied with {} bytes before closing", n).into()),
        // A reset also means the server hung up.
        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(()),
        Err(e) => Err(e.into()),
    }
}
