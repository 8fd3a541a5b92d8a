use crate::commitlog::{Index, Log, SegmentedDiskLog, StorageConfig};
use crate::consensus::local::engine::{self, AddVoterInput, Engine, ReplicationBatch};
use crate::consensus::local::replicator::{self, ReplicatorHandle};
use crate::consensus::local::rpc::{AppendEntriesInput, InstallSnapshotInput, PeerReply};
use crate::consensus::local::transport;
use crate::consensus::log_entry::{LogEntry, Term};
use crate::consensus::options::LocalConsensusOptionsValidated;
use crate::consensus::{
    role, Configuration, ConsensusError, ConsensusModule, LatestConfiguration, LocalConsensusOptions, NodeRole,
    RoleChangeListener, StateMachine, StateMachineOutput,
};
use crate::snapshot::{FileSnapshotStore, SnapshotMeta};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::convert::TryFrom;
use std::error::Error;
use std::fmt::Debug;
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

const LOG_DIR: &str = "log";

// Disk writes of the log happen inside the event loop. Snapshots are written on the blocking
// pool and report back with an event.
#[derive(Debug)]
enum Event {
    // Leader: append, commit, apply, respond with the state machine's output.
    // Otherwise: reject.
    Apply(Bytes, Callback<StateMachineOutput, ConsensusError>),

    // Leader: append a configuration entry unless the member is already present.
    // Otherwise: reject.
    AddVoter(AddVoterInput, Callback<(), ConsensusError>),

    GetConfiguration(Callback<LatestConfiguration, ConsensusError>),

    Stats(Callback<BTreeMap<String, String>, ConsensusError>),

    // Empty node only.
    Bootstrap(Configuration, Callback<(), ConsensusError>),

    Snapshot(Callback<Option<SnapshotMeta>, ConsensusError>),

    // Leader: entries (or a snapshot marker) for a follower expecting the given index.
    ReplicationBatch(Index, Callback<ReplicationBatch, ConsensusError>),

    // A follower answered with a newer term.
    ObservedTerm(Term),

    AppendEntries(AppendEntriesInput, Callback<PeerReply, ConsensusError>),

    InstallSnapshot(InstallSnapshotInput, Callback<PeerReply, ConsensusError>),

    // A leader's snapshot finished writing to the local store.
    SnapshotReceived(
        InstallSnapshotInput,
        Result<SnapshotMeta, ConsensusError>,
        Callback<PeerReply, ConsensusError>,
    ),

    // A local snapshot job finished.
    SnapshotWritten(Result<SnapshotMeta, ConsensusError>),
}

#[derive(Debug)]
struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    fn send(self, message: Result<O, E>) {
        // The caller may have timed out and gone away.
        let _ = self.0.send(message);
    }
}

async fn call<O>(
    sender: &mpsc::Sender<Event>,
    event: Event,
    rx: oneshot::Receiver<Result<O, ConsensusError>>,
) -> Result<O, ConsensusError> {
    sender.send(event).await.map_err(|_| ConsensusError::Shutdown)?;
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(ConsensusError::Shutdown),
    }
}

/// LocalConsensus is the handle to a consensus engine running as an actor on the tokio runtime.
/// Clones share the same engine, which stops once every handle is dropped.
#[derive(Clone)]
pub struct LocalConsensus {
    logger: slog::Logger,
    sender: mpsc::Sender<Event>,
    weak: WeakConsensus,
    role: RoleChangeListener,
}

impl LocalConsensus {
    /// start() opens the log under `<volume_dir>/log`, restores the newest snapshot from
    /// `snapshots` into `state_machine`, replays the log after it, then spawns the event loop.
    /// A failed restore is returned and nothing is spawned.
    pub async fn start<S: StateMachine>(
        logger: slog::Logger,
        node_id: impl Into<String>,
        options: LocalConsensusOptions,
        volume_dir: impl AsRef<Path>,
        state_machine: S,
        snapshots: FileSnapshotStore,
    ) -> Result<Self, ConsensusError> {
        let options = LocalConsensusOptionsValidated::try_from(options).map_err(ConsensusError::InvalidOptions)?;
        let (role_notifier, role_listener) = role::new(NodeRole::Follower);
        let log_config = StorageConfig {
            directory: volume_dir.as_ref().join(LOG_DIR),
            segment_bytes: options.log_segment_bytes,
        };

        let engine = {
            let logger = logger.clone();
            let node_id = node_id.into();
            let snapshots = snapshots.clone();
            let snapshot_threshold = options.snapshot_threshold;
            tokio::task::spawn_blocking(move || -> Result<_, ConsensusError> {
                let log_logger = logger.new(slog::o!("Component" => "Log"));
                let log = SegmentedDiskLog::<LogEntry>::open(log_logger, log_config)?;
                Engine::start(
                    logger,
                    node_id,
                    log,
                    state_machine,
                    snapshots,
                    snapshot_threshold,
                    role_notifier,
                )
            })
            .await??
        };
        slog::info!(logger, "Consensus engine started as {}", engine.role());

        let (tx, rx) = mpsc::channel(options.event_buffer);
        let weak = WeakConsensus {
            sender: tx.downgrade(),
        };
        let (progress, _) = watch::channel(engine.next_index().as_u64());
        let mut actor = ConsensusActor {
            logger: logger.clone(),
            receiver: rx,
            engine,
            weak: weak.clone(),
            snapshots,
            snapshot_state: SnapshotState::Idle,
            queued_snapshots: VecDeque::new(),
            replicators: HashMap::new(),
            progress,
            heartbeat: options.heartbeat_interval,
        };
        actor.reconcile_replicators();
        tokio::spawn(actor.run_event_loop());

        Ok(LocalConsensus {
            logger,
            sender: tx,
            weak,
            role: role_listener,
        })
    }

    pub fn role_listener(&self) -> RoleChangeListener {
        self.role.clone()
    }

    /// Answers the leader's replication requests arriving on `listener` until the engine stops.
    pub fn serve_peers(&self, listener: TcpListener) -> JoinHandle<()> {
        tokio::spawn(transport::serve_peers(
            self.logger.new(slog::o!("Component" => "Peers")),
            listener,
            self.weak.clone(),
            self.role.clone(),
        ))
    }

    /// Takes a snapshot now. `None` when nothing was applied since the last one.
    pub async fn snapshot(&self) -> Result<Option<SnapshotMeta>, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Snapshot(Callback(tx)), rx, Duration::ZERO).await
    }

    async fn call<O>(
        &self,
        event: Event,
        rx: oneshot::Receiver<Result<O, ConsensusError>>,
        timeout: Duration,
    ) -> Result<O, ConsensusError> {
        let request = call(&self.sender, event, rx);

        if timeout.is_zero() {
            request.await
        } else {
            match tokio::time::timeout(timeout, request).await {
                Ok(result) => result,
                Err(_) => Err(ConsensusError::Timeout),
            }
        }
    }
}

#[async_trait::async_trait]
impl ConsensusModule for LocalConsensus {
    async fn apply(&self, entry: Bytes, timeout: Duration) -> Result<StateMachineOutput, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Apply(entry, Callback(tx)), rx, timeout).await
    }

    async fn add_voter(
        &self,
        id: String,
        address: String,
        prev_index: u64,
        timeout: Duration,
    ) -> Result<(), ConsensusError> {
        let input = AddVoterInput {
            id,
            address,
            prev_index,
        };
        let (tx, rx) = oneshot::channel();
        self.call(Event::AddVoter(input, Callback(tx)), rx, timeout).await
    }

    async fn configuration(&self) -> Result<LatestConfiguration, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::GetConfiguration(Callback(tx)), rx, Duration::ZERO).await
    }

    fn state(&self) -> NodeRole {
        self.role.current()
    }

    async fn stats(&self) -> Result<BTreeMap<String, String>, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Stats(Callback(tx)), rx, Duration::ZERO).await
    }

    async fn bootstrap_cluster(&self, configuration: Configuration) -> Result<(), ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.call(Event::Bootstrap(configuration, Callback(tx)), rx, Duration::ZERO)
            .await
    }
}

/// WeakConsensus reaches the actor without keeping it alive. Peer connections, replicators and
/// background jobs hold one.
#[derive(Clone)]
pub(super) struct WeakConsensus {
    sender: mpsc::WeakSender<Event>,
}

impl WeakConsensus {
    #[cfg(test)]
    pub(super) fn detached() -> Self {
        let (sender, _) = mpsc::channel(1);
        WeakConsensus {
            sender: sender.downgrade(),
        }
    }

    async fn notify(&self, event: Event) {
        if let Some(sender) = self.sender.upgrade() {
            let _ = sender.send(event).await;
        }
    }

    async fn request<O>(
        &self,
        event: Event,
        rx: oneshot::Receiver<Result<O, ConsensusError>>,
    ) -> Result<O, ConsensusError> {
        let sender = self.sender.upgrade().ok_or(ConsensusError::Shutdown)?;
        call(&sender, event, rx).await
    }

    pub(super) async fn append_entries(&self, input: AppendEntriesInput) -> Result<PeerReply, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.request(Event::AppendEntries(input, Callback(tx)), rx).await
    }

    pub(super) async fn install_snapshot(&self, input: InstallSnapshotInput) -> Result<PeerReply, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.request(Event::InstallSnapshot(input, Callback(tx)), rx).await
    }

    pub(super) async fn replication_batch(&self, next: Index) -> Result<ReplicationBatch, ConsensusError> {
        let (tx, rx) = oneshot::channel();
        self.request(Event::ReplicationBatch(next, Callback(tx)), rx).await
    }

    pub(super) async fn observed_term(&self, term: Term) {
        self.notify(Event::ObservedTerm(term)).await
    }
}

enum SnapshotState {
    Idle,
    // Holds the manual request being served, if any.
    Running(Option<Callback<Option<SnapshotMeta>, ConsensusError>>),
}

/// ConsensusActor is the engine in actor model.
struct ConsensusActor<L, S>
where
    L: Log<LogEntry>,
    S: StateMachine,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    engine: Engine<L, S>,
    weak: WeakConsensus,
    snapshots: FileSnapshotStore,

    snapshot_state: SnapshotState,
    queued_snapshots: VecDeque<Callback<Option<SnapshotMeta>, ConsensusError>>,

    // Keyed by member id. Only populated while leader.
    replicators: HashMap<String, ReplicatorHandle>,
    progress: watch::Sender<u64>,
    heartbeat: Duration,
}

impl<L, S> ConsensusActor<L, S>
where
    L: Log<LogEntry>,
    S: StateMachine,
{
    async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
            self.after_event();
        }

        slog::info!(self.logger, "Consensus event loop stopped, all handles dropped");
    }

    // This must NOT be async. Everything the engine does completes before the next event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Apply(data, callback) => {
                callback.send(self.engine.apply(data));
            }
            Event::AddVoter(input, callback) => {
                callback.send(self.engine.add_voter(input));
            }
            Event::GetConfiguration(callback) => {
                callback.send(Ok(self.engine.configuration()));
            }
            Event::Stats(callback) => {
                callback.send(Ok(self.engine.stats()));
            }
            Event::Bootstrap(configuration, callback) => {
                callback.send(self.engine.bootstrap(configuration));
            }
            Event::Snapshot(callback) => match self.snapshot_state {
                SnapshotState::Idle => self.start_snapshot(Some(callback)),
                SnapshotState::Running(_) => self.queued_snapshots.push_back(callback),
            },
            Event::ReplicationBatch(next, callback) => {
                callback.send(self.engine.replication_batch(next));
            }
            Event::ObservedTerm(term) => {
                self.engine.observe_term(term);
            }
            Event::AppendEntries(input, callback) => {
                callback.send(self.engine.append_entries(input));
            }
            Event::InstallSnapshot(input, callback) => match self.engine.screen_snapshot(&input) {
                Some(reply) => callback.send(Ok(reply)),
                None => self.write_received_snapshot(input, callback),
            },
            Event::SnapshotReceived(input, result, callback) => {
                callback.send(result.and_then(|meta| self.engine.install_snapshot(input, meta)));
            }
            Event::SnapshotWritten(result) => self.snapshot_written(result),
        }
    }

    fn after_event(&mut self) {
        if matches!(self.snapshot_state, SnapshotState::Idle) && self.engine.snapshot_due() {
            self.start_snapshot(None);
        }
        self.reconcile_replicators();

        let next = self.engine.next_index().as_u64();
        self.progress.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Keeps one replicator per peer while leader, and none otherwise.
    fn reconcile_replicators(&mut self) {
        let peers = match self.engine.role() {
            NodeRole::Leader => self.engine.peers(),
            _ => Vec::new(),
        };

        let logger = &self.logger;
        self.replicators.retain(|id, handle| {
            let keep = peers.iter().any(|p| &p.id == id && p.address == handle.address);
            if !keep {
                slog::info!(logger, "Stopping replication to {}", id);
            }
            keep
        });

        for peer in peers {
            if self.replicators.contains_key(&peer.id) {
                continue;
            }
            let handle = replicator::spawn(
                self.logger.new(slog::o!("Peer" => peer.id.clone())),
                peer.clone(),
                self.weak.clone(),
                self.snapshots.clone(),
                self.progress.subscribe(),
                self.engine.next_index(),
                self.heartbeat,
            );
            self.replicators.insert(peer.id, handle);
        }
    }

    fn start_snapshot(&mut self, callback: Option<Callback<Option<SnapshotMeta>, ConsensusError>>) {
        let job = match self.engine.begin_snapshot() {
            Ok(Some(job)) => job,
            Ok(None) => {
                if let Some(callback) = callback {
                    callback.send(Ok(None));
                }
                return;
            }
            Err(e) => {
                match callback {
                    Some(callback) => callback.send(Err(e)),
                    None => slog::error!(self.logger, "Automatic snapshot failed: {}", e),
                }
                return;
            }
        };

        let weak = self.weak.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(result) => result,
                Err(e) => Err(ConsensusError::from(e)),
            };
            weak.notify(Event::SnapshotWritten(result)).await;
        });
        self.snapshot_state = SnapshotState::Running(callback);
    }

    fn snapshot_written(&mut self, result: Result<SnapshotMeta, ConsensusError>) {
        let callback = match std::mem::replace(&mut self.snapshot_state, SnapshotState::Idle) {
            SnapshotState::Running(callback) => callback,
            SnapshotState::Idle => None,
        };

        let result = match result {
            Ok(meta) => {
                self.engine.finish_snapshot(&meta);
                Ok(Some(meta))
            }
            Err(e) => {
                // The entries are already applied. A failed snapshot is retried later.
                slog::error!(self.logger, "Snapshot failed: {}", e);
                Err(e)
            }
        };
        if let Some(callback) = callback {
            callback.send(result);
        }

        while matches!(self.snapshot_state, SnapshotState::Idle) {
            match self.queued_snapshots.pop_front() {
                Some(callback) => self.start_snapshot(Some(callback)),
                None => break,
            }
        }
    }

    fn write_received_snapshot(&mut self, input: InstallSnapshotInput, callback: Callback<PeerReply, ConsensusError>) {
        let snapshots = self.snapshots.clone();
        let weak = self.weak.clone();

        tokio::spawn(async move {
            let written = tokio::task::spawn_blocking(move || {
                let result = engine::write_received_snapshot(&snapshots, &input);
                (input, result)
            })
            .await;

            match written {
                Ok((input, result)) => weak.notify(Event::SnapshotReceived(input, result, callback)).await,
                Err(e) => callback.send(Err(ConsensusError::from(e))),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{ClusterMember, StateMachineError, StateMachineSnapshot};
    use std::io::{Read, Write};
    use std::sync::mpsc::{self as std_mpsc, Receiver};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    // Echoes every entry back and remembers it. Snapshots are the entries joined by newlines.
    #[derive(Clone, Default)]
    struct EchoStateMachine {
        applied: Arc<Mutex<Vec<Bytes>>>,
        // When set, the next snapshot blocks in persist until a message arrives.
        persist_gate: Arc<Mutex<Option<Receiver<()>>>>,
    }

    struct EchoSnapshot {
        entries: Vec<Bytes>,
        gate: Option<Receiver<()>>,
    }

    impl StateMachineSnapshot for EchoSnapshot {
        fn persist(&mut self, sink: &mut dyn Write) -> Result<(), StateMachineError> {
            if let Some(gate) = self.gate.take() {
                let _ = gate.recv();
            }
            for entry in &self.entries {
                sink.write_all(entry)?;
                sink.write_all(b"\n")?;
            }
            Ok(())
        }
    }

    impl StateMachine for EchoStateMachine {
        fn apply_committed_entry(&mut self, entry: Bytes) -> StateMachineOutput {
            self.applied.lock().unwrap().push(entry.clone());
            StateMachineOutput::Data(entry)
        }

        fn snapshot(&mut self) -> Result<Box<dyn StateMachineSnapshot>, StateMachineError> {
            Ok(Box::new(EchoSnapshot {
                entries: self.applied.lock().unwrap().clone(),
                gate: self.persist_gate.lock().unwrap().take(),
            }))
        }

        fn restore(&mut self, mut source: Box<dyn Read + Send>) -> Result<(), StateMachineError> {
            let mut contents = Vec::new();
            source.read_to_end(&mut contents)?;

            let mut applied = self.applied.lock().unwrap();
            applied.clear();
            for line in contents.split(|b| *b == b'\n').filter(|line| !line.is_empty()) {
                applied.push(Bytes::copy_from_slice(line));
            }
            Ok(())
        }
    }

    impl EchoStateMachine {
        fn entries(&self) -> Vec<Bytes> {
            self.applied.lock().unwrap().clone()
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    async fn start_node(
        volume: &Path,
        node_id: &str,
        snapshot_threshold: u64,
    ) -> (LocalConsensus, EchoStateMachine, FileSnapshotStore) {
        let state_machine = EchoStateMachine::default();
        let snapshots = FileSnapshotStore::open(logger(), volume, 2).unwrap();
        let options = LocalConsensusOptions {
            snapshot_threshold: Some(snapshot_threshold),
            log_segment_bytes: Some(256),
            heartbeat_interval: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let consensus = LocalConsensus::start(
            logger(),
            node_id,
            options,
            volume,
            state_machine.clone(),
            snapshots.clone(),
        )
        .await
        .unwrap();
        (consensus, state_machine, snapshots)
    }

    async fn start(volume: &Path, snapshot_threshold: u64) -> (LocalConsensus, EchoStateMachine, FileSnapshotStore) {
        start_node(volume, "node-1", snapshot_threshold).await
    }

    fn self_configuration() -> Configuration {
        Configuration::new(vec![ClusterMember::new("node-1", "127.0.0.1:1111")])
    }

    async fn bootstrapped(volume: &Path) -> (LocalConsensus, EchoStateMachine) {
        let (consensus, state_machine, _) = start(volume, 0).await;
        consensus.bootstrap_cluster(self_configuration()).await.unwrap();
        (consensus, state_machine)
    }

    async fn start_follower(volume: &Path, snapshot_threshold: u64) -> (LocalConsensus, EchoStateMachine, String) {
        let (consensus, state_machine, _) = start_node(volume, "node-2", snapshot_threshold).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        consensus.serve_peers(listener);
        (consensus, state_machine, address)
    }

    async fn eventually<F: FnMut() -> bool>(mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn bytes(entries: &[&'static str]) -> Vec<Bytes> {
        entries.iter().map(|e| Bytes::from_static(e.as_bytes())).collect()
    }

    #[tokio::test]
    async fn test_follower_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, state_machine, _) = start(dir.path(), 0).await;

        assert_eq!(consensus.state(), NodeRole::Follower);
        let result = consensus.apply(Bytes::from_static(b"a"), Duration::from_millis(500)).await;
        assert!(matches!(result, Err(ConsensusError::NotLeader)));
        let result = consensus
            .add_voter("node-2".into(), "127.0.0.1:2222".into(), 0, Duration::ZERO)
            .await;
        assert!(matches!(result, Err(ConsensusError::NotLeader)));
        assert!(state_machine.entries().is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_then_apply() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, state_machine) = bootstrapped(dir.path()).await;

        assert_eq!(consensus.state(), NodeRole::Leader);
        let latest = consensus.configuration().await.unwrap();
        assert_eq!(latest.configuration, self_configuration());
        assert_eq!(latest.index, 1);

        let output = consensus
            .apply(Bytes::from_static(b"a"), Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(output, StateMachineOutput::Data(Bytes::from_static(b"a")));

        // Configuration entries never reach the state machine.
        assert_eq!(state_machine.entries(), bytes(&["a"]));
    }

    #[tokio::test]
    async fn test_bootstrap_rules() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _, _) = start(dir.path(), 0).await;

        let result = consensus.bootstrap_cluster(Configuration::default()).await;
        assert!(matches!(result, Err(ConsensusError::InvalidConfiguration(_))));

        consensus.bootstrap_cluster(self_configuration()).await.unwrap();
        let result = consensus.bootstrap_cluster(self_configuration()).await;
        assert!(matches!(result, Err(ConsensusError::AlreadyBootstrapped)));
    }

    #[tokio::test]
    async fn test_only_the_first_member_leads() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _, _) = start(dir.path(), 0).await;

        let other = Configuration::new(vec![
            ClusterMember::new("node-9", "127.0.0.1:9999"),
            ClusterMember::new("node-1", "127.0.0.1:1111"),
        ]);
        consensus.bootstrap_cluster(other).await.unwrap();
        assert_eq!(consensus.state(), NodeRole::Follower);
    }

    #[tokio::test]
    async fn test_add_voter_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _) = bootstrapped(dir.path()).await;

        for _ in 0..2 {
            consensus
                .add_voter("node-2".into(), "127.0.0.1:2222".into(), 0, Duration::ZERO)
                .await
                .unwrap();
        }
        let latest = consensus.configuration().await.unwrap();
        assert_eq!(latest.configuration.members.len(), 2);
        assert_eq!(latest.index, 2);

        // New address for the same id updates in place.
        consensus
            .add_voter("node-2".into(), "127.0.0.1:3333".into(), 2, Duration::ZERO)
            .await
            .unwrap();
        let latest = consensus.configuration().await.unwrap();
        assert_eq!(latest.configuration.members.len(), 2);
        assert_eq!(latest.configuration.member("node-2").unwrap().address, "127.0.0.1:3333");
        assert_eq!(latest.index, 3);
    }

    #[tokio::test]
    async fn test_add_voter_stale_prev_index() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _) = bootstrapped(dir.path()).await;

        let result = consensus
            .add_voter("node-2".into(), "127.0.0.1:2222".into(), 7, Duration::ZERO)
            .await;
        assert!(matches!(
            result,
            Err(ConsensusError::ConfigurationChanged { expected: 7, latest: 1 })
        ));
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _) = bootstrapped(dir.path()).await;
        consensus
            .add_voter("node-2".into(), "127.0.0.1:2222".into(), 0, Duration::ZERO)
            .await
            .unwrap();
        consensus.apply(Bytes::from_static(b"a"), Duration::ZERO).await.unwrap();

        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["state"], "Leader");
        assert_eq!(stats["term"], "1");
        assert_eq!(stats["leader"], "node-1");
        assert_eq!(stats["last_log_index"], "3");
        assert_eq!(stats["last_log_term"], "1");
        assert_eq!(stats["commit_index"], "3");
        assert_eq!(stats["applied_index"], "3");
        assert_eq!(stats["last_snapshot_index"], "0");
        assert_eq!(stats["last_snapshot_term"], "0");
        assert_eq!(stats["latest_configuration_index"], "2");
        assert_eq!(
            stats["latest_configuration"],
            "[node-1@127.0.0.1:1111 node-2@127.0.0.1:2222]"
        );
        assert_eq!(stats["num_peers"], "1");
    }

    #[tokio::test]
    async fn test_manual_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, _) = bootstrapped(dir.path()).await;

        consensus.apply(Bytes::from_static(b"a"), Duration::ZERO).await.unwrap();
        let meta = consensus.snapshot().await.unwrap().expect("snapshot taken");
        assert_eq!(meta.index, 2);
        assert_eq!(meta.term, 1);
        assert_eq!(meta.configuration, self_configuration());

        // Nothing new since.
        assert!(consensus.snapshot().await.unwrap().is_none());
        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["last_snapshot_index"], "2");
    }

    #[tokio::test]
    async fn test_apply_continues_while_snapshot_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let (consensus, state_machine) = bootstrapped(dir.path()).await;
        let (release, gate) = std_mpsc::channel();
        *state_machine.persist_gate.lock().unwrap() = Some(gate);

        let snapshot = tokio::spawn({
            let consensus = consensus.clone();
            async move { consensus.snapshot().await }
        });
        eventually(|| state_machine.persist_gate.lock().unwrap().is_none()).await;

        // The snapshot is stuck writing, yet the actor still commits.
        let output = consensus.apply(Bytes::from_static(b"a"), Duration::from_secs(2)).await.unwrap();
        assert_eq!(output, StateMachineOutput::Data(Bytes::from_static(b"a")));
        assert!(!snapshot.is_finished());

        release.send(()).unwrap();
        let meta = snapshot.await.unwrap().unwrap().expect("snapshot taken");
        assert_eq!(meta.index, 1);
        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["last_snapshot_index"], "1");
    }

    #[tokio::test]
    async fn test_automatic_snapshot_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (consensus, _, snapshots) = start(dir.path(), 3).await;
            consensus.bootstrap_cluster(self_configuration()).await.unwrap();
            for entry in ["a", "b", "c"] {
                consensus.apply(Bytes::from(entry), Duration::ZERO).await.unwrap();
            }

            // Bootstrap entry plus two commands reach the threshold of three. The snapshot is
            // written in the background.
            eventually(|| !snapshots.list().unwrap().is_empty()).await;
            let listed = snapshots.list().unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].index, 3);
        }

        let (consensus, state_machine, _) = start(dir.path(), 3).await;
        assert_eq!(consensus.state(), NodeRole::Leader);
        // Restored from the snapshot, then replayed from the log.
        assert_eq!(state_machine.entries(), bytes(&["a", "b", "c"]));

        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["term"], "2");
        assert_eq!(stats["applied_index"], "4");
        assert_eq!(stats["last_snapshot_index"], "3");

        let result = consensus.bootstrap_cluster(self_configuration()).await;
        assert!(matches!(result, Err(ConsensusError::AlreadyBootstrapped)));

        consensus.apply(Bytes::from_static(b"d"), Duration::ZERO).await.unwrap();
        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["last_log_index"], "5");
        assert_eq!(stats["last_log_term"], "2");
    }

    #[tokio::test]
    async fn test_restart_without_snapshot_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (consensus, _) = bootstrapped(dir.path()).await;
            for entry in ["a", "b"] {
                consensus.apply(Bytes::from(entry), Duration::ZERO).await.unwrap();
            }
        }

        let (consensus, state_machine, snapshots) = start(dir.path(), 0).await;
        assert!(snapshots.list().unwrap().is_empty());
        assert_eq!(consensus.state(), NodeRole::Leader);
        assert_eq!(state_machine.entries(), bytes(&["a", "b"]));
        assert_eq!(consensus.configuration().await.unwrap().configuration, self_configuration());

        let stats = consensus.stats().await.unwrap();
        assert_eq!(stats["applied_index"], "3");
        assert_eq!(stats["term"], "2");
    }

    #[tokio::test]
    async fn test_follower_receives_entries() {
        let leader_dir = tempfile::tempdir().unwrap();
        let follower_dir = tempfile::tempdir().unwrap();
        let (leader, _) = bootstrapped(leader_dir.path()).await;
        let (follower, follower_state, address) = start_follower(follower_dir.path(), 0).await;

        leader.apply(Bytes::from_static(b"a"), Duration::ZERO).await.unwrap();
        leader
            .add_voter("node-2".into(), address.clone(), 0, Duration::ZERO)
            .await
            .unwrap();
        leader.apply(Bytes::from_static(b"b"), Duration::ZERO).await.unwrap();

        eventually(|| follower_state.entries() == bytes(&["a", "b"])).await;
        assert_eq!(follower.state(), NodeRole::Follower);

        let latest = follower.configuration().await.unwrap();
        assert_eq!(latest.index, 3);
        assert_eq!(latest.configuration.member("node-2").unwrap().address, address);

        let stats = follower.stats().await.unwrap();
        assert_eq!(stats["leader"], "node-1");
        assert_eq!(stats["commit_index"], "4");

        let result = follower.apply(Bytes::from_static(b"c"), Duration::ZERO).await;
        assert!(matches!(result, Err(ConsensusError::NotLeader)));
    }

    #[tokio::test]
    async fn test_lagging_follower_gets_snapshot() {
        let leader_dir = tempfile::tempdir().unwrap();
        let follower_dir = tempfile::tempdir().unwrap();
        let (leader, _, _) = start(leader_dir.path(), 2).await;
        leader.bootstrap_cluster(self_configuration()).await.unwrap();
        for entry in ["a", "b", "c"] {
            leader.apply(Bytes::from(entry), Duration::ZERO).await.unwrap();
        }

        // Wait until the log is compacted through the last command.
        let mut last_snapshot = String::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while last_snapshot != "4" {
            assert!(Instant::now() < deadline, "leader never snapshotted index 4");
            tokio::time::sleep(Duration::from_millis(20)).await;
            last_snapshot = leader.stats().await.unwrap()["last_snapshot_index"].clone();
        }

        let (follower, follower_state, address) = start_follower(follower_dir.path(), 0).await;
        leader.add_voter("node-2".into(), address, 0, Duration::ZERO).await.unwrap();

        eventually(|| follower_state.entries() == bytes(&["a", "b", "c"])).await;
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let stats = follower.stats().await.unwrap();
            if stats["applied_index"] == "5" {
                assert_eq!(stats["last_snapshot_index"], "4");
                break;
            }
            assert!(Instant::now() < deadline, "follower never applied the join");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
