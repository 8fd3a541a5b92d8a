use crate::commitlog::{Index, Log};
use crate::consensus::local::rpc::{AppendEntriesInput, InstallSnapshotInput, PeerReply};
use crate::consensus::log_entry::{EntryKind, LogEntry, Term};
use crate::consensus::role::RoleChangeNotifier;
use crate::consensus::{
    ClusterMember, Configuration, ConsensusError, LatestConfiguration, NodeRole, StateMachine, StateMachineOutput,
    StateMachineSnapshot,
};
use crate::snapshot::{FileSnapshotStore, SnapshotMeta};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::{self, Write};

const MAX_BATCH_ENTRIES: usize = 256;
const MAX_BATCH_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub(super) struct AddVoterInput {
    pub id: String,
    pub address: String,
    pub prev_index: u64,
}

/// What a replicator sends next to a follower expecting entry `next`.
#[derive(Debug)]
pub(super) enum ReplicationBatch {
    Entries {
        request: AppendEntriesInput,
        /// Where the leader's log ends right now.
        leader_next: Index,
    },
    /// The entries were compacted away, the follower needs the newest snapshot.
    Snapshot { term: Term, leader_id: String },
}

/// SnapshotJob writes a captured state to the snapshot store. It blocks on disk I/O and runs off
/// the event loop.
pub(super) struct SnapshotJob {
    logger: slog::Logger,
    capture: Box<dyn StateMachineSnapshot>,
    store: FileSnapshotStore,
    term: Term,
    index: Index,
    configuration: Configuration,
    configuration_index: u64,
}

impl SnapshotJob {
    pub(super) fn run(mut self) -> Result<SnapshotMeta, ConsensusError> {
        let result = self.write();
        self.capture.release();
        result
    }

    fn write(&mut self) -> Result<SnapshotMeta, ConsensusError> {
        let mut sink = self.store.create(
            self.term.as_u64(),
            self.index.as_u64(),
            self.configuration.clone(),
            self.configuration_index,
        )?;

        match self.capture.persist(&mut sink) {
            Ok(()) => Ok(sink.close()?),
            Err(e) => {
                if let Err(cancel_err) = sink.cancel() {
                    slog::warn!(self.logger, "Failed to cancel snapshot: {}", cancel_err);
                }
                Err(ConsensusError::from(e))
            }
        }
    }
}

/// Writes a snapshot shipped by the leader into the local store. Blocks on disk I/O.
pub(super) fn write_received_snapshot(
    store: &FileSnapshotStore,
    input: &InstallSnapshotInput,
) -> Result<SnapshotMeta, ConsensusError> {
    let (term, index) = input.last_included;
    let mut sink = store.create(
        term.as_u64(),
        index.as_u64(),
        input.configuration.clone(),
        input.configuration_index,
    )?;
    sink.write_all(&input.data)?;
    Ok(sink.close()?)
}

/// Engine is the consensus core. It owns the log, the state machine and the snapshot store, and
/// is only ever driven by the actor's event loop.
///
/// Leadership is fixed: the first member of the configuration leads and there are no elections.
/// The leader commits an entry as soon as it is durable in its own log, so everything shipped
/// to a follower is already committed.
pub(super) struct Engine<L, S>
where
    L: Log<LogEntry>,
    S: StateMachine,
{
    logger: slog::Logger,
    node_id: String,

    log: L,
    state_machine: S,
    snapshots: FileSnapshotStore,
    snapshot_threshold: u64,

    role: NodeRole,
    role_notifier: RoleChangeNotifier,
    current_term: Term,
    leader_id: Option<String>,

    // Highest entry written locally, including one only covered by a snapshot.
    latest_entry: Option<(Term, Index)>,
    commit_index: Option<Index>,
    applied: Option<(Term, Index)>,
    last_snapshot: Option<(Term, Index)>,
    // Configuration stored with `last_snapshot`.
    snapshot_configuration: (Configuration, Option<Index>),

    configuration: Configuration,
    configuration_index: Option<Index>,
}

fn index_or_zero(index: Option<Index>) -> u64 {
    index.map(|i| i.as_u64()).unwrap_or(0)
}

fn decode_configuration(data: &[u8]) -> Result<Configuration, io::Error> {
    serde_json::from_slice(data).map_err(io::Error::from)
}

impl<L, S> Engine<L, S>
where
    L: Log<LogEntry>,
    S: StateMachine,
{
    /// start() builds the engine, restores the newest snapshot and replays the log after it.
    /// The node that leads the restored configuration resumes as leader in a new term.
    pub(super) fn start(
        logger: slog::Logger,
        node_id: String,
        log: L,
        state_machine: S,
        snapshots: FileSnapshotStore,
        snapshot_threshold: u64,
        role_notifier: RoleChangeNotifier,
    ) -> Result<Self, ConsensusError> {
        let mut engine = Engine {
            logger,
            node_id,
            log,
            state_machine,
            snapshots,
            snapshot_threshold,
            role: NodeRole::Follower,
            role_notifier,
            current_term: Term::new(0),
            leader_id: None,
            latest_entry: None,
            commit_index: None,
            applied: None,
            last_snapshot: None,
            snapshot_configuration: (Configuration::default(), None),
            configuration: Configuration::default(),
            configuration_index: None,
        };

        engine.restore_latest_snapshot()?;
        engine.replay_log()?;

        if engine.leads() {
            engine.current_term.incr();
            engine.become_leader();
        }

        Ok(engine)
    }

    fn restore_latest_snapshot(&mut self) -> Result<(), ConsensusError> {
        let (meta, state) = match self.snapshots.latest()? {
            Some(latest) => latest,
            None => return Ok(()),
        };
        let index = Index::from_u64(meta.index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("snapshot {} covers no log entries", meta.id),
            )
        })?;

        self.state_machine.restore(Box::new(state))?;

        let term = Term::new(meta.term);
        self.current_term = term;
        self.latest_entry = Some((term, index));
        self.commit_index = Some(index);
        self.applied = Some((term, index));
        self.last_snapshot = Some((term, index));
        self.configuration = meta.configuration;
        self.configuration_index = Index::from_u64(meta.configuration_index);
        self.snapshot_configuration = (self.configuration.clone(), self.configuration_index);
        self.log.compact(index)?;

        slog::info!(
            self.logger,
            "Restored snapshot {} (index {:?}, term {:?}, configuration {})",
            meta.id,
            index,
            term,
            self.configuration
        );
        Ok(())
    }

    /// Every entry in the log was committed before it was written here, so all of it is
    /// applied again.
    fn replay_log(&mut self) -> Result<(), ConsensusError> {
        let resume = self.log.first_index();
        let expected = self.last_snapshot.map(|(_, i)| i.plus(1)).unwrap_or_else(Index::start_index);
        if resume > expected {
            return Err(ConsensusError::Log(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("log starts at {:?} but the newest snapshot ends before {:?}", resume, expected),
            )));
        }

        let mut index = resume;
        while index < self.log.next_index() {
            let entry = self.read_entry(index)?;
            if entry.kind == EntryKind::Configuration {
                self.configuration = decode_configuration(&entry.data)?;
                self.configuration_index = Some(index);
            }
            self.current_term = self.current_term.max(entry.term);
            self.latest_entry = Some((entry.term, index));
            index = index.plus(1);
        }

        let last = match index.checked_minus(1) {
            Some(last) if last >= resume => last,
            _ => return Ok(()),
        };
        self.commit(last);
        self.apply_committed_entries(last)?;

        slog::info!(
            self.logger,
            "Replayed log entries [{:?}, {:?}], configuration {}",
            resume,
            last,
            self.configuration
        );
        Ok(())
    }

    pub(super) fn role(&self) -> NodeRole {
        self.role
    }

    pub(super) fn next_index(&self) -> Index {
        self.log.next_index()
    }

    /// Every voter other than this node.
    pub(super) fn peers(&self) -> Vec<ClusterMember> {
        self.configuration
            .members
            .iter()
            .filter(|m| m.id != self.node_id)
            .cloned()
            .collect()
    }

    pub(super) fn apply(&mut self, data: Bytes) -> Result<StateMachineOutput, ConsensusError> {
        self.ensure_leader()?;

        let index = self.append(EntryKind::Command, data)?;
        self.commit(index);
        self.apply_committed_entries(index)
    }

    pub(super) fn add_voter(&mut self, input: AddVoterInput) -> Result<(), ConsensusError> {
        self.ensure_leader()?;

        let latest = index_or_zero(self.configuration_index);
        if input.prev_index != 0 && input.prev_index != latest {
            return Err(ConsensusError::ConfigurationChanged {
                expected: input.prev_index,
                latest,
            });
        }
        if input.id.is_empty() {
            return Err(ConsensusError::InvalidConfiguration("member id must not be empty"));
        }

        if let Some(existing) = self.configuration.member(&input.id) {
            if existing.address == input.address {
                slog::debug!(self.logger, "{} is already a voter", existing);
                return Ok(());
            }
        }

        let member = ClusterMember::new(input.id, input.address);
        slog::info!(self.logger, "Adding voter {}", member);

        let mut configuration = self.configuration.clone();
        configuration.upsert(member);
        self.append_configuration(configuration)
    }

    pub(super) fn bootstrap(&mut self, configuration: Configuration) -> Result<(), ConsensusError> {
        if self.latest_entry.is_some() || !self.configuration.is_empty() {
            return Err(ConsensusError::AlreadyBootstrapped);
        }
        if configuration.is_empty() {
            return Err(ConsensusError::InvalidConfiguration("bootstrap configuration has no members"));
        }

        self.current_term = Term::new(1);
        self.append_configuration(configuration)?;
        slog::info!(self.logger, "Bootstrapped cluster with configuration {}", self.configuration);

        if self.leads() {
            self.become_leader();
        }

        Ok(())
    }

    pub(super) fn configuration(&self) -> LatestConfiguration {
        LatestConfiguration {
            configuration: self.configuration.clone(),
            index: index_or_zero(self.configuration_index),
        }
    }

    pub(super) fn stats(&self) -> BTreeMap<String, String> {
        let mut stats = BTreeMap::new();
        stats.insert("state".to_string(), self.role.to_string());
        stats.insert("term".to_string(), self.current_term.as_u64().to_string());
        stats.insert(
            "last_log_index".to_string(),
            index_or_zero(self.latest_entry.map(|(_, i)| i)).to_string(),
        );
        stats.insert(
            "last_log_term".to_string(),
            self.latest_entry.map(|(t, _)| t.as_u64()).unwrap_or(0).to_string(),
        );
        stats.insert("commit_index".to_string(), index_or_zero(self.commit_index).to_string());
        stats.insert(
            "applied_index".to_string(),
            index_or_zero(self.applied.map(|(_, i)| i)).to_string(),
        );
        stats.insert(
            "last_snapshot_index".to_string(),
            index_or_zero(self.last_snapshot.map(|(_, i)| i)).to_string(),
        );
        stats.insert(
            "last_snapshot_term".to_string(),
            self.last_snapshot.map(|(t, _)| t.as_u64()).unwrap_or(0).to_string(),
        );
        stats.insert("latest_configuration".to_string(), self.configuration.to_string());
        stats.insert(
            "latest_configuration_index".to_string(),
            index_or_zero(self.configuration_index).to_string(),
        );
        stats.insert("num_peers".to_string(), self.peers().len().to_string());
        stats.insert("leader".to_string(), self.leader_id.clone().unwrap_or_default());
        stats
    }

    /// Captures the applied state for a snapshot. `None` when nothing was applied since the
    /// last one.
    pub(super) fn begin_snapshot(&mut self) -> Result<Option<SnapshotJob>, ConsensusError> {
        let (term, index) = match self.applied {
            Some(applied) => applied,
            None => return Ok(None),
        };
        if matches!(self.last_snapshot, Some((_, last)) if last >= index) {
            return Ok(None);
        }

        let capture = self.state_machine.snapshot()?;
        slog::debug!(self.logger, "Captured state at {:?} for a snapshot", index);
        Ok(Some(SnapshotJob {
            logger: self.logger.clone(),
            capture,
            store: self.snapshots.clone(),
            term,
            index,
            configuration: self.configuration.clone(),
            configuration_index: index_or_zero(self.configuration_index),
        }))
    }

    /// Records a snapshot written by a `SnapshotJob` and compacts the log it covers.
    pub(super) fn finish_snapshot(&mut self, meta: &SnapshotMeta) {
        let index = match Index::from_u64(meta.index) {
            Some(index) => index,
            None => return,
        };
        if matches!(self.last_snapshot, Some((_, last)) if last >= index) {
            return;
        }

        self.last_snapshot = Some((Term::new(meta.term), index));
        self.snapshot_configuration = (
            meta.configuration.clone(),
            Index::from_u64(meta.configuration_index),
        );
        // A failed compaction only leaves extra entries behind. The next snapshot retries it.
        if let Err(e) = self.log.compact(index) {
            slog::error!(self.logger, "Failed to compact log through {:?}: {}", index, e);
        }
        slog::info!(self.logger, "Snapshot {} covers the log through {:?}", meta.id, index);
    }

    pub(super) fn snapshot_due(&self) -> bool {
        if self.snapshot_threshold == 0 {
            return false;
        }

        let applied = index_or_zero(self.applied.map(|(_, i)| i));
        let last_snapshot = index_or_zero(self.last_snapshot.map(|(_, i)| i));
        applied.saturating_sub(last_snapshot) >= self.snapshot_threshold
    }

    /// Builds the next request for a follower that expects entry `next`.
    pub(super) fn replication_batch(&self, next: Index) -> Result<ReplicationBatch, ConsensusError> {
        self.ensure_leader()?;

        if next < self.log.first_index() {
            return Ok(ReplicationBatch::Snapshot {
                term: self.current_term,
                leader_id: self.node_id.clone(),
            });
        }
        let next = next.min(self.log.next_index());

        let prev = match next.checked_minus(1) {
            None => None,
            Some(prev_index) => match self.term_at(prev_index)? {
                Some(prev_term) => Some((prev_term, prev_index)),
                None => {
                    return Ok(ReplicationBatch::Snapshot {
                        term: self.current_term,
                        leader_id: self.node_id.clone(),
                    })
                }
            },
        };

        let mut entries = Vec::new();
        let mut bytes = 0;
        let mut index = next;
        while index < self.log.next_index() && entries.len() < MAX_BATCH_ENTRIES && bytes < MAX_BATCH_BYTES {
            let entry = self.read_entry(index)?;
            bytes += entry.data.len();
            entries.push(entry);
            index = index.plus(1);
        }

        Ok(ReplicationBatch::Entries {
            request: AppendEntriesInput {
                term: self.current_term,
                leader_id: self.node_id.clone(),
                prev,
                leader_commit: self.commit_index,
                entries,
            },
            leader_next: self.log.next_index(),
        })
    }

    pub(super) fn append_entries(&mut self, input: AppendEntriesInput) -> Result<PeerReply, ConsensusError> {
        if !self.accept_leader(input.term, &input.leader_id) {
            return Ok(self.reply(false));
        }
        if let Some((prev_term, prev_index)) = input.prev {
            if !self.has_entry(prev_term, prev_index)? {
                slog::debug!(self.logger, "No entry {:?} of term {:?}, rejecting", prev_index, prev_term);
                return Ok(self.reply(false));
            }
        }

        let mut index = input.prev.map(|(_, i)| i.plus(1)).unwrap_or_else(Index::start_index);
        let mut last_new = input.prev.map(|(_, i)| i);
        for entry in input.entries {
            let covered = matches!(self.last_snapshot, Some((_, snapshot)) if index <= snapshot);
            if !covered {
                let matching = index < self.log.next_index() && self.term_at(index)? == Some(entry.term);
                if !matching {
                    if index < self.log.next_index() {
                        self.truncate_from(index)?;
                    }
                    let appended = self.append_entry(entry)?;
                    assert_eq!(appended, index, "follower log is out of step with the leader");
                }
            }

            last_new = Some(index);
            index = index.plus(1);
        }

        if let (Some(leader_commit), Some(last_new)) = (input.leader_commit, last_new) {
            let target = leader_commit.min(last_new);
            if self.commit_index.map_or(true, |current| target > current) {
                self.commit(target);
                self.apply_committed_entries(target)?;
            }
        }

        Ok(self.reply(true))
    }

    /// Answers an install request that needs no snapshot written, if any.
    pub(super) fn screen_snapshot(&mut self, input: &InstallSnapshotInput) -> Option<PeerReply> {
        if !self.accept_leader(input.term, &input.leader_id) {
            return Some(self.reply(false));
        }

        let (_, index) = input.last_included;
        if matches!(self.commit_index, Some(commit) if index <= commit) {
            return Some(self.reply(true));
        }
        None
    }

    /// Replaces the state machine and the log with a snapshot already written to the local store.
    pub(super) fn install_snapshot(
        &mut self,
        input: InstallSnapshotInput,
        meta: SnapshotMeta,
    ) -> Result<PeerReply, ConsensusError> {
        if let Some(reply) = self.screen_snapshot(&input) {
            return Ok(reply);
        }

        let (term, index) = input.last_included;
        self.state_machine.restore(Box::new(io::Cursor::new(input.data)))?;
        self.log.compact(index)?;
        self.log.truncate(index.plus(1))?;

        self.latest_entry = Some((term, index));
        self.commit_index = Some(index);
        self.applied = Some((term, index));
        self.last_snapshot = Some((term, index));
        self.configuration = input.configuration;
        self.configuration_index = Index::from_u64(input.configuration_index);
        self.snapshot_configuration = (self.configuration.clone(), self.configuration_index);

        slog::info!(
            self.logger,
            "Installed snapshot {} from {} (index {:?}, term {:?})",
            meta.id,
            input.leader_id,
            index,
            term
        );
        Ok(self.reply(true))
    }

    /// A follower answered with `term`. A newer one means this node is no longer leader.
    pub(super) fn observe_term(&mut self, term: Term) {
        if term > self.current_term {
            slog::warn!(self.logger, "Observed newer term {:?}, stepping down", term);
            self.current_term = term;
            self.leader_id = None;
            self.become_follower();
        }
    }

    fn accept_leader(&mut self, term: Term, leader_id: &str) -> bool {
        if term < self.current_term {
            slog::debug!(self.logger, "Rejecting {} from stale term {:?}", leader_id, term);
            return false;
        }
        if term > self.current_term {
            self.current_term = term;
            self.become_follower();
        } else if self.role == NodeRole::Leader {
            slog::warn!(self.logger, "{} claims to lead term {:?}, which this node leads", leader_id, term);
            return false;
        }

        if self.leader_id.as_deref() != Some(leader_id) {
            slog::info!(self.logger, "Following {} in term {:?}", leader_id, term);
            self.leader_id = Some(leader_id.to_string());
        }
        true
    }

    fn reply(&self, success: bool) -> PeerReply {
        PeerReply {
            term: self.current_term,
            success,
            last_index: index_or_zero(self.latest_entry.map(|(_, i)| i)),
        }
    }

    fn has_entry(&self, term: Term, index: Index) -> Result<bool, ConsensusError> {
        // Compacted entries were committed, and committed entries match the leader's.
        if matches!(self.last_snapshot, Some((_, snapshot)) if index <= snapshot) {
            return Ok(true);
        }
        Ok(self.term_at(index)? == Some(term))
    }

    /// Term of entry `index`. `None` once compacted past it or before it is written.
    fn term_at(&self, index: Index) -> Result<Option<Term>, ConsensusError> {
        if let Some((term, snapshot)) = self.last_snapshot {
            if index == snapshot {
                return Ok(Some(term));
            }
        }
        Ok(self.log.read(index)?.map(|entry| entry.term))
    }

    fn read_entry(&self, index: Index) -> Result<LogEntry, ConsensusError> {
        let entry = self.log.read(index)?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("log entry {:?} is missing", index))
        })?;
        Ok(entry)
    }

    /// Drops a conflicting tail starting at `index`. Committed entries never conflict.
    fn truncate_from(&mut self, index: Index) -> Result<(), ConsensusError> {
        if matches!(self.commit_index, Some(commit) if index <= commit) {
            return Err(ConsensusError::Log(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("leader conflicts with committed entry {:?}", index),
            )));
        }

        slog::info!(self.logger, "Truncating conflicting log entries from {:?}", index);
        self.log.truncate(index)?;

        let last = index.checked_minus(1);
        self.latest_entry = match last {
            Some(last) => self.term_at(last)?.map(|term| (term, last)),
            None => None,
        };
        if matches!(self.configuration_index, Some(config_index) if config_index >= index) {
            self.reload_configuration()?;
        }
        Ok(())
    }

    /// Falls back to the newest configuration still in the log, then the snapshot's.
    fn reload_configuration(&mut self) -> Result<(), ConsensusError> {
        let mut index = self.log.next_index();
        while let Some(previous) = index.checked_minus(1) {
            if previous < self.log.first_index() {
                break;
            }
            let entry = self.read_entry(previous)?;
            if entry.kind == EntryKind::Configuration {
                self.configuration = decode_configuration(&entry.data)?;
                self.configuration_index = Some(previous);
                return Ok(());
            }
            index = previous;
        }

        let (configuration, configuration_index) = self.snapshot_configuration.clone();
        self.configuration = configuration;
        self.configuration_index = configuration_index;
        Ok(())
    }

    fn leads(&self) -> bool {
        matches!(self.configuration.members.first(), Some(first) if first.id == self.node_id)
    }

    fn ensure_leader(&self) -> Result<(), ConsensusError> {
        if self.role == NodeRole::Leader {
            Ok(())
        } else {
            Err(ConsensusError::NotLeader)
        }
    }

    fn become_leader(&mut self) {
        slog::info!(self.logger, "Became leader for term {:?}", self.current_term);
        self.role = NodeRole::Leader;
        self.leader_id = Some(self.node_id.clone());
        self.role_notifier.notify_new_role(NodeRole::Leader);
    }

    fn become_follower(&mut self) {
        if self.role != NodeRole::Follower {
            slog::info!(self.logger, "Became follower in term {:?}", self.current_term);
            self.role = NodeRole::Follower;
            self.role_notifier.notify_new_role(NodeRole::Follower);
        }
    }

    fn append(&mut self, kind: EntryKind, data: Bytes) -> Result<Index, ConsensusError> {
        let term = self.current_term;
        let index = self.log.append(LogEntry { term, kind, data })?;
        // Only update state after log action completes.
        self.latest_entry = Some((term, index));

        Ok(index)
    }

    /// Appends an entry received from the leader. Configurations take effect once written.
    fn append_entry(&mut self, entry: LogEntry) -> Result<Index, ConsensusError> {
        let term = entry.term;
        let configuration = match entry.kind {
            EntryKind::Configuration => Some(decode_configuration(&entry.data)?),
            EntryKind::Command => None,
        };

        let index = self.log.append(entry)?;
        self.latest_entry = Some((term, index));
        if let Some(configuration) = configuration {
            slog::info!(self.logger, "Configuration {} at {:?}", configuration, index);
            self.configuration = configuration;
            self.configuration_index = Some(index);
        }

        Ok(index)
    }

    fn append_configuration(&mut self, configuration: Configuration) -> Result<(), ConsensusError> {
        let data = serde_json::to_vec(&configuration).map_err(io::Error::from)?;
        let index = self.append(EntryKind::Configuration, Bytes::from(data))?;

        // Configurations take effect as soon as they are written.
        self.configuration = configuration;
        self.configuration_index = Some(index);
        self.commit(index);
        self.apply_committed_entries(index)?;

        Ok(())
    }

    fn commit(&mut self, index: Index) {
        // Assert we only ratchet commit index forward.
        if let Some(current) = self.commit_index {
            assert!(
                index > current,
                "Can't ratchet commit index backwards. Expected [input] {:?} > {:?} [current]",
                index,
                current,
            );
        }

        self.commit_index = Some(index);
    }

    /// Applies every committed but unapplied entry in order. Returns the state machine's output
    /// for `wanted`.
    fn apply_committed_entries(&mut self, wanted: Index) -> Result<StateMachineOutput, ConsensusError> {
        let mut wanted_output = StateMachineOutput::NoData;
        let commit_index = match self.commit_index {
            Some(commit_index) => commit_index,
            None => return Ok(wanted_output),
        };

        let mut next = self.applied.map(|(_, i)| i.plus(1)).unwrap_or_else(Index::start_index);
        while next <= commit_index {
            let entry = self.read_entry(next)?;

            if entry.kind == EntryKind::Command {
                let output = self.state_machine.apply_committed_entry(entry.data);
                if next == wanted {
                    wanted_output = output;
                }
            }

            self.applied = Some((entry.term, next));
            next = next.plus(1);
        }

        Ok(wanted_output)
    }
}
