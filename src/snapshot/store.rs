use crate::consensus::Configuration;
use crate::snapshot::{SnapshotError, SnapshotMeta};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const SNAPSHOT_DIR: &str = "snapshots";
const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

/// FileSnapshotStore keeps snapshots under `<volume>/snapshots/<id>/`, each a `meta.json` and a
/// `state.bin`. Only the newest `retain` snapshots survive a successful write.
///
/// Disk access is synchronous. Callers are the consensus actor, which already owns the only
/// writer.
#[derive(Clone)]
pub struct FileSnapshotStore {
    logger: slog::Logger,
    directory: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    pub fn open(logger: slog::Logger, volume_dir: impl AsRef<Path>, retain: usize) -> Result<Self, SnapshotError> {
        let directory = volume_dir.as_ref().join(SNAPSHOT_DIR);
        fs::create_dir_all(&directory)?;

        // Leftovers of a write that never closed.
        for entry in fs::read_dir(&directory)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
                slog::warn!(logger, "Removing incomplete snapshot {:?}", entry.path());
                fs::remove_dir_all(entry.path())?;
            }
        }

        Ok(FileSnapshotStore {
            logger,
            directory,
            retain,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// create() starts a new snapshot. Nothing is visible to `list()` until the sink is closed.
    pub fn create(
        &self,
        term: u64,
        index: u64,
        configuration: Configuration,
        configuration_index: u64,
    ) -> Result<FileSnapshotSink, SnapshotError> {
        let meta = SnapshotMeta::new(term, index, configuration, configuration_index);
        let tmp_dir = self.directory.join(format!("{}{}", meta.id, TMP_SUFFIX));
        fs::create_dir_all(&tmp_dir)?;
        let file = File::create(tmp_dir.join(STATE_FILE))?;

        slog::debug!(self.logger, "Creating snapshot {}", meta.id);
        Ok(FileSnapshotSink {
            store: self.clone(),
            meta,
            tmp_dir,
            writer: Some(BufWriter::new(file)),
            finished: false,
        })
    }

    /// Completed snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotMeta>, SnapshotError> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || entry.file_name().to_string_lossy().ends_with(TMP_SUFFIX) {
                continue;
            }

            match read_meta(&entry.path()) {
                Ok(meta) => snapshots.push(meta),
                Err(e) => slog::warn!(self.logger, "Skipping unreadable snapshot {:?}: {}", entry.path(), e),
            }
        }

        snapshots.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
        Ok(snapshots)
    }

    pub fn open_snapshot(&self, id: &str) -> Result<(SnapshotMeta, File), SnapshotError> {
        let dir = self.directory.join(id);
        if !dir.is_dir() {
            return Err(SnapshotError::NotFound(id.to_string()));
        }

        let meta = read_meta(&dir)?;
        let state = File::open(dir.join(STATE_FILE))?;
        Ok((meta, state))
    }

    pub fn latest(&self) -> Result<Option<(SnapshotMeta, File)>, SnapshotError> {
        match self.list()?.first() {
            Some(meta) => self.open_snapshot(&meta.id).map(Some),
            None => Ok(None),
        }
    }

    fn reap(&self) -> Result<(), SnapshotError> {
        for meta in self.list()?.iter().skip(self.retain) {
            slog::info!(self.logger, "Reaping snapshot {}", meta.id);
            fs::remove_dir_all(self.directory.join(&meta.id))?;
        }

        Ok(())
    }
}

fn read_meta(dir: &Path) -> Result<SnapshotMeta, SnapshotError> {
    let bytes = fs::read(dir.join(META_FILE))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// FileSnapshotSink receives the state of one snapshot. Either `close()` or `cancel()` it;
/// dropping it unfinished behaves like `cancel()`.
pub struct FileSnapshotSink {
    store: FileSnapshotStore,
    meta: SnapshotMeta,
    tmp_dir: PathBuf,
    writer: Option<BufWriter<File>>,
    finished: bool,
}

impl FileSnapshotSink {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// close() makes the snapshot durable and visible, then reaps old snapshots.
    pub fn close(mut self) -> Result<SnapshotMeta, SnapshotError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::write(self.tmp_dir.join(META_FILE), serde_json::to_vec_pretty(&self.meta)?)?;
        fs::rename(&self.tmp_dir, self.store.directory.join(&self.meta.id))?;
        self.finished = true;

        slog::info!(
            self.store.logger,
            "Wrote snapshot {} ({} bytes, index {}, term {})",
            self.meta.id,
            self.meta.size,
            self.meta.index,
            self.meta.term
        );

        if let Err(e) = self.store.reap() {
            slog::warn!(self.store.logger, "Failed to reap old snapshots: {}", e);
        }

        Ok(self.meta.clone())
    }

    pub fn cancel(mut self) -> Result<(), SnapshotError> {
        self.writer.take();
        self.finished = true;
        slog::info!(self.store.logger, "Cancelled snapshot {}", self.meta.id);
        fs::remove_dir_all(&self.tmp_dir)?;
        Ok(())
    }
}

impl Write for FileSnapshotSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "snapshot sink is closed"))?;
        let written = writer.write(buf)?;
        self.meta.size += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for FileSnapshotSink {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.take();
            let _ = fs::remove_dir_all(&self.tmp_dir);
        }
    }
}
