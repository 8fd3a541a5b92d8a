use crate::commitlog::{Entry, Index, Log};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::mem;
use std::path::{Path, PathBuf};

// Based on https://thehoard.blog/how-kafkas-storage-internals-work-3a29b02e026
//
// Bytes:
// 0    : crc
// 1    : crc
// 2    : crc
// 3    : crc
// 4    : version
// 5    : attributes
// 6    : timestamp
// 7    : timestamp
// 8    : timestamp
// 9    : timestamp
// 10   : timestamp
// 11   : timestamp
// 12   : timestamp
// 13   : timestamp
// 14   : data size
// 15   : data size
// 16   : data size
// 17   : data size
// V0   : data
// ...
// Vn   : data
//
// Integers are little endian. The crc covers every byte after it. Attributes are always zero.
const RECORD_FORMAT_VERSION: u8 = 1;
const RECORD_HEADER_LEN: usize = 4 + 1 + 1 + 8 + 4;
const SEGMENT_SUFFIX: &str = ".log";

/// Generic config for initializing any type of disk-based commit log, independent of data
/// model and algorithm.
pub struct StorageConfig {
    pub directory: PathBuf,
    /// A segment stops taking appends once it holds at least this many bytes.
    pub segment_bytes: u64,
}

/// SegmentedDiskLog keeps entries in segment files named after the index of their first entry.
/// Every append is synced to disk before it returns.
///
/// Opening the log cuts a torn or corrupt tail off the newest segment; damage anywhere else is
/// an error. Compaction only deletes whole segments, so a reopened log can start before the
/// index it was last compacted to. Owners compact again after restoring their snapshot.
pub struct SegmentedDiskLog<E: Entry> {
    logger: slog::Logger,
    directory: PathBuf,
    segment_bytes: u64,

    // Oldest first. Each one ends where the next begins.
    sealed: Vec<Segment>,
    active: Segment,
    first_index: Index,
    _pd: PhantomData<E>,
}

impl<E: Entry> SegmentedDiskLog<E> {
    pub fn open(logger: slog::Logger, config: StorageConfig) -> Result<Self, io::Error> {
        let directory = config.directory;
        fs::create_dir_all(&directory)?;

        let mut bases = Vec::new();
        for dir_entry in fs::read_dir(&directory)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let base = name
                .to_string_lossy()
                .strip_suffix(SEGMENT_SUFFIX)
                .and_then(|base| base.parse::<u64>().ok())
                .and_then(Index::from_u64);
            match base {
                Some(base) => bases.push(base),
                None => slog::warn!(logger, "Ignoring {:?} in the log directory", dir_entry.path()),
            }
        }
        bases.sort();

        let mut segments: Vec<Segment> = Vec::with_capacity(bases.len());
        let newest = bases.len();
        for (position, base) in bases.into_iter().enumerate() {
            let (mut segment, damage) = Segment::open(segment_path(&directory, base), base)?;
            if let Some(e) = damage {
                if position + 1 < newest {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("log segment {:?} is damaged at byte {}: {}", segment.path, segment.len, e),
                    ));
                }
                slog::warn!(
                    logger,
                    "Cutting the tail off {:?} at byte {}: {}",
                    segment.path,
                    segment.len,
                    e
                );
                segment.file.set_len(segment.len)?;
                segment.file.sync_all()?;
            }

            if let Some(previous) = segments.last() {
                if previous.next_index() != segment.base {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!(
                            "log segment {:?} starts at {:?} but the one before it ends at {:?}",
                            segment.path,
                            segment.base,
                            previous.next_index()
                        ),
                    ));
                }
            }
            segments.push(segment);
        }

        let active = match segments.pop() {
            Some(active) => active,
            None => Segment::create(&directory, Index::start_index())?,
        };
        let first_index = segments.first().map(|s| s.base).unwrap_or(active.base);
        slog::info!(
            logger,
            "Opened log in {:?}: {} segments, entries [{:?}, {:?})",
            directory,
            segments.len() + 1,
            first_index,
            active.next_index()
        );

        Ok(SegmentedDiskLog {
            logger,
            directory,
            segment_bytes: config.segment_bytes,
            sealed: segments,
            active,
            first_index,
            _pd: PhantomData,
        })
    }

    fn segment_for(&self, index: Index) -> Option<&Segment> {
        if index >= self.active.base {
            return Some(&self.active);
        }
        let position = self.sealed.partition_point(|s| s.base <= index);
        position.checked_sub(1).map(|p| &self.sealed[p])
    }

    fn roll(&mut self) -> Result<(), io::Error> {
        let fresh = Segment::create(&self.directory, self.active.next_index())?;
        slog::debug!(self.logger, "Rolled log to a new segment at {:?}", fresh.base);
        let sealed = mem::replace(&mut self.active, fresh);
        self.sealed.push(sealed);
        Ok(())
    }
}

impl<E: Entry> Log<E> for SegmentedDiskLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let record = encode_record(&entry.into())?;
        if self.active.len >= self.segment_bytes && !self.active.offsets.is_empty() {
            self.roll()?;
        }

        self.active.append(&record)
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        if index < self.first_index || index >= self.next_index() {
            return Ok(None);
        }

        match self.segment_for(index) {
            Some(segment) => E::try_from(segment.read(index)?).map(Some),
            None => Ok(None),
        }
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if index >= self.next_index() {
            return Ok(());
        }
        let index = index.max(self.first_index);

        while self.active.base >= index {
            match self.sealed.pop() {
                Some(previous) => {
                    let dropped = mem::replace(&mut self.active, previous);
                    fs::remove_file(&dropped.path)?;
                }
                None => break,
            }
        }
        self.active.truncate(index)?;

        slog::debug!(self.logger, "Truncated log from {:?}", index);
        Ok(())
    }

    fn compact(&mut self, index: Index) -> Result<(), io::Error> {
        if index < self.first_index {
            return Ok(());
        }
        let resume = index.plus(1);

        if resume >= self.next_index() {
            // Nothing survives. The active segment is reused only if it already starts at `resume`.
            if self.active.base != resume {
                let fresh = Segment::create(&self.directory, resume)?;
                let dropped = mem::replace(&mut self.active, fresh);
                fs::remove_file(&dropped.path)?;
            }
            for segment in self.sealed.drain(..) {
                fs::remove_file(&segment.path)?;
            }
        } else {
            let keep_from = self.sealed.partition_point(|s| s.next_index() <= resume);
            for segment in self.sealed.drain(..keep_from) {
                fs::remove_file(&segment.path)?;
            }
        }

        self.first_index = resume;
        slog::debug!(self.logger, "Compacted log through {:?}", index);
        Ok(())
    }

    fn next_index(&self) -> Index {
        self.active.next_index()
    }

    fn first_index(&self) -> Index {
        self.first_index
    }
}

struct Segment {
    base: Index,
    path: PathBuf,
    file: File,
    // Byte offset of the record for entry `base + i`.
    offsets: Vec<u64>,
    // Bytes of intact records.
    len: u64,
}

fn segment_path(directory: &Path, base: Index) -> PathBuf {
    directory.join(format!("{:020}{}", base.as_u64(), SEGMENT_SUFFIX))
}

impl Segment {
    fn create(directory: &Path, base: Index) -> Result<Self, io::Error> {
        let path = segment_path(directory, base);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.sync_all()?;

        Ok(Segment {
            base,
            path,
            file,
            offsets: Vec::new(),
            len: 0,
        })
    }

    /// Scans every record. Returns what stopped the scan early, with `len` at the last intact
    /// record boundary.
    fn open(path: PathBuf, base: Index) -> Result<(Self, Option<io::Error>), io::Error> {
        let bytes = fs::read(&path)?;
        let mut offsets = Vec::new();
        let mut position = 0;
        let mut damage = None;
        while position < bytes.len() {
            match check_record(&bytes[position..]) {
                Ok(size) => {
                    offsets.push(position as u64);
                    position += RECORD_HEADER_LEN + size;
                }
                Err(e) => {
                    damage = Some(e);
                    break;
                }
            }
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let segment = Segment {
            base,
            path,
            file,
            offsets,
            len: position as u64,
        };
        Ok((segment, damage))
    }

    fn next_index(&self) -> Index {
        self.base.plus(self.offsets.len() as u64)
    }

    fn append(&mut self, record: &[u8]) -> Result<Index, io::Error> {
        self.file.seek(SeekFrom::Start(self.len))?;
        self.file.write_all(record)?;
        self.file.sync_data()?;

        // Only update state after the write is durable.
        let index = self.next_index();
        self.offsets.push(self.len);
        self.len += record.len() as u64;
        Ok(index)
    }

    fn read(&self, index: Index) -> Result<Vec<u8>, io::Error> {
        let offset = (index.as_u64() - self.base.as_u64()) as usize;
        let position = self.offsets[offset];

        let mut file = &self.file;
        file.seek(SeekFrom::Start(position))?;
        let mut record = vec![0u8; RECORD_HEADER_LEN];
        file.read_exact(&mut record)?;
        let size = data_size(&record);
        record.resize(RECORD_HEADER_LEN + size, 0);
        file.read_exact(&mut record[RECORD_HEADER_LEN..])?;

        check_record(&record)?;
        Ok(record.split_off(RECORD_HEADER_LEN))
    }

    fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        let keep = index.as_u64().saturating_sub(self.base.as_u64()) as usize;
        if keep >= self.offsets.len() {
            return Ok(());
        }

        let len = self.offsets[keep];
        self.file.set_len(len)?;
        self.file.sync_all()?;
        self.offsets.truncate(keep);
        self.len = len;
        Ok(())
    }
}

fn encode_record(data: &[u8]) -> Result<Vec<u8>, io::Error> {
    let size = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "log entry is larger than 4 GiB"))?;

    let mut record = Vec::with_capacity(RECORD_HEADER_LEN + data.len());
    record.extend_from_slice(&[0; 4]);
    record.push(RECORD_FORMAT_VERSION);
    record.push(0);
    record.extend_from_slice(&Utc::now().timestamp_millis().to_le_bytes());
    record.extend_from_slice(&size.to_le_bytes());
    record.extend_from_slice(data);

    let crc = crc32fast::hash(&record[4..]);
    record[..4].copy_from_slice(&crc.to_le_bytes());
    Ok(record)
}

fn data_size(header: &[u8]) -> usize {
    let mut size = [0u8; 4];
    size.copy_from_slice(&header[14..RECORD_HEADER_LEN]);
    u32::from_le_bytes(size) as usize
}

/// Validates the record at the start of `bytes` and returns the size of its data.
fn check_record(bytes: &[u8]) -> Result<usize, io::Error> {
    if bytes.len() < RECORD_HEADER_LEN {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "record header is cut short"));
    }
    let size = data_size(bytes);
    let end = RECORD_HEADER_LEN + size;
    if bytes.len() < end {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "record data is cut short"));
    }

    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[..4]);
    let computed = crc32fast::hash(&bytes[4..end]);
    if u32::from_le_bytes(stored) != computed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("crc mismatch: stored {}, computed {}", u32::from_le_bytes(stored), computed),
        ));
    }
    if bytes[4] != RECORD_FORMAT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown record version {}", bytes[4]),
        ));
    }

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEntry(u8);

    impl Entry for TestEntry {}

    impl TryFrom<Vec<u8>> for TestEntry {
        type Error = io::Error;

        fn try_from(bytes: Vec<u8>) -> Result<Self, io::Error> {
            match bytes.as_slice() {
                [b] => Ok(TestEntry(*b)),
                _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad test entry")),
            }
        }
    }

    impl From<TestEntry> for Vec<u8> {
        fn from(entry: TestEntry) -> Self {
            vec![entry.0]
        }
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    // One byte of data makes every record the same size.
    const RECORD_LEN: u64 = RECORD_HEADER_LEN as u64 + 1;

    fn open(dir: &Path, segment_bytes: u64) -> SegmentedDiskLog<TestEntry> {
        let config = StorageConfig {
            directory: dir.to_path_buf(),
            segment_bytes,
        };
        SegmentedDiskLog::open(logger(), config).unwrap()
    }

    fn log_with(dir: &Path, segment_bytes: u64, n: u8) -> SegmentedDiskLog<TestEntry> {
        let mut log = open(dir, segment_bytes);
        for i in 1..=n {
            log.append(TestEntry(i)).unwrap();
        }
        log
    }

    fn segment_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path(), 1024);
        assert_eq!(log.next_index(), Index::start_index());
        assert_eq!(log.read(Index::new(1)).unwrap(), None);

        assert_eq!(log.append(TestEntry(7)).unwrap(), Index::new(1));
        assert_eq!(log.append(TestEntry(8)).unwrap(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry(8)));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
        assert_eq!(log.next_index(), Index::new(3));
        assert_eq!(segment_files(dir.path()), vec!["00000000000000000001.log"]);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        drop(log_with(dir.path(), 2 * RECORD_LEN, 5));

        let mut log = open(dir.path(), 2 * RECORD_LEN);
        assert_eq!(log.first_index(), Index::new(1));
        assert_eq!(log.next_index(), Index::new(6));
        for i in 1..=5u8 {
            assert_eq!(log.read(Index::new(i as u64)).unwrap(), Some(TestEntry(i)));
        }
        assert_eq!(log.append(TestEntry(6)).unwrap(), Index::new(6));
        assert_eq!(
            segment_files(dir.path()),
            vec![
                "00000000000000000001.log",
                "00000000000000000003.log",
                "00000000000000000005.log"
            ]
        );
    }

    #[test]
    fn test_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_with(dir.path(), 2 * RECORD_LEN, 5);

        log.truncate(Index::new(3)).unwrap();
        assert_eq!(log.next_index(), Index::new(3));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
        assert_eq!(log.append(TestEntry(9)).unwrap(), Index::new(3));
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(TestEntry(9)));

        // Past the end is a no-op.
        log.truncate(Index::new(10)).unwrap();
        assert_eq!(log.next_index(), Index::new(4));
        drop(log);

        let log = open(dir.path(), 2 * RECORD_LEN);
        assert_eq!(log.next_index(), Index::new(4));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry(2)));
        assert_eq!(log.read(Index::new(3)).unwrap(), Some(TestEntry(9)));
    }

    #[test]
    fn test_truncate_mid_segment() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_with(dir.path(), 1024, 3);

        log.truncate(Index::new(2)).unwrap();
        assert_eq!(log.next_index(), Index::new(2));
        drop(log);

        let log = open(dir.path(), 1024);
        assert_eq!(log.next_index(), Index::new(2));
        assert_eq!(log.read(Index::new(1)).unwrap(), Some(TestEntry(1)));
    }

    #[test]
    fn test_compact_drops_whole_segments() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_with(dir.path(), 2 * RECORD_LEN, 5);

        log.compact(Index::new(3)).unwrap();
        assert_eq!(log.first_index(), Index::new(4));
        assert_eq!(log.next_index(), Index::new(6));
        assert_eq!(log.read(Index::new(3)).unwrap(), None);
        assert_eq!(log.read(Index::new(4)).unwrap(), Some(TestEntry(4)));
        // Entry 3 shares its segment with entry 4.
        assert_eq!(
            segment_files(dir.path()),
            vec!["00000000000000000003.log", "00000000000000000005.log"]
        );

        // Compacting an already compacted prefix is a no-op.
        log.compact(Index::new(2)).unwrap();
        assert_eq!(log.first_index(), Index::new(4));
        drop(log);

        let log = open(dir.path(), 2 * RECORD_LEN);
        assert_eq!(log.first_index(), Index::new(3));
        assert_eq!(log.read(Index::new(5)).unwrap(), Some(TestEntry(5)));
    }

    #[test]
    fn test_compact_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = log_with(dir.path(), 1024, 3);
        log.compact(Index::new(3)).unwrap();
        assert_eq!(log.first_index(), Index::new(4));
        assert_eq!(log.next_index(), Index::new(4));
        assert_eq!(log.append(TestEntry(4)).unwrap(), Index::new(4));
        assert_eq!(segment_files(dir.path()), vec!["00000000000000000004.log"]);
    }

    #[test]
    fn test_compact_empty_log_past_end() {
        // What installing a snapshot does to a fresh log.
        let dir = tempfile::tempdir().unwrap();
        let mut log = open(dir.path(), 1024);
        log.compact(Index::new(10)).unwrap();
        assert_eq!(log.next_index(), Index::new(11));
        assert_eq!(log.append(TestEntry(1)).unwrap(), Index::new(11));
        assert_eq!(log.read(Index::new(10)).unwrap(), None);
        drop(log);

        let log = open(dir.path(), 1024);
        assert_eq!(log.first_index(), Index::new(11));
        assert_eq!(log.next_index(), Index::new(12));
    }

    #[test]
    fn test_torn_tail_is_cut() {
        let dir = tempfile::tempdir().unwrap();
        drop(log_with(dir.path(), 1024, 3));

        let path = dir.path().join("00000000000000000001.log");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        drop(file);

        let mut log = open(dir.path(), 1024);
        assert_eq!(log.next_index(), Index::new(4));
        assert_eq!(fs::metadata(&path).unwrap().len(), 3 * RECORD_LEN);
        assert_eq!(log.append(TestEntry(4)).unwrap(), Index::new(4));
        assert_eq!(log.read(Index::new(4)).unwrap(), Some(TestEntry(4)));
    }

    #[test]
    fn test_corrupt_last_record_is_cut() {
        let dir = tempfile::tempdir().unwrap();
        drop(log_with(dir.path(), 1024, 3));

        let path = dir.path().join("00000000000000000001.log");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let log = open(dir.path(), 1024);
        assert_eq!(log.next_index(), Index::new(3));
        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry(2)));
    }

    #[test]
    fn test_damage_in_sealed_segment_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        drop(log_with(dir.path(), RECORD_LEN, 3));

        let path = dir.path().join("00000000000000000001.log");
        let mut bytes = fs::read(&path).unwrap();
        bytes[RECORD_HEADER_LEN] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let config = StorageConfig {
            directory: dir.path().to_path_buf(),
            segment_bytes: RECORD_LEN,
        };
        let result = SegmentedDiskLog::<TestEntry>::open(logger(), config);
        assert!(matches!(result, Err(e) if e.kind() == io::ErrorKind::InvalidData));
    }

    #[test]
    fn test_read_undecodable() {
        #[derive(Clone, Debug)]
        struct Wide(Vec<u8>);
        impl Entry for Wide {}
        impl TryFrom<Vec<u8>> for Wide {
            type Error = io::Error;
            fn try_from(bytes: Vec<u8>) -> Result<Self, io::Error> {
                if bytes.is_empty() {
                    Err(io::Error::new(io::ErrorKind::InvalidData, "empty"))
                } else {
                    Ok(Wide(bytes))
                }
            }
        }
        impl From<Wide> for Vec<u8> {
            fn from(w: Wide) -> Self {
                w.0
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            directory: dir.path().to_path_buf(),
            segment_bytes: 1024,
        };
        let mut log = SegmentedDiskLog::open(logger(), config).unwrap();
        log.append(Wide(vec![])).unwrap();
        assert!(log.read(Index::new(1)).is_err());
    }
}
