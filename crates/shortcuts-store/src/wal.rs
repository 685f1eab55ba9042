use std::collections::BTreeMap;
use std::io::{Read, Seek, Write as IoWrite};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::WalRecord;

/// Leading bytes of every segment file.
const WAL_MAGIC: [u8; 4] = [b'S', b'C', b'W', b'L'];
const WAL_VERSION: u16 = 1;
/// `[magic:4][version:2][reserved:2]`
const SEGMENT_HEADER_SIZE: usize = 8;
/// `[length:4][sequence:8]` before the payload, `[crc32:4]` after it.
const ENTRY_OVERHEAD: usize = 16;

/// Where segment bytes live.
pub trait WalStorage: Send + Sync {
    /// Create `segment_id`, truncating any previous content.
    fn create_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>>;
    /// Reopen `segment_id` with the write position at its end.
    fn append_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>>;
    fn open_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentCursor>>;
    fn list_segments(&self) -> StoreResult<Vec<u64>>;
    fn remove_segment(&self, segment_id: u64) -> StoreResult<()>;
}

pub trait SegmentAppend: Send + Sync {
    fn write_all(&mut self, data: &[u8]) -> StoreResult<()>;
    fn flush(&mut self) -> StoreResult<()>;
    fn sync(&mut self) -> StoreResult<()>;
    fn position(&self) -> u64;
    /// Drop everything after `len` bytes.
    fn truncate(&mut self, len: u64) -> StoreResult<()>;
}

pub trait SegmentCursor: Send + Sync {
    fn read_exact(&mut self, buf: &mut [u8]) -> StoreResult<()>;
    fn position(&self) -> u64;
    fn seek_to(&mut self, pos: u64) -> StoreResult<()>;
    fn len(&self) -> StoreResult<u64>;
}

// ---- Files ----

pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    fn segment_path(&self, segment_id: u64) -> PathBuf {
        self.data_dir.join(format!("wal-{:016x}.seg", segment_id))
    }
}

impl WalStorage for FileStorage {
    fn create_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        let path = self.segment_path(segment_id);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Box::new(FileAppender { file, position: 0 }))
    }

    fn append_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        let path = self.segment_path(segment_id);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let position = file.metadata()?.len();
        Ok(Box::new(FileAppender { file, position }))
    }

    fn open_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentCursor>> {
        let path = self.segment_path(segment_id);
        let file = std::fs::File::open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::SegmentNotFound(segment_id),
            _ => StoreError::StorageUnavailable(e),
        })?;
        let len = file.metadata()?.len();
        Ok(Box::new(FileCursor {
            file,
            position: 0,
            len,
        }))
    }

    fn list_segments(&self) -> StoreResult<Vec<u64>> {
        let mut segments = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(hex) = name.strip_prefix("wal-").and_then(|s| s.strip_suffix(".seg")) {
                if let Ok(id) = u64::from_str_radix(hex, 16) {
                    segments.push(id);
                }
            }
        }
        segments.sort();
        Ok(segments)
    }

    fn remove_segment(&self, segment_id: u64) -> StoreResult<()> {
        std::fs::remove_file(self.segment_path(segment_id))?;
        Ok(())
    }
}

struct FileAppender {
    file: std::fs::File,
    position: u64,
}

impl SegmentAppend for FileAppender {
    fn write_all(&mut self, data: &[u8]) -> StoreResult<()> {
        self.file.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        self.file.set_len(len)?;
        self.file.seek(std::io::SeekFrom::Start(len))?;
        self.position = len;
        Ok(())
    }
}

struct FileCursor {
    file: std::fs::File,
    position: u64,
    len: u64,
}

impl SegmentCursor for FileCursor {
    fn read_exact(&mut self, buf: &mut [u8]) -> StoreResult<()> {
        self.file.read_exact(buf)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek_to(&mut self, pos: u64) -> StoreResult<()> {
        self.file.seek(std::io::SeekFrom::Start(pos))?;
        self.position = pos;
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.len)
    }
}

// ---- In-memory storage ----

type SharedSegments = Arc<Mutex<BTreeMap<u64, Vec<u8>>>>;

fn lock_segments(segments: &SharedSegments) -> MutexGuard<'_, BTreeMap<u64, Vec<u8>>> {
    segments.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Volatile storage for tests and stores opened without a data directory.
#[derive(Default)]
pub struct MemoryStorage {
    segments: SharedSegments,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite one byte of a stored segment.
    #[cfg(test)]
    pub(crate) fn corrupt(&self, segment_id: u64, offset: usize) {
        if let Some(data) = lock_segments(&self.segments).get_mut(&segment_id) {
            if let Some(byte) = data.get_mut(offset) {
                *byte ^= 0xff;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> MemoryStorage {
        MemoryStorage {
            segments: self.segments.clone(),
        }
    }
}

impl WalStorage for MemoryStorage {
    fn create_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        lock_segments(&self.segments).insert(segment_id, Vec::new());
        Ok(Box::new(MemoryAppender {
            segment_id,
            buffer: Vec::new(),
            segments: self.segments.clone(),
        }))
    }

    fn append_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        Ok(Box::new(MemoryAppender {
            segment_id,
            buffer: Vec::new(),
            segments: self.segments.clone(),
        }))
    }

    fn open_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentCursor>> {
        let data = lock_segments(&self.segments)
            .get(&segment_id)
            .cloned()
            .ok_or(StoreError::SegmentNotFound(segment_id))?;
        Ok(Box::new(MemoryCursor { data, position: 0 }))
    }

    fn list_segments(&self) -> StoreResult<Vec<u64>> {
        Ok(lock_segments(&self.segments).keys().copied().collect())
    }

    fn remove_segment(&self, segment_id: u64) -> StoreResult<()> {
        lock_segments(&self.segments).remove(&segment_id);
        Ok(())
    }
}

struct MemoryAppender {
    segment_id: u64,
    buffer: Vec<u8>,
    segments: SharedSegments,
}

impl SegmentAppend for MemoryAppender {
    fn write_all(&mut self, data: &[u8]) -> StoreResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.sync()
    }

    fn sync(&mut self) -> StoreResult<()> {
        let mut guard = lock_segments(&self.segments);
        guard
            .entry(self.segment_id)
            .or_default()
            .extend_from_slice(&self.buffer);
        self.buffer.clear();
        Ok(())
    }

    fn position(&self) -> u64 {
        let stored = lock_segments(&self.segments)
            .get(&self.segment_id)
            .map_or(0, |v| v.len());
        (stored + self.buffer.len()) as u64
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        let len = len as usize;
        let mut guard = lock_segments(&self.segments);
        let stored = guard.entry(self.segment_id).or_default();
        if len >= stored.len() {
            self.buffer.truncate(len - stored.len());
        } else {
            stored.truncate(len);
            self.buffer.clear();
        }
        Ok(())
    }
}

/// Memory storage whose segment creation and writes can be made to fail.
#[cfg(test)]
pub(crate) struct FaultyStorage {
    inner: MemoryStorage,
    faults: Faults,
}

#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct Faults {
    pub fail_create: Arc<AtomicBool>,
    /// Writes persist half their bytes and then fail.
    pub fail_writes: Arc<AtomicBool>,
    pub fail_truncate: Arc<AtomicBool>,
}

#[cfg(test)]
impl FaultyStorage {
    pub(crate) fn new(inner: MemoryStorage) -> (Self, Faults) {
        let faults = Faults::default();
        (
            Self {
                inner,
                faults: faults.clone(),
            },
            faults,
        )
    }
}

#[cfg(test)]
fn disk_full() -> StoreError {
    StoreError::StorageUnavailable(std::io::Error::other("disk full"))
}

#[cfg(test)]
impl WalStorage for FaultyStorage {
    fn create_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        if self.faults.fail_create.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        Ok(Box::new(FaultyAppender {
            inner: self.inner.create_segment(segment_id)?,
            faults: self.faults.clone(),
        }))
    }

    fn append_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentAppend>> {
        Ok(Box::new(FaultyAppender {
            inner: self.inner.append_segment(segment_id)?,
            faults: self.faults.clone(),
        }))
    }

    fn open_segment(&self, segment_id: u64) -> StoreResult<Box<dyn SegmentCursor>> {
        self.inner.open_segment(segment_id)
    }

    fn list_segments(&self) -> StoreResult<Vec<u64>> {
        self.inner.list_segments()
    }

    fn remove_segment(&self, segment_id: u64) -> StoreResult<()> {
        self.inner.remove_segment(segment_id)
    }
}

#[cfg(test)]
struct FaultyAppender {
    inner: Box<dyn SegmentAppend>,
    faults: Faults,
}

#[cfg(test)]
impl SegmentAppend for FaultyAppender {
    fn write_all(&mut self, data: &[u8]) -> StoreResult<()> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            self.inner.write_all(&data[..data.len() / 2])?;
            self.inner.sync()?;
            return Err(disk_full());
        }
        self.inner.write_all(data)
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.inner.sync()
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn truncate(&mut self, len: u64) -> StoreResult<()> {
        if self.faults.fail_truncate.load(Ordering::SeqCst) {
            return Err(disk_full());
        }
        self.inner.truncate(len)
    }
}

struct MemoryCursor {
    data: Vec<u8>,
    position: usize,
}

impl SegmentCursor for MemoryCursor {
    fn read_exact(&mut self, buf: &mut [u8]) -> StoreResult<()> {
        if self.position + buf.len() > self.data.len() {
            return Err(StoreError::StorageUnavailable(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "memory segment exhausted",
            )));
        }
        buf.copy_from_slice(&self.data[self.position..self.position + buf.len()]);
        self.position += buf.len();
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn seek_to(&mut self, pos: u64) -> StoreResult<()> {
        self.position = pos as usize;
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.data.len() as u64)
    }
}

// ---- Segment metadata ----

#[derive(Clone, Debug)]
pub struct SegmentMeta {
    pub id: u64,
    pub first_sequence: u64,
    pub last_sequence: u64,
    pub size_bytes: u64,
    pub entry_count: u64,
}

// ---- WAL Configuration ----

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    /// Bytes after which appends move to a new segment
    pub max_segment_size: u64,
    pub sync_mode: SyncMode,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_segment_size: 64 * 1024 * 1024,
            sync_mode: SyncMode::Immediate,
        }
    }
}

/// Durability of an append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync after every write, a commit is durable when it returns
    Immediate,
    /// flush to the OS after every write, fsync on rotation and checkpoint
    Batched,
    /// No explicit flush or fsync
    OsManaged,
}

/// Result of `verify_integrity`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub total_records: u64,
    pub verified_records: u64,
    pub corrupted_records: u64,
    /// (segment id, byte offset) of each bad entry
    pub corrupted_offsets: Vec<(u64, u64)>,
    pub segments_checked: u32,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted_records == 0
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// `(offset, sequence, payload, stored crc32)`
type RawEntry = (u64, u64, Vec<u8>, u32);

// ---- Write-Ahead Log ----

/// Append-only, crash-recoverable journal of committed records.
///
/// Segment format: `[magic:4][version:2][reserved:2][entries...]`
/// Entry format:   `[length:4][sequence:8][record_bytes:N][crc32:4]`
pub struct WriteAheadLog {
    config: WalConfig,
    storage: Box<dyn WalStorage>,
    active_segment: RwLock<u64>,
    writer_slot: RwLock<Option<Box<dyn SegmentAppend>>>,
    segments: RwLock<Vec<SegmentMeta>>,
    head_sequence: AtomicU64,
    active_segment_bytes: AtomicU64,
    /// A failed write left bytes that could not be removed; the next append
    /// must start a new segment.
    tail_damaged: AtomicBool,
}

impl WriteAheadLog {
    /// Scan `storage`, recover segment metadata and resume appending.
    pub async fn open(config: WalConfig, storage: Box<dyn WalStorage>) -> StoreResult<Self> {
        let existing_segments = storage.list_segments()?;

        let mut found = Vec::new();
        let mut highest_seen: u64 = 0;
        let mut max_segment_id: u64 = 0;
        let mut torn_tail = false;

        for &found_id in &existing_segments {
            max_segment_id = max_segment_id.max(found_id);
            let mut reader = storage.open_segment(found_id)?;
            let stored_len = reader.len()?;
            if stored_len < SEGMENT_HEADER_SIZE as u64 {
                warn!(segment_id = found_id, "Segment shorter than its header, ignored");
                continue;
            }

            let mut header = [0u8; SEGMENT_HEADER_SIZE];
            reader.read_exact(&mut header)?;
            if header[..4] != WAL_MAGIC {
                warn!(segment_id = found_id, "Not a segment file, ignored");
                continue;
            }

            let mut lowest = u64::MAX;
            let mut highest = 0u64;
            let mut entry_count = 0u64;
            let mut valid_end = SEGMENT_HEADER_SIZE as u64;

            while reader.position() + ENTRY_OVERHEAD as u64 <= stored_len {
                let mut frame = [0u8; 12];
                if reader.read_exact(&mut frame).is_err() {
                    break;
                }
                let length = read_u32(&frame[..4]) as u64;
                let sequence = read_u64(&frame[4..12]);

                if length == 0 || reader.position() + length + 4 > stored_len {
                    break;
                }

                let next = reader.position() + length + 4;
                reader.seek_to(next)?;
                valid_end = next;

                lowest = lowest.min(sequence);
                highest = highest.max(sequence);
                highest_seen = highest_seen.max(sequence);
                entry_count += 1;
            }

            if valid_end < stored_len {
                warn!(
                    segment_id = found_id,
                    valid_bytes = valid_end,
                    total_bytes = stored_len,
                    "Torn tail in WAL segment, later appends go to a new segment"
                );
                torn_tail = true;
            } else {
                torn_tail = false;
            }

            if entry_count == 0 {
                lowest = highest_seen + 1;
                highest = highest_seen;
            }
            found.push(SegmentMeta {
                id: found_id,
                first_sequence: lowest,
                last_sequence: highest,
                size_bytes: valid_end,
                entry_count,
            });
        }

        let reuse_last = !torn_tail
            && found
                .last()
                .is_some_and(|s| s.id == max_segment_id && s.size_bytes < config.max_segment_size);

        let reusable = if reuse_last {
            found.last().map(|s| (s.id, s.size_bytes))
        } else {
            None
        };

        let (writer, initial_bytes, active) = match reusable {
            Some((id, size_bytes)) => {
                let writer = storage.append_segment(id)?;
                (writer, size_bytes, id)
            }
            None => {
                let new_id = max_segment_id + 1;
                let mut writer = storage.create_segment(new_id)?;
                write_header(&mut *writer)?;
                found.push(SegmentMeta {
                    id: new_id,
                    first_sequence: highest_seen + 1,
                    last_sequence: highest_seen,
                    size_bytes: SEGMENT_HEADER_SIZE as u64,
                    entry_count: 0,
                });
                (writer, SEGMENT_HEADER_SIZE as u64, new_id)
            }
        };

        info!(
            segments = found.len(),
            last_sequence = highest_seen,
            "WAL opened"
        );

        Ok(Self {
            config,
            storage,
            active_segment: RwLock::new(active),
            writer_slot: RwLock::new(Some(writer)),
            segments: RwLock::new(found),
            head_sequence: AtomicU64::new(highest_seen),
            active_segment_bytes: AtomicU64::new(initial_bytes),
            tail_damaged: AtomicBool::new(false),
        })
    }

    pub async fn open_file(config: WalConfig, data_dir: PathBuf) -> StoreResult<Self> {
        let storage = Box::new(FileStorage::new(data_dir)?);
        Self::open(config, storage).await
    }

    pub async fn open_memory(config: WalConfig) -> StoreResult<Self> {
        Self::open(config, Box::new(MemoryStorage::new())).await
    }

    /// Append a record. Returns its sequence number.
    pub async fn append(&self, record: &WalRecord) -> StoreResult<u64> {
        let record_bytes = serde_json::to_vec(record)?;
        let crc = crc32fast::hash(&record_bytes);

        if self.tail_damaged.load(Ordering::SeqCst) {
            self.roll_segment().await?;
        }

        // The writer lock is held across sequence assignment so entries land
        // in sequence order and a failed write does not burn a number.
        let mut slot = self.writer_slot.write().await;
        let writer = slot.as_mut().ok_or(StoreError::Closed)?;
        let sequence = self.head_sequence.load(Ordering::SeqCst) + 1;

        let length = record_bytes.len() as u32;
        let mut entry = Vec::with_capacity(ENTRY_OVERHEAD + record_bytes.len());
        entry.extend_from_slice(&length.to_le_bytes());
        entry.extend_from_slice(&sequence.to_le_bytes());
        entry.extend_from_slice(&record_bytes);
        entry.extend_from_slice(&crc.to_le_bytes());

        let start = writer.position();
        if let Err(e) = write_entry(writer.as_mut(), &entry, self.config.sync_mode) {
            // Never leave a partial frame in front of later entries.
            if let Err(undo) = writer.truncate(start) {
                warn!(
                    error = %undo,
                    offset = start,
                    "Could not remove partial entry, next append starts a new segment"
                );
                self.tail_damaged.store(true, Ordering::SeqCst);
            }
            return Err(e);
        }
        self.head_sequence.store(sequence, Ordering::SeqCst);
        drop(slot);

        let new_size = self
            .active_segment_bytes
            .fetch_add(entry.len() as u64, Ordering::SeqCst)
            + entry.len() as u64;

        {
            let mut segments = self.segments.write().await;
            if let Some(last) = segments.last_mut() {
                last.last_sequence = sequence;
                last.size_bytes = new_size;
                last.entry_count += 1;
                if last.entry_count == 1 || last.first_sequence > sequence {
                    last.first_sequence = sequence;
                }
            }
        }

        // The entry is durable at this point, so a failed rotation must not
        // fail the append. It is retried after the next one.
        if new_size >= self.config.max_segment_size {
            if let Err(e) = self.roll_segment().await {
                warn!(
                    error = %e,
                    segment_bytes = new_size,
                    "Segment rotation failed, keeping current segment"
                );
            }
        }

        debug!(
            sequence = sequence,
            mutations = record.mutation_count(),
            snapshot = record.is_snapshot(),
            "Record appended to WAL"
        );
        Ok(sequence)
    }

    /// Up to `limit` records starting at `from_sequence`.
    pub async fn read_from(
        &self,
        from_sequence: u64,
        limit: usize,
    ) -> StoreResult<Vec<(u64, WalRecord)>> {
        let segments = self.segments.read().await.clone();
        let mut results = Vec::new();

        for meta in segments.iter() {
            if meta.entry_count == 0 || meta.last_sequence < from_sequence {
                continue;
            }

            for (seq, record) in self.scan_segment(meta.id).await? {
                if seq >= from_sequence {
                    results.push((seq, record));
                    if results.len() >= limit {
                        return Ok(results);
                    }
                }
            }
        }

        Ok(results)
    }

    pub fn latest_sequence(&self) -> u64 {
        self.head_sequence.load(Ordering::SeqCst)
    }

    pub async fn segment_count(&self) -> usize {
        self.segments.read().await.len()
    }

    pub async fn size_bytes(&self) -> u64 {
        self.segments.read().await.iter().map(|s| s.size_bytes).sum()
    }

    /// Flush and fsync the active segment, returning the last sequence written.
    pub async fn checkpoint(&self) -> StoreResult<u64> {
        {
            let mut slot = self.writer_slot.write().await;
            if let Some(ref mut writer) = *slot {
                writer.sync()?;
            }
        }

        let seq = self.latest_sequence();
        info!(sequence = seq, "WAL synced");
        Ok(seq)
    }

    /// Start a fresh segment with `snapshot` as its first record, then drop
    /// every older segment. Returns the snapshot's sequence number.
    ///
    /// Older segments are removed only after the snapshot is synced, so a
    /// crash in between replays old records followed by the snapshot.
    pub async fn compact(&self, snapshot: &WalRecord) -> StoreResult<u64> {
        self.roll_segment().await?;
        let keep_from = *self.active_segment.read().await;
        let sequence = self.append(snapshot).await?;
        self.checkpoint().await?;

        let mut segments = self.segments.write().await;
        let mut removed = 0usize;
        for seg in segments.iter().filter(|s| s.id < keep_from) {
            self.storage.remove_segment(seg.id)?;
            removed += 1;
        }
        segments.retain(|s| s.id >= keep_from);
        info!(
            removed_segments = removed,
            snapshot_sequence = sequence,
            "WAL compacted"
        );
        Ok(sequence)
    }

    /// Feed every record from `from_sequence` on to `apply`, in order.
    pub async fn replay<F>(&self, from: u64, mut handler: F) -> StoreResult<u64>
    where
        F: FnMut(u64, WalRecord) -> StoreResult<()>,
    {
        let records = self.read_from(from, usize::MAX).await?;
        let mut count = 0u64;
        for (seq, record) in records {
            handler(seq, record)?;
            count += 1;
        }
        info!(replayed = count, from = from, "Replay finished");
        Ok(count)
    }

    /// Check every entry's CRC32 and record hash.
    pub async fn verify_integrity(&self) -> StoreResult<IntegrityReport> {
        let segments = self.segments.read().await.clone();
        let mut report = IntegrityReport::default();

        for meta in segments.iter() {
            report.segments_checked += 1;
            let entries = self.scan_segment_raw(meta.id).await?;

            for (offset, _seq, record_bytes, stored_crc) in entries {
                report.total_records += 1;

                if crc32fast::hash(&record_bytes) != stored_crc {
                    report.corrupted_records += 1;
                    report.corrupted_offsets.push((meta.id, offset));
                    continue;
                }

                match serde_json::from_slice::<WalRecord>(&record_bytes) {
                    Ok(record) if record.verify_integrity() => {
                        report.verified_records += 1;
                    }
                    _ => {
                        report.corrupted_records += 1;
                        report.corrupted_offsets.push((meta.id, offset));
                    }
                }
            }
        }

        Ok(report)
    }

    /// Stop accepting appends.
    pub async fn close(&self) -> StoreResult<()> {
        let mut slot = self.writer_slot.write().await;
        if let Some(mut writer) = slot.take() {
            writer.sync()?;
        }
        info!(sequence = self.latest_sequence(), "WAL closed");
        Ok(())
    }

    // ---- Internal helpers ----

    async fn roll_segment(&self) -> StoreResult<()> {
        let mut slot = self.writer_slot.write().await;
        let writer = slot.as_mut().ok_or(StoreError::Closed)?;
        let damaged = self.tail_damaged.load(Ordering::SeqCst);
        if !damaged {
            writer.sync()?;
        }

        let mut active = self.active_segment.write().await;
        let new_id = *active + 1;

        let mut writer = self.storage.create_segment(new_id)?;
        write_header(&mut *writer)?;

        *slot = Some(writer);
        *active = new_id;
        self.active_segment_bytes
            .store(SEGMENT_HEADER_SIZE as u64, Ordering::SeqCst);
        drop(active);
        drop(slot);
        self.tail_damaged.store(false, Ordering::SeqCst);

        let mut segments = self.segments.write().await;
        let upcoming = self.head_sequence.load(Ordering::SeqCst) + 1;
        segments.push(SegmentMeta {
            id: new_id,
            first_sequence: upcoming,
            last_sequence: upcoming.saturating_sub(1),
            size_bytes: SEGMENT_HEADER_SIZE as u64,
            entry_count: 0,
        });

        info!(segment_id = new_id, "Started new segment");
        Ok(())
    }

    async fn scan_segment(&self, segment_id: u64) -> StoreResult<Vec<(u64, WalRecord)>> {
        let raw = self.scan_segment_raw(segment_id).await?;
        let mut results = Vec::new();
        for (offset, seq, record_bytes, stored_crc) in raw {
            if crc32fast::hash(&record_bytes) != stored_crc {
                warn!(
                    segment_id = segment_id,
                    sequence = seq,
                    offset = offset,
                    "Checksum mismatch, entry skipped"
                );
                continue;
            }
            match serde_json::from_slice::<WalRecord>(&record_bytes) {
                Ok(record) if record.verify_integrity() => results.push((seq, record)),
                Ok(_) => {
                    warn!(
                        segment_id = segment_id,
                        sequence = seq,
                        "Record hash mismatch, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        segment_id = segment_id,
                        sequence = seq,
                        error = %e,
                        "Failed to deserialize record, skipping"
                    );
                }
            }
        }
        Ok(results)
    }

    async fn scan_segment_raw(&self, segment_id: u64) -> StoreResult<Vec<RawEntry>> {
        // Flush so buffered data is readable
        {
            let mut slot = self.writer_slot.write().await;
            if let Some(ref mut writer) = *slot {
                writer.flush()?;
            }
        }

        let mut reader = self.storage.open_segment(segment_id)?;
        let stored_len = reader.len()?;

        if stored_len < SEGMENT_HEADER_SIZE as u64 {
            return Ok(Vec::new());
        }

        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        reader.read_exact(&mut header)?;
        if header[..4] != WAL_MAGIC {
            return Err(StoreError::Corruption {
                offset: 0,
                reason: format!("segment {segment_id} has an invalid header"),
            });
        }

        let mut results = Vec::new();

        while reader.position() + ENTRY_OVERHEAD as u64 <= stored_len {
            let frame_start = reader.position();

            let mut frame = [0u8; 12];
            if reader.read_exact(&mut frame).is_err() {
                break;
            }

            let length = read_u32(&frame[..4]) as usize;
            let sequence = read_u64(&frame[4..12]);

            if length == 0 || reader.position() + length as u64 + 4 > stored_len {
                break;
            }

            let mut record_bytes = vec![0u8; length];
            if reader.read_exact(&mut record_bytes).is_err() {
                break;
            }

            let mut stored_crc = [0u8; 4];
            if reader.read_exact(&mut stored_crc).is_err() {
                break;
            }

            results.push((frame_start, sequence, record_bytes, u32::from_le_bytes(stored_crc)));
        }

        Ok(results)
    }
}

fn write_entry(writer: &mut dyn SegmentAppend, entry: &[u8], sync_mode: SyncMode) -> StoreResult<()> {
    writer.write_all(entry)?;
    match sync_mode {
        SyncMode::Immediate => writer.sync(),
        SyncMode::Batched => writer.flush(),
        SyncMode::OsManaged => Ok(()),
    }
}

fn write_header(writer: &mut dyn SegmentAppend) -> StoreResult<()> {
    let mut header = [0u8; SEGMENT_HEADER_SIZE];
    header[..4].copy_from_slice(&WAL_MAGIC);
    header[4..6].copy_from_slice(&WAL_VERSION.to_le_bytes());
    // bytes 6..8 reserved
    writer.write_all(&header)?;
    writer.flush()?;
    Ok(())
}
