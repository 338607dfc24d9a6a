//! The durable queue itself (spec.md §4.5 "Durable queue (QDisk)").
//!
//! `QDisk` wires the [`crate::header::QDiskHeader`] bookkeeping onto the
//! [`crate::ring::Ring`] memory-mapped body and adds the parts that live
//! only in memory: the non-reliable front cache and the popped-but-unacked
//! backlog (spec.md §3 "Disk queue record", §4.5 "Shape"). Every public
//! method takes the instance's own `parking_lot::Mutex` (spec.md §5: "each
//! queue instance owns its own mutex; the header is the single
//! authoritative copy of offsets").

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use logpath_core::{AckSink, Message};

use crate::error::{DiskQueueError, Result};
use crate::header::{QDiskHeader, FLAG_COMPACTED, FLAG_PREALLOCATED, HEADER_BYTES};
use crate::options::DiskQueueOptions;
use crate::ring::Ring;

/// Queue lifecycle states (spec.md §4.5 "State machine").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    Closed,
    Opening,
    Open,
    Draining,
    Stopped,
}

/// One record still sitting in the backlog region of the ring: popped, not
/// yet acked, so its bytes must not be overwritten (spec.md §3 invariant
/// "`backlog_head ≤ reader_head ≤ writer_head`").
#[derive(Clone, Copy, Debug)]
struct BacklogEntry {
    /// Ring-relative offset of the record's length prefix.
    offset: u64,
    len: u32,
}

impl BacklogEntry {
    fn frame_bytes(&self) -> u64 {
        4 + self.len as u64
    }
}

struct Inner {
    ring: Ring,
    header: QDiskHeader,
    state: QueueState,
    backlog: VecDeque<BacklogEntry>,
    /// Non-reliable mode only (spec.md §4.5 "Shape"): messages absorbed in
    /// memory before the cache overflows to disk.
    front_cache: VecDeque<Vec<u8>>,
}

pub struct QDisk {
    inner: Mutex<Inner>,
    options: DiskQueueOptions,
    file_id: String,
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".hdr.bak");
    PathBuf::from(name)
}

/// Commits `inner.header` to disk: the backup file first, then the primary
/// header inside the mmap (spec.md §4.5 "Crash recovery": "a backup header
/// (written immediately before each commit)"). A crash between the two
/// writes leaves the backup intact and the primary either old or new, both
/// recoverable; a crash mid-backup-write just leaves a stale-but-readable
/// backup behind, which `recover_header` only consults when the primary's
/// checksum has already failed.
fn commit_header(path: &Path, inner: &mut Inner) -> Result<()> {
    let fsync = inner.header.reliable();
    let header = inner.header;
    let backup = backup_path(path);
    fs::write(&backup, header.to_bytes()).map_err(|e| io_err(path, e))?;
    if fsync {
        if let Ok(f) = fs::File::open(&backup) {
            let _ = f.sync_data();
        }
    }
    inner.ring.write_header(&header, fsync).map_err(|e| io_err(path, e))
}

impl QDisk {
    /// Opens (creating if necessary) the queue file at `path`, performing
    /// crash recovery if the header is unreadable (spec.md §4.5 "Crash
    /// recovery").
    pub fn open(path: &Path, options: DiskQueueOptions, file_id: impl Into<String>) -> Result<Self> {
        let options = options.normalize();
        // The ring body is always sized to the logical maximum up front —
        // on a typical filesystem `set_len` creates a sparse file, so this
        // costs no real disk space until pages are actually written.
        // `prealloc` additionally marks the header flag and is the hook a
        // platform-specific implementation would use to force real block
        // allocation (e.g. `fallocate`) instead of leaving the file sparse;
        // that forcing step is not implemented here (see DESIGN.md).
        let body_capacity = options.capacity_bytes;
        let fresh_header = QDiskHeader::new(options.reliable, options.capacity_bytes);

        let mut ring = Ring::open_or_create(path, &fresh_header, body_capacity)
            .map_err(|e| io_err(path, e))?;

        let header = match ring.read_header() {
            Some(h) => h,
            None => Self::recover_header(path, &mut ring)?,
        };

        if header.version != crate::header::CURRENT_VERSION {
            return Err(DiskQueueError::UnsupportedVersion {
                path: path.to_path_buf(),
                found: header.version,
                expected: crate::header::CURRENT_VERSION,
            });
        }

        let mut header = header;
        if options.prealloc && !header.preallocated() {
            header.flags |= FLAG_PREALLOCATED;
        }

        let backlog = Self::rebuild_backlog(&ring, &header);

        let mut queue = QDisk {
            inner: Mutex::new(Inner {
                ring,
                header,
                state: QueueState::Opening,
                backlog,
                front_cache: VecDeque::new(),
            }),
            options,
            file_id: file_id.into(),
        };
        queue.validate_tail(path)?;
        queue.inner.get_mut().state = QueueState::Open;
        Ok(queue)
    }

    fn recover_header(path: &Path, ring: &mut Ring) -> Result<QDiskHeader> {
        warn!(path = %path.display(), "primary header checksum invalid, looking for backup");
        let backup = backup_path(path);
        let bytes = fs::read(&backup).map_err(|_| DiskQueueError::HeaderCorrupt { path: path.to_path_buf() })?;
        let header = QDiskHeader::from_bytes(&bytes).ok_or(DiskQueueError::HeaderCorrupt { path: path.to_path_buf() })?;
        ring.write_header(&header, true).map_err(|e| io_err(path, e))?;
        Ok(header)
    }

    /// Walks every popped-but-unacked record from `backlog_head` to
    /// `reader_head` to reconstruct the in-memory backlog list after an
    /// open (the header only stores the count and the two offsets, not the
    /// individual frame boundaries).
    fn rebuild_backlog(ring: &Ring, header: &QDiskHeader) -> VecDeque<BacklogEntry> {
        let mut entries = VecDeque::new();
        let mut offset = header.backlog_head;
        while offset != header.reader_head {
            let len_bytes = ring.read_wrapping(offset, 4);
            let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
            entries.push_back(BacklogEntry { offset, len });
            offset = ring.advance(offset, 4 + len as u64);
        }
        entries
    }

    /// Forward-scans from `reader_head` to `writer_head`, validating that
    /// every frame's stored length both fits the remaining logical span and
    /// decodes as a recognized serialized-message version byte. The first
    /// frame that fails either check is where the tail is truncated (spec.md
    /// §4.5 "truncate at the first invalid frame and log a warning").
    fn validate_tail(&mut self, path: &Path) -> Result<()> {
        let mut inner = self.inner.lock();
        let cap = inner.ring.body_capacity();
        if cap == 0 {
            return Ok(());
        }
        let mut remaining = inner.header.length;
        let mut valid_count = 0u64;
        let mut cursor = inner.header.reader_head;
        let mut ok = true;
        while remaining > 0 {
            let len_bytes = inner.ring.read_wrapping(cursor, 4);
            let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
            if len as u64 + 4 > cap {
                ok = false;
                break;
            }
            let payload = inner.ring.read_wrapping(inner.ring.advance(cursor, 4), len as usize);
            if payload.is_empty() || !crate::is_plausible_frame(&payload) {
                ok = false;
                break;
            }
            cursor = inner.ring.advance(cursor, 4 + len as u64);
            valid_count += 1;
            remaining -= 1;
        }
        if !ok {
            warn!(
                path = %path.display(),
                valid = valid_count,
                declared = inner.header.length,
                "truncating disk queue tail at first invalid frame"
            );
            inner.header.length = valid_count;
            inner.header.writer_head = cursor;
            Self::commit_header(path, &mut inner)?;
        }
        Ok(())
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn options(&self) -> &DiskQueueOptions {
        &self.options
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().ring.path().to_path_buf()
    }

    /// Total logical length: on-disk records plus whatever still sits in
    /// the non-reliable front cache.
    pub fn length(&self) -> u64 {
        let inner = self.inner.lock();
        inner.header.length + inner.front_cache.len() as u64
    }

    pub fn backlog_count(&self) -> u64 {
        self.inner.lock().header.backlog_count
    }

    pub fn file_size(&self) -> u64 {
        self.inner.lock().ring.file_len()
    }

    pub fn maximum_size(&self) -> u64 {
        self.inner.lock().header.max_size
    }

    /// `qdisk_get_max_useful_space`: the ring body's logical capacity, i.e.
    /// the configured maximum size excluding the fixed header region that
    /// precedes it on disk (spec.md §4.5, "supplemented").
    pub fn max_useful_space(&self) -> u64 {
        self.inner.lock().header.max_size
    }

    /// Bytes currently occupied by not-yet-acked records (unpopped and
    /// popped-but-unacked combined) — `writer_head - backlog_head` in
    /// wrap-aware logical terms.
    pub fn used_space(&self) -> u64 {
        let inner = self.inner.lock();
        used_space(&inner.header, inner.ring.body_capacity())
    }

    pub fn free_space(&self) -> u64 {
        let inner = self.inner.lock();
        let used = used_space(&inner.header, inner.ring.body_capacity());
        inner.header.max_size.saturating_sub(used)
    }

    pub fn is_space_available(&self, at_least: u64) -> bool {
        self.free_space() >= at_least
    }

    pub fn next_tail_position(&self) -> u64 {
        self.inner.lock().header.writer_head
    }

    pub fn next_head_position(&self) -> u64 {
        self.inner.lock().header.reader_head
    }

    pub fn cache_usage(&self) -> usize {
        self.inner.lock().front_cache.len()
    }

    /// Snapshot for the (out-of-scope) metrics registry, keyed by the
    /// owning destination's persistent name (spec.md §4.5 "Memory
    /// accounting").
    pub fn metrics(&self) -> DiskQueueMetrics {
        let inner = self.inner.lock();
        DiskQueueMetrics {
            length: inner.header.length + inner.front_cache.len() as u64,
            backlog_count: inner.header.backlog_count,
            file_size: inner.ring.file_len(),
            free_space: inner.header.max_size.saturating_sub(used_space(&inner.header, inner.ring.body_capacity())),
            cache_usage: inner.front_cache.len(),
        }
    }

    /// Serializes `msg` with [`Message::serialize`] and pushes the frame.
    pub fn push_message(&self, msg: &Message) -> Result<()> {
        self.push_frame(&msg.serialize())
    }

    /// Pushes a raw (already-serialized) payload, length-prefixing it
    /// internally (spec.md §4.5 "Push").
    pub fn push_frame(&self, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Open {
            return Err(DiskQueueError::WrongState { state: inner.state });
        }
        let path = inner.ring.path().to_path_buf();

        let use_cache = !inner.header.reliable()
            && inner.front_cache.len() < self.options.front_cache_size
            && inner.header.length == 0;
        if use_cache {
            inner.front_cache.push_back(payload.to_vec());
            debug!(file_id = %self.file_id, cached = inner.front_cache.len(), "pushed to front cache");
            return Ok(());
        }

        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        let frame_len = frame.len() as u64;

        let cap = inner.ring.body_capacity();
        let used = used_space(&inner.header, cap);
        let free = inner.header.max_size.saturating_sub(used);
        let queue_empty = inner.header.length == 0 && inner.header.backlog_count == 0 && inner.front_cache.is_empty();

        if frame_len > free {
            if !queue_empty {
                return Err(DiskQueueError::QueueFull {
                    used,
                    max_size: inner.header.max_size,
                });
            }
            // Single oversized record, otherwise-empty queue: grow the ring
            // physically to fit it (spec.md §3, OQ-2 resolved permissively).
            if frame_len > cap {
                inner.ring.grow_body(frame_len).map_err(|e| io_err(&path, e))?;
            }
        }

        let writer_head = inner.header.writer_head;
        let new_writer_head = inner.ring.write_wrapping(writer_head, &frame);
        inner.header.writer_head = new_writer_head;
        inner.header.length += 1;

        Self::commit_header(&path, &mut inner)?;
        debug!(file_id = %self.file_id, length = inner.header.length, "pushed frame to disk");
        Ok(())
    }

    /// Pops the oldest record, deserializing it as a [`Message`] rooted on
    /// a fresh ack chain (spec.md §4.1 "a deserialized message ... starts a
    /// new acknowledgement lifecycle").
    pub fn pop_message(&self, ack_sink: Arc<dyn AckSink>) -> Result<Message> {
        let frame = self.pop_frame()?;
        Ok(Message::deserialize(&frame, ack_sink)?)
    }

    /// Pops the oldest record's raw bytes (spec.md §4.5 "Pop").
    pub fn pop_frame(&self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Open {
            return Err(DiskQueueError::WrongState { state: inner.state });
        }

        if let Some(bytes) = inner.front_cache.pop_front() {
            return Ok(bytes);
        }

        if inner.header.length == 0 {
            return Err(DiskQueueError::Empty);
        }

        let path = inner.ring.path().to_path_buf();
        let reader_head = inner.header.reader_head;
        let len_bytes = inner.ring.read_wrapping(reader_head, 4);
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
        let payload_offset = inner.ring.advance(reader_head, 4);
        let payload = inner.ring.read_wrapping(payload_offset, len as usize);
        let new_reader_head = inner.ring.advance(reader_head, 4 + len as u64);

        inner.header.reader_head = new_reader_head;
        inner.header.length -= 1;

        if inner.header.reliable() {
            inner.backlog.push_back(BacklogEntry { offset: reader_head, len });
            inner.header.backlog_count += 1;
        } else {
            inner.header.backlog_head = new_reader_head;
        }

        Self::commit_header(&path, &mut inner)?;
        debug!(file_id = %self.file_id, length = inner.header.length, "popped frame from disk");
        Ok(payload)
    }

    /// Non-destructively returns the bytes the next [`QDisk::pop_frame`]
    /// would return, without advancing any offset.
    pub fn peek_head(&self) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        if let Some(bytes) = inner.front_cache.front() {
            return Ok(bytes.clone());
        }
        if inner.header.length == 0 {
            return Err(DiskQueueError::Empty);
        }
        let reader_head = inner.header.reader_head;
        let len_bytes = inner.ring.read_wrapping(reader_head, 4);
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
        let payload_offset = inner.ring.advance(reader_head, 4);
        Ok(inner.ring.read_wrapping(payload_offset, len as usize))
    }

    /// Acknowledges the oldest `n` backlog entries (spec.md §4.5 "Ack").
    pub fn ack(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.backlog.len() < n as usize {
            return Err(DiskQueueError::AckExceedsBacklog {
                requested: n,
                available: inner.backlog.len() as u64,
            });
        }
        let path = inner.ring.path().to_path_buf();
        for _ in 0..n {
            let entry = inner.backlog.pop_front().expect("length checked above");
            inner.header.backlog_head = inner.ring.advance(entry.offset, entry.frame_bytes());
            inner.header.backlog_count -= 1;
        }
        Self::commit_header(&path, &mut inner)?;

        self.maybe_reset_and_truncate(&mut inner, &path)?;
        Ok(())
    }

    /// Restores the last `n` popped-but-unacked records to the unpopped
    /// side, in original relative order (spec.md §4.5 "Rewind", Testable
    /// Property 9).
    pub fn rewind(&self, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if !inner.header.reliable() {
            return Err(DiskQueueError::RewindExceedsBacklog { requested: n, available: 0 });
        }
        if inner.backlog.len() < n as usize {
            return Err(DiskQueueError::RewindExceedsBacklog {
                requested: n,
                available: inner.backlog.len() as u64,
            });
        }
        let split = inner.backlog.len() - n as usize;
        let new_reader_head = inner.backlog[split].offset;
        for _ in 0..n {
            inner.backlog.pop_back();
        }
        inner.header.reader_head = new_reader_head;
        inner.header.length += n;

        let path = inner.ring.path().to_path_buf();
        Self::commit_header(&path, &mut inner)?;
        Ok(())
    }

    /// Drops every backlog entry without acking or rewinding it (spec.md
    /// §4.5 `qdisk_empty_backlog`) — used on hard shutdown paths that don't
    /// want to replay.
    pub fn empty_backlog(&self) {
        let mut inner = self.inner.lock();
        inner.backlog.clear();
        inner.header.backlog_count = 0;
        inner.header.backlog_head = inner.header.reader_head;
    }

    /// Resets writer/reader/backlog heads to zero once the ring is fully
    /// drained, and truncates the file back to `max_size` if it grew past
    /// `truncate_size_ratio * max_size` (spec.md §4.5 "Ack", "reset_if_empty").
    pub fn reset_if_empty(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let path = inner.ring.path().to_path_buf();
        self.maybe_reset_and_truncate(&mut inner, &path)
    }

    fn maybe_reset_and_truncate(&self, inner: &mut Inner, path: &Path) -> Result<()> {
        if inner.header.length != 0 || inner.header.backlog_count != 0 || !inner.front_cache.is_empty() {
            return Ok(());
        }
        inner.header.writer_head = 0;
        inner.header.reader_head = 0;
        inner.header.backlog_head = 0;

        let threshold = (inner.header.max_size as f64 * self.options.truncate_size_ratio) as u64;
        if inner.ring.body_capacity() > inner.header.max_size && inner.ring.body_capacity() > threshold {
            inner.ring.shrink_body(inner.header.max_size).map_err(|e| io_err(path, e))?;
        }
        Self::commit_header(path, inner)
    }

    /// Relocates the live `[backlog_head, writer_head)` span to start at
    /// ring offset 0, collapsing the leading dead space left by acked
    /// records (spec.md §4.5 "Compaction"). Only meaningful when
    /// `options.compaction` is set; a no-op otherwise.
    pub fn compact(&self) -> Result<()> {
        if !self.options.compaction {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        if inner.header.backlog_head == 0 {
            return Ok(()); // nothing fragmented
        }
        let path = inner.ring.path().to_path_buf();
        let cap = inner.ring.body_capacity();
        let live_len = logical_distance(inner.header.backlog_head, inner.header.writer_head, cap);
        let live_bytes = inner.ring.read_wrapping(inner.header.backlog_head, live_len as usize);

        let rebase = |offset: u64| -> u64 { logical_distance(inner.header.backlog_head, offset, cap) };
        let new_reader_head = rebase(inner.header.reader_head);
        for entry in inner.backlog.iter_mut() {
            entry.offset = rebase(entry.offset);
        }

        inner.ring.write_wrapping(0, &live_bytes);
        inner.header.writer_head = live_len;
        inner.header.reader_head = new_reader_head;
        inner.header.backlog_head = 0;
        inner.header.flags |= FLAG_COMPACTED;

        Self::commit_header(&path, &mut inner)?;
        debug!(file_id = %self.file_id, "compacted disk queue");
        Ok(())
    }

    /// `stop()`: spec.md §4.5 "State machine" — moves through `draining`
    /// before `stopped`. Since the core dispatch contract already
    /// guarantees no in-flight `queue()` call blocks (spec.md §4.4), the
    /// drain here is just "stop serving new pushes/pops", there is nothing
    /// asynchronous to wait for.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = QueueState::Draining;
        let _ = inner.ring.flush();
        inner.state = QueueState::Stopped;
    }

    /// `restart()`: only valid from `stopped` (spec.md §4.5).
    pub fn restart(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::Stopped {
            return Err(DiskQueueError::WrongState { state: inner.state });
        }
        inner.state = QueueState::Open;
        Ok(())
    }
}

/// `writer_head - backlog_head`, wrap-aware. The one case plain position
/// arithmetic cannot disambiguate is when the ring is packed completely
/// full and `writer_head` has wrapped exactly back onto `backlog_head`:
/// geometrically that position pair is indistinguishable from "empty", so
/// `length`/`backlog_count` (which are never ambiguous) break the tie.
fn used_space(header: &QDiskHeader, cap: u64) -> u64 {
    if header.length == 0 && header.backlog_count == 0 {
        return 0;
    }
    if header.writer_head == header.backlog_head {
        return cap;
    }
    logical_distance(header.backlog_head, header.writer_head, cap)
}

fn logical_distance(from: u64, to: u64, cap: u64) -> u64 {
    if cap == 0 {
        return 0;
    }
    if to >= from {
        to - from
    } else {
        cap - from + to
    }
}

fn io_err(path: &Path, source: std::io::Error) -> DiskQueueError {
    DiskQueueError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Point-in-time counters for the (out-of-scope) metrics registry
/// (spec.md §4.5 "Memory accounting").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiskQueueMetrics {
    pub length: u64,
    pub backlog_count: u64,
    pub file_size: u64,
    pub free_space: u64,
    pub cache_usage: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpath_core::{AckOutcome, Message, ParseOptions};
    use tempfile::tempdir;

    struct NullSink;
    impl AckSink for NullSink {
        fn on_ack(&self, _: AckOutcome) {}
    }

    fn sink() -> Arc<dyn AckSink> {
        Arc::new(NullSink)
    }

    fn msg(payload: &str) -> Message {
        Message::new(payload.as_bytes(), &ParseOptions::default(), sink())
    }

    fn open(dir: &tempfile::TempDir, name: &str, options: DiskQueueOptions) -> QDisk {
        QDisk::open(&dir.path().join(name), options, name).unwrap()
    }

    #[test]
    fn fifo_ordering_for_reliable_queue() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q1.rdq", DiskQueueOptions::default());
        q.push_message(&msg("m1")).unwrap();
        q.push_message(&msg("m2")).unwrap();
        let m1 = q.pop_message(sink()).unwrap();
        let m2 = q.pop_message(sink()).unwrap();
        assert_eq!(m1.get_value(logpath_core::message::registry::MESSAGE).unwrap().0.as_ref(), b"m1");
        assert_eq!(m2.get_value(logpath_core::message::registry::MESSAGE).unwrap().0.as_ref(), b"m2");
    }

    #[test]
    fn reopen_recovers_length_and_backlog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q2.rdq");
        {
            let q = QDisk::open(&path, DiskQueueOptions::default(), "q2").unwrap();
            for i in 0..10 {
                q.push_frame(format!("msg-{i}").as_bytes()).unwrap();
            }
            for _ in 0..6 {
                q.pop_frame().unwrap();
            }
            q.ack(3).unwrap();
            q.stop();
        }
        let q2 = QDisk::open(&path, DiskQueueOptions::default(), "q2").unwrap();
        assert_eq!(q2.length(), 4);
        assert_eq!(q2.backlog_count(), 3);
        let next = q2.pop_frame().unwrap();
        assert_eq!(next, b"msg-6".to_vec());
    }

    #[test]
    fn rewind_restores_pop_order() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q3.rdq", DiskQueueOptions::default());
        q.push_frame(b"a").unwrap();
        q.push_frame(b"b").unwrap();
        let first = q.pop_frame().unwrap();
        q.rewind(1).unwrap();
        let again = q.pop_frame().unwrap();
        assert_eq!(first, again);
        let second = q.pop_frame().unwrap();
        assert_eq!(second, b"b".to_vec());
    }

    #[test]
    fn non_reliable_cache_then_spill_preserves_order() {
        let dir = tempdir().unwrap();
        let mut options = DiskQueueOptions::default();
        options.reliable = false;
        options.front_cache_size = 3;
        let q = open(&dir, "q4.qf", options);
        for i in 0..7 {
            q.push_frame(format!("{i}").as_bytes()).unwrap();
        }
        assert_eq!(q.cache_usage(), 3);
        let mut out = Vec::new();
        for _ in 0..7 {
            out.push(String::from_utf8(q.pop_frame().unwrap()).unwrap());
        }
        assert_eq!(out, (0..7).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn push_rejects_when_full_but_not_when_sole_record() {
        let dir = tempdir().unwrap();
        let mut options = DiskQueueOptions::default();
        options.capacity_bytes = crate::options::MIN_CAPACITY_BYTES;
        let q = open(&dir, "q5.rdq", options);
        let oversized = vec![0u8; (crate::options::MIN_CAPACITY_BYTES + 1) as usize];
        // Empty queue: the single oversized record is allowed through.
        q.push_frame(&oversized).unwrap();
        assert_eq!(q.length(), 1);
        // Now the ring is packed completely full; a second push must be
        // rejected rather than wrapping over the still-unacked record.
        assert!(matches!(q.push_frame(b"x"), Err(DiskQueueError::QueueFull { .. })));
    }

    #[test]
    fn ack_past_backlog_errors() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q6.rdq", DiskQueueOptions::default());
        q.push_frame(b"x").unwrap();
        q.pop_frame().unwrap();
        assert!(matches!(q.ack(5), Err(DiskQueueError::AckExceedsBacklog { .. })));
    }

    #[test]
    fn pop_from_empty_queue_errors() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q7.rdq", DiskQueueOptions::default());
        assert!(matches!(q.pop_frame(), Err(DiskQueueError::Empty)));
    }

    #[test]
    fn reset_after_full_drain_shrinks_grown_file() {
        let dir = tempdir().unwrap();
        let mut options = DiskQueueOptions::default();
        options.capacity_bytes = crate::options::MIN_CAPACITY_BYTES;
        options.truncate_size_ratio = 1.0;
        let q = open(&dir, "q8.rdq", options);
        let oversized = vec![0u8; (crate::options::MIN_CAPACITY_BYTES * 2) as usize];
        q.push_frame(&oversized).unwrap();
        assert!(q.file_size() > HEADER_BYTES + crate::options::MIN_CAPACITY_BYTES);
        q.pop_frame().unwrap();
        q.ack(1).unwrap();
        assert_eq!(q.file_size(), HEADER_BYTES + crate::options::MIN_CAPACITY_BYTES);
    }

    #[test]
    fn metrics_reflect_cache_and_disk() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q9.rdq", DiskQueueOptions::default());
        q.push_frame(b"hello").unwrap();
        let m = q.metrics();
        assert_eq!(m.length, 1);
        assert_eq!(m.backlog_count, 0);
    }

    #[test]
    fn state_transitions_reject_operations_when_stopped() {
        let dir = tempdir().unwrap();
        let q = open(&dir, "q10.rdq", DiskQueueOptions::default());
        q.stop();
        assert!(matches!(q.push_frame(b"x"), Err(DiskQueueError::WrongState { .. })));
        q.restart().unwrap();
        q.push_frame(b"x").unwrap();
    }

    #[test]
    fn compaction_collapses_acked_leading_space() {
        let dir = tempdir().unwrap();
        let mut options = DiskQueueOptions::default();
        options.compaction = true;
        let q = open(&dir, "q11.rdq", options);
        for i in 0..5 {
            q.push_frame(format!("{i}").as_bytes()).unwrap();
        }
        for _ in 0..3 {
            q.pop_frame().unwrap();
        }
        q.ack(3).unwrap();
        q.compact().unwrap();
        assert_eq!(q.next_head_position(), 0, "backlog_head rebases to 0 after compaction");
        // After compaction the remaining two records still pop in order.
        assert_eq!(q.pop_frame().unwrap(), b"3".to_vec());
        assert_eq!(q.pop_frame().unwrap(), b"4".to_vec());
    }

    #[test]
    fn torn_primary_header_recovers_from_backup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q12.rdq");
        {
            let q = QDisk::open(&path, DiskQueueOptions::default(), "q12").unwrap();
            q.push_frame(b"a").unwrap();
            q.push_frame(b"b").unwrap();
            q.stop();
        }
        // Simulate a torn write: corrupt a byte inside the primary header's
        // checksummed region so `Ring::read_header` rejects it on reopen.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = fs::OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(10)).unwrap();
            file.write_all(&[0xFF]).unwrap();
        }
        assert!(backup_path(&path).exists(), "commit_header must have left a backup behind");
        let q2 = QDisk::open(&path, DiskQueueOptions::default(), "q12").unwrap();
        assert_eq!(q2.length(), 2);
        assert_eq!(q2.pop_frame().unwrap(), b"a".to_vec());
        assert_eq!(q2.pop_frame().unwrap(), b"b".to_vec());
    }
}
