//! The memory-mapped ring body backing a [`crate::QDisk`] (spec.md §3
//! "Bytes beyond 4 KiB are the ring buffer").
//!
//! `Ring` owns the file and its `memmap2::MmapMut`; everything above this
//! layer (header bookkeeping, push/pop/ack semantics) lives in
//! [`crate::queue`]. A frame is a 4-byte big-endian length prefix followed
//! by that many payload bytes (spec.md §6); frames may straddle the wrap
//! point at `body_capacity`, so every read/write here is wrap-aware and
//! splits the copy into at most two `memcpy`s.
//!
//! Growth only ever happens from an empty ring (spec.md §4.5 "if the queue
//! is empty and the frame exceeds the max, write it anyway") — which means
//! there is never existing wrapped data to relocate when the file grows,
//! only when it later shrinks back down via truncation once drained.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::header::{QDiskHeader, HEADER_BYTES};

pub struct Ring {
    path: PathBuf,
    file: File,
    mmap: MmapMut,
}

impl Ring {
    /// Opens `path`, creating it (and writing `header` plus `body_capacity`
    /// bytes of ring body) if it does not exist.
    pub fn open_or_create(path: &Path, header: &QDiskHeader, body_capacity: u64) -> io::Result<Self> {
        let existed = path.exists();
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let total = HEADER_BYTES + body_capacity;
        if !existed {
            file.set_len(total)?;
        } else if file.metadata()?.len() < HEADER_BYTES {
            file.set_len(total)?;
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut ring = Self {
            path: path.to_path_buf(),
            file,
            mmap,
        };
        if !existed {
            ring.write_header(header, true)?;
        }
        Ok(ring)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn body_capacity(&self) -> u64 {
        self.file_len().saturating_sub(HEADER_BYTES)
    }

    pub fn read_header(&self) -> Option<QDiskHeader> {
        QDiskHeader::from_bytes(&self.mmap[0..HEADER_BYTES as usize])
    }

    pub fn write_header(&mut self, header: &QDiskHeader, fsync: bool) -> io::Result<()> {
        let bytes = header.to_bytes();
        self.mmap[0..HEADER_BYTES as usize].copy_from_slice(&bytes);
        self.mmap.flush_range(0, HEADER_BYTES as usize)?;
        if fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Extends the file by `extra_capacity` bytes and remaps. Caller
    /// guarantees this is only used while the ring is logically empty
    /// (spec.md §3 "the file may grow temporarily past the configured
    /// maximum").
    pub fn grow_body(&mut self, new_capacity: u64) -> io::Result<()> {
        let new_total = HEADER_BYTES + new_capacity;
        self.file.set_len(new_total)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Truncates the file's ring body back down to `new_capacity`. Caller
    /// guarantees the ring is logically empty so there is no live data past
    /// the new boundary (spec.md §4.5 "the file may be truncated").
    pub fn shrink_body(&mut self, new_capacity: u64) -> io::Result<()> {
        let new_total = HEADER_BYTES + new_capacity;
        self.file.set_len(new_total)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// Writes `frame` (already including its 4-byte length prefix) starting
    /// at ring-relative `offset`, wrapping at `body_capacity`. Returns the
    /// ring-relative offset immediately after the frame (itself wrapped).
    pub fn write_wrapping(&mut self, offset: u64, frame: &[u8]) -> u64 {
        let cap = self.body_capacity();
        let base = HEADER_BYTES as usize;
        let start = offset as usize;
        let len = frame.len();
        let to_end = cap as usize - start;
        if len <= to_end {
            self.mmap[base + start..base + start + len].copy_from_slice(frame);
        } else {
            self.mmap[base + start..base + start + to_end].copy_from_slice(&frame[..to_end]);
            let remaining = len - to_end;
            self.mmap[base..base + remaining].copy_from_slice(&frame[to_end..]);
        }
        let next = offset + len as u64;
        if next >= cap {
            next - cap
        } else {
            next
        }
    }

    /// Reads `len` bytes starting at ring-relative `offset`, wrapping at
    /// `body_capacity`, into a fresh `Vec`.
    pub fn read_wrapping(&self, offset: u64, len: usize) -> Vec<u8> {
        let cap = self.body_capacity();
        let base = HEADER_BYTES as usize;
        let start = offset as usize;
        let to_end = cap as usize - start;
        let mut out = vec![0u8; len];
        if len <= to_end {
            out.copy_from_slice(&self.mmap[base + start..base + start + len]);
        } else {
            out[..to_end].copy_from_slice(&self.mmap[base + start..base + start + to_end]);
            let remaining = len - to_end;
            out[to_end..].copy_from_slice(&self.mmap[base..base + remaining]);
        }
        out
    }

    pub fn advance(&self, offset: u64, by: u64) -> u64 {
        let cap = self.body_capacity();
        if cap == 0 {
            return 0;
        }
        (offset + by) % cap
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.mmap.flush()?;
        self.file.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::QDiskHeader;
    use tempfile::tempdir;

    #[test]
    fn write_and_read_without_wrap() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.rdq");
        let header = QDiskHeader::new(true, 1024);
        let mut ring = Ring::open_or_create(&path, &header, 1024).unwrap();
        let next = ring.write_wrapping(0, b"hello");
        assert_eq!(next, 5);
        assert_eq!(ring.read_wrapping(0, 5), b"hello");
    }

    #[test]
    fn write_wraps_across_the_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.rdq");
        let header = QDiskHeader::new(true, 10);
        let mut ring = Ring::open_or_create(&path, &header, 10).unwrap();
        // Start 7 bytes in, write 5: 3 bytes before the wrap, 2 after.
        let next = ring.write_wrapping(7, b"abcde");
        assert_eq!(next, 2);
        assert_eq!(ring.read_wrapping(7, 5), b"abcde");
    }

    #[test]
    fn header_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.rdq");
        let mut header = QDiskHeader::new(false, 4096);
        header.writer_head = 42;
        let mut ring = Ring::open_or_create(&path, &header, 4096).unwrap();
        ring.write_header(&header, true).unwrap();
        drop(ring);
        let ring2 = Ring::open_or_create(&path, &header, 4096).unwrap();
        let read_back = ring2.read_header().unwrap();
        assert_eq!(read_back.writer_head, 42);
    }

    #[test]
    fn grow_then_shrink_preserves_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.rdq");
        let header = QDiskHeader::new(true, 1024);
        let mut ring = Ring::open_or_create(&path, &header, 1024).unwrap();
        ring.grow_body(4096).unwrap();
        assert_eq!(ring.body_capacity(), 4096);
        ring.shrink_body(1024).unwrap();
        assert_eq!(ring.body_capacity(), 1024);
        assert_eq!(ring.read_header().unwrap().magic, header.magic);
    }
}
