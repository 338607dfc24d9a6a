//! The fixed 4 KiB file header (spec.md §3 "Disk queue record", §6
//! "On-disk queue format" — the byte layout below is normative).
//!
//! ```text
//! offset  size  field
//!      0     4  magic            "SLRQ" reliable / "SLQF" non-reliable
//!      4     4  version           currently 1
//!      8     8  writer_head
//!     16     8  reader_head
//!     24     8  backlog_head
//!     32     8  backlog_count
//!     40     8  length
//!     48     8  max_size
//!     56     4  flags             bit0 compacted, bit1 preallocated
//!     60     4  header_checksum   CRC32 over bytes 0..59
//!     64  4032  reserved
//! ```
//!
//! `HEADER_BYTES` (4096) is `original_source`'s `QDISK_RESERVED_SPACE`.

use crc32fast::Hasher;

pub const HEADER_BYTES: u64 = 4096;
pub const CURRENT_VERSION: u32 = 1;

pub const MAGIC_RELIABLE: [u8; 4] = *b"SLRQ";
pub const MAGIC_NON_RELIABLE: [u8; 4] = *b"SLQF";

pub const FLAG_COMPACTED: u32 = 1 << 0;
pub const FLAG_PREALLOCATED: u32 = 1 << 1;

const CHECKSUM_REGION: usize = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QDiskHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub writer_head: u64,
    pub reader_head: u64,
    pub backlog_head: u64,
    pub backlog_count: u64,
    pub length: u64,
    pub max_size: u64,
    pub flags: u32,
}

impl QDiskHeader {
    pub fn new(reliable: bool, max_size: u64) -> Self {
        Self {
            magic: if reliable { MAGIC_RELIABLE } else { MAGIC_NON_RELIABLE },
            version: CURRENT_VERSION,
            writer_head: 0,
            reader_head: 0,
            backlog_head: 0,
            backlog_count: 0,
            length: 0,
            max_size,
            flags: 0,
        }
    }

    pub fn reliable(&self) -> bool {
        self.magic == MAGIC_RELIABLE
    }

    pub fn compacted(&self) -> bool {
        self.flags & FLAG_COMPACTED != 0
    }

    pub fn preallocated(&self) -> bool {
        self.flags & FLAG_PREALLOCATED != 0
    }

    /// Serializes to exactly [`HEADER_BYTES`] bytes, checksum included.
    pub fn to_bytes(&self) -> [u8; HEADER_BYTES as usize] {
        let mut out = [0u8; HEADER_BYTES as usize];
        out[0..4].copy_from_slice(&self.magic);
        out[4..8].copy_from_slice(&self.version.to_be_bytes());
        out[8..16].copy_from_slice(&self.writer_head.to_be_bytes());
        out[16..24].copy_from_slice(&self.reader_head.to_be_bytes());
        out[24..32].copy_from_slice(&self.backlog_head.to_be_bytes());
        out[32..40].copy_from_slice(&self.backlog_count.to_be_bytes());
        out[40..48].copy_from_slice(&self.length.to_be_bytes());
        out[48..56].copy_from_slice(&self.max_size.to_be_bytes());
        out[56..60].copy_from_slice(&self.flags.to_be_bytes());
        let checksum = checksum_of(&out[0..CHECKSUM_REGION]);
        out[60..64].copy_from_slice(&checksum.to_be_bytes());
        out
    }

    /// Parses a header, validating magic and checksum but not version (the
    /// caller decides whether an unrecognized version is fatal).
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_BYTES as usize {
            return None;
        }
        let magic: [u8; 4] = buf[0..4].try_into().ok()?;
        if magic != MAGIC_RELIABLE && magic != MAGIC_NON_RELIABLE {
            return None;
        }
        let stored_checksum = u32::from_be_bytes(buf[60..64].try_into().ok()?);
        if checksum_of(&buf[0..CHECKSUM_REGION]) != stored_checksum {
            return None;
        }
        Some(Self {
            magic,
            version: u32::from_be_bytes(buf[4..8].try_into().ok()?),
            writer_head: u64::from_be_bytes(buf[8..16].try_into().ok()?),
            reader_head: u64::from_be_bytes(buf[16..24].try_into().ok()?),
            backlog_head: u64::from_be_bytes(buf[24..32].try_into().ok()?),
            backlog_count: u64::from_be_bytes(buf[32..40].try_into().ok()?),
            length: u64::from_be_bytes(buf[40..48].try_into().ok()?),
            max_size: u64::from_be_bytes(buf[48..56].try_into().ok()?),
            flags: u32::from_be_bytes(buf[56..60].try_into().ok()?),
        })
    }
}

fn checksum_of(region: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(region);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let mut h = QDiskHeader::new(true, 1 << 20);
        h.writer_head = 123;
        h.reader_head = 45;
        h.backlog_head = 10;
        h.backlog_count = 3;
        h.length = 7;
        h.flags = FLAG_PREALLOCATED;
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_BYTES as usize);
        let parsed = QDiskHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let h = QDiskHeader::new(false, 1 << 20);
        let mut bytes = h.to_bytes();
        bytes[10] ^= 0xFF;
        assert!(QDiskHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let h = QDiskHeader::new(false, 1 << 20);
        let mut bytes = h.to_bytes();
        bytes[0..4].copy_from_slice(b"NOPE");
        assert!(QDiskHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn reliable_vs_non_reliable_magic() {
        assert!(QDiskHeader::new(true, 1024).reliable());
        assert!(!QDiskHeader::new(false, 1024).reliable());
    }
}
