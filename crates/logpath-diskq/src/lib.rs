//! Ring-buffered, memory-mapped disk-backed FIFO fronting log destinations
//! (spec.md §3 "Disk queue record", §4.5 "Durable queue (QDisk)", C5).
//!
//! Split out of `logpath-core` because it owns a bit-stable on-disk format
//! and a crash-recovery test surface of its own (`SPEC_FULL.md` §0) — wire
//! and disk persistence gets its own crate here rather than folding into the
//! core.
//!
//! - [`header`] — the fixed 4 KiB header, byte-for-byte per spec.md §6.
//! - [`ring`] — the memory-mapped, wrap-aware ring body underneath it.
//! - [`options`] — session tunables (`DiskQueueOptions`), not persisted.
//! - [`queue`] — [`QDisk`] itself: push/pop/ack/rewind/compaction/state
//!   machine, plus the in-memory front cache and backlog.
//! - [`inspect`] — offline queue-file inspection, the `dqtool` equivalent.

pub mod error;
pub mod header;
pub mod inspect;
pub mod options;
pub mod queue;
pub mod ring;

pub use error::{DiskQueueError, Result};
pub use inspect::{inspect as inspect_queue_file, QDiskReport};
pub use options::DiskQueueOptions;
pub use queue::{DiskQueueMetrics, QDisk, QueueState};

/// A crash-recovery frame is considered plausible if its first byte is a
/// version byte [`logpath_core::message::serialize`] actually recognizes.
/// This is deliberately weaker than a per-frame CRC (spec.md §4.5 mentions
/// "running CRCs embedded in the serialised message envelope", but the
/// normative frame layout in spec.md §6 is only `length || bytes` with no
/// checksum field) — see `DESIGN.md` for why this crate validates structure
/// instead of fabricating a checksum the wire format doesn't define.
pub(crate) fn is_plausible_frame(payload: &[u8]) -> bool {
    payload
        .first()
        .map(|&version| logpath_core::message::serialize::is_known_version(version))
        .unwrap_or(false)
}
