use std::path::PathBuf;

/// Errors surfaced by a [`crate::QDisk`] (spec.md §4.5, §7 "Error handling
/// design").
///
/// Per spec.md §7: an I/O error during push drops the offending message
/// with `Aborted` and keeps the queue open; an I/O error during pop rewinds
/// the read head by one record and marks the frame corrupt; a header write
/// failure is fatal for that queue instance. None of these propagate across
/// the `queue` boundary on the hot path (that contract lives in
/// `logpath_core::pipe`) — `DiskQueueError` is for the queue's own open/
/// push/pop/ack surface, which the (out-of-scope) destination driver
/// translates into an ack outcome.
#[derive(thiserror::Error, Debug)]
pub enum DiskQueueError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: header checksum mismatch and no valid backup header was found")]
    HeaderCorrupt { path: PathBuf },

    #[error("{path}: bad magic bytes {found:?}, expected SLRQ or SLQF")]
    BadMagic { path: PathBuf, found: [u8; 4] },

    #[error("{path}: unsupported on-disk format version {found}, expected {expected}")]
    UnsupportedVersion { path: PathBuf, found: u32, expected: u32 },

    #[error("record of {frame_len} bytes does not fit in a queue of max_size {max_size} bytes")]
    RecordTooLarge { frame_len: u64, max_size: u64 },

    #[error("push rejected: queue is full ({used} of {max_size} bytes used)")]
    QueueFull { used: u64, max_size: u64 },

    #[error("pop from an empty queue")]
    Empty,

    #[error("rewind({requested}) exceeds backlog depth of {available}")]
    RewindExceedsBacklog { requested: u64, available: u64 },

    #[error("ack({requested}) exceeds backlog depth of {available}")]
    AckExceedsBacklog { requested: u64, available: u64 },

    #[error("operation not valid in state {state:?}")]
    WrongState { state: crate::queue::QueueState },

    #[error(transparent)]
    Message(#[from] logpath_core::MessageError),
}

pub type Result<T> = std::result::Result<T, DiskQueueError>;
