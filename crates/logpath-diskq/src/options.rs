//! Runtime tunables for a [`crate::QDisk`] (spec.md §4.5; grounded in
//! `original_source/modules/diskq/diskq-options.h`'s `DiskQueueOptions`).
//!
//! These are session options, not persisted fields: unlike the header
//! offsets in spec.md §6, `capacity_bytes`/`front_cache_size`/`reliable`/
//! `truncate_size_ratio`/`prealloc` are supplied by the (out-of-scope)
//! configuration layer each time a queue is opened, exactly as the original
//! keeps `DiskQueueOptions` as a plugin-config struct separate from the
//! on-disk `qdisk` header.

/// Minimum queue capacity, carried over verbatim from
/// `DISKQ_OPTIONS_H_`'s `MIN_CAPACITY_BYTES` (1 MiB).
pub const MIN_CAPACITY_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DiskQueueOptions {
    /// Maximum ring-body size in bytes (excludes the 4 KiB header).
    pub capacity_bytes: u64,
    /// Non-reliable mode only: number of messages the in-memory front cache
    /// holds before it spills to disk (spec.md §4.5 "Non-reliable").
    pub front_cache_size: usize,
    pub read_only: bool,
    /// `true` selects `SLRQ` (fsync every push); `false` selects `SLQF`
    /// (front-cached, spill on overflow).
    pub reliable: bool,
    pub compaction: bool,
    /// Fraction of `capacity_bytes` the file must exceed, once fully
    /// drained, before it is truncated back down (spec.md §4.5 "Ack").
    pub truncate_size_ratio: f64,
    /// Extend the file to `capacity_bytes` at creation instead of growing
    /// it lazily (spec.md §4.5 "Preallocation").
    pub prealloc: bool,
}

impl Default for DiskQueueOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: MIN_CAPACITY_BYTES,
            front_cache_size: 100,
            read_only: false,
            reliable: true,
            compaction: false,
            truncate_size_ratio: 1.0,
            prealloc: false,
        }
    }
}

impl DiskQueueOptions {
    /// Mirrors `disk_queue_options_check_plugin_settings`: clamps capacity
    /// up to the minimum rather than rejecting the configuration outright.
    pub fn normalize(mut self) -> Self {
        if self.capacity_bytes < MIN_CAPACITY_BYTES {
            self.capacity_bytes = MIN_CAPACITY_BYTES;
        }
        self
    }
}
