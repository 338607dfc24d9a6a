//! Engine-level tunables (SPEC_FULL.md §2 "Configuration") — distinct from
//! the log-routing grammar `config::CfgTree` describes. These are the knobs
//! a process embedding this crate sets once at startup: worker count,
//! shutdown drain timeout, and the defaults handed to each disk queue it
//! opens. `serde`/`toml`-deserializable so they can live in the same
//! configuration file format most daemons already use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_workers() -> usize {
    4
}

fn default_shutdown_drain_ms() -> u64 {
    5_000
}

/// Top-level engine configuration, typically the `[engine]` table of a
/// larger TOML document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Size of the dispatch worker pool (`runtime::DispatcherBuilder::workers`).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// How long `Dispatcher::shutdown` waits for in-flight chains to drain
    /// before abandoning them.
    #[serde(default = "default_shutdown_drain_ms")]
    pub shutdown_drain_ms: u64,
    /// Defaults applied to every disk queue the engine opens, absent an
    /// explicit per-destination override.
    pub disk_queue: DiskQueueDefaults,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_drain_ms: default_shutdown_drain_ms(),
            disk_queue: DiskQueueDefaults::default(),
        }
    }
}

impl EngineOptions {
    /// Parses a TOML document (typically the whole engine config file, or
    /// just its `[engine]` table) into an [`EngineOptions`].
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

/// The subset of `logpath_diskq::DiskQueueOptions` that belongs to engine
/// defaults rather than a single queue's identity (path, file id). Mirrors
/// the field names and defaults of `logpath_diskq::options::DiskQueueOptions`
/// so the two stay interchangeable; kept here rather than as a dependency on
/// `logpath-diskq` to avoid a cyclic crate dependency (this crate's
/// `engine_options` is meant to be readable without pulling in the disk
/// queue implementation at all).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskQueueDefaults {
    pub capacity_bytes: u64,
    pub front_cache_size: usize,
    pub reliable: bool,
    pub compaction: bool,
    pub truncate_size_ratio: f64,
    pub prealloc: bool,
}

impl Default for DiskQueueDefaults {
    fn default() -> Self {
        Self {
            capacity_bytes: 1024 * 1024,
            front_cache_size: 100,
            reliable: true,
            compaction: false,
            truncate_size_ratio: 1.0,
            prealloc: false,
        }
    }
}
