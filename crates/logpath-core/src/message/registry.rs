//! Process-wide, append-only interning tables for name-value handles and
//! tags (spec.md §3 "Message", §5 "Shared resources").
//!
//! Both registries allocate new entries lazily under a coarse lock (the
//! `DashMap` entry API serializes only the shard touched by the insert) and
//! serve existing lookups without blocking concurrent inserts into other
//! shards. Builtin handles are pre-registered so every `Message` can refer
//! to them without touching the registry at all.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;

/// A small integer identifying an interned name-value key.
///
/// Handles are stable for the lifetime of the process: once assigned, a
/// name never gets a different handle, and a handle is never reused for a
/// different name (spec.md: "the registry is append-only").
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NvHandle(pub(crate) u32);

impl fmt::Debug for NvHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NvHandle({})", self.0)
    }
}

impl NvHandle {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

macro_rules! builtin_handles {
    ($($name:ident = $idx:expr => $label:expr),* $(,)?) => {
        $(pub const $name: NvHandle = NvHandle($idx);)*
        const BUILTIN_NAMES: &[(&str, NvHandle)] = &[$(($label, $name)),*];
    };
}

builtin_handles! {
    HOST = 0 => "HOST",
    PROGRAM = 1 => "PROGRAM",
    PID = 2 => "PID",
    MSGID = 3 => "MSGID",
    MESSAGE = 4 => "MESSAGE",
    HOST_FROM = 5 => "HOST_FROM",
    LEGACY_MSGHDR = 6 => "LEGACY_MSGHDR",
    SOURCE = 7 => "SOURCE",
}

const FIRST_DYNAMIC_HANDLE: u32 = 8;

/// The process-wide name-value handle registry.
pub struct NameValueRegistry {
    by_name: DashMap<String, NvHandle>,
    by_handle: DashMap<u32, String>,
    next: AtomicU32,
}

impl NameValueRegistry {
    fn new() -> Self {
        let reg = Self {
            by_name: DashMap::new(),
            by_handle: DashMap::new(),
            next: AtomicU32::new(FIRST_DYNAMIC_HANDLE),
        };
        for (name, handle) in BUILTIN_NAMES {
            reg.by_name.insert((*name).to_string(), *handle);
            reg.by_handle.insert(handle.0, (*name).to_string());
        }
        reg
    }

    /// Returns the handle for `name`, allocating a fresh one if this is the
    /// first time the name has been seen.
    pub fn intern(&self, name: &str) -> NvHandle {
        if let Some(existing) = self.by_name.get(name) {
            return *existing;
        }
        // Entry API avoids a second insert racing us between the get above
        // and the insert below.
        *self.by_name.entry(name.to_string()).or_insert_with(|| {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            let handle = NvHandle(id);
            self.by_handle.insert(id, name.to_string());
            handle
        })
    }

    /// Looks up a handle without allocating; used by readers that must not
    /// intern unknown names (e.g. filter expressions referencing `$FOO`).
    pub fn lookup(&self, name: &str) -> Option<NvHandle> {
        self.by_name.get(name).map(|r| *r)
    }

    pub fn name_of(&self, handle: NvHandle) -> Option<String> {
        self.by_handle.get(&handle.0).map(|r| r.clone())
    }
}

static NV_REGISTRY: OnceLock<NameValueRegistry> = OnceLock::new();

pub fn global_nv_registry() -> &'static NameValueRegistry {
    NV_REGISTRY.get_or_init(NameValueRegistry::new)
}

/// A small integer identifying an interned tag name. Separate from
/// [`NvHandle`] because tags form a set per message, not a key-value table
/// (spec.md §3: "a set of tag ids").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub(crate) u32);

pub struct TagRegistry {
    by_name: DashMap<String, TagId>,
    by_id: DashMap<u32, String>,
    next: AtomicU32,
}

impl TagRegistry {
    fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_id: DashMap::new(),
            next: AtomicU32::new(0),
        }
    }

    pub fn intern(&self, name: &str) -> TagId {
        if let Some(existing) = self.by_name.get(name) {
            return *existing;
        }
        *self.by_name.entry(name.to_string()).or_insert_with(|| {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            self.by_id.insert(id, name.to_string());
            TagId(id)
        })
    }

    pub fn name_of(&self, id: TagId) -> Option<String> {
        self.by_id.get(&id.0).map(|r| r.clone())
    }
}

static TAG_REGISTRY: OnceLock<TagRegistry> = OnceLock::new();

pub fn global_tag_registry() -> &'static TagRegistry {
    TAG_REGISTRY.get_or_init(TagRegistry::new)
}
