//! The compiled runtime graph (spec.md §3 "Pipe", §9 "Virtual dispatch").
//!
//! A pipe is modeled as a capability interface ([`PipeBehavior`]) for the
//! small closed set of content kinds {source, destination, filter, parser,
//! rewrite, identity} plus a distinguished [`Multiplexer`] variant, stored in
//! a flat, relocatable [`ConfigArena`] and addressed by [`PipeId`] — an
//! index, not a borrowed pointer (spec.md §9: "a safer target-language
//! representation is an index into the arena"), the same index-based handle
//! discipline a hot-reloadable handler graph needs rather than a raw/`&'a`
//! reference.

pub mod flags;
pub mod multiplexer;
pub mod path_options;

pub use flags::PipeFlags;
pub use multiplexer::Multiplexer;
pub use path_options::PathOptions;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::message::Message;

/// Index of a pipe inside a [`ConfigArena`]. Stable for the arena's
/// lifetime; a reload builds a brand new arena rather than mutating an
/// existing one in place, so indices never dangle across a reload (spec.md
/// §9 "Cyclic references").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PipeId(pub(crate) u32);

impl PipeId {
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// What happens to a message's traversal after one pipe's `queue` call
/// returns. The dispatch runtime (`crate::runtime`) trampolines on
/// [`Dispatch::Forward`] rather than recursing, bounding stack depth for
/// arbitrarily deep sequences (spec.md §9 "Coroutines / async").
pub enum Dispatch {
    /// Continue the trampoline at this pipe next.
    Forward(PipeId),
    /// This branch is fully resolved: either the message was handed to a
    /// driver/queue that owns the rest of its lifecycle, or it was dropped
    /// and acked here.
    Done,
}

/// Behavior for the non-multiplexer content kinds (spec.md §3: "source,
/// destination, filter, parser, rewrite" — `identity` is the trivial
/// `Forward`-only impl used to give an empty sequence somewhere for flags to
/// land, spec.md §4.3).
///
/// The concrete filtering/parsing/driver logic these wrap is out of scope
/// here (spec.md §1); what the core owns is the capability surface and its
/// interaction with flags, path options and the ack chain.
pub trait PipeBehavior: Send + Sync {
    /// The hot path. Must guarantee that either the message continues via
    /// the returned [`Dispatch`], or `msg.ack_chain().ack(..)` has already
    /// been called for this branch.
    fn queue(&self, msg: &mut Message, path: &mut PathOptions) -> Dispatch;

    /// Upward notification from a driver (`reopen-required`, `file-moved`,
    /// ...); the default forwards along `next`, matching spec.md §4.2.
    fn notify(&self, _code: u32, _data: &[u8]) {}

    /// Only pipes that participate in references need to clone (spec.md
    /// §4.2); stateful pipes (sources, destinations) return `None` and the
    /// compiler handles them by sharing the compiled instance instead.
    fn clone_behavior(&self) -> Option<Arc<dyn PipeBehavior>> {
        None
    }
}

/// The trivial pipe used to give an empty sequence a pipe to hang flags on
/// (spec.md §4.3: "Empty sequences materialise as a single identity pipe").
pub struct Identity;

impl PipeBehavior for Identity {
    fn queue(&self, _msg: &mut Message, _path: &mut PathOptions) -> Dispatch {
        Dispatch::Done
    }

    fn clone_behavior(&self) -> Option<Arc<dyn PipeBehavior>> {
        Some(Arc::new(Identity))
    }
}

/// What a pipe actually does when queued: either ordinary behavior, or
/// fan-out (spec.md §3: multiplexers are a distinct pipe subtype).
pub enum PipeContent {
    Behavior(Arc<dyn PipeBehavior>),
    Multiplexer(Multiplexer),
}

/// One node in a compiled graph: flags, a `next` index, identifying
/// metadata for diagnostics, and its content (spec.md §3 "Pipe").
pub struct PipeNode {
    flags: AtomicU32,
    pub next: Option<PipeId>,
    pub persistent_name: Option<String>,
    pub plugin_name: &'static str,
    pub content: PipeContent,
}

impl PipeNode {
    pub fn new(content: PipeContent, plugin_name: &'static str) -> Self {
        Self {
            flags: AtomicU32::new(0),
            next: None,
            persistent_name: None,
            plugin_name,
            content,
        }
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        *self.flags.get_mut() = flags;
        self
    }

    pub fn with_next(mut self, next: PipeId) -> Self {
        self.next = Some(next);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.persistent_name = Some(name.into());
        self
    }

    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    pub fn has_flag(&self, bit: u32) -> bool {
        self.flags() & bit != 0
    }

    /// Ors `bits` into this pipe's flags. Takes `&self` since flags are
    /// stored atomically — the compiler calls this after allocation, once
    /// container-level flags (spec.md §6 "Configuration grammar") are known.
    pub fn set_flags(&self, bits: u32) {
        self.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Idempotent; the runtime is the sole caller (spec.md §4.2).
    pub fn mark_initialized(&self) -> bool {
        self.flags.fetch_or(PipeFlags::INITIALIZED, Ordering::AcqRel) & PipeFlags::INITIALIZED == 0
    }

    /// Idempotent; returns whether this call actually transitioned the bit.
    pub fn mark_deinitialized(&self) -> bool {
        self.flags.fetch_and(!PipeFlags::INITIALIZED, Ordering::AcqRel) & PipeFlags::INITIALIZED != 0
    }
}

/// A flat, relocatable arena owning every pipe compiled from one
/// configuration reload (spec.md §9: "The `next` chain is a flat vector of
/// such variants within the arena").
#[derive(Default)]
pub struct ConfigArena {
    nodes: Vec<PipeNode>,
}

impl ConfigArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, node: PipeNode) -> PipeId {
        let id = PipeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: PipeId) -> &PipeNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: PipeId) -> &mut PipeNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Wires `id.next` after the fact — the compiler allocates pipes before
    /// it knows what follows them in a sequence.
    pub fn set_next(&mut self, id: PipeId, next: PipeId) {
        self.nodes[id.0 as usize].next = Some(next);
    }

    /// Replaces the content of an already-allocated pipe in place, used to
    /// finalize a source's tail multiplexer once every reference to it has
    /// been compiled and its hop list is fully known (spec.md §4.3
    /// "Reference (named lookup)").
    pub fn replace_content(&mut self, id: PipeId, content: PipeContent) {
        self.nodes[id.0 as usize].content = content;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = PipeId> + '_ {
        (0..self.nodes.len() as u32).map(PipeId)
    }

    /// All pipes carrying a non-null persistent name, for the post-compile
    /// uniqueness check (spec.md §4.3 "Post-compile verification").
    pub fn named_pipes(&self) -> impl Iterator<Item = (PipeId, &str)> {
        self.ids().filter_map(move |id| {
            self.get(id)
                .persistent_name
                .as_deref()
                .map(|name| (id, name))
        })
    }
}
