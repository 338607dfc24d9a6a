//! Two-phase compiler from a [`CfgTree`] to a [`ConfigArena`] (spec.md §4.3
//! "Compile algorithm").
//!
//! Phase 1 prepends every registered source to a `catch-all` rule's body as
//! an implicit reference. Phase 2 lowers each node: `Single` inlines on first
//! use and clones on subsequent ones, `Reference` resolves a named lookup and
//! either shares a source's tail multiplexer, forks a fresh multiplexer down
//! to a destination, or falls through to the `Single` pathway for
//! filter/parser/rewrite, `Sequence` chains children through `next`, and
//! `Junction` forks non-source branches through a shared multiplexer that
//! re-converges on a join pipe.
//!
//! A node's `content` tag is the only thing this compiler trusts to decide
//! "is this a source/destination" — `Sequence`/`Junction` container nodes are
//! expected to carry `Content::Pipe` themselves even when every branch they
//! hold resolves to a source (spec.md is silent on this particular nesting;
//! recorded as a judgment call in DESIGN.md).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ConfigError, SourceLocation};
use crate::pipe::{ConfigArena, Dispatch, Identity, Multiplexer, PathOptions, PipeContent, PipeFlags, PipeId, PipeNode};
use crate::message::Message;

use super::node::{CfgTree, Content, LcFlags, Layout, NodeId};

/// The result of one compile pass: the arena every pipe now lives in, and the
/// entry point for each distinct source that was actually referenced.
/// Sources with zero references compile to nothing and never appear here.
pub struct CompiledGraph {
    pub arena: ConfigArena,
    pub roots: Vec<PipeId>,
}

/// What compiling one node (or a slice of a sequence's children) produced.
enum Compiled {
    /// An ordinary pipe a caller can link `next` into or chain onward from.
    Entry(PipeId),
    /// Everything from this point on was consumed into a source's hop
    /// registration; nothing here to chain into locally (spec.md §4.3
    /// "sources have no caller, only a driver").
    SourceFed,
}

impl Compiled {
    fn require_entry(self, loc: &SourceLocation) -> Result<PipeId, ConfigError> {
        match self {
            Compiled::Entry(id) => Ok(id),
            Compiled::SourceFed => Err(ConfigError::SourceAfterNonSource { location: loc.clone() }),
        }
    }
}

struct PendingSource {
    /// The compiled driver chain — what a real driver calls `queue` on.
    head: PipeId,
    /// An `Identity` placeholder allocated up front so `head`'s `next` can
    /// point somewhere stable; replaced with the real tail `Multiplexer`
    /// once every reference has registered its hop.
    tail_placeholder: PipeId,
}

struct CompileCtx<'a> {
    tree: &'a CfgTree,
    arena: ConfigArena,
    /// `Layout::Single` targets already compiled once (filter/parser/rewrite
    /// references, spec.md §4.3 "inlined via the Single pathway").
    single_used: HashMap<NodeId, PipeId>,
    /// Named destination definitions, compiled and memoized once; every
    /// reference forks a fresh multiplexer down to the same pipe id.
    dest_cache: HashMap<NodeId, PipeId>,
    sources: HashMap<NodeId, PendingSource>,
    source_hops: HashMap<NodeId, Vec<PipeId>>,
    /// Preserves the order sources were first referenced in, so compile runs
    /// are deterministic (Testable Property 1: two compiles of the same
    /// tree are isomorphic).
    source_order: Vec<NodeId>,
}

impl<'a> CompileCtx<'a> {
    fn new(tree: &'a CfgTree) -> Self {
        Self {
            tree,
            arena: ConfigArena::new(),
            single_used: HashMap::new(),
            dest_cache: HashMap::new(),
            sources: HashMap::new(),
            source_hops: HashMap::new(),
            source_order: Vec::new(),
        }
    }

    fn is_source_content(&self, id: NodeId) -> bool {
        self.tree.node(id).content == Content::Source
    }

    fn effective_kind(&self, id: NodeId) -> EffectiveKind {
        let node = self.tree.node(id);
        if node.layout == Layout::Reference {
            match node.content {
                Content::Source => return EffectiveKind::SourceRef(id),
                Content::Destination => return EffectiveKind::DestinationRef(id),
                _ => {}
            }
        }
        EffectiveKind::Ordinary
    }

    /// Lowers a sequence's children in order. `injected_tail`, when present,
    /// is what the *last* pipe in this list (or an empty list) should
    /// forward to — the junction join anchor a branch re-converges on, or
    /// `None` at the top level where nothing follows a rule.
    fn compile_child_list(&mut self, children: &[NodeId], injected_tail: Option<PipeId>) -> Result<Compiled, ConfigError> {
        if children.is_empty() {
            let id = self.arena.alloc(PipeNode::new(PipeContent::Behavior(Arc::new(Identity)), "identity"));
            if let Some(tail) = injected_tail {
                self.arena.set_next(id, tail);
            }
            return Ok(Compiled::Entry(id));
        }

        self.validate_source_ordering(children)?;

        let (&first, rest) = children.split_first().expect("checked non-empty above");
        match self.effective_kind(first) {
            EffectiveKind::SourceRef(source_ref) => {
                let remainder = self.compile_child_list(rest, injected_tail)?;
                let remainder_entry = remainder.require_entry(&self.tree.node(first).location)?;
                self.register_source_hop(source_ref, remainder_entry)?;
                Ok(Compiled::SourceFed)
            }
            EffectiveKind::DestinationRef(dest_ref) => {
                let remainder = self.compile_child_list(rest, injected_tail)?;
                let remainder_entry = remainder.require_entry(&self.tree.node(first).location)?;
                let dest_pipe = self.compile_destination_ref(dest_ref)?;
                let mux = Multiplexer::new(&self.arena, vec![dest_pipe], false, Some(remainder_entry));
                let fork_id = self.arena.alloc(PipeNode::new(PipeContent::Multiplexer(mux), "destination-fork"));
                Ok(Compiled::Entry(fork_id))
            }
            EffectiveKind::Ordinary => {
                let this_pipe = self.compile_node(first)?;
                match self.compile_child_list(rest, injected_tail)? {
                    Compiled::Entry(next_id) => self.arena.set_next(this_pipe, next_id),
                    Compiled::SourceFed => {
                        // A non-source child may not precede a source child;
                        // validate_source_ordering above already rejects this.
                        unreachable!("source-after-non-source already rejected")
                    }
                }
                Ok(Compiled::Entry(this_pipe))
            }
        }
    }

    fn validate_source_ordering(&self, children: &[NodeId]) -> Result<(), ConfigError> {
        let mut seen_non_source = false;
        for &child in children {
            if self.is_source_content(child) {
                if seen_non_source {
                    return Err(ConfigError::SourceAfterNonSource { location: self.tree.node(child).location.clone() });
                }
            } else {
                seen_non_source = true;
            }
        }
        Ok(())
    }

    /// Compiles an ordinary (non source/destination-reference) node into a
    /// single entry pipe.
    fn compile_node(&mut self, id: NodeId) -> Result<PipeId, ConfigError> {
        let node_layout = self.tree.node(id).layout;
        let pipe_id = match node_layout {
            Layout::Single => self.compile_single(id)?,
            Layout::Reference => self.compile_named_reference(id)?,
            Layout::Sequence => {
                let children = self.tree.node(id).children.clone();
                self.compile_child_list(&children, None)?.require_entry(&self.tree.node(id).location)?
            }
            Layout::Junction => self.compile_junction(id)?,
        };
        self.apply_container_flags(id, pipe_id);
        Ok(pipe_id)
    }

    /// `Layout::Reference` for filter/parser/rewrite/generic-pipe content:
    /// resolves the named target and inlines it through the `Single`
    /// pathway (first use kept as-is, subsequent uses cloned).
    fn compile_named_reference(&mut self, ref_id: NodeId) -> Result<PipeId, ConfigError> {
        let node = self.tree.node(ref_id);
        let content = node.content;
        let name = node.name.clone().ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: content_label(content),
            name: String::new(),
        })?;
        let target = self.tree.resolve(content, &name).ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: content_label(content),
            name: name.clone(),
        })?;
        self.compile_single(target)
    }

    /// Compiles `target` once, inlining it on first use and cloning a fresh
    /// instance via its [`PipeFactory`](super::node::PipeFactory) on every
    /// later use (spec.md §4.3 "Single (definition)").
    fn compile_single(&mut self, target: NodeId) -> Result<PipeId, ConfigError> {
        if let Some(&first_use) = self.single_used.get(&target) {
            let node = self.tree.node(target);
            // Stateful content (a filter/parser explicitly marked stateful)
            // never clones; reuse the same instance instead of fabricating a
            // second one.
            let object = node.object.clone().ok_or_else(|| ConfigError::InitFailed {
                location: node.location.clone(),
                plugin_name: "<anonymous>".to_string(),
            })?;
            if object.is_stateful() {
                return Ok(first_use);
            }
            let behavior = object.create();
            let id = self.arena.alloc(PipeNode::new(PipeContent::Behavior(behavior), object.plugin_name()));
            return Ok(id);
        }

        let node = self.tree.node(target);
        let pipe_id = match node.layout {
            Layout::Single => {
                let object = node.object.clone().ok_or_else(|| ConfigError::InitFailed {
                    location: node.location.clone(),
                    plugin_name: "<anonymous>".to_string(),
                })?;
                let behavior = object.create();
                self.arena.alloc(
                    PipeNode::new(PipeContent::Behavior(behavior), object.plugin_name()).with_flags(PipeFlags::INLINED),
                )
            }
            Layout::Sequence => {
                let children = node.children.clone();
                self.compile_child_list(&children, None)?.require_entry(&node.location)?
            }
            Layout::Junction => self.compile_junction(target)?,
            Layout::Reference => self.compile_named_reference(target)?,
        };
        self.single_used.insert(target, pipe_id);
        Ok(pipe_id)
    }

    fn compile_destination_ref(&mut self, ref_id: NodeId) -> Result<PipeId, ConfigError> {
        let node = self.tree.node(ref_id);
        let name = node.name.clone().ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: "destination",
            name: String::new(),
        })?;
        let target = self.tree.resolve(Content::Destination, &name).ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: "destination",
            name: name.clone(),
        })?;
        if let Some(&id) = self.dest_cache.get(&target) {
            return Ok(id);
        }
        let id = self.compile_node(target)?;
        self.dest_cache.insert(target, id);
        Ok(id)
    }

    /// Ensures `target` (a named source definition) has been compiled once,
    /// allocating its driver chain and a placeholder tail it will point at.
    fn ensure_source_compiled(&mut self, target: NodeId) -> Result<(), ConfigError> {
        if self.sources.contains_key(&target) {
            return Ok(());
        }
        let node = self.tree.node(target);
        let head = match node.layout {
            Layout::Single => {
                let object = node.object.clone().ok_or_else(|| ConfigError::InitFailed {
                    location: node.location.clone(),
                    plugin_name: "<anonymous>".to_string(),
                })?;
                let behavior = object.create();
                self.arena.alloc(
                    PipeNode::new(PipeContent::Behavior(behavior), object.plugin_name())
                        .with_flags(PipeFlags::SOURCE | PipeFlags::INLINED),
                )
            }
            Layout::Sequence => {
                let children = node.children.clone();
                self.compile_child_list(&children, None)?.require_entry(&node.location)?
            }
            _ => {
                return Err(ConfigError::InitFailed {
                    location: node.location.clone(),
                    plugin_name: node.name.clone().unwrap_or_default(),
                })
            }
        };
        self.apply_container_flags(target, head);
        let tail_placeholder = self.arena.alloc(PipeNode::new(PipeContent::Behavior(Arc::new(Identity)), "source-tail"));
        // Walk to the actual end of the driver chain before wiring the tail —
        // `head` itself may already have a `next` set by compile_child_list
        // when the source definition is a multi-step sequence.
        let mut tail = head;
        while let Some(next) = self.arena.get(tail).next {
            tail = next;
        }
        self.arena.set_next(tail, tail_placeholder);
        self.sources.insert(target, PendingSource { head, tail_placeholder });
        self.source_order.push(target);
        Ok(())
    }

    fn register_source_hop(&mut self, source_ref: NodeId, continuation: PipeId) -> Result<(), ConfigError> {
        let node = self.tree.node(source_ref);
        let name = node.name.clone().ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: "source",
            name: String::new(),
        })?;
        let target = self.tree.resolve(Content::Source, &name).ok_or_else(|| ConfigError::UnresolvedReference {
            location: node.location.clone(),
            content_kind: "source",
            name: name.clone(),
        })?;
        self.register_source_hop_by_target(target, continuation)
    }

    fn register_source_hop_by_target(&mut self, target: NodeId, continuation: PipeId) -> Result<(), ConfigError> {
        self.ensure_source_compiled(target)?;
        self.source_hops.entry(target).or_default().push(continuation);
        Ok(())
    }

    fn compile_junction(&mut self, junction_id: NodeId) -> Result<PipeId, ConfigError> {
        let branches = self.tree.node(junction_id).children.clone();
        let join = self.arena.alloc(PipeNode::new(PipeContent::Behavior(Arc::new(Identity)), "junction-join"));

        let mut non_source_heads = Vec::new();
        let mut saw_source = false;
        let mut saw_non_source = false;

        for &branch in &branches {
            let branch_children = if self.tree.node(branch).layout == Layout::Sequence {
                self.tree.node(branch).children.clone()
            } else {
                vec![branch]
            };
            match self.compile_child_list(&branch_children, Some(join))? {
                Compiled::SourceFed => saw_source = true,
                Compiled::Entry(head) => {
                    saw_non_source = true;
                    non_source_heads.push(head);
                }
            }
        }

        if saw_source && saw_non_source {
            return Err(ConfigError::MixedJunctionBranch { location: self.tree.node(junction_id).location.clone() });
        }

        if non_source_heads.is_empty() {
            // Every branch fed a source; nothing locally callable. `join` is
            // returned purely so a caller expecting a plain `PipeId` has
            // somewhere inert to point at — see the module doc comment on
            // the source/non-source nesting judgment call.
            return Ok(join);
        }

        let fork = Multiplexer::new(&self.arena, non_source_heads, true, Some(join));
        Ok(self.arena.alloc(PipeNode::new(PipeContent::Multiplexer(fork), "junction-fork")))
    }

    fn apply_container_flags(&mut self, node_id: NodeId, pipe_id: PipeId) {
        let node = self.tree.node(node_id);
        let mut bits = 0u32;
        if node.flags.contains(LcFlags::FINAL) {
            bits |= PipeFlags::BRANCH_FINAL;
        }
        if node.flags.contains(LcFlags::FALLBACK) {
            bits |= PipeFlags::BRANCH_FALLBACK;
        }
        if node.flags.contains(LcFlags::FLOW_CONTROL) {
            bits |= PipeFlags::HARD_FLOW_CONTROL;
        }
        if node.flags.contains(LcFlags::DROP_UNMATCHED) {
            bits |= PipeFlags::DROP_UNMATCHED;
        }
        let name = node.name.clone();
        if bits != 0 {
            self.arena.get(pipe_id).set_flags(bits);
        }
        let pipe = self.arena.get_mut(pipe_id);
        if pipe.persistent_name.is_none() {
            pipe.persistent_name = name;
        }
    }

    /// Replaces every source's placeholder tail with its real multiplexer,
    /// now that every reference across every rule has registered its hop.
    fn finalize_source_tails(&mut self) {
        for target in self.source_order.clone() {
            let tail_placeholder = self.sources[&target].tail_placeholder;
            let hops = self.source_hops.remove(&target).unwrap_or_default();
            let mux = Multiplexer::new(&self.arena, hops, true, None);
            self.arena.replace_content(tail_placeholder, PipeContent::Multiplexer(mux));
        }
    }

    fn roots(&self) -> Vec<PipeId> {
        self.source_order.iter().map(|t| self.sources[t].head).collect()
    }

    fn verify_unique_persistent_names(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for (_, name) in self.arena.named_pipes() {
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicatePersistentName { name: name.to_string() });
            }
        }
        Ok(())
    }
}

enum EffectiveKind {
    SourceRef(NodeId),
    DestinationRef(NodeId),
    Ordinary,
}

fn content_label(content: Content) -> &'static str {
    match content {
        Content::Pipe => "pipe",
        Content::Source => "source",
        Content::Filter => "filter",
        Content::Parser => "parser",
        Content::Rewrite => "rewrite",
        Content::Destination => "destination",
    }
}

/// Compiles `tree` into a fresh [`ConfigArena`]. Any [`ConfigError`] aborts
/// the whole compile; the caller is left holding whatever graph it already
/// had (spec.md §4.3 "Failure semantics" — this function never mutates
/// anything outside its own, freshly allocated arena).
pub fn compile(tree: &CfgTree) -> Result<CompiledGraph, ConfigError> {
    let mut ctx = CompileCtx::new(tree);

    for &rule in &tree.rules {
        let node = tree.node(rule);
        let children = node.children.clone();
        if node.flags.contains(LcFlags::CATCH_ALL) {
            let body = ctx.compile_child_list(&children, None)?;
            let body_entry = body.require_entry(&node.location)?;
            for &src in &tree.sources {
                ctx.register_source_hop_by_target(src, body_entry)?;
            }
        } else {
            ctx.compile_child_list(&children, None)?;
        }
    }

    ctx.finalize_source_tails();
    ctx.verify_unique_persistent_names()?;
    let roots = ctx.roots();
    Ok(CompiledGraph { arena: ctx.arena, roots })
}

/// Drives one hop's downstream chain to completion, used by the runtime's
/// multiplexer integration (`crate::runtime`) and exercised directly in this
/// module's tests via a trivial trampoline.
pub(crate) fn run_chain(arena: &ConfigArena, mut id: PipeId, mut msg: Message, path: &mut PathOptions) {
    loop {
        let node = arena.get(id);
        match &node.content {
            PipeContent::Behavior(behavior) => match behavior.queue(&mut msg, path) {
                Dispatch::Forward(next) => id = next,
                Dispatch::Done => {
                    if let Some(next) = node.next {
                        id = next;
                    } else {
                        return;
                    }
                }
            },
            PipeContent::Multiplexer(mux) => {
                let continuation = mux.continuation();
                mux.dispatch(&msg, path, |hop, branch_msg, branch_path| {
                    run_chain(arena, hop, branch_msg, branch_path);
                });
                match continuation {
                    Some(next) => id = next,
                    None => return,
                }
            }
        }
    }
}
