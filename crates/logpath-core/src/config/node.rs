//! The declarative configuration tree, prior to compile (spec.md §3 "Log
//! expression node", §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SourceLocation;
use crate::pipe::PipeBehavior;

/// How a node's children combine (spec.md §3 "layout").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Wraps a single concrete pipe (`object`).
    Single,
    /// A named lookup, resolved by `(content, name)`.
    Reference,
    /// Children linked in order through `next`.
    Sequence,
    /// Children compiled as independent parallel branches that re-converge.
    Junction,
}

/// What kind of pipe a node ultimately produces (spec.md §3 "content").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Content {
    Pipe,
    Source,
    Filter,
    Parser,
    Rewrite,
    Destination,
}

impl Content {
    pub fn is_source(self) -> bool {
        matches!(self, Content::Source)
    }
}

/// The `LC_*` flag set a container node (a `log { ... }` block or a named
/// definition) may carry (spec.md §6 "Configuration grammar").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LcFlags(pub u32);

impl LcFlags {
    pub const CATCH_ALL: u32 = 1 << 0;
    pub const FALLBACK: u32 = 1 << 1;
    pub const FINAL: u32 = 1 << 2;
    pub const FLOW_CONTROL: u32 = 1 << 3;
    pub const DROP_UNMATCHED: u32 = 1 << 4;

    pub const fn contains(self, bit: u32) -> bool {
        self.0 & bit != 0
    }
}

/// A factory for the concrete [`PipeBehavior`] a `Layout::Single` node
/// wraps. Kept separate from `PipeBehavior` itself so the compiler can ask
/// "is this stateful" (sources/destinations refuse to clone, spec.md §4.2)
/// without having already constructed an instance.
pub trait PipeFactory: Send + Sync {
    fn create(&self) -> Arc<dyn PipeBehavior>;
    fn plugin_name(&self) -> &'static str;
    /// Stateful pipes (sources, destinations) are compiled once and shared
    /// through a multiplexer rather than cloned per reference.
    fn is_stateful(&self) -> bool {
        false
    }
}

/// Index of a node inside a [`CfgTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

pub struct LogExprNode {
    pub layout: Layout,
    pub content: Content,
    pub name: Option<String>,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub location: SourceLocation,
    pub flags: LcFlags,
    pub object: Option<Arc<dyn PipeFactory>>,
}

impl LogExprNode {
    pub fn new(layout: Layout, content: Content, location: SourceLocation) -> Self {
        Self {
            layout,
            content,
            name: None,
            children: Vec::new(),
            parent: None,
            location,
            flags: LcFlags::default(),
            object: None,
        }
    }
}

/// The full declarative tree handed to the compiler (spec.md §4.3 "Input").
#[derive(Default)]
pub struct CfgTree {
    nodes: Vec<LogExprNode>,
    named: HashMap<(Content, String), NodeId>,
    /// Unnamed top-level `log { ... }` rules, in declaration order.
    pub rules: Vec<NodeId>,
    /// Every named source definition, used to prepend catch-all rules
    /// (spec.md §4.3 "Phase 1").
    pub sources: Vec<NodeId>,
    anon_counters: HashMap<&'static str, u32>,
}

impl CfgTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: LogExprNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: NodeId) -> &LogExprNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut LogExprNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn set_child_parent(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Registers `id` as the (content, name) definition resolved by future
    /// `Layout::Reference` lookups.
    pub fn define(&mut self, content: Content, name: impl Into<String>, id: NodeId) {
        let name = name.into();
        if content.is_source() {
            self.sources.push(id);
        }
        self.node_mut(id).name = Some(name.clone());
        self.named.insert((content, name), id);
    }

    pub fn resolve(&self, content: Content, name: &str) -> Option<NodeId> {
        self.named.get(&(content, name.to_string())).copied()
    }

    pub fn add_rule(&mut self, id: NodeId) {
        self.rules.push(id);
    }

    /// Synthesises `#anon-<content><counter>` for an unnamed container
    /// (spec.md §4.3 "Naming and anonymous rules").
    pub fn anon_name(&mut self, content_label: &'static str) -> String {
        let counter = self.anon_counters.entry(content_label).or_insert(0);
        let name = format!("#anon-{content_label}{counter}");
        *counter += 1;
        name
    }
}
