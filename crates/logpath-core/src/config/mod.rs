//! Declarative configuration tree and the compiler that lowers it into a
//! runnable [`crate::pipe::ConfigArena`] (spec.md §4.3).

pub mod compiler;
pub mod node;

pub use compiler::{compile, CompiledGraph};
pub use node::{CfgTree, Content, LcFlags, Layout, LogExprNode, NodeId, PipeFactory};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use crate::error::ConfigError;

/// The currently-live compiled graph, swapped atomically on reload.
///
/// An `ArcSwap` publishes the current snapshot lock-free for readers on the
/// hot path, a `Mutex` serialises concurrent reload attempts so two
/// configuration reloads never race each other, and a sequence counter lets
/// callers observe that a reload actually took effect.
pub struct GraphHandle {
    current: ArcSwap<CompiledGraph>,
    mutation: Mutex<()>,
    generation: AtomicU64,
}

impl GraphHandle {
    pub fn new(initial: CompiledGraph) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            mutation: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// The snapshot the dispatch runtime should use for the next message it
    /// receives. Lock-free; safe to call from every worker thread.
    pub fn load(&self) -> Arc<CompiledGraph> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Compiles `tree` and publishes it if it compiles cleanly. On
    /// [`ConfigError`] the previously published graph is left untouched
    /// (spec.md §4.3 "Failure semantics" — "aborts the entire reload, leaves
    /// the previous compiled graph intact").
    pub fn reload(&self, tree: &CfgTree) -> Result<(), ConfigError> {
        let _guard = self.mutation.lock().expect("mutation mutex poisoned");
        let graph = compile(tree)?;
        self.current.store(Arc::new(graph));
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
