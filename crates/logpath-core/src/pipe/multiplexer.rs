//! Fan-out pipe subtype (spec.md §3 "Multiplexer", §4.2).

use crate::message::Message;

use super::path_options::PathOptions;
use super::{ConfigArena, PipeFlags, PipeId};

/// An ordered set of next-hops, with fallback/final semantics cached at
/// construction time (spec.md §3: `fallback_exists` is "cached at init").
pub struct Multiplexer {
    hops: Vec<PipeId>,
    is_fallback: Vec<bool>,
    is_branch_final: Vec<bool>,
    fallback_exists: bool,
    pub delivery_propagation: bool,
    /// The `next` this multiplexer continues along after dispatching its
    /// hops — populated for destination fan-out (a reference forks down to
    /// the destination and continues the original message along `next`),
    /// left `None` for source tails and junction heads (spec.md §3: "It has
    /// no `next` in the classic sense when used at a source tail or
    /// junction head").
    continuation: Option<PipeId>,
}

impl Multiplexer {
    pub fn new(arena: &ConfigArena, hops: Vec<PipeId>, delivery_propagation: bool, continuation: Option<PipeId>) -> Self {
        let is_fallback: Vec<bool> = hops.iter().map(|&h| arena.get(h).has_flag(PipeFlags::BRANCH_FALLBACK)).collect();
        let is_branch_final: Vec<bool> = hops.iter().map(|&h| arena.get(h).has_flag(PipeFlags::BRANCH_FINAL)).collect();
        let fallback_exists = is_fallback.iter().any(|&b| b);
        Self {
            hops,
            is_fallback,
            is_branch_final,
            fallback_exists,
            delivery_propagation,
            continuation,
        }
    }

    pub fn hops(&self) -> &[PipeId] {
        &self.hops
    }

    pub fn continuation(&self) -> Option<PipeId> {
        self.continuation
    }

    pub fn fallback_exists(&self) -> bool {
        self.fallback_exists
    }

    /// Fans `msg` out per spec.md §4.2: write-protect, deliver to every
    /// non-fallback hop in order (a `branch-final` hop that matched stops
    /// further non-fallback iteration), and if nothing matched and a
    /// fallback hop exists, deliver to the fallback hops. `dispatch_branch`
    /// drives one hop's entire downstream chain and must leave
    /// `branch_path.matched()` reflecting that branch's outcome when it
    /// returns.
    ///
    /// Ack bookkeeping (spec.md §4.4 "`add_ack` is called exactly once per
    /// branch"): the single pending unit this call arrived with is handed
    /// to `continuation` if one exists (the trampoline just keeps going, no
    /// new branch was created), otherwise to the first hop actually
    /// dispatched; every hop after the first gets its own `add_ack(1)`
    /// immediately before it runs, so the chain is never short a pending
    /// unit even when `branch-final`/fallback make the dispatched set only
    /// known at runtime. If no hop is dispatched and there is no
    /// continuation, the arriving unit is acked `Aborted` here — nothing
    /// downstream was even instructed to ack it.
    ///
    /// Returns whether any hop matched, and folds that into `path` when
    /// `delivery_propagation` is set.
    pub fn dispatch(
        &self,
        msg: &Message,
        path: &mut PathOptions,
        mut dispatch_branch: impl FnMut(PipeId, Message, &mut PathOptions),
    ) -> bool {
        if self.hops.len() > 1 || (self.continuation.is_some() && !self.hops.is_empty()) {
            msg.write_protect();
        }

        let mut any_matched = false;
        let mut dispatched = false;
        let mut reuse_slot = self.continuation.is_none();

        for (idx, &hop) in self.hops.iter().enumerate() {
            if self.is_fallback[idx] {
                continue;
            }
            if reuse_slot {
                reuse_slot = false;
            } else {
                msg.ack_chain().add_ack(1);
            }
            dispatched = true;
            let mut branch_path = path.clone();
            dispatch_branch(hop, msg.clone(), &mut branch_path);
            let matched = branch_path.matched();
            any_matched |= matched;
            if self.is_branch_final[idx] && matched {
                break;
            }
        }

        if !any_matched && self.fallback_exists {
            for (idx, &hop) in self.hops.iter().enumerate() {
                if !self.is_fallback[idx] {
                    continue;
                }
                if reuse_slot {
                    reuse_slot = false;
                } else {
                    msg.ack_chain().add_ack(1);
                }
                dispatched = true;
                let mut branch_path = path.clone();
                dispatch_branch(hop, msg.clone(), &mut branch_path);
                any_matched |= branch_path.matched();
            }
        }

        if !dispatched && self.continuation.is_none() {
            msg.ack_chain().ack(crate::message::AckOutcome::Aborted);
        }

        if self.delivery_propagation {
            path.set_matched(any_matched);
        }
        any_matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AckSink, ParseOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullSink;
    impl AckSink for NullSink {
        fn on_ack(&self, _outcome: crate::message::AckOutcome) {}
    }

    fn fresh_message() -> Message {
        Message::new(b"payload", &ParseOptions::default(), Arc::new(NullSink))
    }

    fn arena_with_flagged_hops(flags: &[u32]) -> (ConfigArena, Vec<PipeId>) {
        let mut arena = ConfigArena::new();
        let ids = flags
            .iter()
            .map(|&f| {
                arena.alloc(
                    super::super::PipeNode::new(
                        super::super::PipeContent::Behavior(Arc::new(super::super::Identity)),
                        "identity",
                    )
                    .with_flags(f),
                )
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn fallback_hop_only_receives_when_nothing_else_matched() {
        let (arena, hops) = arena_with_flagged_hops(&[0, 0, PipeFlags::BRANCH_FALLBACK]);
        let mux = Multiplexer::new(&arena, hops.clone(), true, None);
        let msg = fresh_message();
        let mut path = PathOptions::root();
        let mut delivered = Vec::new();
        mux.dispatch(&msg, &mut path, |hop, _msg, branch_path| {
            delivered.push(hop);
            branch_path.set_matched(false); // nobody matches
        });
        assert_eq!(delivered, hops, "all three hops, including fallback, are tried");
        assert!(!path.matched());
    }

    #[test]
    fn fallback_hop_is_skipped_when_a_primary_hop_matches() {
        let (arena, hops) = arena_with_flagged_hops(&[0, 0, PipeFlags::BRANCH_FALLBACK]);
        let mux = Multiplexer::new(&arena, hops.clone(), true, None);
        let msg = fresh_message();
        let mut path = PathOptions::root();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        mux.dispatch(&msg, &mut path, move |hop, _msg, branch_path| {
            d.fetch_add(1, Ordering::Relaxed);
            branch_path.set_matched(hop == hops[1]);
        });
        assert_eq!(delivered.load(Ordering::Relaxed), 2, "fallback hop never invoked");
        assert!(path.matched());
    }

    #[test]
    fn branch_final_short_circuits_remaining_non_fallback_hops() {
        let (arena, hops) = arena_with_flagged_hops(&[PipeFlags::BRANCH_FINAL, 0]);
        let mux = Multiplexer::new(&arena, hops, false, None);
        let msg = fresh_message();
        let mut path = PathOptions::root();
        let delivered = Arc::new(AtomicUsize::new(0));
        let d = delivered.clone();
        mux.dispatch(&msg, &mut path, move |_hop, _msg, branch_path| {
            d.fetch_add(1, Ordering::Relaxed);
            branch_path.set_matched(true);
        });
        assert_eq!(delivered.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn destination_fanout_never_touches_matched() {
        let (arena, hops) = arena_with_flagged_hops(&[0]);
        let mux = Multiplexer::new(&arena, hops, false, None);
        let msg = fresh_message();
        let mut path = PathOptions::root();
        path.set_matched(true);
        mux.dispatch(&msg, &mut path, |_hop, _msg, branch_path| {
            branch_path.set_matched(false);
        });
        assert!(path.matched(), "delivery_propagation=false must leave the parent scope alone");
    }
}
