//! The acknowledgement DAG rooted at a [`super::Message`] (spec.md §3, §4.4).
//!
//! Every fan-out point increments a pending counter; every branch
//! terminates with exactly one [`AckChain::ack`] call. When the counter
//! reaches zero the chain invokes its callback exactly once with a single,
//! deterministic outcome derived from the outcomes of every branch.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// The terminal disposition of a message, reported to the owning source
/// driver (spec.md §4.4 "Acknowledgement").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckOutcome {
    /// At least one destination accepted the message.
    Processed,
    /// Dropped by a filter, a parser failure, or queue overflow without
    /// flow control.
    Aborted,
    /// Transient back-pressure; the source may regenerate and retry.
    Suspended,
}

impl AckOutcome {
    fn priority(self) -> u8 {
        // Suspended always wins: it signals that at least one branch needs
        // the message retried, which a "processed" elsewhere cannot paper
        // over. Processed beats Aborted because a message is "handled" as
        // soon as one destination took it (spec.md: "processed - at least
        // one destination accepted").
        match self {
            AckOutcome::Suspended => 2,
            AckOutcome::Processed => 1,
            AckOutcome::Aborted => 0,
        }
    }
}

/// Callback invoked exactly once when a message's ack chain drains to zero.
pub trait AckSink: Send + Sync {
    fn on_ack(&self, outcome: AckOutcome);
}

impl<F: Fn(AckOutcome) + Send + Sync> AckSink for F {
    fn on_ack(&self, outcome: AckOutcome) {
        self(outcome)
    }
}

pub struct AckChain {
    pending: AtomicI64,
    counts: [AtomicU64; 3],
    sink: Arc<dyn AckSink>,
    fired: AtomicI64,
}

impl fmt::Debug for AckChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckChain")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl AckChain {
    /// Creates a new ack chain with one outstanding branch: the message's
    /// own traversal of the graph from its source.
    pub fn new_root(sink: Arc<dyn AckSink>) -> Arc<Self> {
        Arc::new(Self {
            pending: AtomicI64::new(1),
            counts: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            sink,
            fired: AtomicI64::new(0),
        })
    }

    /// Registers `branches` additional outstanding branches (e.g. a
    /// multiplexer fanning out to `k` hops adds `k - 1` on top of the one
    /// branch already accounted for by the hop that triggered the fan-out).
    pub fn add_ack(&self, branches: u64) {
        if branches == 0 {
            return;
        }
        self.pending.fetch_add(branches as i64, Ordering::AcqRel);
    }

    /// Records the terminal outcome of one branch. Fires the sink exactly
    /// once, when the last outstanding branch acks.
    pub fn ack(&self, outcome: AckOutcome) {
        self.counts[outcome.priority() as usize].fetch_add(1, Ordering::Relaxed);
        let remaining = self.pending.fetch_sub(1, Ordering::AcqRel) - 1;
        debug_assert!(remaining >= 0, "ack() called more times than add_ack()");
        if remaining == 0 && self.fired.swap(1, Ordering::AcqRel) == 0 {
            self.sink.on_ack(self.combined_outcome());
        }
    }

    fn combined_outcome(&self) -> AckOutcome {
        let suspended = self.counts[AckOutcome::Suspended.priority() as usize].load(Ordering::Relaxed);
        let processed = self.counts[AckOutcome::Processed.priority() as usize].load(Ordering::Relaxed);
        if suspended > 0 {
            AckOutcome::Suspended
        } else if processed > 0 {
            AckOutcome::Processed
        } else {
            AckOutcome::Aborted
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> i64 {
        self.pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<AckOutcome>>);
    impl AckSink for Recorder {
        fn on_ack(&self, outcome: AckOutcome) {
            self.0.lock().unwrap().push(outcome);
        }
    }

    #[test]
    fn single_branch_acks_immediately() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let chain = AckChain::new_root(rec.clone());
        chain.ack(AckOutcome::Processed);
        assert_eq!(rec.0.lock().unwrap().as_slice(), &[AckOutcome::Processed]);
    }

    #[test]
    fn fan_out_fires_once_when_all_branches_ack() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let chain = AckChain::new_root(rec.clone());
        chain.add_ack(2); // now 3 outstanding branches total
        chain.ack(AckOutcome::Aborted);
        chain.ack(AckOutcome::Aborted);
        assert!(rec.0.lock().unwrap().is_empty());
        chain.ack(AckOutcome::Processed);
        assert_eq!(rec.0.lock().unwrap().as_slice(), &[AckOutcome::Processed]);
    }

    #[test]
    fn suspended_outranks_processed_and_aborted() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let chain = AckChain::new_root(rec.clone());
        chain.add_ack(2);
        chain.ack(AckOutcome::Processed);
        chain.ack(AckOutcome::Aborted);
        chain.ack(AckOutcome::Suspended);
        assert_eq!(rec.0.lock().unwrap().as_slice(), &[AckOutcome::Suspended]);
    }

    #[test]
    fn ack_count_matches_add_ack_count() {
        let rec = Arc::new(Recorder(Mutex::new(Vec::new())));
        let chain = AckChain::new_root(rec.clone());
        chain.add_ack(4);
        assert_eq!(chain.pending_count(), 5);
        for _ in 0..5 {
            chain.ack(AckOutcome::Processed);
        }
        assert_eq!(chain.pending_count(), 0);
        assert_eq!(rec.0.lock().unwrap().len(), 1);
    }
}
