//! Fixed-size worker pool driving [`crate::config::compiler::run_chain`]
//! (spec.md §4.4 "Scheduling model", §5 "Threading").

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{compiler::run_chain, CompiledGraph, GraphHandle};
use crate::message::Message;
use crate::pipe::{PathOptions, PipeId};

#[derive(thiserror::Error, Debug)]
pub enum EnqueueError {
    #[error("dispatcher is shutting down and accepts no further work")]
    ShuttingDown,
}

/// One unit of work: a message, the pipe to start it at, its control state,
/// and the exact compiled-graph snapshot `pipe` indexes into — captured at
/// enqueue time so a concurrent reload can never hand a worker a `PipeId`
/// that belongs to a different (or already-dropped) arena.
struct WorkItem {
    graph: Arc<CompiledGraph>,
    pipe: PipeId,
    msg: Message,
    path: PathOptions,
}

/// A small fixed pool of OS threads, each pulling whole message chains off
/// its own channel and running them to completion without blocking (spec.md
/// §5: "No pipe function may suspend or block").
pub struct Dispatcher {
    handle: Arc<GraphHandle>,
    senders: Vec<Sender<WorkItem>>,
    next: AtomicUsize,
    shutting_down: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

pub struct DispatcherBuilder {
    handle: Arc<GraphHandle>,
    worker_count: usize,
}

impl DispatcherBuilder {
    pub fn new(handle: Arc<GraphHandle>) -> Self {
        Self { handle, worker_count: 4 }
    }

    /// At least one worker regardless of what's requested — a zero-worker
    /// pool could never drain anything it accepted.
    pub fn workers(mut self, n: usize) -> Self {
        self.worker_count = n.max(1);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher::start(self.handle, self.worker_count)
    }
}

impl Dispatcher {
    fn start(handle: Arc<GraphHandle>, worker_count: usize) -> Self {
        let shutting_down = Arc::new(AtomicBool::new(false));
        let mut senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for idx in 0..worker_count {
            let (tx, rx) = mpsc::channel::<WorkItem>();
            senders.push(tx);
            let join = thread::Builder::new()
                .name(format!("logpath-worker-{idx}"))
                .spawn(move || worker_loop(rx))
                .expect("failed to spawn a dispatch worker thread");
            workers.push(join);
        }

        Self { handle, senders, next: AtomicUsize::new(0), shutting_down, workers }
    }

    /// Hands one message to the pool, starting it at `pipe` in whatever
    /// graph is currently live. Round-robins across workers — a message is
    /// pinned to whichever worker picks it up for the entirety of its chain
    /// (spec.md §5: "A message is pinned to one worker for the entirety of
    /// a single `queue(...)` chain").
    pub fn enqueue(&self, pipe: PipeId, msg: Message, path: PathOptions) -> Result<(), EnqueueError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(EnqueueError::ShuttingDown);
        }
        let graph = self.handle.load();
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.senders.len();
        self.senders[idx]
            .send(WorkItem { graph, pipe, msg, path })
            .map_err(|_| EnqueueError::ShuttingDown)
    }

    /// Stops accepting new work, then waits for every worker to drain its
    /// queue, up to `timeout`. There is no user-level cancellation (spec.md
    /// §4.4): a worker that is still mid-chain past the deadline is simply
    /// left to finish on its own rather than forcibly unwound, matching the
    /// spec's explicit "no cancellation tokens" stance. The caller only
    /// ever blocks for at most `timeout`.
    pub fn shutdown(self, timeout: Duration) {
        self.shutting_down.store(true, Ordering::Release);
        drop(self.senders);

        let (done_tx, done_rx) = mpsc::channel();
        let workers = self.workers;
        thread::spawn(move || {
            for worker in workers {
                let _ = worker.join();
            }
            let _ = done_tx.send(());
        });

        if done_rx.recv_timeout(timeout).is_err() {
            tracing::warn!(?timeout, "dispatcher shutdown timed out; abandoning residual workers");
        }
    }
}

fn worker_loop(rx: Receiver<WorkItem>) {
    while let Ok(item) = rx.recv() {
        let mut path = item.path;
        run_chain(&item.graph.arena, item.pipe, item.msg, &mut path);
    }
}
