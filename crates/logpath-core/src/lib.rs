//! Configuration-graph compiler and per-message dispatch runtime for a
//! log-routing daemon.
//!
//! Four pieces, built bottom-up:
//! - [`message`] — the reference-counted, copy-on-write log record (C1).
//! - [`pipe`] — the compiled graph's node types: behavior, multiplexer fan-out,
//!   flags, path options (C2).
//! - [`config`] — the declarative tree and the compiler that lowers it into a
//!   [`pipe::ConfigArena`], plus [`config::GraphHandle`] for atomic hot reload (C3).
//! - [`runtime`] — the fixed worker pool that drives compiled chains to
//!   completion (C4).
//!
//! The durable queue (C5) lives in the sibling `logpath-diskq` crate, which
//! depends on this one for [`message::Message`].

pub mod config;
pub mod engine_options;
pub mod error;
pub mod message;
pub mod pipe;
pub mod runtime;

pub use engine_options::{DiskQueueDefaults, EngineOptions};
pub use error::{ConfigError, MessageError, SourceLocation};
pub use message::{AckOutcome, AckSink, Message, ParseOptions};
pub use pipe::{ConfigArena, Dispatch, PathOptions, PipeBehavior, PipeId};
pub use runtime::{Dispatcher, DispatcherBuilder, EnqueueError};
