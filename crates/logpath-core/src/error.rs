use std::fmt;

/// Where in the configuration source an error originated, mirrored onto
/// every compile-time error so the reporting surface (out of scope here)
/// can point the user at the offending statement.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Errors raised while compiling a configuration tree into a pipe graph.
///
/// A `ConfigError` always aborts the reload in progress; it never aborts the
/// process and it never touches the previously compiled graph (spec.md §4.3
/// "Failure semantics").
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{location}: unknown reference to {content_kind} named '{name}'")]
    UnresolvedReference {
        location: SourceLocation,
        content_kind: &'static str,
        name: String,
    },

    #[error("{location}: source statements must precede non-source statements in a sequence")]
    SourceAfterNonSource { location: SourceLocation },

    #[error("{location}: a junction branch mixes source and non-source pipes")]
    MixedJunctionBranch { location: SourceLocation },

    #[error("persistent name '{name}' is used by more than one pipe in the compiled graph")]
    DuplicatePersistentName { name: String },

    #[error("{location}: pipe '{plugin_name}' failed to initialize")]
    InitFailed {
        location: SourceLocation,
        plugin_name: String,
    },
}

/// Errors surfaced by message-level operations (name-value table, ack chain).
#[derive(thiserror::Error, Debug)]
pub enum MessageError {
    #[error("indirect value would form a cycle through handle {0:?}")]
    IndirectCycle(crate::message::NvHandle),

    #[error("attempted to mutate a write-protected message without cloning it first")]
    NotWritable,

    #[error("unsupported serialization version byte: {0}")]
    UnsupportedVersion(u8),

    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame { expected: usize, actual: usize },
}
