use thiserror::Error;

use crate::handle::Handle;

/// Taxonomy of runtime failures. One variant per bucket of the error model;
/// callers generally match on kind, not message text.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("handle table exhausted")]
    HandleTableFull,

    #[error("mailbox allocation failed for {0:?}")]
    MailboxAllocFailed(Handle),

    #[error("module table full (max {max})")]
    ModuleTableFull { max: usize },

    #[error("unknown handle {0:?}")]
    UnknownHandle(Handle),

    #[error("unknown name {0:?}")]
    UnknownName(String),

    #[error("could not resolve module symbol: {0}")]
    SymbolResolution(String),

    #[error("message too large to encode ({size} bytes)")]
    MessageTooLarge { size: usize },

    #[error("invalid message type tag: {0}")]
    InvalidMessageType(u8),

    #[error("invalid destination: dst=0 with non-null payload")]
    InvalidDestination,

    #[error("module '{module}' failed to initialize: {reason}")]
    InitFailed { module: String, reason: String },

    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("failed to load dynamic module {path}: {source}")]
    DynamicLoad {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("name already bound: {0}")]
    NameTaken(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
