//! The error hierarchy for the whole crate.
//!
//! Storage faults are distinguished from programmer-error "logic" violations
//! because the transaction driver reacts to them differently: a storage fault
//! aborts the in-flight transaction and invalidates every table's memory
//! cache (see `Postbox::run_transaction`), while a logic violation is simply
//! fatal and propagated as-is.

use thiserror::Error;

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An I/O failure from the underlying `ValueBox`.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A failure to encode or decode a stored value.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A precondition violation: duplicate record id, `clear_memory_cache`
    /// called with dirty state outstanding, and the like. Not retried.
    #[error("logic error: {0}")]
    Logic(String),

    /// The transaction worker has already shut down.
    #[error("the postbox worker has shut down")]
    WorkerGone,
}

impl From<Box<bincode::ErrorKind>> for Error {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl Error {
    pub fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }
}
