//! Error type shared by every structure in the crate.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The allocator refused to grow a buffer. The structure is left unchanged.
    #[error("allocation failed: {0}")]
    Alloc(#[from] TryReserveError),

    /// A packed sequence would outgrow its 32-bit total-length header.
    #[error("{what} would grow to {bytes} bytes")]
    TooLarge { what: &'static str, bytes: usize },

    /// An externally supplied blob failed integrity validation.
    #[error("corrupt {what}: {detail}")]
    Corrupt { what: &'static str, detail: String },

    #[error("key already exists")]
    KeyExists,

    #[error("no such key")]
    NoSuchKey,

    #[error("DB index {0} is out of range")]
    NoSuchDb(usize),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("value is not an integer or out of range")]
    NotInteger,

    #[error("value is not a valid float")]
    NotFloat,

    /// A score or lexicographic range bound could not be parsed.
    #[error("min or max is not a valid range item")]
    InvalidRange,

    /// A hash table resize request was rejected (rehash in progress, size
    /// smaller than the element count, or no change in bucket count).
    #[error("hash table expand rejected: {0}")]
    Expand(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn corrupt(what: &'static str, detail: impl Into<String>) -> Self {
        Error::Corrupt {
            what,
            detail: detail.into(),
        }
    }
}

/// Abort on a broken structural invariant of a live packed structure.
///
/// Continuing would mean reading adjacent bytes as if they were a valid entry.
#[cold]
#[track_caller]
pub(crate) fn corruption(what: &'static str, detail: std::fmt::Arguments<'_>) -> ! {
    tracing::error!(structure = what, "{}", detail);
    panic!("corrupt {what}: {detail}");
}
