use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// caskdb errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// The key is empty, or its length does not fit the record header.
    InvalidKey,
    /// The value's length does not fit the record header.
    ValueTooLarge,
    /// No record exists for the key.
    KeyNotFound,
    /// A record failed validation: bad magic, checksum mismatch, unparseable
    /// length digits, or a short read in the middle of a record.
    Corrupt(String),
    /// An IO error. Stringified to keep the enum Clone + PartialEq.
    IO(String),
    /// The queue has no records left to pop.
    QueueEmpty,
    /// Queue delete of a key that is not in the store.
    InvalidRecord,
    /// The data directory is locked by another process.
    Locked(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidKey => write!(f, "invalid key"),
            Error::ValueTooLarge => write!(f, "value too large for record header"),
            Error::KeyNotFound => write!(f, "key not found"),
            Error::Corrupt(msg) => write!(f, "corrupt record: {msg}"),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::QueueEmpty => write!(f, "queue: no values to be read"),
            Error::InvalidRecord => write!(f, "queue: invalid record (maybe already deleted?)"),
            Error::Locked(msg) => write!(f, "data directory locked: {msg}"),
        }
    }
}

/// Constructs an Error::Corrupt from a format string.
#[macro_export]
macro_rules! errcorrupt {
    ($($args:tt)*) => { $crate::error::Error::Corrupt(format!($($args)*)) };
}

/// A caskdb Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::IO(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::IO(err.to_string())
    }
}
