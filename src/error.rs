use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;

use crate::elements::ObjKind;

// Error data structures are modeled just like in the `csv` crate by BurntSushi.

pub(crate) fn new_error(kind: ErrorKind) -> Error {
    Error(Box::new(kind))
}

pub(crate) fn new_config_error(msg: impl Into<String>) -> Error {
    Error(Box::new(ErrorKind::Config { msg: msg.into() }))
}

pub(crate) fn new_index_error(kind: IndexError) -> Error {
    Error(Box::new(ErrorKind::Index(kind)))
}

/// A type alias for `Result<T, osmchart::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// An error that can occur while transforming or rendering a dataset.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    /// Return the specific type of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying type.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// Returns true if the error was caused by cancellation (SIGINT-style
    /// cooperative shutdown).
    pub fn is_cancelled(&self) -> bool {
        matches!(*self.0, ErrorKind::Cancelled)
    }

    /// An error representing cooperative cancellation, for embedders that
    /// want to propagate an interrupted run as an error instead of a clean
    /// early exit.
    pub fn cancelled() -> Error {
        new_error(ErrorKind::Cancelled)
    }

    /// A lookup error for an object missing from the store.
    pub fn lookup(kind: ObjKind, id: i64) -> Error {
        new_error(ErrorKind::Lookup { kind, id })
    }
}

/// The specific type of an error.
#[non_exhaustive]
#[derive(Debug)]
pub enum ErrorKind {
    /// An error for I/O operations.
    Io(io::Error),
    /// A malformed window, page or option string. Fatal at startup.
    Config { msg: String },
    /// A rule could not be parsed. Rules with broken match predicates are
    /// downgraded and kept running, so this only surfaces for descriptors
    /// that cannot be interpreted at all.
    Parse { rule_id: i64, msg: String },
    /// An object referenced by another object does not exist.
    Lookup { kind: ObjKind, id: i64 },
    /// An action's `ini` callback returned a fatal (negative) code.
    Rule {
        rule_id: i64,
        action: String,
        code: i32,
    },
    /// The current pass was cancelled cooperatively.
    Cancelled,
    /// An error that occurs when loading a persisted binary index.
    Index(IndexError),
}

/// An error that occurs when reading an index file.
#[non_exhaustive]
#[derive(Debug)]
pub enum IndexError {
    /// The file does not start with the index magic.
    BadMagic,
    /// The index was written by an incompatible version.
    BadVersion {
        /// Version number found in the header.
        version: u32,
    },
    /// The dirty flag is still set, i.e. the writer did not finish.
    Stale,
    /// The file ends in the middle of a record.
    Truncated,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        new_error(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self.0 {
            ErrorKind::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Config { ref msg } => {
                write!(f, "config error: {msg}")
            }
            ErrorKind::Parse { rule_id, ref msg } => {
                write!(f, "parse error in rule {rule_id}: {msg}")
            }
            ErrorKind::Lookup { kind, id } => {
                write!(f, "{} {id} does not exist", kind.name())
            }
            ErrorKind::Rule {
                rule_id,
                ref action,
                code,
            } => {
                write!(f, "{action}_ini() of rule {rule_id:#x} failed: {code}")
            }
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Index(IndexError::BadMagic) => {
                write!(f, "index file has no valid magic")
            }
            ErrorKind::Index(IndexError::BadVersion { version }) => {
                write!(f, "index file has unsupported version {version}")
            }
            ErrorKind::Index(IndexError::Stale) => {
                write!(f, "index file is marked dirty")
            }
            ErrorKind::Index(IndexError::Truncated) => {
                write!(f, "index file is truncated")
            }
        }
    }
}
