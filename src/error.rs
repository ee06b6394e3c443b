//! Error taxonomy for the archive engine.
//!
//! One small `thiserror` enum per concern, composed here into a single
//! top-level [`Error`] so callers crossing module boundaries don't have
//! to juggle several error types.

use crate::path_spec::PathSpec;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected end of stream: wanted {wanted} bytes, got {got}")]
    UnexpectedEof { wanted: usize, got: usize },

    #[error("bad magic: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: &'static [u8], actual: Vec<u8> },

    #[error("malformed archive data: {0}")]
    BadData(String),

    #[error("SHA-1 mismatch in segment {0}")]
    Sha1Mismatch(&'static str),

    #[error("entry not found: {0}")]
    EntryNotFound(String),

    #[error("hash collision for {0}")]
    HashCollision(String),

    #[error("corrupt packed entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("compression cancelled")]
    CompressionCancelled,

    #[error("requested range out of bounds: {0}")]
    OutOfRange(String),
}

impl Error {
    pub fn bad_data(msg: impl Into<String>) -> Self {
        Error::BadData(msg.into())
    }

    pub fn entry_not_found(spec: &PathSpec) -> Self {
        Error::EntryNotFound(spec.display_name())
    }

    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Error::CorruptEntry { offset, reason: reason.into() }
    }
}

/// Convert into `std::io::Error` at API boundaries that must stay within
/// `std::io::Result`.
impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}
