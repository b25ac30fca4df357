//! Errors, both the ones we raise and the ones we only count.
//!
//! pingstore has two kinds of failure. Problems with a recorded value are
//! `ErrorType`s: they never reach the application. The value is truncated or
//! dropped and the problem is counted in a recording-error metric. Problems
//! with the machinery itself, such as disk trouble or a poisoned lock, are
//! `Error`s and are returned to the caller.

use std::error;
use std::fmt;
use std::io;

/// The category every recording-error counter is filed under.
pub const RECORDING_ERROR_CATEGORY: &str = "recording_error";

/// Kinds of recording errors. These are counted, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorType {
    /// The value was rejected outright.
    InvalidValue,
    /// The value was too large and got truncated, or a bounded container
    /// overflowed.
    InvalidOverflow,
}

impl ErrorType {
    /// The name of the error as it shows up in recording-error identities.
    pub fn as_str(&self) -> &'static str {
        match *self {
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidOverflow => "invalid_overflow",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced to the caller.
#[derive(Debug)]
pub enum Error {
    /// Reading or writing persisted state failed.
    Persistence(io::Error),
    /// Persisted state could not be encoded or decoded.
    Encoding(serde_json::Error),
    /// A lock guarding storage was poisoned: some writer panicked half way
    /// through an update, so a snapshot could observe a torn value.
    Consistency(String),
    /// The configuration could not be understood.
    Config(String),
    /// A metric definition was rejected.
    Registry(String),
    /// A collection was requested while upload is disabled.
    UploadDisabled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Persistence(ref e) => write!(f, "persistence failure: {}", e),
            Error::Encoding(ref e) => write!(f, "could not encode persisted state: {}", e),
            Error::Consistency(ref s) => write!(f, "storage consistency violated: {}", s),
            Error::Config(ref s) => write!(f, "bad configuration: {}", s),
            Error::Registry(ref s) => write!(f, "bad metric definition: {}", s),
            Error::UploadDisabled => f.write_str("upload is disabled"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::Persistence(ref e) => Some(e),
            Error::Encoding(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::Persistence(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Encoding(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Error {
        Error::Config(e.to_string())
    }
}
