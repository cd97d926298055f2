pub mod codec;
pub mod document;
pub mod index;
pub mod store;
pub mod util;

#[macro_use]
extern crate serde_derive;

pub use fnv::FnvHashMap as HashMap;
pub use fnv::FnvHashSet as HashSet;
use std::{io, str::Utf8Error};

/// Returned by postings cursors once a term's documents are exhausted.
pub const NO_MORE_DOCS: i32 = std::i32::MAX;

#[derive(Debug)]
pub enum Error {
    /// Malformed field config, bad counts, negative doc ids, etc.
    InvalidArgument(String),
    /// Postings or advance targets moving backwards.
    OutOfOrder(String),
    /// Writes after close, or double-finish.
    AlreadyClosed(&'static str),
    /// Optional stream operations not provided by this implementation.
    Unsupported(&'static str),
    IO(io::Error),
    /// Bytes decoded fine but violate a structural invariant.
    Corruption(String),
    BadManifest(serde_json::Error),
    Utf8DecodeError(Utf8Error),
    Context(String, Box<Error>),
}

impl Error {
    pub fn with_context<S>(self, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Context(msg.into(), Box::new(self))
    }
    pub(crate) fn eof(what: &str) -> Error {
        Error::IO(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            what.to_string(),
        ))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}
impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::BadManifest(err)
    }
}
impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Error {
        Error::Utf8DecodeError(err)
    }
}
