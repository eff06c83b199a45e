//! Error types for archive production and parsing.
//!
//! The producing side and the reading side fail in different ways and are
//! used by different callers, so each gets its own enum. Both convert from
//! `std::io::Error` so `?` works throughout the write and read paths.

use thiserror::Error;

/// Errors raised while producing an archive.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The underlying sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A storage mode other than stored (0) or deflated (8) was requested.
    #[error("unknown storage mode {0} (only 0=stored and 8=deflated are supported)")]
    UnknownStorageMode(u16),

    /// The filename does not fit in the 16-bit length field of a ZIP header.
    #[error("filename is {0} bytes long, the ZIP format allows at most 65535")]
    FilenameTooLong(usize),

    /// A directory was added where a file with the same path already exists.
    #[error("cannot add directory {0:?}: a file with that path is already in the archive")]
    FileClobbersDirectory(String),

    /// A file was added where a directory with the same path already exists.
    #[error("cannot add file {0:?}: a directory with that path is already in the archive")]
    DirectoryClobbersFile(String),

    /// A file was added twice without automatic renaming enabled.
    #[error("duplicate path {0:?} already in the archive")]
    DuplicatePath(String),

    /// A stored entry declared one size but a different number of body bytes
    /// was reported.
    #[error("stored entry declared {declared} bytes but {actual} were written")]
    EntryBodySizeMismatch { declared: u64, actual: u64 },

    /// The sum of all entry byte spans disagrees with the sink position.
    ///
    /// This almost always means body bytes were sent to the target through a
    /// bypass (e.g. `sendfile`) without a matching `simulate_write` call.
    #[error(
        "entries add up to {declared} bytes and the IO is at {actual} bytes; \
         if you write entry bodies to the target yourself, call simulate_write \
         with the number of bytes you wrote"
    )]
    OffsetOutOfSync { declared: u64, actual: u64 },

    /// An operation was attempted after the archive was finalized.
    #[error("the streamer is closed, no further entries can be added")]
    StreamerClosed,
}

/// Errors raised while parsing an existing archive.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The underlying source failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A structural record was malformed.
    #[error("invalid ZIP structure: {0}")]
    InvalidStructure(&'static str),

    /// The archive uses a feature this reader does not support.
    #[error("unsupported ZIP feature: {0}")]
    UnsupportedFeature(&'static str),

    /// No end-of-central-directory record was found in the trailing window.
    #[error("no end-of-central-directory record found, not a ZIP archive")]
    MissingEocd,

    /// The compressed-data offset was requested before the local header had
    /// been read.
    #[error("local header not read yet, the compressed-data offset is unknown")]
    LocalHeaderPending,
}

impl ReadError {
    /// Wrap a non-I/O error from an external source (e.g. an HTTP client)
    /// as an I/O failure.
    pub(crate) fn other<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ReadError::Io(std::io::Error::other(err))
    }
}
