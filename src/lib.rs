//! # zipwire
//!
//! A streaming ZIP archive producer for append-only byte sinks.
//!
//! This library emits valid ZIP files to anything that accepts bytes in
//! order — a file, a socket, an in-memory buffer, an HTTP response body —
//! without ever seeking or rewinding. Sizes and CRC32 values are discovered
//! as bytes flow and recorded in data descriptors and the central
//! directory, so nothing about an entry needs to be known up front. For
//! reading archives back (validation, selective extraction) it includes a
//! central-directory-first parser over random-access sources, including
//! remote files via HTTP Range requests.
//!
//! ## Features
//!
//! - Produce ZIP archives to append-only sinks, no seeking required
//! - Stored and DEFLATE entries, with an automatic stored-vs-deflated
//!   heuristic
//! - Zip64 promotion for entries over 4 GiB and archives over 65535 entries
//! - "Splice" mode: write entry bodies to the target yourself (e.g. via
//!   `sendfile`) and let the streamer account for them
//! - Exact archive-size prediction for `Content-Length` headers
//! - Pull adaptor turning the push-based producer into a chunk iterator
//! - Read archives from local files, memory, or HTTP URLs using Range
//!   requests
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Write;
//! use zipwire::{EntryOptions, Streamer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let sink = std::fs::File::create("out.zip")?;
//!     let mut streamer = Streamer::new(sink);
//!
//!     // Let the library pick the storage mode per entry.
//!     streamer.write_file("notes/readme.md", EntryOptions::new(), |w| {
//!         w.write_all(b"# Notes\n\nStreamed straight to disk.\n")
//!     })?;
//!
//!     // Entries with known size and CRC32 can skip the library entirely
//!     // for their body bytes.
//!     let payload = std::fs::read("payload.bin")?;
//!     let crc = crc32fast::hash(&payload);
//!     streamer.add_stored_entry(
//!         "payload.bin",
//!         payload.len() as u64,
//!         crc,
//!         EntryOptions::new(),
//!     )?;
//!     streamer.simulate_write(payload.len() as u64)?; // body went out-of-band
//!
//!     streamer.close()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod io;
pub mod zip;

pub use error::{ReadError, WriteError};
pub use io::{
    ArchiveChunks, BytesReader, ChunkSink, HttpRangeReader, LocalFileReader, OffsetSink, ReadAt,
    WriteBuffer, stream_archive, streaming_http_headers,
};
pub use zip::{
    CompressionMethod, Crc32Accumulator, Deflater, Entry, EntryOptions, EntryReader, EntryWriter,
    PathSet, RecordWriter, SizeEstimator, Streamer, StreamerOptions, ZipExtractor, ZipFileEntry,
    ZipParser, ZipWriter,
};
