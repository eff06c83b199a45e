//! The streaming archive producer.
//!
//! A [`Streamer`] is bound to one append-only sink and emits a complete ZIP
//! archive to it without ever seeking: local headers, entry bodies, data
//! descriptors, then on [`close`](Streamer::close) the central directory
//! and the end-of-central-directory records. It never needs to know the
//! total archive size, per-entry compressed size, or CRC32 ahead of time.
//!
//! ## Adding entries
//!
//! Two families of operations exist:
//!
//! - `add_*_entry` reserve the name and write the local header, but no body
//!   bytes: the caller sends the body to the target itself (e.g. via
//!   `sendfile`) and tells the streamer with
//!   [`simulate_write`](Streamer::simulate_write).
//! - `write_*_file` take a closure that receives an [`EntryWriter`]; the
//!   body flows through the library, which tracks CRC32 and sizes and
//!   finishes the entry with a data descriptor. If the closure (or the
//!   finish) fails, the partial entry is rolled back and the error is
//!   re-raised; the archive stays structurally valid.
//!
//! ## Example
//!
//! ```no_run
//! use std::io::Write;
//! use zipwire::{EntryOptions, Streamer};
//!
//! fn main() -> anyhow::Result<()> {
//!     let file = std::fs::File::create("bundle.zip")?;
//!     let mut streamer = Streamer::new(file);
//!
//!     streamer.write_file("report.txt", EntryOptions::new(), |w| {
//!         w.write_all(b"quarterly numbers")
//!     })?;
//!     streamer.add_empty_directory("assets", EntryOptions::new())?;
//!     streamer.close()?;
//!     Ok(())
//! }
//! ```

use std::io::{self, Write};

use crate::error::WriteError;
use crate::io::sink::OffsetSink;

use super::body::{EntryBodyKind, EntryWriter};
use super::entry::{Entry, EntryOptions, Member};
use super::pathset::PathSet;
use super::structures::CompressionMethod;
use super::writer::{RecordWriter, ZipWriter};

/// Longest filename the 16-bit header length field can carry.
const MAX_FILENAME_BYTES: usize = u16::MAX as usize;

/// Construction options for a [`Streamer`].
#[derive(Default)]
pub struct StreamerOptions {
    /// Rename colliding file paths to `name (1)`, `name (2)`, … instead of
    /// failing with a duplicate-path error.
    pub auto_rename_duplicate_filenames: bool,
    /// Substitute record encoder; the byte-exact [`ZipWriter`] is used when
    /// absent.
    pub writer_override: Option<Box<dyn RecordWriter + Send>>,
}

/// Output phase of the streamer. Bytes always hit the sink in this order,
/// per entry and across entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    EntryBody,
    DataDescriptors,
    Closed,
}

/// Streaming ZIP archive producer over an append-only sink.
pub struct Streamer<W: Write> {
    sink: OffsetSink<W>,
    writer: Box<dyn RecordWriter + Send>,
    members: Vec<Member>,
    path_set: PathSet,
    auto_rename: bool,
    state: State,
    /// Sink offset right before the last local header, for rollback.
    offset_before_last_header: u64,
    remove_last_entry_on_rollback: bool,
}

impl<W: Write> Streamer<W> {
    /// Create a streamer with default options.
    pub fn new(sink: W) -> Self {
        Self::with_options(sink, StreamerOptions::default())
    }

    pub fn with_options(sink: W, options: StreamerOptions) -> Self {
        Self {
            sink: OffsetSink::new(sink),
            writer: options
                .writer_override
                .unwrap_or_else(|| Box::new(ZipWriter)),
            members: Vec::new(),
            path_set: PathSet::new(),
            auto_rename: options.auto_rename_duplicate_filenames,
            state: State::Initial,
            offset_before_last_header: 0,
            remove_last_entry_on_rollback: false,
        }
    }

    /// Current byte offset into the sink.
    pub fn offset(&self) -> u64 {
        self.sink.tell()
    }

    /// Add an entry whose body is already compressed-equals-uncompressed
    /// (stored) and whose size and CRC32 are known.
    ///
    /// Writes the local file header only; the caller is responsible for
    /// getting exactly `size` body bytes to the target, either through the
    /// sink directly or through a bypass followed by
    /// [`simulate_write`](Streamer::simulate_write).
    ///
    /// Returns the sink offset after the header, where the body begins.
    pub fn add_stored_entry(
        &mut self,
        filename: &str,
        size: u64,
        crc32: u32,
        options: EntryOptions,
    ) -> Result<u64, WriteError> {
        self.begin_entry(
            filename,
            CompressionMethod::Stored,
            crc32,
            size,
            size,
            options,
            false,
        )
    }

    /// Add an entry whose body is a raw DEFLATE stream produced elsewhere,
    /// with both sizes and the CRC32 of the uncompressed bytes known.
    pub fn add_deflated_entry(
        &mut self,
        filename: &str,
        compressed_size: u64,
        uncompressed_size: u64,
        crc32: u32,
        options: EntryOptions,
    ) -> Result<u64, WriteError> {
        self.begin_entry(
            filename,
            CompressionMethod::Deflate,
            crc32,
            compressed_size,
            uncompressed_size,
            options,
            false,
        )
    }

    /// Add a directory entry (no body). A trailing `/` is appended to the
    /// name if absent.
    pub fn add_empty_directory(
        &mut self,
        dirname: &str,
        options: EntryOptions,
    ) -> Result<u64, WriteError> {
        let options = EntryOptions {
            use_data_descriptor: false,
            ..options
        };
        self.begin_entry(
            dirname,
            CompressionMethod::Stored,
            0,
            0,
            0,
            options,
            true,
        )
    }

    /// Account for `n` body bytes that reached the target without passing
    /// through the streamer (e.g. `sendfile` straight to the socket).
    ///
    /// Returns the new offset.
    pub fn simulate_write(&mut self, n: u64) -> Result<u64, WriteError> {
        if self.state == State::Closed {
            return Err(WriteError::StreamerClosed);
        }
        self.sink.advance_by(n);
        Ok(self.sink.tell())
    }

    /// Stream a stored entry through the library.
    ///
    /// The closure receives a writer that forwards bytes to the sink while
    /// tracking CRC32 and size; the entry finishes with a data descriptor.
    /// On error the entry is rolled back before the error is returned.
    pub fn write_stored_file<F>(
        &mut self,
        filename: &str,
        options: EntryOptions,
        body: F,
    ) -> Result<u64, WriteError>
    where
        F: FnOnce(&mut EntryWriter<'_, W>) -> io::Result<()>,
    {
        self.write_entry_body(EntryBodyKind::Stored, filename, options, body)
    }

    /// Stream a deflated entry through the library.
    ///
    /// As [`write_stored_file`](Streamer::write_stored_file), with the body
    /// passed through the raw-DEFLATE encoder.
    pub fn write_deflated_file<F>(
        &mut self,
        filename: &str,
        options: EntryOptions,
        body: F,
    ) -> Result<u64, WriteError>
    where
        F: FnOnce(&mut EntryWriter<'_, W>) -> io::Result<()>,
    {
        self.write_entry_body(EntryBodyKind::Deflated, filename, options, body)
    }

    /// Stream an entry, picking stored or deflated automatically.
    ///
    /// Up to 128 KiB of the body is buffered while a probe encoder measures
    /// how well it compresses; the entry commits to deflate when the probe
    /// shrinks the sample to 0.75 of its size or less, and to stored
    /// otherwise.
    pub fn write_file<F>(
        &mut self,
        filename: &str,
        options: EntryOptions,
        body: F,
    ) -> Result<u64, WriteError>
    where
        F: FnOnce(&mut EntryWriter<'_, W>) -> io::Result<()>,
    {
        self.write_entry_body(EntryBodyKind::Heuristic, filename, options, body)
    }

    /// Patch the last entry's CRC32 and sizes, then write its data
    /// descriptor.
    ///
    /// For entries added with `add_stored_entry` and a nonzero declared
    /// size, a differing `uncompressed_size` fails with
    /// [`WriteError::EntryBodySizeMismatch`].
    pub fn update_last_entry_and_write_data_descriptor(
        &mut self,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> Result<u64, WriteError> {
        if self.state == State::Closed {
            return Err(WriteError::StreamerClosed);
        }
        let Some(Member::Entry(entry)) = self.members.last_mut() else {
            return Err(WriteError::Io(io::Error::other(
                "no entry to attach a data descriptor to",
            )));
        };
        if !entry.use_data_descriptor {
            return Err(WriteError::Io(io::Error::other(
                "the last entry was added without a data descriptor",
            )));
        }
        if entry.storage_mode == CompressionMethod::Stored
            && entry.uncompressed_size != 0
            && entry.uncompressed_size != uncompressed_size
        {
            return Err(WriteError::EntryBodySizeMismatch {
                declared: entry.uncompressed_size,
                actual: uncompressed_size,
            });
        }

        entry.crc32 = crc32;
        entry.compressed_size = compressed_size;
        entry.uncompressed_size = uncompressed_size;
        entry.bytes_used_for_data_descriptor = self.writer.data_descriptor(
            &mut self.sink,
            crc32,
            compressed_size,
            uncompressed_size,
        )?;
        self.state = State::DataDescriptors;
        Ok(self.sink.tell())
    }

    /// Discard the last entry.
    ///
    /// Nothing is rewound: the bytes the entry already put on the wire stay
    /// where they are, accounted for by a filler that is excluded from the
    /// central directory. The path set is rebuilt from the surviving
    /// entries, so the discarded name becomes available again.
    pub fn rollback(&mut self) -> Result<u64, WriteError> {
        if self.state == State::Closed {
            return Err(WriteError::StreamerClosed);
        }
        if self.remove_last_entry_on_rollback {
            if matches!(self.members.last(), Some(Member::Entry(_))) {
                self.members.pop();
            }
            self.remove_last_entry_on_rollback = false;
        }

        self.path_set.clear();
        for member in &self.members {
            if let Member::Entry(entry) = member {
                if entry.is_directory() {
                    self.path_set.add_directory_path(&entry.filename)?;
                } else {
                    self.path_set.add_file_path(&entry.filename)?;
                }
            }
        }

        let filler_size = self.sink.tell() - self.offset_before_last_header;
        if filler_size > 0 {
            self.members.push(Member::Filler {
                total_bytes_used: filler_size,
            });
        }
        self.offset_before_last_header = self.sink.tell();
        self.state = State::DataDescriptors;
        Ok(self.sink.tell())
    }

    /// Write the central directory and the end-of-central-directory
    /// records, then clear internal state.
    ///
    /// Fails with [`WriteError::OffsetOutOfSync`] when the byte spans of
    /// all entries and fillers do not add up to the sink position, which
    /// means body bytes were sent through a bypass without a matching
    /// [`simulate_write`](Streamer::simulate_write).
    ///
    /// The underlying sink is not closed or flushed; it still belongs to
    /// the caller. Returns the final archive size.
    pub fn close(&mut self) -> Result<u64, WriteError> {
        if self.state == State::Closed {
            return Err(WriteError::StreamerClosed);
        }

        let declared: u64 = self.members.iter().map(Member::total_bytes_used).sum();
        let actual = self.sink.tell();
        if declared != actual {
            return Err(WriteError::OffsetOutOfSync { declared, actual });
        }

        let start_of_central_directory = self.sink.tell();
        let mut num_entries = 0u64;
        for member in &self.members {
            if let Member::Entry(entry) = member {
                self.writer
                    .central_directory_file_header(&mut self.sink, entry)?;
                num_entries += 1;
            }
        }
        let central_directory_size = self.sink.tell() - start_of_central_directory;

        self.writer.end_of_central_directory(
            &mut self.sink,
            start_of_central_directory,
            central_directory_size,
            num_entries,
        )?;

        self.members.clear();
        self.path_set.clear();
        self.remove_last_entry_on_rollback = false;
        self.state = State::Closed;
        Ok(self.sink.tell())
    }

    /// Flush and hand back the sink.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }

    pub(crate) fn sink(&mut self) -> &mut OffsetSink<W> {
        &mut self.sink
    }

    /// Reserve the path, write the local file header and append the entry.
    /// Shared by every entry-adding operation.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn begin_entry(
        &mut self,
        filename: &str,
        storage_mode: CompressionMethod,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
        options: EntryOptions,
        directory: bool,
    ) -> Result<u64, WriteError> {
        if self.state == State::Closed {
            return Err(WriteError::StreamerClosed);
        }
        if let CompressionMethod::Unknown(mode) = storage_mode {
            return Err(WriteError::UnknownStorageMode(mode));
        }

        let filename = self.reserve_path(filename, directory)?;

        self.offset_before_last_header = self.sink.tell();
        self.remove_last_entry_on_rollback = true;

        let mut entry = Entry {
            filename,
            crc32,
            compressed_size,
            uncompressed_size,
            storage_mode,
            modification_time: options.modification_time,
            use_data_descriptor: options.use_data_descriptor,
            local_header_offset: self.offset_before_last_header,
            bytes_used_for_local_header: 0,
            bytes_used_for_data_descriptor: 0,
            unix_permissions: options.unix_permissions,
        };

        // With a data descriptor in play the header carries zeros and the
        // real values follow the body.
        let header_view = if options.use_data_descriptor {
            Entry {
                crc32: 0,
                compressed_size: 0,
                uncompressed_size: 0,
                ..entry.clone()
            }
        } else {
            entry.clone()
        };
        entry.bytes_used_for_local_header =
            self.writer.local_file_header(&mut self.sink, &header_view)?;

        self.members.push(Member::Entry(entry));
        self.state = State::EntryBody;
        Ok(self.sink.tell())
    }

    /// Sanitize, optionally uniquify, length-check and register a path.
    fn reserve_path(&mut self, filename: &str, directory: bool) -> Result<String, WriteError> {
        // Backslashes never mean "separator" in ZIP, and a few unarchivers
        // treat them as one anyway.
        let mut sanitized = filename.replace('\\', "_");

        if directory {
            if !sanitized.ends_with('/') {
                sanitized.push('/');
            }
            if sanitized.len() > MAX_FILENAME_BYTES {
                return Err(WriteError::FilenameTooLong(sanitized.len()));
            }
            self.path_set.add_directory_path(&sanitized)?;
        } else {
            if self.auto_rename {
                sanitized = self.path_set.uniquify(&sanitized);
            }
            if sanitized.len() > MAX_FILENAME_BYTES {
                return Err(WriteError::FilenameTooLong(sanitized.len()));
            }
            self.path_set.add_file_path(&sanitized)?;
        }
        Ok(sanitized)
    }

    fn write_entry_body<F>(
        &mut self,
        kind: EntryBodyKind,
        filename: &str,
        options: EntryOptions,
        body: F,
    ) -> Result<u64, WriteError>
    where
        F: FnOnce(&mut EntryWriter<'_, W>) -> io::Result<()>,
    {
        let options = EntryOptions {
            use_data_descriptor: true,
            ..options
        };

        let mut writer = EntryWriter::new(self, kind, filename, options)?;
        let result = body(&mut writer)
            .map_err(unwrap_write_error)
            .and_then(|()| writer.finish());
        match result {
            Ok(offset) => Ok(offset),
            Err(err) => {
                let committed = writer.dispose_on_failure();
                if committed {
                    self.rollback()?;
                }
                Err(err)
            }
        }
    }
}

/// Recover a `WriteError` that crossed an `io::Write` boundary inside an
/// entry-body closure; anything else stays an I/O error.
pub(crate) fn unwrap_write_error(err: io::Error) -> WriteError {
    let is_write_error = err
        .get_ref()
        .is_some_and(|inner| inner.is::<WriteError>());
    if !is_write_error {
        return WriteError::Io(err);
    }
    match err.into_inner() {
        Some(inner) => match inner.downcast::<WriteError>() {
            Ok(write_error) => *write_error,
            Err(other) => WriteError::Io(io::Error::other(other)),
        },
        None => WriteError::Io(io::Error::other("lost inner error")),
    }
}
