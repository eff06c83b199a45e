//! High-level ZIP file extraction API.
//!
//! This module provides a user-friendly interface for reading files back
//! out of ZIP archives, handling decompression automatically. It exists
//! mainly to validate archives this crate produced — CRC32 is *not*
//! verified on read, the central directory is trusted.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use zipwire::{LocalFileReader, ZipExtractor};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let reader = Arc::new(LocalFileReader::new(std::path::Path::new("bundle.zip"))?);
//! let extractor = ZipExtractor::new(reader);
//!
//! for entry in extractor.list_files().await? {
//!     if !entry.is_directory {
//!         let bytes = extractor.extract_to_memory(&entry).await?;
//!         println!("{}: {} bytes", entry.file_name, bytes.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use flate2::read::DeflateDecoder;
use flate2::{Decompress, FlushDecompress, Status};

use crate::error::ReadError;
use crate::io::ReadAt;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Compressed bytes fetched per request while inflating incrementally.
const FETCH_CHUNK_SIZE: u64 = 64 * 1024;

/// High-level ZIP file extractor.
///
/// This struct provides convenient methods for listing and extracting
/// files from ZIP archives. It wraps the lower-level [`ZipParser`] and
/// handles decompression automatically.
///
/// ## Supported Compression Methods
///
/// - `STORED` (0): No compression, data is copied directly
/// - `DEFLATE` (8): Standard ZIP compression using flate2
///
/// ## Generic Parameter
///
/// The extractor is generic over the reader type `R`, allowing it to
/// work with local files ([`LocalFileReader`](crate::LocalFileReader)),
/// in-memory buffers ([`BytesReader`](crate::BytesReader)) and remote
/// sources ([`HttpRangeReader`](crate::HttpRangeReader)).
pub struct ZipExtractor<R: ReadAt> {
    /// The underlying parser for reading ZIP structures
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    /// Create a new extractor for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive.
    ///
    /// Returns metadata for all entries in the ZIP file, including
    /// both files and directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is invalid or cannot be read.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>, ReadError> {
        self.parser.list_files().await
    }

    /// Access the underlying parser, e.g. for
    /// [`read_straight_ahead`](ZipParser::read_straight_ahead) or local
    /// header reads.
    pub fn parser(&self) -> &ZipParser<R> {
        &self.parser
    }

    /// Extract a file's contents to memory.
    ///
    /// Reads and decompresses the file data, returning it as a byte vector.
    /// This method handles both STORED and DEFLATE compression methods.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file is encrypted or uses an unsupported compression method
    /// - The data cannot be read or decompressed
    ///
    /// # Memory Usage
    ///
    /// This method loads the entire file into memory. For large files,
    /// consider [`entry_reader()`](ZipExtractor::entry_reader) or
    /// [`extract_to_file()`](ZipExtractor::extract_to_file) instead.
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>, ReadError> {
        if entry.is_encrypted() {
            return Err(ReadError::UnsupportedFeature("encrypted entry"));
        }

        // Calculate where the actual file data begins
        let data_offset = self.data_offset(entry).await?;

        match entry.storage_mode {
            CompressionMethod::Stored => {
                // No compression - read data directly
                let mut buf = vec![0u8; entry.uncompressed_size as usize];
                self.parser.reader().read_at(data_offset, &mut buf).await?;
                Ok(buf)
            }
            CompressionMethod::Deflate => {
                // DEFLATE compression - read compressed data first
                let mut compressed = vec![0u8; entry.compressed_size as usize];
                self.parser
                    .reader()
                    .read_at(data_offset, &mut compressed)
                    .await?;

                // Decompress using flate2's DeflateDecoder
                // Note: ZIP uses raw DEFLATE, not zlib or gzip wrapped
                let mut decoder = DeflateDecoder::new(&compressed[..]);
                let mut decompressed = Vec::with_capacity(entry.uncompressed_size as usize);
                decoder.read_to_end(&mut decompressed)?;

                Ok(decompressed)
            }
            CompressionMethod::Unknown(_) => {
                Err(ReadError::UnsupportedFeature("compression method"))
            }
        }
    }

    /// Extract a file to the filesystem.
    ///
    /// Reads, decompresses, and writes the file to the specified path.
    /// Parent directories are created automatically if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read or decompressed
    /// - Parent directories cannot be created
    /// - The file cannot be written
    pub async fn extract_to_file(
        &self,
        entry: &ZipFileEntry,
        output_path: &Path,
    ) -> Result<(), ReadError> {
        // Ensure parent directories exist
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        // Extract file contents to memory
        let data = self.extract_to_memory(entry).await?;

        // Write to the output file
        let mut file = fs::File::create(output_path).await?;
        file.write_all(&data).await?;

        Ok(())
    }

    /// Open an incremental reader over one entry's body.
    ///
    /// The reader pulls compressed bytes in bounded chunks and never reads
    /// past the entry's declared compressed region, so it is safe against
    /// whatever follows the entry in the archive.
    pub async fn entry_reader(&self, entry: &ZipFileEntry) -> Result<EntryReader<R>, ReadError> {
        if entry.is_encrypted() {
            return Err(ReadError::UnsupportedFeature("encrypted entry"));
        }
        let decoder = match entry.storage_mode {
            CompressionMethod::Stored => Decoder::Stored,
            CompressionMethod::Deflate => {
                // Raw DEFLATE stream, no zlib header
                Decoder::Deflated(Box::new(Decompress::new(false)))
            }
            CompressionMethod::Unknown(_) => {
                return Err(ReadError::UnsupportedFeature("compression method"));
            }
        };
        let data_offset = self.data_offset(entry).await?;

        Ok(EntryReader {
            reader: Arc::clone(self.parser.reader()),
            decoder,
            position: data_offset,
            compressed_remaining: entry.compressed_size,
            in_buf: Vec::new(),
            in_pos: 0,
            done: entry.compressed_size == 0,
        })
    }

    /// The entry's data offset: taken from the entry when its local header
    /// was already read, computed on the fly otherwise.
    async fn data_offset(&self, entry: &ZipFileEntry) -> Result<u64, ReadError> {
        match entry.data_offset {
            Some(offset) => Ok(offset),
            None => self.parser.get_data_offset(entry).await,
        }
    }
}

enum Decoder {
    Stored,
    Deflated(Box<Decompress>),
}

/// Bounded, incremental reader over a single entry body.
///
/// Obtained from [`ZipExtractor::entry_reader`]. Tracks EOF against the
/// declared compressed size; CRC32 is not verified.
pub struct EntryReader<R: ReadAt> {
    reader: Arc<R>,
    decoder: Decoder,
    /// Absolute offset of the next compressed byte to fetch.
    position: u64,
    compressed_remaining: u64,
    in_buf: Vec<u8>,
    in_pos: usize,
    done: bool,
}

impl<R: ReadAt> EntryReader<R> {
    /// Read up to `n` decompressed bytes. Returns an empty vector at end
    /// of entry.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        if self.done || n == 0 {
            return Ok(Vec::new());
        }
        match self.decoder {
            Decoder::Stored => self.read_stored(n).await,
            Decoder::Deflated(_) => self.read_deflated(n).await,
        }
    }

    async fn read_stored(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        let take = (n as u64).min(self.compressed_remaining) as usize;
        let mut buf = vec![0u8; take];
        let got = self.reader.read_at(self.position, &mut buf).await?;
        if got == 0 {
            return Err(ReadError::InvalidStructure("entry body truncated"));
        }
        buf.truncate(got);
        self.position += got as u64;
        self.compressed_remaining -= got as u64;
        if self.compressed_remaining == 0 {
            self.done = true;
        }
        Ok(buf)
    }

    async fn read_deflated(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n && !self.done {
            // Refill the compressed-input window when drained.
            if self.in_pos == self.in_buf.len() {
                if self.compressed_remaining == 0 {
                    // All compressed bytes consumed but no stream end seen.
                    return Err(ReadError::InvalidStructure(
                        "deflate stream ended prematurely",
                    ));
                }
                let take = FETCH_CHUNK_SIZE.min(self.compressed_remaining) as usize;
                self.in_buf.resize(take, 0);
                let got = self.reader.read_at(self.position, &mut self.in_buf).await?;
                if got == 0 {
                    return Err(ReadError::InvalidStructure("entry body truncated"));
                }
                self.in_buf.truncate(got);
                self.in_pos = 0;
                self.position += got as u64;
                self.compressed_remaining -= got as u64;
            }

            let Decoder::Deflated(inflater) = &mut self.decoder else {
                return Err(ReadError::InvalidStructure("decoder mismatch"));
            };
            let flush = if self.compressed_remaining == 0 {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            let before_in = inflater.total_in();
            let status = inflater
                .decompress_vec(&self.in_buf[self.in_pos..], &mut out, flush)
                .map_err(|_| ReadError::InvalidStructure("corrupt deflate stream"))?;
            self.in_pos += (inflater.total_in() - before_in) as usize;

            match status {
                Status::StreamEnd => self.done = true,
                Status::Ok | Status::BufError => {
                    // BufError with a full output vector just means "come
                    // back with more room", which the loop condition does.
                    if out.len() == out.capacity() {
                        break;
                    }
                }
            }
        }
        Ok(out)
    }
}
