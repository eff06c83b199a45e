//! Raw DEFLATE encoding for entry bodies.
//!
//! ZIP stores raw DEFLATE streams with no zlib header and no Adler32
//! trailer. This module wraps flate2's low-level [`Compress`] state so the
//! encoder never owns the sink: callers hand in the sink on every call,
//! which keeps borrow lifetimes out of the encoder and lets the same
//! encoder write to a real sink or a discarding one (the heuristic probe).

use std::io::{self, Write};

use flate2::{Compress, Compression, FlushCompress, Status};

/// Output scratch size per compression step, 32 KiB.
const OUT_CHUNK_SIZE: usize = 32 * 1024;

/// An incremental raw-DEFLATE encoder.
///
/// Accepts uncompressed bytes and emits compressed bytes to whatever sink
/// is passed in. [`finish`](Deflater::finish) must be called exactly once
/// to flush the stream trailer; [`dispose`](Deflater::dispose) finalizes
/// the native state without writing anywhere, for teardown on error paths.
pub struct Deflater {
    compress: Compress,
    out: Vec<u8>,
    finished: bool,
}

impl Deflater {
    pub fn new() -> Self {
        Self::with_level(Compression::default())
    }

    pub fn with_level(level: Compression) -> Self {
        Self {
            compress: Compress::new(level, false),
            out: Vec::with_capacity(OUT_CHUNK_SIZE),
            finished: false,
        }
    }

    /// Compress `input`, writing whatever output becomes available to
    /// `sink`. Returns the number of compressed bytes emitted.
    pub fn write<W: Write + ?Sized>(&mut self, mut input: &[u8], sink: &mut W) -> io::Result<u64> {
        let mut emitted = 0u64;
        while !input.is_empty() {
            let before_in = self.compress.total_in();
            let before_out = self.compress.total_out();
            self.out.clear();
            self.compress
                .compress_vec(input, &mut self.out, FlushCompress::None)
                .map_err(io::Error::other)?;
            let consumed = (self.compress.total_in() - before_in) as usize;
            let produced = self.compress.total_out() - before_out;

            sink.write_all(&self.out)?;
            emitted += produced;
            input = &input[consumed..];

            if consumed == 0 && produced == 0 {
                // The encoder wants more output space than the scratch has.
                self.out.reserve(self.out.capacity() + OUT_CHUNK_SIZE);
            }
        }
        Ok(emitted)
    }

    /// Flush the remaining output and terminate the DEFLATE stream.
    ///
    /// Returns the number of compressed bytes emitted by the flush. Calling
    /// `finish` again after a completed finish is a no-op returning 0.
    pub fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<u64> {
        if self.finished {
            return Ok(0);
        }
        let mut emitted = 0u64;
        loop {
            let before_out = self.compress.total_out();
            self.out.clear();
            let status = self
                .compress
                .compress_vec(&[], &mut self.out, FlushCompress::Finish)
                .map_err(io::Error::other)?;
            sink.write_all(&self.out)?;
            emitted += self.compress.total_out() - before_out;
            if matches!(status, Status::StreamEnd) {
                break;
            }
        }
        self.finished = true;
        Ok(emitted)
    }

    /// Finalize the encoder, discarding any pending output.
    ///
    /// Never writes to a sink, never fails, and is idempotent, so it is
    /// safe on every abnormal-teardown path even when the encoder still has
    /// buffered bytes.
    pub fn dispose(&mut self) {
        if self.finished {
            return;
        }
        loop {
            self.out.clear();
            match self
                .compress
                .compress_vec(&[], &mut self.out, FlushCompress::Finish)
            {
                Ok(Status::StreamEnd) | Err(_) => break,
                Ok(_) => {}
            }
        }
        self.finished = true;
    }
}

impl Default for Deflater {
    fn default() -> Self {
        Self::new()
    }
}
