//! Position-tracking and coalescing wrappers for append-only sinks.
//!
//! The streamer never seeks, so it must know how far into the sink it is at
//! all times. [`OffsetSink`] counts every byte that passes through it and
//! can also be advanced without writing, for callers that push entry bodies
//! to the target through a bypass such as `sendfile`.

use std::io::{self, Write};

/// Default capacity for [`WriteBuffer`], 64 KiB.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// A write-and-tell adapter over any append-only byte sink.
///
/// Wraps an [`io::Write`] target and maintains a monotonic byte position.
/// The position advances by the full length of every successful write
/// (short writes are absorbed with `write_all`), and can be advanced
/// manually with [`advance_by`](OffsetSink::advance_by) when bytes reach
/// the target outside this wrapper.
pub struct OffsetSink<W> {
    inner: W,
    position: u64,
}

impl<W: Write> OffsetSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, position: 0 }
    }

    /// Current byte offset into the sink.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Advance the position counter by `n` without writing anything.
    ///
    /// Used when entry body bytes bypass the library (e.g. `sendfile`
    /// straight to a socket) so offset accounting stays correct.
    pub fn advance_by(&mut self, n: u64) {
        self.position += n;
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for OffsetSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write_all(buf)?;
        self.position += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A pass-through buffer that coalesces small writes.
///
/// Writes accumulate until the configured capacity would be exceeded, at
/// which point the buffer flushes to the inner sink. Writes larger than the
/// capacity are forwarded directly after a flush instead of being buffered.
///
/// Used ahead of the CRC/deflate stage of entry-body writers and ahead of
/// the channel in the pull adaptor, where per-call overhead (or a syscall
/// per chunk) would otherwise dominate.
pub struct WriteBuffer<W> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
}

impl<W: Write> WriteBuffer<W> {
    pub fn new(inner: W) -> Self {
        Self::with_capacity(WRITE_BUFFER_SIZE, inner)
    }

    pub fn with_capacity(capacity: usize, inner: W) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Flush buffered bytes and return the inner sink.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush_buf()?;
        Ok(self.inner)
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.buf.len() + buf.len() > self.capacity {
            self.flush_buf()?;
        }
        if buf.len() > self.capacity {
            // Oversized writes go straight through, they would only be
            // split up by the buffer.
            self.inner.write_all(buf)?;
        } else {
            self.buf.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf()?;
        self.inner.flush()
    }
}
