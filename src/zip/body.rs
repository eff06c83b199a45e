//! Entry-body write pipelines.
//!
//! An [`EntryWriter`] is what the `write_*_file` closures receive. It
//! implements [`io::Write`], tracks the CRC32 and byte counts of everything
//! written, and finishes the entry with a data descriptor through the
//! streamer. Three pipelines exist:
//!
//! - **stored**: bytes go to the sink verbatim;
//! - **deflated**: bytes go through the raw-DEFLATE encoder;
//! - **heuristic**: bytes are buffered (up to 128 KiB) while a probe
//!   encoder measures compressibility; the entry then commits to whichever
//!   mode pays off and the buffer is replayed through it.
//!
//! Incoming writes are coalesced into 64 KiB chunks ahead of the CRC and
//! encoder stages, so callers may write in small pieces without a per-call
//! penalty.

use std::io::{self, Write};

use crate::error::WriteError;
use crate::io::sink::WRITE_BUFFER_SIZE;

use super::crc32::Crc32Accumulator;
use super::deflate::Deflater;
use super::entry::EntryOptions;
use super::streamer::{Streamer, unwrap_write_error};
use super::structures::CompressionMethod;

/// How much of a heuristic entry is buffered before the stored-vs-deflated
/// decision is forced.
const HEURISTIC_BUFFER_SIZE: usize = 128 * 1024;
/// A probe must shrink the sample to this fraction or less for deflate to
/// be worth it.
const MIN_VIABLE_RATIO: f64 = 0.75;

/// Which pipeline a `write_*_file` call sets up.
#[derive(Debug, Clone, Copy)]
pub(crate) enum EntryBodyKind {
    Stored,
    Deflated,
    Heuristic,
}

#[derive(Default)]
struct StoredPipeline {
    crc: Crc32Accumulator,
    bytes_in: u64,
}

struct DeflatedPipeline {
    crc: Crc32Accumulator,
    deflater: Deflater,
    bytes_in: u64,
    bytes_out: u64,
}

impl DeflatedPipeline {
    fn new() -> Self {
        Self {
            crc: Crc32Accumulator::new(),
            deflater: Deflater::new(),
            bytes_in: 0,
            bytes_out: 0,
        }
    }
}

/// Heuristic entries buffer their prefix before any header is written, so
/// the entry name and options ride along until the commit point.
struct HeuristicBuffer {
    filename: String,
    options: EntryOptions,
    buf: Vec<u8>,
    probe: Deflater,
    probe_out: u64,
}

enum BodyState {
    Stored(StoredPipeline),
    Deflated(DeflatedPipeline),
    Buffering(HeuristicBuffer),
    Finished,
}

/// Byte acceptor for one entry body, handed to `write_*_file` closures.
///
/// Holds the streamer's mutable borrow for the duration of the entry, which
/// is what makes two concurrently open entry bodies unrepresentable.
pub struct EntryWriter<'a, W: Write> {
    streamer: &'a mut Streamer<W>,
    state: BodyState,
    pending: Vec<u8>,
    committed: bool,
}

impl<'a, W: Write> EntryWriter<'a, W> {
    pub(crate) fn new(
        streamer: &'a mut Streamer<W>,
        kind: EntryBodyKind,
        filename: &str,
        options: EntryOptions,
    ) -> Result<Self, WriteError> {
        let (state, committed) = match kind {
            EntryBodyKind::Stored => {
                streamer.begin_entry(
                    filename,
                    CompressionMethod::Stored,
                    0,
                    0,
                    0,
                    options,
                    false,
                )?;
                (BodyState::Stored(StoredPipeline::default()), true)
            }
            EntryBodyKind::Deflated => {
                streamer.begin_entry(
                    filename,
                    CompressionMethod::Deflate,
                    0,
                    0,
                    0,
                    options,
                    false,
                )?;
                (BodyState::Deflated(DeflatedPipeline::new()), true)
            }
            EntryBodyKind::Heuristic => (
                BodyState::Buffering(HeuristicBuffer {
                    filename: filename.to_string(),
                    options,
                    buf: Vec::new(),
                    probe: Deflater::new(),
                    probe_out: 0,
                }),
                false,
            ),
        };
        Ok(Self {
            streamer,
            state,
            pending: Vec::with_capacity(WRITE_BUFFER_SIZE),
            committed,
        })
    }

    /// Complete the entry: flush everything, settle the heuristic if still
    /// undecided, and write the data descriptor. Safe to call twice.
    pub(crate) fn finish(&mut self) -> Result<u64, WriteError> {
        self.flush_pending().map_err(unwrap_write_error)?;
        if matches!(self.state, BodyState::Buffering(_)) {
            self.commit().map_err(unwrap_write_error)?;
        }
        match std::mem::replace(&mut self.state, BodyState::Finished) {
            BodyState::Stored(pipeline) => self.streamer.update_last_entry_and_write_data_descriptor(
                pipeline.crc.value(),
                pipeline.bytes_in,
                pipeline.bytes_in,
            ),
            BodyState::Deflated(mut pipeline) => {
                pipeline.bytes_out += pipeline.deflater.finish(self.streamer.sink())?;
                self.streamer.update_last_entry_and_write_data_descriptor(
                    pipeline.crc.value(),
                    pipeline.bytes_out,
                    pipeline.bytes_in,
                )
            }
            BodyState::Finished => Ok(self.streamer.offset()),
            BodyState::Buffering(_) => unreachable!("heuristic committed above"),
        }
    }

    /// Finalize and release the encoder state without any further writes
    /// to the sink. Returns whether a local header was written (i.e.
    /// whether there is an entry to roll back). Idempotent.
    pub(crate) fn dispose_on_failure(&mut self) -> bool {
        match std::mem::replace(&mut self.state, BodyState::Finished) {
            BodyState::Deflated(mut pipeline) => pipeline.deflater.dispose(),
            BodyState::Buffering(mut heuristic) => heuristic.probe.dispose(),
            BodyState::Stored(_) | BodyState::Finished => {}
        }
        self.pending.clear();
        self.committed
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.pending);
        self.process(&chunk)?;
        self.pending = chunk;
        self.pending.clear();
        Ok(())
    }

    /// Push one chunk through the active pipeline.
    fn process(&mut self, chunk: &[u8]) -> io::Result<()> {
        match &mut self.state {
            BodyState::Stored(pipeline) => {
                pipeline.crc.update(chunk);
                pipeline.bytes_in += chunk.len() as u64;
                self.streamer.sink().write_all(chunk)
            }
            BodyState::Deflated(pipeline) => {
                pipeline.crc.update(chunk);
                pipeline.bytes_in += chunk.len() as u64;
                pipeline.bytes_out += pipeline.deflater.write(chunk, self.streamer.sink())?;
                Ok(())
            }
            BodyState::Buffering(_) => self.buffer_chunk(chunk),
            BodyState::Finished => Err(io::Error::other("entry body already finished")),
        }
    }

    /// Heuristic path: accumulate into the decision buffer, committing as
    /// soon as the threshold is reached; anything past the threshold goes
    /// straight through the committed pipeline.
    fn buffer_chunk(&mut self, mut chunk: &[u8]) -> io::Result<()> {
        loop {
            let BodyState::Buffering(heuristic) = &mut self.state else {
                return self.process(chunk);
            };
            if chunk.is_empty() {
                return Ok(());
            }

            let room = HEURISTIC_BUFFER_SIZE - heuristic.buf.len();
            if chunk.len() < room {
                heuristic.buf.extend_from_slice(chunk);
                heuristic.probe_out += heuristic.probe.write(chunk, &mut io::sink())?;
                return Ok(());
            }

            let (head, tail) = chunk.split_at(room);
            heuristic.buf.extend_from_slice(head);
            heuristic.probe_out += heuristic.probe.write(head, &mut io::sink())?;
            self.commit()?;
            chunk = tail;
        }
    }

    /// Settle the heuristic: measure the probe, write the local header for
    /// the chosen mode and replay the buffered prefix through it.
    fn commit(&mut self) -> io::Result<()> {
        let BodyState::Buffering(mut heuristic) =
            std::mem::replace(&mut self.state, BodyState::Finished)
        else {
            return Ok(());
        };

        heuristic.probe_out += heuristic.probe.finish(&mut io::sink())?;
        // An empty body has nothing to gain from compression.
        let deflate = !heuristic.buf.is_empty()
            && heuristic.probe_out as f64 / heuristic.buf.len() as f64 <= MIN_VIABLE_RATIO;

        let mode = if deflate {
            CompressionMethod::Deflate
        } else {
            CompressionMethod::Stored
        };
        self.streamer
            .begin_entry(&heuristic.filename, mode, 0, 0, 0, heuristic.options, false)
            .map_err(io::Error::other)?;
        self.committed = true;
        self.state = if deflate {
            BodyState::Deflated(DeflatedPipeline::new())
        } else {
            BodyState::Stored(StoredPipeline::default())
        };

        let replay = std::mem::take(&mut heuristic.buf);
        self.process(&replay)
    }
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if matches!(self.state, BodyState::Finished) {
            return Err(io::Error::other("entry body already finished"));
        }
        if self.pending.len() + buf.len() > WRITE_BUFFER_SIZE {
            self.flush_pending()?;
        }
        if buf.len() > WRITE_BUFFER_SIZE {
            self.process(buf)?;
        } else {
            self.pending.extend_from_slice(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()
    }
}
