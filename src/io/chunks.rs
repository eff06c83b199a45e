//! Pull-based consumption of a push-based streamer.
//!
//! HTTP frameworks want a response body they can pull chunks from; the
//! [`Streamer`](crate::Streamer) pushes bytes into a sink. This module
//! bridges the two: the producer runs on a worker thread writing into a
//! bounded channel (suspending when the consumer lags), and the consumer
//! side is a plain [`Iterator`] over owned byte chunks.

use std::io::{self, Write};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::JoinHandle;

use chrono::Utc;

use crate::error::WriteError;
use crate::zip::Streamer;

use super::sink::WriteBuffer;

/// How many chunks may be in flight before the producer suspends.
const CHANNEL_DEPTH: usize = 8;

/// The sink type handed to [`stream_archive`] closures.
pub type ChunkSink = Box<dyn Write + Send>;

struct ChannelSink {
    tx: SyncSender<Vec<u8>>,
}

impl Write for ChannelSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "archive consumer went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run an archive-producing closure on a worker thread and iterate over
/// the bytes it emits.
///
/// The closure receives a ready [`Streamer`]; it should add entries and
/// return without calling `close` — the archive is finalized automatically
/// once the closure returns `Ok`. Output is coalesced into chunks of up to
/// 64 KiB; every yielded chunk is non-empty and owns its bytes, so it can
/// be retained or sent onward freely.
///
/// A failure in the closure (or in finalization) surfaces as the final
/// iterator item. Dropping the iterator early disconnects the channel and
/// the producer winds down with a broken-pipe error on its next write.
///
/// ## Example
///
/// ```
/// use std::io::Write;
/// use zipwire::{EntryOptions, stream_archive};
///
/// # fn main() -> anyhow::Result<()> {
/// let chunks = stream_archive(|streamer| {
///     streamer.write_file("hello.txt", EntryOptions::new(), |w| {
///         w.write_all(b"hello over the wire")
///     })?;
///     Ok(())
/// });
///
/// for chunk in chunks {
///     let chunk = chunk?;
///     // hand the chunk to the response body
///     assert!(!chunk.is_empty());
/// }
/// # Ok(())
/// # }
/// ```
pub fn stream_archive<F>(build: F) -> ArchiveChunks
where
    F: FnOnce(&mut Streamer<ChunkSink>) -> Result<(), WriteError> + Send + 'static,
{
    let (tx, rx) = sync_channel(CHANNEL_DEPTH);
    let producer = std::thread::spawn(move || -> Result<u64, WriteError> {
        let sink: ChunkSink = Box::new(WriteBuffer::new(ChannelSink { tx }));
        let mut streamer = Streamer::new(sink);
        build(&mut streamer)?;
        let size = streamer.close()?;
        streamer.into_inner().flush()?;
        Ok(size)
    });

    ArchiveChunks {
        rx,
        producer: Some(producer),
    }
}

/// Iterator over the chunks of an archive produced by [`stream_archive`].
pub struct ArchiveChunks {
    rx: Receiver<Vec<u8>>,
    producer: Option<JoinHandle<Result<u64, WriteError>>>,
}

impl Iterator for ArchiveChunks {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(chunk) => Some(Ok(chunk)),
            Err(_) => {
                // Channel closed: the producer is done, surface its result.
                let producer = self.producer.take()?;
                match producer.join() {
                    Ok(Ok(_)) => None,
                    Ok(Err(err)) => Some(Err(io::Error::other(err))),
                    Err(_) => Some(Err(io::Error::other("archive producer panicked"))),
                }
            }
        }
    }
}

/// Response headers recommended when streaming an archive as an HTTP body.
///
/// These disable the buffering and re-compression middleware configurations
/// known to break long streaming responses.
pub fn streaming_http_headers() -> [(&'static str, String); 4] {
    let now = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
    [
        ("Content-Type", "application/zip".to_string()),
        ("Content-Encoding", "identity".to_string()),
        ("X-Accel-Buffering", "no".to_string()),
        ("Last-Modified", now.to_string()),
    ]
}
