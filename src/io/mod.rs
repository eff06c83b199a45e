mod chunks;
mod http;
mod local;
pub(crate) mod sink;

pub use chunks::{ArchiveChunks, ChunkSink, stream_archive, streaming_http_headers};
pub use http::HttpRangeReader;
pub use local::LocalFileReader;
pub use sink::{OffsetSink, WriteBuffer};

use crate::error::ReadError;
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, ReadError>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// In-memory byte source.
///
/// The cheapest way to validate an archive that was just produced into a
/// buffer, without a round-trip through the filesystem.
pub struct BytesReader {
    bytes: Vec<u8>,
}

impl BytesReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

#[async_trait]
impl ReadAt for BytesReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, ReadError> {
        let start = offset.min(self.bytes.len() as u64) as usize;
        let end = (start + buf.len()).min(self.bytes.len());
        let n = end - start;
        buf[..n].copy_from_slice(&self.bytes[start..end]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
