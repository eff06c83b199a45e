//! Running CRC32 checksum over entry bodies.

use std::io::Read;

use crc32fast::Hasher;

use crate::error::WriteError;

/// Chunk size used when draining a reader, 64 KiB.
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// An incremental CRC32 (IEEE) accumulator.
///
/// Thin wrapper around [`crc32fast::Hasher`] that adds the two operations
/// the archive writer needs beyond plain updates: reading the current value
/// without consuming the accumulator, and combining with the CRC of a blob
/// that was checksummed elsewhere.
#[derive(Clone, Default)]
pub struct Crc32Accumulator {
    hasher: Hasher,
}

impl Crc32Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes into the checksum.
    ///
    /// Callers are expected to feed buffered chunks (the entry-body writers
    /// put a 64 KiB buffer in front of this); single-byte updates are
    /// correct but slow.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// The CRC32 of everything fed so far.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Combine with the CRC of a blob of `other_len` bytes whose CRC32 is
    /// `other_crc`, as if that blob had been fed through `update` after the
    /// bytes seen so far.
    ///
    /// Uses the GF(2) matrix combination implemented by `crc32fast`, so the
    /// blob's bytes are never touched.
    pub fn append(&mut self, other_crc: u32, other_len: u64) {
        let other = Hasher::new_with_initial_len(other_crc, other_len);
        self.hasher.combine(&other);
    }

    /// Drain a reader to the end, feeding every byte into the checksum.
    pub fn from_stream<R: Read>(reader: &mut R) -> Result<Self, WriteError> {
        let mut acc = Self::new();
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            acc.update(&buf[..n]);
        }
        Ok(acc)
    }
}
