//! Exact archive-size prediction.
//!
//! Useful for `Content-Length` headers: run the same entry-addition script
//! the real archive will use, with sizes only, and get the exact byte count
//! back before producing a single real byte.

use std::io;

use crate::error::WriteError;

use super::entry::EntryOptions;
use super::streamer::Streamer;

/// Predicts the byte size of an archive by driving a real [`Streamer`]
/// over a discarding sink.
///
/// Because every header, descriptor and central-directory byte is produced
/// by the same code paths as the real archive (bodies replaced by
/// [`simulate_write`](Streamer::simulate_write)), the prediction cannot
/// drift from the producer — Zip64 promotions included.
///
/// ## Example
///
/// ```
/// use zipwire::SizeEstimator;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut estimator = SizeEstimator::new();
/// estimator.add_stored_entry("video.mp4", 9_000_000, false)?;
/// estimator.add_deflated_entry("index.json", 48_213, 310_000, true)?;
/// let archive_size = estimator.size()?;
/// # Ok(())
/// # }
/// ```
pub struct SizeEstimator {
    streamer: Streamer<io::Sink>,
}

impl SizeEstimator {
    pub fn new() -> Self {
        Self {
            streamer: Streamer::new(io::sink()),
        }
    }

    /// Account for a stored entry of `size` bytes.
    pub fn add_stored_entry(
        &mut self,
        filename: &str,
        size: u64,
        use_data_descriptor: bool,
    ) -> Result<&mut Self, WriteError> {
        let options = EntryOptions::new().use_data_descriptor(use_data_descriptor);
        self.streamer.add_stored_entry(filename, size, 0, options)?;
        self.streamer.simulate_write(size)?;
        if use_data_descriptor {
            self.streamer
                .update_last_entry_and_write_data_descriptor(0, size, size)?;
        }
        Ok(self)
    }

    /// Account for a deflated entry with the given sizes.
    pub fn add_deflated_entry(
        &mut self,
        filename: &str,
        compressed_size: u64,
        uncompressed_size: u64,
        use_data_descriptor: bool,
    ) -> Result<&mut Self, WriteError> {
        let options = EntryOptions::new().use_data_descriptor(use_data_descriptor);
        self.streamer.add_deflated_entry(
            filename,
            compressed_size,
            uncompressed_size,
            0,
            options,
        )?;
        self.streamer.simulate_write(compressed_size)?;
        if use_data_descriptor {
            self.streamer.update_last_entry_and_write_data_descriptor(
                0,
                compressed_size,
                uncompressed_size,
            )?;
        }
        Ok(self)
    }

    /// Account for a directory entry.
    pub fn add_empty_directory(&mut self, dirname: &str) -> Result<&mut Self, WriteError> {
        self.streamer
            .add_empty_directory(dirname, EntryOptions::new())?;
        Ok(self)
    }

    /// Finalize the phantom archive and return its exact byte size.
    pub fn size(mut self) -> Result<u64, WriteError> {
        self.streamer.close()
    }
}

impl Default for SizeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run the same script against an estimator and a real streamer over a
    /// byte sink; both must land on identical offsets.
    #[test]
    fn prediction_matches_streamer() {
        let mut estimator = SizeEstimator::new();
        estimator
            .add_stored_entry("raw/blob.bin", 20_000, false)
            .unwrap()
            .add_stored_entry("raw/with-descriptor.bin", 4_096, true)
            .unwrap()
            .add_deflated_entry("packed.dat", 1_234, 50_000, true)
            .unwrap()
            .add_empty_directory("raw")
            .unwrap();
        let predicted = estimator.size().unwrap();

        let mut streamer = Streamer::new(Vec::new());
        streamer
            .add_stored_entry("raw/blob.bin", 20_000, 0, EntryOptions::new())
            .unwrap();
        streamer.simulate_write(20_000).unwrap();
        streamer
            .add_stored_entry(
                "raw/with-descriptor.bin",
                4_096,
                0,
                EntryOptions::new().use_data_descriptor(true),
            )
            .unwrap();
        streamer.simulate_write(4_096).unwrap();
        streamer
            .update_last_entry_and_write_data_descriptor(0, 4_096, 4_096)
            .unwrap();
        streamer
            .add_deflated_entry(
                "packed.dat",
                1_234,
                50_000,
                0,
                EntryOptions::new().use_data_descriptor(true),
            )
            .unwrap();
        streamer.simulate_write(1_234).unwrap();
        streamer
            .update_last_entry_and_write_data_descriptor(0, 1_234, 50_000)
            .unwrap();
        streamer
            .add_empty_directory("raw", EntryOptions::new())
            .unwrap();
        let actual = streamer.close().unwrap();

        assert_eq!(predicted, actual);
    }

    #[test]
    fn empty_archive_is_22_bytes() {
        assert_eq!(SizeEstimator::new().size().unwrap(), 22);
    }

    #[test]
    fn zip64_entries_are_accounted() {
        let mut estimator = SizeEstimator::new();
        estimator
            .add_stored_entry("huge.iso", 5 * 1024 * 1024 * 1024, false)
            .unwrap();
        let with_zip64 = estimator.size().unwrap();

        let mut estimator = SizeEstimator::new();
        estimator.add_stored_entry("huge.iso", 1024, false).unwrap();
        let without_zip64 = estimator.size().unwrap();

        // Local + central Zip64 extras and the Zip64 EOCD must show up in
        // the difference beyond the body delta.
        let body_delta = 5 * 1024 * 1024 * 1024 - 1024;
        assert_eq!(
            with_zip64 - without_zip64,
            body_delta + 16 + 4 + 28 + 4 + 56 + 20
        );
    }
}
