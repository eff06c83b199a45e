//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! This approach is efficient for HTTP Range requests, as we only
//! need to fetch the file's tail to list contents. The central directory
//! is buffered whole, so steps 3–4 are pure byte slicing with no further
//! I/O until local headers are requested.
//!
//! For archives whose central directory is missing or truncated there is
//! [`read_straight_ahead`](ZipParser::read_straight_ahead), a best-effort
//! fallback that walks local file headers from offset 0.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::ReadError;
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// local files, in-memory buffers and HTTP sources.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let entries = parser.list_files().await?;
/// for mut entry in entries {
///     parser.read_local_header(&mut entry).await?;
///     // Read file data from entry.compressed_data_offset()?...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    /// Create a new parser for the given reader.
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature. A candidate
    /// only counts when its comment-length field reaches exactly to the
    /// end of the file; the rightmost such candidate wins.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    ///
    /// # Errors
    ///
    /// [`ReadError::MissingEocd`] if no valid EOCD can be found, meaning
    /// the file is not a usable ZIP archive.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64), ReadError> {
        // Optimization: First try the simple case where there's no comment.
        // This avoids reading extra data in the common case.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_at(offset, &mut buf).await?;

            // Check for signature and zero-length comment
            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // EOCD not at expected location - search for it.
        // The EOCD could be earlier if there's a ZIP comment.
        // We need to search backwards from the end of the file.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_at(search_start, &mut buf).await?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..buf.len().saturating_sub(EndOfCentralDirectory::SIZE - 1)).rev() {
            if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                // Found a potential EOCD - verify the comment length is correct.
                // The comment length field should match the remaining bytes.
                let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                    let eocd = EndOfCentralDirectory::from_bytes(
                        &buf[i..i + EndOfCentralDirectory::SIZE],
                    )?;
                    return Ok((eocd, search_start + i as u64));
                }
            }
        }

        Err(ReadError::MissingEocd)
    }

    /// Read the ZIP64 End of Central Directory record, if present.
    ///
    /// The ZIP64 EOCD locator, when it exists, sits at a fixed distance
    /// (20 bytes) before the regular EOCD. Its signature is verified; when
    /// absent the archive is a plain ZIP and `None` is returned.
    ///
    /// # Arguments
    ///
    /// * `eocd_offset` - Offset of the regular EOCD in the file
    ///
    /// # Errors
    ///
    /// Returns an error if a locator is present but the ZIP64 EOCD it
    /// points to is invalid, or if the archive spans multiple disks.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Option<Zip64EOCD>, ReadError> {
        if eocd_offset < Zip64EOCDLocator::SIZE as u64 {
            return Ok(None);
        }
        let locator_offset = eocd_offset - Zip64EOCDLocator::SIZE as u64;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_at(locator_offset, &mut locator_buf).await?;

        if &locator_buf[0..4] != Zip64EOCDLocator::SIGNATURE {
            return Ok(None);
        }
        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;
        if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
            return Err(ReadError::UnsupportedFeature("multi-disk archive"));
        }

        // Read the actual ZIP64 EOCD from the offset specified in the locator
        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_at(locator.eocd64_offset, &mut eocd64_buf)
            .await?;

        Zip64EOCD::from_bytes(&eocd64_buf).map(Some)
    }

    /// List all files in the ZIP archive.
    ///
    /// Reads the Central Directory to get metadata for all entries.
    /// This method reads the EOCD first, then fetches and parses the
    /// entire Central Directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the archive is invalid, cannot be read, or
    /// spans multiple disks.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>, ReadError> {
        // Find and parse the EOCD to get Central Directory location
        let (eocd, eocd_offset) = self.find_eocd().await?;

        if (eocd.disk_number != 0 && eocd.disk_number != 0xFFFF)
            || (eocd.disk_with_cd != 0 && eocd.disk_with_cd != 0xFFFF)
        {
            return Err(ReadError::UnsupportedFeature("multi-disk archive"));
        }

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries) = match self.read_zip64_eocd(eocd_offset).await? {
            Some(eocd64) => (eocd64.cd_offset, eocd64.cd_size, eocd64.total_entries),
            None => (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
            ),
        };

        // Read the entire Central Directory in one request
        // (efficient for HTTP as it's a single Range request)
        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_at(cd_offset, &mut cd_data).await?;

        // Parse each Central Directory File Header entry
        let mut entries = Vec::with_capacity(total_entries.min(1 << 20) as usize);
        let mut cursor = Cursor::new(&cd_data);

        for _ in 0..total_entries {
            let entry = self.parse_cdfh(&mut cursor)?;
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Parse a Central Directory File Header from a cursor.
    ///
    /// The CDFH contains metadata about a file in the archive, including
    /// its name, sizes, and location of the actual file data. The raw
    /// comment and extra-field bytes are preserved on the entry; the
    /// ZIP64 extra is applied to the sizes and offset.
    fn parse_cdfh(&self, cursor: &mut Cursor<&Vec<u8>>) -> Result<ZipFileEntry, ReadError> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ReadError::InvalidStructure(
                "bad central directory file header signature",
            ));
        }

        // Read fixed-size header fields
        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let gp_flags = cursor.read_u16::<LittleEndian>()?;
        let storage_mode = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let mut local_header_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // Read the variable-length file name
        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        // Directory entries end with '/'
        let is_directory = file_name.ends_with('/');

        // Keep the raw extras and comment around for the caller
        let mut extra = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra)?;
        let mut comment = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment)?;

        // Walk the extra blob as (u16 tag, u16 size, bytes[size]) records,
        // applying the ZIP64 extended information field.
        let mut extras = Cursor::new(extra.as_slice());
        while extras.position() + 4 <= extra.len() as u64 {
            let header_id = extras.read_u16::<LittleEndian>()?;
            let field_size = extras.read_u16::<LittleEndian>()?;
            let field_end = extras.position() + field_size as u64;

            if header_id == EXTRA_ZIP64 {
                // ZIP64 extended information extra field.
                // Fields are present only for header fields that overflowed
                // to 0xFFFFFFFF, in this fixed order; fields that did not
                // overflow are not in the extra at all.
                if uncompressed_size == 0xFFFFFFFF && extras.position() + 8 <= field_end {
                    uncompressed_size = extras.read_u64::<LittleEndian>()?;
                }
                if compressed_size == 0xFFFFFFFF && extras.position() + 8 <= field_end {
                    compressed_size = extras.read_u64::<LittleEndian>()?;
                }
                if local_header_offset == 0xFFFFFFFF && extras.position() + 8 <= field_end {
                    local_header_offset = extras.read_u64::<LittleEndian>()?;
                }
                // Skip any remaining ZIP64 fields (disk number start)
            }
            extras.set_position(field_end.min(extra.len() as u64));
        }

        // Permission bits only mean something when the archive was made on
        // UNIX (version-made-by high byte 3).
        let unix_permissions = if version_made_by >> 8 == 3 {
            Some((external_attrs >> 16) & 0o7777)
        } else {
            None
        };

        Ok(ZipFileEntry {
            file_name,
            storage_mode: CompressionMethod::from_u16(storage_mode),
            compressed_size,
            uncompressed_size,
            crc32,
            gp_flags,
            local_header_offset,
            data_offset: None,
            last_mod_time,
            last_mod_date,
            unix_permissions,
            comment,
            extra,
            is_directory,
        })
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    ///
    /// # Errors
    ///
    /// Returns an error if the LFH is invalid.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64, ReadError> {
        // Read the Local File Header
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader
            .read_at(entry.local_header_offset, &mut lfh_buf)
            .await?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(ReadError::InvalidStructure("bad local file header signature"));
        }

        // Read the variable field lengths from fixed positions in LFH
        let mut cursor = Cursor::new(&lfh_buf);
        cursor.set_position(26); // Offset to filename length field

        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        // Data starts after: LFH (30 bytes) + filename + extra field
        let data_offset =
            entry.local_header_offset + LFH_SIZE as u64 + file_name_length + extra_field_length;

        Ok(data_offset)
    }

    /// Read the local header for `entry` and record its compressed-data
    /// offset, unlocking
    /// [`compressed_data_offset`](ZipFileEntry::compressed_data_offset).
    pub async fn read_local_header(&self, entry: &mut ZipFileEntry) -> Result<u64, ReadError> {
        let data_offset = self.get_data_offset(entry).await?;
        entry.data_offset = Some(data_offset);
        Ok(data_offset)
    }

    /// Read local headers for a whole entry list.
    pub async fn read_local_headers(&self, entries: &mut [ZipFileEntry]) -> Result<(), ReadError> {
        for entry in entries {
            self.read_local_header(entry).await?;
        }
        Ok(())
    }

    /// Best-effort fallback for archives without a usable central
    /// directory: walk local file headers from offset 0, trusting the
    /// sizes they declare, until the chain breaks.
    ///
    /// Entries written with data descriptors carry zero sizes in their
    /// local headers and cannot be skipped over, so the walk stops there;
    /// whatever was recovered up to that point is returned.
    pub async fn read_straight_ahead(&self) -> Result<Vec<ZipFileEntry>, ReadError> {
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset + LFH_SIZE as u64 <= self.size {
            let mut lfh_buf = vec![0u8; LFH_SIZE];
            let n = self.reader.read_at(offset, &mut lfh_buf).await?;
            if n < LFH_SIZE || &lfh_buf[0..4] != LFH_SIGNATURE {
                break;
            }

            let mut cursor = Cursor::new(&lfh_buf[4..]);
            let _version_needed = cursor.read_u16::<LittleEndian>()?;
            let gp_flags = cursor.read_u16::<LittleEndian>()?;
            let storage_mode = cursor.read_u16::<LittleEndian>()?;
            let last_mod_time = cursor.read_u16::<LittleEndian>()?;
            let last_mod_date = cursor.read_u16::<LittleEndian>()?;
            let crc32 = cursor.read_u32::<LittleEndian>()?;
            let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
            let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
            let file_name_length = cursor.read_u16::<LittleEndian>()?;
            let extra_field_length = cursor.read_u16::<LittleEndian>()?;

            if gp_flags & (1 << 3) != 0 {
                // Data-descriptor entry: its local sizes are zeros, there
                // is no way to find the end of the body from here.
                break;
            }

            let mut variable = vec![0u8; file_name_length as usize + extra_field_length as usize];
            self.reader
                .read_at(offset + LFH_SIZE as u64, &mut variable)
                .await?;
            let (name_bytes, extra) = variable.split_at(file_name_length as usize);
            let file_name = String::from_utf8_lossy(name_bytes).to_string();

            // Local ZIP64 extras carry both 8-byte sizes when present.
            if compressed_size == 0xFFFFFFFF || uncompressed_size == 0xFFFFFFFF {
                let mut extras = Cursor::new(extra);
                while extras.position() + 4 <= extra.len() as u64 {
                    let header_id = extras.read_u16::<LittleEndian>()?;
                    let field_size = extras.read_u16::<LittleEndian>()?;
                    let field_end = extras.position() + field_size as u64;
                    if header_id == EXTRA_ZIP64 && field_size >= 16 {
                        uncompressed_size = extras.read_u64::<LittleEndian>()?;
                        compressed_size = extras.read_u64::<LittleEndian>()?;
                    }
                    extras.set_position(field_end.min(extra.len() as u64));
                }
            }

            let data_offset =
                offset + LFH_SIZE as u64 + file_name_length as u64 + extra_field_length as u64;
            let is_directory = file_name.ends_with('/');

            entries.push(ZipFileEntry {
                file_name,
                storage_mode: CompressionMethod::from_u16(storage_mode),
                compressed_size,
                uncompressed_size,
                crc32,
                gp_flags,
                local_header_offset: offset,
                data_offset: Some(data_offset),
                last_mod_time,
                last_mod_date,
                unix_permissions: None,
                comment: Vec::new(),
                extra: extra.to_vec(),
                is_directory,
            });

            offset = data_offset + compressed_size;
        }

        Ok(entries)
    }

    /// Get a reference to the underlying reader.
    ///
    /// Useful for reading file data after the local header has been read.
    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Total size of the archive in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}
