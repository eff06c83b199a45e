//! Byte-exact encoders for ZIP structural records.
//!
//! Everything here is little-endian and signature-prefixed, mirroring the
//! parse side in [`structures`](super::structures). Each method returns the
//! number of bytes written so the streamer can account exact byte spans for
//! headers and descriptors without re-deriving record sizes.
//!
//! Zip64 promotion happens per record: when a size (or the local-header
//! offset, for central records) no longer fits 32 bits, the 4-byte fields
//! are masked to `0xFFFFFFFF` and a Zip64 extra carrying the 8-byte values
//! is prepended to the extras. An extended-timestamp extra (0x5455) is
//! always appended, in local and central records alike.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use super::entry::Entry;
use super::structures::{EXTRA_TIMESTAMP, EXTRA_ZIP64};

/// Largest value representable in a 4-byte record field; anything above
/// promotes the record to Zip64.
const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;
/// Largest entry count representable in the 2-byte EOCD fields.
const EOCD_COUNT_MAX: u64 = 0xFFFF;

/// Version-made-by: format version 5.2 in the low byte, OS 3 (UNIX) in the
/// high byte.
const VERSION_MADE_BY: u16 = 52 | (3 << 8);
/// Minimum version needed for plain deflate/stored entries.
const VERSION_NEEDED: u16 = 20;
/// Version needed once Zip64 structures are involved.
const VERSION_NEEDED_ZIP64: u16 = 45;

/// Encoder for the structural records of an archive.
///
/// Object-safe so a [`Streamer`](super::streamer::Streamer) can carry a
/// caller-supplied override; the default implementation is [`ZipWriter`].
pub trait RecordWriter: Send {
    /// Write a local file header. Returns the bytes written.
    fn local_file_header(&self, out: &mut dyn Write, entry: &Entry) -> io::Result<u64>;

    /// Write a data descriptor for the preceding entry body.
    fn data_descriptor(
        &self,
        out: &mut dyn Write,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> io::Result<u64>;

    /// Write one central-directory file header.
    fn central_directory_file_header(&self, out: &mut dyn Write, entry: &Entry) -> io::Result<u64>;

    /// Write the end-of-central-directory records (Zip64 prologue included
    /// when any threshold trips).
    fn end_of_central_directory(
        &self,
        out: &mut dyn Write,
        start_of_central_directory: u64,
        central_directory_size: u64,
        num_entries: u64,
    ) -> io::Result<u64>;
}

/// The default, byte-exact [`RecordWriter`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipWriter;

impl RecordWriter for ZipWriter {
    fn local_file_header(&self, out: &mut dyn Write, entry: &Entry) -> io::Result<u64> {
        let name = entry.filename.as_bytes();
        let zip64 =
            entry.compressed_size > ZIP64_THRESHOLD || entry.uncompressed_size > ZIP64_THRESHOLD;
        let (dos_time, dos_date) = entry.dos_time_date();

        let mut extras = Vec::with_capacity(4 + 16 + 4 + 5);
        if zip64 {
            // The Zip64 extra must come first so its 8-byte fields are what
            // a conditional reader consumes.
            extras.write_u16::<LittleEndian>(EXTRA_ZIP64)?;
            extras.write_u16::<LittleEndian>(16)?;
            extras.write_u64::<LittleEndian>(entry.uncompressed_size)?;
            extras.write_u64::<LittleEndian>(entry.compressed_size)?;
        }
        write_timestamp_extra(&mut extras, entry.modification_time)?;

        let mut buf = Vec::with_capacity(30 + name.len() + extras.len());
        buf.write_all(b"PK\x03\x04")?;
        buf.write_u16::<LittleEndian>(if zip64 { VERSION_NEEDED_ZIP64 } else { VERSION_NEEDED })?;
        buf.write_u16::<LittleEndian>(entry.gp_flags())?;
        buf.write_u16::<LittleEndian>(entry.storage_mode.as_u16())?;
        buf.write_u16::<LittleEndian>(dos_time)?;
        buf.write_u16::<LittleEndian>(dos_date)?;
        buf.write_u32::<LittleEndian>(entry.crc32)?;
        buf.write_u32::<LittleEndian>(masked(entry.compressed_size, zip64))?;
        buf.write_u32::<LittleEndian>(masked(entry.uncompressed_size, zip64))?;
        buf.write_u16::<LittleEndian>(name.len() as u16)?;
        buf.write_u16::<LittleEndian>(extras.len() as u16)?;
        buf.write_all(name)?;
        buf.write_all(&extras)?;

        out.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    fn data_descriptor(
        &self,
        out: &mut dyn Write,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
    ) -> io::Result<u64> {
        // Both size fields use the same width: 8 bytes as soon as either
        // size no longer fits 4.
        let wide = compressed_size > ZIP64_THRESHOLD || uncompressed_size > ZIP64_THRESHOLD;

        let mut buf = Vec::with_capacity(4 + 4 + 16);
        buf.write_all(b"PK\x07\x08")?;
        buf.write_u32::<LittleEndian>(crc32)?;
        if wide {
            buf.write_u64::<LittleEndian>(compressed_size)?;
            buf.write_u64::<LittleEndian>(uncompressed_size)?;
        } else {
            buf.write_u32::<LittleEndian>(compressed_size as u32)?;
            buf.write_u32::<LittleEndian>(uncompressed_size as u32)?;
        }

        out.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    fn central_directory_file_header(&self, out: &mut dyn Write, entry: &Entry) -> io::Result<u64> {
        let name = entry.filename.as_bytes();
        let zip64 = entry.compressed_size > ZIP64_THRESHOLD
            || entry.uncompressed_size > ZIP64_THRESHOLD
            || entry.local_header_offset > ZIP64_THRESHOLD;
        let (dos_time, dos_date) = entry.dos_time_date();

        let mut extras = Vec::with_capacity(4 + 28 + 4 + 5);
        if zip64 {
            extras.write_u16::<LittleEndian>(EXTRA_ZIP64)?;
            extras.write_u16::<LittleEndian>(28)?;
            extras.write_u64::<LittleEndian>(entry.uncompressed_size)?;
            extras.write_u64::<LittleEndian>(entry.compressed_size)?;
            extras.write_u64::<LittleEndian>(entry.local_header_offset)?;
            extras.write_u32::<LittleEndian>(0)?; // disk number start
        }
        write_timestamp_extra(&mut extras, entry.modification_time)?;

        let mut buf = Vec::with_capacity(46 + name.len() + extras.len());
        buf.write_all(b"PK\x01\x02")?;
        buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        buf.write_u16::<LittleEndian>(if zip64 { VERSION_NEEDED_ZIP64 } else { VERSION_NEEDED })?;
        buf.write_u16::<LittleEndian>(entry.gp_flags())?;
        buf.write_u16::<LittleEndian>(entry.storage_mode.as_u16())?;
        buf.write_u16::<LittleEndian>(dos_time)?;
        buf.write_u16::<LittleEndian>(dos_date)?;
        buf.write_u32::<LittleEndian>(entry.crc32)?;
        buf.write_u32::<LittleEndian>(masked(entry.compressed_size, zip64))?;
        buf.write_u32::<LittleEndian>(masked(entry.uncompressed_size, zip64))?;
        buf.write_u16::<LittleEndian>(name.len() as u16)?;
        buf.write_u16::<LittleEndian>(extras.len() as u16)?;
        buf.write_u16::<LittleEndian>(0)?; // comment length
        // Some legacy extractors refuse Zip64 entries whose disk number is
        // not the 0xFFFF sentinel.
        buf.write_u16::<LittleEndian>(if zip64 { 0xFFFF } else { 0 })?;
        buf.write_u16::<LittleEndian>(0)?; // internal attributes
        buf.write_u32::<LittleEndian>(entry.external_attributes())?;
        buf.write_u32::<LittleEndian>(masked(entry.local_header_offset, zip64))?;
        buf.write_all(name)?;
        buf.write_all(&extras)?;

        out.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    fn end_of_central_directory(
        &self,
        out: &mut dyn Write,
        start_of_central_directory: u64,
        central_directory_size: u64,
        num_entries: u64,
    ) -> io::Result<u64> {
        // The Zip64 EOCD sits right after the central directory, so its own
        // offset can be the tripping threshold.
        let eocd64_offset = start_of_central_directory + central_directory_size;
        let zip64 = start_of_central_directory > ZIP64_THRESHOLD
            || central_directory_size > ZIP64_THRESHOLD
            || eocd64_offset > ZIP64_THRESHOLD
            || num_entries > EOCD_COUNT_MAX;

        let mut buf = Vec::with_capacity(56 + 20 + 22);
        if zip64 {
            buf.write_all(b"PK\x06\x06")?;
            buf.write_u64::<LittleEndian>(44)?; // size of the record that follows
            buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
            buf.write_u16::<LittleEndian>(VERSION_NEEDED_ZIP64)?;
            buf.write_u32::<LittleEndian>(0)?; // this disk
            buf.write_u32::<LittleEndian>(0)?; // disk with the central directory
            buf.write_u64::<LittleEndian>(num_entries)?;
            buf.write_u64::<LittleEndian>(num_entries)?;
            buf.write_u64::<LittleEndian>(central_directory_size)?;
            buf.write_u64::<LittleEndian>(start_of_central_directory)?;

            buf.write_all(b"PK\x06\x07")?;
            buf.write_u32::<LittleEndian>(0)?; // disk with the Zip64 EOCD
            buf.write_u64::<LittleEndian>(eocd64_offset)?;
            buf.write_u32::<LittleEndian>(1)?; // total disks
        }

        buf.write_all(b"PK\x05\x06")?;
        buf.write_u16::<LittleEndian>(0)?; // this disk
        buf.write_u16::<LittleEndian>(0)?; // disk with the central directory
        buf.write_u16::<LittleEndian>(num_entries.min(EOCD_COUNT_MAX) as u16)?;
        buf.write_u16::<LittleEndian>(num_entries.min(EOCD_COUNT_MAX) as u16)?;
        buf.write_u32::<LittleEndian>(central_directory_size.min(ZIP64_THRESHOLD) as u32)?;
        buf.write_u32::<LittleEndian>(start_of_central_directory.min(ZIP64_THRESHOLD) as u32)?;
        buf.write_u16::<LittleEndian>(0)?; // comment length

        out.write_all(&buf)?;
        Ok(buf.len() as u64)
    }
}

fn masked(value: u64, zip64: bool) -> u32 {
    if zip64 { 0xFFFF_FFFF } else { value as u32 }
}

/// Extended-timestamp extra (0x5455): flags byte with only "mtime present",
/// then the mtime as signed 32-bit UNIX time. Identical in local and
/// central records.
fn write_timestamp_extra(extras: &mut Vec<u8>, modification_time: i64) -> io::Result<()> {
    let clamped = modification_time.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    extras.write_u16::<LittleEndian>(EXTRA_TIMESTAMP)?;
    extras.write_u16::<LittleEndian>(5)?;
    extras.write_u8(0b0000_0001)?;
    extras.write_i32::<LittleEndian>(clamped)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zip::structures::CompressionMethod;
    use byteorder::ReadBytesExt;
    use std::io::Cursor;

    fn entry() -> Entry {
        Entry {
            filename: "file.bin".to_string(),
            crc32: 0xDEADBEEF,
            compressed_size: 100,
            uncompressed_size: 100,
            storage_mode: CompressionMethod::Stored,
            modification_time: 1_535_805_296, // 2018-09-01 12:34:56 UTC
            use_data_descriptor: false,
            local_header_offset: 0,
            bytes_used_for_local_header: 0,
            bytes_used_for_data_descriptor: 0,
            unix_permissions: None,
        }
    }

    fn u16_at(buf: &[u8], pos: usize) -> u16 {
        u16::from_le_bytes([buf[pos], buf[pos + 1]])
    }

    fn u32_at(buf: &[u8], pos: usize) -> u32 {
        u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap())
    }

    #[test]
    fn local_header_layout() {
        let mut buf = Vec::new();
        let written = ZipWriter.local_file_header(&mut buf, &entry()).unwrap();
        assert_eq!(written, buf.len() as u64);

        assert_eq!(&buf[0..4], b"PK\x03\x04");
        assert_eq!(u16_at(&buf, 4), 20); // version needed
        assert_eq!(u16_at(&buf, 6), 0); // gp flags
        assert_eq!(u16_at(&buf, 8), 0); // stored
        assert_eq!(u32_at(&buf, 14), 0xDEADBEEF);
        assert_eq!(u32_at(&buf, 18), 100);
        assert_eq!(u32_at(&buf, 22), 100);
        assert_eq!(u16_at(&buf, 26), 8); // name length
        assert_eq!(u16_at(&buf, 28), 9); // extras: timestamp only
        assert_eq!(&buf[30..38], b"file.bin");

        // Extended-timestamp extra
        let mut cursor = Cursor::new(&buf[38..]);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x5455);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 5);
        assert_eq!(cursor.read_u8().unwrap(), 1);
        assert_eq!(cursor.read_i32::<LittleEndian>().unwrap(), 1_535_805_296);
        assert_eq!(buf.len(), 30 + 8 + 9);
    }

    #[test]
    fn local_header_promotes_to_zip64() {
        let mut big = entry();
        big.compressed_size = 5 * 1024 * 1024 * 1024; // 5 GiB
        big.uncompressed_size = 5 * 1024 * 1024 * 1024;

        let mut buf = Vec::new();
        ZipWriter.local_file_header(&mut buf, &big).unwrap();

        assert_eq!(u16_at(&buf, 4), 45); // version needed
        assert_eq!(u32_at(&buf, 18), 0xFFFF_FFFF);
        assert_eq!(u32_at(&buf, 22), 0xFFFF_FFFF);

        // Zip64 extra first, then the timestamp extra.
        let extras = &buf[30 + 8..];
        assert_eq!(u16_at(extras, 0), 0x0001);
        assert_eq!(u16_at(extras, 2), 16);
        assert_eq!(
            u64::from_le_bytes(extras[4..12].try_into().unwrap()),
            big.uncompressed_size
        );
        assert_eq!(
            u64::from_le_bytes(extras[12..20].try_into().unwrap()),
            big.compressed_size
        );
        assert_eq!(u16_at(extras, 20), 0x5455);
    }

    #[test]
    fn data_descriptor_widths() {
        let mut narrow = Vec::new();
        ZipWriter
            .data_descriptor(&mut narrow, 0xAA, 10, 20)
            .unwrap();
        assert_eq!(&narrow[0..4], b"PK\x07\x08");
        assert_eq!(narrow.len(), 4 + 4 + 4 + 4);

        // Either size above 4 GiB widens both fields.
        let mut wide = Vec::new();
        ZipWriter
            .data_descriptor(&mut wide, 0xAA, 10, 5_000_000_000)
            .unwrap();
        assert_eq!(wide.len(), 4 + 4 + 8 + 8);
        assert_eq!(u64::from_le_bytes(wide[8..16].try_into().unwrap()), 10);
        assert_eq!(
            u64::from_le_bytes(wide[16..24].try_into().unwrap()),
            5_000_000_000
        );
    }

    #[test]
    fn central_header_layout() {
        let mut e = entry();
        e.local_header_offset = 12345;

        let mut buf = Vec::new();
        ZipWriter.central_directory_file_header(&mut buf, &e).unwrap();

        assert_eq!(&buf[0..4], b"PK\x01\x02");
        assert_eq!(u16_at(&buf, 4), 52 | (3 << 8)); // made by: 5.2 / UNIX
        assert_eq!(u16_at(&buf, 6), 20);
        assert_eq!(u16_at(&buf, 34), 0); // disk number start
        assert_eq!(u32_at(&buf, 38), ((0o10 << 12) | 0o644) << 16);
        assert_eq!(u32_at(&buf, 42), 12345);
    }

    #[test]
    fn central_header_promotes_on_offset_alone() {
        let mut e = entry();
        e.local_header_offset = 6 * 1024 * 1024 * 1024; // 6 GiB into the archive

        let mut buf = Vec::new();
        ZipWriter.central_directory_file_header(&mut buf, &e).unwrap();

        assert_eq!(u16_at(&buf, 6), 45); // version needed
        assert_eq!(u16_at(&buf, 34), 0xFFFF); // disk sentinel under Zip64
        assert_eq!(u32_at(&buf, 20), 0xFFFF_FFFF); // compressed size masked
        assert_eq!(u32_at(&buf, 24), 0xFFFF_FFFF); // uncompressed size masked
        assert_eq!(u32_at(&buf, 42), 0xFFFF_FFFF); // offset masked

        let extras = &buf[46 + 8..];
        assert_eq!(u16_at(extras, 0), 0x0001);
        assert_eq!(u16_at(extras, 2), 28);
        assert_eq!(
            u64::from_le_bytes(extras[20..28].try_into().unwrap()),
            e.local_header_offset
        );
    }

    #[test]
    fn eocd_below_thresholds_is_plain() {
        let mut buf = Vec::new();
        let written = ZipWriter
            .end_of_central_directory(&mut buf, 1000, 500, 3)
            .unwrap();
        assert_eq!(written, 22);
        assert_eq!(&buf[0..4], b"PK\x05\x06");
        assert_eq!(u16_at(&buf, 8), 3);
        assert_eq!(u16_at(&buf, 10), 3);
        assert_eq!(u32_at(&buf, 12), 500);
        assert_eq!(u32_at(&buf, 16), 1000);
        assert_eq!(u16_at(&buf, 20), 0);
    }

    #[test]
    fn eocd_promotes_on_entry_count() {
        let mut buf = Vec::new();
        ZipWriter
            .end_of_central_directory(&mut buf, 1000, 500, 70_000)
            .unwrap();

        assert_eq!(&buf[0..4], b"PK\x06\x06");
        assert_eq!(u64::from_le_bytes(buf[4..12].try_into().unwrap()), 44);
        assert_eq!(u64::from_le_bytes(buf[24..32].try_into().unwrap()), 70_000);
        assert_eq!(u64::from_le_bytes(buf[48..56].try_into().unwrap()), 1000);

        let locator = &buf[56..76];
        assert_eq!(&locator[0..4], b"PK\x06\x07");
        assert_eq!(
            u64::from_le_bytes(locator[8..16].try_into().unwrap()),
            1500 // the Zip64 EOCD sits right after the central directory
        );
        assert_eq!(u32_at(locator, 16), 1);

        let eocd = &buf[76..];
        assert_eq!(&eocd[0..4], b"PK\x05\x06");
        assert_eq!(u16_at(eocd, 8), 0xFFFF); // clamped count
        assert_eq!(u16_at(eocd, 10), 0xFFFF);
    }
}
