//! Archive members as tracked by the streamer.
//!
//! Every file or directory added to the archive becomes an [`Entry`]; a
//! rolled-back entry leaves a [`Member::Filler`] behind so that byte-offset
//! accounting over the sink stays correct without rewinding anything.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, TimeZone, Timelike, Utc};

use super::structures::CompressionMethod;

/// General-purpose flag bit 3: sizes and CRC follow the body in a data
/// descriptor.
pub const GP_FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General-purpose flag bit 11 (EFS): the filename is UTF-8.
pub const GP_FLAG_EFS: u16 = 1 << 11;

/// Per-entry options, in the style of a `FileOptions` value.
///
/// The default is "modified now, default permissions, sizes known up
/// front".
#[derive(Debug, Clone, Copy)]
pub struct EntryOptions {
    /// Modification time as UNIX seconds, interpreted in UTC.
    pub modification_time: i64,
    /// Permission bits stored in the external attributes; `None` picks
    /// 0o644 for files and 0o755 for directories.
    pub unix_permissions: Option<u32>,
    /// Whether CRC and sizes are written after the body in a data
    /// descriptor instead of in the local header.
    pub use_data_descriptor: bool,
}

impl Default for EntryOptions {
    fn default() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            modification_time: now,
            unix_permissions: None,
            use_data_descriptor: false,
        }
    }
}

impl EntryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modification_time(mut self, unix_seconds: i64) -> Self {
        self.modification_time = unix_seconds;
        self
    }

    pub fn unix_permissions(mut self, mode: u32) -> Self {
        self.unix_permissions = Some(mode);
        self
    }

    pub fn use_data_descriptor(mut self, yes: bool) -> Self {
        self.use_data_descriptor = yes;
        self
    }
}

/// One file or directory written to the archive.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Stored filename, UTF-8, `/`-separated, trailing `/` for directories.
    pub filename: String,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub storage_mode: CompressionMethod,
    /// UNIX seconds, UTC.
    pub modification_time: i64,
    pub use_data_descriptor: bool,
    /// Offset of the local file header in the sink.
    pub local_header_offset: u64,
    pub bytes_used_for_local_header: u64,
    pub bytes_used_for_data_descriptor: u64,
    pub unix_permissions: Option<u32>,
}

impl Entry {
    /// Total byte span this entry occupies in the sink.
    pub fn total_bytes_used(&self) -> u64 {
        self.bytes_used_for_local_header + self.compressed_size + self.bytes_used_for_data_descriptor
    }

    pub fn is_directory(&self) -> bool {
        self.filename.ends_with('/')
    }

    /// General-purpose bit flags for this entry's headers.
    pub fn gp_flags(&self) -> u16 {
        let mut flags = 0;
        if self.use_data_descriptor {
            flags |= GP_FLAG_DATA_DESCRIPTOR;
        }
        if !self.filename.is_ascii() {
            flags |= GP_FLAG_EFS;
        }
        flags
    }

    /// External attributes: UNIX file type and permission bits in the high
    /// 16 bits, MS-DOS attributes (always 0) in the low 16.
    pub fn external_attributes(&self) -> u32 {
        let file_type: u32 = if self.is_directory() { 0o04 } else { 0o10 };
        let default_mode = if self.is_directory() { 0o755 } else { 0o644 };
        let mode = self.unix_permissions.unwrap_or(default_mode) & 0o7777;
        ((file_type << 12) | mode) << 16
    }

    /// `(dos_time, dos_date)` for this entry's modification time.
    pub fn dos_time_date(&self) -> (u16, u16) {
        unix_to_dos(self.modification_time)
    }
}

/// A slot in the streamer's member list: a real entry, or the byte span
/// left behind by a rolled-back one. Fillers participate in offset
/// accounting but are never written to the central directory.
#[derive(Debug, Clone)]
pub enum Member {
    Entry(Entry),
    Filler { total_bytes_used: u64 },
}

impl Member {
    pub fn total_bytes_used(&self) -> u64 {
        match self {
            Member::Entry(entry) => entry.total_bytes_used(),
            Member::Filler { total_bytes_used } => *total_bytes_used,
        }
    }
}

/// Convert UNIX seconds (UTC) to `(dos_time, dos_date)`.
///
/// DOS times have two-second resolution; odd seconds truncate down.
/// Timestamps outside the representable 1980..=2107 range clamp to the
/// nearest endpoint.
pub fn unix_to_dos(unix_seconds: i64) -> (u16, u16) {
    const DOS_EPOCH: (u16, u16) = (0, 1 | (1 << 5)); // 1980-01-01 00:00:00
    const DOS_MAX: (u16, u16) = (
        (58 / 2) | (59 << 5) | (23 << 11),
        31 | (12 << 5) | (127 << 9),
    );

    let Some(dt) = Utc.timestamp_opt(unix_seconds, 0).single() else {
        return DOS_EPOCH;
    };
    if dt.year() < 1980 {
        return DOS_EPOCH;
    }
    if dt.year() > 2107 {
        return DOS_MAX;
    }

    let time = (dt.second() as u16 / 2) | ((dt.minute() as u16) << 5) | ((dt.hour() as u16) << 11);
    let date = dt.day() as u16
        | ((dt.month() as u16) << 5)
        | (((dt.year() - 1980) as u16) << 9);
    (time, date)
}
