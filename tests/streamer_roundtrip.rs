//! End-to-end scenarios: produce an archive into memory, read it back.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rand::RngCore;

use zipwire::{
    BytesReader, EntryOptions, Streamer, StreamerOptions, WriteError, ZipExtractor, ZipParser,
};

const MTIME: i64 = 1_535_805_296; // 2018-09-01 12:34:56 UTC

fn options() -> EntryOptions {
    EntryOptions::new().modification_time(MTIME)
}

/// A cloneable `Write` target, so tests can reach the bytes a streamer is
/// producing and splice body bytes in behind its back.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn extract_all(archive: Vec<u8>) -> Result<Vec<(String, Vec<u8>, zipwire::ZipFileEntry)>> {
    let extractor = ZipExtractor::new(Arc::new(BytesReader::new(archive)));
    let mut out = Vec::new();
    for entry in extractor.list_files().await? {
        let bytes = if entry.is_directory {
            Vec::new()
        } else {
            extractor.extract_to_memory(&entry).await?
        };
        out.push((entry.file_name.clone(), bytes, entry));
    }
    Ok(out)
}

#[test]
fn s1_empty_archive_is_a_bare_eocd() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    let size = streamer.close()?;
    let archive = streamer.into_inner();

    assert_eq!(size, 22);
    let mut expected = Vec::new();
    expected.extend_from_slice(b"PK\x05\x06");
    expected.extend_from_slice(&[0u8; 18]); // all counts, sizes, offsets, comment zero
    assert_eq!(archive, expected);
    Ok(())
}

#[tokio::test]
async fn s2_two_stored_ascii_files_roundtrip() -> Result<()> {
    let first = patterned(20 * 1024);
    let second = patterned(128 * 1024);

    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("first-file.bin", options(), |w| w.write_all(&first))?;
    streamer.write_stored_file("second-file.bin", options(), |w| w.write_all(&second))?;
    streamer.close()?;
    let archive = streamer.into_inner();

    let entries = extract_all(archive.clone()).await?;
    assert_eq!(entries.len(), 2);

    let (name, bytes, entry) = &entries[0];
    assert_eq!(name, "first-file.bin");
    assert_eq!(bytes, &first);
    assert_eq!(entry.crc32, crc32fast::hash(&first));
    assert_eq!(entry.storage_mode.as_u16(), 0);
    assert_eq!(entry.gp_flags & 0x0800, 0, "EFS must not be set for ASCII");

    let (name, bytes, entry) = &entries[1];
    assert_eq!(name, "second-file.bin");
    assert_eq!(bytes, &second);
    assert_eq!(entry.crc32, crc32fast::hash(&second));

    // No Zip64 below the thresholds.
    let (eocd, _) = ZipParser::new(Arc::new(BytesReader::new(archive))).find_eocd().await?;
    assert!(!eocd.is_zip64());
    Ok(())
}

#[tokio::test]
async fn s3_unicode_filename_sets_efs_bit() -> Result<()> {
    let body = patterned(128 * 1024);
    let name = "второй-файл.bin";

    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file(name, options(), |w| w.write_all(&body))?;
    streamer.close()?;
    let archive = streamer.into_inner();

    let entries = extract_all(archive.clone()).await?;
    let (read_name, bytes, entry) = &entries[0];
    assert_eq!(read_name, name);
    assert_eq!(bytes, &body);
    assert_ne!(entry.gp_flags & 0x0800, 0, "EFS must be set in the central record");

    // The local header carries the same flag (offset 6 within the record).
    let local_flags = u16::from_le_bytes([
        archive[entry.local_header_offset as usize + 6],
        archive[entry.local_header_offset as usize + 7],
    ]);
    assert_ne!(local_flags & 0x0800, 0, "EFS must be set in the local record");
    Ok(())
}

#[tokio::test]
async fn s4_data_descriptor_roundtrip() -> Result<()> {
    let body = b"deflate me, deflate me, deflate me again".repeat(400);

    let mut streamer = Streamer::new(Vec::new());
    streamer.write_deflated_file("packed.txt", options(), |w| w.write_all(&body))?;
    streamer.close()?;
    let archive = streamer.into_inner();

    let extractor = ZipExtractor::new(Arc::new(BytesReader::new(archive.clone())));
    let entries = extractor.list_files().await?;
    let entry = &entries[0];

    // Central directory carries the true values.
    assert_eq!(entry.storage_mode.as_u16(), 8);
    assert_eq!(entry.crc32, crc32fast::hash(&body));
    assert_eq!(entry.uncompressed_size, body.len() as u64);
    assert!(entry.uses_data_descriptor());

    // Local header: bit 3 set, CRC and sizes zero.
    let lho = entry.local_header_offset as usize;
    let local_flags = u16::from_le_bytes([archive[lho + 6], archive[lho + 7]]);
    assert_ne!(local_flags & (1 << 3), 0);
    assert_eq!(&archive[lho + 14..lho + 26], &[0u8; 12]);

    // The descriptor follows the body: signature, then true CRC and sizes.
    let data_offset = extractor.parser().get_data_offset(entry).await? as usize;
    let descriptor = &archive[data_offset + entry.compressed_size as usize..];
    assert_eq!(&descriptor[0..4], b"PK\x07\x08");
    assert_eq!(
        u32::from_le_bytes(descriptor[4..8].try_into().unwrap()),
        crc32fast::hash(&body)
    );
    assert_eq!(
        u32::from_le_bytes(descriptor[8..12].try_into().unwrap()),
        entry.compressed_size as u32
    );
    assert_eq!(
        u32::from_le_bytes(descriptor[12..16].try_into().unwrap()),
        body.len() as u32
    );

    // And the body itself survives the trip.
    assert_eq!(extractor.extract_to_memory(entry).await?, body);
    Ok(())
}

#[tokio::test]
async fn s5_heuristic_selects_mode_by_compressibility() -> Result<()> {
    let words = b"many many delicious, compressible words ";
    let compressible: Vec<u8> = words.iter().cycle().copied().take(160 * 1024).collect();
    let mut random = vec![0u8; 160 * 1024];
    rand::thread_rng().fill_bytes(&mut random);

    let mut streamer = Streamer::new(Vec::new());
    streamer.write_file("words.txt", options(), |w| w.write_all(&compressible))?;
    streamer.write_file("noise.bin", options(), |w| w.write_all(&random))?;
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    let (_, bytes, entry) = &entries[0];
    assert_eq!(entry.storage_mode.as_u16(), 8, "text must deflate");
    assert_eq!(bytes, &compressible);

    let (_, bytes, entry) = &entries[1];
    assert_eq!(entry.storage_mode.as_u16(), 0, "random bytes must be stored");
    assert_eq!(bytes, &random);
    Ok(())
}

#[tokio::test]
async fn s6_rollback_reuses_the_name_and_drops_the_failed_entry() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());

    let failed = streamer.write_deflated_file("deflated.txt", options(), |w| {
        w.write_all(b"this is attempt 1")?;
        w.flush()?;
        Err(std::io::Error::other("upstream went away"))
    });
    assert!(failed.is_err());

    streamer.write_deflated_file("deflated.txt", options(), |w| {
        w.write_all(b"this is attempt 2")
    })?;
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    assert_eq!(entries.len(), 1, "the rolled-back entry must not be listed");
    let (name, bytes, _) = &entries[0];
    assert_eq!(name, "deflated.txt");
    assert_eq!(bytes, b"this is attempt 2");
    Ok(())
}

#[test]
fn s7_missing_simulate_write_is_diagnosed() {
    let mut streamer = Streamer::new(Vec::new());
    streamer
        .add_stored_entry("foo", 1024, 0xCC, options())
        .unwrap();

    let err = streamer.close().unwrap_err();
    match &err {
        WriteError::OffsetOutOfSync { declared, actual } => {
            assert_eq!(*declared, *actual + 1024);
        }
        other => panic!("expected OffsetOutOfSync, got {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("simulate_write"), "message was: {message}");
    assert!(message.contains("bytes"), "message was: {message}");
}

#[tokio::test]
async fn spliced_bodies_roundtrip_with_simulate_write() -> Result<()> {
    let body = patterned(4096);
    let sink = SharedSink::default();
    let mut streamer = Streamer::new(sink.clone());

    streamer.add_stored_entry("spliced.bin", body.len() as u64, crc32fast::hash(&body), options())?;
    // The body bypasses the streamer entirely, like sendfile would.
    sink.clone().write_all(&body)?;
    streamer.simulate_write(body.len() as u64)?;
    streamer.close()?;

    let entries = extract_all(sink.bytes()).await?;
    let (name, bytes, entry) = &entries[0];
    assert_eq!(name, "spliced.bin");
    assert_eq!(bytes, &body);
    assert_eq!(entry.crc32, crc32fast::hash(&body));
    Ok(())
}

#[tokio::test]
async fn central_directory_offsets_point_at_local_headers() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("a.bin", options(), |w| w.write_all(&patterned(100)))?;
    streamer.write_deflated_file("b.bin", options(), |w| w.write_all(&patterned(5000)))?;
    streamer.add_empty_directory("dir", options())?;
    streamer.write_file("c.bin", options(), |w| w.write_all(&patterned(300)))?;
    streamer.close()?;
    let archive = streamer.into_inner();

    let entries = extract_all(archive.clone()).await?;
    assert_eq!(entries.len(), 4);
    for (_, _, entry) in &entries {
        let offset = entry.local_header_offset as usize;
        assert_eq!(&archive[offset..offset + 4], b"PK\x03\x04");
    }
    Ok(())
}

#[tokio::test]
async fn directory_entries_get_trailing_slash_and_default_mode() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.add_empty_directory("assets", options())?;
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    let (name, _, entry) = &entries[0];
    assert_eq!(name, "assets/");
    assert!(entry.is_directory);
    assert_eq!(entry.unix_permissions, Some(0o755));
    Ok(())
}

#[tokio::test]
async fn unix_permissions_and_mtime_survive() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file(
        "bin/tool",
        options().unix_permissions(0o700),
        |w| w.write_all(b"#!/bin/sh\n"),
    )?;
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    let (_, _, entry) = &entries[0];
    assert_eq!(entry.unix_permissions, Some(0o700));
    assert_eq!(entry.mod_date(), (2018, 9, 1));
    assert_eq!(entry.mod_time(), (12, 34, 56));
    Ok(())
}

#[test]
fn path_conflicts_fail_in_both_orders() {
    let mut streamer = Streamer::new(Vec::new());
    streamer
        .write_stored_file("a/b", options(), |w| w.write_all(b"x"))
        .unwrap();
    let err = streamer.write_stored_file("a/b/c", options(), |w| w.write_all(b"y"));
    assert!(matches!(err, Err(WriteError::FileClobbersDirectory(_))));

    let mut streamer = Streamer::new(Vec::new());
    streamer
        .write_stored_file("a/b/c", options(), |w| w.write_all(b"x"))
        .unwrap();
    let err = streamer.write_stored_file("a/b", options(), |w| w.write_all(b"y"));
    assert!(matches!(err, Err(WriteError::DirectoryClobbersFile(_))));

    // A failed reservation leaves the streamer usable.
    let mut streamer = Streamer::new(Vec::new());
    streamer
        .write_stored_file("dup.txt", options(), |w| w.write_all(b"1"))
        .unwrap();
    let err = streamer.write_stored_file("dup.txt", options(), |w| w.write_all(b"2"));
    assert!(matches!(err, Err(WriteError::DuplicatePath(_))));
    streamer
        .write_stored_file("other.txt", options(), |w| w.write_all(b"3"))
        .unwrap();
    streamer.close().unwrap();
}

#[tokio::test]
async fn auto_rename_keeps_extensions() -> Result<()> {
    let mut streamer = Streamer::with_options(
        Vec::new(),
        StreamerOptions {
            auto_rename_duplicate_filenames: true,
            ..Default::default()
        },
    );
    for n in 0..3 {
        streamer.write_stored_file("x.tar.gz", options(), |w| {
            w.write_all(format!("copy {n}").as_bytes())
        })?;
    }
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    let names: Vec<_> = entries.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(names, ["x.tar.gz", "x.tar (1).gz", "x.tar (2).gz"]);
    Ok(())
}

#[tokio::test]
async fn backslashes_are_sanitized() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("dir\\file.txt", options(), |w| w.write_all(b"data"))?;
    streamer.close()?;

    let entries = extract_all(streamer.into_inner()).await?;
    assert_eq!(entries[0].0, "dir_file.txt");
    Ok(())
}

#[test]
fn overlong_filenames_are_rejected() {
    let mut streamer = Streamer::new(Vec::new());
    let name = "n".repeat(70_000);
    let err = streamer.write_stored_file(&name, options(), |w| w.write_all(b"x"));
    assert!(matches!(err, Err(WriteError::FilenameTooLong(_))));
}

#[test]
fn declared_stored_size_is_checked_against_descriptor() {
    let mut streamer = Streamer::new(Vec::new());
    streamer
        .add_stored_entry("fixed.bin", 1000, 0, options().use_data_descriptor(true))
        .unwrap();
    streamer.simulate_write(900).unwrap();
    let err = streamer.update_last_entry_and_write_data_descriptor(0xAB, 900, 900);
    assert!(matches!(
        err,
        Err(WriteError::EntryBodySizeMismatch {
            declared: 1000,
            actual: 900
        })
    ));
}

#[test]
fn closed_streamer_is_terminal() {
    let mut streamer = Streamer::new(Vec::new());
    streamer.close().unwrap();
    assert!(matches!(
        streamer.add_stored_entry("late.bin", 0, 0, options()),
        Err(WriteError::StreamerClosed)
    ));
    assert!(matches!(streamer.close(), Err(WriteError::StreamerClosed)));
}
