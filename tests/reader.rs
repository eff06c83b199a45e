//! Reader-side behavior: sources, incremental extraction, fallbacks.

use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use zipwire::{
    BytesReader, EntryOptions, LocalFileReader, ReadError, Streamer, ZipExtractor, ZipParser,
};

fn options() -> EntryOptions {
    EntryOptions::new().modification_time(1_600_000_000)
}

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
    (0..len).map(|i| (i % 239) as u8).collect()
}

/// An archive whose local headers carry real sizes (no data descriptors),
/// which is what the straight-ahead fallback needs.
fn archive_without_descriptors() -> Vec<u8> {
    let bodies = [patterned(3000), patterned(50), patterned(70_000)];
    let sink = SharedSink::default();
    let mut streamer = Streamer::new(sink.clone());
    for (i, body) in bodies.iter().enumerate() {
        streamer
            .add_stored_entry(
                &format!("plain-{i}.bin"),
                body.len() as u64,
                crc32fast::hash(body),
                options(),
            )
            .unwrap();
        sink.clone().write_all(body).unwrap();
        streamer.simulate_write(body.len() as u64).unwrap();
    }
    streamer.close().unwrap();
    sink.bytes()
}

#[tokio::test]
async fn entry_reader_is_bounded_and_incremental() -> Result<()> {
    let stored_body = patterned(10_000);
    let deflated_body = b"round and round the stream goes ".repeat(3000);

    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("stored.bin", options(), |w| w.write_all(&stored_body))?;
    streamer.write_deflated_file("packed.bin", options(), |w| w.write_all(&deflated_body))?;
    streamer.close()?;

    let extractor = ZipExtractor::new(Arc::new(BytesReader::new(streamer.into_inner())));
    let entries = extractor.list_files().await?;

    for (entry, expected) in entries.iter().zip([&stored_body, &deflated_body]) {
        let mut reader = extractor.entry_reader(entry).await?;
        let mut collected = Vec::new();
        loop {
            let chunk = reader.read(1000).await?;
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= 1000);
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(&collected, expected);
    }
    Ok(())
}

#[tokio::test]
async fn local_file_source_roundtrip() -> Result<()> {
    let body = patterned(12_345);
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_file("on-disk.bin", options(), |w| w.write_all(&body))?;
    streamer.close()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("roundtrip.zip");
    std::fs::write(&path, streamer.into_inner())?;

    let extractor = ZipExtractor::new(Arc::new(LocalFileReader::new(&path)?));
    let entries = extractor.list_files().await?;
    assert_eq!(entries[0].file_name, "on-disk.bin");
    assert_eq!(extractor.extract_to_memory(&entries[0]).await?, body);

    let out_path = dir.path().join("extracted/on-disk.bin");
    extractor.extract_to_file(&entries[0], &out_path).await?;
    assert_eq!(std::fs::read(&out_path)?, body);
    Ok(())
}

#[tokio::test]
async fn straight_ahead_fallback_recovers_descriptor_free_entries() -> Result<()> {
    let archive = archive_without_descriptors();

    // Truncate away the entire central directory: only local records stay.
    let cd_start = archive
        .windows(4)
        .position(|w| w == b"PK\x01\x02")
        .expect("central directory present");
    let truncated = archive[..cd_start].to_vec();

    let parser = ZipParser::new(Arc::new(BytesReader::new(truncated)));
    assert!(matches!(
        parser.find_eocd().await,
        Err(ReadError::MissingEocd)
    ));

    let entries = parser.read_straight_ahead().await?;
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].file_name, "plain-0.bin");
    assert_eq!(entries[2].compressed_size, 70_000);
    assert!(entries.iter().all(|e| e.data_offset.is_some()));
    Ok(())
}

#[tokio::test]
async fn straight_ahead_stops_at_descriptor_entries() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("dd.bin", options(), |w| w.write_all(b"body"))?;
    streamer.close()?;

    let parser = ZipParser::new(Arc::new(BytesReader::new(streamer.into_inner())));
    let entries = parser.read_straight_ahead().await?;
    assert!(entries.is_empty(), "descriptor entries are not recoverable");
    Ok(())
}

#[tokio::test]
async fn eocd_is_found_behind_an_archive_comment() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.close()?;
    let mut archive = streamer.into_inner();

    // Graft a 5-byte comment onto the bare EOCD.
    let len = archive.len();
    archive[len - 2..].copy_from_slice(&5u16.to_le_bytes());
    archive.extend_from_slice(b"hello");

    let parser = ZipParser::new(Arc::new(BytesReader::new(archive)));
    let (eocd, _) = parser.find_eocd().await?;
    assert_eq!(eocd.comment_len, 5);
    assert_eq!(eocd.total_entries, 0);
    Ok(())
}

#[tokio::test]
async fn garbage_has_no_eocd() {
    let parser = ZipParser::new(Arc::new(BytesReader::new(vec![0xAB; 4096])));
    assert!(matches!(
        parser.find_eocd().await,
        Err(ReadError::MissingEocd)
    ));
    assert!(matches!(
        parser.list_files().await,
        Err(ReadError::MissingEocd)
    ));
}

#[tokio::test]
async fn data_offset_requires_local_header_read() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("f.bin", options(), |w| w.write_all(b"abc"))?;
    streamer.close()?;

    let parser = ZipParser::new(Arc::new(BytesReader::new(streamer.into_inner())));
    let mut entries = parser.list_files().await?;

    assert!(matches!(
        entries[0].compressed_data_offset(),
        Err(ReadError::LocalHeaderPending)
    ));

    parser.read_local_headers(&mut entries).await?;
    let offset = entries[0].compressed_data_offset()?;
    assert_eq!(parser.get_data_offset(&entries[0]).await?, offset);
    Ok(())
}

#[tokio::test]
async fn encrypted_entries_are_refused() -> Result<()> {
    let mut streamer = Streamer::new(Vec::new());
    streamer.write_stored_file("f.bin", options(), |w| w.write_all(b"abc"))?;
    streamer.close()?;

    let extractor = ZipExtractor::new(Arc::new(BytesReader::new(streamer.into_inner())));
    let mut entry = extractor.list_files().await?.remove(0);
    entry.gp_flags |= 1; // pretend the entry is encrypted

    assert!(matches!(
        extractor.entry_reader(&entry).await,
        Err(ReadError::UnsupportedFeature(_))
    ));
    assert!(matches!(
        extractor.extract_to_memory(&entry).await,
        Err(ReadError::UnsupportedFeature(_))
    ));
    Ok(())
}
