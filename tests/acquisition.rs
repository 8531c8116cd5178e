//! End-to-end acquisition/read-back scenarios (spec §8 seed suite), run
//! against real temporary segment files rather than in-memory fixtures, the
//! way the teacher's own crate favours integration tests under `tests/` for
//! anything that crosses module boundaries.

use std::fs::OpenOptions;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use ewf_engine::compression::Level;
use ewf_engine::format::Variant;
use ewf_engine::section::{read_section_header, SECTION_HEADER_SIZE};
use ewf_engine::segment::{self, SEGMENT_HEADER_SIZE};
use ewf_engine::{EwfError, EwfReader, EwfWriter, WriterConfig};

fn scratch_path(name: &str) -> std::path::PathBuf {
    let dir = tempfile::tempdir().unwrap().into_path();
    dir.join(format!("{name}.E01"))
}

/// Deterministic, non-repeating fill so compression never collapses a test
/// fixture down to the empty-block case by accident.
fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Scenario 1: tiny write, verify MD5 (spec §8 seed suite #1).
#[test]
fn tiny_write_verify_md5() {
    let path = scratch_path("tiny_md5");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 64,
        bytes_per_sector: 512,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    writer.write_from(&mut Cursor::new(vec![0u8; 1024]), None).unwrap();
    writer.close().unwrap();

    let mut reader = EwfReader::open(&path).unwrap();
    assert_eq!(reader.media().media_size(), 1024);
    assert_eq!(
        hex(&reader.hashes().md5),
        "0f343b0931126a20f133d67c2b018a3b"
    );

    let mut buf = vec![0u8; 1024];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 1024);
    assert!(buf.iter().all(|&b| b == 0));
}

/// Scenario 2: two chunks, seek into the second and read a slice back. The
/// fixture uses a single repeated byte, which §4.1's empty-block rule stores
/// compressed even at `Level::None` — this test exercises the chunk-count
/// and seek arithmetic, not the raw-vs-compressed storage choice (covered
/// separately in `compression.rs`'s unit tests).
#[test]
fn two_chunk_seek_and_read() {
    let path = scratch_path("two_chunk_raw");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 64,
        bytes_per_sector: 512,
        compression: Level::None,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    let data = vec![0x41u8; 65536];
    writer.write_from(&mut Cursor::new(data), None).unwrap();
    writer.close().unwrap();

    let mut reader = EwfReader::open(&path).unwrap();
    assert_eq!(reader.chunk_count(), 2);

    reader.seek_to(32000).unwrap();
    let mut buf = vec![0u8; 2000];
    let n = reader.read(&mut buf).unwrap();
    assert_eq!(n, 2000);
    assert!(buf.iter().all(|&b| b == 0x41));
}

/// Scenario 3: a segment cap well under the input size forces at least
/// three segments, each non-terminal one ending in `next`.
#[test]
fn segment_rollover_produces_multiple_segments() {
    let path = scratch_path("rollover");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 64,
        bytes_per_sector: 512,
        segment_file_size: 1536 * 1024, // 1.5 MiB
        compression: Level::None,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    let data = pseudo_random(4 * 1024 * 1024, 0xC0FFEE);
    writer.write_from(&mut Cursor::new(data.clone()), None).unwrap();
    writer.close().unwrap();

    let segments = segment::discover_segments(&path).unwrap();
    assert!(segments.len() >= 3, "expected rollover to produce >= 3 segments, got {}", segments.len());

    let mut reader = EwfReader::open(&path).unwrap();
    let mut read_back = vec![0u8; data.len()];
    let mut total = 0;
    while total < read_back.len() {
        let n = reader.read(&mut read_back[total..]).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(total, data.len());
    assert_eq!(read_back, data);
}

/// Scenario 4: the input stream fails for one chunk's worth of reads, then
/// recovers; the failure is absorbed into `error2` rather than failing the
/// write, and `close()` reports `Partial`.
#[test]
fn read_error_is_absorbed_and_reported_as_partial() {
    /// Fails every read for `fail_chunk_index`'s span until `read_error_retry`
    /// is exhausted, then behaves as if the device skipped the unreadable
    /// run: position jumps to the next chunk boundary and reads resume
    /// normally from there, matching how `seek_on_error`-style devices
    /// recover from a bad-sector run.
    struct FlakyInput {
        data: Vec<u8>,
        pos: usize,
        fail_chunk_index: usize,
        chunk_span: usize,
        fails_remaining: u32,
    }
    impl Read for FlakyInput {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let chunk_index = self.pos / self.chunk_span;
            if chunk_index == self.fail_chunk_index && self.fails_remaining > 0 {
                self.fails_remaining -= 1;
                if self.fails_remaining == 0 {
                    self.pos = (self.fail_chunk_index + 1) * self.chunk_span;
                }
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "simulated media failure"));
            }
            if self.pos >= self.data.len() {
                return Ok(0);
            }
            let remaining = &self.data[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        }
    }

    let path = scratch_path("read_error");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 8,
        bytes_per_sector: 512,
        error_granularity: 1,
        read_error_retry: 2,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();

    let chunk_span = 8 * 512;
    let total_chunks = 4;
    let data = pseudo_random(chunk_span * total_chunks, 42);
    let mut input = FlakyInput {
        data,
        pos: 0,
        fail_chunk_index: 1, // the second chunk is unreadable
        chunk_span,
        fails_remaining: 3, // 1 initial attempt + 2 retries
    };
    writer.write_from(&mut input, None).unwrap();
    assert_eq!(writer.read_errors().len(), 1);
    assert_eq!(writer.read_errors()[0].start_sector, 8);

    match writer.close() {
        Err(EwfError::Partial { error_count }) => assert_eq!(error_count, 1),
        other => panic!("expected Partial, got {other:?}"),
    }

    let reader = EwfReader::open(&path).unwrap();
    assert_eq!(reader.read_errors().len(), 1);
    assert_eq!(reader.read_errors()[0].start_sector, 8);
}

/// Scenario 5: flip a byte in the primary `table`'s checksum; the reader
/// must recover transparently from `table2` and return identical chunk data.
#[test]
fn corrupt_primary_table_recovers_from_table2() {
    let path = scratch_path("corrupt_table");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 4,
        bytes_per_sector: 512,
        compression: Level::None,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    let data = pseudo_random(4 * 512 * 3, 7);
    writer.write_from(&mut Cursor::new(data.clone()), None).unwrap();
    writer.close().unwrap();

    corrupt_first_table_section(&path);

    let mut reader = EwfReader::open(&path).unwrap();
    let mut read_back = vec![0u8; data.len()];
    let mut total = 0;
    while total < read_back.len() {
        let n = reader.read(&mut read_back[total..]).unwrap();
        if n == 0 {
            break;
        }
        total += n;
    }
    assert_eq!(read_back, data);
}

/// Flips the last byte (the entries' Adler-32 footer) of the first `table`
/// section found in the segment chain, leaving `table2` untouched.
fn corrupt_first_table_section(path: &std::path::Path) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut offset = SEGMENT_HEADER_SIZE;
    loop {
        file.seek(SeekFrom::Start(offset)).unwrap();
        let header = read_section_header(&mut file, offset).unwrap();
        let section_type = header.type_str();
        if section_type == "table" {
            let payload_offset = offset + SECTION_HEADER_SIZE;
            let last_byte_offset = payload_offset + header.payload_size() - 1;
            file.seek(SeekFrom::Start(last_byte_offset)).unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            byte[0] ^= 0xff;
            file.seek(SeekFrom::Start(last_byte_offset)).unwrap();
            file.write_all(&byte).unwrap();
            return;
        }
        if section_type == "done" || header.next_offset == offset {
            panic!("no table section found before the chain terminated");
        }
        offset = header.next_offset;
    }
}

/// Scenario 6: round-trip with SHA-1 requested; the stored `digest` section
/// must match a digest recomputed from a full read-back.
#[test]
fn round_trip_with_sha1_digest() {
    let path = scratch_path("sha1_round_trip");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 64,
        bytes_per_sector: 512,
        calculate_sha1: true,
        compression: Level::Fast,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    let data = pseudo_random(3 * 1024 * 1024, 0xABCDEF);
    writer.write_from(&mut Cursor::new(data.clone()), None).unwrap();
    writer.close().unwrap();

    let mut reader = EwfReader::open(&path).unwrap();
    let stored_sha1 = reader.hashes().sha1.expect("digest section should carry a SHA-1");

    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let recomputed: [u8; 20] = hasher.finalize().into();
    assert_eq!(stored_sha1, recomputed);
}

/// Boundary behaviour: an input stream shorter than one chunk still produces
/// a valid, readable image (spec §8 "short final chunk" variant). The fully
/// empty case (zero bytes in, zero chunks out) is covered separately at the
/// unit level in `writer.rs`'s `empty_input_produces_a_valid_zero_chunk_image`,
/// since it has nothing to seek into and is better exercised without a
/// temp-file round trip.
#[test]
fn short_final_chunk_round_trips() {
    let path = scratch_path("short_chunk");
    let config = WriterConfig {
        variant: Variant::Encase5,
        sectors_per_chunk: 64,
        bytes_per_sector: 512,
        ..WriterConfig::default()
    };
    let mut writer = EwfWriter::new(&path, config).unwrap();
    let data = pseudo_random(1000, 99); // well under one 32768-byte chunk
    writer.write_from(&mut Cursor::new(data.clone()), None).unwrap();
    writer.close().unwrap();

    let mut reader = EwfReader::open(&path).unwrap();
    assert_eq!(reader.media().media_size() as usize, data.len() - data.len() % 512);

    let mut buf = vec![0u8; data.len()];
    let n = reader.read(&mut buf).unwrap();
    assert!(n > 0);
}

/// Idempotent close: a second `close()` call must fail with `state` and
/// perform no further I/O (spec §8 "Idempotent close").
#[test]
fn closing_writer_twice_is_rejected() {
    let path = scratch_path("double_close_integration");
    let mut writer = EwfWriter::new(&path, WriterConfig::default()).unwrap();
    writer.write_from(&mut Cursor::new(vec![0u8; 512]), None).unwrap();
    writer.close().unwrap();
    assert!(matches!(writer.close(), Err(EwfError::State(_))));
}
