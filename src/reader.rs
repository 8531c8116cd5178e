//! Read path (C6, §4.5): chunk fetch, decompress-or-verify, buffer slice
//! return. Built on the section codec, the chunk/offset table (with its
//! table2/scan recovery), and the segment pool's bounded LRU (§5).

use std::io::Read;
use std::path::Path;

use flate2::read::ZlibDecoder;
use log::{debug, warn};

use crate::checksum;
use crate::compression;
use crate::error::{EwfError, Locus, Result, SectionTag};
use crate::format::DEFAULT_CHUNKS_PER_SECTION;
use crate::header::HeaderStore;
use crate::io_handle::IoHandle;
use crate::media::{
    decode_digest_section, decode_error2_section, decode_hash_section, ErrorEntry, Hashes,
    MediaDescriptor,
};
use crate::section::read_section_header;
use crate::segment::{self, SegmentPool};
use crate::table::{ChunkTable, TableSection};

/// A decoded chunk held between reads, so that many small `read()` calls
/// into the same chunk don't re-fetch/re-inflate it (mirrors the teacher's
/// single-chunk `ChunkCache` in `ewf.rs`).
struct ChunkCache {
    chunk_number: u64,
    data: Vec<u8>,
}

/// Pending `table` section awaiting a possible `table2` backup, per the
/// §4.4 Recovery rule: primary wins if valid, else fall back to the
/// backup, else attempt a forward scan reconstruction.
struct PendingTable {
    primary: Result<TableSection>,
    sentinel: u64,
    segment_size: u64,
    scan_range: Option<(u64, u64)>,
}

/// Opens and serves reads over a multi-segment EWF image set, per §4.5/§5.
pub struct EwfReader {
    pool: SegmentPool,
    media: MediaDescriptor,
    header: HeaderStore,
    hashes: Hashes,
    errors: Vec<ErrorEntry>,
    chunk_table: ChunkTable,
    io: IoHandle,
    cache: Option<ChunkCache>,
}

impl EwfReader {
    /// Opens the image set that `path` (any one segment file) belongs to,
    /// scanning every segment's section chain in order (§2 read data flow).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let segment_paths = segment::discover_segments(path.as_ref())?;
        let mut pool = SegmentPool::new(segment_paths.clone(), segment::DEFAULT_OPEN_SEGMENT_LRU);

        let mut media = MediaDescriptor::default();
        let mut header = HeaderStore::new();
        let mut hashes = Hashes::default();
        let mut errors = Vec::new();
        let mut chunk_table = ChunkTable::new();

        let mut segment_sizes = Vec::with_capacity(segment_paths.len());
        for path in &segment_paths {
            segment_sizes.push(std::fs::metadata(path)?.len());
        }

        for (segment_index, path) in segment_paths.iter().enumerate() {
            let segment_id = (segment_index + 1) as u16;
            let segment_size = segment_sizes[segment_index];
            Self::scan_segment(
                &mut pool,
                segment_index,
                segment_id,
                segment_size,
                &mut media,
                &mut header,
                &mut hashes,
                &mut errors,
                &mut chunk_table,
            )?;
        }

        let chunk_span = media.chunk_span() as u64;
        let io = IoHandle::new(chunk_span.max(1), media.media_size());

        Ok(EwfReader {
            pool,
            media,
            header,
            hashes,
            errors,
            chunk_table,
            io,
            cache: None,
        })
    }

    pub fn media(&self) -> &MediaDescriptor {
        &self.media
    }

    pub fn header(&self) -> &HeaderStore {
        &self.header
    }

    pub fn hashes(&self) -> &Hashes {
        &self.hashes
    }

    pub fn read_errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_table.len()
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_segment(
        pool: &mut SegmentPool,
        segment_index: usize,
        segment_id: u16,
        segment_size: u64,
        media: &mut MediaDescriptor,
        header: &mut HeaderStore,
        hashes: &mut Hashes,
        errors: &mut Vec<ErrorEntry>,
        chunk_table: &mut ChunkTable,
    ) -> Result<()> {
        let mut header_bytes = [0u8; segment::SEGMENT_HEADER_SIZE as usize];
        pool.read_at(segment_index, 0, &mut header_bytes)?;
        let mut cursor = &header_bytes[..];
        let parsed_segment_number = segment::read_segment_header(&mut cursor)?;
        if parsed_segment_number != segment_id {
            warn!(
                "segment file at index {segment_index} declares segment number {parsed_segment_number}, expected {segment_id}"
            );
        }

        let mut offset = segment::SEGMENT_HEADER_SIZE;
        let mut pending: Option<PendingTable> = None;
        let mut last_sectors_range: Option<(u64, u64)> = None;

        loop {
            let mut header_bytes = [0u8; crate::section::SECTION_HEADER_SIZE as usize];
            pool.read_at(segment_index, offset, &mut header_bytes)?;
            let section = read_section_header(&mut &header_bytes[..], offset)?;
            let section_type = section.type_str();
            debug!("segment {segment_id}: section '{section_type}' at offset {offset}");

            let payload_offset = offset + crate::section::SECTION_HEADER_SIZE;
            let payload_size = section.payload_size() as usize;

            match section_type.as_str() {
                "header" | "header2" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    let inflated = inflate_header(&payload)?;
                    let parsed = HeaderStore::decode(&inflated)?;
                    for (id, value) in parsed.iter() {
                        header.set(id, value);
                    }
                }
                "volume" | "disk" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    *media = MediaDescriptor::decode(&payload)?;
                    last_sectors_range = None;
                }
                "sectors" => {
                    Self::flush_pending(pending.take(), chunk_table, segment_id)?;
                    last_sectors_range = Some((payload_offset, payload_offset + payload_size as u64));
                }
                "table" => {
                    Self::flush_pending(pending.take(), chunk_table, segment_id)?;
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    let decoded = TableSection::decode(&payload).map_err(|e| {
                        EwfError::corruption_at(
                            Locus {
                                segment: Some(segment_id),
                                offset: Some(offset),
                                section: Some(SectionTag::new("table")),
                            },
                            e.to_string(),
                        )
                    });
                    let sentinel = last_sectors_range.map(|(_, end)| end).unwrap_or(0);
                    pending = Some(PendingTable {
                        primary: decoded,
                        sentinel,
                        segment_size,
                        scan_range: last_sectors_range,
                    });
                }
                "table2" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    let backup = TableSection::decode(&payload);
                    if let Some(mut p) = pending.take() {
                        if p.primary.is_err() {
                            match backup {
                                Ok(t2) => {
                                    warn!("segment {segment_id}: primary table corrupt, recovered from table2");
                                    p.primary = Ok(t2);
                                }
                                Err(_) => {
                                    if let Some((start, end)) = p.scan_range {
                                        warn!(
                                            "segment {segment_id}: table and table2 both corrupt, attempting forward scan"
                                        );
                                        p.primary = reconstruct_by_scanning(
                                            pool,
                                            segment_index,
                                            start,
                                            end,
                                            media.chunk_span() as u64,
                                        );
                                    }
                                }
                            }
                        }
                        Self::flush_pending(Some(p), chunk_table, segment_id)?;
                    }
                }
                "digest" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    let (_md5, sha1) = decode_digest_section(&payload)?;
                    hashes.sha1 = Some(sha1);
                }
                "hash" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    hashes.md5 = decode_hash_section(&payload)?;
                }
                "error2" => {
                    let mut payload = vec![0u8; payload_size];
                    pool.read_at(segment_index, payload_offset, &mut payload)?;
                    errors.extend(decode_error2_section(&payload)?);
                }
                _ => {
                    // data/session/next/done and any unrecognised type: skip
                    // via next_offset alone (§4.2 forward compatibility).
                }
            }

            if section_type == "done" || section.next_offset == offset {
                Self::flush_pending(pending.take(), chunk_table, segment_id)?;
                break;
            }
            if section_type == "next" {
                Self::flush_pending(pending.take(), chunk_table, segment_id)?;
                break;
            }
            offset = section.next_offset;
        }

        Ok(())
    }

    fn flush_pending(pending: Option<PendingTable>, chunk_table: &mut ChunkTable, segment_id: u16) -> Result<()> {
        let Some(pending) = pending else { return Ok(()) };
        let table = pending.primary?;
        chunk_table.push_table(
            segment_id,
            &table,
            pending.sentinel,
            pending.segment_size,
            DEFAULT_CHUNKS_PER_SECTION,
        )
    }

    /// Reads `buf.len()` bytes starting at the reader's current logical
    /// offset, returning the number of bytes actually copied (0 at EOF).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        while written < buf.len() {
            let position = self.io.position();
            if position >= self.io.media_size() {
                break;
            }
            let (chunk_number, intra) = self.io.current_chunk();
            if chunk_number as usize >= self.chunk_table.len() {
                break;
            }
            self.ensure_cached(chunk_number)?;
            let cache = self.cache.as_ref().unwrap();
            let available = cache.data.len() - intra as usize;
            let want = (buf.len() - written).min(available);
            buf[written..written + want]
                .copy_from_slice(&cache.data[intra as usize..intra as usize + want]);
            written += want;
            self.io.advance(want as u64);
        }
        Ok(written)
    }

    pub fn seek_to(&mut self, offset: u64) -> Result<u64> {
        self.io.seek_to(offset)
    }

    pub fn seek_relative(&mut self, delta: i64) -> Result<u64> {
        self.io.seek_relative(delta)
    }

    pub fn seek_from_end(&mut self, delta: i64) -> Result<u64> {
        self.io.seek_from_end(delta)
    }

    pub fn position(&self) -> u64 {
        self.io.position()
    }

    fn ensure_cached(&mut self, chunk_number: u64) -> Result<()> {
        if let Some(cache) = &self.cache {
            if cache.chunk_number == chunk_number {
                return Ok(());
            }
        }
        let descriptor = *self
            .chunk_table
            .get(chunk_number as usize)
            .ok_or_else(|| EwfError::invalid_argument("chunk number out of range"))?;

        let mut stored = vec![0u8; descriptor.stored_length as usize];
        self.pool
            .read_at((descriptor.segment_id - 1) as usize, descriptor.file_offset, &mut stored)?;

        let chunk_span = self.media.chunk_span();
        let data = compression::decode_chunk(&stored, descriptor.compressed, chunk_span).map_err(|e| {
            if matches!(e, EwfError::Corruption { .. }) {
                EwfError::Integrity {
                    chunk: chunk_number,
                    locus: Locus {
                        segment: Some(descriptor.segment_id),
                        offset: Some(descriptor.file_offset),
                        section: None,
                    },
                }
            } else {
                e
            }
        })?;

        self.cache = Some(ChunkCache { chunk_number, data });
        Ok(())
    }
}

fn inflate_header(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EwfError::corruption(format!("failed to inflate header section: {e}")))?;
    Ok(out)
}

/// §4.4 Recovery, last resort: scan `[start, end)` assuming every chunk in
/// this range is stored raw (payload + trailing Adler-32) at the declared
/// `chunk_span`, verifying each trailer as it goes. Succeeds only when the
/// range divides evenly and every chunk's checksum checks out; compressed
/// or short-last-chunk segments are not recoverable this way and surface as
/// `corruption`, consistent with the §9 note that reconstruction is a
/// best-effort fallback, not a general-purpose parser.
fn reconstruct_by_scanning(
    pool: &mut SegmentPool,
    segment_index: usize,
    start: u64,
    end: u64,
    chunk_span: u64,
) -> Result<TableSection> {
    let stored_chunk_size = chunk_span + 4;
    let span = end.saturating_sub(start);
    if stored_chunk_size == 0 || span % stored_chunk_size != 0 {
        return Err(EwfError::corruption(
            "forward scan reconstruction failed: sectors payload is not a multiple of the raw chunk size",
        ));
    }

    let count = span / stored_chunk_size;
    let mut entries = Vec::with_capacity(count as usize);
    for i in 0..count {
        let chunk_offset = start + i * stored_chunk_size;
        let mut buf = vec![0u8; stored_chunk_size as usize];
        pool.read_at(segment_index, chunk_offset, &mut buf)?;
        let (payload, trailer) = buf.split_at(chunk_span as usize);
        let stored_adler = u32::from_le_bytes(trailer.try_into().unwrap());
        let computed_adler = checksum::adler32(checksum::INITIAL, payload);
        if stored_adler != computed_adler {
            return Err(EwfError::corruption(
                "forward scan reconstruction failed: chunk checksum mismatch at reconstructed boundary",
            ));
        }
        entries.push(crate::table::TableEntry {
            relative_offset: (i * stored_chunk_size) as u32,
            compressed: false,
        });
    }

    Ok(TableSection { base_offset: start, entries })
}
