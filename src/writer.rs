//! Write/acquire path (C7, §4.6): the streaming acquisition state machine.
//! `Configuring -> Open -> Writing -> Finalizing -> Closed`, built on the
//! same section/table/media codecs the reader uses.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use md5::{Digest, Md5};
use sha1::Sha1;

use crate::compression::{self, Level};
use crate::error::{EwfError, Result};
use crate::format::{Variant, DEFAULT_CHUNKS_PER_SECTION};
use crate::header::{self, HeaderStore, SystemDefaults};
use crate::media::{
    encode_digest_section, encode_error2_section, encode_hash_section, encode_session_section,
    ErrorEntry, MediaDescriptor, MediaType, SessionEntry,
};
use crate::section::{write_section, SECTION_HEADER_SIZE};
use crate::segment::{self, write_segment_header};
use crate::table::{TableEntry, TableSection};

/// Cooperative cancellation signal polled at chunk boundaries (§5).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Acquisition parameters. Defaults are taken from
/// `examples/original_source/ewftools/ewfacquirestream.c` (§4.6
/// supplement): 64 sectors/chunk, 64-sector error granularity, 2 read
/// retries, zero-fill (not pattern wipe) absorption, MD5 always on, SHA-1
/// off by default.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub variant: Variant,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub compression: Level,
    pub segment_file_size: u64,
    pub calculate_sha1: bool,
    pub error_granularity: u32,
    pub read_error_retry: u8,
    pub wipe_chunk_on_error: bool,
    pub wipe_pattern: u8,
    pub seek_on_error: bool,
    pub swap_byte_pairs: bool,
    pub media_type: MediaType,
    pub sessions: Vec<SessionEntry>,
    pub case_number: Option<String>,
    pub description: Option<String>,
    pub examiner_name: Option<String>,
    pub evidence_number: Option<String>,
    pub notes: Option<String>,
}

/// `ewfacquirestream`'s default segment size (640 MiB expressed in bytes,
/// comfortably under the 32-bit-offset variants' 2 GiB cap while still
/// being larger than typical test fixtures).
pub const DEFAULT_SEGMENT_FILE_SIZE: u64 = 640 * 1024 * 1024;

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            variant: Variant::Encase5,
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            compression: Level::None,
            segment_file_size: DEFAULT_SEGMENT_FILE_SIZE,
            calculate_sha1: false,
            error_granularity: 64,
            read_error_retry: 2,
            wipe_chunk_on_error: false,
            wipe_pattern: 0x00,
            seek_on_error: false,
            swap_byte_pairs: false,
            media_type: MediaType::Fixed,
            sessions: Vec::new(),
            case_number: None,
            description: None,
            examiner_name: None,
            evidence_number: None,
            notes: None,
        }
    }
}

/// The streaming acquisition state machine's current state (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Configuring,
    Open,
    Writing,
    Finalizing,
    Closed,
}

/// Outcome reported when a write session ends, distinguishing a clean
/// finish from one cut short by cancellation (§5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    Completed,
    Cancelled,
}

pub struct EwfWriter {
    state: State,
    config: WriterConfig,
    basename: PathBuf,
    segment_number: u16,
    current_file: Option<File>,
    current_offset: u64,
    sectors_buffer: Vec<u8>,
    pending_entries: Vec<TableEntry>,
    media: MediaDescriptor,
    header: HeaderStore,
    md5: Md5,
    sha1: Sha1,
    errors: Vec<ErrorEntry>,
    sector_cursor: u64,
    close_status: Option<CloseStatus>,
}

impl EwfWriter {
    /// Transitions `Configuring -> Open`: validates the configuration
    /// against the variant's format policy, creates the first segment file,
    /// and writes its header/header2 and initial volume sections.
    pub fn new(path: impl AsRef<Path>, config: WriterConfig) -> Result<Self> {
        config
            .variant
            .validate_segment_size(config.segment_file_size)
            .map_err(EwfError::invalid_argument)?;

        let mut header = HeaderStore::new();
        if let Some(v) = &config.case_number {
            header.set(header::CASE_NUMBER, v.clone());
        }
        if let Some(v) = &config.description {
            header.set(header::DESCRIPTION, v.clone());
        }
        if let Some(v) = &config.examiner_name {
            header.set(header::EXAMINER_NAME, v.clone());
        }
        if let Some(v) = &config.evidence_number {
            header.set(header::EVIDENCE_NUMBER, v.clone());
        }
        if let Some(v) = &config.notes {
            header.set(header::NOTES, v.clone());
        }
        header.apply_defaults(&header::SystemDefaults, &SystemDefaults);

        let guid = if config.variant.policy().emits_guid {
            Some(*uuid::Uuid::new_v4().as_bytes())
        } else {
            None
        };

        let media = MediaDescriptor {
            media_type: config.media_type,
            sectors_per_chunk: config.sectors_per_chunk,
            bytes_per_sector: config.bytes_per_sector,
            error_granularity: config.error_granularity,
            compression_level: match config.compression {
                Level::None => 0,
                Level::Fast => 1,
                Level::Best => 2,
            },
            chunks_per_section: DEFAULT_CHUNKS_PER_SECTION,
            guid,
            ..MediaDescriptor::default()
        };

        let mut writer = EwfWriter {
            state: State::Configuring,
            config,
            basename: path.as_ref().to_path_buf(),
            segment_number: 1,
            current_file: None,
            current_offset: 0,
            sectors_buffer: Vec::new(),
            pending_entries: Vec::new(),
            media,
            header,
            md5: Md5::new(),
            sha1: Sha1::new(),
            errors: Vec::new(),
            sector_cursor: 0,
            close_status: None,
        };

        writer.open_segment(1, true)?;
        writer.state = State::Open;
        info!(
            "opened acquisition target {:?} (variant {:?}, {} sectors/chunk, compression {:?})",
            writer.basename, writer.config.variant, writer.config.sectors_per_chunk, writer.config.compression
        );
        Ok(writer)
    }

    /// Sets a header field. Illegal once acquisition has started (§4.6
    /// "setting format after first chunk fails with `state`").
    pub fn set_header_field(&mut self, identifier: &str, value: impl Into<String>) -> Result<()> {
        if self.state != State::Open {
            return Err(EwfError::state(
                "header fields cannot be changed after acquisition has started",
            ));
        }
        self.header.set(identifier, value);
        Ok(())
    }

    fn chunk_span(&self) -> usize {
        self.config.sectors_per_chunk as usize * self.config.bytes_per_sector as usize
    }

    fn open_segment(&mut self, number: u16, first: bool) -> Result<()> {
        let path = if first {
            self.basename.clone()
        } else {
            segment::segment_path(&self.basename, self.config.variant, number as u32)?
        };
        let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
        write_segment_header(&mut file, self.config.variant, number)?;
        self.current_offset = segment::SEGMENT_HEADER_SIZE;
        self.segment_number = number;

        if first {
            let policy = self.config.variant.policy();
            if policy.supports_header2 {
                let header2 = compression::deflate(Level::Best, &self.header.encode_utf16())?;
                self.write_section_now("header2", &header2, &mut file)?;
            }
            let header = compression::deflate(Level::Best, &self.header.encode_ascii())?;
            self.write_section_now("header", &header, &mut file)?;
            if policy.supports_header2 {
                let header2 = compression::deflate(Level::Best, &self.header.encode_utf16())?;
                self.write_section_now("header2", &header2, &mut file)?;
            }
            if policy.supports_xheader {
                let xheader = compression::deflate(Level::Best, &self.header.encode_xheader())?;
                self.write_section_now("xheader", &xheader, &mut file)?;
            }
            let volume_payload = self.media.encode();
            let volume_type = if policy.signature == crate::format::LVF_SIGNATURE {
                "disk"
            } else {
                "volume"
            };
            self.write_section_now(volume_type, &volume_payload, &mut file)?;
        }

        self.current_file = Some(file);
        Ok(())
    }

    fn write_section_now(&mut self, section_type: &str, payload: &[u8], file: &mut File) -> Result<()> {
        let this_offset = self.current_offset;
        let next_offset = this_offset + SECTION_HEADER_SIZE + payload.len() as u64;
        let written = write_section(file, section_type, this_offset, next_offset, payload)?;
        self.current_offset += written;
        Ok(())
    }

    /// Streams chunk-span-sized reads from `input` until it is exhausted or
    /// `cancel` fires, applying §4.6 steps 1-6 to each complete chunk.
    pub fn write_from<R: Read>(&mut self, input: &mut R, cancel: Option<&CancellationToken>) -> Result<()> {
        if self.state == State::Closed {
            return Err(EwfError::state("writer is already closed"));
        }
        if self.state == State::Open {
            self.state = State::Writing;
        }

        let chunk_span = self.chunk_span();
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    self.truncate_on_cancel()?;
                    self.close_status = Some(CloseStatus::Cancelled);
                    self.state = State::Closed;
                    return Err(EwfError::Cancelled);
                }
            }

            let mut buf = vec![0u8; chunk_span];
            let filled = self.read_chunk_with_retry(input, &mut buf)?;
            if filled == 0 {
                break;
            }
            let mut data = buf;
            data.truncate(filled);
            if self.config.swap_byte_pairs {
                swap_byte_pairs(&mut data);
            }

            self.md5.update(&data);
            if self.config.calculate_sha1 {
                self.sha1.update(&data);
            }

            let encoded = compression::encode_chunk(self.config.compression, &data)?;
            self.append_chunk(encoded.bytes, encoded.compressed, filled)?;
            self.sector_cursor += (filled as u64) / self.config.bytes_per_sector as u64;

            if filled < chunk_span {
                // short final chunk: the input stream ended mid-chunk.
                break;
            }
        }
        Ok(())
    }

    /// Reads one chunk's worth of bytes from `input`, retrying on a
    /// transient I/O error up to `read_error_retry` times before absorbing
    /// a persistent failure into the `error2` list (§4.6 "Read-error
    /// policy"). Returns the number of bytes actually filled (0 at EOF).
    fn read_chunk_with_retry<R: Read>(&mut self, input: &mut R, buf: &mut [u8]) -> Result<usize> {
        let mut attempts = 0;
        loop {
            match read_full_or_eof(input, buf) {
                Ok(n) => return Ok(n),
                Err(_) if attempts < self.config.read_error_retry => {
                    attempts += 1;
                    continue;
                }
                Err(_) => {
                    let granularity = self.config.error_granularity.max(1) as u64;
                    self.errors.push(ErrorEntry {
                        start_sector: self.sector_cursor,
                        sector_count: granularity,
                    });
                    let fill_byte = if self.config.wipe_chunk_on_error {
                        self.config.wipe_pattern
                    } else {
                        0x00
                    };
                    buf.fill(fill_byte);
                    if self.config.seek_on_error {
                        self.sector_cursor += granularity;
                    }
                    return Ok(buf.len());
                }
            }
        }
    }

    fn append_chunk(&mut self, encoded: Vec<u8>, compressed: bool, logical_len: usize) -> Result<()> {
        let footer_reserve = self.footer_reserve();
        let projected = self.current_offset
            + self.sectors_buffer.len() as u64
            + encoded.len() as u64
            + footer_reserve;

        if projected > self.config.segment_file_size && !self.sectors_buffer.is_empty() {
            self.flush_table_triplet()?;
            self.roll_segment()?;
        }

        let relative_offset = self.sectors_buffer.len() as u32;
        self.pending_entries.push(TableEntry {
            relative_offset,
            compressed,
        });
        self.sectors_buffer.extend_from_slice(&encoded);

        self.media.chunk_count += 1;
        self.media.sector_count += (logical_len as u64) / self.config.bytes_per_sector as u64;

        if self.pending_entries.len() as u32 >= self.media.chunks_per_section {
            self.flush_table_triplet()?;
        }
        Ok(())
    }

    /// Rough upper bound on the bytes the mandatory tail sections will need
    /// (§4.3 "footer reserve"), used to decide whether to roll to a new
    /// segment before the current one grows past its configured cap.
    fn footer_reserve(&self) -> u64 {
        let policy = self.config.variant.policy();
        let mut reserve = SECTION_HEADER_SIZE * 2; // table2 trailer of the in-flight triplet + done
        reserve += SECTION_HEADER_SIZE + crate::media::VOLUME_PAYLOAD_SIZE as u64; // data
        reserve += SECTION_HEADER_SIZE + crate::media::HASH_PAYLOAD_SIZE as u64; // hash
        if policy.supports_digest {
            reserve += SECTION_HEADER_SIZE + crate::media::DIGEST_PAYLOAD_SIZE as u64;
        }
        reserve += SECTION_HEADER_SIZE + 64; // error2, generous fixed allowance
        reserve
    }

    fn flush_table_triplet(&mut self) -> Result<()> {
        if self.pending_entries.is_empty() {
            return Ok(());
        }
        let base_offset = self.current_offset + SECTION_HEADER_SIZE;
        let sectors_payload = std::mem::take(&mut self.sectors_buffer);
        let mut file = self.current_file.take().unwrap();
        self.write_section_now("sectors", &sectors_payload, &mut file)?;

        let table = TableSection {
            base_offset,
            entries: std::mem::take(&mut self.pending_entries),
        };
        let encoded_table = table.encode();
        self.write_section_now("table", &encoded_table, &mut file)?;
        self.write_section_now("table2", &encoded_table, &mut file)?;

        self.current_file = Some(file);
        Ok(())
    }

    /// Rolls to the next segment file. Rejects with `unsupported` when the
    /// next segment number would exceed what this variant's offset width
    /// keeps addressable: 32-bit-offset variants must stay within the
    /// `E01..ZZZ` naming scheme's `segment::MAX_SEGMENT_NUMBER`, while
    /// 64-bit-offset variants (encase6, linen6, ewfx) address segments wide
    /// enough that this never comes up in practice (§8 "Input larger than
    /// 32-bit-offset variant limit").
    fn roll_segment(&mut self) -> Result<()> {
        let next_number = self.segment_number as u32 + 1;
        let policy = self.config.variant.policy();
        if policy.max_segment_size == crate::format::MAX_SEGMENT_SIZE_32BIT
            && next_number > segment::MAX_SEGMENT_NUMBER
        {
            return Err(EwfError::unsupported(format!(
                "segment number {next_number} exceeds the {:?} variant's 32-bit-offset addressing limit",
                self.config.variant
            )));
        }
        let next_number = next_number as u16;
        let next_offset = self.current_offset;
        let mut file = self.current_file.take().unwrap();
        write_section(&mut file, "next", self.current_offset, next_offset, &[])?;
        file.flush()?;

        self.open_segment(next_number, false)?;
        Ok(())
    }

    fn truncate_on_cancel(&mut self) -> Result<()> {
        self.flush_table_triplet()?;
        if let Some(file) = self.current_file.as_mut() {
            file.set_len(self.current_offset)?;
            file.flush()?;
        }
        Ok(())
    }

    /// Transitions `Writing -> Finalizing -> Closed`: flushes any
    /// in-flight triplet, writes the trailing `data`/`digest`/`hash`/
    /// `error2`/`done` sections in variant order, and closes the image.
    /// Idempotent: a second call returns `state` and performs no I/O.
    ///
    /// The image is fully written and readable regardless of outcome (§4.6
    /// "the acquisition completes successfully even with error entries").
    /// When the session absorbed one or more read errors, this still
    /// returns `Err(EwfError::Partial)` — informational, per §7, not a
    /// failed write — so callers don't have to separately poll
    /// `read_errors()` to notice a best-effort image.
    pub fn close(&mut self) -> Result<CloseStatus> {
        if self.state == State::Closed {
            return Err(EwfError::state("writer already closed"));
        }
        self.state = State::Finalizing;
        self.flush_table_triplet()?;

        let mut file = self.current_file.take().unwrap();
        let policy = self.config.variant.policy();

        let volume_type = if policy.signature == crate::format::LVF_SIGNATURE {
            "disk"
        } else {
            "data"
        };
        let echo_payload = self.media.encode();
        self.write_section_now(volume_type, &echo_payload, &mut file)?;

        let md5: [u8; 16] = self.md5.clone().finalize().into();
        if policy.supports_digest && self.config.calculate_sha1 {
            let sha1: [u8; 20] = self.sha1.clone().finalize().into();
            let digest_payload = encode_digest_section(&md5, &sha1);
            self.write_section_now("digest", &digest_payload, &mut file)?;
        }
        let hash_payload = encode_hash_section(&md5);
        self.write_section_now("hash", &hash_payload, &mut file)?;

        let error2_payload = encode_error2_section(&self.errors);
        self.write_section_now("error2", &error2_payload, &mut file)?;

        let done_offset = self.current_offset;
        write_section(&mut file, "done", done_offset, done_offset, &[])?;
        file.flush()?;
        self.current_file = Some(file);

        self.state = State::Closed;
        let status = self.close_status.unwrap_or(CloseStatus::Completed);
        if !self.errors.is_empty() {
            info!("acquisition completed with {} recorded read error(s)", self.errors.len());
            return Err(EwfError::Partial { error_count: self.errors.len() });
        }
        Ok(status)
    }

    pub fn read_errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn state(&self) -> State {
        self.state
    }
}

fn read_full_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match input.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Endianness-correction swap applied before compression/hashing when
/// `swap_byte_pairs` is set (§4.6 step 1).
fn swap_byte_pairs(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}
