//! Media descriptor (`volume`/`disk` section payload), error entries, and
//! hash containers — the non-chunk parts of the data model in §3.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum;
use crate::error::{EwfError, Result};

/// Arbitrary fixed 5-byte marker occupying the trailing "signature" field of
/// the common volume payload prefix (§6); this engine does not attempt to
/// reproduce any particular writer's exact bytes here, per the §9 Open
/// Question on variant-specific volume layouts.
const VOLUME_TRAILING_SIGNATURE: [u8; 5] = [0xff, 0x01, 0x01, 0x00, 0x00];

/// Total size of the common `volume`/`disk` payload (§6): the fixed prefix
/// plus reserved padding out to the trailing signature + Adler-32. Variant
/// layouts beyond this common prefix are not modeled — per the §9 Open
/// Question, those bytes must come from authoritative fixtures rather than
/// guessed conditional paths, so this engine only ever reads/writes the
/// fields it can state with confidence.
pub const VOLUME_PAYLOAD_SIZE: usize = 1052;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Memory,
    SingleFiles,
}

impl MediaType {
    fn to_byte(self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x03,
            MediaType::Memory => 0x10,
            MediaType::SingleFiles => 0x0e,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        Ok(match b {
            0x00 => MediaType::Removable,
            0x01 => MediaType::Fixed,
            0x03 => MediaType::Optical,
            0x10 => MediaType::Memory,
            0x0e => MediaType::SingleFiles,
            other => {
                return Err(EwfError::corruption(format!(
                    "unrecognised media_type byte 0x{other:02x}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeType {
    Logical,
    Physical,
}

/// Geometry and layout fields persisted in a `volume`/`disk` section,
/// per §3 "Media descriptor" and the wire layout in §6.
#[derive(Debug, Clone)]
pub struct MediaDescriptor {
    pub media_type: MediaType,
    pub volume_type: VolumeType,
    pub media_flags: u8,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub chunk_count: u32,
    pub sectors_per_chunk: u32,
    pub chunks_per_section: u32,
    pub error_granularity: u32,
    pub compression_level: u8,
    pub guid: Option<[u8; 16]>,
}

impl Default for MediaDescriptor {
    fn default() -> Self {
        MediaDescriptor {
            media_type: MediaType::Fixed,
            volume_type: VolumeType::Physical,
            media_flags: 0x01, // bit 0: "volume is physical", matches media_type Fixed default
            bytes_per_sector: 512,
            sector_count: 0,
            chunk_count: 0,
            sectors_per_chunk: 64,
            chunks_per_section: crate::format::DEFAULT_CHUNKS_PER_SECTION,
            error_granularity: 64,
            compression_level: 0,
            guid: None,
        }
    }
}

impl MediaDescriptor {
    /// Span, in bytes, of one chunk: `sectors_per_chunk * bytes_per_sector`.
    pub fn chunk_span(&self) -> usize {
        self.sectors_per_chunk as usize * self.bytes_per_sector as usize
    }

    /// Largest valid logical offset into the media.
    pub fn media_size(&self) -> u64 {
        self.sector_count * self.bytes_per_sector as u64
    }

    pub fn encode(&self) -> [u8; VOLUME_PAYLOAD_SIZE] {
        let mut out = [0u8; VOLUME_PAYLOAD_SIZE];
        out[0] = self.media_type.to_byte();
        (&mut out[4..8]).write_u32::<LittleEndian>(self.chunk_count).unwrap();
        (&mut out[8..12]).write_u32::<LittleEndian>(self.sectors_per_chunk).unwrap();
        (&mut out[12..16]).write_u32::<LittleEndian>(self.bytes_per_sector).unwrap();
        (&mut out[16..24]).write_u64::<LittleEndian>(self.sector_count).unwrap();
        // bytes 24..36 = CHS geometry; left zeroed, no authoritative source.
        out[36] = self.media_flags;
        // bytes 37..40 reserved, 40..44 palm_volume_start_sector, 44..48 reserved
        // 48..52 smart_logs_start_sector
        out[52] = self.compression_level;
        (&mut out[56..60])
            .write_u32::<LittleEndian>(self.error_granularity)
            .unwrap();
        if let Some(guid) = self.guid {
            out[64..80].copy_from_slice(&guid);
        }
        // bytes 80..1043 reserved, left zeroed.
        let sig_start = VOLUME_PAYLOAD_SIZE - 9; // 1043: 5-byte trailing signature field
        out[sig_start..sig_start + 5].copy_from_slice(&VOLUME_TRAILING_SIGNATURE);
        let adler = checksum::adler32(checksum::INITIAL, &out[..VOLUME_PAYLOAD_SIZE - 4]);
        let tail = VOLUME_PAYLOAD_SIZE - 4;
        (&mut out[tail..]).write_u32::<LittleEndian>(adler).unwrap();
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < VOLUME_PAYLOAD_SIZE {
            return Err(EwfError::corruption(format!(
                "volume section payload too short: {} < {}",
                bytes.len(),
                VOLUME_PAYLOAD_SIZE
            )));
        }

        let stored_adler = (&bytes[VOLUME_PAYLOAD_SIZE - 4..VOLUME_PAYLOAD_SIZE])
            .read_u32::<LittleEndian>()?;
        let computed_adler = checksum::adler32(checksum::INITIAL, &bytes[..VOLUME_PAYLOAD_SIZE - 4]);
        if stored_adler != computed_adler {
            return Err(EwfError::corruption(
                "volume section trailing checksum mismatch",
            ));
        }

        let media_type = MediaType::from_byte(bytes[0])?;
        let chunk_count = (&bytes[4..8]).read_u32::<LittleEndian>()?;
        let sectors_per_chunk = (&bytes[8..12]).read_u32::<LittleEndian>()?;
        let bytes_per_sector = (&bytes[12..16]).read_u32::<LittleEndian>()?;
        let sector_count = (&bytes[16..24]).read_u64::<LittleEndian>()?;
        let media_flags = bytes[36];
        let compression_level = bytes[52];
        let error_granularity = (&bytes[56..60]).read_u32::<LittleEndian>()?;
        let mut guid_bytes = [0u8; 16];
        guid_bytes.copy_from_slice(&bytes[64..80]);
        let guid = if guid_bytes != [0u8; 16] {
            Some(guid_bytes)
        } else {
            None
        };
        let volume_type = if media_flags & 0x01 != 0 {
            VolumeType::Physical
        } else {
            VolumeType::Logical
        };

        Ok(MediaDescriptor {
            media_type,
            volume_type,
            media_flags,
            bytes_per_sector,
            sector_count,
            chunk_count,
            sectors_per_chunk,
            chunks_per_section: crate::format::DEFAULT_CHUNKS_PER_SECTION,
            error_granularity,
            compression_level,
            guid,
        })
    }
}

/// A recorded read failure during acquisition: `error2` section entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEntry {
    pub start_sector: u64,
    pub sector_count: u64,
}

/// MD5 (always present) plus an optional SHA-1, as persisted in the `hash`
/// and `digest` sections.
#[derive(Debug, Clone, Default)]
pub struct Hashes {
    pub md5: [u8; 16],
    pub sha1: Option<[u8; 20]>,
}

/// `hash` section payload: the trailing MD5 digest, per §4.6 finalization.
/// Exact byte layout beyond this engine's own round-trip is not pinned down
/// by an authoritative fixture (§9 Open Question, same caveat as the volume
/// payload): `md5(16) + adler32(4)`.
pub const HASH_PAYLOAD_SIZE: usize = 20;

pub fn encode_hash_section(md5: &[u8; 16]) -> [u8; HASH_PAYLOAD_SIZE] {
    let mut out = [0u8; HASH_PAYLOAD_SIZE];
    out[..16].copy_from_slice(md5);
    let adler = checksum::adler32(checksum::INITIAL, &out[..16]);
    out[16..].copy_from_slice(&adler.to_le_bytes());
    out
}

pub fn decode_hash_section(bytes: &[u8]) -> Result<[u8; 16]> {
    if bytes.len() < HASH_PAYLOAD_SIZE {
        return Err(EwfError::corruption("hash section payload too short"));
    }
    let stored_adler = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    let computed_adler = checksum::adler32(checksum::INITIAL, &bytes[..16]);
    if stored_adler != computed_adler {
        return Err(EwfError::corruption("hash section checksum mismatch"));
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&bytes[..16]);
    Ok(md5)
}

/// `digest` section payload (EnCase5+): `md5(16) + sha1(20) + reserved(40) +
/// adler32(4)`, matching libewf's digest section size of 80 bytes.
pub const DIGEST_PAYLOAD_SIZE: usize = 80;

pub fn encode_digest_section(md5: &[u8; 16], sha1: &[u8; 20]) -> [u8; DIGEST_PAYLOAD_SIZE] {
    let mut out = [0u8; DIGEST_PAYLOAD_SIZE];
    out[..16].copy_from_slice(md5);
    out[16..36].copy_from_slice(sha1);
    let adler = checksum::adler32(checksum::INITIAL, &out[..76]);
    out[76..].copy_from_slice(&adler.to_le_bytes());
    out
}

pub fn decode_digest_section(bytes: &[u8]) -> Result<([u8; 16], [u8; 20])> {
    if bytes.len() < DIGEST_PAYLOAD_SIZE {
        return Err(EwfError::corruption("digest section payload too short"));
    }
    let stored_adler = u32::from_le_bytes(bytes[76..80].try_into().unwrap());
    let computed_adler = checksum::adler32(checksum::INITIAL, &bytes[..76]);
    if stored_adler != computed_adler {
        return Err(EwfError::corruption("digest section checksum mismatch"));
    }
    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&bytes[..16]);
    let mut sha1 = [0u8; 20];
    sha1.copy_from_slice(&bytes[16..36]);
    Ok((md5, sha1))
}

/// `error2` section payload: `count(4) + reserved(4) +
/// count*(start_sector(4) + sector_count(4)) + adler32(4)`.
pub fn encode_error2_section(entries: &[ErrorEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 8 + 4);
    out.write_u32::<LittleEndian>(entries.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    for entry in entries {
        out.write_u32::<LittleEndian>(entry.start_sector as u32).unwrap();
        out.write_u32::<LittleEndian>(entry.sector_count as u32).unwrap();
    }
    let adler = checksum::adler32(checksum::INITIAL, &out);
    out.write_u32::<LittleEndian>(adler).unwrap();
    out
}

pub fn decode_error2_section(bytes: &[u8]) -> Result<Vec<ErrorEntry>> {
    if bytes.len() < 8 {
        return Err(EwfError::corruption("error2 section payload too short"));
    }
    let count = (&bytes[0..4]).read_u32::<LittleEndian>()? as usize;
    let entries_end = 8 + count * 8;
    if bytes.len() < entries_end + 4 {
        return Err(EwfError::corruption("error2 section truncated before its entries"));
    }
    let stored_adler = (&bytes[entries_end..entries_end + 4]).read_u32::<LittleEndian>()?;
    let computed_adler = checksum::adler32(checksum::INITIAL, &bytes[..entries_end]);
    if stored_adler != computed_adler {
        return Err(EwfError::corruption("error2 section checksum mismatch"));
    }
    let mut entries = Vec::with_capacity(count);
    for chunk in bytes[8..entries_end].chunks_exact(8) {
        let start_sector = (&chunk[0..4]).read_u32::<LittleEndian>()? as u64;
        let sector_count = (&chunk[4..8]).read_u32::<LittleEndian>()? as u64;
        entries.push(ErrorEntry { start_sector, sector_count });
    }
    Ok(entries)
}

/// One optical-disc session range: `session` section entry (§4.8
/// `supports_session`, encase6/linen6/ewfx only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    pub start_sector: u64,
    pub end_sector: u64,
}

/// `session` section payload, same shape as `error2`: `count(4) +
/// reserved(4) + count*(start_sector(4) + end_sector(4)) + adler32(4)`.
pub fn encode_session_section(entries: &[SessionEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + entries.len() * 8 + 4);
    out.write_u32::<LittleEndian>(entries.len() as u32).unwrap();
    out.write_u32::<LittleEndian>(0).unwrap();
    for entry in entries {
        out.write_u32::<LittleEndian>(entry.start_sector as u32).unwrap();
        out.write_u32::<LittleEndian>(entry.end_sector as u32).unwrap();
    }
    let adler = checksum::adler32(checksum::INITIAL, &out);
    out.write_u32::<LittleEndian>(adler).unwrap();
    out
}

pub fn decode_session_section(bytes: &[u8]) -> Result<Vec<SessionEntry>> {
    if bytes.len() < 8 {
        return Err(EwfError::corruption("session section payload too short"));
    }
    let count = (&bytes[0..4]).read_u32::<LittleEndian>()? as usize;
    let entries_end = 8 + count * 8;
    if bytes.len() < entries_end + 4 {
        return Err(EwfError::corruption("session section truncated before its entries"));
    }
    let stored_adler = (&bytes[entries_end..entries_end + 4]).read_u32::<LittleEndian>()?;
    let computed_adler = checksum::adler32(checksum::INITIAL, &bytes[..entries_end]);
    if stored_adler != computed_adler {
        return Err(EwfError::corruption("session section checksum mismatch"));
    }
    let mut entries = Vec::with_capacity(count);
    for chunk in bytes[8..entries_end].chunks_exact(8) {
        let start_sector = (&chunk[0..4]).read_u32::<LittleEndian>()? as u64;
        let end_sector = (&chunk[4..8]).read_u32::<LittleEndian>()? as u64;
        entries.push(SessionEntry { start_sector, end_sector });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_media_descriptor() {
        let mut descriptor = MediaDescriptor {
            chunk_count: 42,
            sector_count: 2048,
            guid: Some([7u8; 16]),
            ..MediaDescriptor::default()
        };
        descriptor.error_granularity = 128;
        let encoded = descriptor.encode();
        let decoded = MediaDescriptor::decode(&encoded).unwrap();
        assert_eq!(decoded.chunk_count, 42);
        assert_eq!(decoded.sector_count, 2048);
        assert_eq!(decoded.sectors_per_chunk, 64);
        assert_eq!(decoded.bytes_per_sector, 512);
        assert_eq!(decoded.error_granularity, 128);
        assert_eq!(decoded.guid, Some([7u8; 16]));
    }

    #[test]
    fn chunk_span_and_media_size() {
        let descriptor = MediaDescriptor {
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            sector_count: 1000,
            ..MediaDescriptor::default()
        };
        assert_eq!(descriptor.chunk_span(), 64 * 512);
        assert_eq!(descriptor.media_size(), 1000 * 512);
    }

    #[test]
    fn tampered_descriptor_fails_checksum() {
        let descriptor = MediaDescriptor::default();
        let mut encoded = descriptor.encode();
        encoded[4] ^= 0xff;
        assert!(MediaDescriptor::decode(&encoded).is_err());
    }

    #[test]
    fn round_trip_hash_section() {
        let md5 = [9u8; 16];
        let encoded = encode_hash_section(&md5);
        assert_eq!(decode_hash_section(&encoded).unwrap(), md5);
    }

    #[test]
    fn round_trip_digest_section() {
        let md5 = [1u8; 16];
        let sha1 = [2u8; 20];
        let encoded = encode_digest_section(&md5, &sha1);
        let (decoded_md5, decoded_sha1) = decode_digest_section(&encoded).unwrap();
        assert_eq!(decoded_md5, md5);
        assert_eq!(decoded_sha1, sha1);
    }

    #[test]
    fn round_trip_error2_section() {
        let entries = vec![
            ErrorEntry { start_sector: 8, sector_count: 1 },
            ErrorEntry { start_sector: 64, sector_count: 4 },
        ];
        let encoded = encode_error2_section(&entries);
        let decoded = decode_error2_section(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn corrupted_error2_section_is_rejected() {
        let entries = vec![ErrorEntry { start_sector: 8, sector_count: 1 }];
        let mut encoded = encode_error2_section(&entries);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(decode_error2_section(&encoded).is_err());
    }

    #[test]
    fn round_trip_session_section() {
        let entries = vec![
            SessionEntry { start_sector: 0, end_sector: 1000 },
            SessionEntry { start_sector: 1000, end_sector: 2500 },
        ];
        let encoded = encode_session_section(&entries);
        let decoded = decode_session_section(&encoded).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn corrupted_session_section_is_rejected() {
        let entries = vec![SessionEntry { start_sector: 0, end_sector: 1000 }];
        let mut encoded = encode_session_section(&entries);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(decode_session_section(&encoded).is_err());
    }
}
