//! Section codec (C2): the fixed-layout record header that precedes every
//! section (`header`, `volume`, `table`, `sectors`, `done`, …), per §4.2 and
//! the wire layout in §6.
//!
//! `SECTION_HEADER_SIZE` (76 bytes) = 16 (type) + 8 (next_offset) +
//! 8 (size) + 40 (padding) + 4 (adler32).

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum;
use crate::error::{EwfError, Locus, Result, SectionTag};

pub const SECTION_HEADER_SIZE: u64 = 76;

/// A parsed section descriptor: where the section lives, how big it is, and
/// where the *next* one starts.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    pub section_type: SectionTag,
    /// Absolute file offset of the next section's descriptor. Equal to
    /// `this_offset` for the chain-terminating `done`/`next` sections.
    pub next_offset: u64,
    /// Total size of this section, descriptor included.
    pub size: u64,
}

impl SectionHeader {
    pub fn type_str(&self) -> String {
        self.section_type.as_str_lossy()
    }

    /// Size of the payload that follows the 76-byte descriptor.
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(SECTION_HEADER_SIZE)
    }
}

/// Reads and validates a section descriptor located at `offset` in an
/// already positioned reader. The caller is responsible for seeking `reader`
/// to `offset` first (segment files are held as plain `File`s elsewhere in
/// the engine and positioned with `seek_read_at`-style helpers).
pub fn read_section_header<R: Read>(reader: &mut R, at_offset: u64) -> Result<SectionHeader> {
    let mut header_bytes = [0u8; SECTION_HEADER_SIZE as usize];
    reader.read_exact(&mut header_bytes)?;

    let mut type_bytes = [0u8; 16];
    type_bytes.copy_from_slice(&header_bytes[0..16]);

    let mut cursor = &header_bytes[16..];
    let next_offset = cursor.read_u64::<LittleEndian>()?;
    let size = cursor.read_u64::<LittleEndian>()?;
    // cursor is now at the 40 reserved bytes; skip to the trailing adler32.
    let stored_adler = (&header_bytes[72..76]).read_u32::<LittleEndian>()?;

    let computed_adler = checksum::adler32(checksum::INITIAL, &header_bytes[0..72]);
    if computed_adler != stored_adler {
        return Err(EwfError::corruption_at(
            Locus {
                segment: None,
                offset: Some(at_offset),
                section: Some(SectionTag(type_bytes)),
            },
            format!(
                "section header checksum mismatch: stored 0x{stored_adler:08x}, computed 0x{computed_adler:08x}"
            ),
        ));
    }

    Ok(SectionHeader {
        section_type: SectionTag(type_bytes),
        next_offset,
        size,
    })
}

/// Writes a section descriptor followed by `payload` and returns the total
/// number of bytes written (descriptor + payload).
///
/// `next_offset` must be the absolute file offset where the *following*
/// section's descriptor will start; for the chain-terminating `done`/`next`
/// sections it equals this section's own offset.
pub fn write_section<W: Write>(
    writer: &mut W,
    section_type: &str,
    _this_offset: u64,
    next_offset: u64,
    payload: &[u8],
) -> Result<u64> {
    let tag = SectionTag::new(section_type);
    let size = SECTION_HEADER_SIZE + payload.len() as u64;

    let mut header_bytes = [0u8; SECTION_HEADER_SIZE as usize];
    header_bytes[0..16].copy_from_slice(&tag.0);
    (&mut header_bytes[16..24]).write_u64::<LittleEndian>(next_offset)?;
    (&mut header_bytes[24..32]).write_u64::<LittleEndian>(size)?;
    // bytes 32..72 stay zero (40 bytes reserved).
    let adler = checksum::adler32(checksum::INITIAL, &header_bytes[0..72]);
    (&mut header_bytes[72..76]).write_u32::<LittleEndian>(adler)?;

    writer.write_all(&header_bytes)?;
    writer.write_all(payload)?;

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_header() {
        let payload = b"hello section";
        let mut buf = Vec::new();
        let written = write_section(&mut buf, "data", 0, 76 + payload.len() as u64, payload).unwrap();
        assert_eq!(written as usize, buf.len());

        let mut cursor = Cursor::new(&buf);
        let header = read_section_header(&mut cursor, 0).unwrap();
        assert_eq!(header.type_str(), "data");
        assert_eq!(header.payload_size(), payload.len() as u64);
        assert_eq!(header.next_offset, 76 + payload.len() as u64);
    }

    #[test]
    fn corrupted_header_checksum_is_rejected() {
        let mut buf = Vec::new();
        write_section(&mut buf, "done", 0, 0, &[]).unwrap();
        buf[5] ^= 0xff; // flip a byte inside the type tag, header checksum no longer matches
        let mut cursor = Cursor::new(&buf);
        let err = read_section_header(&mut cursor, 0).unwrap_err();
        assert!(matches!(err, EwfError::Corruption { .. }));
    }

    #[test]
    fn unknown_section_type_round_trips_via_next_offset() {
        // a reader that does not recognise "oddsec" can still skip past it
        // using next_offset alone, without interpreting section_size.
        let mut buf = Vec::new();
        write_section(&mut buf, "oddsec", 0, 200, b"payload").unwrap();
        let mut cursor = Cursor::new(&buf);
        let header = read_section_header(&mut cursor, 0).unwrap();
        assert_eq!(header.next_offset, 200);
    }
}
