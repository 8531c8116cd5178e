//! Chunk/offset table (C4): the in-memory index mapping chunk number to
//! storage location, and its `table`/`table2` persistence, per §4.4.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::checksum;
use crate::error::{EwfError, Result};

const COMPRESSED_FLAG: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7fff_ffff;

/// One `table`/`table2` entry: a 31-bit offset relative to the section's
/// `base_offset`, plus the compressed flag in the high bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    pub relative_offset: u32,
    pub compressed: bool,
}

impl TableEntry {
    fn encode(self) -> u32 {
        let flag = if self.compressed { COMPRESSED_FLAG } else { 0 };
        (self.relative_offset & OFFSET_MASK) | flag
    }

    fn decode(raw: u32) -> Self {
        TableEntry {
            relative_offset: raw & OFFSET_MASK,
            compressed: raw & COMPRESSED_FLAG != 0,
        }
    }
}

/// A parsed `table`/`table2` section payload, per the wire layout in §6:
/// entry_count(4), padding(4), base_offset(8), padding(4),
/// adler32_of_header(4), then `entry_count` × 4-byte entries,
/// adler32_of_entries(4).
#[derive(Debug, Clone)]
pub struct TableSection {
    pub base_offset: u64,
    pub entries: Vec<TableEntry>,
}

const TABLE_HEADER_SIZE: usize = 24;

impl TableSection {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TABLE_HEADER_SIZE + self.entries.len() * 4 + 4);
        out.write_u32::<LittleEndian>(self.entries.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // padding
        out.write_u64::<LittleEndian>(self.base_offset).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // padding
        let header_adler = checksum::adler32(checksum::INITIAL, &out[..20]);
        out.write_u32::<LittleEndian>(header_adler).unwrap();

        let entries_start = out.len();
        for entry in &self.entries {
            out.write_u32::<LittleEndian>(entry.encode()).unwrap();
        }
        let entries_adler = checksum::adler32(checksum::INITIAL, &out[entries_start..]);
        out.write_u32::<LittleEndian>(entries_adler).unwrap();
        out
    }

    /// Decodes a table section payload, validating both embedded Adler-32
    /// checksums. On header or entries checksum mismatch, returns
    /// `corruption` — the caller (`table.rs`'s recovery path in the reader)
    /// decides whether to retry against `table2` or rebuild by scanning.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TABLE_HEADER_SIZE {
            return Err(EwfError::corruption("table section shorter than its header"));
        }
        let entry_count = (&bytes[0..4]).read_u32::<LittleEndian>()? as usize;
        let base_offset = (&bytes[8..16]).read_u64::<LittleEndian>()?;
        let stored_header_adler = (&bytes[20..24]).read_u32::<LittleEndian>()?;
        let computed_header_adler = checksum::adler32(checksum::INITIAL, &bytes[0..20]);
        if stored_header_adler != computed_header_adler {
            return Err(EwfError::corruption("table header checksum mismatch"));
        }

        let entries_bytes_len = entry_count * 4;
        let entries_end = TABLE_HEADER_SIZE + entries_bytes_len;
        if bytes.len() < entries_end + 4 {
            return Err(EwfError::corruption("table section truncated before entries"));
        }

        let entries_bytes = &bytes[TABLE_HEADER_SIZE..entries_end];
        let stored_entries_adler = (&bytes[entries_end..entries_end + 4]).read_u32::<LittleEndian>()?;
        let computed_entries_adler = checksum::adler32(checksum::INITIAL, entries_bytes);
        if stored_entries_adler != computed_entries_adler {
            return Err(EwfError::corruption("table entries checksum mismatch"));
        }

        let mut entries = Vec::with_capacity(entry_count);
        for chunk in entries_bytes.chunks_exact(4) {
            let raw = u32::from_le_bytes(chunk.try_into().unwrap());
            entries.push(TableEntry::decode(raw));
        }

        Ok(TableSection { base_offset, entries })
    }
}

/// Where one chunk physically lives, fully resolved (segment + absolute
/// offset + compression flag + stored length).
#[derive(Debug, Clone, Copy)]
pub struct ChunkDescriptor {
    pub segment_id: u16,
    pub file_offset: u64,
    pub compressed: bool,
    pub stored_length: u32,
}

/// The dense, chunk-number-indexed index built while scanning an image, per
/// §4.4. Stored lengths are derived from consecutive offsets within one
/// table; the last entry of each table gets its length from the
/// section-terminating sentinel (the absolute end of the owning `sectors`
/// payload), passed in by the caller at `push_table` time.
#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    chunks: Vec<ChunkDescriptor>,
}

impl ChunkTable {
    pub fn new() -> Self {
        ChunkTable::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, chunk_number: usize) -> Option<&ChunkDescriptor> {
        self.chunks.get(chunk_number)
    }

    /// Appends one segment's `table` section, resolving relative offsets to
    /// absolute file offsets and deriving stored lengths from consecutive
    /// entries. `sentinel_offset` is the absolute end of the `sectors`
    /// payload this table describes, used to derive the last entry's
    /// length.
    ///
    /// Enforces invariants (ii) strictly monotonic offsets and (iii) no
    /// entry's `base + offset + length` exceeds `segment_size`.
    pub fn push_table(
        &mut self,
        segment_id: u16,
        table: &TableSection,
        sentinel_offset: u64,
        segment_size: u64,
        chunks_per_section_cap: u32,
    ) -> Result<()> {
        if table.entries.len() as u32 > chunks_per_section_cap {
            return Err(EwfError::corruption(format!(
                "table has {} entries, exceeding the cap of {chunks_per_section_cap}",
                table.entries.len()
            )));
        }

        let absolute_offsets: Vec<u64> = table
            .entries
            .iter()
            .map(|e| table.base_offset + e.relative_offset as u64)
            .collect();

        for window in absolute_offsets.windows(2) {
            if window[1] <= window[0] {
                return Err(EwfError::corruption(
                    "table offsets are not strictly monotonic",
                ));
            }
        }

        for (i, entry) in table.entries.iter().enumerate() {
            let start = absolute_offsets[i];
            let end = if i + 1 < absolute_offsets.len() {
                absolute_offsets[i + 1]
            } else {
                sentinel_offset
            };
            if end <= start {
                return Err(EwfError::corruption("computed stored length is not positive"));
            }
            let stored_length = end - start;
            if start + stored_length > segment_size {
                return Err(EwfError::corruption(
                    "table entry's (base + offset + length) exceeds the segment size",
                ));
            }
            self.chunks.push(ChunkDescriptor {
                segment_id,
                file_offset: start,
                compressed: entry.compressed,
                stored_length: stored_length as u32,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableSection {
        TableSection {
            base_offset: 1000,
            entries: vec![
                TableEntry { relative_offset: 0, compressed: false },
                TableEntry { relative_offset: 520, compressed: true },
                TableEntry { relative_offset: 900, compressed: false },
            ],
        }
    }

    #[test]
    fn round_trip_table_section() {
        let table = sample_table();
        let encoded = table.encode();
        let decoded = TableSection::decode(&encoded).unwrap();
        assert_eq!(decoded.base_offset, table.base_offset);
        assert_eq!(decoded.entries, table.entries);
    }

    #[test]
    fn table_and_table2_are_byte_identical() {
        let table = sample_table();
        assert_eq!(table.encode(), table.encode());
    }

    #[test]
    fn corrupted_entry_adler_is_rejected() {
        let mut encoded = sample_table().encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(TableSection::decode(&encoded).is_err());
    }

    #[test]
    fn push_table_derives_stored_lengths_and_flags() {
        let table = sample_table();
        let mut chunk_table = ChunkTable::new();
        chunk_table
            .push_table(1, &table, 1000 + 1200, 2_000_000, 16384)
            .unwrap();
        assert_eq!(chunk_table.len(), 3);
        assert_eq!(chunk_table.get(0).unwrap().stored_length, 520);
        assert_eq!(chunk_table.get(1).unwrap().stored_length, 380);
        assert!(chunk_table.get(1).unwrap().compressed);
        assert_eq!(chunk_table.get(2).unwrap().stored_length, 300);
        assert_eq!(chunk_table.get(2).unwrap().file_offset, 1900);
    }

    #[test]
    fn push_table_rejects_non_monotonic_offsets() {
        let table = TableSection {
            base_offset: 0,
            entries: vec![
                TableEntry { relative_offset: 100, compressed: false },
                TableEntry { relative_offset: 50, compressed: false },
            ],
        };
        let mut chunk_table = ChunkTable::new();
        assert!(chunk_table.push_table(1, &table, 200, 10_000, 16384).is_err());
    }

    #[test]
    fn push_table_rejects_entry_overflowing_segment_size() {
        let table = TableSection {
            base_offset: 0,
            entries: vec![TableEntry { relative_offset: 0, compressed: false }],
        };
        let mut chunk_table = ChunkTable::new();
        // sentinel far beyond the declared segment_size of 50 bytes.
        assert!(chunk_table.push_table(1, &table, 1000, 50, 16384).is_err());
    }

    #[test]
    fn push_table_rejects_entry_count_over_cap() {
        let table = TableSection {
            base_offset: 0,
            entries: vec![TableEntry { relative_offset: 0, compressed: false }; 3],
        };
        let mut chunk_table = ChunkTable::new();
        assert!(chunk_table.push_table(1, &table, 300, 10_000, 2).is_err());
    }
}
