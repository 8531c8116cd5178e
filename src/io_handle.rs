//! IO handle (C5, §4.5 "Seek semantics"): translates a logical media offset
//! into a chunk number and within-chunk offset. Mirrors the
//! `current_offset`/`current_chunk`/`current_chunk_offset` triple of
//! `examples/original_source/libewf/libewf_io_handle.h`.

use crate::error::{EwfError, Result};

/// Tracks where a reader or writer currently sits in the logical media
/// stream. Seeking is O(1): arithmetic on `chunk_span`, no I/O.
#[derive(Debug, Clone, Copy)]
pub struct IoHandle {
    chunk_span: u64,
    media_size: u64,
    current_offset: u64,
}

impl IoHandle {
    pub fn new(chunk_span: u64, media_size: u64) -> Self {
        IoHandle {
            chunk_span: chunk_span.max(1),
            media_size,
            current_offset: 0,
        }
    }

    pub fn media_size(&self) -> u64 {
        self.media_size
    }

    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// Current chunk number and intra-chunk offset for `self.position()`.
    pub fn current_chunk(&self) -> (u64, u64) {
        (self.current_offset / self.chunk_span, self.current_offset % self.chunk_span)
    }

    /// Seeks to an absolute logical offset. Seeking past `media_size` is
    /// allowed (matches standard file semantics); reads from there return
    /// zero bytes at the caller's discretion.
    pub fn seek_to(&mut self, offset: u64) -> Result<u64> {
        self.current_offset = offset;
        Ok(offset)
    }

    pub fn seek_relative(&mut self, delta: i64) -> Result<u64> {
        let next = self.current_offset as i64 + delta;
        if next < 0 {
            return Err(EwfError::invalid_argument("seek before start of image"));
        }
        self.current_offset = next as u64;
        Ok(self.current_offset)
    }

    pub fn seek_from_end(&mut self, delta: i64) -> Result<u64> {
        let next = self.media_size as i64 + delta;
        if next < 0 {
            return Err(EwfError::invalid_argument("seek before start of image"));
        }
        self.current_offset = next as u64;
        Ok(self.current_offset)
    }

    pub fn advance(&mut self, n: u64) {
        self.current_offset += n;
    }

    pub fn chunk_span(&self) -> u64 {
        self.chunk_span
    }
}
