//! Error taxonomy for the EWF engine.
//!
//! One variant per error *kind* named in the format specification: callers
//! match on kind rather than parsing message text.

use std::fmt;
use std::io;

use thiserror::Error;

/// The result type used throughout this crate.
pub type Result<T> = std::result::Result<T, EwfError>;

/// A single recorded read failure during acquisition, or a located
/// corruption during parsing. Carried by [`EwfError`] variants that need to
/// point at a specific place in the image rather than just a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Locus {
    pub segment: Option<u16>,
    pub offset: Option<u64>,
    pub section: Option<SectionTag>,
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(s) = self.segment {
            write!(f, "segment {s}")?;
            wrote = true;
        }
        if let Some(o) = self.offset {
            write!(f, "{}offset 0x{:x}", if wrote { ", " } else { "" }, o)?;
            wrote = true;
        }
        if let Some(t) = self.section {
            write!(f, "{}section '{}'", if wrote { ", " } else { "" }, t)?;
        }
        Ok(())
    }
}

/// A 16-byte ASCII section type tag, NUL-padded. Kept here (rather than in
/// `section.rs`) so that error reporting does not depend on the section
/// codec module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionTag(pub [u8; 16]);

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(16);
        write!(f, "{}", String::from_utf8_lossy(&self.0[..end]))
    }
}

impl SectionTag {
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; 16];
        let n = name.len().min(16);
        bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
        SectionTag(bytes)
    }

    pub fn as_str_lossy(&self) -> String {
        self.to_string()
    }
}

/// Every way the engine can fail, grouped per §7 of the specification.
#[derive(Error, Debug)]
pub enum EwfError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("illegal state transition: {0}")]
    State(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corruption detected ({locus}): {detail}")]
    Corruption { locus: Locus, detail: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("integrity check failed at chunk {chunk} ({locus})")]
    Integrity { chunk: u64, locus: Locus },

    #[error("operation cancelled")]
    Cancelled,

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("acquisition completed with {error_count} recorded read error(s)")]
    Partial { error_count: usize },
}

impl EwfError {
    pub fn corruption(detail: impl Into<String>) -> Self {
        EwfError::Corruption {
            locus: Locus::default(),
            detail: detail.into(),
        }
    }

    pub fn corruption_at(locus: Locus, detail: impl Into<String>) -> Self {
        EwfError::Corruption {
            locus,
            detail: detail.into(),
        }
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        EwfError::InvalidArgument(detail.into())
    }

    pub fn invalid_segment_index(index: u32) -> Self {
        EwfError::InvalidArgument(format!("segment index {index} is out of range"))
    }

    pub fn state(detail: impl Into<String>) -> Self {
        EwfError::State(detail.into())
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        EwfError::Unsupported(detail.into())
    }

    pub fn resource(detail: impl Into<String>) -> Self {
        EwfError::Resource(detail.into())
    }
}
