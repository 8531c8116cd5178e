//! A segmented, chunked, integrity-checked EWF/E01 forensic disk image
//! engine: the container layout, the chunked read/write path, the
//! chunk/offset table, the streaming acquisition state machine, and the
//! per-variant format policy table.
//!
//! Module layout follows one file per component of the design (C1-C9):
//! [`checksum`]/[`compression`] (C1), [`section`] (C2), [`segment`] (C3),
//! [`table`] (C4), [`io_handle`] (C5), [`reader`] (C6), [`writer`] (C7),
//! [`header`] (C8), [`format`] (C9), plus [`media`] for the non-chunk parts
//! of the data model and [`error`] for the crate-wide error taxonomy.

pub mod checksum;
pub mod compression;
pub mod error;
pub mod format;
pub mod header;
pub mod io_handle;
pub mod logging;
pub mod media;
pub mod reader;
pub mod section;
pub mod segment;
pub mod table;
pub mod writer;

pub use error::{EwfError, Result};
pub use format::Variant;
pub use reader::EwfReader;
pub use writer::{CancellationToken, CloseStatus, EwfWriter, State, WriterConfig};
