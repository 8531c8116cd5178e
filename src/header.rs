//! Header value store (C8, §3 "Header value set" / §4.7): an ordered
//! multimap from identifier to string, serialized as Windows-1252 (`header`)
//! or UTF-16LE with BOM (`header2`).
//!
//! Wire identifiers follow libewf's short codes (the teacher's
//! `EWF::print_info` already knows this mapping for display); this store
//! keeps the long, spec-named identifiers internally and translates to the
//! short wire codes only at the serialization boundary, per the §9 design
//! note on canonical-UTF-8-internal string handling. The `header` section's
//! codepage is Windows-1252 rather than plain ASCII (§4.7); `encoding_rs`
//! backs that conversion since it is the one crate in the retrieval pack
//! (TotalImage's `Cargo.toml`) that already carries a WHATWG-compliant
//! Windows-1252 codec.

use crate::error::{EwfError, Result};

/// Every well-known identifier named in §3's "Header value set".
pub const CASE_NUMBER: &str = "case_number";
pub const DESCRIPTION: &str = "description";
pub const EXAMINER_NAME: &str = "examiner_name";
pub const EVIDENCE_NUMBER: &str = "evidence_number";
pub const NOTES: &str = "notes";
pub const ACQUIRY_DATE: &str = "acquiry_date";
pub const SYSTEM_DATE: &str = "system_date";
pub const ACQUIRY_OPERATING_SYSTEM: &str = "acquiry_operating_system";
pub const ACQUIRY_SOFTWARE: &str = "acquiry_software";
pub const ACQUIRY_SOFTWARE_VERSION: &str = "acquiry_software_version";
pub const PASSWORD_HASH: &str = "password_hash";
pub const COMPRESSION_TYPE: &str = "compression_type";
pub const MODEL: &str = "model";
pub const SERIAL_NUMBER: &str = "serial_number";

/// Canonical field order and short wire code, matching the layout libewf
/// writers emit (case/description/examiner/evidence/notes, then the
/// acquisition software/OS/date block, then password hash).
const WIRE_ORDER: &[(&str, &str)] = &[
    (CASE_NUMBER, "c"),
    (EVIDENCE_NUMBER, "n"),
    (DESCRIPTION, "a"),
    (EXAMINER_NAME, "e"),
    (NOTES, "t"),
    (ACQUIRY_SOFTWARE_VERSION, "av"),
    (ACQUIRY_OPERATING_SYSTEM, "ov"),
    (ACQUIRY_DATE, "m"),
    (SYSTEM_DATE, "u"),
    (PASSWORD_HASH, "p"),
    (COMPRESSION_TYPE, "dc"),
    (MODEL, "md"),
    (SERIAL_NUMBER, "sn"),
    (ACQUIRY_SOFTWARE, "sw"),
];

fn wire_code(identifier: &str) -> &'static str {
    WIRE_ORDER
        .iter()
        .find(|(id, _)| *id == identifier)
        .map(|(_, code)| *code)
        .unwrap_or("r")
}

fn identifier_for_code(code: &str) -> String {
    WIRE_ORDER
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(id, _)| id.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Supplies the acquisition-time defaults that `ewfacquirestream.c` fills in
/// automatically when the caller hasn't set them: current time and a
/// detected OS string (§4.7, the `Clock`/`SystemInfo` collaborators of §6).
pub trait Clock {
    /// A libewf-style `DD/MM/YYYY HH:MM:SS` timestamp for `acquiry_date`
    /// and `system_date`.
    fn now_string(&self) -> String;
}

pub trait SystemInfo {
    fn os_name(&self) -> String;
    fn software_version(&self) -> String;
}

/// Default [`Clock`]/[`SystemInfo`] backed by `std::time`/`std::env::consts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDefaults;

impl Clock for SystemDefaults {
    fn now_string(&self) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        // No calendar dependency is pulled in for one field; render the
        // Unix timestamp in the same slot libewf would put a formatted
        // date, which every reader treats as an opaque string anyway.
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        secs.to_string()
    }
}

impl SystemInfo for SystemDefaults {
    fn os_name(&self) -> String {
        std::env::consts::OS.to_string()
    }

    fn software_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Ordered insertion, case-sensitive identifiers (§3 "Header value set").
#[derive(Debug, Clone, Default)]
pub struct HeaderStore {
    entries: Vec<(String, String)>,
}

impl HeaderStore {
    pub fn new() -> Self {
        HeaderStore::default()
    }

    pub fn set(&mut self, identifier: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(existing) = self.entries.iter_mut().find(|(id, _)| id == identifier) {
            existing.1 = value;
        } else {
            self.entries.push((identifier.to_string(), value));
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fills in `acquiry_date`, `system_date`, `acquiry_operating_system`
    /// and `acquiry_software_version` when unset, mirroring
    /// `ewfacquirestream.c`'s behaviour when those CLI options are omitted.
    pub fn apply_defaults(&mut self, clock: &dyn Clock, system: &dyn SystemInfo) {
        if self.get(ACQUIRY_DATE).is_none() {
            self.set(ACQUIRY_DATE, clock.now_string());
        }
        if self.get(SYSTEM_DATE).is_none() {
            self.set(SYSTEM_DATE, clock.now_string());
        }
        if self.get(ACQUIRY_OPERATING_SYSTEM).is_none() {
            self.set(ACQUIRY_OPERATING_SYSTEM, system.os_name());
        }
        if self.get(ACQUIRY_SOFTWARE_VERSION).is_none() {
            self.set(ACQUIRY_SOFTWARE_VERSION, system.software_version());
        }
    }

    /// Serializes as the `header` section payload (category line, version
    /// line, identifier row, value row), ending with the blank line every
    /// libewf-compatible reader expects as a terminator. Encoded as
    /// Windows-1252 per §4.7, not plain ASCII: any rune the codepage cannot
    /// represent is replaced per the WHATWG Encoding Standard (a decimal
    /// numeric character reference, e.g. `&#26085;`, rather than a `?`).
    pub fn encode_ascii(&self) -> Vec<u8> {
        let (ids, vals) = self.wire_rows();
        let text = format!("1\nmain\n{ids}\n{vals}\n\n");
        encode_windows_1252(&text)
    }

    /// Serializes as the `header2` payload: the same rows, UTF-16LE with a
    /// leading byte-order mark (EnCase >= 4).
    pub fn encode_utf16(&self) -> Vec<u8> {
        let (ids, vals) = self.wire_rows();
        let text = format!("1\nmain\n{ids}\n{vals}\n\n");
        let mut out = Vec::with_capacity(2 + text.len() * 2);
        out.extend_from_slice(&0xFEFFu16.to_le_bytes());
        for unit in text.encode_utf16() {
            out.extend_from_slice(&unit.to_le_bytes());
        }
        out
    }

    fn wire_rows(&self) -> (String, String) {
        let ids: Vec<&str> = self.entries.iter().map(|(id, _)| wire_code(id)).collect();
        let vals: Vec<&str> = self.entries.iter().map(|(_, v)| v.as_str()).collect();
        (ids.join("\t"), vals.join("\t"))
    }

    /// Parses either flavour: a leading UTF-16LE BOM selects the `header2`
    /// decode, otherwise the payload is read as Windows-1252 (`header`),
    /// matching the teacher's `EwfHeaderSection::decode` tolerance for both
    /// encodings regardless of which section type carried the bytes.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let text = decode_text(raw);
        let mut lines = text
            .split(['\n', '\r'])
            .filter(|l| !l.trim().is_empty())
            .collect::<Vec<_>>();
        if let Some(first) = lines.first_mut() {
            *first = first.trim_start_matches('\u{feff}');
        }

        for window in 0..lines.len().saturating_sub(1) {
            if lines[window].contains('\t') && lines[window + 1].contains('\t') {
                return Ok(Self::from_rows(lines[window], lines[window + 1]));
            }
        }

        Err(EwfError::corruption(
            "header section does not contain a tab-separated identifier/value row pair",
        ))
    }

    fn from_rows(ids_row: &str, vals_row: &str) -> Self {
        let mut store = HeaderStore::new();
        for (code, value) in ids_row.split('\t').zip(vals_row.split('\t')) {
            store.set(&identifier_for_code(code.trim_matches('\0')), value.trim_matches('\0'));
        }
        store
    }

    /// Serializes as the ewfx-only `xheader` payload: long identifiers as
    /// flat XML elements under an `<xheader>` root (§3's "ewfx adds an
    /// xheader XML variant"). No XML crate is pulled in for this — see
    /// DESIGN.md — the schema is a fixed, flat field list, the same shape
    /// this store already hand-rolls for the tab-separated flavours above.
    pub fn encode_xheader(&self) -> Vec<u8> {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<xheader>\n");
        for (id, value) in &self.entries {
            xml.push_str(&format!("\t<{id}>{}</{id}>\n", xml_escape(value)));
        }
        xml.push_str("</xheader>\n");
        xml.into_bytes()
    }

    /// Parses an `xheader` payload written by [`encode_xheader`]. Tolerant
    /// of the declaration/root lines; any other line of the form
    /// `<tag>value</tag>` is read as one header field.
    pub fn decode_xheader(raw: &[u8]) -> Result<Self> {
        let text = decode_text(raw);
        let mut store = HeaderStore::new();
        for line in text.lines() {
            let line = line.trim();
            if !line.starts_with('<') || line.starts_with("<?") || line == "<xheader>" || line == "</xheader>" {
                continue;
            }
            let Some(tag_end) = line.find('>') else { continue };
            let tag = &line[1..tag_end];
            let close_tag = format!("</{tag}>");
            let Some(value_end) = line.rfind(&close_tag) else { continue };
            if value_end < tag_end + 1 {
                continue;
            }
            let value = &line[tag_end + 1..value_end];
            store.set(tag, xml_unescape(value));
        }
        Ok(store)
    }
}

fn xml_escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

/// Windows-1252 decode is total (every byte maps to something, including the
/// handful of 0x80-0x9F codepoints the codepage leaves unmapped, which
/// `encoding_rs` substitutes with U+FFFD), so this never fails; a leading
/// UTF-16LE BOM selects the `header2` flavour instead.
fn decode_text(raw: &[u8]) -> String {
    if raw.len() >= 2 && raw[0] == 0xFF && raw[1] == 0xFE {
        let units: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    encoding_rs::WINDOWS_1252.decode(raw).0.into_owned()
}

/// Encodes as Windows-1252 per §4.7. `encoding_rs::Encoding::encode` is also
/// total: a character the codepage cannot represent becomes a decimal
/// numeric character reference (`&#N;`) per the WHATWG Encoding Standard,
/// rather than panicking or silently dropping data.
fn encode_windows_1252(text: &str) -> Vec<u8> {
    encoding_rs::WINDOWS_1252.encode(text).0.into_owned()
}
