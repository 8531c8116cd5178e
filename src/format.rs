//! Format policy table (C9, §4.8): one row per EWF variant, consulted
//! rather than branched-on inline. Adding a new variant is one row plus any
//! codec quirks, per the §9 design note on the flag-matrix source.

use crate::compression::Level;

/// The 8-byte signature written at the start of every segment file.
pub const EVF_SIGNATURE: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];
/// Logical Evidence File signature (L01 / logical variant).
pub const LVF_SIGNATURE: [u8; 8] = [0x4c, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];

/// 1440 KiB, the smallest segment file the format permits (§4.3).
pub const MIN_SEGMENT_SIZE: u64 = 1440 * 1024;
/// 2 GiB − 1, the cap for every pre-EnCase6 32-bit-offset variant.
pub const MAX_SEGMENT_SIZE_32BIT: u64 = 2 * 1024 * 1024 * 1024 - 1;
/// ≈ 7.9 EiB, EnCase6's 64-bit offset extension.
pub const MAX_SEGMENT_SIZE_64BIT: u64 = 0x7fff_ffff_ffff_ffff;

/// Default entries per `table`/`table2` section (§4.4 invariant i).
pub const DEFAULT_CHUNKS_PER_SECTION: u32 = 16384;

/// A declared EWF dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Ftk,
    Encase2,
    Encase3,
    Encase4,
    Encase5,
    Encase6,
    Linen5,
    Linen6,
    Ewfx,
    Smart,
}

/// Everything the writer needs to know about a variant, rather than
/// branching on the `Variant` enum inline at every call site.
#[derive(Debug, Clone, Copy)]
pub struct FormatPolicy {
    pub signature: [u8; 8],
    pub max_segment_size: u64,
    pub supports_header2: bool,
    pub supports_xheader: bool,
    pub supports_digest: bool,
    pub supports_session: bool,
    pub default_compression: Level,
    pub chunks_per_section_cap: u32,
    pub emits_guid: bool,
    /// `true` for the "smart" variant, whose segment extensions run
    /// `s01..s99,saa..` instead of `E01..E99,EAA..`.
    pub smart_extensions: bool,
}

impl Variant {
    pub fn policy(self) -> FormatPolicy {
        use Variant::*;
        match self {
            Ftk => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: false,
                supports_xheader: false,
                supports_digest: false,
                supports_session: false,
                default_compression: Level::None,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: false,
                smart_extensions: false,
            },
            Encase2 | Encase3 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: false,
                supports_xheader: false,
                supports_digest: false,
                supports_session: false,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: false,
                smart_extensions: false,
            },
            Encase4 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: true,
                supports_xheader: false,
                supports_digest: false,
                supports_session: false,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: false,
                smart_extensions: false,
            },
            Encase5 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: true,
                supports_xheader: false,
                supports_digest: true,
                supports_session: false,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: true,
                smart_extensions: false,
            },
            Encase6 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_64BIT,
                supports_header2: true,
                supports_xheader: false,
                supports_digest: true,
                supports_session: true,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: true,
                smart_extensions: false,
            },
            Linen5 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: true,
                supports_xheader: false,
                supports_digest: true,
                supports_session: false,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: true,
                smart_extensions: false,
            },
            Linen6 => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_64BIT,
                supports_header2: true,
                supports_xheader: false,
                supports_digest: true,
                supports_session: true,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: true,
                smart_extensions: false,
            },
            Ewfx => FormatPolicy {
                signature: EVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_64BIT,
                supports_header2: true,
                supports_xheader: true,
                supports_digest: true,
                supports_session: true,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: true,
                smart_extensions: false,
            },
            Smart => FormatPolicy {
                signature: LVF_SIGNATURE,
                max_segment_size: MAX_SEGMENT_SIZE_32BIT,
                supports_header2: false,
                supports_xheader: false,
                supports_digest: false,
                supports_session: false,
                default_compression: Level::Fast,
                chunks_per_section_cap: DEFAULT_CHUNKS_PER_SECTION,
                emits_guid: false,
                smart_extensions: true,
            },
        }
    }

    /// Rejects a configuration whose declared segment size exceeds what
    /// this variant's offset width can address (§4.3 "Violations of the
    /// per-variant cap are rejected at configuration time").
    pub fn validate_segment_size(self, requested: u64) -> Result<(), String> {
        let policy = self.policy();
        if requested < MIN_SEGMENT_SIZE {
            return Err(format!(
                "segment_file_size {requested} is below the 1440 KiB minimum"
            ));
        }
        if requested > policy.max_segment_size {
            return Err(format!(
                "segment_file_size {requested} exceeds the maximum {} bytes for this variant",
                policy.max_segment_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_encase6_and_linen6_and_ewfx_get_64bit_offsets() {
        assert_eq!(Variant::Encase6.policy().max_segment_size, MAX_SEGMENT_SIZE_64BIT);
        assert_eq!(Variant::Encase5.policy().max_segment_size, MAX_SEGMENT_SIZE_32BIT);
    }

    #[test]
    fn smart_variant_uses_lvf_signature() {
        assert_eq!(Variant::Smart.policy().signature, LVF_SIGNATURE);
        assert!(Variant::Smart.policy().smart_extensions);
    }

    #[test]
    fn segment_size_below_minimum_is_rejected() {
        assert!(Variant::Encase5.validate_segment_size(1024).is_err());
    }

    #[test]
    fn oversized_segment_rejected_for_32bit_variant() {
        assert!(Variant::Encase5
            .validate_segment_size(MAX_SEGMENT_SIZE_32BIT + 1)
            .is_err());
        assert!(Variant::Encase6
            .validate_segment_size(MAX_SEGMENT_SIZE_32BIT + 1)
            .is_ok());
    }
}
