//! Byte offsets of the fixed Common Record header. Every
//! compiled template reserves exactly this many bytes before its
//! extension blocks begin; fields the template doesn't supply are left at
//! zero (the VM zero-initializes the whole record before running the
//! sequencer).
//!
//! Output words are written little-endian via `to_le_bytes` throughout —
//! an arbitrary but fixed choice, documented here rather than derived from
//! the wire; nothing here depends on host alignment,
//! every multi-byte write goes through an explicit `copy_from_slice`.

pub const SIZE_OFFSET: usize = 0; // u16: output_record_size
pub const TYPE_OFFSET: usize = 2; // u8: record type, always 1
pub const FLAGS_OFFSET: usize = 3; // u8: TemplateFlags bits
pub const EXT_MAP_ID_OFFSET: usize = 4; // u32
pub const EXPORTER_SYSID_OFFSET: usize = 8; // u32
pub const NFVERSION_OFFSET: usize = 12; // u8, always 10

pub const FIRST_SEC_OFFSET: usize = 16; // u32
pub const FIRST_MSEC_OFFSET: usize = 20; // u16
pub const LAST_SEC_OFFSET: usize = 24; // u32
pub const LAST_MSEC_OFFSET: usize = 28; // u16

pub const FORWARDING_STATUS_OFFSET: usize = 32; // u8
pub const TCP_FLAGS_OFFSET: usize = 33; // u8
pub const PROTOCOL_OFFSET: usize = 34; // u8
pub const TOS_OFFSET: usize = 35; // u8
pub const SRC_PORT_OFFSET: usize = 36; // u16
pub const DST_PORT_OFFSET: usize = 38; // u16
/// Reserved, written post-transcode; currently unused
/// by the reference `Sink` but kept so downstream readers have a stable
/// slot to repurpose without reshuffling the rest of the layout.
pub const RESERVED_PAD_OFFSET: usize = 40; // u16
pub const BIFLOW_DIRECTION_OFFSET: usize = 42; // u8
pub const FLOW_END_REASON_OFFSET: usize = 43; // u8

pub const SRC_ADDR_OFFSET: usize = 44; // [u8; 16], v4 in the low 4 bytes
pub const DST_ADDR_OFFSET: usize = 60; // [u8; 16]

pub const BYTES_OFFSET: usize = 76; // u64
pub const PACKETS_OFFSET: usize = 84; // u64

/// Where per-template extension blocks begin. Already a multiple of 4,
/// matching the extension map's own 4-byte alignment.
pub const FIXED_HEADER_SIZE: usize = 92;

pub const RECORD_TYPE_COMMON: u8 = 1;
pub const NFVERSION: u8 = 10;
