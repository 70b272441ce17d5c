//! On-wire structures (RFC 7011): the 16-byte message header, flowset
//! headers, template/option-template record headers and field specifiers.
//! Parsed by hand with `from_be_bytes` rather than a serde/bincode derive — the
//! enterprise-bit convention on field specifiers (high bit of the type
//! field set => a 4-byte enterprise number follows the length) isn't
//! expressible as a fixed-layout struct.

use core::convert::TryInto;

use crate::error::{CoreError, Result};

/// The fixed 16-byte IPFIX message header.
#[derive(Debug)]
pub struct MessageHeader {
    pub version: u16,
    pub length: u16,
    pub export_time: u32,
    pub sequence: u32,
    pub domain_id: u32,
}

impl MessageHeader {
    pub const SIZE: usize = 16;
    pub const IPFIX_VERSION: u16 = 10;

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CoreError::MalformedHeader(format!("need {} bytes, have {}", Self::SIZE, buf.len())));
        }
        let header = MessageHeader {
            version: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            export_time: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            sequence: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
            domain_id: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        };
        if header.version != Self::IPFIX_VERSION {
            return Err(CoreError::MalformedHeader(format!("unexpected version {}", header.version)));
        }
        Ok(header)
    }
}

/// A flowset header: `{ id, length }`, with `length` covering the set
/// header itself.
#[derive(Debug)]
pub struct SetHeader {
    pub id: u16,
    pub length: u16,
}

impl SetHeader {
    pub const SIZE: usize = 4;
    pub const TEMPLATE_SET_ID: u16 = 2;
    pub const OPTION_TEMPLATE_SET_ID: u16 = 3;
    pub const DATA_SET_ID_MIN: u16 = 256;

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CoreError::MalformedFlowset(format!("need {} bytes for set header, have {}", Self::SIZE, buf.len())));
        }
        let header = SetHeader { id: u16::from_be_bytes(buf[0..2].try_into().unwrap()), length: u16::from_be_bytes(buf[2..4].try_into().unwrap()) };
        if header.length < Self::SIZE as u16 {
            return Err(CoreError::MalformedFlowset(format!("set length {} shorter than header", header.length)));
        }
        Ok(header)
    }

    #[inline]
    pub fn content_size(&self) -> usize {
        self.length as usize - Self::SIZE
    }
}

/// `{ id, field_count }` at the head of a Template Record.
/// `field_count == 0` is the withdraw sentinel.
#[derive(Debug)]
pub struct TemplateRecordHeader {
    pub id: u16,
    pub field_count: u16,
}

impl TemplateRecordHeader {
    pub const SIZE: usize = 4;
    /// The reserved id that, when withdrawn, withdraws every template for
    /// the exporter.
    pub const WITHDRAW_ALL_ID: u16 = 2;

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CoreError::TruncatedTemplate("record header".into()));
        }
        Ok(TemplateRecordHeader { id: u16::from_be_bytes(buf[0..2].try_into().unwrap()), field_count: u16::from_be_bytes(buf[2..4].try_into().unwrap()) })
    }
}

/// `{ id, field_count, scope_field_count }` at the head of an Options
/// Template Record.
#[derive(Debug)]
pub struct OptionTemplateRecordHeader {
    pub id: u16,
    pub field_count: u16,
    pub scope_field_count: u16,
}

impl OptionTemplateRecordHeader {
    pub const SIZE: usize = 6;

    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(CoreError::TruncatedOptionTemplate("record header".into()));
        }
        Ok(OptionTemplateRecordHeader {
            id: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            field_count: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            scope_field_count: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
        })
    }
}

/// One field specifier from a template or options-template record: a
/// 16-bit type (enterprise bit in the MSB), a 16-bit length, and — only
/// when the enterprise bit is set — a 32-bit enterprise number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub element_id: u16,
    pub length: u16,
    pub enterprise: Option<u32>,
}

impl FieldSpec {
    const ENTERPRISE_BIT: u16 = 0x8000;

    /// Reads one field specifier, returning it plus the number of bytes
    /// consumed (4, or 8 when an enterprise number follows).
    pub fn read(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 4 {
            return Err(CoreError::TruncatedTemplate("field specifier".into()));
        }
        let raw_id = u16::from_be_bytes(buf[0..2].try_into().unwrap());
        let length = u16::from_be_bytes(buf[2..4].try_into().unwrap());
        if raw_id & Self::ENTERPRISE_BIT == 0 {
            return Ok((FieldSpec { element_id: raw_id, length, enterprise: None }, 4));
        }
        if buf.len() < 8 {
            return Err(CoreError::TruncatedTemplate("enterprise field specifier".into()));
        }
        let enterprise = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        Ok((FieldSpec { element_id: raw_id & !Self::ENTERPRISE_BIT, length, enterprise: Some(enterprise) }, 8))
    }

    /// RFC 7011 §7: length `0xFFFF` marks a variable-length element. Out of
    /// scope for structured data, but scalar variable-length elements
    /// (e.g. a variable-length octet string) still need to be skipped via
    /// `DYN_SKIP` rather than treated as a fixed 65535-byte field.
    pub fn is_variable_length(&self) -> bool {
        self.length == 0xFFFF
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn field_spec_without_enterprise() {
        let buf = hex!("00 01 00 04");
        let (spec, consumed) = FieldSpec::read(&buf).unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(spec.element_id, 1);
        assert_eq!(spec.length, 4);
        assert_eq!(spec.enterprise, None);
    }

    #[test]
    fn field_spec_with_enterprise_bit() {
        // octetDeltaCount (1) flagged reverse, enterprise 29305
        let buf = hex!("80 01 00 04 00 00 72 79");
        let (spec, consumed) = FieldSpec::read(&buf).unwrap();
        assert_eq!(consumed, 8);
        assert_eq!(spec.element_id, 1);
        assert_eq!(spec.enterprise, Some(29305));
    }

    #[test]
    fn header_rejects_bad_version() {
        let mut buf = [0u8; 16];
        buf[1] = 9; // version 9, not 10
        assert!(MessageHeader::read(&buf).is_err());
    }
}
