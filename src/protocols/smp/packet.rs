use bytes::{BufMut, BytesMut};

use super::types::SmpOp;
use crate::error::CodecError;

pub const SMP_HEADER_LEN: usize = 8;

/// Protocol version carried in bits 3-4 of the first header byte.
pub const SMP_VERSION_1: u8 = 0;
pub const SMP_VERSION_2: u8 = 1;

/// Fixed 8-byte SMP header.
///
/// ```text
/// | res:3 | ver:2 | op:3 | flags | len (BE u16) | group (BE u16) | seq | id |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmpHeader {
    pub op: SmpOp,
    pub version: u8,
    pub flags: u8,
    pub len: u16,
    pub group: u16,
    pub seq: u8,
    pub id: u8,
}

impl SmpHeader {
    pub fn new(op: SmpOp, group: u16, id: u8, seq: u8) -> Self {
        Self {
            op,
            version: SMP_VERSION_1,
            flags: 0,
            len: 0,
            group,
            seq,
            id,
        }
    }

    pub fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u8(((self.version & 0x03) << 3) | (self.op as u8 & 0x07));
        buf.put_u8(self.flags);
        buf.put_u16(self.len);
        buf.put_u16(self.group);
        buf.put_u8(self.seq);
        buf.put_u8(self.id);
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < SMP_HEADER_LEN {
            return Err(CodecError::TooShort(bytes.len()));
        }
        Ok(Self {
            op: SmpOp::try_from(bytes[0] & 0x07)?,
            version: (bytes[0] >> 3) & 0x03,
            flags: bytes[1],
            len: u16::from_be_bytes([bytes[2], bytes[3]]),
            group: u16::from_be_bytes([bytes[4], bytes[5]]),
            seq: bytes[6],
            id: bytes[7],
        })
    }

    /// Whether `self` is the response header matching `request`.
    pub fn answers(&self, request: &SmpHeader) -> bool {
        self.op == request.op.response()
            && self.group == request.group
            && self.id == request.id
            && self.seq == request.seq
    }
}
