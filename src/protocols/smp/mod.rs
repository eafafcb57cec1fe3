use bytes::BytesMut;

mod packet;
mod types;

pub use self::packet::{SmpHeader, SMP_HEADER_LEN, SMP_VERSION_1, SMP_VERSION_2};
pub use self::types::*;

use super::SmpCommand;
use crate::error::{CodecError, Error};

/// CBOR encoding of an empty map, used when a device sends no payload.
const EMPTY_MAP: [u8; 1] = [0xa0];

/// One SMP message: header plus raw CBOR payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpMessage {
    pub header: SmpHeader,
    pub payload: Vec<u8>,
}

impl SmpMessage {
    pub fn request<C: SmpCommand>(command: &C, seq: u8) -> Result<Self, CodecError> {
        let payload = serde_cbor::to_vec(command)?;
        let len =
            u16::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge(payload.len()))?;

        let mut header = SmpHeader::new(C::OP, C::GROUP, C::ID, seq);
        header.len = len;
        Ok(Self { header, payload })
    }

    pub fn encoded_len(&self) -> usize {
        SMP_HEADER_LEN + self.payload.len()
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.header.write_to(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let header = SmpHeader::from_bytes(bytes)?;
        let declared = header.len as usize;
        let received = bytes.len() - SMP_HEADER_LEN;
        if declared != received {
            return Err(CodecError::LengthMismatch { declared, received });
        }
        Ok(Self {
            header,
            payload: bytes[SMP_HEADER_LEN..].to_vec(),
        })
    }

    fn body(&self) -> &[u8] {
        if self.payload.is_empty() {
            &EMPTY_MAP
        } else {
            &self.payload
        }
    }

    /// Fails with [`Error::Protocol`] when the device reported an error.
    pub fn status(&self) -> Result<(), Error> {
        let status: StatusBody = serde_cbor::from_slice(self.body()).map_err(CodecError::from)?;

        if let Some(err) = status.err.filter(|e| e.rc != rc::OK) {
            return Err(Error::Protocol {
                rc: err.rc,
                group: err.group,
                reason: status.rsn,
            });
        }
        match status.rc {
            Some(code) if code != rc::OK => Err(Error::Protocol {
                rc: code,
                group: self.header.group,
                reason: status.rsn,
            }),
            _ => Ok(()),
        }
    }

    /// Checks the status, then decodes the typed response body of `C`.
    pub fn decode<C: SmpCommand>(&self) -> Result<C::Response, Error> {
        self.status()?;
        Ok(serde_cbor::from_slice(self.body()).map_err(CodecError::from)?)
    }
}

/// Collects SMP bytes spread over several serial packets.
///
/// A message is complete once the header and `len` payload bytes are
/// present, regardless of where the serial packets were cut.
#[derive(Debug, Default)]
pub struct SmpReassembler {
    buffer: BytesMut,
}

impl SmpReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<SmpMessage>, CodecError> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() < SMP_HEADER_LEN {
            return Ok(None);
        }

        let header = match SmpHeader::from_bytes(&self.buffer) {
            Ok(header) => header,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        if self.buffer.len() < SMP_HEADER_LEN + header.len as usize {
            return Ok(None);
        }

        let complete = self.buffer.split();
        SmpMessage::from_bytes(&complete).map(Some)
    }
}

impl SmpCommand for EchoReq {
    type Response = EchoRsp;
    const OP: SmpOp = SmpOp::Write;
    const GROUP: u16 = group::OS;
    const ID: u8 = OsCommand::Echo as u8;
}

impl SmpCommand for ResetReq {
    type Response = EmptyRsp;
    const OP: SmpOp = SmpOp::Write;
    const GROUP: u16 = group::OS;
    const ID: u8 = OsCommand::Reset as u8;
}

impl SmpCommand for ParamsReq {
    type Response = ParamsRsp;
    const OP: SmpOp = SmpOp::Read;
    const GROUP: u16 = group::OS;
    const ID: u8 = OsCommand::McuMgrParams as u8;
}

impl SmpCommand for ImageStateReq {
    type Response = ImageStateRsp;
    const OP: SmpOp = SmpOp::Read;
    const GROUP: u16 = group::IMAGE;
    const ID: u8 = ImageCommand::State as u8;
}

impl SmpCommand for ImageSetStateReq {
    type Response = EmptyRsp;
    const OP: SmpOp = SmpOp::Write;
    const GROUP: u16 = group::IMAGE;
    const ID: u8 = ImageCommand::State as u8;
}

impl SmpCommand for ImageUploadReq {
    type Response = ImageUploadRsp;
    const OP: SmpOp = SmpOp::Write;
    const GROUP: u16 = group::IMAGE;
    const ID: u8 = ImageCommand::Upload as u8;
}

impl SmpCommand for ImageEraseReq {
    type Response = EmptyRsp;
    const OP: SmpOp = SmpOp::Write;
    const GROUP: u16 = group::IMAGE;
    const ID: u8 = ImageCommand::Erase as u8;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_bytes::ByteBuf;
    use serde_cbor::Value;
    use std::collections::BTreeMap;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.to_string()), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn response(op: SmpOp, group: u16, id: u8, seq: u8, body: &Value) -> SmpMessage {
        let payload = serde_cbor::to_vec(body).unwrap();
        let mut header = SmpHeader::new(op, group, id, seq);
        header.len = payload.len() as u16;
        SmpMessage { header, payload }
    }

    fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
        match value {
            Value::Map(m) => m.get(&Value::Text(key.to_string())),
            _ => None,
        }
    }

    #[test]
    fn upload_request_round_trip() {
        let req = ImageUploadReq {
            image: Some(0),
            data: ByteBuf::from(vec![1, 2, 3]),
            len: Some(3),
            off: 0,
            sha: Some(ByteBuf::from(vec![0xaa; 32])),
            upgrade: None,
        };
        let message = SmpMessage::request(&req, 7).unwrap();
        assert_eq!(message.header.op, SmpOp::Write);
        assert_eq!(message.header.group, group::IMAGE);
        assert_eq!(message.header.id, ImageCommand::Upload as u8);
        assert_eq!(message.header.seq, 7);
        assert_eq!(message.header.len as usize, message.payload.len());

        let decoded = SmpMessage::from_bytes(&message.to_bytes()).unwrap();
        assert_eq!(decoded, message);

        let body: Value = serde_cbor::from_slice(&decoded.payload).unwrap();
        assert_eq!(field(&body, "data"), Some(&Value::Bytes(vec![1, 2, 3])));
        assert_eq!(field(&body, "off"), Some(&Value::Integer(0)));
        assert_eq!(field(&body, "len"), Some(&Value::Integer(3)));
        assert_eq!(field(&body, "sha"), Some(&Value::Bytes(vec![0xaa; 32])));
        assert_eq!(field(&body, "upgrade"), None);
    }

    #[test]
    fn later_chunks_omit_first_chunk_fields() {
        let req = ImageUploadReq {
            image: None,
            data: ByteBuf::from(vec![9; 4]),
            len: None,
            off: 512,
            sha: None,
            upgrade: None,
        };
        let message = SmpMessage::request(&req, 0).unwrap();
        let body: Value = serde_cbor::from_slice(&message.payload).unwrap();
        let Value::Map(m) = &body else {
            panic!("expected map");
        };
        assert_eq!(m.len(), 2);
        assert_eq!(field(&body, "off"), Some(&Value::Integer(512)));
    }

    #[test]
    fn set_state_without_hash() {
        let req = ImageSetStateReq {
            hash: None,
            confirm: true,
        };
        let message = SmpMessage::request(&req, 1).unwrap();
        let body: Value = serde_cbor::from_slice(&message.payload).unwrap();
        assert_eq!(body, map(vec![("confirm", Value::Bool(true))]));
    }

    #[test]
    fn decodes_image_list() {
        let body = map(vec![(
            "images",
            Value::Array(vec![
                map(vec![
                    ("slot", Value::Integer(0)),
                    ("version", Value::Text("1.2.3".into())),
                    ("hash", Value::Bytes(vec![1; 32])),
                    ("bootable", Value::Bool(true)),
                    ("confirmed", Value::Bool(true)),
                    ("active", Value::Bool(true)),
                ]),
                map(vec![
                    ("image", Value::Integer(0)),
                    ("slot", Value::Integer(1)),
                    ("version", Value::Text("1.3.0".into())),
                    ("pending", Value::Bool(true)),
                ]),
            ]),
        )]);
        let message = response(SmpOp::ReadRsp, group::IMAGE, 0, 3, &body);
        let rsp = message.decode::<ImageStateReq>().unwrap();

        assert_eq!(rsp.images.len(), 2);
        assert!(rsp.images[0].active && rsp.images[0].confirmed && !rsp.images[0].pending);
        assert_eq!(rsp.images[0].hash.as_ref().map(|h| h.to_vec()), Some(vec![1u8; 32]));
        assert_eq!(rsp.images[1].image, Some(0));
        assert!(rsp.images[1].pending && !rsp.images[1].active);
    }

    #[test]
    fn missing_required_field_is_codec_error() {
        let body = map(vec![(
            "images",
            Value::Array(vec![map(vec![("slot", Value::Integer(0))])]),
        )]);
        let message = response(SmpOp::ReadRsp, group::IMAGE, 0, 3, &body);
        assert!(matches!(
            message.decode::<ImageStateReq>(),
            Err(Error::Codec(CodecError::Cbor(_)))
        ));
    }

    #[test]
    fn v1_error_status() {
        let body = map(vec![
            ("rc", Value::Integer(rc::BAD_STATE as i128)),
            ("rsn", Value::Text("slot in use".into())),
        ]);
        let message = response(SmpOp::WriteRsp, group::IMAGE, 5, 0, &body);
        match message.decode::<ImageEraseReq>() {
            Err(Error::Protocol {
                rc: code,
                group: grp,
                reason,
            }) => {
                assert_eq!(code, rc::BAD_STATE);
                assert_eq!(grp, group::IMAGE);
                assert_eq!(reason.as_deref(), Some("slot in use"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn v2_error_status() {
        let body = map(vec![(
            "err",
            map(vec![("group", Value::Integer(1)), ("rc", Value::Integer(4))]),
        )]);
        let message = response(SmpOp::WriteRsp, group::IMAGE, 0, 0, &body);
        assert!(matches!(
            message.decode::<ImageSetStateReq>(),
            Err(Error::Protocol { rc: 4, group: 1, .. })
        ));
    }

    #[test]
    fn zero_rc_is_success() {
        let body = map(vec![("rc", Value::Integer(0)), ("off", Value::Integer(128))]);
        let message = response(SmpOp::WriteRsp, group::IMAGE, 1, 0, &body);
        let rsp = message.decode::<ImageUploadReq>().unwrap();
        assert_eq!(rsp.off, Some(128));
    }

    #[test]
    fn empty_payload_decodes_as_empty_map() {
        let message = SmpMessage {
            header: SmpHeader::new(SmpOp::WriteRsp, group::OS, OsCommand::Reset as u8, 0),
            payload: Vec::new(),
        };
        assert!(message.decode::<ResetReq>().is_ok());
    }

    #[test]
    fn declared_length_must_match() {
        let message = SmpMessage::request(&EchoReq { d: "hi".into() }, 0).unwrap();
        let mut bytes = message.to_bytes().to_vec();
        bytes.push(0);
        assert!(matches!(
            SmpMessage::from_bytes(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn reassembles_across_fragments() {
        let echo = EchoReq {
            d: "x".repeat(200),
        };
        let message = SmpMessage::request(&echo, 4).unwrap();
        let bytes = message.to_bytes();

        let mut reassembler = SmpReassembler::new();
        let mut pieces = bytes.chunks(37).peekable();
        let mut result = None;
        while let Some(piece) = pieces.next() {
            let out = reassembler.push(piece).unwrap();
            if pieces.peek().is_some() {
                assert!(out.is_none());
            } else {
                result = out;
            }
        }
        assert_eq!(result, Some(message));
        assert!(reassembler.is_empty());
    }

    #[test]
    fn surplus_bytes_are_rejected() {
        let message = SmpMessage::request(&ParamsReq {}, 0).unwrap();
        let mut bytes = message.to_bytes().to_vec();
        bytes.extend_from_slice(&[0xa0, 0xa0]);

        let mut reassembler = SmpReassembler::new();
        assert!(matches!(
            reassembler.push(&bytes),
            Err(CodecError::LengthMismatch { .. })
        ));
        assert!(reassembler.is_empty());
    }
}
