use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_XMODEM};
use tokio_util::codec::{Decoder, Encoder};

mod types;
pub use self::types::{FrameKind, SerialFrame, CONTINUATION_MARKER, START_MARKER};
use self::types::{CRC_LEN, LENGTH_PREFIX, LINE_OVERHEAD};

use crate::error::{Error, FrameError};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);
const SERIAL_MAX_BUFFER_SIZE: usize = 4096;

/// MCUmgr serial line framing.
///
/// Outgoing packets become `len ‖ data ‖ crc16`, base64 encoded and cut into
/// newline-terminated lines, the first behind [`START_MARKER`] and the rest
/// behind [`CONTINUATION_MARKER`]. Incoming lines are fed back through
/// [`SerialCodec::push_line`] until a whole packet has been collected.
#[derive(Debug)]
pub struct SerialCodec {
    line_length: usize,
    rx_buffer: Option<BytesMut>,
}

impl SerialCodec {
    pub fn new(line_length: usize) -> Self {
        Self {
            line_length,
            rx_buffer: None,
        }
    }

    /// Base64 characters per line, kept to whole 4-character groups.
    fn chars_per_line(&self) -> usize {
        (self.line_length.saturating_sub(LINE_OVERHEAD) / 4 * 4).max(4)
    }

    pub fn encode_packet(&self, packet: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = packet.len() + CRC_LEN;
        let declared = u16::try_from(len).map_err(|_| FrameError::PacketTooLarge(packet.len()))?;

        let mut raw = BytesMut::with_capacity(LENGTH_PREFIX + len);
        raw.put_u16(declared);
        raw.extend_from_slice(packet);
        raw.put_u16(CRC16.checksum(packet));

        let encoded = STANDARD.encode(&raw);
        for (i, line) in encoded.as_bytes().chunks(self.chars_per_line()).enumerate() {
            let kind = if i == 0 {
                FrameKind::Start
            } else {
                FrameKind::Continuation
            };
            dst.extend_from_slice(&kind.marker());
            dst.extend_from_slice(line);
            dst.put_u8(b'\n');
        }

        Ok(())
    }

    /// Drops any partially collected packet.
    pub fn reset(&mut self) {
        self.rx_buffer = None;
    }

    /// Feeds one received line.
    ///
    /// Returns the packet payload (without length prefix and CRC) once the
    /// line completing it arrives. Lines carrying no frame marker are skipped.
    /// On error the partial packet is dropped so scanning can resume.
    pub fn push_line(&mut self, line: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(frame) = SerialFrame::scan(line) else {
            return Ok(None);
        };

        let result = self.accept(frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn accept(&mut self, frame: SerialFrame<'_>) -> Result<Option<Vec<u8>>, FrameError> {
        let decoded = STANDARD
            .decode(frame.body)
            .map_err(|e| FrameError::InvalidEncoding(e.to_string()))?;

        let buffer = match frame.kind {
            FrameKind::Start => {
                if let Some(stale) = self.rx_buffer.take() {
                    log::warn!("Dropping incomplete packet of {} bytes", stale.len());
                }
                self.rx_buffer.insert(BytesMut::with_capacity(SERIAL_MAX_BUFFER_SIZE))
            }
            FrameKind::Continuation => self
                .rx_buffer
                .as_mut()
                .ok_or(FrameError::OrphanContinuation)?,
        };
        buffer.extend_from_slice(&decoded);

        if buffer.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let declared = u16::from_be_bytes([buffer[0], buffer[1]]) as usize;
        let received = buffer.len() - LENGTH_PREFIX;
        if received < declared {
            return Ok(None);
        }
        if received > declared {
            return Err(FrameError::LengthMismatch { declared, received });
        }
        if declared < CRC_LEN {
            return Err(FrameError::TooShort(declared));
        }

        let packet = self.rx_buffer.take().unwrap_or_default();
        let (data, crc_bytes) = packet[LENGTH_PREFIX..].split_at(declared - CRC_LEN);
        let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
        let actual = CRC16.checksum(data);
        if expected != actual {
            return Err(FrameError::CrcMismatch { expected, actual });
        }

        Ok(Some(data.to_vec()))
    }
}

impl<'a> Encoder<&'a [u8]> for SerialCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a [u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        Ok(self.encode_packet(item, dst)?)
    }
}

impl Decoder for SerialCodec {
    type Item = Vec<u8>;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(pos) = src.iter().position(|b| *b == b'\n') {
            let line = src.split_to(pos + 1);
            if let Some(packet) = self.push_line(&line)? {
                return Ok(Some(packet));
            }
        }
        Ok(None)
    }
}
