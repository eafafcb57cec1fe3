use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use serde_bytes::ByteBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_serial::SerialStream;

use crate::error::{Error, Result};
use crate::protocols::serial::SerialCodec;
use crate::protocols::smp::{
    rc, EchoReq, ImageEraseReq, ImageSetStateReq, ImageStateReq, ParamsReq, ResetReq, SmpHeader,
    SmpMessage, SmpReassembler, SMP_HEADER_LEN,
};
use crate::protocols::SmpCommand;
use crate::transport::Transport;

mod config;
mod types;
mod upload;

pub use types::*;
pub use upload::{UploadPhase, UploadState, MIN_CHUNK_SIZE};

/// An MCUmgr session over one serial link.
///
/// Requests are strictly sequential: every operation takes `&mut self` and
/// waits for its response before returning, so at most one request is ever
/// outstanding on the half-duplex link.
pub struct Session<T> {
    transport: Transport<T>,
    codec: SerialCodec,
    config: SessionConfig,
    mtu: usize,
    seq: u8,
}

impl Session<SerialStream> {
    /// Opens the serial device named in `config`.
    pub fn open(config: SessionConfig) -> Result<Self> {
        config.validate_serial()?;
        let transport = Transport::open(&config.device, config.baudrate, config.write_timeout)?;
        info!("Session opened on {} ({} baud)", config.device, config.baudrate);
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
    /// Runs a session over an already connected stream.
    pub fn new(stream: T, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = Transport::new(stream, config.write_timeout);
        Ok(Self::with_transport(transport, config))
    }

    fn with_transport(transport: Transport<T>, config: SessionConfig) -> Self {
        Self {
            transport,
            codec: SerialCodec::new(config.linelength),
            mtu: config.mtu,
            config,
            seq: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Releases the link.
    pub fn close(self) {
        debug!("Closing session");
    }

    fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = seq.wrapping_add(1);
        seq
    }

    async fn transceive<C: SmpCommand>(&mut self, command: &C) -> Result<C::Response> {
        let seq = self.next_seq();
        let request = SmpMessage::request(command, seq)?;
        let response = self
            .exchange(&request, self.config.initial_timeout, self.config.nb_retry)
            .await?;
        response.decode::<C>()
    }

    /// Sends `request` and waits for its response, resending it after a
    /// timeout up to `retries` times.
    async fn exchange(
        &mut self,
        request: &SmpMessage,
        limit: Duration,
        retries: u32,
    ) -> Result<SmpMessage> {
        let mut wire = BytesMut::new();
        self.codec.encode_packet(&request.to_bytes(), &mut wire)?;

        let mut attempt = 0;
        loop {
            self.transport.write(&wire).await?;
            match self.receive(&request.header, limit).await {
                Err(Error::Timeout) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        "No response to seq {} within {:?}, retry {}/{}",
                        request.header.seq, limit, attempt, retries
                    );
                }
                result => return result,
            }
        }
    }

    async fn receive(&mut self, request: &SmpHeader, limit: Duration) -> Result<SmpMessage> {
        let deadline = Instant::now() + limit;
        let mut reassembler = SmpReassembler::new();
        let mut resyncs = 0;
        self.codec.reset();

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let line = self.transport.read_until(b'\n', remaining).await?;

            let decoded = match self.codec.push_line(&line) {
                Ok(Some(packet)) => reassembler.push(&packet).map_err(Error::from),
                Ok(None) => continue,
                Err(e) => Err(e.into()),
            };

            let message = match decoded {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    resyncs += 1;
                    if resyncs > self.config.nb_retry {
                        return Err(e);
                    }
                    warn!("Corrupt response ({e}), resynchronizing");
                    reassembler.reset();
                    continue;
                }
            };

            if !message.header.answers(request) {
                debug!(
                    "Discarding response seq {} (group {}, id {}), waiting for seq {}",
                    message.header.seq, message.header.group, message.header.id, request.seq
                );
                continue;
            }
            return Ok(message);
        }
    }

    /// Lists the images on the device, ordered by image number then slot.
    pub async fn list(&mut self) -> Result<Vec<ImageDescriptor>> {
        let rsp = self.transceive(&ImageStateReq {}).await?;
        let mut images = rsp
            .images
            .into_iter()
            .map(ImageDescriptor::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        images.sort_by_key(|i| (i.image.unwrap_or(0), i.slot));
        debug!("Device reports {} image(s)", images.len());
        Ok(images)
    }

    /// Marks the image with `hash` pending for the next boot.
    pub async fn test(&mut self, hash: &[u8]) -> Result<()> {
        self.test_with(hash, None).await
    }

    /// Marks the image with `hash` pending, optionally confirming it at once.
    pub async fn test_with(&mut self, hash: &[u8], confirm: Option<bool>) -> Result<()> {
        self.set_state(Some(hash), confirm.unwrap_or(false)).await
    }

    /// Confirms the image with `hash`, or the running image when `None`.
    pub async fn confirm(&mut self, hash: Option<&[u8]>) -> Result<()> {
        self.set_state(hash, true).await
    }

    async fn set_state(&mut self, hash: Option<&[u8]>, confirm: bool) -> Result<()> {
        let req = ImageSetStateReq {
            hash: hash.map(|h| ByteBuf::from(h.to_vec())),
            confirm,
        };
        self.transceive(&req).await?;
        Ok(())
    }

    pub async fn delete(&mut self, slot: u32) -> Result<()> {
        self.erase(Some(slot)).await
    }

    /// Erases `slot`, or the device's default secondary slot when `None`.
    pub async fn erase(&mut self, slot: Option<u32>) -> Result<()> {
        self.transceive(&ImageEraseReq { slot }).await?;
        Ok(())
    }

    /// Reboots the device once it has acknowledged the request.
    pub async fn reset(&mut self) -> Result<()> {
        self.transceive(&ResetReq::default()).await?;
        self.transport.discard_input();
        info!("Device reset");
        Ok(())
    }

    pub async fn echo(&mut self, text: &str) -> Result<String> {
        let rsp = self.transceive(&EchoReq { d: text.to_string() }).await?;
        Ok(rsp.r)
    }

    pub async fn params(&mut self) -> Result<McuMgrParams> {
        let rsp = self.transceive(&ParamsReq {}).await?;
        Ok(McuMgrParams {
            buf_size: rsp.buf_size,
            buf_count: rsp.buf_count,
        })
    }

    /// Lowers the session MTU to the device buffer size when it reports one.
    pub async fn negotiate_mtu(&mut self) -> Result<usize> {
        match self.params().await {
            Ok(params) => {
                let buf_size = params.buf_size as usize;
                if buf_size > SMP_HEADER_LEN && buf_size < self.mtu {
                    info!("Device buffer is {buf_size} bytes, lowering MTU from {}", self.mtu);
                    self.mtu = buf_size;
                }
            }
            Err(Error::Protocol { rc: code, .. }) if code == rc::NOT_SUPPORTED => {
                debug!("Device does not report MCUmgr parameters, keeping MTU {}", self.mtu);
            }
            Err(e) => return Err(e),
        }
        Ok(self.mtu)
    }
}
