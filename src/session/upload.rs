use std::ops::Range;
use std::path::Path;

use log::{debug, info, warn};
use serde_bytes::ByteBuf;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Session, UploadOptions};
use crate::error::{CodecError, Error, Result};
use crate::image::FirmwareImage;
use crate::protocols::smp::{rc, ImageUploadReq, ImageUploadRsp, SmpMessage, SMP_HEADER_LEN};

/// Chunks are never shrunk below this size.
pub const MIN_CHUNK_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    SendingChunk,
    AwaitingAck,
    Complete,
    Failed,
}

/// Progress of one image upload.
///
/// The offset only moves forward and the chunk size only moves down; every
/// failed attempt at the same offset consumes one retry.
#[derive(Debug, Clone)]
pub struct UploadState {
    total: usize,
    offset: usize,
    chunk_size: usize,
    retries: u32,
    max_retries: u32,
    exchanges: u32,
    phase: UploadPhase,
}

impl UploadState {
    pub fn new(total: usize, chunk_size: usize, max_retries: u32) -> Self {
        Self {
            total,
            offset: 0,
            chunk_size,
            retries: 0,
            max_retries,
            exchanges: 0,
            phase: UploadPhase::Idle,
        }
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Request/response exchanges dispatched so far.
    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    pub fn start(&mut self) {
        self.phase = if self.offset >= self.total {
            UploadPhase::Complete
        } else {
            UploadPhase::SendingChunk
        };
    }

    /// Byte range of the image the next chunk carries.
    pub fn next_range(&self) -> Range<usize> {
        self.offset..self.total.min(self.offset + self.chunk_size)
    }

    pub fn dispatched(&mut self) {
        self.exchanges += 1;
        self.phase = UploadPhase::AwaitingAck;
    }

    /// Applies the offset the device reports having received.
    ///
    /// The device is authoritative when it reports more than was sent. An
    /// offset that does not advance is not applied and counts as a failed
    /// attempt.
    pub fn acknowledge(&mut self, device_offset: usize) -> Result<()> {
        if device_offset > self.total {
            return Err(self.fail(Error::UnexpectedResponse(format!(
                "device acknowledged offset {device_offset} past image end {}",
                self.total
            ))));
        }
        if device_offset <= self.offset {
            warn!(
                "Device acknowledged offset {device_offset}, expected progress past {}",
                self.offset
            );
            return self.retry(
                Error::UnexpectedResponse(format!("no progress past offset {device_offset}")),
                false,
            );
        }

        let sent_end = self.next_range().end;
        if device_offset > sent_end {
            debug!("Device already holds data up to {device_offset}, skipping ahead");
        }
        self.offset = device_offset;
        self.retries = 0;
        self.phase = if self.offset == self.total {
            UploadPhase::Complete
        } else {
            UploadPhase::SendingChunk
        };
        Ok(())
    }

    /// Records a failed attempt at the current offset, halving the chunk
    /// when `shrink` is set.
    pub fn retry(&mut self, cause: Error, shrink: bool) -> Result<()> {
        self.retries += 1;
        if self.retries > self.max_retries {
            return Err(self.fail(cause));
        }
        if shrink {
            let next = self.chunk_size / 2;
            if next < MIN_CHUNK_SIZE {
                return Err(self.fail(cause));
            }
            self.chunk_size = next;
        }
        self.phase = UploadPhase::SendingChunk;
        Ok(())
    }

    /// Caps the chunk size so an encoded chunk fits the link.
    pub fn limit_chunk(&mut self, max: usize) -> Result<()> {
        if max < MIN_CHUNK_SIZE {
            return Err(self.fail(Error::Configuration(format!(
                "MTU leaves room for only {max} data bytes per chunk"
            ))));
        }
        self.chunk_size = self.chunk_size.min(max);
        Ok(())
    }

    /// Moves to `Failed`, wrapping `cause` with the last acknowledged offset.
    pub fn fail(&mut self, cause: Error) -> Error {
        self.phase = UploadPhase::Failed;
        Error::Upload {
            offset: self.offset,
            source: Box::new(cause),
        }
    }
}

fn is_oversize(error: &Error) -> bool {
    matches!(error, Error::Protocol { rc: code, .. } if *code == rc::NO_MEMORY || *code == rc::MSG_SIZE)
}

impl<T: AsyncRead + AsyncWrite + Unpin> Session<T> {
    pub async fn upload(&mut self, data: &[u8]) -> Result<UploadState> {
        self.upload_with(data, &UploadOptions::default(), |_, _| {})
            .await
    }

    /// Uploads a raw binary or Intel HEX file.
    pub async fn upload_file<F>(
        &mut self,
        path: impl AsRef<Path>,
        options: &UploadOptions,
        progress: F,
    ) -> Result<UploadState>
    where
        F: FnMut(usize, usize),
    {
        let image = FirmwareImage::load(path)?;
        self.upload_with(image.data(), options, progress).await
    }

    /// Uploads `data`, calling `progress(offset, total)` after every
    /// acknowledged chunk.
    ///
    /// On failure the returned [`Error::Upload`] carries the last offset the
    /// device acknowledged.
    pub async fn upload_with<F>(
        &mut self,
        data: &[u8],
        options: &UploadOptions,
        mut progress: F,
    ) -> Result<UploadState>
    where
        F: FnMut(usize, usize),
    {
        if data.is_empty() {
            return Err(Error::Configuration("image is empty".into()));
        }

        let sha = Sha256::digest(data);
        let max_chunk = self.mtu.saturating_sub(SMP_HEADER_LEN);
        let mut state = UploadState::new(
            data.len(),
            self.config.chunk_size.min(max_chunk),
            self.config.nb_retry,
        );

        info!(
            "Uploading {} bytes to image {} (chunk {} bytes)",
            data.len(),
            options.image,
            state.chunk_size()
        );
        state.start();

        while state.phase() != UploadPhase::Complete {
            if options.is_cancelled() {
                return Err(state.fail(Error::Cancelled));
            }

            let request = self.chunk_request(&mut state, data, &sha, options)?;
            let limit = if state.offset() == 0 {
                self.config.initial_timeout
            } else {
                self.config.subsequent_timeout
            };

            state.dispatched();
            let outcome = match self.exchange(&request, limit, 0).await {
                Ok(response) => response.decode::<ImageUploadReq>(),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(ImageUploadRsp { off: Some(off), .. }) => {
                    let off = usize::try_from(off).unwrap_or(usize::MAX);
                    state.acknowledge(off)?;
                    progress(state.offset(), state.total());
                }
                Ok(_) => state.retry(CodecError::MissingField("off").into(), false)?,
                Err(e) if is_oversize(&e) => {
                    warn!(
                        "Device rejected {}-byte chunk at offset {}: {e}",
                        state.chunk_size(),
                        state.offset()
                    );
                    state.retry(e, true)?;
                }
                Err(e) if e.is_transient() => {
                    warn!("Chunk at offset {} failed: {e}", state.offset());
                    state.retry(e, false)?;
                }
                Err(e) => return Err(state.fail(e)),
            }
        }

        info!(
            "Upload complete: {} bytes in {} exchanges",
            state.total(),
            state.exchanges()
        );
        Ok(state)
    }

    /// Builds the request for the next chunk, shrinking it until the encoded
    /// message fits the MTU.
    fn chunk_request(
        &mut self,
        state: &mut UploadState,
        data: &[u8],
        sha: &[u8],
        options: &UploadOptions,
    ) -> Result<SmpMessage> {
        let seq = self.next_seq();
        loop {
            let range = state.next_range();
            let first = range.start == 0;
            let chunk_len = range.len();

            let request = ImageUploadReq {
                image: first.then_some(options.image),
                len: first.then_some(data.len() as u64),
                off: range.start as u64,
                sha: first.then(|| ByteBuf::from(sha.to_vec())),
                upgrade: (first && options.upgrade).then_some(true),
                data: ByteBuf::from(data[range].to_vec()),
            };
            let message = SmpMessage::request(&request, seq).map_err(|e| state.fail(e.into()))?;

            let size = message.encoded_len();
            if size <= self.mtu {
                return Ok(message);
            }
            debug!("Chunk message of {size} bytes exceeds MTU {}", self.mtu);
            state.limit_chunk(chunk_len.saturating_sub(size - self.mtu))?;
        }
    }
}
