use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::CodecError;
use crate::protocols::smp::ImageStateEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub device: String,
    pub baudrate: u32,
    /// Wait for the first response of an operation.
    pub initial_timeout: Duration,
    /// Wait for every later response of the same operation.
    pub subsequent_timeout: Duration,
    pub write_timeout: Duration,
    pub nb_retry: u32,
    pub linelength: usize,
    /// Largest SMP message (header + payload) the device accepts.
    pub mtu: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageFlags {
    pub bootable: bool,
    pub pending: bool,
    pub confirmed: bool,
    pub active: bool,
    pub permanent: bool,
}

/// One firmware slot as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub image: Option<u32>,
    pub slot: u32,
    pub version: String,
    pub hash: Vec<u8>,
    pub flags: ImageFlags,
}

impl TryFrom<ImageStateEntry> for ImageDescriptor {
    type Error = CodecError;

    fn try_from(entry: ImageStateEntry) -> Result<Self, Self::Error> {
        let hash = entry.hash.ok_or(CodecError::MissingField("hash"))?;
        Ok(Self {
            image: entry.image,
            slot: entry.slot,
            version: entry.version,
            hash: hash.into_vec(),
            flags: ImageFlags {
                bootable: entry.bootable,
                pending: entry.pending,
                confirmed: entry.confirmed,
                active: entry.active,
                permanent: entry.permanent,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuMgrParams {
    pub buf_size: u32,
    pub buf_count: u32,
}

/// Per-upload settings.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    /// Target image number, sent with the first chunk.
    pub image: u32,
    /// Ask the device to refuse images not newer than the running one.
    pub upgrade: bool,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, image: u32) -> Self {
        self.image = image;
        self
    }

    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
