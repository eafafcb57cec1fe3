use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

/// Value written into address gaps of Intel HEX images (erased flash).
const GAP_FILL: u8 = 0xFF;

/// Largest span an Intel HEX image may cover once flattened.
const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// A firmware image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Loads `path`, parsing it as Intel HEX when the extension is `.hex` or
    /// `.ihex` and taking it as a raw binary otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let is_hex = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("hex") || e.eq_ignore_ascii_case("ihex"));

        let image = if is_hex {
            Self::from_hex(&std::fs::read_to_string(path)?)?
        } else {
            Self::from_bytes(std::fs::read(path)?)
        };
        debug!("Loaded {} ({} bytes)", path.display(), image.len());
        Ok(image)
    }

    /// Flattens Intel HEX records into one contiguous image starting at the
    /// lowest address.
    pub fn from_hex(text: &str) -> Result<Self> {
        let mut segments: Vec<(u32, Vec<u8>)> = Vec::new();
        let mut base: u32 = 0;

        for record in ihex::Reader::new(text) {
            match record? {
                ihex::Record::Data { offset, value } => {
                    segments.push((base + offset as u32, value));
                }
                ihex::Record::ExtendedLinearAddress(upper) => base = (upper as u32) << 16,
                ihex::Record::ExtendedSegmentAddress(segment) => base = (segment as u32) << 4,
                ihex::Record::EndOfFile => break,
                _ => {}
            }
        }

        let Some(start) = segments.iter().map(|(addr, _)| *addr).min() else {
            return Err(Error::Configuration("hex file contains no data".into()));
        };
        let end = segments
            .iter()
            .map(|(addr, value)| *addr as usize + value.len())
            .max()
            .unwrap_or(start as usize);

        let span = end - start as usize;
        if span > MAX_IMAGE_SIZE {
            return Err(Error::Configuration(format!(
                "hex file spans {span} bytes, more than {MAX_IMAGE_SIZE}"
            )));
        }

        let mut data = vec![GAP_FILL; span];
        for (addr, value) in segments {
            let at = (addr - start) as usize;
            data[at..at + value.len()].copy_from_slice(&value);
        }
        Ok(Self { data })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
