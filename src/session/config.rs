use std::time::Duration;

use super::types::SessionConfig;
use crate::error::{Error, Result};

/// Smallest line the serial framing can carry: marker, one base64 group, newline.
const MIN_LINE_LENGTH: usize = 8;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baudrate: 115200,
            initial_timeout: Duration::from_secs(60),
            subsequent_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_secs(5),
            nb_retry: 4,
            linelength: 128,
            mtu: 1024,
            chunk_size: 512,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_baudrate(mut self, baudrate: u32) -> Self {
        self.baudrate = baudrate;
        self
    }

    pub fn with_initial_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    pub fn with_subsequent_timeout(mut self, timeout: Duration) -> Self {
        self.subsequent_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, nb_retry: u32) -> Self {
        self.nb_retry = nb_retry;
        self
    }

    pub fn with_line_length(mut self, linelength: usize) -> Self {
        self.linelength = linelength;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.baudrate == 0 {
            return Err(Error::Configuration("baud rate must be non-zero".into()));
        }
        if self.linelength < MIN_LINE_LENGTH {
            return Err(Error::Configuration(format!(
                "line length must be at least {MIN_LINE_LENGTH}"
            )));
        }
        if self.chunk_size == 0 {
            return Err(Error::Configuration("chunk size must be non-zero".into()));
        }
        if self.mtu <= crate::protocols::smp::SMP_HEADER_LEN {
            return Err(Error::Configuration("MTU too small for an SMP header".into()));
        }
        if self.initial_timeout.is_zero() || self.subsequent_timeout.is_zero() {
            return Err(Error::Configuration("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Like [`validate`](Self::validate), additionally requiring a device path.
    pub fn validate_serial(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(Error::Configuration("device must be specified".into()));
        }
        self.validate()
    }
}
