use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::trace;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};

const TRANSPORT_BUFFER_SIZE: usize = 1024;

/// Unterminated input kept while waiting for a newline.
const MAX_PENDING_LINE: usize = 4096;

/// Byte-level access to the device link.
///
/// Owns the stream exclusively; dropping the transport closes it.
pub struct Transport<T> {
    stream: T,
    rx_buffer: BytesMut,
    write_timeout: Duration,
}

impl Transport<SerialStream> {
    pub fn open(path: &str, baudrate: u32, write_timeout: Duration) -> Result<Self> {
        let stream = tokio_serial::new(path, baudrate)
            .open_native_async()
            .map_err(|e| Error::Connection(format!("{path}: {e}")))?;
        log::debug!("Opened {path} at {baudrate} baud");
        Ok(Self::new(stream, write_timeout))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Transport<T> {
    pub fn new(stream: T, write_timeout: Duration) -> Self {
        Self {
            stream,
            rx_buffer: BytesMut::with_capacity(TRANSPORT_BUFFER_SIZE),
            write_timeout,
        }
    }

    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX {} bytes", bytes.len());
        let limit = self.write_timeout;
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match timeout(limit, write).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write timed out",
            ))),
        }
    }

    /// Reads up to and including `delimiter`.
    ///
    /// Bytes past the delimiter stay buffered for the next call. Fails with
    /// [`Error::Timeout`] when no delimiter arrives within `limit`.
    pub async fn read_until(&mut self, delimiter: u8, limit: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + limit;
        let mut scanned = 0;

        loop {
            if let Some(pos) = self.rx_buffer[scanned..]
                .iter()
                .position(|b| *b == delimiter)
            {
                let line = self.rx_buffer.split_to(scanned + pos + 1).freeze();
                trace!("RX {} bytes", line.len());
                return Ok(line);
            }
            scanned = self.rx_buffer.len();
            if scanned >= MAX_PENDING_LINE {
                log::debug!("Dropping {scanned} bytes of unterminated input");
                self.rx_buffer.clear();
                scanned = 0;
            }

            self.rx_buffer.reserve(TRANSPORT_BUFFER_SIZE);
            let read = tokio::time::timeout_at(deadline, self.stream.read_buf(&mut self.rx_buffer));
            match read.await {
                Ok(Ok(0)) => return Err(Error::Connection("device closed the link".into())),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(Error::Timeout),
            }
        }
    }

    /// Drops anything received but not yet consumed.
    pub fn discard_input(&mut self) {
        if !self.rx_buffer.is_empty() {
            log::debug!("Discarding {} buffered bytes", self.rx_buffer.len());
            self.rx_buffer.clear();
        }
    }
}

/// Names of the serial ports present on this host.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
