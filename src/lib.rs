//! MCUmgr Client Library
//!
//! This library manages firmware images on embedded devices speaking the
//! MCUmgr Simple Management Protocol (SMP) over a serial line.
//!
//! # Features
//! - Image listing, test/confirm, erase and device reset
//! - Chunked image upload with adaptive chunk size and resumable failures
//! - Raw binary and Intel HEX image files
//! - Tolerates device log output interleaved with responses
//!
//! # Protocol Stack
//! - Serial framing (base64 lines, length prefix, CRC-16)
//! - SMP header and CBOR payloads
//!
//! # Examples
//!
//! ## Listing and Uploading
//! ```no_run
//! use mcumgr_lib_rs::{Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> mcumgr_lib_rs::Result<()> {
//!     let config = SessionConfig::new()
//!         .with_device("/dev/ttyUSB0")
//!         .with_baudrate(576000);
//!
//!     let mut session = Session::open(config)?;
//!     for image in session.list().await? {
//!         println!("slot {}: {} {:?}", image.slot, image.version, image.flags);
//!     }
//!
//!     let firmware = std::fs::read("zephyr.signed.bin")?;
//!     session.upload(&firmware).await?;
//!     session.reset().await
//! }
//! ```
//!
//! ## Resuming an Interrupted Upload
//! ```no_run
//! use mcumgr_lib_rs::{Error, Session, SessionConfig, UploadOptions};
//!
//! #[tokio::main]
//! async fn main() -> mcumgr_lib_rs::Result<()> {
//!     let mut session = Session::open(SessionConfig::new().with_device("/dev/ttyACM0"))?;
//!     let options = UploadOptions::new().with_image(0);
//!
//!     match session
//!         .upload_file("app.hex", &options, |off, total| println!("{off}/{total}"))
//!         .await
//!     {
//!         Err(Error::Upload { offset, source }) => {
//!             eprintln!("stopped at {offset}: {source}");
//!             Ok(())
//!         }
//!         other => other.map(|_| ()),
//!     }
//! }
//! ```

mod error;
mod image;
pub mod protocols;
mod session;
mod transport;

pub use error::{CodecError, Error, FrameError, Result};
pub use image::FirmwareImage;
pub use session::{
    ImageDescriptor, ImageFlags, McuMgrParams, Session, SessionConfig, UploadOptions,
    UploadPhase, UploadState, MIN_CHUNK_SIZE,
};
pub use transport::{available_ports, Transport};

/// Opens a serial session with the given configuration
pub fn open(config: SessionConfig) -> Result<Session<tokio_serial::SerialStream>> {
    Session::open(config)
}

/// Creates a new session configuration for `device` with default settings
pub fn new_config(device: impl Into<String>) -> SessionConfig {
    SessionConfig::new().with_device(device)
}
