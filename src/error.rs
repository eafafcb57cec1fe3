use thiserror::Error;

/// Errors raised while turning serial lines back into SMP packets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Continuation frame without a start frame")]
    OrphanContinuation,

    #[error("Invalid base64 in frame: {0}")]
    InvalidEncoding(String),

    #[error("Packet too short: {0} bytes")]
    TooShort(usize),

    #[error("Length mismatch: declared {declared}, received {received}")]
    LengthMismatch { declared: usize, received: usize },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("Packet of {0} bytes does not fit the length field")]
    PacketTooLarge(usize),
}

/// Errors raised while encoding or decoding SMP headers and payloads.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("SMP message too short: {0} bytes")]
    TooShort(usize),

    #[error("SMP length mismatch: header declares {declared} bytes, received {received}")]
    LengthMismatch { declared: usize, received: usize },

    #[error("Invalid SMP operation: {0}")]
    InvalidOp(u8),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Missing field `{0}` in response")]
    MissingField(&'static str),

    #[error("CBOR error: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout")]
    Timeout,

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Device returned rc={rc} (group {group}){}", fmt_reason(.reason))]
    Protocol {
        rc: i64,
        group: u16,
        reason: Option<String>,
    },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Upload failed at offset {offset}: {source}")]
    Upload {
        offset: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hex file error: {0}")]
    HexFile(#[from] ihex::ReaderError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl Error {
    /// Errors that a fresh attempt of the same request may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout | Error::Frame(_) | Error::Codec(_))
    }

    /// Last offset the device acknowledged, when this is an upload failure.
    pub fn upload_offset(&self) -> Option<usize> {
        match self {
            Error::Upload { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

fn fmt_reason(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
}

impl From<tokio_serial::Error> for Error {
    fn from(e: tokio_serial::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
