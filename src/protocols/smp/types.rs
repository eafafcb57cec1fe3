use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpOp {
    Read = 0,
    ReadRsp = 1,
    Write = 2,
    WriteRsp = 3,
}

impl SmpOp {
    /// Operation a device answers this request operation with.
    pub fn response(self) -> Self {
        match self {
            Self::Read | Self::ReadRsp => Self::ReadRsp,
            Self::Write | Self::WriteRsp => Self::WriteRsp,
        }
    }
}

impl TryFrom<u8> for SmpOp {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Read),
            1 => Ok(Self::ReadRsp),
            2 => Ok(Self::Write),
            3 => Ok(Self::WriteRsp),
            _ => Err(CodecError::InvalidOp(value)),
        }
    }
}

pub mod group {
    pub const OS: u16 = 0;
    pub const IMAGE: u16 = 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsCommand {
    Echo = 0,
    Reset = 5,
    McuMgrParams = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageCommand {
    State = 0,
    Upload = 1,
    Erase = 5,
}

/// MCUmgr management return codes.
pub mod rc {
    pub const OK: i64 = 0;
    pub const UNKNOWN: i64 = 1;
    pub const NO_MEMORY: i64 = 2;
    pub const INVALID: i64 = 3;
    pub const TIMEOUT: i64 = 4;
    pub const NO_ENTRY: i64 = 5;
    pub const BAD_STATE: i64 = 6;
    pub const MSG_SIZE: i64 = 7;
    pub const NOT_SUPPORTED: i64 = 8;
    pub const CORRUPT: i64 = 9;
    pub const BUSY: i64 = 10;
}

/// Status fields every response may carry.
///
/// SMP v1 devices answer with `rc` (and sometimes `rsn`), SMP v2 devices
/// with a nested `err` map.
#[derive(Debug, Default, Deserialize)]
pub struct StatusBody {
    pub rc: Option<i64>,
    pub rsn: Option<String>,
    pub err: Option<GroupError>,
}

#[derive(Debug, Deserialize)]
pub struct GroupError {
    pub group: u16,
    pub rc: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmptyRsp {}

#[derive(Debug, Serialize)]
pub struct EchoReq {
    pub d: String,
}

#[derive(Debug, Deserialize)]
pub struct EchoRsp {
    pub r: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ResetReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
}

#[derive(Debug, Default, Serialize)]
pub struct ParamsReq {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ParamsRsp {
    pub buf_size: u32,
    pub buf_count: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct ImageStateReq {}

#[derive(Debug, Serialize)]
pub struct ImageSetStateReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<ByteBuf>,
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImageStateRsp {
    pub images: Vec<ImageStateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageStateEntry {
    pub image: Option<u32>,
    pub slot: u32,
    pub version: String,
    pub hash: Option<ByteBuf>,
    #[serde(default)]
    pub bootable: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Serialize)]
pub struct ImageUploadReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<u32>,
    pub data: ByteBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub len: Option<u64>,
    pub off: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<ByteBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ImageUploadRsp {
    pub off: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImageEraseReq {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
}
