pub mod serial;
pub mod smp;

use serde::de::DeserializeOwned;
use serde::Serialize;

use self::smp::SmpOp;

/// A typed SMP request body.
///
/// Ties the CBOR payload of a request to the header fields that address it
/// and to the body the device answers with.
pub trait SmpCommand: Serialize {
    type Response: DeserializeOwned;

    const OP: SmpOp;
    const GROUP: u16;
    const ID: u8;
}
