pub mod bounded;
pub mod frame;

pub use bounded::BoundedBytes;
pub use frame::{
    MIN_FRAME_LEN, MessageKind, Payload, SignatureField, Spdu, SpduHeader, VehicleId, decode,
    encode,
};
