pub mod generator;
pub mod trace;

pub use generator::{BSM_PAYLOAD_LEN, BsmPayload, build};
pub use trace::{MobilityTrace, TraceSample, load_trace};
