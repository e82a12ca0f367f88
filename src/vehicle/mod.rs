pub mod outcome;
pub mod receive;
pub mod session;
pub mod sink;
pub mod transmit;

pub use outcome::{AcceptedBsm, VerificationOutcome};
pub use receive::Receiver;
pub use session::{SessionConfig, SessionHandle, VehicleSession};
pub use sink::{ChannelSink, JsonSink, LogSink, NullSink, PresentationSink, outcome_record};
pub use transmit::{TracePolicy, Transmitter, now_us, seal};
