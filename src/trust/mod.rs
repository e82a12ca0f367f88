pub mod freshness;
pub mod learning;

pub use freshness::FreshnessWindow;
pub use learning::{
    LearningPolicy, LearningProtocol, PeerStatus, PendingMessage, RetryStep, TimeoutSweep,
    UnknownSenderStep,
};
