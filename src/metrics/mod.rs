pub mod session;

pub use session::{SessionCounters, SessionMetrics};
