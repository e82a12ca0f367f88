use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

/// Accepted offset between a message's generation time and its local
/// receive time. Both edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessWindow {
    /// How far in the past a generation time may lie.
    pub max_age_us: u64,
    /// How far in the future a generation time may lie (sender clock skew).
    pub max_future_skew_us: u64,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            max_age_us: 1_000_000,
            max_future_skew_us: 100_000,
        }
    }
}

impl FreshnessWindow {
    pub fn check(&self, generated_at_us: u64, received_at_us: u64) -> Result<()> {
        let fresh = if received_at_us >= generated_at_us {
            received_at_us - generated_at_us <= self.max_age_us
        } else {
            generated_at_us - received_at_us <= self.max_future_skew_us
        };

        if fresh {
            Ok(())
        } else {
            Err(ErrorKind::StaleOrFutureMessage {
                generated_at_us,
                received_at_us,
            })
        }
    }
}
