use serde::Serialize;

use crate::bsm::BsmPayload;
use crate::codec::VehicleId;
use crate::error::ErrorKind;

/// A BSM that passed signature, freshness and payload checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedBsm {
    pub bsm: BsmPayload,
    pub generated_at_us: u64,
    pub received_at_us: u64,
}

impl AcceptedBsm {
    /// Signed difference between receive and generation time.
    pub fn elapsed_us(&self) -> i64 {
        self.received_at_us as i64 - self.generated_at_us as i64
    }
}

/// Result of processing one inbound message. Only `Accepted` carries
/// content the application may act on.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Accepted(AcceptedBsm),
    Rejected {
        /// `None` when the frame could not be decoded far enough to tell.
        sender: Option<VehicleId>,
        reason: ErrorKind,
    },
    PendingLearning {
        sender: VehicleId,
    },
}

impl VerificationOutcome {
    pub fn rejected(sender: VehicleId, reason: ErrorKind) -> Self {
        Self::Rejected {
            sender: Some(sender),
            reason,
        }
    }

    pub fn sender(&self) -> Option<VehicleId> {
        match self {
            Self::Accepted(accepted) => Some(accepted.bsm.vehicle_id),
            Self::Rejected { sender, .. } => *sender,
            Self::PendingLearning { sender } => Some(*sender),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}
