use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bsm::{self, MobilityTrace};
use crate::codec::{MessageKind, Payload, Spdu, SpduHeader, VehicleId};
use crate::crypto::KeyMaterial;
use crate::error::Result;
use crate::metrics::SessionCounters;
use crate::network::DatagramSender;

/// What the transmit loop does when the timestep runs past the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TracePolicy {
    /// Start over from the first sample.
    #[default]
    Wrap,
    /// End the transmit loop.
    Stop,
}

pub fn now_us() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// Signs `payload` with the vehicle's message-signing key and assembles the SPDU.
pub fn seal(
    keys: &KeyMaterial,
    kind: MessageKind,
    destination: VehicleId,
    payload: Payload,
    generated_at_us: u64,
) -> Result<Spdu> {
    let header = SpduHeader {
        kind,
        sender: keys.vehicle_id,
        destination,
        generated_at_us,
    };
    let signature = keys.message_key().sign(&header.canonical_bytes(&payload))?;
    Ok(Spdu {
        header,
        payload,
        signature: signature.widen(),
    })
}

pub struct Transmitter {
    keys: Arc<KeyMaterial>,
    trace: Arc<MobilityTrace>,
    policy: TracePolicy,
    sender: Arc<dyn DatagramSender>,
    counters: Arc<SessionCounters>,
}

impl Transmitter {
    pub fn new(
        keys: Arc<KeyMaterial>,
        trace: Arc<MobilityTrace>,
        policy: TracePolicy,
        sender: Arc<dyn DatagramSender>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            keys,
            trace,
            policy,
            sender,
            counters,
        }
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.keys.vehicle_id
    }

    /// Builds the signed BSM SPDU for `timestep`, applying the trace policy.
    pub fn build_bsm_spdu(&self, timestep: u64, generated_at_us: u64) -> Result<Spdu> {
        let index = match self.policy {
            TracePolicy::Wrap if !self.trace.is_empty() => timestep % self.trace.len() as u64,
            _ => timestep,
        };
        let mut bsm = bsm::build(self.keys.vehicle_id, &self.trace, index)?;
        bsm.sequence = timestep as u32;

        let payload = Payload::from_slice(&bsm.to_bytes())?;
        seal(
            &self.keys,
            MessageKind::Bsm,
            VehicleId::BROADCAST,
            payload,
            generated_at_us,
        )
    }

    /// One transmit tick. `TraceExhausted` is returned to the loop; transport
    /// failures are counted and swallowed since BSMs are fire-and-forget.
    pub async fn transmit(&self, timestep: u64) -> Result<()> {
        let spdu = self.build_bsm_spdu(timestep, now_us())?;
        let frame = spdu.encode();
        log::trace!("{} tx {}", self.keys.vehicle_id, hex::encode(&frame));

        match self.sender.send(frame).await {
            Ok(()) => SessionCounters::bump(&self.counters.bsm_sent),
            Err(e) => {
                SessionCounters::bump(&self.counters.transport_errors);
                log::warn!("{} failed to send BSM #{}: {}", self.keys.vehicle_id, timestep, e);
            }
        }
        Ok(())
    }
}
