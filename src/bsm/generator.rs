use serde::Serialize;

use super::trace::MobilityTrace;
use crate::codec::VehicleId;
use crate::error::{ErrorKind, Result};

pub const BSM_PAYLOAD_LEN: usize = 28;

/// Basic Safety Message content carried by a BSM SPDU.
///
/// Layout (big-endian): vehicle id u32, sequence u32, then latitude,
/// longitude, elevation, speed and heading as f32.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BsmPayload {
    pub vehicle_id: VehicleId,
    pub sequence: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub elevation: f32,
    pub speed: f32,
    pub heading: f32,
}

impl BsmPayload {
    pub fn to_bytes(&self) -> [u8; BSM_PAYLOAD_LEN] {
        let mut out = [0u8; BSM_PAYLOAD_LEN];
        out[0..4].copy_from_slice(&self.vehicle_id.0.to_be_bytes());
        out[4..8].copy_from_slice(&self.sequence.to_be_bytes());
        let fields = [
            self.latitude,
            self.longitude,
            self.elevation,
            self.speed,
            self.heading,
        ];
        for (i, value) in fields.iter().enumerate() {
            let at = 8 + i * 4;
            out[at..at + 4].copy_from_slice(&value.to_be_bytes());
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; BSM_PAYLOAD_LEN] = bytes.try_into().map_err(|_| {
            ErrorKind::MalformedPayload(format!(
                "BSM payload is {} bytes, expected {}",
                bytes.len(),
                BSM_PAYLOAD_LEN
            ))
        })?;

        let word = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        let float = |at: usize| f32::from_be_bytes(word(at));

        Ok(Self {
            vehicle_id: VehicleId(u32::from_be_bytes(word(0))),
            sequence: u32::from_be_bytes(word(4)),
            latitude: float(8),
            longitude: float(12),
            elevation: float(16),
            speed: float(20),
            heading: float(24),
        })
    }
}

/// Maps the trace sample at `timestep` to a BSM. Pure; the caller owns the
/// wrap-or-stop policy for running off the end of the trace.
pub fn build(vehicle_id: VehicleId, trace: &MobilityTrace, timestep: u64) -> Result<BsmPayload> {
    let sample = trace.sample(timestep).ok_or(ErrorKind::TraceExhausted {
        timestep,
        len: trace.len(),
    })?;

    Ok(BsmPayload {
        vehicle_id,
        sequence: timestep as u32,
        latitude: sample.latitude,
        longitude: sample.longitude,
        elevation: sample.elevation,
        speed: sample.speed,
        heading: sample.heading,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsm::trace::TraceSample;

    fn trace() -> MobilityTrace {
        MobilityTrace::new(vec![
            TraceSample {
                latitude: 42.5,
                longitude: -83.1,
                elevation: 190.0,
                speed: 12.0,
                heading: 45.0,
            },
            TraceSample {
                latitude: 42.6,
                longitude: -83.2,
                elevation: 191.0,
                speed: 12.5,
                heading: 46.0,
            },
        ])
    }

    #[test]
    fn builds_from_indexed_sample() {
        let bsm = build(VehicleId(3), &trace(), 1).unwrap();
        assert_eq!(bsm.vehicle_id, VehicleId(3));
        assert_eq!(bsm.sequence, 1);
        assert_eq!(bsm.latitude, 42.6);
        assert_eq!(bsm.heading, 46.0);
    }

    #[test]
    fn past_the_end_is_exhausted() {
        assert_eq!(
            build(VehicleId(3), &trace(), 2),
            Err(ErrorKind::TraceExhausted {
                timestep: 2,
                len: 2
            })
        );
    }

    #[test]
    fn payload_bytes_decode_back() {
        let bsm = build(VehicleId(9), &trace(), 0).unwrap();
        assert_eq!(BsmPayload::from_bytes(&bsm.to_bytes()).unwrap(), bsm);
    }

    #[test]
    fn wrong_length_is_malformed() {
        assert!(matches!(
            BsmPayload::from_bytes(&[0u8; 27]),
            Err(ErrorKind::MalformedPayload(_))
        ));
    }
}
