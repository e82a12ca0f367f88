use serde_json::json;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::outcome::VerificationOutcome;
use crate::codec::VehicleId;

/// Observer of verification outcomes (console, GUI bridge, tests).
///
/// Called from the receive task; implementations must not block for long.
pub trait PresentationSink: Send + Sync {
    fn present(&self, receiver: VehicleId, outcome: &VerificationOutcome);
}

/// Headless runs.
pub struct NullSink;

impl PresentationSink for NullSink {
    fn present(&self, _receiver: VehicleId, _outcome: &VerificationOutcome) {}
}

pub struct LogSink;

impl PresentationSink for LogSink {
    fn present(&self, receiver: VehicleId, outcome: &VerificationOutcome) {
        match outcome {
            VerificationOutcome::Accepted(accepted) => {
                let bsm = &accepted.bsm;
                log::info!(
                    "{} <- {} #{}: lat {:.6} lon {:.6} elev {:.1} speed {:.2} heading {:.1} (valid, {}us)",
                    receiver,
                    bsm.vehicle_id,
                    bsm.sequence,
                    bsm.latitude,
                    bsm.longitude,
                    bsm.elevation,
                    bsm.speed,
                    bsm.heading,
                    accepted.elapsed_us()
                );
            }
            VerificationOutcome::Rejected { sender, reason } => match sender {
                Some(sender) => log::warn!("{} <- {}: rejected: {}", receiver, sender, reason),
                None => log::warn!("{}: dropped frame: {}", receiver, reason),
            },
            VerificationOutcome::PendingLearning { sender } => {
                log::info!("{} <- {}: unknown certificate, learning", receiver, sender);
            }
        }
    }
}

/// One JSON object per line, in the shape the display front-ends consume.
pub struct JsonSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub fn outcome_record(receiver: VehicleId, outcome: &VerificationOutcome) -> serde_json::Value {
    match outcome {
        VerificationOutcome::Accepted(accepted) => json!({
            "receiver": receiver.0,
            "id": accepted.bsm.vehicle_id.0,
            "sequence": accepted.bsm.sequence,
            "latitude": accepted.bsm.latitude,
            "longitude": accepted.bsm.longitude,
            "heading": accepted.bsm.heading,
            "speed": accepted.bsm.speed,
            "sig": true,
            "elapsed_us": accepted.elapsed_us(),
            "recent": true,
            "status": "accepted",
        }),
        VerificationOutcome::Rejected { sender, reason } => json!({
            "receiver": receiver.0,
            "id": sender.map(|s| s.0),
            "sig": false,
            "recent": !matches!(reason, crate::error::ErrorKind::StaleOrFutureMessage { .. }),
            "status": "rejected",
            "reason": reason.to_string(),
        }),
        VerificationOutcome::PendingLearning { sender } => json!({
            "receiver": receiver.0,
            "id": sender.0,
            "status": "learning",
        }),
    }
}

impl<W: Write + Send> PresentationSink for JsonSink<W> {
    fn present(&self, receiver: VehicleId, outcome: &VerificationOutcome) {
        let record = outcome_record(receiver, outcome);
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        if let Err(e) = writeln!(out, "{}", record) {
            log::warn!("presentation sink write failed: {}", e);
        }
    }
}

/// Forwards outcomes into a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(VehicleId, VerificationOutcome)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(VehicleId, VerificationOutcome)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn present(&self, receiver: VehicleId, outcome: &VerificationOutcome) {
        // A dropped consumer must not affect the session.
        let _ = self.tx.send((receiver, outcome.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsm::BsmPayload;
    use crate::error::ErrorKind;
    use crate::vehicle::AcceptedBsm;

    fn accepted() -> VerificationOutcome {
        VerificationOutcome::Accepted(AcceptedBsm {
            bsm: BsmPayload {
                vehicle_id: VehicleId(2),
                sequence: 5,
                latitude: 42.0,
                longitude: -83.0,
                elevation: 0.0,
                speed: 10.0,
                heading: 90.0,
            },
            generated_at_us: 1_000,
            received_at_us: 1_250,
        })
    }

    #[test]
    fn json_sink_writes_one_line_per_outcome() {
        let sink = JsonSink::new(Vec::new());
        sink.present(VehicleId(1), &accepted());
        sink.present(
            VehicleId(1),
            &VerificationOutcome::rejected(VehicleId(2), ErrorKind::InvalidSignature),
        );

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 2);
        assert_eq!(lines[0]["sig"], true);
        assert_eq!(lines[0]["elapsed_us"], 250);
        assert_eq!(lines[1]["status"], "rejected");
        assert_eq!(lines[1]["sig"], false);
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.present(VehicleId(1), &accepted());
        let (receiver, outcome) = rx.recv().await.unwrap();
        assert_eq!(receiver, VehicleId(1));
        assert!(outcome.is_accepted());
    }
}
