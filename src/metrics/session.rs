use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::VehicleId;
use crate::error::ErrorKind;
use crate::vehicle::VerificationOutcome;

/// Live counters shared by a vehicle's transmit and receive tasks.
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub bsm_sent: AtomicU64,
    pub learn_requests_sent: AtomicU64,
    pub learn_responses_sent: AtomicU64,
    pub transport_errors: AtomicU64,
    pub accepted: AtomicU64,
    pub pending_learning: AtomicU64,
    pub parse_errors: AtomicU64,
    pub invalid_signature: AtomicU64,
    pub malformed_signature: AtomicU64,
    pub stale_or_future: AtomicU64,
    pub invalid_certificate: AtomicU64,
    pub malformed_payload: AtomicU64,
    pub certificates_learned: AtomicU64,
    pub learning_failures: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, outcome: &VerificationOutcome) {
        let counter = match outcome {
            VerificationOutcome::Accepted(_) => &self.accepted,
            VerificationOutcome::PendingLearning { .. } => &self.pending_learning,
            VerificationOutcome::Rejected { reason, .. } => match reason {
                ErrorKind::Parse(_) => &self.parse_errors,
                ErrorKind::InvalidSignature => &self.invalid_signature,
                ErrorKind::MalformedSignature { .. } => &self.malformed_signature,
                ErrorKind::StaleOrFutureMessage { .. } => &self.stale_or_future,
                ErrorKind::InvalidCertificate(_) => &self.invalid_certificate,
                ErrorKind::MalformedPayload(_) | ErrorKind::PayloadTooLarge { .. } => {
                    &self.malformed_payload
                }
                ErrorKind::Transport(_) => &self.transport_errors,
                ErrorKind::TraceExhausted { .. }
                | ErrorKind::Provisioning(_)
                | ErrorKind::Config(_) => return,
            },
        };
        Self::bump(counter);
    }

    pub fn snapshot(&self, vehicle_id: VehicleId) -> SessionMetrics {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionMetrics {
            timestamp: Utc::now().to_rfc3339(),
            vehicle_id,
            bsm_sent: load(&self.bsm_sent),
            learn_requests_sent: load(&self.learn_requests_sent),
            learn_responses_sent: load(&self.learn_responses_sent),
            transport_errors: load(&self.transport_errors),
            accepted: load(&self.accepted),
            pending_learning: load(&self.pending_learning),
            parse_errors: load(&self.parse_errors),
            invalid_signature: load(&self.invalid_signature),
            malformed_signature: load(&self.malformed_signature),
            stale_or_future: load(&self.stale_or_future),
            invalid_certificate: load(&self.invalid_certificate),
            malformed_payload: load(&self.malformed_payload),
            certificates_learned: load(&self.certificates_learned),
            learning_failures: load(&self.learning_failures),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub timestamp: String,
    pub vehicle_id: VehicleId,
    pub bsm_sent: u64,
    pub learn_requests_sent: u64,
    pub learn_responses_sent: u64,
    pub transport_errors: u64,
    pub accepted: u64,
    pub pending_learning: u64,
    pub parse_errors: u64,
    pub invalid_signature: u64,
    pub malformed_signature: u64,
    pub stale_or_future: u64,
    pub invalid_certificate: u64,
    pub malformed_payload: u64,
    pub certificates_learned: u64,
    pub learning_failures: u64,
}

impl SessionMetrics {
    pub fn rejected(&self) -> u64 {
        self.parse_errors
            + self.invalid_signature
            + self.malformed_signature
            + self.stale_or_future
            + self.invalid_certificate
            + self.malformed_payload
    }

    pub fn print_report(&self) {
        println!("{}", self);
    }

    /// Appends one row, writing the header only when the file is new.
    pub fn save_to_csv(&self, filename: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let filename = filename.as_ref();
        let file_exists = filename.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(filename)?;

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(!file_exists)
            .from_writer(file);
        wtr.serialize(self)?;
        wtr.flush()?;
        Ok(())
    }
}

impl fmt::Display for SessionMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔═══════════════════════════════════════════════════════╗")?;
        writeln!(f, "║ Session report for {:<34} ║", self.vehicle_id.to_string())?;
        writeln!(f, "╠═══════════════════════════════════════════════════════╣")?;
        writeln!(f, "║ Timestamp: {:<42} ║", self.timestamp)?;
        writeln!(f, "║                                                       ║")?;
        writeln!(f, "║ Transmit                                              ║")?;
        writeln!(f, "║    → BSMs sent:            {:<26} ║", self.bsm_sent)?;
        writeln!(f, "║    → Learn requests sent:  {:<26} ║", self.learn_requests_sent)?;
        writeln!(f, "║    → Learn responses sent: {:<26} ║", self.learn_responses_sent)?;
        writeln!(f, "║    → Transport errors:     {:<26} ║", self.transport_errors)?;
        writeln!(f, "║                                                       ║")?;
        writeln!(f, "║ Receive                                               ║")?;
        writeln!(f, "║    → Accepted:             {:<26} ║", self.accepted)?;
        writeln!(f, "║    → Pending learning:     {:<26} ║", self.pending_learning)?;
        writeln!(f, "║    → Rejected:             {:<26} ║", self.rejected())?;
        writeln!(f, "║        framing:            {:<26} ║", self.parse_errors)?;
        writeln!(f, "║        invalid signature:  {:<26} ║", self.invalid_signature)?;
        writeln!(f, "║        malformed sig:      {:<26} ║", self.malformed_signature)?;
        writeln!(f, "║        stale/future:       {:<26} ║", self.stale_or_future)?;
        writeln!(f, "║        bad certificate:    {:<26} ║", self.invalid_certificate)?;
        writeln!(f, "║        bad payload:        {:<26} ║", self.malformed_payload)?;
        writeln!(f, "║                                                       ║")?;
        writeln!(f, "║ Learning                                              ║")?;
        writeln!(f, "║    → Certificates learned: {:<26} ║", self.certificates_learned)?;
        writeln!(f, "║    → Learning failures:    {:<26} ║", self.learning_failures)?;
        write!(f, "╚═══════════════════════════════════════════════════════╝")
    }
}
