use p256::ecdsa::VerifyingKey;
use std::sync::Arc;
use tokio::time::Instant;

use super::outcome::{AcceptedBsm, VerificationOutcome};
use super::sink::PresentationSink;
use super::transmit::{now_us, seal};
use crate::bsm::BsmPayload;
use crate::codec::{self, MessageKind, Payload, Spdu, VehicleId};
use crate::crypto::{KeyMaterial, ecdsa};
use crate::error::{CertificateRejection, ErrorKind, Result};
use crate::metrics::SessionCounters;
use crate::network::DatagramSender;
use crate::pki::{Certificate, CertificateStore, TrustAnchors};
use crate::trust::{
    FreshnessWindow, LearningPolicy, LearningProtocol, PeerStatus, PendingMessage, RetryStep,
    UnknownSenderStep,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    LearnRequest { target: VehicleId },
    LearnResponse { requester: VehicleId },
}

#[derive(Debug, Default)]
struct Reaction {
    outcomes: Vec<VerificationOutcome>,
    replies: Vec<Reply>,
}

impl Reaction {
    fn outcome(outcome: VerificationOutcome) -> Self {
        Self {
            outcomes: vec![outcome],
            replies: Vec::new(),
        }
    }

    fn reply(reply: Reply) -> Self {
        Self {
            outcomes: Vec::new(),
            replies: vec![reply],
        }
    }
}

/// Receive side of a vehicle session. Owns the certificate store and the
/// learning state; nothing else mutates them.
pub struct Receiver {
    keys: Arc<KeyMaterial>,
    store: CertificateStore,
    learning: LearningProtocol,
    freshness: FreshnessWindow,
    sender: Arc<dyn DatagramSender>,
    sink: Arc<dyn PresentationSink>,
    counters: Arc<SessionCounters>,
}

impl Receiver {
    pub fn new(
        keys: Arc<KeyMaterial>,
        anchors: Arc<TrustAnchors>,
        freshness: FreshnessWindow,
        learning: LearningPolicy,
        sender: Arc<dyn DatagramSender>,
        sink: Arc<dyn PresentationSink>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            keys,
            store: CertificateStore::new(anchors),
            learning: LearningProtocol::new(learning),
            freshness,
            sender,
            sink,
            counters,
        }
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.keys.vehicle_id
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }

    pub fn peer_status(&self, peer: VehicleId) -> PeerStatus {
        if self.store.lookup(peer).is_some() {
            PeerStatus::Known
        } else {
            self.learning.status(peer)
        }
    }

    /// Drops the stored certificate for `peer`; its next BSM starts learning again.
    pub fn invalidate(&mut self, peer: VehicleId) -> Option<Certificate> {
        self.learning.forget(peer);
        self.store.invalidate(peer)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.learning.next_deadline()
    }

    pub async fn handle_datagram(&mut self, bytes: &[u8]) -> Vec<VerificationOutcome> {
        self.handle_datagram_at(bytes, now_us(), Instant::now()).await
    }

    /// Processes one datagram received at `received_at_us` (wall clock) and
    /// `now` (monotonic, for learning deadlines).
    pub async fn handle_datagram_at(
        &mut self,
        bytes: &[u8],
        received_at_us: u64,
        now: Instant,
    ) -> Vec<VerificationOutcome> {
        let reaction = self.process(bytes, received_at_us, now);
        self.finish(reaction).await
    }

    pub async fn handle_timeouts(&mut self, now: Instant) -> Vec<VerificationOutcome> {
        let sweep = self.learning.poll_timeouts(now);
        let mut reaction = Reaction::default();

        for peer in sweep.resend {
            log::debug!("{} re-requesting certificate of {}", self.vehicle_id(), peer);
            reaction.replies.push(Reply::LearnRequest { target: peer });
        }
        for (peer, attempts) in sweep.failed {
            SessionCounters::bump(&self.counters.learning_failures);
            log::warn!(
                "{} gave up learning the certificate of {} after {} requests",
                self.vehicle_id(),
                peer,
                attempts
            );
            reaction.outcomes.push(VerificationOutcome::rejected(
                peer,
                CertificateRejection::LearningFailed { attempts }.into(),
            ));
        }
        self.finish(reaction).await
    }

    fn process(&mut self, bytes: &[u8], received_at_us: u64, now: Instant) -> Reaction {
        log::trace!("{} rx {}", self.vehicle_id(), hex::encode(bytes));

        let spdu = match codec::decode(bytes) {
            Ok(spdu) => spdu,
            Err(e) => {
                return Reaction::outcome(VerificationOutcome::Rejected {
                    sender: None,
                    reason: e.into(),
                });
            }
        };

        // Own broadcasts come back on a shared medium.
        if spdu.header.sender == self.vehicle_id() {
            return Reaction::default();
        }

        match spdu.header.kind {
            MessageKind::Bsm => self.on_bsm(
                PendingMessage {
                    spdu,
                    received_at_us,
                },
                now,
            ),
            MessageKind::LearnRequest => self.on_learn_request(&spdu, received_at_us),
            MessageKind::LearnResponse => self.on_learn_response(&spdu, received_at_us, now),
        }
    }

    fn on_bsm(&mut self, message: PendingMessage, now: Instant) -> Reaction {
        let sender = message.spdu.header.sender;
        if let Some(certificate) = self.store.lookup(sender) {
            return Reaction::outcome(self.verify_bsm(&message, &certificate.verification_key));
        }

        match self.learning.on_unknown_sender(message, now) {
            UnknownSenderStep::SendLearnRequest => {
                log::info!(
                    "{} has no certificate for {}, sending learn request",
                    self.vehicle_id(),
                    sender
                );
                Reaction {
                    outcomes: vec![VerificationOutcome::PendingLearning { sender }],
                    replies: vec![Reply::LearnRequest { target: sender }],
                }
            }
            UnknownSenderStep::Buffered => {
                Reaction::outcome(VerificationOutcome::PendingLearning { sender })
            }
            UnknownSenderStep::Abandoned { attempts } => {
                Reaction::outcome(VerificationOutcome::rejected(
                    sender,
                    CertificateRejection::LearningFailed { attempts }.into(),
                ))
            }
            UnknownSenderStep::Saturated { outstanding } => {
                log::debug!(
                    "{} dropping BSM from {}: {} certificates outstanding",
                    self.vehicle_id(),
                    sender,
                    outstanding
                );
                Reaction::outcome(VerificationOutcome::rejected(
                    sender,
                    CertificateRejection::LearningSaturated { outstanding }.into(),
                ))
            }
        }
    }

    fn verify_bsm(&self, message: &PendingMessage, key: &VerifyingKey) -> VerificationOutcome {
        match self.check_bsm(message, key) {
            Ok(accepted) => VerificationOutcome::Accepted(accepted),
            Err(reason) => VerificationOutcome::rejected(message.spdu.header.sender, reason),
        }
    }

    fn check_bsm(&self, message: &PendingMessage, key: &VerifyingKey) -> Result<AcceptedBsm> {
        let spdu = &message.spdu;
        if !ecdsa::verify(key, &spdu.canonical_bytes(), spdu.signature.as_slice())? {
            return Err(ErrorKind::InvalidSignature);
        }

        self.freshness
            .check(spdu.header.generated_at_us, message.received_at_us)?;

        let bsm = BsmPayload::from_bytes(spdu.payload.as_slice())?;
        if bsm.vehicle_id != spdu.header.sender {
            return Err(ErrorKind::MalformedPayload(format!(
                "BSM names {} but was signed by {}",
                bsm.vehicle_id, spdu.header.sender
            )));
        }

        Ok(AcceptedBsm {
            bsm,
            generated_at_us: spdu.header.generated_at_us,
            received_at_us: message.received_at_us,
        })
    }

    fn on_learn_request(&self, spdu: &Spdu, received_at_us: u64) -> Reaction {
        let requester = spdu.header.sender;
        if spdu.header.destination != self.vehicle_id() {
            return Reaction::default();
        }
        if let Err(reason) = self
            .freshness
            .check(spdu.header.generated_at_us, received_at_us)
        {
            return Reaction::outcome(VerificationOutcome::rejected(requester, reason));
        }

        log::debug!("{} answering learn request from {}", self.vehicle_id(), requester);
        Reaction::reply(Reply::LearnResponse { requester })
    }

    fn on_learn_response(&mut self, spdu: &Spdu, received_at_us: u64, now: Instant) -> Reaction {
        let sender = spdu.header.sender;
        // Responses to other vehicles' requests are fine to use while we wait.
        if !self.learning.is_awaiting(sender) {
            log::debug!("{} ignoring unsolicited learn response from {}", self.vehicle_id(), sender);
            return Reaction::default();
        }

        // Unauthenticated failures do not spend the retry budget; the
        // response deadline still runs.
        let certificate = match self.authenticate_response(spdu, received_at_us) {
            Ok(certificate) => certificate,
            Err(reason) => {
                log::warn!(
                    "{} dropped unauthenticated learn response claiming {}: {}",
                    self.vehicle_id(),
                    sender,
                    reason
                );
                return Reaction::outcome(VerificationOutcome::rejected(sender, reason));
            }
        };

        match self.store.install(sender, certificate, received_at_us) {
            Ok(()) => {
                SessionCounters::bump(&self.counters.certificates_learned);
                log::info!("{} learned the certificate of {}", self.vehicle_id(), sender);

                let mut reaction = Reaction::default();
                if let Some(pending) = self.learning.on_certificate_installed(sender)
                    && let Some(certificate) = self.store.lookup(sender)
                {
                    reaction
                        .outcomes
                        .push(self.verify_bsm(&pending, &certificate.verification_key));
                }
                reaction
            }
            Err(reason) => {
                log::warn!(
                    "{} rejected learn response from {}: {}",
                    self.vehicle_id(),
                    sender,
                    reason
                );
                let mut reaction = Reaction::outcome(VerificationOutcome::rejected(sender, reason));
                match self.learning.on_rejected_response(sender, now) {
                    Some(RetryStep::ResendLearnRequest { attempt }) => {
                        log::debug!("{} learn request attempt {} to {}", self.vehicle_id(), attempt, sender);
                        reaction.replies.push(Reply::LearnRequest { target: sender });
                    }
                    Some(RetryStep::GiveUp { attempts }) => {
                        SessionCounters::bump(&self.counters.learning_failures);
                        log::warn!(
                            "{} gave up learning the certificate of {} after {} requests",
                            self.vehicle_id(),
                            sender,
                            attempts
                        );
                    }
                    None => {}
                }
                reaction
            }
        }
    }

    /// A fresh response whose envelope verifies under the key of the
    /// certificate it carries. The store's issuer check comes after.
    fn authenticate_response(&self, spdu: &Spdu, received_at_us: u64) -> Result<Certificate> {
        self.freshness
            .check(spdu.header.generated_at_us, received_at_us)?;

        let certificate = Certificate::decode(spdu.payload.as_slice())?;
        if !ecdsa::verify(
            &certificate.verification_key,
            &spdu.canonical_bytes(),
            spdu.signature.as_slice(),
        )? {
            return Err(ErrorKind::InvalidSignature);
        }
        Ok(certificate)
    }

    async fn finish(&mut self, reaction: Reaction) -> Vec<VerificationOutcome> {
        for reply in reaction.replies {
            self.send_reply(reply).await;
        }
        for outcome in &reaction.outcomes {
            self.counters.record_outcome(outcome);
            self.sink.present(self.vehicle_id(), outcome);
        }
        reaction.outcomes
    }

    async fn send_reply(&self, reply: Reply) {
        let (sealed, counter) = match reply {
            Reply::LearnRequest { target } => (
                seal(
                    &self.keys,
                    MessageKind::LearnRequest,
                    target,
                    Payload::empty(),
                    now_us(),
                ),
                &self.counters.learn_requests_sent,
            ),
            Reply::LearnResponse { requester } => (
                Payload::new(self.keys.certificate().encode()).and_then(|payload| {
                    seal(
                        &self.keys,
                        MessageKind::LearnResponse,
                        requester,
                        payload,
                        now_us(),
                    )
                }),
                &self.counters.learn_responses_sent,
            ),
        };

        let spdu = match sealed {
            Ok(spdu) => spdu,
            Err(e) => {
                log::warn!("{} could not build {:?}: {}", self.vehicle_id(), reply, e);
                return;
            }
        };

        match self.sender.send(spdu.encode()).await {
            Ok(()) => SessionCounters::bump(counter),
            Err(e) => {
                SessionCounters::bump(&self.counters.transport_errors);
                log::warn!("{} failed to send {:?}: {}", self.vehicle_id(), reply, e);
            }
        }
    }
}
