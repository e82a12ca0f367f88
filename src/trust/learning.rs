use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use tokio::time::{Duration, Instant};

use crate::codec::{Spdu, VehicleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningPolicy {
    /// How long to wait for a LearnResponse before re-requesting.
    pub response_timeout_ms: u64,
    /// LearnRequests sent per peer before giving up.
    pub max_attempts: u32,
    /// Peers whose certificate may be outstanding at once, each with at most
    /// one buffered BSM. Also bounds how many abandoned peers are remembered.
    pub pending_capacity: usize,
}

impl Default for LearningPolicy {
    fn default() -> Self {
        Self {
            response_timeout_ms: 500,
            max_attempts: 3,
            pending_capacity: 64,
        }
    }
}

impl LearningPolicy {
    fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeerStatus {
    Unknown,
    AwaitingCertificate,
    Known,
    LearningFailed,
}

/// A BSM held back until its sender's certificate is known. The receive
/// timestamp travels with it so the freshness check uses arrival time.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub spdu: Spdu,
    pub received_at_us: u64,
}

/// What to do with a BSM from a sender without a stored certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownSenderStep {
    /// First sighting: the message is buffered and a LearnRequest must go out.
    SendLearnRequest,
    /// A request is already outstanding; the message replaced the buffered one.
    Buffered,
    /// Learning was abandoned for this sender; drop the message.
    Abandoned { attempts: u32 },
    /// `pending_capacity` peers are already being learned; drop the message
    /// without sending a request.
    Saturated { outstanding: usize },
}

/// What to do after a LearnResponse failed to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    ResendLearnRequest { attempt: u32 },
    GiveUp { attempts: u32 },
}

#[derive(Debug, Default)]
pub struct TimeoutSweep {
    pub resend: Vec<VehicleId>,
    pub failed: Vec<(VehicleId, u32)>,
}

#[derive(Debug, Clone, Copy)]
struct Awaiting {
    attempts: u32,
    deadline: Instant,
}

/// Per-peer `Unknown -> AwaitingCertificate -> Known` machine with a
/// terminal `LearningFailed`. Absent peers are `Unknown`.
///
/// Pure bookkeeping: callers pass the current instant and act on the
/// returned steps, so the machine can be driven without a runtime.
///
/// Only installed certificates grow `known`. Outstanding peers are capped
/// at `pending_capacity` and abandoned peers live in an LRU of the same
/// size, so unauthenticated senders cannot grow the state without bound.
pub struct LearningProtocol {
    policy: LearningPolicy,
    known: HashSet<VehicleId>,
    awaiting: HashMap<VehicleId, Awaiting>,
    deadlines: BTreeSet<(Instant, VehicleId)>,
    failed: LruCache<VehicleId, u32>,
    pending: LruCache<VehicleId, PendingMessage>,
}

impl LearningProtocol {
    pub fn new(policy: LearningPolicy) -> Self {
        let capacity = NonZeroUsize::new(policy.pending_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            policy,
            known: HashSet::new(),
            awaiting: HashMap::new(),
            deadlines: BTreeSet::new(),
            failed: LruCache::new(capacity),
            pending: LruCache::new(capacity),
        }
    }

    pub fn status(&self, peer: VehicleId) -> PeerStatus {
        if self.known.contains(&peer) {
            PeerStatus::Known
        } else if self.awaiting.contains_key(&peer) {
            PeerStatus::AwaitingCertificate
        } else if self.failed.contains(&peer) {
            PeerStatus::LearningFailed
        } else {
            PeerStatus::Unknown
        }
    }

    pub fn is_awaiting(&self, peer: VehicleId) -> bool {
        self.awaiting.contains_key(&peer)
    }

    pub fn on_unknown_sender(&mut self, message: PendingMessage, now: Instant) -> UnknownSenderStep {
        let peer = message.spdu.header.sender;
        if let Some(&attempts) = self.failed.peek(&peer) {
            return UnknownSenderStep::Abandoned { attempts };
        }
        if self.awaiting.contains_key(&peer) {
            self.pending.put(peer, message);
            return UnknownSenderStep::Buffered;
        }
        if self.awaiting.len() >= self.capacity() {
            return UnknownSenderStep::Saturated {
                outstanding: self.awaiting.len(),
            };
        }

        // `Known` without a store entry means the entry was invalidated.
        self.known.remove(&peer);
        self.pending.put(peer, message);
        self.start_waiting(peer, 1, now);
        UnknownSenderStep::SendLearnRequest
    }

    /// Marks `peer` known and hands back its buffered BSM, if any.
    pub fn on_certificate_installed(&mut self, peer: VehicleId) -> Option<PendingMessage> {
        self.stop_waiting(peer);
        self.failed.pop(&peer);
        self.known.insert(peer);
        self.pending.pop(&peer)
    }

    /// A LearnResponse from `peer` was rejected. `None` if no request was
    /// outstanding.
    pub fn on_rejected_response(&mut self, peer: VehicleId, now: Instant) -> Option<RetryStep> {
        let attempts = self.awaiting.get(&peer)?.attempts;
        Some(self.retry_or_fail(peer, attempts, now))
    }

    /// Only touches peers whose deadline has passed.
    pub fn poll_timeouts(&mut self, now: Instant) -> TimeoutSweep {
        let mut sweep = TimeoutSweep::default();
        while let Some(&(deadline, peer)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            let attempts = match self.awaiting.get(&peer) {
                Some(awaiting) => awaiting.attempts,
                None => {
                    self.deadlines.pop_first();
                    continue;
                }
            };
            match self.retry_or_fail(peer, attempts, now) {
                RetryStep::ResendLearnRequest { .. } => sweep.resend.push(peer),
                RetryStep::GiveUp { attempts } => sweep.failed.push((peer, attempts)),
            }
        }
        sweep
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.first().map(|&(deadline, _)| deadline)
    }

    /// Returns `peer` to `Unknown`, e.g. after its store entry was invalidated.
    pub fn forget(&mut self, peer: VehicleId) {
        self.stop_waiting(peer);
        self.known.remove(&peer);
        self.failed.pop(&peer);
        self.pending.pop(&peer);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn outstanding(&self) -> usize {
        self.awaiting.len()
    }

    pub fn abandoned(&self) -> usize {
        self.failed.len()
    }

    fn capacity(&self) -> usize {
        self.failed.cap().get()
    }

    fn start_waiting(&mut self, peer: VehicleId, attempts: u32, now: Instant) {
        let deadline = now + self.policy.response_timeout();
        self.awaiting.insert(peer, Awaiting { attempts, deadline });
        self.deadlines.insert((deadline, peer));
    }

    fn stop_waiting(&mut self, peer: VehicleId) {
        if let Some(awaiting) = self.awaiting.remove(&peer) {
            self.deadlines.remove(&(awaiting.deadline, peer));
        }
    }

    fn retry_or_fail(&mut self, peer: VehicleId, attempts: u32, now: Instant) -> RetryStep {
        self.stop_waiting(peer);
        if attempts < self.policy.max_attempts {
            let attempt = attempts + 1;
            self.start_waiting(peer, attempt, now);
            RetryStep::ResendLearnRequest { attempt }
        } else {
            self.failed.put(peer, attempts);
            self.pending.pop(&peer);
            RetryStep::GiveUp { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageKind, Payload, SignatureField, SpduHeader};

    fn message(sender: u32, sequence: u8) -> PendingMessage {
        PendingMessage {
            spdu: Spdu {
                header: SpduHeader {
                    kind: MessageKind::Bsm,
                    sender: VehicleId(sender),
                    destination: VehicleId::BROADCAST,
                    generated_at_us: 0,
                },
                payload: Payload::from_slice(&[sequence]).unwrap(),
                signature: SignatureField::empty(),
            },
            received_at_us: sequence as u64,
        }
    }

    fn protocol() -> LearningProtocol {
        LearningProtocol::new(LearningPolicy {
            response_timeout_ms: 100,
            max_attempts: 2,
            pending_capacity: 2,
        })
    }

    #[test]
    fn first_message_requests_once() {
        let mut learning = protocol();
        let now = Instant::now();

        assert_eq!(
            learning.on_unknown_sender(message(1, 0), now),
            UnknownSenderStep::SendLearnRequest
        );
        assert_eq!(
            learning.on_unknown_sender(message(1, 1), now),
            UnknownSenderStep::Buffered
        );
        assert_eq!(learning.status(VehicleId(1)), PeerStatus::AwaitingCertificate);
    }

    #[test]
    fn install_releases_latest_buffered_message() {
        let mut learning = protocol();
        let now = Instant::now();
        learning.on_unknown_sender(message(1, 0), now);
        learning.on_unknown_sender(message(1, 7), now);

        let released = learning.on_certificate_installed(VehicleId(1)).unwrap();
        assert_eq!(released.received_at_us, 7);
        assert_eq!(learning.status(VehicleId(1)), PeerStatus::Known);
        assert!(learning.on_certificate_installed(VehicleId(1)).is_none());
    }

    #[test]
    fn rejected_responses_retry_then_fail() {
        let mut learning = protocol();
        let now = Instant::now();
        learning.on_unknown_sender(message(1, 0), now);

        assert_eq!(
            learning.on_rejected_response(VehicleId(1), now),
            Some(RetryStep::ResendLearnRequest { attempt: 2 })
        );
        assert_eq!(
            learning.on_rejected_response(VehicleId(1), now),
            Some(RetryStep::GiveUp { attempts: 2 })
        );
        assert_eq!(learning.status(VehicleId(1)), PeerStatus::LearningFailed);
        assert_eq!(learning.pending_len(), 0);
        assert_eq!(
            learning.on_unknown_sender(message(1, 2), now),
            UnknownSenderStep::Abandoned { attempts: 2 }
        );
    }

    #[test]
    fn unsolicited_response_is_ignored() {
        let mut learning = protocol();
        assert_eq!(learning.on_rejected_response(VehicleId(9), Instant::now()), None);
        assert_eq!(learning.status(VehicleId(9)), PeerStatus::Unknown);
    }

    #[test]
    fn timeouts_resend_then_fail() {
        let mut learning = protocol();
        let start = Instant::now();
        learning.on_unknown_sender(message(1, 0), start);

        assert!(learning.poll_timeouts(start).resend.is_empty());
        assert_eq!(learning.next_deadline(), Some(start + Duration::from_millis(100)));

        let first = start + Duration::from_millis(100);
        let sweep = learning.poll_timeouts(first);
        assert_eq!(sweep.resend, vec![VehicleId(1)]);

        let second = first + Duration::from_millis(100);
        let sweep = learning.poll_timeouts(second);
        assert!(sweep.resend.is_empty());
        assert_eq!(sweep.failed, vec![(VehicleId(1), 2)]);
        assert_eq!(learning.next_deadline(), None);
    }

    #[test]
    fn outstanding_peers_are_capped() {
        let mut learning = protocol();
        let now = Instant::now();
        for sender in 1..=2 {
            assert_eq!(
                learning.on_unknown_sender(message(sender, 0), now),
                UnknownSenderStep::SendLearnRequest
            );
        }
        assert_eq!(
            learning.on_unknown_sender(message(3, 0), now),
            UnknownSenderStep::Saturated { outstanding: 2 }
        );
        assert_eq!(learning.status(VehicleId(3)), PeerStatus::Unknown);
        assert_eq!(learning.pending_len(), 2);
        assert!(learning.on_certificate_installed(VehicleId(1)).is_some());

        // A freed slot can be taken again.
        assert_eq!(
            learning.on_unknown_sender(message(3, 1), now),
            UnknownSenderStep::SendLearnRequest
        );
    }

    #[test]
    fn flood_of_senders_keeps_state_bounded() {
        let mut learning = protocol();
        let mut now = Instant::now();
        let mut requests = 0;

        for sender in 1..=1_000 {
            if learning.on_unknown_sender(message(sender, 0), now) == UnknownSenderStep::SendLearnRequest
            {
                requests += 1;
            }
            if sender % 100 == 0 {
                now += Duration::from_millis(100);
                requests += learning.poll_timeouts(now).resend.len();
            }
            assert!(learning.outstanding() <= 2);
            assert!(learning.pending_len() <= 2);
            assert!(learning.abandoned() <= 2);
        }
        // Each slot turns over once per full retry cycle.
        assert!(requests <= 2 * 10, "{} requests", requests);
    }

    #[test]
    fn sweep_ignores_known_and_abandoned_peers() {
        let mut learning = protocol();
        let start = Instant::now();
        learning.on_unknown_sender(message(1, 0), start);
        learning.on_certificate_installed(VehicleId(1));
        learning.on_unknown_sender(message(2, 0), start);

        let late = start + Duration::from_secs(60);
        let first = learning.poll_timeouts(late);
        assert_eq!(first.resend, vec![VehicleId(2)]);
        let second = learning.poll_timeouts(late + Duration::from_millis(100));
        assert_eq!(second.failed, vec![(VehicleId(2), 2)]);

        let third = learning.poll_timeouts(late + Duration::from_secs(60));
        assert!(third.resend.is_empty() && third.failed.is_empty());
        assert_eq!(learning.next_deadline(), None);
        assert_eq!(learning.status(VehicleId(1)), PeerStatus::Known);
    }

    #[test]
    fn forget_returns_peer_to_unknown() {
        let mut learning = protocol();
        learning.on_certificate_installed(VehicleId(4));
        learning.forget(VehicleId(4));
        assert_eq!(learning.status(VehicleId(4)), PeerStatus::Unknown);
    }
}
