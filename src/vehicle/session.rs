use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use super::receive::Receiver;
use super::sink::{NullSink, PresentationSink};
use super::transmit::{TracePolicy, Transmitter};
use crate::bsm::MobilityTrace;
use crate::codec::VehicleId;
use crate::crypto::KeyMaterial;
use crate::error::ErrorKind;
use crate::metrics::{SessionCounters, SessionMetrics};
use crate::network::{DatagramReceiver, DatagramSender};
use crate::pki::TrustAnchors;
use crate::trust::{FreshnessWindow, LearningPolicy};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bsm_interval: Duration,
    /// BSMs to send before the transmit loop ends; `None` runs until cancelled.
    pub message_count: Option<u64>,
    pub trace_policy: TracePolicy,
    pub freshness: FreshnessWindow,
    pub learning: LearningPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bsm_interval: Duration::from_millis(100),
            message_count: None,
            trace_policy: TracePolicy::default(),
            freshness: FreshnessWindow::default(),
            learning: LearningPolicy::default(),
        }
    }
}

/// One vehicle: its keys, its trace and the anchors it trusts, ready to be
/// attached to a transport.
pub struct VehicleSession {
    keys: Arc<KeyMaterial>,
    trace: Arc<MobilityTrace>,
    anchors: Arc<TrustAnchors>,
    config: SessionConfig,
    sink: Arc<dyn PresentationSink>,
}

impl VehicleSession {
    pub fn new(
        keys: KeyMaterial,
        trace: MobilityTrace,
        anchors: Arc<TrustAnchors>,
        config: SessionConfig,
    ) -> Self {
        Self {
            keys: Arc::new(keys),
            trace: Arc::new(trace),
            anchors,
            config,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PresentationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn vehicle_id(&self) -> VehicleId {
        self.keys.vehicle_id
    }

    /// Starts the transmit and receive tasks. Both stop on
    /// [`SessionHandle::cancel`] or when the handle is dropped.
    pub fn spawn(
        self,
        sender: Arc<dyn DatagramSender>,
        receiver: Box<dyn DatagramReceiver>,
    ) -> SessionHandle {
        let vehicle_id = self.vehicle_id();
        let counters = Arc::new(SessionCounters::new());
        let (cancel, cancelled) = watch::channel(false);

        let transmitter = Transmitter::new(
            self.keys.clone(),
            self.trace,
            self.config.trace_policy,
            sender.clone(),
            counters.clone(),
        );
        let inbound = Receiver::new(
            self.keys,
            self.anchors,
            self.config.freshness,
            self.config.learning,
            sender,
            self.sink,
            counters.clone(),
        );

        log::info!("{} starting session", vehicle_id);
        let transmit = tokio::spawn(transmit_loop(
            transmitter,
            self.config.bsm_interval,
            self.config.message_count,
            cancelled.clone(),
        ));
        let receive = tokio::spawn(receive_loop(inbound, receiver, cancelled));

        SessionHandle {
            vehicle_id,
            cancel,
            transmit: Some(transmit),
            receive,
            counters,
        }
    }
}

pub struct SessionHandle {
    pub vehicle_id: VehicleId,
    cancel: watch::Sender<bool>,
    transmit: Option<JoinHandle<u64>>,
    receive: JoinHandle<()>,
    counters: Arc<SessionCounters>,
}

impl SessionHandle {
    pub fn metrics(&self) -> SessionMetrics {
        self.counters.snapshot(self.vehicle_id)
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Waits for the transmit loop to end on its own (message count reached
    /// or trace exhausted). Returns the number of ticks it ran.
    pub async fn transmit_finished(&mut self) -> u64 {
        let Some(transmit) = self.transmit.take() else {
            return 0;
        };
        match transmit.await {
            Ok(ticks) => ticks,
            Err(e) => {
                log::error!("{} transmit task failed: {}", self.vehicle_id, e);
                0
            }
        }
    }

    /// Cancels both tasks, waits for them, and returns the final counters.
    pub async fn shutdown(mut self) -> SessionMetrics {
        self.cancel();
        self.transmit_finished().await;
        if let Err(e) = (&mut self.receive).await {
            log::error!("{} receive task failed: {}", self.vehicle_id, e);
        }
        let metrics = self.metrics();
        log::info!("{} session stopped", self.vehicle_id);
        metrics
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn transmit_loop(
    transmitter: Transmitter,
    interval: Duration,
    message_count: Option<u64>,
    mut cancel: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut timestep = 0;
    while message_count.is_none_or(|count| timestep < count) {
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = ticker.tick() => {}
        }

        match transmitter.transmit(timestep).await {
            Ok(()) => {}
            Err(ErrorKind::TraceExhausted { len, .. }) => {
                log::info!(
                    "{} trace exhausted after {} samples",
                    transmitter.vehicle_id(),
                    len
                );
                break;
            }
            Err(e) => log::warn!("{} skipped BSM #{}: {}", transmitter.vehicle_id(), timestep, e),
        }
        timestep += 1;
    }

    log::debug!("{} transmit loop done after {} ticks", transmitter.vehicle_id(), timestep);
    timestep
}

async fn receive_loop(
    mut inbound: Receiver,
    mut transport: Box<dyn DatagramReceiver>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let deadline = inbound.next_deadline();
        tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            _ = sleep_until(deadline) => {
                inbound.handle_timeouts(Instant::now()).await;
            }
            datagram = transport.recv() => match datagram {
                Ok(Some(bytes)) => {
                    inbound.handle_datagram(&bytes).await;
                }
                Ok(None) => {
                    log::info!("{} transport closed", inbound.vehicle_id());
                    break;
                }
                Err(e) => log::warn!("{} receive error: {}", inbound.vehicle_id(), e),
            },
        }
    }

    log::debug!(
        "{} receive loop done, {} certificates stored",
        inbound.vehicle_id(),
        inbound.store().len()
    );
}
