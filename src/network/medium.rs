use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use super::transport::{DatagramReceiver, DatagramSender};
use crate::error::{ErrorKind, Result};

/// In-process broadcast channel shared by every simulated vehicle.
///
/// Every attached receiver sees every datagram, the sender's own included.
/// With a non-zero loss probability each send is independently dropped.
pub struct BroadcastMedium {
    channel: broadcast::Sender<Arc<Vec<u8>>>,
    loss_probability: f64,
    sent: AtomicUsize,
    dropped: AtomicUsize,
}

impl BroadcastMedium {
    pub fn new(capacity: usize, loss_probability: f64) -> Result<Arc<Self>> {
        if capacity == 0 {
            return Err(ErrorKind::Config("medium capacity must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&loss_probability) {
            return Err(ErrorKind::Config(format!(
                "loss probability {} outside 0..=1",
                loss_probability
            )));
        }
        let (channel, _) = broadcast::channel(capacity);
        Ok(Arc::new(Self {
            channel,
            loss_probability,
            sent: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }))
    }

    pub fn attach(self: &Arc<Self>) -> (MediumSender, MediumReceiver) {
        (
            MediumSender {
                medium: self.clone(),
            },
            MediumReceiver {
                inbox: self.channel.subscribe(),
            },
        )
    }

    pub fn get_message_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn get_dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct MediumSender {
    medium: Arc<BroadcastMedium>,
}

#[async_trait]
impl DatagramSender for MediumSender {
    async fn send(&self, datagram: Vec<u8>) -> Result<()> {
        self.medium.sent.fetch_add(1, Ordering::Relaxed);

        let lost = self.medium.loss_probability > 0.0
            && rand::thread_rng().gen_bool(self.medium.loss_probability);
        if lost {
            self.medium.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        // No subscribers is not an error on a broadcast medium.
        let _ = self.medium.channel.send(Arc::new(datagram));
        Ok(())
    }
}

pub struct MediumReceiver {
    inbox: broadcast::Receiver<Arc<Vec<u8>>>,
}

#[async_trait]
impl DatagramReceiver for MediumReceiver {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.inbox.recv().await {
                Ok(datagram) => return Ok(Some(datagram.as_ref().clone())),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("receiver lagged, {} datagrams lost", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_receiver_sees_a_broadcast() {
        let medium = BroadcastMedium::new(16, 0.0).unwrap();
        let (tx, mut rx_a) = medium.attach();
        let (_, mut rx_b) = medium.attach();

        tx.send(vec![1, 2, 3]).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(rx_b.recv().await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(medium.get_message_count(), 1);
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let medium = BroadcastMedium::new(16, 1.0).unwrap();
        let (tx, mut rx) = medium.attach();

        for _ in 0..5 {
            tx.send(vec![0]).await.unwrap();
        }

        assert_eq!(medium.get_dropped_count(), 5);
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), rx.recv())
                .await
                .is_err()
        );
    }

    #[test]
    fn rejects_bad_loss_probability() {
        assert!(BroadcastMedium::new(16, 1.5).is_err());
        assert!(BroadcastMedium::new(0, 0.0).is_err());
    }
}
