use async_trait::async_trait;

use crate::error::Result;

/// Fire-and-forget half of an unreliable broadcast channel.
#[async_trait]
pub trait DatagramSender: Send + Sync {
    async fn send(&self, datagram: Vec<u8>) -> Result<()>;
}

/// Receiving half. `Ok(None)` means the channel is closed for good.
#[async_trait]
pub trait DatagramReceiver: Send {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;
}
