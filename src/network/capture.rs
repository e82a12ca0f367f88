use async_trait::async_trait;
use std::sync::Mutex;

use super::transport::DatagramSender;
use crate::error::Result;

/// Keeps every sent datagram instead of transmitting it. Lets a single
/// session be driven step by step, frame by frame.
#[derive(Debug, Default)]
pub struct CapturingSender {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl CapturingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains everything captured so far.
    pub fn take(&self) -> Vec<Vec<u8>> {
        match self.frames.lock() {
            Ok(mut frames) => std::mem::take(&mut *frames),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl DatagramSender for CapturingSender {
    async fn send(&self, datagram: Vec<u8>) -> Result<()> {
        match self.frames.lock() {
            Ok(mut frames) => frames.push(datagram),
            Err(poisoned) => poisoned.into_inner().push(datagram),
        }
        Ok(())
    }
}
