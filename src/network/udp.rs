use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

use super::transport::{DatagramReceiver, DatagramSender};
use crate::error::{ErrorKind, Result};

/// Largest datagram read from the socket.
pub const MAX_DATAGRAM_LEN: usize = 2048;

/// Binds `local` and returns a sender that unicasts every datagram to each
/// of `peers`, plus the receiving half of the same socket.
pub async fn bind(local: SocketAddr, peers: Vec<SocketAddr>) -> Result<(UdpSender, UdpReceiver)> {
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| ErrorKind::Transport(format!("bind {}: {}", local, e)))?;
    log::info!("UDP transport bound to {} with {} peers", local, peers.len());

    let socket = Arc::new(socket);
    Ok((
        UdpSender {
            socket: socket.clone(),
            peers,
        },
        UdpReceiver { socket },
    ))
}

pub struct UdpSender {
    socket: Arc<UdpSocket>,
    peers: Vec<SocketAddr>,
}

#[async_trait]
impl DatagramSender for UdpSender {
    /// Every peer gets the datagram; the first failure is reported.
    async fn send(&self, datagram: Vec<u8>) -> Result<()> {
        let mut first_error = None;
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(&datagram, peer).await {
                log::debug!("UDP send to {} failed: {}", peer, e);
                first_error
                    .get_or_insert_with(|| ErrorKind::Transport(format!("send to {}: {}", peer, e)));
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
}

#[async_trait]
impl DatagramReceiver for UdpReceiver {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| ErrorKind::Transport(format!("recv: {}", e)))?;
        log::trace!("{} bytes from {}", len, from);
        buf.truncate(len);
        Ok(Some(buf))
    }
}
