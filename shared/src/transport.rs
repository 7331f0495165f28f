//! Datagram endpoint shared by every role.

use crate::error::TransportError;
use crate::{Identity, Message, MAX_FRAME_SIZE, RECEIVE_TIMEOUT};
use log::debug;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

/// One unreliable, connectionless socket.
///
/// `receive` waits at most `receive_timeout`, so loops built on it can check a
/// stop flag between calls instead of blocking forever.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    receive_timeout: Duration,
}

impl Endpoint {
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        Ok(Self {
            socket,
            receive_timeout: RECEIVE_TIMEOUT,
        })
    }

    /// Binds a socket allowed to send to broadcast addresses.
    pub async fn bind_broadcast(addr: &str) -> Result<Self, TransportError> {
        let endpoint = Self::bind(addr).await?;
        endpoint
            .socket
            .set_broadcast(true)
            .map_err(TransportError::Configure)?;
        Ok(endpoint)
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    pub fn local_identity(&self) -> Result<Identity, TransportError> {
        self.socket
            .local_addr()
            .map(Identity::new)
            .map_err(TransportError::Configure)
    }

    /// Sends one datagram. Frames over [`MAX_FRAME_SIZE`] are refused rather
    /// than handed to the OS to be dropped or truncated.
    pub async fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                len: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.socket
            .send_to(bytes, addr)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Send { addr, source })
    }

    pub async fn send(&self, to: Identity, bytes: &[u8]) -> Result<(), TransportError> {
        self.send_to(to.addr(), bytes).await
    }

    pub async fn send_message(&self, to: Identity, message: &Message) -> Result<(), TransportError> {
        debug!("-> {} {}", to, message.tag());
        self.send(to, &message.to_bytes()).await
    }

    /// Waits up to the receive timeout for one datagram.
    ///
    /// `Ok(None)` means nothing arrived in time; that is normal and retryable.
    pub async fn receive(&self) -> Result<Option<(Vec<u8>, Identity)>, TransportError> {
        let mut buffer = vec![0u8; MAX_FRAME_SIZE];

        match tokio::time::timeout(self.receive_timeout, self.socket.recv_from(&mut buffer)).await
        {
            Err(_elapsed) => Ok(None),
            Ok(Ok((len, addr))) => Ok(Some((buffer[..len].to_vec(), Identity::new(addr)))),
            // Windows reports ICMP port-unreachable from an earlier send here.
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionReset => {
                debug!("ignoring connection reset on datagram socket");
                Ok(None)
            }
            Ok(Err(e)) => Err(TransportError::Receive(e)),
        }
    }
}
