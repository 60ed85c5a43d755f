//! Datagram output
//!
//! The engine never blocks on the network: it hands finished IKE messages to
//! a [`Transport`], which sends them without awaiting and reports failures
//! as [`Error::Transport`].

use crate::ipsec::nat::UdpEncapsulation;
use crate::ipsec::{Error, Result};
use parking_lot::Mutex;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// Sends IKE messages to devices
pub trait Transport: Send + Sync {
    /// Send one IKE message from `local` to `peer`
    ///
    /// `datagram` is the bare IKE message; a transport that sends from the
    /// NAT-T port adds the non-ESP marker itself.
    fn send(&self, datagram: &[u8], local: SocketAddrV4, peer: SocketAddrV4) -> Result<()>;
}

/// UDP transport over the IKE (500) and NAT-T (4500) sockets
#[derive(Debug, Clone)]
pub struct UdpTransport {
    ike: Arc<UdpSocket>,
    nat_t: Arc<UdpSocket>,
    nat_t_port: u16,
}

impl UdpTransport {
    /// Wrap the two bound sockets
    ///
    /// # Errors
    ///
    /// Returns `Io` if the NAT-T socket has no local address
    pub fn new(ike: Arc<UdpSocket>, nat_t: Arc<UdpSocket>) -> Result<Self> {
        let nat_t_port = nat_t.local_addr()?.port();
        Ok(UdpTransport {
            ike,
            nat_t,
            nat_t_port,
        })
    }
}

impl Transport for UdpTransport {
    fn send(&self, datagram: &[u8], local: SocketAddrV4, peer: SocketAddrV4) -> Result<()> {
        let (socket, bytes) = if local.port() == self.nat_t_port {
            (&self.nat_t, UdpEncapsulation::encapsulate_ike(datagram))
        } else {
            (&self.ike, datagram.to_vec())
        };

        let sent = socket
            .try_send_to(&bytes, SocketAddr::V4(peer))
            .map_err(|e| Error::Transport(format!("send to {} failed: {}", peer, e)))?;
        if sent != bytes.len() {
            return Err(Error::Transport(format!(
                "short send to {}: {} of {} bytes",
                peer,
                sent,
                bytes.len()
            )));
        }

        trace!(%peer, %local, len = bytes.len(), "Datagram sent");
        Ok(())
    }
}

/// A datagram captured by [`RecordingTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Bare IKE message
    pub data: Vec<u8>,
    /// Source address
    pub local: SocketAddrV4,
    /// Destination address
    pub peer: SocketAddrV4,
}

/// In-memory transport for tests
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentDatagram>>,
    fail: Mutex<bool>,
}

impl RecordingTransport {
    /// Create an empty transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail until switched back
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    /// Take everything sent so far
    pub fn drain(&self) -> Vec<SentDatagram> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Number of datagrams sent and not yet drained
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Whether nothing was sent since the last drain
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, datagram: &[u8], local: SocketAddrV4, peer: SocketAddrV4) -> Result<()> {
        if *self.fail.lock() {
            return Err(Error::Transport("transport unavailable".into()));
        }
        self.sent.lock().push(SentDatagram {
            data: datagram.to_vec(),
            local,
            peer,
        });
        Ok(())
    }
}
