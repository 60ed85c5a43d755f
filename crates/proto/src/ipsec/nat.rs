//! NAT Traversal (NAT-T) detection and UDP encapsulation
//!
//! # NAT Detection
//!
//! During IKE_SA_INIT both peers exchange NAT_DETECTION_SOURCE_IP and
//! NAT_DETECTION_DESTINATION_IP notifies containing:
//!
//! ```text
//! HASH = SHA-1(SPIi | SPIr | IP | Port)
//! ```
//!
//! The gateway recomputes the device's source hash from the address the
//! datagram actually arrived from, and the destination hash from its own
//! address. A mismatch on the former means the device sits behind a NAT, on
//! the latter that the gateway does. Either one makes every Child SA of the
//! tunnel use ESP-in-UDP.
//!
//! # UDP Encapsulation Format
//!
//! IKE messages on port 4500 carry a 4-byte zero Non-ESP marker so they can
//! be told apart from ESP packets, which start with a non-zero SPI.
//!
//! # References
//!
//! - [RFC 3948](https://datatracker.ietf.org/doc/html/rfc3948) - UDP Encapsulation
//! - [RFC 7296 Section 2.23](https://datatracker.ietf.org/doc/html/rfc7296#section-2.23) - NAT Detection

use crate::ipsec::ikev2::constants::NotifyType;
use crate::ipsec::ikev2::payload::NotifyPayload;
use crate::ipsec::{Error, Result};
use sha1::{Digest, Sha1};
use std::net::SocketAddrV4;

/// Default IKE port (UDP 500)
pub const IKE_PORT: u16 = 500;

/// NAT-T port (UDP 4500)
pub const NAT_T_PORT: u16 = 4500;

/// Non-ESP marker (4 bytes of zeros)
pub const NON_ESP_MARKER: [u8; 4] = [0, 0, 0, 0];

/// NAT Detection Hash
///
/// Hash is computed as: SHA-1(SPIi | SPIr | IP | Port)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatDetectionHash {
    /// 20-byte SHA-1 hash
    pub hash: [u8; 20],
}

impl NatDetectionHash {
    /// Compute NAT detection hash
    ///
    /// # Arguments
    ///
    /// * `spi_i` - Initiator's SPI
    /// * `spi_r` - Responder's SPI (zero in an IKE_SA_INIT request)
    /// * `addr` - IPv4 address and UDP port
    pub fn compute(spi_i: u64, spi_r: u64, addr: SocketAddrV4) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(spi_i.to_be_bytes());
        hasher.update(spi_r.to_be_bytes());
        hasher.update(addr.ip().octets());
        hasher.update(addr.port().to_be_bytes());

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&hasher.finalize());
        NatDetectionHash { hash }
    }

    /// Create from raw hash bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let hash: [u8; 20] = bytes.try_into().map_err(|_| Error::InvalidLength {
            expected: 20,
            actual: bytes.len(),
        })?;
        Ok(NatDetectionHash { hash })
    }

    /// Get hash as slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.hash
    }

    /// Wrap the hash in a notify payload of the given type
    pub fn to_notify(&self, notify_type: NotifyType) -> NotifyPayload {
        NotifyPayload::new(notify_type, self.hash.to_vec())
    }
}

/// Which side of the tunnel sits behind a NAT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatFlags {
    /// The device's source address was rewritten
    pub ue_behind_nat: bool,
    /// The gateway's address was rewritten
    pub gateway_behind_nat: bool,
}

impl NatFlags {
    /// Check if any NAT is present
    pub fn is_nat_present(&self) -> bool {
        self.ue_behind_nat || self.gateway_behind_nat
    }
}

/// Check the NAT-D notifies of an IKE_SA_INIT request
///
/// Hashes are recomputed with the SPIs of the request itself. A notify
/// whose hash does not match sets the corresponding flag; missing notifies
/// leave the flags clear.
///
/// # Arguments
///
/// * `spi_i` / `spi_r` - SPIs from the request header
/// * `notifies` - All notify payloads of the request
/// * `ue_addr` - Address the request arrived from
/// * `gateway_addr` - Address the request arrived at
pub fn detect<'a, I>(
    spi_i: u64,
    spi_r: u64,
    notifies: I,
    ue_addr: SocketAddrV4,
    gateway_addr: SocketAddrV4,
) -> NatFlags
where
    I: IntoIterator<Item = &'a NotifyPayload>,
{
    let source = NatDetectionHash::compute(spi_i, spi_r, ue_addr);
    let destination = NatDetectionHash::compute(spi_i, spi_r, gateway_addr);

    let mut flags = NatFlags::default();
    for notify in notifies {
        match notify.kind() {
            Some(NotifyType::NatDetectionSourceIp) => {
                if notify.data != source.as_bytes() {
                    flags.ue_behind_nat = true;
                }
            }
            Some(NotifyType::NatDetectionDestinationIp) => {
                if notify.data != destination.as_bytes() {
                    flags.gateway_behind_nat = true;
                }
            }
            _ => {}
        }
    }
    flags
}

/// Notifies the responder sends in its IKE_SA_INIT response
///
/// Returns `(NAT_DETECTION_SOURCE_IP, NAT_DETECTION_DESTINATION_IP)`.
pub fn response_notifies(
    spi_i: u64,
    spi_r: u64,
    gateway_addr: SocketAddrV4,
    ue_addr: SocketAddrV4,
) -> (NotifyPayload, NotifyPayload) {
    (
        NatDetectionHash::compute(spi_i, spi_r, gateway_addr)
            .to_notify(NotifyType::NatDetectionSourceIp),
        NatDetectionHash::compute(spi_i, spi_r, ue_addr)
            .to_notify(NotifyType::NatDetectionDestinationIp),
    )
}

/// Packet Type (IKE or ESP) on port 4500
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// IKE message (starts with Non-ESP marker)
    Ike,

    /// ESP packet (starts with non-zero SPI)
    Esp,
}

/// UDP Encapsulation
pub struct UdpEncapsulation;

impl UdpEncapsulation {
    /// Prepend the Non-ESP marker to an IKE message
    pub fn encapsulate_ike(msg: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(NON_ESP_MARKER.len() + msg.len());
        result.extend_from_slice(&NON_ESP_MARKER);
        result.extend_from_slice(msg);
        result
    }

    /// Split a port-4500 datagram into its type and IKE/ESP bytes
    pub fn decapsulate(data: &[u8]) -> Result<(PacketType, &[u8])> {
        if data.len() < NON_ESP_MARKER.len() {
            return Err(Error::InvalidLength {
                expected: NON_ESP_MARKER.len(),
                actual: data.len(),
            });
        }

        if data[..4] == NON_ESP_MARKER {
            Ok((PacketType::Ike, &data[4..]))
        } else {
            Ok((PacketType::Esp, data))
        }
    }
}
