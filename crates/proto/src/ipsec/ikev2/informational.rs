//! INFORMATIONAL exchange
//!
//! Implements the INFORMATIONAL exchange of RFC 7296 Section 1.4 for both
//! directions the gateway sees:
//!
//! - Requests from the device (keepalive, Delete of the IKE SA or of Child
//!   SAs) are answered with an empty encrypted response.
//! - The gateway itself sends a Delete when a PDU session is released.
//!
//! # Message Flow
//!
//! ```text
//! Initiator                    Responder
//! ---------                    ---------
//! HDR, SK {[N+], [D+]}  -->
//!                        <--  HDR, SK {[N+], [D+]}
//! ```
//!
//! A Delete names the SPI its sender receives on (RFC 7296 Section 3.11),
//! so the gateway's Delete carries inbound SPIs and a device's Delete
//! carries the gateway's outbound SPIs.

use super::exchange::find_error_notify;
use super::payload::{DeletePayload, IkePayload, NotifyPayload};
use super::proposal::ProtocolId;
use crate::ipsec::{Error, Result};
use tracing::trace;

/// What a device asked for in an INFORMATIONAL request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInformational {
    /// The device deletes the whole IKE SA
    pub delete_ike: bool,
    /// ESP SPIs the device stops receiving on (gateway outbound SPIs)
    pub deleted_esp_spis: Vec<u32>,
    /// Notifies carried by the request
    pub notifies: Vec<NotifyPayload>,
}

impl PeerInformational {
    /// Check if the request is a plain liveness check
    pub fn is_keepalive(&self) -> bool {
        !self.delete_ike && self.deleted_esp_spis.is_empty() && self.notifies.is_empty()
    }
}

/// INFORMATIONAL exchange handler
pub struct InformationalExchange;

impl InformationalExchange {
    /// Payloads of a gateway request deleting Child SAs
    ///
    /// # Arguments
    ///
    /// * `inbound_spis` - SPIs the gateway receives on for the Child SAs
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `inbound_spis` is empty
    pub fn delete_child_sa_request(inbound_spis: Vec<u32>) -> Result<Vec<IkePayload>> {
        if inbound_spis.is_empty() {
            return Err(Error::InvalidParameter("SPI list cannot be empty".into()));
        }
        Ok(vec![IkePayload::Delete(DeletePayload::esp(inbound_spis))])
    }

    /// Payloads of a gateway request deleting the IKE SA
    pub fn delete_ike_sa_request() -> Vec<IkePayload> {
        vec![IkePayload::Delete(DeletePayload::ike())]
    }

    /// Payloads of the response to a device request
    pub fn empty_response() -> Vec<IkePayload> {
        Vec::new()
    }

    /// Sort the decrypted payloads of a device request
    pub fn process_request(payloads: Vec<IkePayload>) -> PeerInformational {
        let mut request = PeerInformational::default();

        for payload in payloads {
            match payload {
                IkePayload::Delete(delete) => match delete.protocol_id {
                    ProtocolId::Ike => request.delete_ike = true,
                    ProtocolId::Esp => request.deleted_esp_spis.extend(delete.spis),
                    ProtocolId::Ah => {
                        trace!(spis = delete.spis.len(), "AH delete ignored");
                    }
                },
                IkePayload::Notify(notify) => request.notifies.push(notify),
                other => trace!(payload = other.type_u8(), "Payload ignored in INFORMATIONAL"),
            }
        }

        request
    }

    /// Check the device's answer to a gateway Delete
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` if the device answered with an error notify
    pub fn process_response(payloads: &[IkePayload]) -> Result<()> {
        match find_error_notify(payloads) {
            Some(notify_type) => Err(Error::InvalidMessage(format!(
                "INFORMATIONAL answered with error notify {}",
                notify_type
            ))),
            None => Ok(()),
        }
    }
}
