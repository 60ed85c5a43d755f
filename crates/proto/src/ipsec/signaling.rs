//! Signaling-plane collaborator
//!
//! The engine does not speak NGAP, RADIUS or EAP-5G. Whatever does provides
//! device profiles (the `Ktipsec` key and the PDU sessions waiting for a
//! Child SA) and is told about every outcome: the signaling SA coming up,
//! each PDU session's Child SA succeeding or failing, and the moment the
//! last pending session of a setup procedure has been resolved.

use crate::ipsec::child_sa::ChildSa;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroizing;

/// Signaling procedure that requested a batch of PDU sessions
///
/// The procedure decides which response the signaling layer builds once
/// all sessions are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupProcedure {
    /// Initial Context Setup (sessions requested during registration)
    #[default]
    InitialContextSetup,
    /// PDU Session Resource Setup (sessions requested later)
    PduSessionResourceSetup,
}

/// One PDU session that needs its own Child SA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PduSessionRequest {
    /// PDU session identifier
    pub pdu_session_id: u8,
    /// QoS flow identifiers carried by the session
    pub qfi_list: Vec<u8>,
    /// Whether user-plane integrity protection is required
    pub integrity_required: bool,
    /// DSCP value to advertise, if any
    pub dscp: Option<u8>,
}

impl PduSessionRequest {
    /// Session with the default QoS settings
    pub fn new(pdu_session_id: u8, qfi_list: Vec<u8>) -> Self {
        PduSessionRequest {
            pdu_session_id,
            qfi_list,
            integrity_required: false,
            dscp: None,
        }
    }

    /// Require integrity protection
    pub fn with_integrity(mut self, required: bool) -> Self {
        self.integrity_required = required;
        self
    }

    /// Advertise a DSCP value
    pub fn with_dscp(mut self, dscp: u8) -> Self {
        self.dscp = Some(dscp);
        self
    }
}

/// What the signaling layer knows about an authenticated device
#[derive(Clone)]
pub struct DeviceProfile {
    /// Identity carried in IDi
    pub device_id: String,
    /// Key the AUTH payloads are computed with
    pub ktipsec: Zeroizing<Vec<u8>>,
    /// Sessions to bring up once IKE_AUTH completes, in order
    pub pending: Vec<PduSessionRequest>,
    /// Procedure the pending sessions belong to
    pub procedure: SetupProcedure,
}

impl fmt::Debug for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProfile")
            .field("device_id", &self.device_id)
            .field("ktipsec", &"..")
            .field("pending", &self.pending)
            .field("procedure", &self.procedure)
            .finish()
    }
}

/// Why a PDU session did not get a Child SA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// The request could not be built or sent
    TransportResourceUnavailable,
    /// The device never answered the CREATE_CHILD_SA request
    Timeout,
    /// The device rejected the request with an error notify
    PeerRejected(u16),
    /// Installing the kernel rules failed
    KernelRule,
    /// The owning IKE SA went away first
    IkeSaDeleted,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::TransportResourceUnavailable => f.write_str("transport resource unavailable"),
            FailureCause::Timeout => f.write_str("no response from device"),
            FailureCause::PeerRejected(notify) => write!(f, "rejected by device (notify {})", notify),
            FailureCause::KernelRule => f.write_str("kernel rule installation failed"),
            FailureCause::IkeSaDeleted => f.write_str("IKE SA deleted"),
        }
    }
}

/// Signaling-plane collaborator
pub trait SignalingLayer: Send + Sync {
    /// Profile of the device identified by the IDi payload data
    fn device_profile(&self, device_id: &str) -> Option<DeviceProfile>;

    /// The signaling Child SA of a device is installed
    fn signaling_sa_established(&self, device_id: &str);

    /// A PDU session's Child SA is installed
    fn pdu_session_established(&self, device_id: &str, pdu_session_id: u8, child: &ChildSa);

    /// A PDU session's Child SA could not be created
    fn pdu_session_failed(&self, device_id: &str, pdu_session_id: u8, cause: FailureCause);

    /// Every session of a setup procedure has been resolved
    fn all_sessions_resolved(&self, device_id: &str, procedure: SetupProcedure);
}

/// Event recorded by [`MemorySignaling`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    /// `signaling_sa_established`
    SignalingSaEstablished(String),
    /// `pdu_session_established`, with the child's inbound SPI
    PduSessionEstablished(String, u8, u32),
    /// `pdu_session_failed`
    PduSessionFailed(String, u8, FailureCause),
    /// `all_sessions_resolved`
    AllSessionsResolved(String, SetupProcedure),
}

/// In-memory signaling layer
///
/// Serves profiles registered up front and records every callback.
#[derive(Debug, Default)]
pub struct MemorySignaling {
    profiles: Mutex<HashMap<String, DeviceProfile>>,
    events: Mutex<Vec<SignalingEvent>>,
}

impl MemorySignaling {
    /// Create an empty signaling layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device profile
    pub fn add_profile(&self, profile: DeviceProfile) {
        self.profiles
            .lock()
            .insert(profile.device_id.clone(), profile);
    }

    /// Events recorded so far
    pub fn events(&self) -> Vec<SignalingEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: SignalingEvent) {
        self.events.lock().push(event);
    }
}

impl SignalingLayer for MemorySignaling {
    fn device_profile(&self, device_id: &str) -> Option<DeviceProfile> {
        self.profiles.lock().get(device_id).cloned()
    }

    fn signaling_sa_established(&self, device_id: &str) {
        self.record(SignalingEvent::SignalingSaEstablished(device_id.to_string()));
    }

    fn pdu_session_established(&self, device_id: &str, pdu_session_id: u8, child: &ChildSa) {
        self.record(SignalingEvent::PduSessionEstablished(
            device_id.to_string(),
            pdu_session_id,
            child.inbound_spi,
        ));
    }

    fn pdu_session_failed(&self, device_id: &str, pdu_session_id: u8, cause: FailureCause) {
        self.record(SignalingEvent::PduSessionFailed(
            device_id.to_string(),
            pdu_session_id,
            cause,
        ));
    }

    fn all_sessions_resolved(&self, device_id: &str, procedure: SetupProcedure) {
        self.record(SignalingEvent::AllSessionsResolved(
            device_id.to_string(),
            procedure,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> DeviceProfile {
        DeviceProfile {
            device_id: "imsi-001010000000001".into(),
            ktipsec: Zeroizing::new(vec![0x11; 32]),
            pending: vec![PduSessionRequest::new(1, vec![9]).with_integrity(true)],
            procedure: SetupProcedure::InitialContextSetup,
        }
    }

    #[test]
    fn test_memory_signaling_profiles() {
        let signaling = MemorySignaling::new();
        assert!(signaling.device_profile("imsi-001010000000001").is_none());

        signaling.add_profile(profile());
        let found = signaling.device_profile("imsi-001010000000001").unwrap();
        assert_eq!(found.pending.len(), 1);
        assert!(found.pending[0].integrity_required);
    }

    #[test]
    fn test_memory_signaling_records_events() {
        let signaling = MemorySignaling::new();
        signaling.signaling_sa_established("dev");
        signaling.pdu_session_failed("dev", 5, FailureCause::Timeout);
        signaling.all_sessions_resolved("dev", SetupProcedure::PduSessionResourceSetup);

        assert_eq!(
            signaling.events(),
            vec![
                SignalingEvent::SignalingSaEstablished("dev".into()),
                SignalingEvent::PduSessionFailed("dev".into(), 5, FailureCause::Timeout),
                SignalingEvent::AllSessionsResolved(
                    "dev".into(),
                    SetupProcedure::PduSessionResourceSetup
                ),
            ]
        );
    }

    #[test]
    fn test_profile_debug_redacts_key() {
        let text = format!("{:?}", profile());
        assert!(!text.contains("17, 17"));
        assert!(text.contains("imsi-001010000000001"));
    }

    #[test]
    fn test_failure_cause_display() {
        assert_eq!(
            FailureCause::PeerRejected(14).to_string(),
            "rejected by device (notify 14)"
        );
    }
}
