//! Child SA (Security Association) management
//!
//! One Child SA carries the signaling tunnel of a device and one more is
//! created for every PDU session. The gateway allocates the inbound SPI,
//! the device's chosen proposal supplies the outbound one.
//!
//! # Lifecycle
//!
//! ```text
//! HalfOpen ──complete──> Completed ──activate──> Active
//!     │                      │                     │
//!     └──────────────────────┴───────release───────┴──> Released
//! ```
//!
//! A Child SA leaves HalfOpen exactly once. Release is terminal and records
//! a failure cause when the SA never became Active.
//!
//! # Key Derivation
//!
//! ```text
//! KEYMAT = prf+(SK_d, Ni | Nr)
//! SK_ei | SK_ai | SK_er | SK_ar = KEYMAT
//! ```
//!
//! With ENCR_NULL the encryption keys are empty.

use crate::ipsec::{
    crypto::{ChildKeys, EncryptionAlgorithm, IntegrityAlgorithm, PrfAlgorithm},
    ikev2::{negotiate::ChosenEsp, payload::TrafficSelector},
    signaling::FailureCause,
    Error, Result,
};
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Instant;

/// Child SA State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSaState {
    /// Inbound SPI allocated, waiting for the peer's SPI and transforms
    HalfOpen,

    /// Peer SPI known and keys derived, kernel rules not yet installed
    Completed,

    /// Kernel rules installed, traffic flows
    Active,

    /// Torn down or failed
    Released,
}

impl ChildSaState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(self, target: ChildSaState) -> bool {
        use ChildSaState::*;

        matches!(
            (self, target),
            (HalfOpen, Completed)
                | (Completed, Active)
                | (HalfOpen, Released)
                | (Completed, Released)
                | (Active, Released)
        )
    }
}

impl fmt::Display for ChildSaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChildSaState::HalfOpen => "HalfOpen",
            ChildSaState::Completed => "Completed",
            ChildSaState::Active => "Active",
            ChildSaState::Released => "Released",
        };
        f.write_str(name)
    }
}

/// ESP-in-UDP ports of a NATed tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpEncap {
    /// Gateway side port
    pub local_port: u16,
    /// Port the device's traffic arrives from (after NAT)
    pub peer_port: u16,
}

/// Inclusive port range of a traffic selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    /// First port
    pub start: u16,
    /// Last port
    pub end: u16,
}

impl PortRange {
    /// Every port
    pub const ANY: PortRange = PortRange { start: 0, end: u16::MAX };

    /// Ports a negotiated selector covers
    pub fn of(selector: &TrafficSelector) -> Self {
        PortRange {
            start: selector.start_port,
            end: selector.end_port,
        }
    }

    /// Whether the range leaves ports unrestricted
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Where a Child SA's traffic flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkBinding {
    /// Gateway's public address
    pub local_public: Ipv4Addr,
    /// Device's public address (as seen after NAT)
    pub peer_public: Ipv4Addr,
    /// Gateway side traffic selector (/32)
    pub local_selector: Ipv4Addr,
    /// Device side traffic selector (/32)
    pub remote_selector: Ipv4Addr,
    /// Gateway side ports from the negotiated selector
    pub local_ports: PortRange,
    /// Device side ports from the negotiated selector
    pub remote_ports: PortRange,
    /// IP protocol the selectors match
    pub ip_protocol: u8,
    /// Set when either end is behind a NAT
    pub encapsulation: Option<UdpEncap>,
    /// XFRM interface the rules are bound to
    pub xfrm_if_id: u32,
}

/// Child Security Association
///
/// Holds both directions of one ESP SA pair.
#[derive(Debug, Clone)]
pub struct ChildSa {
    /// Pairs a CREATE_CHILD_SA response with its request (message ID)
    pub correlation_index: u32,

    /// SPI the gateway receives on
    pub inbound_spi: u32,

    /// SPI the gateway sends with (zero until completed)
    pub outbound_spi: u32,

    /// Current state
    pub state: ChildSaState,

    /// PDU session this SA carries (none for the signaling SA)
    pub pdu_session_id: Option<u8>,

    /// QoS flows of the PDU session
    pub qfi_list: Vec<u8>,

    /// Nonce the gateway sent, prefix of the key derivation nonce
    pub local_nonce: Vec<u8>,

    /// ESP cipher
    pub encryption: EncryptionAlgorithm,

    /// ESP integrity algorithm
    pub integrity: Option<IntegrityAlgorithm>,

    /// Extended sequence numbers
    pub esn: bool,

    /// Per-direction keys
    pub keys: ChildKeys,

    /// Addresses, selectors and encapsulation
    pub binding: Option<NetworkBinding>,

    /// Why the SA was released without ever becoming Active
    pub failure: Option<FailureCause>,

    /// Creation timestamp
    pub created_at: Instant,
}

impl ChildSa {
    /// Create a HalfOpen Child SA
    ///
    /// # Arguments
    ///
    /// * `correlation_index` - Message ID of the exchange creating the SA
    /// * `inbound_spi` - SPI reserved in the store
    /// * `pdu_session_id` - PDU session, if any
    /// * `qfi_list` - QoS flows of the session
    /// * `local_nonce` - Nonce sent by the gateway (empty for IKE_AUTH)
    pub fn half_open(
        correlation_index: u32,
        inbound_spi: u32,
        pdu_session_id: Option<u8>,
        qfi_list: Vec<u8>,
        local_nonce: Vec<u8>,
    ) -> Self {
        ChildSa {
            correlation_index,
            inbound_spi,
            outbound_spi: 0,
            state: ChildSaState::HalfOpen,
            pdu_session_id,
            qfi_list,
            local_nonce,
            encryption: EncryptionAlgorithm::Null,
            integrity: None,
            esn: false,
            keys: ChildKeys::default(),
            binding: None,
            failure: None,
            created_at: Instant::now(),
        }
    }

    fn transition(&mut self, target: ChildSaState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Record the peer's answer: SPI, transforms, keys and binding
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the SA is HalfOpen
    pub fn complete(&mut self, esp: &ChosenEsp, keys: ChildKeys, binding: NetworkBinding) -> Result<()> {
        self.transition(ChildSaState::Completed)?;
        self.outbound_spi = esp.spi;
        self.encryption = esp.encryption;
        self.integrity = esp.integrity;
        self.esn = esp.esn;
        self.keys = keys;
        self.binding = Some(binding);
        Ok(())
    }

    /// Kernel rules are installed
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` unless the SA is Completed
    pub fn activate(&mut self) -> Result<()> {
        self.transition(ChildSaState::Active)
    }

    /// Tear the SA down
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` if the SA is already Released
    pub fn release(&mut self, cause: Option<FailureCause>) -> Result<()> {
        self.transition(ChildSaState::Released)?;
        self.failure = cause;
        Ok(())
    }

    /// Check if the kernel carries traffic for this SA
    pub fn is_active(&self) -> bool {
        self.state == ChildSaState::Active
    }
}

/// Derive the keys of a Child SA from the IKE SA's SK_d
///
/// `nonce` is the Child SA's concatenated nonce: `Ni | Nr` of IKE_SA_INIT
/// for the signaling SA, `local | peer` of CREATE_CHILD_SA otherwise.
pub fn derive_child_keys(
    esp: &ChosenEsp,
    prf: PrfAlgorithm,
    sk_d: &[u8],
    nonce: &[u8],
) -> Result<ChildKeys> {
    ChildKeys::derive(
        prf,
        sk_d,
        nonce,
        esp.encryption.key_len(),
        esp.integrity.map_or(0, IntegrityAlgorithm::key_len),
    )
}
