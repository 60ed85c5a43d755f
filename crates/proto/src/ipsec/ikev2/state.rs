//! IKE SA state
//!
//! The gateway is always the IKE responder. An IKE SA is created by a
//! successful IKE_SA_INIT exchange and established by IKE_AUTH; after that
//! the gateway itself initiates CREATE_CHILD_SA and INFORMATIONAL requests.
//!
//! # State Transitions
//!
//! ```text
//! (IKE_SA_INIT request)
//!   ↓
//! INIT_DONE
//!   ↓ (IKE_AUTH request authenticated)
//! ESTABLISHED
//!   ↓ (gateway request unanswered)      ↓ (Delete / teardown)
//! FAILED ──────────────────────────────> DELETED
//! ```
//!
//! # Message IDs
//!
//! Each direction has its own counter (RFC 7296 Section 2.2):
//! `initiator_message_id` is the next ID expected in a device request,
//! `responder_message_id` the next ID the gateway puts in its own requests.

use crate::ipsec::{
    child_sa::{ChildSa, ChildSaState},
    crypto::{IkeKeys, SecureChannel},
    ikev2::{
        constants::{ExchangeType, IkeFlags},
        message::IkeHeader,
        negotiate::ChosenIke,
    },
    nat::NatFlags,
    retransmit::OutstandingRequest,
    signaling::{PduSessionRequest, SetupProcedure},
    Error, Result,
};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};
use zeroize::Zeroizing;

/// IKE SA state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IkeState {
    /// IKE_SA_INIT answered, keys derived, waiting for IKE_AUTH
    InitDone,

    /// Device authenticated, signaling Child SA installed
    Established,

    /// A gateway-initiated exchange ran out of retransmissions
    Failed,

    /// IKE SA deleted
    Deleted,
}

impl IkeState {
    /// Check if state is a valid next state
    pub fn can_transition_to(&self, next: IkeState) -> bool {
        use IkeState::*;

        match (self, next) {
            (InitDone, Established) => true,
            (InitDone, Failed) | (Established, Failed) => true,

            // Deletion from any state
            (s, Deleted) if *s != Deleted => true,

            _ => false,
        }
    }

    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, IkeState::Deleted)
    }

    /// Check if IKE SA is established
    pub fn is_established(&self) -> bool {
        matches!(self, IkeState::Established)
    }
}

impl fmt::Display for IkeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IkeState::InitDone => "INIT_DONE",
            IkeState::Established => "ESTABLISHED",
            IkeState::Failed => "FAILED",
            IkeState::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// How a device request relates to the exchange window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCheck {
    /// Next request in sequence, process it
    New,
    /// Retransmission of the last answered request, resend this response
    Retransmit(Vec<u8>),
    /// Out of window, drop it
    Unexpected,
}

/// Material produced by IKE_SA_INIT
#[derive(Debug)]
pub struct InitMaterial {
    /// Negotiated transforms
    pub suite: ChosenIke,
    /// Device nonce (Ni)
    pub nonce_i: Vec<u8>,
    /// Gateway nonce (Nr)
    pub nonce_r: Vec<u8>,
    /// g^ir
    pub dh_shared_key: Zeroizing<Vec<u8>>,
    /// Derived keys
    pub keys: IkeKeys,
    /// NAT detection result
    pub nat: NatFlags,
    /// Raw IKE_SA_INIT request | Nr
    pub initiator_signed_octets: Vec<u8>,
    /// Raw IKE_SA_INIT response | Ni
    pub responder_signed_octets: Vec<u8>,
}

/// IKE Security Association, one per device tunnel
#[derive(Debug)]
pub struct IkeSa {
    /// SPI chosen by the gateway (responder SPI)
    pub local_spi: u64,

    /// SPI chosen by the device (initiator SPI)
    pub remote_spi: u64,

    state: IkeState,

    /// Negotiated transforms
    pub suite: ChosenIke,

    /// Device nonce
    pub nonce_i: Vec<u8>,

    /// Gateway nonce
    pub nonce_r: Vec<u8>,

    /// Ni | Nr
    pub concatenated_nonce: Vec<u8>,

    /// g^ir
    pub dh_shared_key: Zeroizing<Vec<u8>>,

    /// SK_d, SK_ai, SK_ar, SK_ei, SK_er, SK_pi, SK_pr
    pub keys: IkeKeys,

    /// Next message ID expected in a device request
    pub initiator_message_id: u32,

    /// Next message ID of a gateway request
    pub responder_message_id: u32,

    /// NAT detection result
    pub nat: NatFlags,

    /// AUTH input for the device's signature
    pub initiator_signed_octets: Vec<u8>,

    /// AUTH input for the gateway's signature
    pub responder_signed_octets: Vec<u8>,

    /// Device's public address and port (latest authenticated datagram)
    pub ue_addr: SocketAddrV4,

    /// Gateway address and port the device talks to
    pub gateway_addr: SocketAddrV4,

    /// Identity from IDi
    pub device_id: Option<String>,

    /// Key AUTH payloads are computed with
    pub ktipsec: Zeroizing<Vec<u8>>,

    /// Inner address handed out in the CP reply
    pub inner_address: Option<Ipv4Addr>,

    /// Child SAs by inbound SPI
    pub children: HashMap<u32, ChildSa>,

    /// PDU sessions still waiting for a Child SA, in order
    pub pending: VecDeque<PduSessionRequest>,

    /// Procedure the pending sessions belong to
    pub procedure: SetupProcedure,

    /// Whether the current procedure still owes an "all resolved" report
    pub procedure_open: bool,

    /// Gateway request waiting for its response
    pub outstanding: Option<OutstandingRequest>,

    /// Child SAs (inbound SPIs) whose Delete has not been sent yet
    pub deferred_deletes: VecDeque<u32>,

    /// Number of PDU session Child SAs ever activated
    pub user_plane_sessions: usize,

    last_response: Option<(u32, Vec<u8>)>,

    /// IKE_SA_INIT request and the response it got
    init_exchange: Option<(Vec<u8>, Vec<u8>)>,

    /// Address the IKE_SA_INIT request came from
    pub init_peer: SocketAddrV4,

    /// Creation timestamp
    pub created_at: Instant,
}

impl IkeSa {
    /// Create an IKE SA from a completed IKE_SA_INIT exchange
    pub fn new(
        local_spi: u64,
        remote_spi: u64,
        material: InitMaterial,
        ue_addr: SocketAddrV4,
        gateway_addr: SocketAddrV4,
    ) -> Self {
        let concatenated_nonce = [material.nonce_i.as_slice(), material.nonce_r.as_slice()].concat();

        IkeSa {
            local_spi,
            remote_spi,
            state: IkeState::InitDone,
            suite: material.suite,
            nonce_i: material.nonce_i,
            nonce_r: material.nonce_r,
            concatenated_nonce,
            dh_shared_key: material.dh_shared_key,
            keys: material.keys,
            initiator_message_id: 1,
            responder_message_id: 0,
            nat: material.nat,
            initiator_signed_octets: material.initiator_signed_octets,
            responder_signed_octets: material.responder_signed_octets,
            ue_addr,
            gateway_addr,
            device_id: None,
            ktipsec: Zeroizing::new(Vec::new()),
            inner_address: None,
            children: HashMap::new(),
            pending: VecDeque::new(),
            procedure: SetupProcedure::default(),
            procedure_open: false,
            outstanding: None,
            deferred_deletes: VecDeque::new(),
            user_plane_sessions: 0,
            last_response: None,
            init_exchange: None,
            init_peer: ue_addr,
            created_at: Instant::now(),
        }
    }

    /// Get current state
    pub fn state(&self) -> IkeState {
        self.state
    }

    /// Transition to a new state
    ///
    /// # Errors
    ///
    /// Returns error if transition is invalid
    pub fn transition(&mut self, new_state: IkeState) -> Result<()> {
        if !self.state.can_transition_to(new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        self.state = new_state;
        Ok(())
    }

    /// SK payload channel with the gateway's (responder) keys
    pub fn channel(&self) -> SecureChannel<'_> {
        SecureChannel::responder(self.suite.encryption, self.suite.integrity, &self.keys)
    }

    /// Header for a response to a device request
    pub fn response_header(&self, exchange: ExchangeType, message_id: u32) -> IkeHeader {
        IkeHeader::new(
            self.remote_spi,
            self.local_spi,
            exchange,
            IkeFlags::response(false),
            message_id,
        )
    }

    /// Header for the next gateway request
    ///
    /// The message ID is only consumed by
    /// [`commit_request`](Self::commit_request), once the request went out.
    pub fn request_header(&self, exchange: ExchangeType) -> IkeHeader {
        IkeHeader::new(
            self.remote_spi,
            self.local_spi,
            exchange,
            IkeFlags::request(false),
            self.responder_message_id,
        )
    }

    /// Track a sent gateway request and advance the message ID
    pub fn commit_request(&mut self, request: OutstandingRequest) {
        self.responder_message_id = request.message_id.wrapping_add(1);
        self.outstanding = Some(request);
    }

    /// Classify a device request by message ID
    pub fn check_request(&self, message_id: u32) -> RequestCheck {
        if message_id == self.initiator_message_id {
            return RequestCheck::New;
        }
        match &self.last_response {
            Some((id, datagram)) if *id == message_id => RequestCheck::Retransmit(datagram.clone()),
            _ => RequestCheck::Unexpected,
        }
    }

    /// Remember the response to a device request and advance the window
    pub fn record_response(&mut self, message_id: u32, datagram: Vec<u8>) {
        self.initiator_message_id = message_id.wrapping_add(1);
        self.last_response = Some((message_id, datagram));
    }

    /// Remember the IKE_SA_INIT request and the response sent for it
    pub fn remember_init(&mut self, request: &[u8], response: Vec<u8>) {
        self.init_exchange = Some((request.to_vec(), response));
    }

    /// Cached IKE_SA_INIT response when `request` repeats the original
    ///
    /// Only answers while the SA is still waiting for IKE_AUTH.
    pub fn init_retransmit(&self, request: &[u8]) -> Option<Vec<u8>> {
        if self.state != IkeState::InitDone {
            return None;
        }
        match &self.init_exchange {
            Some((original, response)) if original.as_slice() == request => Some(response.clone()),
            _ => None,
        }
    }

    /// Whether the SA waited for IKE_AUTH longer than `timeout`
    pub fn half_open_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.state == IkeState::InitDone && now.saturating_duration_since(self.created_at) >= timeout
    }

    /// Take the outstanding gateway request if `message_id` answers it
    pub fn take_outstanding(&mut self, message_id: u32) -> Option<OutstandingRequest> {
        match &self.outstanding {
            Some(request) if request.message_id == message_id => self.outstanding.take(),
            _ => None,
        }
    }

    /// Whether a gateway request is in flight
    pub fn is_busy(&self) -> bool {
        self.outstanding.is_some()
    }

    /// Whether any Child SA is HalfOpen
    pub fn has_half_open_child(&self) -> bool {
        self.children
            .values()
            .any(|child| child.state == ChildSaState::HalfOpen)
    }

    /// HalfOpen Child SA created by the exchange with this message ID
    pub fn half_open_child_mut(&mut self, correlation_index: u32) -> Option<&mut ChildSa> {
        self.children.values_mut().find(|child| {
            child.state == ChildSaState::HalfOpen && child.correlation_index == correlation_index
        })
    }

    /// Active Child SA carrying a PDU session
    pub fn child_for_session(&self, pdu_session_id: u8) -> Option<&ChildSa> {
        self.children
            .values()
            .find(|child| child.pdu_session_id == Some(pdu_session_id) && child.is_active())
    }

    /// Child SA by the SPI the device sends with (the gateway's inbound SPI)
    pub fn child_by_inbound_mut(&mut self, inbound_spi: u32) -> Option<&mut ChildSa> {
        self.children.get_mut(&inbound_spi)
    }

    /// Child SA by the SPI the device receives on (the gateway's outbound SPI)
    pub fn child_by_outbound(&self, outbound_spi: u32) -> Option<u32> {
        self.children
            .values()
            .find(|child| child.outbound_spi == outbound_spi)
            .map(|child| child.inbound_spi)
    }

    /// Whether either end sits behind a NAT
    pub fn encapsulation_required(&self) -> bool {
        self.nat.is_nat_present()
    }
}
