//! IKEv2 SA engine
//!
//! [`IkeEngine`] owns the SA store, the inner address pool and the three
//! collaborators (signaling layer, kernel rule sink, transport). Every
//! received datagram goes through [`IkeEngine::handle_datagram`]:
//!
//! ```text
//! datagram ─> strip non-ESP marker (port 4500)
//!          ─> header: major version > 2 ─> INVALID_MAJOR_VERSION
//!          ─> IKE_SA_INIT ─────────────────> new IKE SA
//!          ─> other exchanges ─> SA by responder SPI (unknown ─> INVALID_IKE_SPI)
//!                            ─> lock SA ─> request: IKE_AUTH / INFORMATIONAL
//!                                      ─> response: CREATE_CHILD_SA / Delete ack
//! ```
//!
//! All work for one IKE SA happens under its lock; nothing awaits while
//! the lock is held. Signaling callbacks are delivered after unlocking.

use crate::ipsec::{
    child_sa::{derive_child_keys, ChildSa, ChildSaState},
    config::EngineConfig,
    ikev2::{
        constants::{ip_proto, ExchangeType, NotifyType, IKE_MAJOR_VERSION},
        exchange::{error_notify, notify_response, IkeAuthExchange, IkeAuthResponse, IkeSaInitExchange},
        informational::InformationalExchange,
        message::{IkeHeader, IkeMessage},
        negotiate::ChosenEsp,
        payload::{IdPayload, IkePayload, NotifyPayload, TrafficSelector},
        state::{IkeSa, IkeState, RequestCheck},
    },
    logging,
    nat::{PacketType, UdpEncapsulation},
    orchestrator::{Outbox, Signal},
    pool::InnerAddressPool,
    retransmit::{RequestKind, RetransmitAction},
    signaling::{PduSessionRequest, SetupProcedure, SignalingLayer},
    store::{SaStore, SharedIkeSa},
    transport::Transport,
    xfrm::{KernelRuleSink, XfrmInterfaceAllocator, XfrmRules},
    Error, Result,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

/// Correlation index of the signaling Child SA created by IKE_AUTH
const SIGNALING_CORRELATION_INDEX: u32 = 0x01;

fn notify_name(notify: &NotifyPayload) -> String {
    match notify.kind() {
        Some(kind) => format!("{:?}", kind),
        None => notify.notify_type.to_string(),
    }
}

/// The IKEv2 SA engine of the gateway
pub struct IkeEngine {
    pub(super) config: EngineConfig,
    pub(super) store: SaStore,
    pub(super) pool: InnerAddressPool,
    pub(super) xfrm_ifaces: XfrmInterfaceAllocator,
    pub(super) signaling: Arc<dyn SignalingLayer>,
    pub(super) kernel: Arc<dyn KernelRuleSink>,
    pub(super) transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for IkeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IkeEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl IkeEngine {
    /// Create an engine around its collaborators
    pub fn new(
        config: EngineConfig,
        signaling: Arc<dyn SignalingLayer>,
        kernel: Arc<dyn KernelRuleSink>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        IkeEngine {
            pool: InnerAddressPool::new(config.ue_subnet, config.gateway_address),
            xfrm_ifaces: XfrmInterfaceAllocator::new(config.xfrm_interface_id),
            store: SaStore::new(),
            config,
            signaling,
            kernel,
            transport,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// SA registry
    pub fn store(&self) -> &SaStore {
        &self.store
    }

    /// Inner address pool
    pub fn pool(&self) -> &InnerAddressPool {
        &self.pool
    }

    /// Look up an IKE SA by the gateway's SPI
    pub fn ike_sa(&self, local_spi: u64) -> Option<SharedIkeSa> {
        self.store.load_ike(local_spi)
    }

    /// Process one received UDP datagram
    ///
    /// # Arguments
    ///
    /// * `data` - UDP payload as received
    /// * `local` - Gateway address and port it arrived at
    /// * `peer` - Device address and port it came from
    pub fn handle_datagram(&self, data: &[u8], local: SocketAddrV4, peer: SocketAddrV4) {
        let raw = if local.port() == self.config.nat_t_port {
            match UdpEncapsulation::decapsulate(data) {
                Ok((PacketType::Ike, ike)) => ike,
                Ok((PacketType::Esp, _)) => {
                    trace!(%peer, "ESP datagram on NAT-T port ignored");
                    return;
                }
                Err(e) => {
                    debug!(%peer, error = %e, "Short datagram on NAT-T port");
                    return;
                }
            }
        } else {
            data
        };

        let header = match IkeHeader::from_bytes(raw) {
            Ok(header) => header,
            Err(e) => {
                debug!(%peer, error = %e, "Undecodable IKE header");
                return;
            }
        };

        if header.major_version() > IKE_MAJOR_VERSION {
            if !header.flags.is_response() {
                self.send_unprotected(
                    &header,
                    ExchangeType::Informational,
                    header.spi_r(),
                    NotifyPayload::new(NotifyType::InvalidMajorVersion, Vec::new()),
                    local,
                    peer,
                );
            }
            return;
        }

        let message = match IkeMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(%peer, error = %e, "Malformed IKE message dropped");
                return;
            }
        };

        logging::log_exchange_received(
            &header.exchange_type.to_string(),
            peer,
            header.message_id,
            header.flags.is_response(),
        );

        match header.exchange_type {
            ExchangeType::IkeSaInit => self.handle_ike_sa_init(&message, raw, local, peer),
            _ => self.handle_protected(&message, raw, local, peer),
        }
    }

    /// Send an unencrypted single-notify response
    fn send_unprotected(
        &self,
        request: &IkeHeader,
        exchange: ExchangeType,
        responder_spi: u64,
        notify: NotifyPayload,
        local: SocketAddrV4,
        peer: SocketAddrV4,
    ) {
        let name = notify_name(&notify);
        let datagram = notify_response(request, exchange, responder_spi, notify);
        match self.transport.send(&datagram, local, peer) {
            Ok(()) => logging::log_notify_sent(peer, &name, &exchange.to_string()),
            Err(e) => logging::log_internal_drop(&exchange.to_string(), &e),
        }
    }

    fn handle_ike_sa_init(
        &self,
        message: &IkeMessage,
        raw: &[u8],
        local: SocketAddrV4,
        peer: SocketAddrV4,
    ) {
        let header = &message.header;
        if header.flags.is_response() {
            debug!(%peer, "Unsolicited IKE_SA_INIT response dropped");
            return;
        }

        let local_spi = self.store.allocate_ike_spi();
        if let Err(existing) = self.store.claim_half_open(header.spi_i(), peer, local_spi) {
            self.resend_init_response(existing, raw, local, peer);
            return;
        }

        let (response, material) =
            match IkeSaInitExchange::process_request(message, raw, local_spi, peer, local) {
                Ok(result) => result,
                Err(e) => {
                    self.store.release_half_open(header.spi_i(), peer, local_spi);
                    if let Error::NoProposalChosen = e {
                        let offered = message
                            .payloads
                            .iter()
                            .find_map(|p| match p {
                                IkePayload::SA(sa) => Some(sa.proposals().len()),
                                _ => None,
                            })
                            .unwrap_or(0);
                        logging::log_negotiation_result("IKE", offered, None);
                    }
                    match error_notify(&e) {
                        Some(notify) => self.send_unprotected(
                            header,
                            ExchangeType::IkeSaInit,
                            header.spi_r(),
                            notify,
                            local,
                            peer,
                        ),
                        None => logging::log_internal_drop("IKE_SA_INIT", &e),
                    }
                    return;
                }
            };

        logging::log_negotiation_result("IKE", 1, Some(material.suite.proposal.proposal_num));
        logging::log_nat_detection(peer, material.nat.ue_behind_nat, material.nat.gateway_behind_nat);

        let mut sa = IkeSa::new(local_spi, header.spi_i(), material, peer, local);
        sa.remember_init(raw, response.clone());
        if let Err(e) = self.store.insert_ike(local_spi, sa) {
            self.store.release_half_open(header.spi_i(), peer, local_spi);
            logging::log_internal_drop("IKE_SA_INIT", &e);
            return;
        }
        logging::log_ike_state_transition(
            header.spi_i(),
            local_spi,
            "NONE",
            &IkeState::InitDone.to_string(),
        );

        if let Err(e) = self.transport.send(&response, local, peer) {
            logging::log_internal_drop("IKE_SA_INIT", &e);
        }
    }

    /// Answer a repeated IKE_SA_INIT with the response already sent
    fn resend_init_response(&self, local_spi: u64, raw: &[u8], local: SocketAddrV4, peer: SocketAddrV4) {
        let cached = self
            .store
            .load_ike(local_spi)
            .and_then(|shared| {
                let sa = shared.lock();
                sa.init_retransmit(raw)
            });
        let Some(response) = cached else {
            debug!(
                %peer,
                ike_spi_r = %hex::encode(local_spi.to_be_bytes()),
                "IKE_SA_INIT for an SA already in progress dropped"
            );
            return;
        };

        trace!(%peer, ike_spi_r = %hex::encode(local_spi.to_be_bytes()), "IKE_SA_INIT retransmit answered");
        if let Err(e) = self.transport.send(&response, local, peer) {
            logging::log_internal_drop("IKE_SA_INIT", &e);
        }
    }

    fn handle_protected(
        &self,
        message: &IkeMessage,
        raw: &[u8],
        local: SocketAddrV4,
        peer: SocketAddrV4,
    ) {
        let header = &message.header;
        let shared = match self.store.load_ike(header.spi_r()) {
            Some(shared) => shared,
            None => {
                if !header.flags.is_response() {
                    self.send_unprotected(
                        header,
                        ExchangeType::Informational,
                        0,
                        NotifyPayload::new(NotifyType::InvalidIkeSpi, Vec::new()),
                        local,
                        peer,
                    );
                }
                return;
            }
        };

        let mut outbox = Outbox::new();
        {
            let mut sa = shared.lock();
            if sa.remote_spi != header.spi_i() || sa.state().is_terminal() {
                debug!(
                    ike_spi_i = %hex::encode(header.spi_i().to_be_bytes()),
                    ike_spi_r = %hex::encode(header.spi_r().to_be_bytes()),
                    "Message for a stale IKE SA dropped"
                );
                return;
            }

            if header.flags.is_response() {
                self.handle_response(&mut sa, message, raw, &mut outbox);
            } else {
                self.handle_request(&mut sa, message, raw, local, peer, &mut outbox);
            }
        }
        outbox.deliver(self.signaling.as_ref());
    }

    /// Seal a response, remember it for retransmits and send it
    fn respond(
        &self,
        sa: &mut IkeSa,
        exchange: ExchangeType,
        message_id: u32,
        payloads: &[IkePayload],
    ) -> Result<()> {
        let datagram = sa
            .channel()
            .seal(sa.response_header(exchange, message_id), payloads)?;
        sa.record_response(message_id, datagram.clone());
        self.transport.send(&datagram, sa.gateway_addr, sa.ue_addr)
    }

    /// Answer a request with the notify matching `error`
    fn respond_error(&self, sa: &mut IkeSa, exchange: ExchangeType, message_id: u32, error: &Error) {
        let Some(notify) = error_notify(error) else {
            logging::log_internal_drop(&exchange.to_string(), error);
            return;
        };

        let name = notify_name(&notify);
        match self.respond(sa, exchange, message_id, &[IkePayload::Notify(notify)]) {
            Ok(()) => logging::log_notify_sent(sa.ue_addr, &name, &exchange.to_string()),
            Err(e) => logging::log_internal_drop(&exchange.to_string(), &e),
        }
    }

    fn handle_request(
        &self,
        sa: &mut IkeSa,
        message: &IkeMessage,
        raw: &[u8],
        local: SocketAddrV4,
        peer: SocketAddrV4,
        outbox: &mut Outbox,
    ) {
        let header = &message.header;
        match sa.check_request(header.message_id) {
            RequestCheck::New => {}
            RequestCheck::Retransmit(datagram) => {
                debug!(%peer, message_id = header.message_id, "Retransmitted request answered from cache");
                if let Err(e) = self.transport.send(&datagram, local, peer) {
                    logging::log_internal_drop(&header.exchange_type.to_string(), &e);
                }
                return;
            }
            RequestCheck::Unexpected => {
                debug!(
                    %peer,
                    message_id = header.message_id,
                    expected = sa.initiator_message_id,
                    "Request outside the window dropped"
                );
                return;
            }
        }

        let payloads = match sa.channel().open(raw, message) {
            Ok(payloads) => payloads,
            Err(Error::IntegrityCheckFailed) => {
                logging::log_integrity_failure(sa.remote_spi, sa.local_spi, peer);
                return;
            }
            Err(e) => {
                logging::log_internal_drop(&header.exchange_type.to_string(), &e);
                return;
            }
        };

        // The device may have moved behind a NAT or switched to port 4500
        sa.ue_addr = peer;
        sa.gateway_addr = local;

        match header.exchange_type {
            ExchangeType::IkeAuth => self.handle_ike_auth(sa, header.message_id, payloads, outbox),
            ExchangeType::Informational => {
                self.handle_peer_informational(sa, header.message_id, payloads, outbox)
            }
            ExchangeType::CreateChildSa => {
                debug!(%peer, "Device-initiated CREATE_CHILD_SA refused");
                self.respond_error(sa, ExchangeType::CreateChildSa, header.message_id, &Error::NoProposalChosen);
            }
            ExchangeType::IkeSaInit => {}
        }
    }

    fn handle_ike_auth(
        &self,
        sa: &mut IkeSa,
        message_id: u32,
        payloads: Vec<IkePayload>,
        outbox: &mut Outbox,
    ) {
        if sa.state() != IkeState::InitDone {
            debug!(
                ike_spi_r = %hex::encode(sa.local_spi.to_be_bytes()),
                state = %sa.state(),
                "IKE_AUTH on an authenticated SA dropped"
            );
            return;
        }

        let request = match IkeAuthExchange::parse_request(payloads) {
            Ok(request) => request,
            Err(e) => {
                logging::log_internal_drop("IKE_AUTH", &e);
                return;
            }
        };

        let offered = request.sa.proposals().len();
        let esp = match IkeAuthExchange::negotiate(&request) {
            Ok(esp) => esp,
            Err(e) => {
                logging::log_negotiation_result("ESP", offered, None);
                self.respond_error(sa, ExchangeType::IkeAuth, message_id, &e);
                return;
            }
        };
        logging::log_negotiation_result("ESP", offered, Some(esp.proposal.proposal_num));

        let device_id = request.device_id();
        let Some(profile) = self.signaling.device_profile(&device_id) else {
            warn!(device = %device_id, "No profile for device");
            self.reject_authentication(sa, message_id, outbox);
            return;
        };

        let initiator_octets = match IkeAuthExchange::verify_device(
            sa.suite.prf,
            &profile.ktipsec,
            &sa.keys.sk_pi,
            &sa.initiator_signed_octets,
            &request,
        ) {
            Ok(octets) => octets,
            Err(e) => {
                warn!(device = %device_id, error = %e, "Device authentication failed");
                self.reject_authentication(sa, message_id, outbox);
                return;
            }
        };

        if !request.requests_inner_address() {
            warn!(device = %device_id, "IKE_AUTH without inner address request");
            self.reject_ike_auth(sa, message_id, Error::ConfigurationRequired, outbox);
            return;
        }

        let id_r = IdPayload::from_fqdn(&self.config.fqdn);
        let (auth, responder_octets) = match IkeAuthExchange::gateway_auth(
            sa.suite.prf,
            &profile.ktipsec,
            &sa.keys.sk_pr,
            &sa.responder_signed_octets,
            &id_r,
        ) {
            Ok(result) => result,
            Err(e) => {
                logging::log_internal_drop("IKE_AUTH", &e);
                return;
            }
        };

        let inner_address = match self.pool.allocate(sa.local_spi) {
            Ok(address) => address,
            Err(e) => {
                logging::log_internal_drop("IKE_AUTH", &e);
                return;
            }
        };

        let inbound_spi = self.store.allocate_child_spi(sa.local_spi);
        let child = match self.install_signaling_child(sa, &esp, inbound_spi, inner_address) {
            Ok(child) => child,
            Err(e) => {
                logging::log_internal_drop("IKE_AUTH", &e);
                self.store.release_child_spi(inbound_spi);
                self.pool.release(inner_address);
                return;
            }
        };

        let mut proposal = esp.proposal.clone();
        proposal.spi = inbound_spi.to_be_bytes().to_vec();
        let response = IkeAuthExchange::response_payloads(IkeAuthResponse {
            id_r,
            auth,
            inner_address,
            netmask: self.config.ue_subnet.netmask(),
            proposal,
            gateway_address: self.config.gateway_address,
            nas_tcp_port: self.config.nas_tcp_port,
        });

        let datagram = match sa
            .channel()
            .seal(sa.response_header(ExchangeType::IkeAuth, message_id), &response)
        {
            Ok(datagram) => datagram,
            Err(e) => {
                logging::log_internal_drop("IKE_AUTH", &e);
                self.uninstall(&child, false);
                self.store.release_child_spi(inbound_spi);
                self.pool.release(inner_address);
                return;
            }
        };

        sa.initiator_signed_octets = initiator_octets;
        sa.responder_signed_octets = responder_octets;
        sa.ktipsec = Zeroizing::new(profile.ktipsec.to_vec());
        sa.inner_address = Some(inner_address);
        sa.children.insert(inbound_spi, child);
        sa.pending.extend(profile.pending);
        sa.procedure = profile.procedure;
        sa.procedure_open = true;
        sa.device_id = Some(device_id.clone());

        if let Some(previous) = self.store.bind_device(&device_id, sa.local_spi) {
            if previous != sa.local_spi {
                info!(
                    device = %device_id,
                    previous_spi = %hex::encode(previous.to_be_bytes()),
                    "Device re-registered with a new IKE SA"
                );
            }
        }

        match sa.transition(IkeState::Established) {
            Ok(()) => logging::log_ike_state_transition(
                sa.remote_spi,
                sa.local_spi,
                &IkeState::InitDone.to_string(),
                &IkeState::Established.to_string(),
            ),
            Err(e) => logging::log_internal_drop("IKE_AUTH", &e),
        }
        self.store.release_half_open(sa.remote_spi, sa.init_peer, sa.local_spi);

        sa.record_response(message_id, datagram.clone());
        if let Err(e) = self.transport.send(&datagram, sa.gateway_addr, sa.ue_addr) {
            logging::log_internal_drop("IKE_AUTH", &e);
        }

        outbox.push(Signal::SignalingSaEstablished { device_id });
        self.advance(sa, outbox);
    }

    /// Answer AUTHENTICATION_FAILED and drop the IKE SA
    fn reject_authentication(&self, sa: &mut IkeSa, message_id: u32, outbox: &mut Outbox) {
        self.reject_ike_auth(
            sa,
            message_id,
            Error::AuthenticationFailed("device not authenticated".into()),
            outbox,
        );
    }

    /// Answer IKE_AUTH with the notify for `error` and drop the IKE SA
    fn reject_ike_auth(&self, sa: &mut IkeSa, message_id: u32, error: Error, outbox: &mut Outbox) {
        self.respond_error(sa, ExchangeType::IkeAuth, message_id, &error);
        self.teardown(sa, outbox);
    }

    /// Key, bind, install and activate the signaling Child SA
    fn install_signaling_child(
        &self,
        sa: &IkeSa,
        esp: &ChosenEsp,
        inbound_spi: u32,
        inner_address: Ipv4Addr,
    ) -> Result<ChildSa> {
        let mut child = ChildSa::half_open(
            SIGNALING_CORRELATION_INDEX,
            inbound_spi,
            None,
            Vec::new(),
            Vec::new(),
        );
        let keys = derive_child_keys(esp, sa.suite.prf, &sa.keys.sk_d, &sa.concatenated_nonce)?;
        let binding = self.binding(
            sa,
            ip_proto::TCP,
            &TrafficSelector::host(self.config.gateway_address),
            &TrafficSelector::host(inner_address),
            self.xfrm_ifaces.default_id(),
        );
        child.complete(esp, keys, binding)?;

        self.kernel.apply(&XfrmRules::from_child_sa(&child, false)?)?;
        child.activate()?;
        logging::log_child_sa_transition(
            inbound_spi,
            None,
            &ChildSaState::HalfOpen.to_string(),
            &ChildSaState::Active.to_string(),
        );
        Ok(child)
    }

    /// Remove the kernel rules of an Active Child SA
    fn uninstall(&self, child: &ChildSa, is_initiator: bool) {
        let removed = XfrmRules::from_child_sa(child, is_initiator)
            .and_then(|rules| self.kernel.remove(&rules));
        if let Err(e) = removed {
            logging::log_internal_drop("XFRM removal", &e);
        }
    }

    fn handle_peer_informational(
        &self,
        sa: &mut IkeSa,
        message_id: u32,
        payloads: Vec<IkePayload>,
        outbox: &mut Outbox,
    ) {
        let request = InformationalExchange::process_request(payloads);
        if request.is_keepalive() {
            trace!(ike_spi_r = %hex::encode(sa.local_spi.to_be_bytes()), "Keepalive");
        }

        for outbound_spi in &request.deleted_esp_spis {
            match sa.child_by_outbound(*outbound_spi) {
                Some(inbound_spi) => {
                    if let Some(child) = self.release_child(sa, inbound_spi, false) {
                        info!(
                            child_spi = inbound_spi,
                            pdu_session_id = ?child.pdu_session_id,
                            "Child SA deleted by device"
                        );
                    }
                }
                None => debug!(spi = *outbound_spi, "Delete for unknown Child SA"),
            }
        }

        if let Err(e) = self.respond(
            sa,
            ExchangeType::Informational,
            message_id,
            &InformationalExchange::empty_response(),
        ) {
            logging::log_internal_drop("INFORMATIONAL", &e);
        }

        if request.delete_ike {
            info!(ike_spi_r = %hex::encode(sa.local_spi.to_be_bytes()), "IKE SA deleted by device");
            self.teardown(sa, outbox);
        }
    }

    fn handle_response(
        &self,
        sa: &mut IkeSa,
        message: &IkeMessage,
        raw: &[u8],
        outbox: &mut Outbox,
    ) {
        let header = &message.header;
        let expected = sa.outstanding.as_ref().map(|request| request.message_id);
        if expected != Some(header.message_id) {
            debug!(
                message_id = header.message_id,
                expected = ?expected,
                "Response without outstanding request dropped"
            );
            return;
        }

        let payloads = match sa.channel().open(raw, message) {
            Ok(payloads) => payloads,
            Err(Error::IntegrityCheckFailed) => {
                logging::log_integrity_failure(sa.remote_spi, sa.local_spi, sa.ue_addr);
                return;
            }
            Err(e) => {
                logging::log_internal_drop(&header.exchange_type.to_string(), &e);
                return;
            }
        };

        let Some(request) = sa.take_outstanding(header.message_id) else {
            return;
        };

        match request.kind {
            RequestKind::CreateChildSa { inbound_spi } => {
                self.complete_child(sa, inbound_spi, header.exchange_type, payloads, outbox)
            }
            RequestKind::DeleteChildSa { inbound_spis } => {
                if let Err(e) = InformationalExchange::process_response(&payloads) {
                    debug!(error = %e, "Delete acknowledged with an error");
                }
                for spi in inbound_spis {
                    self.store.release_child_spi(spi);
                }
            }
        }

        self.advance(sa, outbox);
    }

    /// Locked IKE SA of an authenticated device
    fn device_sa(&self, device_id: &str) -> Result<SharedIkeSa> {
        self.store
            .device_spi(device_id)
            .and_then(|spi| self.store.load_ike(spi))
            .ok_or_else(|| Error::SaNotFound(format!("no IKE SA for device {}", device_id)))
    }

    /// Queue PDU sessions for Child SA creation
    ///
    /// Sessions are created one after another; the signaling layer hears
    /// about each one and, at the end, that `procedure` is resolved.
    ///
    /// # Errors
    ///
    /// - `SaNotFound` if the device has no IKE SA
    /// - `InvalidState` if the SA is not established or a procedure is
    ///   still running
    pub fn setup_pdu_sessions(
        &self,
        device_id: &str,
        sessions: Vec<PduSessionRequest>,
        procedure: SetupProcedure,
    ) -> Result<()> {
        let shared = self.device_sa(device_id)?;
        let mut outbox = Outbox::new();
        {
            let mut sa = shared.lock();
            if !sa.state().is_established() {
                return Err(Error::InvalidState(format!(
                    "IKE SA of {} is {}",
                    device_id,
                    sa.state()
                )));
            }
            if sa.procedure_open {
                return Err(Error::InvalidState(format!(
                    "{:?} of {} still running",
                    sa.procedure, device_id
                )));
            }

            sa.pending.extend(sessions);
            sa.procedure = procedure;
            sa.procedure_open = true;
            self.advance(&mut sa, &mut outbox);
        }
        outbox.deliver(self.signaling.as_ref());
        Ok(())
    }

    /// Tear down the Child SA of a PDU session and tell the device
    ///
    /// The Delete is sent right away, or after the request currently in
    /// flight.
    ///
    /// # Errors
    ///
    /// Returns `SaNotFound` if the device or the session is unknown
    pub fn release_pdu_session(&self, device_id: &str, pdu_session_id: u8) -> Result<()> {
        let shared = self.device_sa(device_id)?;
        let mut outbox = Outbox::new();
        {
            let mut sa = shared.lock();
            let inbound_spi = sa
                .child_for_session(pdu_session_id)
                .map(|child| child.inbound_spi)
                .ok_or_else(|| {
                    Error::SaNotFound(format!(
                        "no Child SA for PDU session {} of {}",
                        pdu_session_id, device_id
                    ))
                })?;

            self.release_child(&mut sa, inbound_spi, true);
            sa.deferred_deletes.push_back(inbound_spi);
            self.advance(&mut sa, &mut outbox);
        }
        outbox.deliver(self.signaling.as_ref());
        Ok(())
    }

    /// Resend or give up on outstanding gateway requests
    ///
    /// Called periodically by the server.
    pub fn poll_retransmits(&self, now: Instant) {
        for (local_spi, shared) in self.store.all_ike() {
            let mut outbox = Outbox::new();
            {
                let mut sa = shared.lock();
                if sa.half_open_expired(now, self.config.half_open_timeout) {
                    info!(
                        ike_spi_r = %hex::encode(local_spi.to_be_bytes()),
                        peer = %sa.ue_addr,
                        "IKE_AUTH never arrived, half-open IKE SA removed"
                    );
                    self.teardown(&mut sa, &mut outbox);
                } else if let Some(request) = sa.outstanding.as_mut() {
                    match request.poll(now, &self.config.retransmit) {
                        RetransmitAction::Idle => {}
                        RetransmitAction::Resend => {
                            logging::log_retransmit(local_spi, request.message_id, request.retries(), false);
                            if let Err(e) = self.transport.send(&request.datagram, request.local, request.peer) {
                                logging::log_internal_drop("retransmit", &e);
                            }
                        }
                        RetransmitAction::Exhausted => {
                            logging::log_retransmit(local_spi, request.message_id, request.retries(), true);
                            if let Some(request) = sa.outstanding.take() {
                                self.exchange_timed_out(&mut sa, request, &mut outbox);
                            }
                        }
                    }
                }
            }
            outbox.deliver(self.signaling.as_ref());
        }
    }

    /// Remove a device's IKE SA and everything hanging off it
    ///
    /// # Errors
    ///
    /// Returns `SaNotFound` if no IKE SA has this SPI
    pub fn remove_device(&self, local_spi: u64) -> Result<()> {
        let shared = self
            .store
            .load_ike(local_spi)
            .ok_or_else(|| Error::SaNotFound(format!("IKE SA {:016x}", local_spi)))?;

        let mut outbox = Outbox::new();
        {
            let mut sa = shared.lock();
            self.teardown(&mut sa, &mut outbox);
        }
        outbox.deliver(self.signaling.as_ref());
        Ok(())
    }
}
