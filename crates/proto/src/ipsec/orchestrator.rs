//! Child SA orchestration
//!
//! Drives the per-device queue of PDU sessions through CREATE_CHILD_SA:
//!
//! ```text
//! pending ──(request sent)──> HalfOpen ──(response)──> Completed
//!                                │                        │
//!                                │                 (kernel rules)
//!                                ↓                        ↓
//!                             Released <───(teardown)─── Active
//! ```
//!
//! At most one gateway request is outstanding per IKE SA, so at most one
//! Child SA is HalfOpen per device. A session that fails is reported and
//! the queue keeps draining; once it is empty the signaling layer hears
//! that the setup procedure is resolved.
//!
//! Everything here runs with the IKE SA locked. Signaling callbacks are
//! collected in an [`Outbox`] and delivered after the lock is released.

use crate::ipsec::{
    child_sa::{derive_child_keys, ChildSa, ChildSaState, NetworkBinding, PortRange, UdpEncap},
    engine::IkeEngine,
    ikev2::{
        constants::{ip_proto, ExchangeType, NotifyType},
        exchange::{generate_nonce, ChildSaReply, ChildSaRequest, CreateChildSaExchange},
        informational::InformationalExchange,
        message::IkeHeader,
        negotiate::ChosenEsp,
        payload::{IkePayload, TrafficSelector},
        state::{IkeSa, IkeState},
    },
    logging,
    retransmit::{OutstandingRequest, RequestKind},
    signaling::{FailureCause, PduSessionRequest, SetupProcedure, SignalingLayer},
    xfrm::XfrmRules,
    Error, Result,
};
use std::time::Instant;
use tracing::{debug, warn};

/// A signaling callback waiting for the SA lock to be released
#[derive(Debug, Clone)]
pub enum Signal {
    /// The signaling Child SA is installed
    SignalingSaEstablished {
        /// Device identity
        device_id: String,
    },
    /// A PDU session's Child SA is installed
    PduSessionEstablished {
        /// Device identity
        device_id: String,
        /// The Active Child SA
        child: Box<ChildSa>,
    },
    /// A PDU session did not get a Child SA
    PduSessionFailed {
        /// Device identity
        device_id: String,
        /// PDU session identifier
        pdu_session_id: u8,
        /// Why it failed
        cause: FailureCause,
    },
    /// Every session of a setup procedure is resolved
    AllSessionsResolved {
        /// Device identity
        device_id: String,
        /// Procedure that requested the sessions
        procedure: SetupProcedure,
    },
}

/// Signaling callbacks collected while an IKE SA is locked
#[derive(Debug, Default)]
pub struct Outbox {
    signals: Vec<Signal>,
}

impl Outbox {
    /// Create an empty outbox
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a callback
    pub fn push(&mut self, signal: Signal) {
        self.signals.push(signal);
    }

    /// Callbacks queued so far
    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// Check if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Hand every queued callback to the signaling layer, in order
    pub fn deliver(self, signaling: &dyn SignalingLayer) {
        for signal in self.signals {
            match signal {
                Signal::SignalingSaEstablished { device_id } => {
                    signaling.signaling_sa_established(&device_id)
                }
                Signal::PduSessionEstablished { device_id, child } => {
                    if let Some(pdu_session_id) = child.pdu_session_id {
                        signaling.pdu_session_established(&device_id, pdu_session_id, &child);
                    }
                }
                Signal::PduSessionFailed {
                    device_id,
                    pdu_session_id,
                    cause,
                } => signaling.pdu_session_failed(&device_id, pdu_session_id, cause),
                Signal::AllSessionsResolved {
                    device_id,
                    procedure,
                } => signaling.all_sessions_resolved(&device_id, procedure),
            }
        }
    }
}

/// Report a failed session if the SA knows its device
fn report_failure(sa: &IkeSa, pdu_session_id: u8, cause: FailureCause, outbox: &mut Outbox) {
    if let Some(device_id) = &sa.device_id {
        outbox.push(Signal::PduSessionFailed {
            device_id: device_id.clone(),
            pdu_session_id,
            cause,
        });
    }
}

/// Close the current setup procedure if it is still open
fn resolve_procedure(sa: &mut IkeSa, outbox: &mut Outbox) {
    if !sa.procedure_open {
        return;
    }
    sa.procedure_open = false;
    if let Some(device_id) = &sa.device_id {
        outbox.push(Signal::AllSessionsResolved {
            device_id: device_id.clone(),
            procedure: sa.procedure,
        });
    }
}

impl IkeEngine {
    /// Start the next piece of gateway-initiated work, if the SA is idle
    ///
    /// Deferred Deletes go first. Otherwise pending sessions are dequeued
    /// until one request is on the wire; sessions whose request cannot be
    /// sent fail individually. An empty queue resolves the procedure.
    pub(crate) fn advance(&self, sa: &mut IkeSa, outbox: &mut Outbox) {
        if !sa.state().is_established() || sa.is_busy() || sa.has_half_open_child() {
            return;
        }

        if !sa.deferred_deletes.is_empty() {
            let spis: Vec<u32> = sa.deferred_deletes.drain(..).collect();
            if self.send_delete(sa, spis) {
                return;
            }
        }

        while let Some(session) = sa.pending.pop_front() {
            match self.start_child(sa, &session) {
                Ok(()) => return,
                Err(e) => {
                    logging::log_internal_drop("CREATE_CHILD_SA", &e);
                    report_failure(
                        sa,
                        session.pdu_session_id,
                        FailureCause::TransportResourceUnavailable,
                        outbox,
                    );
                }
            }
        }

        resolve_procedure(sa, outbox);
    }

    /// Seal a gateway request and put it on the wire
    fn send_request(
        &self,
        sa: &IkeSa,
        header: IkeHeader,
        payloads: &[IkePayload],
    ) -> Result<Vec<u8>> {
        let datagram = sa.channel().seal(header, payloads)?;
        self.transport.send(&datagram, sa.gateway_addr, sa.ue_addr)?;
        Ok(datagram)
    }

    /// Send CREATE_CHILD_SA for one PDU session
    ///
    /// The Child SA only enters the SA once its request is sent; on failure
    /// the reserved SPI is freed again.
    fn start_child(&self, sa: &mut IkeSa, session: &PduSessionRequest) -> Result<()> {
        let inner_address = sa
            .inner_address
            .ok_or_else(|| Error::InvalidState("no inner address assigned".into()))?;

        let inbound_spi = self.store.allocate_child_spi(sa.local_spi);
        let nonce = generate_nonce();
        let header = sa.request_header(ExchangeType::CreateChildSa);
        let message_id = header.message_id;

        let sent = CreateChildSaExchange::request_payloads(&ChildSaRequest {
            inbound_spi,
            nonce: &nonce,
            inner_address,
            gateway_address: self.config.gateway_address,
            up_address: self.config.up_ip_address,
            session,
        })
        .and_then(|payloads| self.send_request(sa, header, &payloads));

        let datagram = match sent {
            Ok(datagram) => datagram,
            Err(e) => {
                self.store.release_child_spi(inbound_spi);
                return Err(e);
            }
        };

        sa.children.insert(
            inbound_spi,
            ChildSa::half_open(
                message_id,
                inbound_spi,
                Some(session.pdu_session_id),
                session.qfi_list.clone(),
                nonce,
            ),
        );
        logging::log_child_sa_transition(
            inbound_spi,
            Some(session.pdu_session_id),
            "NONE",
            &ChildSaState::HalfOpen.to_string(),
        );

        sa.commit_request(OutstandingRequest::new(
            message_id,
            datagram,
            sa.gateway_addr,
            sa.ue_addr,
            RequestKind::CreateChildSa { inbound_spi },
            Instant::now(),
        ));
        Ok(())
    }

    /// Send an INFORMATIONAL Delete for released Child SAs
    ///
    /// Returns whether the request went out. SPIs of a Delete that cannot
    /// be sent are freed right away.
    fn send_delete(&self, sa: &mut IkeSa, inbound_spis: Vec<u32>) -> bool {
        let header = sa.request_header(ExchangeType::Informational);
        let message_id = header.message_id;

        let sent = InformationalExchange::delete_child_sa_request(inbound_spis.clone())
            .and_then(|payloads| self.send_request(sa, header, &payloads));

        match sent {
            Ok(datagram) => {
                sa.commit_request(OutstandingRequest::new(
                    message_id,
                    datagram,
                    sa.gateway_addr,
                    sa.ue_addr,
                    RequestKind::DeleteChildSa { inbound_spis },
                    Instant::now(),
                ));
                true
            }
            Err(e) => {
                logging::log_internal_drop("INFORMATIONAL", &e);
                for spi in inbound_spis {
                    self.store.release_child_spi(spi);
                }
                false
            }
        }
    }

    /// Network binding of a Child SA of this IKE SA
    ///
    /// Addresses and ports come from the negotiated selectors.
    pub(crate) fn binding(
        &self,
        sa: &IkeSa,
        ip_protocol: u8,
        local: &TrafficSelector,
        remote: &TrafficSelector,
        xfrm_if_id: u32,
    ) -> NetworkBinding {
        NetworkBinding {
            local_public: *sa.gateway_addr.ip(),
            peer_public: *sa.ue_addr.ip(),
            local_selector: local.start_addr,
            remote_selector: remote.start_addr,
            local_ports: PortRange::of(local),
            remote_ports: PortRange::of(remote),
            ip_protocol,
            encapsulation: sa.encapsulation_required().then(|| UdpEncap {
                local_port: sa.gateway_addr.port(),
                peer_port: sa.ue_addr.port(),
            }),
            xfrm_if_id,
        }
    }

    /// Handle the device's answer to a CREATE_CHILD_SA request
    pub(crate) fn complete_child(
        &self,
        sa: &mut IkeSa,
        inbound_spi: u32,
        exchange: ExchangeType,
        payloads: Vec<IkePayload>,
        outbox: &mut Outbox,
    ) {
        let reply = if exchange == ExchangeType::CreateChildSa {
            CreateChildSaExchange::parse_response(payloads)
        } else {
            Err(Error::InvalidMessage(format!(
                "{} response to a CREATE_CHILD_SA request",
                exchange
            )))
        };

        let cause = match reply {
            Ok(ChildSaReply::Accepted {
                esp,
                nonce,
                ts_i,
                ts_r,
            }) => {
                logging::log_negotiation_result("ESP", 1, Some(esp.proposal.proposal_num));
                match self.install_user_plane_child(sa, inbound_spi, &esp, &nonce, ts_i, ts_r) {
                    Ok(child) => {
                        if let Some(device_id) = &sa.device_id {
                            outbox.push(Signal::PduSessionEstablished {
                                device_id: device_id.clone(),
                                child: Box::new(child),
                            });
                        }
                        return;
                    }
                    Err(e) => {
                        logging::log_internal_drop("CREATE_CHILD_SA", &e);
                        match e {
                            Error::KernelRule(_) => FailureCause::KernelRule,
                            _ => FailureCause::TransportResourceUnavailable,
                        }
                    }
                }
            }
            Ok(ChildSaReply::Rejected(notify_type)) => {
                warn!(
                    ike_spi_r = %hex::encode(sa.local_spi.to_be_bytes()),
                    child_spi = inbound_spi,
                    notify = notify_type,
                    "CREATE_CHILD_SA rejected by device"
                );
                FailureCause::PeerRejected(notify_type)
            }
            Err(Error::NoProposalChosen) => {
                logging::log_negotiation_result("ESP", 1, None);
                FailureCause::PeerRejected(NotifyType::NoProposalChosen.to_u16())
            }
            Err(e) => {
                logging::log_internal_drop("CREATE_CHILD_SA", &e);
                FailureCause::PeerRejected(NotifyType::InvalidSyntax.to_u16())
            }
        };

        self.fail_child(sa, inbound_spi, cause, outbox);
    }

    /// Key, bind, install and activate an answered Child SA
    ///
    /// Returns a copy of the Active Child SA for the signaling layer.
    fn install_user_plane_child(
        &self,
        sa: &mut IkeSa,
        inbound_spi: u32,
        esp: &ChosenEsp,
        peer_nonce: &[u8],
        ts_i: Option<TrafficSelector>,
        ts_r: Option<TrafficSelector>,
    ) -> Result<ChildSa> {
        let inner_address = sa
            .inner_address
            .ok_or_else(|| Error::InvalidState("no inner address assigned".into()))?;

        let remote = ts_i.unwrap_or_else(|| TrafficSelector::host(inner_address));
        let local = ts_r.unwrap_or_else(|| TrafficSelector::host(self.config.gateway_address));
        let xfrm_if_id = if sa.user_plane_sessions == 0 {
            self.xfrm_ifaces.default_id()
        } else {
            self.xfrm_ifaces.allocate_for_user_plane()?
        };
        let binding = self.binding(sa, ip_proto::GRE, &local, &remote, xfrm_if_id);

        let prf = sa.suite.prf;
        let child = sa.children.get_mut(&inbound_spi).ok_or_else(|| {
            Error::SaNotFound(format!("HalfOpen Child SA {:#010x}", inbound_spi))
        })?;

        let nonce = [child.local_nonce.as_slice(), peer_nonce].concat();
        let keys = derive_child_keys(esp, prf, &sa.keys.sk_d, &nonce)?;
        child.complete(esp, keys, binding)?;
        logging::log_child_sa_transition(
            inbound_spi,
            child.pdu_session_id,
            &ChildSaState::HalfOpen.to_string(),
            &ChildSaState::Completed.to_string(),
        );

        let rules = XfrmRules::from_child_sa(child, true)?;
        self.kernel.apply(&rules)?;
        child.activate()?;
        logging::log_child_sa_transition(
            inbound_spi,
            child.pdu_session_id,
            &ChildSaState::Completed.to_string(),
            &ChildSaState::Active.to_string(),
        );

        let active = child.clone();
        sa.user_plane_sessions += 1;
        Ok(active)
    }

    /// Release a Child SA that never became Active and report it
    pub(crate) fn fail_child(
        &self,
        sa: &mut IkeSa,
        inbound_spi: u32,
        cause: FailureCause,
        outbox: &mut Outbox,
    ) {
        let Some(mut child) = sa.children.remove(&inbound_spi) else {
            debug!(child_spi = inbound_spi, "Child SA already gone");
            return;
        };

        let from = child.state.to_string();
        if let Err(e) = child.release(Some(cause)) {
            logging::log_internal_drop("Child SA release", &e);
        }
        self.store.release_child_spi(inbound_spi);
        logging::log_child_sa_transition(inbound_spi, child.pdu_session_id, &from, &child.state.to_string());

        if let Some(pdu_session_id) = child.pdu_session_id {
            report_failure(sa, pdu_session_id, cause, outbox);
        }
    }

    /// Tear down a Child SA locally
    ///
    /// Kernel rules of an Active SA are removed. The inbound SPI stays
    /// reserved when `keep_spi` is set, until the Delete for it completes.
    pub(crate) fn release_child(&self, sa: &mut IkeSa, inbound_spi: u32, keep_spi: bool) -> Option<ChildSa> {
        let mut child = sa.children.remove(&inbound_spi)?;

        if child.is_active() {
            let is_initiator = child.pdu_session_id.is_some();
            let removed = XfrmRules::from_child_sa(&child, is_initiator)
                .and_then(|rules| self.kernel.remove(&rules));
            if let Err(e) = removed {
                logging::log_internal_drop("XFRM removal", &e);
            }
        }

        let from = child.state.to_string();
        if let Err(e) = child.release(None) {
            logging::log_internal_drop("Child SA release", &e);
        }
        if !keep_spi {
            self.store.release_child_spi(inbound_spi);
        }
        logging::log_child_sa_transition(inbound_spi, child.pdu_session_id, &from, &child.state.to_string());

        Some(child)
    }

    /// A gateway request ran out of retransmissions
    ///
    /// A timed-out CREATE_CHILD_SA fails its session and every pending one,
    /// and the IKE SA is marked failed in either case.
    pub(crate) fn exchange_timed_out(
        &self,
        sa: &mut IkeSa,
        request: OutstandingRequest,
        outbox: &mut Outbox,
    ) {
        match request.kind {
            RequestKind::CreateChildSa { inbound_spi } => {
                self.fail_child(sa, inbound_spi, FailureCause::Timeout, outbox);
                let pending: Vec<PduSessionRequest> = sa.pending.drain(..).collect();
                for session in pending {
                    report_failure(sa, session.pdu_session_id, FailureCause::Timeout, outbox);
                }
                resolve_procedure(sa, outbox);
            }
            RequestKind::DeleteChildSa { inbound_spis } => {
                for spi in inbound_spis {
                    self.store.release_child_spi(spi);
                }
            }
        }

        let from = sa.state();
        match sa.transition(IkeState::Failed) {
            Ok(()) => logging::log_ike_state_transition(
                sa.remote_spi,
                sa.local_spi,
                &from.to_string(),
                &IkeState::Failed.to_string(),
            ),
            Err(e) => logging::log_internal_drop("IKE SA state", &e),
        }
    }

    /// Release every resource an IKE SA holds and mark it deleted
    ///
    /// HalfOpen and pending sessions fail with `IkeSaDeleted`.
    pub(crate) fn teardown(&self, sa: &mut IkeSa, outbox: &mut Outbox) {
        self.store.remove_ike(sa.local_spi);
        self.store.release_half_open(sa.remote_spi, sa.init_peer, sa.local_spi);

        let half_open: Vec<u32> = sa
            .children
            .values()
            .filter(|child| child.state == ChildSaState::HalfOpen)
            .map(|child| child.inbound_spi)
            .collect();
        for spi in half_open {
            self.fail_child(sa, spi, FailureCause::IkeSaDeleted, outbox);
        }

        let remaining: Vec<u32> = sa.children.keys().copied().collect();
        for spi in remaining {
            self.release_child(sa, spi, false);
        }

        for spi in sa.deferred_deletes.drain(..) {
            self.store.release_child_spi(spi);
        }
        if let Some(request) = sa.outstanding.take() {
            if let RequestKind::DeleteChildSa { inbound_spis } = request.kind {
                for spi in inbound_spis {
                    self.store.release_child_spi(spi);
                }
            }
        }

        let pending: Vec<PduSessionRequest> = sa.pending.drain(..).collect();
        for session in pending {
            report_failure(sa, session.pdu_session_id, FailureCause::IkeSaDeleted, outbox);
        }
        resolve_procedure(sa, outbox);

        if let Some(address) = sa.inner_address.take() {
            self.pool.release(address);
        }
        if let Some(device_id) = &sa.device_id {
            self.store.unbind_device(device_id, sa.local_spi);
        }

        let from = sa.state();
        if sa.transition(IkeState::Deleted).is_ok() {
            logging::log_ike_state_transition(
                sa.remote_spi,
                sa.local_spi,
                &from.to_string(),
                &IkeState::Deleted.to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::signaling::{MemorySignaling, SignalingEvent};

    #[test]
    fn test_outbox_delivers_in_order() {
        let signaling = MemorySignaling::new();
        let mut outbox = Outbox::new();
        assert!(outbox.is_empty());

        outbox.push(Signal::SignalingSaEstablished {
            device_id: "ue".into(),
        });
        outbox.push(Signal::PduSessionFailed {
            device_id: "ue".into(),
            pdu_session_id: 3,
            cause: FailureCause::Timeout,
        });
        outbox.push(Signal::AllSessionsResolved {
            device_id: "ue".into(),
            procedure: SetupProcedure::PduSessionResourceSetup,
        });
        assert_eq!(outbox.signals().len(), 3);

        outbox.deliver(&signaling);
        assert_eq!(
            signaling.events(),
            vec![
                SignalingEvent::SignalingSaEstablished("ue".into()),
                SignalingEvent::PduSessionFailed("ue".into(), 3, FailureCause::Timeout),
                SignalingEvent::AllSessionsResolved(
                    "ue".into(),
                    SetupProcedure::PduSessionResourceSetup
                ),
            ]
        );
    }

    #[test]
    fn test_outbox_established_child() {
        let signaling = MemorySignaling::new();
        let mut outbox = Outbox::new();
        outbox.push(Signal::PduSessionEstablished {
            device_id: "ue".into(),
            child: Box::new(ChildSa::half_open(0, 0x4000, Some(9), vec![1], vec![])),
        });
        outbox.deliver(&signaling);

        assert_eq!(
            signaling.events(),
            vec![SignalingEvent::PduSessionEstablished("ue".into(), 9, 0x4000)]
        );
    }
}
