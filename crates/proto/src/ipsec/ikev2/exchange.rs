//! IKEv2 exchange builders and parsers
//!
//! The gateway answers IKE_SA_INIT and IKE_AUTH as responder and then
//! initiates one CREATE_CHILD_SA per PDU session. The types here turn
//! decoded messages into validated inputs and build the outgoing payloads;
//! SA bookkeeping and I/O live in the engine.
//!
//! # IKE_SA_INIT Exchange
//!
//! ```text
//! Device                            Gateway
//! -----------                       -----------
//! HDR, SAi1, KEi, Ni, N(NAT_D)+  -->
//!                     <--  HDR, SAr1, KEr, Nr, N(NAT_D)+
//! ```
//!
//! # IKE_AUTH Exchange
//!
//! ```text
//! HDR, SK {IDi, AUTH, CP(REQ), SAi2, TSi, TSr}  -->
//!                     <--  HDR, SK {IDr, AUTH, CP(REPLY), SAr2,
//!                              TSi, TSr, N(NAS_IP4), N(NAS_TCP_PORT)}
//! ```
//!
//! # CREATE_CHILD_SA Exchange (gateway initiated)
//!
//! ```text
//!                     <--  HDR, SK {SA, Ni, TSi, TSr,
//!                              N(5G_QOS_INFO), N(UP_IP4_ADDRESS)}
//! HDR, SK {SA, Nr, TSi, TSr}  -->
//! ```

use super::auth::{append_identity_hash, compute_shared_key_auth, signed_octets_prefix, verify_shared_key_auth};
use super::constants::{cfg, ExchangeType, IkeFlags, NotifyType};
use super::message::{IkeHeader, IkeMessage};
use super::negotiate::{negotiate_esp, negotiate_ike, ChosenEsp};
use super::payload::{
    AuthPayload, ConfigAttribute, ConfigurationPayload, IdPayload, IkePayload, KePayload,
    NoncePayload, NotifyPayload, SaPayload, TrafficSelector, TrafficSelectorsPayload,
};
use super::proposal::{
    EncrTransformId, EsnTransformId, IntegTransformId, Proposal, ProtocolId, Transform,
};
use super::state::InitMaterial;
use crate::ipsec::crypto::{compute_materials, DhSecret, IkeKeyLengths, IkeKeys, PrfAlgorithm};
use crate::ipsec::nat;
use crate::ipsec::signaling::PduSessionRequest;
use crate::ipsec::{Error, Result};
use rand::RngCore;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::trace;

/// Length of the nonces the gateway generates
pub const NONCE_LEN: usize = 32;

/// QoS info flag: the session's default QoS rule
const QOS_FLAG_DEFAULT: u8 = 0x01;

/// QoS info flag: a DSCP value follows
const QOS_FLAG_DSCP: u8 = 0x02;

/// Generate a fresh nonce
pub fn generate_nonce() -> Vec<u8> {
    let mut nonce = vec![0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Build an unprotected response carrying a single notify
///
/// SPIs and message ID are taken from the request; `responder_spi` is the
/// request's own value, or zero when the SA is unknown.
pub fn notify_response(
    request: &IkeHeader,
    exchange: ExchangeType,
    responder_spi: u64,
    notify: NotifyPayload,
) -> Vec<u8> {
    IkeMessage::new(
        IkeHeader::new(
            request.spi_i(),
            responder_spi,
            exchange,
            IkeFlags::response(false),
            request.message_id,
        ),
        vec![IkePayload::Notify(notify)],
    )
    .encode()
}

/// Notify that tells the device about a protocol-level error
///
/// Returns `None` for errors the device is never told about.
pub fn error_notify(error: &Error) -> Option<NotifyPayload> {
    let notify = match error {
        Error::NoProposalChosen => NotifyPayload::new(NotifyType::NoProposalChosen, Vec::new()),
        Error::InvalidKePayload { expected, .. } => {
            NotifyPayload::new(NotifyType::InvalidKePayload, expected.to_be_bytes().to_vec())
        }
        Error::AuthenticationFailed(_) => {
            NotifyPayload::new(NotifyType::AuthenticationFailed, Vec::new())
        }
        Error::ConfigurationRequired => {
            NotifyPayload::new(NotifyType::FailedCpRequired, Vec::new())
        }
        Error::UnsupportedVersion(_) => {
            NotifyPayload::new(NotifyType::InvalidMajorVersion, Vec::new())
        }
        Error::InvalidSpi(_) => NotifyPayload::new(NotifyType::InvalidIkeSpi, Vec::new()),
        _ => return None,
    };
    Some(notify)
}

/// First error notify among the payloads, if any
pub fn find_error_notify(payloads: &[IkePayload]) -> Option<u16> {
    payloads.iter().find_map(|payload| match payload {
        IkePayload::Notify(notify) if notify.notify_type < 16384 => Some(notify.notify_type),
        _ => None,
    })
}

/// IKE_SA_INIT exchange handler
pub struct IkeSaInitExchange;

impl IkeSaInitExchange {
    /// Process an IKE_SA_INIT request (responder)
    ///
    /// Negotiates the IKE suite, performs the DH exchange, runs NAT
    /// detection and derives the IKE SA keys.
    ///
    /// # Arguments
    ///
    /// * `request` - Decoded request
    /// * `raw` - Request bytes as received (first half of the device's signed octets)
    /// * `local_spi` - SPI reserved for the new SA
    /// * `ue_addr` - Address the request came from
    /// * `gateway_addr` - Address the request arrived at
    ///
    /// # Returns
    ///
    /// The encoded response and everything the new IKE SA is built from
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` if SA, KE or Nonce is missing
    /// - `NoProposalChosen` if no proposal is acceptable
    /// - `InvalidKePayload` if the KE group is not the chosen group
    /// - DH or key derivation errors
    pub fn process_request(
        request: &IkeMessage,
        raw: &[u8],
        local_spi: u64,
        ue_addr: SocketAddrV4,
        gateway_addr: SocketAddrV4,
    ) -> Result<(Vec<u8>, InitMaterial)> {
        let mut sa = None;
        let mut ke = None;
        let mut nonce = None;
        let mut notifies = Vec::new();

        for payload in &request.payloads {
            match payload {
                IkePayload::SA(p) => sa = Some(p),
                IkePayload::KE(p) => ke = Some(p),
                IkePayload::Nonce(p) => nonce = Some(p),
                IkePayload::Notify(p) => notifies.push(p),
                other => trace!(payload = other.type_u8(), "Payload ignored in IKE_SA_INIT"),
            }
        }

        let (Some(sa), Some(ke), Some(nonce)) = (sa, ke, nonce) else {
            return Err(Error::InvalidMessage(
                "IKE_SA_INIT request lacks SA, KE or Nonce".into(),
            ));
        };

        let suite = negotiate_ike(sa.proposals())?;
        let group_id = suite.dh_group.transform_id();
        if ke.dh_group != group_id {
            return Err(Error::InvalidKePayload {
                expected: group_id,
                received: ke.dh_group,
            });
        }

        let secret = DhSecret::generate();
        let (local_public, shared_key) = compute_materials(&secret, &ke.key_data, suite.dh_group)?;

        let nonce_r = generate_nonce();
        let spi_i = request.header.spi_i();
        let nat = nat::detect(
            spi_i,
            request.header.spi_r(),
            notifies,
            ue_addr,
            gateway_addr,
        );

        let concatenated_nonce = [nonce.nonce.as_slice(), nonce_r.as_slice()].concat();
        let keys = IkeKeys::derive(
            suite.prf,
            &concatenated_nonce,
            &shared_key,
            spi_i,
            local_spi,
            IkeKeyLengths {
                encr: suite.encryption.key_len(),
                integ: suite.integrity.key_len(),
            },
        )?;

        let (nat_source, nat_destination) =
            nat::response_notifies(spi_i, local_spi, gateway_addr, ue_addr);

        let response = IkeMessage::new(
            IkeHeader::new(
                spi_i,
                local_spi,
                ExchangeType::IkeSaInit,
                IkeFlags::response(false),
                request.header.message_id,
            ),
            vec![
                IkePayload::SA(SaPayload::new(vec![suite.proposal.clone()])),
                IkePayload::KE(KePayload::new(group_id, local_public)),
                IkePayload::Nonce(NoncePayload::new(nonce_r.clone())?),
                IkePayload::Notify(nat_source),
                IkePayload::Notify(nat_destination),
            ],
        )
        .encode();

        let material = InitMaterial {
            initiator_signed_octets: signed_octets_prefix(raw, &nonce_r),
            responder_signed_octets: signed_octets_prefix(&response, &nonce.nonce),
            suite,
            nonce_i: nonce.nonce.clone(),
            nonce_r,
            dh_shared_key: shared_key,
            keys,
            nat,
        };

        Ok((response, material))
    }
}

/// Validated content of an IKE_AUTH request
#[derive(Debug, Clone)]
pub struct IkeAuthRequest {
    /// Device identity
    pub id_i: IdPayload,
    /// Device AUTH, if sent
    pub auth: Option<AuthPayload>,
    /// Offered ESP proposals
    pub sa: SaPayload,
    /// Initiator traffic selectors
    pub ts_i: TrafficSelectorsPayload,
    /// Responder traffic selectors
    pub ts_r: TrafficSelectorsPayload,
    /// Configuration request
    pub cp: Option<ConfigurationPayload>,
}

impl IkeAuthRequest {
    /// Identity string the signaling layer knows the device by
    pub fn device_id(&self) -> String {
        self.id_i
            .as_string()
            .unwrap_or_else(|| hex::encode(&self.id_i.data))
    }

    /// Whether the device asked for an inner IPv4 address
    pub fn requests_inner_address(&self) -> bool {
        self.cp.as_ref().map_or(false, |cp| {
            cp.cfg_type == cfg::REQUEST && cp.has_attribute(cfg::INTERNAL_IP4_ADDRESS)
        })
    }
}

/// What the gateway puts in its IKE_AUTH response
#[derive(Debug, Clone)]
pub struct IkeAuthResponse {
    /// Gateway identity
    pub id_r: IdPayload,
    /// Gateway AUTH
    pub auth: AuthPayload,
    /// Inner address handed to the device
    pub inner_address: Ipv4Addr,
    /// Netmask of the device subnet
    pub netmask: Ipv4Addr,
    /// Accepted ESP proposal, carrying the gateway's inbound SPI
    pub proposal: Proposal,
    /// Gateway tunnel address (TSr and NAS address)
    pub gateway_address: Ipv4Addr,
    /// NAS signaling TCP port
    pub nas_tcp_port: u16,
}

/// IKE_AUTH exchange handler
pub struct IkeAuthExchange;

impl IkeAuthExchange {
    /// Pick the required payloads out of a decrypted IKE_AUTH request
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessage` if IDi, SA, TSi or TSr is missing
    pub fn parse_request(payloads: Vec<IkePayload>) -> Result<IkeAuthRequest> {
        let mut id_i = None;
        let mut auth = None;
        let mut sa = None;
        let mut ts_i = None;
        let mut ts_r = None;
        let mut cp = None;

        for payload in payloads {
            match payload {
                IkePayload::IDi(p) => id_i = Some(p),
                IkePayload::AUTH(p) => auth = Some(p),
                IkePayload::SA(p) => sa = Some(p),
                IkePayload::TSi(p) => ts_i = Some(p),
                IkePayload::TSr(p) => ts_r = Some(p),
                IkePayload::CP(p) => cp = Some(p),
                other => trace!(payload = other.type_u8(), "Payload ignored in IKE_AUTH"),
            }
        }

        let (Some(id_i), Some(sa), Some(ts_i), Some(ts_r)) = (id_i, sa, ts_i, ts_r) else {
            return Err(Error::InvalidMessage(
                "IKE_AUTH request lacks IDi, SA, TSi or TSr".into(),
            ));
        };

        Ok(IkeAuthRequest {
            id_i,
            auth,
            sa,
            ts_i,
            ts_r,
            cp,
        })
    }

    /// Select the ESP proposal for the signaling Child SA
    ///
    /// # Errors
    ///
    /// Returns `NoProposalChosen` if nothing offered is acceptable
    pub fn negotiate(request: &IkeAuthRequest) -> Result<ChosenEsp> {
        negotiate_esp(request.sa.proposals())
    }

    /// Verify the device's AUTH payload
    ///
    /// # Arguments
    ///
    /// * `ktipsec` - Device key from the signaling layer
    /// * `sk_pi` - SK_pi of the IKE SA
    /// * `signed_prefix` - `RealMessage1 | Nr` recorded at IKE_SA_INIT
    ///
    /// # Returns
    ///
    /// The complete initiator signed octets
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationFailed` if AUTH is missing or does not verify
    pub fn verify_device(
        prf: PrfAlgorithm,
        ktipsec: &[u8],
        sk_pi: &[u8],
        signed_prefix: &[u8],
        request: &IkeAuthRequest,
    ) -> Result<Vec<u8>> {
        let auth = request
            .auth
            .as_ref()
            .ok_or_else(|| Error::AuthenticationFailed("no AUTH payload".into()))?;

        let mut signed_octets = signed_prefix.to_vec();
        append_identity_hash(&mut signed_octets, prf, sk_pi, &request.id_i.to_payload_data())?;
        verify_shared_key_auth(prf, ktipsec, &signed_octets, auth)?;

        Ok(signed_octets)
    }

    /// Compute the gateway's AUTH payload
    ///
    /// # Returns
    ///
    /// The AUTH payload and the complete responder signed octets
    pub fn gateway_auth(
        prf: PrfAlgorithm,
        ktipsec: &[u8],
        sk_pr: &[u8],
        signed_prefix: &[u8],
        id_r: &IdPayload,
    ) -> Result<(AuthPayload, Vec<u8>)> {
        let mut signed_octets = signed_prefix.to_vec();
        append_identity_hash(&mut signed_octets, prf, sk_pr, &id_r.to_payload_data())?;
        let auth = compute_shared_key_auth(prf, ktipsec, &signed_octets)?;
        Ok((auth, signed_octets))
    }

    /// Payloads of the IKE_AUTH response, in wire order
    pub fn response_payloads(response: IkeAuthResponse) -> Vec<IkePayload> {
        vec![
            IkePayload::IDr(response.id_r),
            IkePayload::AUTH(response.auth),
            IkePayload::CP(ConfigurationPayload::new(
                cfg::REPLY,
                vec![
                    ConfigAttribute {
                        attr_type: cfg::INTERNAL_IP4_ADDRESS,
                        value: response.inner_address.octets().to_vec(),
                    },
                    ConfigAttribute {
                        attr_type: cfg::INTERNAL_IP4_NETMASK,
                        value: response.netmask.octets().to_vec(),
                    },
                ],
            )),
            IkePayload::SA(SaPayload::new(vec![response.proposal])),
            IkePayload::TSi(TrafficSelectorsPayload::new(vec![TrafficSelector::host(
                response.inner_address,
            )])),
            IkePayload::TSr(TrafficSelectorsPayload::new(vec![TrafficSelector::host(
                response.gateway_address,
            )])),
            IkePayload::Notify(NotifyPayload::new(
                NotifyType::NasIp4Address,
                response.gateway_address.octets().to_vec(),
            )),
            IkePayload::Notify(NotifyPayload::new(
                NotifyType::NasTcpPort,
                response.nas_tcp_port.to_be_bytes().to_vec(),
            )),
        ]
    }
}

/// Parameters of a gateway CREATE_CHILD_SA request
#[derive(Debug, Clone)]
pub struct ChildSaRequest<'a> {
    /// SPI the gateway will receive on
    pub inbound_spi: u32,
    /// Gateway nonce
    pub nonce: &'a [u8],
    /// Device inner address (TSi)
    pub inner_address: Ipv4Addr,
    /// Gateway tunnel address (TSr)
    pub gateway_address: Ipv4Addr,
    /// Gateway user-plane address
    pub up_address: Ipv4Addr,
    /// Session the SA is for
    pub session: &'a PduSessionRequest,
}

/// Device answer to a CREATE_CHILD_SA request
#[derive(Debug, Clone)]
pub enum ChildSaReply {
    /// SA accepted
    Accepted {
        /// Accepted ESP proposal (SPI is the gateway's outbound SPI)
        esp: ChosenEsp,
        /// Device nonce
        nonce: Vec<u8>,
        /// First initiator selector, if any
        ts_i: Option<TrafficSelector>,
        /// First responder selector, if any
        ts_r: Option<TrafficSelector>,
    },
    /// Device answered with an error notify
    Rejected(u16),
}

/// CREATE_CHILD_SA exchange handler (gateway as initiator)
pub struct CreateChildSaExchange;

impl CreateChildSaExchange {
    /// Payloads of a CREATE_CHILD_SA request for one PDU session
    ///
    /// The ESP proposal offers ENCR_NULL, HMAC-SHA1-96 when the session
    /// requires integrity, and no ESN.
    pub fn request_payloads(request: &ChildSaRequest<'_>) -> Result<Vec<IkePayload>> {
        let mut proposal = Proposal::new(1, ProtocolId::Esp)
            .with_spi(request.inbound_spi.to_be_bytes().to_vec())
            .add_transform(Transform::encr(EncrTransformId::Null));
        if request.session.integrity_required {
            proposal = proposal.add_transform(Transform::integ(IntegTransformId::HmacSha1_96));
        }
        proposal = proposal.add_transform(Transform::esn(EsnTransformId::NoEsn));

        Ok(vec![
            IkePayload::SA(SaPayload::new(vec![proposal])),
            IkePayload::Nonce(NoncePayload::new(request.nonce.to_vec())?),
            IkePayload::TSi(TrafficSelectorsPayload::new(vec![TrafficSelector::host(
                request.inner_address,
            )])),
            IkePayload::TSr(TrafficSelectorsPayload::new(vec![TrafficSelector::host(
                request.gateway_address,
            )])),
            IkePayload::Notify(Self::qos_info(request.session)?),
            IkePayload::Notify(NotifyPayload::new(
                NotifyType::UpIp4Address,
                request.up_address.octets().to_vec(),
            )),
        ])
    }

    /// 5G_QOS_INFO notify for a session
    ///
    /// ```text
    /// | length | PDU session ID | QFI count | QFI ... | flags | [DSCP] |
    /// ```
    ///
    /// `length` counts the octets after itself.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the QFI list does not fit the
    /// one-octet count and length fields
    pub fn qos_info(session: &PduSessionRequest) -> Result<NotifyPayload> {
        let qfi_count = u8::try_from(session.qfi_list.len()).map_err(|_| {
            Error::InvalidParameter(format!("{} QFIs in one PDU session", session.qfi_list.len()))
        })?;

        let mut data = Vec::with_capacity(5 + session.qfi_list.len());
        data.push(0);
        data.push(session.pdu_session_id);
        data.push(qfi_count);
        data.extend_from_slice(&session.qfi_list);

        let mut flags = QOS_FLAG_DEFAULT;
        if session.dscp.is_some() {
            flags |= QOS_FLAG_DSCP;
        }
        data.push(flags);
        if let Some(dscp) = session.dscp {
            data.push(dscp);
        }

        data[0] = u8::try_from(data.len() - 1).map_err(|_| {
            Error::InvalidParameter(format!("5G_QOS_INFO of {} octets", data.len() - 1))
        })?;
        Ok(NotifyPayload::new(NotifyType::QosInfo5g, data))
    }

    /// Interpret a decrypted CREATE_CHILD_SA response
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` if SA, Nonce, TSi or TSr is missing
    /// - `NoProposalChosen` if the returned proposal is not acceptable
    pub fn parse_response(payloads: Vec<IkePayload>) -> Result<ChildSaReply> {
        if let Some(notify_type) = find_error_notify(&payloads) {
            return Ok(ChildSaReply::Rejected(notify_type));
        }

        let mut sa = None;
        let mut nonce = None;
        let mut ts_i = None;
        let mut ts_r = None;

        for payload in payloads {
            match payload {
                IkePayload::SA(p) => sa = Some(p),
                IkePayload::Nonce(p) => nonce = Some(p),
                IkePayload::TSi(p) => ts_i = Some(p),
                IkePayload::TSr(p) => ts_r = Some(p),
                other => trace!(payload = other.type_u8(), "Payload ignored in CREATE_CHILD_SA"),
            }
        }

        let (Some(sa), Some(nonce), Some(ts_i), Some(ts_r)) = (sa, nonce, ts_i, ts_r) else {
            return Err(Error::InvalidMessage(
                "CREATE_CHILD_SA response lacks SA, Nonce, TSi or TSr".into(),
            ));
        };

        Ok(ChildSaReply::Accepted {
            esp: negotiate_esp(sa.proposals())?,
            nonce: nonce.nonce,
            ts_i: ts_i.selectors.into_iter().next(),
            ts_r: ts_r.selectors.into_iter().next(),
        })
    }
}
