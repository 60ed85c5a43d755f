//! Simulated device and gateway harness shared by the engine tests

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tngf_proto::ipsec::{
    crypto::{compute_materials, DhGroup, DhSecret, EncryptionAlgorithm, IkeKeyLengths, IkeKeys,
        IntegrityAlgorithm, PrfAlgorithm, SecureChannel},
    ikev2::{
        auth::{append_identity_hash, compute_shared_key_auth, signed_octets_prefix},
        constants::{cfg, ExchangeType, IkeFlags, NotifyType},
        message::{IkeHeader, IkeMessage},
        payload::{
            ConfigAttribute, ConfigurationPayload, IdPayload, IkePayload, KePayload, NoncePayload,
            NotifyPayload, SaPayload, TrafficSelector, TrafficSelectorsPayload,
        },
        proposal::{
            DhTransformId, EncrTransformId, EsnTransformId, IntegTransformId, PrfTransformId,
            Proposal, ProtocolId, Transform,
        },
    },
    nat::NatDetectionHash,
    retransmit::RetransmitConfig,
    signaling::{DeviceProfile, MemorySignaling, PduSessionRequest, SetupProcedure},
    transport::{RecordingTransport, SentDatagram},
    xfrm::RecordingSink,
    EngineConfig, IkeEngine,
};
use zeroize::Zeroizing;

pub const DEVICE_ID: &str = "imsi-001010000000001";
pub const KTIPSEC: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const GATEWAY_INNER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const UP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 11);

pub fn gateway_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 500)
}

pub fn gateway_nat_t_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(192, 0, 2, 10), 4500)
}

pub fn device_addr() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 7), 500)
}

/// Engine wired to in-memory collaborators
pub struct Gateway {
    pub engine: IkeEngine,
    pub transport: Arc<RecordingTransport>,
    pub signaling: Arc<MemorySignaling>,
    pub kernel: Arc<RecordingSink>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::with_retransmit(RetransmitConfig {
            timeout: Duration::from_millis(100),
            max_retries: 2,
        })
    }

    pub fn with_retransmit(retransmit: RetransmitConfig) -> Self {
        let config = EngineConfig::builder()
            .with_bind_address(*gateway_addr().ip())
            .with_gateway_address(GATEWAY_INNER)
            .with_ue_subnet("10.0.0.0/24".parse().unwrap())
            .with_fqdn("tngf.example.org")
            .with_nas_tcp_port(20000)
            .with_up_ip_address(UP_ADDRESS)
            .with_retransmit(retransmit)
            .build()
            .unwrap();

        let transport = Arc::new(RecordingTransport::new());
        let signaling = Arc::new(MemorySignaling::new());
        let kernel = Arc::new(RecordingSink::new());
        let engine = IkeEngine::new(config, signaling.clone(), kernel.clone(), transport.clone());

        Gateway {
            engine,
            transport,
            signaling,
            kernel,
        }
    }

    pub fn add_device(&self, pending: Vec<PduSessionRequest>, procedure: SetupProcedure) {
        self.signaling.add_profile(DeviceProfile {
            device_id: DEVICE_ID.to_string(),
            ktipsec: Zeroizing::new(KTIPSEC.to_vec()),
            pending,
            procedure,
        });
    }

    /// Deliver a datagram from the device and collect what the gateway sent
    pub fn deliver(&self, data: &[u8], device: &Device) -> Vec<SentDatagram> {
        self.engine.handle_datagram(data, device.gateway, device.addr);
        self.transport.drain()
    }

    /// The single datagram the gateway answered with
    pub fn exchange(&self, data: &[u8], device: &Device) -> Vec<u8> {
        let mut sent = self.deliver(data, device);
        assert_eq!(sent.len(), 1, "expected exactly one datagram, got {}", sent.len());
        sent.remove(0).data
    }
}

/// Minimal IKEv2 initiator playing the device
pub struct Device {
    pub addr: SocketAddrV4,
    pub gateway: SocketAddrV4,
    pub spi_i: u64,
    pub spi_r: u64,
    pub esp_spi: u32,
    secret: DhSecret,
    nonce_i: Vec<u8>,
    nonce_r: Vec<u8>,
    init_request: Vec<u8>,
    init_response: Vec<u8>,
    keys: Option<IkeKeys>,
    next_message_id: u32,
}

impl Device {
    pub fn new() -> Self {
        Device {
            addr: device_addr(),
            gateway: gateway_addr(),
            spi_i: 0x0102_0304_0506_0708,
            spi_r: 0,
            esp_spi: 0xd000_0001,
            secret: DhSecret::generate(),
            nonce_i: vec![0x5a; 32],
            nonce_r: Vec::new(),
            init_request: Vec::new(),
            init_response: Vec::new(),
            keys: None,
            next_message_id: 2,
        }
    }

    pub fn encryption() -> EncryptionAlgorithm {
        EncryptionAlgorithm::from_transform(EncrTransformId::AesCbc.to_u16(), Some(128)).unwrap()
    }

    pub fn integrity() -> IntegrityAlgorithm {
        IntegrityAlgorithm::from_transform_id(IntegTransformId::HmacSha1_96.to_u16()).unwrap()
    }

    pub fn prf() -> PrfAlgorithm {
        PrfAlgorithm::from_transform_id(PrfTransformId::HmacSha1.to_u16()).unwrap()
    }

    pub fn ike_proposal(dh: DhTransformId) -> Proposal {
        Proposal::new(1, ProtocolId::Ike)
            .add_transform(Transform::encr(EncrTransformId::AesCbc).with_key_length(128))
            .add_transform(Transform::prf(PrfTransformId::HmacSha1))
            .add_transform(Transform::integ(IntegTransformId::HmacSha1_96))
            .add_transform(Transform::dh(dh))
    }

    pub fn esp_proposal(spi: u32) -> Proposal {
        Proposal::new(1, ProtocolId::Esp)
            .with_spi(spi.to_be_bytes().to_vec())
            .add_transform(Transform::encr(EncrTransformId::Null))
            .add_transform(Transform::integ(IntegTransformId::HmacSha1_96))
            .add_transform(Transform::esn(EsnTransformId::NoEsn))
    }

    /// IKE_SA_INIT request
    ///
    /// `source_seen` is the source address the device believes it sends
    /// from; anything but `self.addr` makes the gateway see a NAT.
    pub fn init_request_with(&mut self, proposals: Vec<Proposal>, ke_group: DhGroup, source_seen: SocketAddrV4) -> Vec<u8> {
        let message = IkeMessage::new(
            IkeHeader::new(self.spi_i, 0, ExchangeType::IkeSaInit, IkeFlags::request(true), 0),
            vec![
                IkePayload::SA(SaPayload::new(proposals)),
                IkePayload::KE(KePayload::new(
                    ke_group.transform_id(),
                    self.secret.public_value(ke_group),
                )),
                IkePayload::Nonce(NoncePayload::new(self.nonce_i.clone()).unwrap()),
                IkePayload::Notify(
                    NatDetectionHash::compute(self.spi_i, 0, source_seen)
                        .to_notify(NotifyType::NatDetectionSourceIp),
                ),
                IkePayload::Notify(
                    NatDetectionHash::compute(self.spi_i, 0, self.gateway)
                        .to_notify(NotifyType::NatDetectionDestinationIp),
                ),
            ],
        );
        self.init_request = message.encode();
        self.init_request.clone()
    }

    pub fn init_request(&mut self) -> Vec<u8> {
        let source = self.addr;
        self.init_request_with(
            vec![Self::ike_proposal(DhTransformId::Group2)],
            DhGroup::Modp1024,
            source,
        )
    }

    /// Derive IKE SA keys from the gateway's IKE_SA_INIT response
    pub fn process_init_response(&mut self, raw: &[u8]) {
        let message = IkeMessage::decode(raw).unwrap();
        assert!(message.header.flags.is_response());
        assert!(!message.header.flags.is_initiator());
        self.spi_r = message.header.spi_r();

        let mut ke = None;
        for payload in &message.payloads {
            match payload {
                IkePayload::KE(p) => ke = Some(p.clone()),
                IkePayload::Nonce(p) => self.nonce_r = p.nonce.clone(),
                _ => {}
            }
        }
        let ke = ke.expect("KE payload in IKE_SA_INIT response");
        let group = DhGroup::from_transform_id(ke.dh_group).unwrap();
        let (_, shared) = compute_materials(&self.secret, &ke.key_data, group).unwrap();

        let nonces = [self.nonce_i.as_slice(), self.nonce_r.as_slice()].concat();
        self.keys = Some(
            IkeKeys::derive(
                Self::prf(),
                &nonces,
                &shared,
                self.spi_i,
                self.spi_r,
                IkeKeyLengths {
                    encr: Self::encryption().key_len(),
                    integ: Self::integrity().key_len(),
                },
            )
            .unwrap(),
        );
        self.init_response = raw.to_vec();
    }

    pub fn keys(&self) -> &IkeKeys {
        self.keys.as_ref().expect("IKE_SA_INIT completed")
    }

    fn channel(&self) -> SecureChannel<'_> {
        SecureChannel::initiator(Self::encryption(), Self::integrity(), self.keys())
    }

    pub fn id_i() -> IdPayload {
        IdPayload::from_fqdn(DEVICE_ID)
    }

    /// AUTH payload the device computes with `ktipsec`
    pub fn auth_payload(&self, ktipsec: &[u8]) -> IkePayload {
        let mut signed = signed_octets_prefix(&self.init_request, &self.nonce_r);
        append_identity_hash(&mut signed, Self::prf(), &self.keys().sk_pi, &Self::id_i().to_payload_data())
            .unwrap();
        IkePayload::AUTH(compute_shared_key_auth(Self::prf(), ktipsec, &signed).unwrap())
    }

    pub fn auth_payloads(&self, ktipsec: &[u8]) -> Vec<IkePayload> {
        vec![
            IkePayload::IDi(Self::id_i()),
            self.auth_payload(ktipsec),
            IkePayload::CP(ConfigurationPayload::new(
                cfg::REQUEST,
                vec![ConfigAttribute {
                    attr_type: cfg::INTERNAL_IP4_ADDRESS,
                    value: Vec::new(),
                }],
            )),
            IkePayload::SA(SaPayload::new(vec![Self::esp_proposal(self.esp_spi)])),
            IkePayload::TSi(TrafficSelectorsPayload::new(vec![TrafficSelector {
                ip_protocol: 0,
                start_port: 0,
                end_port: 65535,
                start_addr: Ipv4Addr::UNSPECIFIED,
                end_addr: Ipv4Addr::BROADCAST,
            }])),
            IkePayload::TSr(TrafficSelectorsPayload::new(vec![TrafficSelector::host(
                GATEWAY_INNER,
            )])),
        ]
    }

    /// Encrypted device request
    pub fn request(&self, exchange: ExchangeType, message_id: u32, payloads: &[IkePayload]) -> Vec<u8> {
        self.channel()
            .seal(
                IkeHeader::new(self.spi_i, self.spi_r, exchange, IkeFlags::request(true), message_id),
                payloads,
            )
            .unwrap()
    }

    /// Encrypted device response
    pub fn response(&self, exchange: ExchangeType, message_id: u32, payloads: &[IkePayload]) -> Vec<u8> {
        self.channel()
            .seal(
                IkeHeader::new(self.spi_i, self.spi_r, exchange, IkeFlags::response(true), message_id),
                payloads,
            )
            .unwrap()
    }

    pub fn auth_request(&self) -> Vec<u8> {
        self.request(ExchangeType::IkeAuth, 1, &self.auth_payloads(KTIPSEC))
    }

    /// Next INFORMATIONAL request from the device
    pub fn informational(&mut self, payloads: &[IkePayload]) -> Vec<u8> {
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        self.request(ExchangeType::Informational, message_id, payloads)
    }

    /// Decrypt a gateway message
    pub fn open(&self, raw: &[u8]) -> (IkeHeader, Vec<IkePayload>) {
        let message = IkeMessage::decode(raw).unwrap();
        let payloads = self.channel().open(raw, &message).unwrap();
        (message.header, payloads)
    }

    /// Responder signed octets for checking the gateway's AUTH
    pub fn gateway_signed_octets(&self, id_r: &IdPayload) -> Vec<u8> {
        let mut signed = signed_octets_prefix(&self.init_response, &self.nonce_i);
        append_identity_hash(&mut signed, Self::prf(), &self.keys().sk_pr, &id_r.to_payload_data())
            .unwrap();
        signed
    }

    /// Accept a gateway CREATE_CHILD_SA request
    pub fn accept_child(&self, request: &[u8], esp_spi: u32) -> Vec<u8> {
        let (header, payloads) = self.open(request);
        assert_eq!(header.exchange_type, ExchangeType::CreateChildSa);

        let mut ts_i = None;
        let mut ts_r = None;
        let mut proposal = None;
        for payload in payloads {
            match payload {
                IkePayload::TSi(p) => ts_i = Some(p),
                IkePayload::TSr(p) => ts_r = Some(p),
                IkePayload::SA(p) => proposal = p.proposals().first().cloned(),
                _ => {}
            }
        }

        let proposal = proposal.expect("SA payload").with_spi(esp_spi.to_be_bytes().to_vec());
        self.response(
            ExchangeType::CreateChildSa,
            header.message_id,
            &[
                IkePayload::SA(SaPayload::new(vec![proposal])),
                IkePayload::Nonce(NoncePayload::new(vec![0x77; 32]).unwrap()),
                IkePayload::TSi(ts_i.expect("TSi payload")),
                IkePayload::TSr(ts_r.expect("TSr payload")),
            ],
        )
    }

    /// Refuse a gateway request with an error notify
    pub fn reject(&self, request: &[u8], notify: NotifyType) -> Vec<u8> {
        let (header, _) = self.open(request);
        self.response(
            header.exchange_type,
            header.message_id,
            &[IkePayload::Notify(NotifyPayload::new(notify, Vec::new()))],
        )
    }

    /// Empty answer to a gateway INFORMATIONAL request
    pub fn acknowledge(&self, request: &[u8]) -> Vec<u8> {
        let (header, _) = self.open(request);
        self.response(ExchangeType::Informational, header.message_id, &[])
    }
}

/// Run IKE_SA_INIT and IKE_AUTH, returning the device and the first
/// gateway datagrams sent after the IKE_AUTH response
pub fn register(gateway: &Gateway) -> (Device, Vec<SentDatagram>) {
    let mut device = Device::new();
    let init = device.init_request();
    let response = gateway.exchange(&init, &device);
    device.process_init_response(&response);

    let mut sent = gateway.deliver(&device.auth_request(), &device);
    assert!(!sent.is_empty(), "no IKE_AUTH response");
    let auth_response = sent.remove(0);
    let (header, _) = device.open(&auth_response.data);
    assert_eq!(header.exchange_type, ExchangeType::IkeAuth);
    assert_eq!(header.message_id, 1);

    (device, sent)
}

pub fn notify_of(payloads: &[IkePayload], kind: NotifyType) -> Option<&NotifyPayload> {
    payloads.iter().find_map(|p| match p {
        IkePayload::Notify(n) if n.kind() == Some(kind) => Some(n),
        _ => None,
    })
}
