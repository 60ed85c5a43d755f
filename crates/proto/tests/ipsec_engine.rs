//! IKE SA engine tests
//!
//! Drives the engine with a simulated device through IKE_SA_INIT, IKE_AUTH
//! and device-initiated INFORMATIONAL exchanges.

#![cfg(feature = "ipsec")]

mod common;

use common::{
    device_addr, gateway_nat_t_addr, notify_of, register, Device, Gateway, DEVICE_ID, GATEWAY_INNER, KTIPSEC,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};
use tngf_proto::ipsec::{
    crypto::DhGroup,
    ikev2::{
        auth::verify_shared_key_auth,
        constants::{cfg, ip_proto, ExchangeType, NotifyType},
        message::IkeMessage,
        payload::{DeletePayload, IkePayload},
        proposal::{DhTransformId, EncrTransformId, PrfTransformId, Proposal, ProtocolId, Transform},
        state::IkeState,
    },
    signaling::{SetupProcedure, SignalingEvent},
};

fn unprotected_notify(raw: &[u8]) -> (ExchangeType, u16, Vec<u8>) {
    let message = IkeMessage::decode(raw).unwrap();
    assert!(message.header.flags.is_response());
    match &message.payloads[..] {
        [IkePayload::Notify(notify)] => (message.header.exchange_type, notify.notify_type, notify.data.clone()),
        other => panic!("expected a single notify, got {:?}", other),
    }
}

#[test]
fn test_ike_sa_init_creates_sa() {
    let gateway = Gateway::new();
    let mut device = Device::new();

    let response = gateway.exchange(&device.init_request(), &device);
    let message = IkeMessage::decode(&response).unwrap();
    assert_eq!(message.header.spi_i(), device.spi_i);
    assert_ne!(message.header.spi_r(), 0);
    assert_eq!(message.header.message_id, 0);

    let types: Vec<u8> = message.payloads.iter().map(IkePayload::type_u8).collect();
    assert_eq!(types, vec![33, 34, 40, 41, 41]);
    assert!(notify_of(&message.payloads, NotifyType::NatDetectionSourceIp).is_some());
    assert!(notify_of(&message.payloads, NotifyType::NatDetectionDestinationIp).is_some());

    device.process_init_response(&response);
    let sa = gateway.engine.ike_sa(device.spi_r).expect("IKE SA stored");
    let sa = sa.lock();
    assert_eq!(sa.state(), IkeState::InitDone);
    assert_eq!(sa.remote_spi, device.spi_i);
    assert!(!sa.encapsulation_required());
    assert_eq!(sa.keys.sk_d.as_slice(), device.keys().sk_d.as_slice());
}

#[test]
fn test_no_proposal_chosen() {
    let gateway = Gateway::new();
    let mut device = Device::new();
    let proposal = Proposal::new(1, ProtocolId::Ike)
        .add_transform(Transform::encr(EncrTransformId::TripleDes))
        .add_transform(Transform::prf(PrfTransformId::HmacSha1))
        .add_transform(Transform::dh(DhTransformId::Group2));
    let source = device.addr;
    let request = device.init_request_with(vec![proposal], DhGroup::Modp1024, source);

    let (exchange, notify_type, _) = unprotected_notify(&gateway.exchange(&request, &device));
    assert_eq!(exchange, ExchangeType::IkeSaInit);
    assert_eq!(notify_type, NotifyType::NoProposalChosen.to_u16());
    assert_eq!(gateway.engine.store().ike_count(), 0);
}

#[test]
fn test_invalid_ke_payload_names_chosen_group() {
    let gateway = Gateway::new();
    let mut device = Device::new();
    let source = device.addr;
    let request = device.init_request_with(
        vec![Device::ike_proposal(DhTransformId::Group14)],
        DhGroup::Modp1024,
        source,
    );

    let (exchange, notify_type, data) = unprotected_notify(&gateway.exchange(&request, &device));
    assert_eq!(exchange, ExchangeType::IkeSaInit);
    assert_eq!(notify_type, NotifyType::InvalidKePayload.to_u16());
    assert_eq!(data, 14u16.to_be_bytes().to_vec());
    assert_eq!(gateway.engine.store().ike_count(), 0);
}

#[test]
fn test_ike_auth_response() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let response = gateway.exchange(&device.auth_request(), &device);
    let (header, payloads) = device.open(&response);
    assert_eq!(header.exchange_type, ExchangeType::IkeAuth);
    assert!(header.flags.is_response());
    assert_eq!(header.message_id, 1);

    let types: Vec<u8> = payloads.iter().map(IkePayload::type_u8).collect();
    assert_eq!(types, vec![36, 39, 47, 33, 44, 45, 41, 41]);

    let (IkePayload::IDr(id_r), IkePayload::AUTH(auth)) = (&payloads[0], &payloads[1]) else {
        panic!("IDr and AUTH expected first");
    };
    assert_eq!(id_r.as_string().as_deref(), Some("tngf.example.org"));
    verify_shared_key_auth(
        Device::prf(),
        common::KTIPSEC,
        &device.gateway_signed_octets(id_r),
        auth,
    )
    .unwrap();

    let IkePayload::CP(cp) = &payloads[2] else {
        panic!("CP expected");
    };
    assert_eq!(cp.cfg_type, cfg::REPLY);
    let inner = Ipv4Addr::from(<[u8; 4]>::try_from(cp.attributes[0].value.as_slice()).unwrap());
    assert!("10.0.0.0/24".parse::<tngf_proto::ipsec::pool::Ipv4Subnet>().unwrap().contains(inner));
    assert_ne!(inner, GATEWAY_INNER);
    assert_eq!(cp.attributes[1].value, vec![255, 255, 255, 0]);

    let IkePayload::SA(sa) = &payloads[3] else {
        panic!("SA expected");
    };
    let inbound_spi = sa.proposals()[0].esp_spi().unwrap();

    let nas_ip = notify_of(&payloads, NotifyType::NasIp4Address).unwrap();
    assert_eq!(nas_ip.data, GATEWAY_INNER.octets().to_vec());
    let nas_port = notify_of(&payloads, NotifyType::NasTcpPort).unwrap();
    assert_eq!(nas_port.data, 20000u16.to_be_bytes().to_vec());

    let installed = gateway.kernel.installed();
    assert_eq!(installed.len(), 1);
    let rules = &installed[0];
    assert_eq!(rules.inbound_state.spi, inbound_spi);
    assert_eq!(rules.outbound_state.spi, device.esp_spi);
    assert_eq!(rules.inbound_policy.proto, ip_proto::TCP);
    assert_eq!(rules.inbound_policy.src, inner);
    assert_eq!(rules.inbound_policy.dst, GATEWAY_INNER);
    assert_eq!(rules.inbound_state.if_id, gateway.engine.config().xfrm_interface_id);
    assert!(rules.inbound_state.encap.is_none());

    let sa = gateway.engine.ike_sa(device.spi_r).unwrap();
    let sa = sa.lock();
    assert_eq!(sa.state(), IkeState::Established);
    assert_eq!(sa.inner_address, Some(inner));
    assert_eq!(sa.device_id.as_deref(), Some(DEVICE_ID));
    assert_eq!(gateway.engine.store().device_spi(DEVICE_ID), Some(device.spi_r));
}

#[test]
fn test_registration_without_sessions_resolves_procedure() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let (_device, sent) = register(&gateway);

    assert!(sent.is_empty());
    assert_eq!(
        gateway.signaling.events(),
        vec![
            SignalingEvent::SignalingSaEstablished(DEVICE_ID.to_string()),
            SignalingEvent::AllSessionsResolved(
                DEVICE_ID.to_string(),
                SetupProcedure::InitialContextSetup
            ),
        ]
    );
}

#[test]
fn test_wrong_key_fails_authentication() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let request = device.request(
        ExchangeType::IkeAuth,
        1,
        &device.auth_payloads(b"not the device key"),
    );
    let response = gateway.exchange(&request, &device);
    let (header, payloads) = device.open(&response);
    assert_eq!(header.exchange_type, ExchangeType::IkeAuth);
    assert!(notify_of(&payloads, NotifyType::AuthenticationFailed).is_some());

    assert_eq!(gateway.engine.store().ike_count(), 0);
    assert_eq!(gateway.engine.pool().allocated_count(), 0);
    assert!(gateway.kernel.installed().is_empty());
    assert!(gateway.signaling.events().is_empty());
}

#[test]
fn test_unknown_device_fails_authentication() {
    let gateway = Gateway::new();
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let response = gateway.exchange(&device.auth_request(), &device);
    let (_, payloads) = device.open(&response);
    assert!(notify_of(&payloads, NotifyType::AuthenticationFailed).is_some());
    assert_eq!(gateway.engine.store().ike_count(), 0);
}

#[test]
fn test_tampered_ike_auth_dropped() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let mut request = device.auth_request();
    let last = request.len() - 1;
    request[last] ^= 0xff;

    assert!(gateway.deliver(&request, &device).is_empty());
    let sa = gateway.engine.ike_sa(device.spi_r).unwrap();
    assert_eq!(sa.lock().state(), IkeState::InitDone);

    // The genuine request still goes through afterwards
    assert_eq!(gateway.deliver(&device.auth_request(), &device).len(), 1);
}

#[test]
fn test_retransmitted_ike_auth_answered_from_cache() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let request = device.auth_request();
    let first = gateway.exchange(&request, &device);
    let second = gateway.exchange(&request, &device);
    assert_eq!(first, second);

    let established = gateway
        .signaling
        .events()
        .into_iter()
        .filter(|e| matches!(e, SignalingEvent::SignalingSaEstablished(_)))
        .count();
    assert_eq!(established, 1);
    assert_eq!(gateway.kernel.installed().len(), 1);
}

#[test]
fn test_retransmitted_ike_sa_init_answered_from_cache() {
    let gateway = Gateway::new();
    let mut device = Device::new();
    let init = device.init_request();

    let first = gateway.exchange(&init, &device);
    for _ in 0..49 {
        assert_eq!(gateway.exchange(&init, &device), first);
    }
    assert_eq!(gateway.engine.store().ike_count(), 1);

    device.process_init_response(&first);
    let sa = gateway.engine.ike_sa(device.spi_r).expect("IKE SA stored");
    assert_eq!(sa.lock().state(), IkeState::InitDone);

    // Same SPI from another address is a different device
    let mut neighbour = Device::new();
    neighbour.addr = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 8), 500);
    let init = neighbour.init_request();
    assert_eq!(gateway.deliver(&init, &neighbour).len(), 1);
    assert_eq!(gateway.engine.store().ike_count(), 2);

    // A different request reusing a half-open SPI is dropped
    let changed = device.init_request_with(
        vec![Device::ike_proposal(DhTransformId::Group14)],
        DhGroup::Modp2048,
        device_addr(),
    );
    assert!(gateway.deliver(&changed, &device).is_empty());
    assert_eq!(gateway.engine.store().ike_count(), 2);
}

#[test]
fn test_half_open_sa_expires() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);

    let mut stalled = Device::new();
    stalled.addr = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 8), 500);
    let init = stalled.init_request();
    gateway.exchange(&init, &stalled);

    let (device, _) = register(&gateway);
    assert_eq!(gateway.engine.store().ike_count(), 2);

    gateway.engine.poll_retransmits(Instant::now());
    assert_eq!(gateway.engine.store().ike_count(), 2);

    gateway.engine.poll_retransmits(Instant::now() + Duration::from_secs(3600));
    assert_eq!(gateway.engine.store().ike_count(), 1);
    assert_eq!(
        gateway.engine.ike_sa(device.spi_r).unwrap().lock().state(),
        IkeState::Established
    );
    assert!(gateway.transport.drain().is_empty());

    // The stalled device may start over
    assert_eq!(gateway.deliver(&init, &stalled).len(), 1);
    assert_eq!(gateway.engine.store().ike_count(), 2);
}

#[test]
fn test_ike_auth_without_inner_address_request_rejected() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();
    let init = device.init_request();
    device.process_init_response(&gateway.exchange(&init, &device));

    let mut payloads = device.auth_payloads(KTIPSEC);
    payloads.retain(|p| !matches!(p, IkePayload::CP(_)));
    let request = device.request(ExchangeType::IkeAuth, 1, &payloads);

    let response = gateway.exchange(&request, &device);
    let (header, payloads) = device.open(&response);
    assert_eq!(header.exchange_type, ExchangeType::IkeAuth);
    assert!(header.flags.is_response());
    assert!(notify_of(&payloads, NotifyType::FailedCpRequired).is_some());

    assert_eq!(gateway.engine.store().ike_count(), 0);
    assert_eq!(gateway.engine.pool().allocated_count(), 0);
    assert!(gateway.kernel.installed().is_empty());
    assert!(gateway.signaling.events().is_empty());
}

#[test]
fn test_device_behind_nat_moves_to_port_4500() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let mut device = Device::new();

    // The device hashes its private address, the gateway sees the NAT's
    let private = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 20), 500);
    let request = device.init_request_with(
        vec![Device::ike_proposal(DhTransformId::Group2)],
        DhGroup::Modp1024,
        private,
    );
    device.process_init_response(&gateway.exchange(&request, &device));
    {
        let sa = gateway.engine.ike_sa(device.spi_r).unwrap();
        let sa = sa.lock();
        assert!(sa.nat.ue_behind_nat);
        assert!(!sa.nat.gateway_behind_nat);
        assert!(sa.encapsulation_required());
    }

    device.addr = SocketAddrV4::new(*device_addr().ip(), 4500);
    device.gateway = gateway_nat_t_addr();
    let mut marked = vec![0u8; 4];
    marked.extend_from_slice(&device.auth_request());

    let sent = gateway.deliver(&marked, &device);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].local, gateway_nat_t_addr());
    assert_eq!(sent[0].peer, device.addr);

    let installed = gateway.kernel.installed();
    let encap = installed[0].inbound_state.encap.expect("UDP encapsulation");
    assert_eq!(encap.src_port, 4500);
    assert_eq!(encap.dst_port, 4500);
}

#[test]
fn test_keepalive_answered() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let (mut device, _) = register(&gateway);

    let response = gateway.exchange(&device.informational(&[]), &device);
    let (header, payloads) = device.open(&response);
    assert_eq!(header.exchange_type, ExchangeType::Informational);
    assert_eq!(header.message_id, 2);
    assert!(payloads.is_empty());
    assert_eq!(gateway.engine.store().ike_count(), 1);
}

#[test]
fn test_out_of_window_request_dropped() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let (device, _) = register(&gateway);

    let request = device.request(ExchangeType::Informational, 9, &[]);
    assert!(gateway.deliver(&request, &device).is_empty());
}

#[test]
fn test_device_deletes_ike_sa() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let (mut device, _) = register(&gateway);

    let request = device.informational(&[IkePayload::Delete(DeletePayload::ike())]);
    let response = gateway.exchange(&request, &device);
    let (_, payloads) = device.open(&response);
    assert!(payloads.is_empty());

    assert_eq!(gateway.engine.store().ike_count(), 0);
    assert_eq!(gateway.engine.store().child_count(), 0);
    assert_eq!(gateway.engine.store().device_spi(DEVICE_ID), None);
    assert_eq!(gateway.engine.pool().allocated_count(), 0);
    assert_eq!(gateway.kernel.removed().len(), 1);

    // Later traffic for the SA is answered with INVALID_IKE_SPI
    let late = device.informational(&[]);
    let (exchange, notify_type, _) = unprotected_notify(&gateway.exchange(&late, &device));
    assert_eq!(exchange, ExchangeType::Informational);
    assert_eq!(notify_type, NotifyType::InvalidIkeSpi.to_u16());
}

#[test]
fn test_remove_device() {
    let gateway = Gateway::new();
    gateway.add_device(Vec::new(), SetupProcedure::InitialContextSetup);
    let (device, _) = register(&gateway);

    gateway.engine.remove_device(device.spi_r).unwrap();
    assert_eq!(gateway.engine.store().ike_count(), 0);
    assert_eq!(gateway.kernel.removed().len(), 1);
    assert!(gateway.engine.remove_device(device.spi_r).is_err());
}
