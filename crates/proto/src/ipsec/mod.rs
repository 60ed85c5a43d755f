//! IKEv2 SA engine of a non-3GPP access gateway
//!
//! Devices reach the 5G core over an untrusted access network by building
//! an IKEv2 tunnel to the gateway. This module is the gateway's side of
//! that tunnel:
//!
//! - **IKEv2** (Internet Key Exchange v2) - RFC 7296, responder for
//!   IKE_SA_INIT and IKE_AUTH, initiator for CREATE_CHILD_SA
//! - **NAT-T** (NAT Traversal) - RFC 3948 detection and UDP 4500
//! - **Child SA orchestration** - one signaling Child SA, then one Child SA
//!   per PDU session, installed as kernel XFRM rules
//!
//! # Architecture
//!
//! ```text
//!           UDP 500 / 4500
//!                 ↓
//!          GatewayServer ──> IkeEngine ──> SaStore (IKE SA, Child SA)
//!                                │
//!          ┌─────────────────────┼─────────────────────┐
//!          ↓                     ↓                     ↓
//!   SignalingLayer         KernelRuleSink          Transport
//!  (profiles, events)     (XFRM state/policy)    (UDP datagrams)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tngf_proto::ipsec::{EngineConfig, GatewayServer};
//! use tngf_proto::ipsec::signaling::{MemorySignaling, PduSessionRequest, SetupProcedure};
//! use tngf_proto::ipsec::xfrm::TracingSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .with_bind_address("192.0.2.10".parse()?)
//!         .with_gateway_address("10.0.0.1".parse()?)
//!         .with_ue_subnet("10.0.0.0/24".parse()?)
//!         .with_fqdn("tngf.example.org")
//!         .with_nas_tcp_port(20000)
//!         .with_up_ip_address("192.0.2.11".parse()?)
//!         .build()?;
//!
//!     let signaling = Arc::new(MemorySignaling::new());
//!     let server = GatewayServer::bind(config, signaling, Arc::new(TracingSink)).await?;
//!     let engine = server.engine();
//!     tokio::spawn(server.run());
//!
//!     // Later, once the device is registered:
//!     engine.setup_pdu_sessions(
//!         "imsi-001010000000001",
//!         vec![PduSessionRequest::new(1, vec![9])],
//!         SetupProcedure::PduSessionResourceSetup,
//!     )?;
//!     Ok(())
//! }
//! ```
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2 Protocol
//! - [RFC 3948](https://datatracker.ietf.org/doc/html/rfc3948) - NAT Traversal
//! - 3GPP TS 24.502 - Access to the 5G core via non-3GPP access networks
//!
//! # Security
//!
//! - No unsafe code
//! - Constant-time AUTH and checksum comparison
//! - Key material zeroized on drop

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod child_sa;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ikev2;
pub mod logging;
pub mod nat;
pub mod orchestrator;
pub mod pool;
pub mod retransmit;
pub mod server;
pub mod signaling;
pub mod store;
pub mod transport;
pub mod xfrm;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::IkeEngine;
pub use error::{Error, Result};
pub use server::GatewayServer;
pub use signaling::{DeviceProfile, FailureCause, PduSessionRequest, SetupProcedure, SignalingLayer};
