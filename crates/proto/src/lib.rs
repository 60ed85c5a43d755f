//! Protocol implementations for a non-3GPP access gateway.
//!
//! This crate provides the IKEv2 side of the gateway:
//!
//! - **IKEv2 SA engine** - IKE_SA_INIT / IKE_AUTH responder, Child SA
//!   initiator for PDU sessions, NAT traversal (RFC 7296, RFC 3948)
//! - **Kernel rules** - XFRM state and policy descriptions for every Child SA
//!
//! # Features
//!
//! - `ipsec` (default) - the IKEv2 SA engine and its UDP server
//!
//! # Example
//!
//! ```rust
//! use tngf_proto::ipsec::ikev2::{ExchangeType, IkeFlags, IkeHeader, IkeMessage};
//!
//! // Encode a bare IKE header and decode it again
//! let message = IkeMessage::new(
//!     IkeHeader::new(1, 2, ExchangeType::Informational, IkeFlags::request(false), 0),
//!     Vec::new(),
//! );
//! let wire_format = message.encode();
//!
//! let parsed = IkeMessage::decode(&wire_format).unwrap();
//! assert_eq!(parsed.header.spi_r(), 2);
//! ```
//!
//! # Security
//!
//! - All cryptographic primitives come from the RustCrypto crates
//! - Constant-time operations for authentication
//! - Secure memory handling with `zeroize`
//! - Fuzz target for the IKE message decoder
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2 Protocol
//! - [RFC 3948](https://datatracker.ietf.org/doc/html/rfc3948) - UDP Encapsulation of ESP
//! - 3GPP TS 24.502 - Access to the 5G core via non-3GPP access networks

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ipsec")]
pub mod ipsec;
