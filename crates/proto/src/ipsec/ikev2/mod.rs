//! IKEv2 (Internet Key Exchange v2) protocol, responder side
//!
//! This module implements the parts of RFC 7296 an access gateway needs
//! when devices connect to it.
//!
//! # Protocol Overview
//!
//! 1. **IKE_SA_INIT**: the device proposes algorithms and a DH value
//! 2. **IKE_AUTH**: shared-key authentication with the device's `Ktipsec`,
//!    inner address assignment and the signaling Child SA
//! 3. **CREATE_CHILD_SA**: the gateway initiates one Child SA per PDU session
//! 4. **INFORMATIONAL**: keepalives and Deletes in both directions
//!
//! # Message Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Initiator's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       IKE SA Responder's SPI                  |
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          Message ID                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            Length                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! # References
//!
//! - [RFC 7296](https://datatracker.ietf.org/doc/html/rfc7296) - IKEv2 Protocol

pub mod auth;
pub mod constants;
pub mod exchange;
pub mod informational;
pub mod message;
pub mod negotiate;
pub mod payload;
pub mod proposal;
pub mod state;

pub use auth::*;
pub use constants::*;
pub use exchange::*;
pub use informational::*;
pub use message::*;
pub use negotiate::{negotiate_esp, negotiate_ike, ChosenEsp, ChosenIke};
pub use payload::*;
pub use proposal::*;
pub use state::*;
