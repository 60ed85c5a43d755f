//! Structured logging for the SA engine
//!
//! Every event carries the fields needed to follow one device through the
//! exchanges: `ike_spi_i`/`ike_spi_r` for the IKE SA, `child_spi` and
//! `pdu_session_id` for Child SAs, `peer` for the device's public address.
//!
//! # Log Levels
//!
//! - **TRACE**: raw datagram flow
//! - **DEBUG**: received exchanges, negotiation results, NAT detection
//! - **INFO**: IKE and Child SA state transitions
//! - **WARN**: notifies sent to devices, retransmissions, integrity failures
//! - **ERROR**: internal failures that drop a message
//!
//! # Example
//!
//! ```no_run
//! use tngf_proto::ipsec::logging;
//!
//! tracing_subscriber::fmt()
//!     .with_env_filter("tngf_proto::ipsec=debug")
//!     .init();
//!
//! logging::log_ike_state_transition(0x0102, 0x0304, "INIT_DONE", "ESTABLISHED");
//! ```

use super::Error;
use std::net::SocketAddrV4;
use tracing::{debug, error, info, warn};

/// Log IKE SA state transition
pub fn log_ike_state_transition(spi_i: u64, spi_r: u64, old_state: &str, new_state: &str) {
    info!(
        ike_spi_i = %hex::encode(spi_i.to_be_bytes()),
        ike_spi_r = %hex::encode(spi_r.to_be_bytes()),
        state_from = old_state,
        state_to = new_state,
        "IKE SA state transition"
    );
}

/// Log an IKE request or response received from a device
///
/// # Arguments
///
/// * `exchange` - Exchange name (e.g., "IKE_AUTH")
/// * `peer` - Device public address
/// * `message_id` - Message ID from the header
/// * `is_response` - Whether the RESPONSE flag is set
pub fn log_exchange_received(exchange: &str, peer: SocketAddrV4, message_id: u32, is_response: bool) {
    debug!(
        exchange = exchange,
        %peer,
        message_id = message_id,
        response = is_response,
        "IKE message received"
    );
}

/// Log proposal negotiation
///
/// # Arguments
///
/// * `protocol` - "IKE" or "ESP"
/// * `offered` - Number of proposals offered
/// * `chosen` - Number of the chosen proposal, or None if no match
pub fn log_negotiation_result(protocol: &str, offered: usize, chosen: Option<u8>) {
    match chosen {
        Some(num) => debug!(
            protocol = protocol,
            proposals_offered = offered,
            chosen_proposal = num,
            "Proposal negotiation successful"
        ),
        None => warn!(
            protocol = protocol,
            proposals_offered = offered,
            "Proposal negotiation failed - no acceptable proposal"
        ),
    }
}

/// Log Child SA state transition
pub fn log_child_sa_transition(
    child_spi: u32,
    pdu_session_id: Option<u8>,
    old_state: &str,
    new_state: &str,
) {
    match pdu_session_id {
        Some(pdu) => info!(
            child_spi = child_spi,
            pdu_session_id = pdu,
            state_from = old_state,
            state_to = new_state,
            "Child SA state transition"
        ),
        None => info!(
            child_spi = child_spi,
            state_from = old_state,
            state_to = new_state,
            "Signaling Child SA state transition"
        ),
    }
}

/// Log NAT detection outcome
pub fn log_nat_detection(peer: SocketAddrV4, ue_behind_nat: bool, gateway_behind_nat: bool) {
    debug!(
        %peer,
        ue_behind_nat = ue_behind_nat,
        gateway_behind_nat = gateway_behind_nat,
        "NAT detection complete"
    );
}

/// Log an error notify sent to a device
pub fn log_notify_sent(peer: SocketAddrV4, notify: &str, exchange: &str) {
    warn!(
        %peer,
        notify = notify,
        exchange = exchange,
        "Error notify sent"
    );
}

/// Log an integrity check failure
///
/// The message is dropped without a response.
pub fn log_integrity_failure(spi_i: u64, spi_r: u64, peer: SocketAddrV4) {
    warn!(
        ike_spi_i = %hex::encode(spi_i.to_be_bytes()),
        ike_spi_r = %hex::encode(spi_r.to_be_bytes()),
        %peer,
        "Integrity check failed, message dropped"
    );
}

/// Log an internal error that drops a message
///
/// # Arguments
///
/// * `context` - Where the error occurred (e.g., "IKE_SA_INIT")
/// * `error` - The error
pub fn log_internal_drop(context: &str, error: &Error) {
    error!(context = context, error = %error, "Message dropped");
}

/// Log a retransmission of a gateway request
pub fn log_retransmit(spi_r: u64, message_id: u32, attempt: u32, exhausted: bool) {
    if exhausted {
        warn!(
            ike_spi_r = %hex::encode(spi_r.to_be_bytes()),
            message_id = message_id,
            attempts = attempt,
            "Request timed out"
        );
    } else {
        debug!(
            ike_spi_r = %hex::encode(spi_r.to_be_bytes()),
            message_id = message_id,
            attempt = attempt,
            "Request retransmitted"
        );
    }
}
