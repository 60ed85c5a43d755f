//! Retransmission of gateway-initiated requests
//!
//! The gateway initiates CREATE_CHILD_SA and INFORMATIONAL exchanges. Each
//! IKE SA has at most one such request outstanding; the datagram is kept so
//! it can be resent verbatim (RFC 7296 Section 2.1) until the device
//! answers or the retry budget runs out.
//!
//! # Example Flow
//!
//! ```text
//! Time:  0s       5s       10s      15s      20s
//!        |--------|--------|--------|--------|
//!        Send     Resend   Resend   Resend   Exhausted
//!
//! Config: timeout=5s, max_retries=3
//! ```

use std::net::SocketAddrV4;
use std::time::{Duration, Instant};

/// Default response timeout (5 seconds)
pub const DEFAULT_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum retransmissions
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Retransmission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitConfig {
    /// Time to wait for a response before resending
    pub timeout: Duration,

    /// Resends before the exchange is declared failed
    pub max_retries: u32,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        RetransmitConfig {
            timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// What an outstanding request was for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// CREATE_CHILD_SA for the HalfOpen Child SA with this inbound SPI
    CreateChildSa {
        /// Inbound SPI of the HalfOpen Child SA
        inbound_spi: u32,
    },
    /// INFORMATIONAL deleting these Child SAs (inbound SPIs)
    DeleteChildSa {
        /// Inbound SPIs of the Child SAs being deleted
        inbound_spis: Vec<u32>,
    },
}

/// Outcome of polling an outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitAction {
    /// Keep waiting
    Idle,
    /// Send the datagram again
    Resend,
    /// Give up on the exchange
    Exhausted,
}

/// A request sent by the gateway and not yet answered
#[derive(Debug, Clone)]
pub struct OutstandingRequest {
    /// Message ID the response must carry
    pub message_id: u32,

    /// Encoded request, ready to resend
    pub datagram: Vec<u8>,

    /// Local address the request leaves from
    pub local: SocketAddrV4,

    /// Device address
    pub peer: SocketAddrV4,

    /// Purpose of the exchange
    pub kind: RequestKind,

    sent_at: Instant,
    retries: u32,
}

impl OutstandingRequest {
    /// Track a request sent at `now`
    pub fn new(
        message_id: u32,
        datagram: Vec<u8>,
        local: SocketAddrV4,
        peer: SocketAddrV4,
        kind: RequestKind,
        now: Instant,
    ) -> Self {
        OutstandingRequest {
            message_id,
            datagram,
            local,
            peer,
            kind,
            sent_at: now,
            retries: 0,
        }
    }

    /// Number of resends so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Decide what to do at `now`
    ///
    /// A `Resend` result restarts the timer and counts one retry.
    pub fn poll(&mut self, now: Instant, config: &RetransmitConfig) -> RetransmitAction {
        if now.saturating_duration_since(self.sent_at) < config.timeout {
            return RetransmitAction::Idle;
        }

        if self.retries >= config.max_retries {
            return RetransmitAction::Exhausted;
        }

        self.retries += 1;
        self.sent_at = now;
        RetransmitAction::Resend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn request(now: Instant) -> OutstandingRequest {
        OutstandingRequest::new(
            4,
            vec![1, 2, 3],
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 500),
            SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 500),
            RequestKind::CreateChildSa { inbound_spi: 7 },
            now,
        )
    }

    #[test]
    fn test_retransmit_config_default() {
        let config = RetransmitConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_idle_before_timeout() {
        let start = Instant::now();
        let mut req = request(start);
        let config = RetransmitConfig::default();

        assert_eq!(
            req.poll(start + Duration::from_secs(4), &config),
            RetransmitAction::Idle
        );
        assert_eq!(req.retries(), 0);
    }

    #[test]
    fn test_resend_then_exhausted() {
        let start = Instant::now();
        let mut req = request(start);
        let config = RetransmitConfig {
            timeout: Duration::from_secs(5),
            max_retries: 2,
        };

        let mut now = start;
        for expected in 1..=2 {
            now += Duration::from_secs(5);
            assert_eq!(req.poll(now, &config), RetransmitAction::Resend);
            assert_eq!(req.retries(), expected);
        }

        // Timer restarted by the last resend
        assert_eq!(
            req.poll(now + Duration::from_secs(1), &config),
            RetransmitAction::Idle
        );
        assert_eq!(
            req.poll(now + Duration::from_secs(5), &config),
            RetransmitAction::Exhausted
        );
    }

    #[test]
    fn test_zero_retries_fails_at_first_timeout() {
        let start = Instant::now();
        let mut req = request(start);
        let config = RetransmitConfig {
            timeout: Duration::from_millis(100),
            max_retries: 0,
        };
        assert_eq!(
            req.poll(start + Duration::from_millis(100), &config),
            RetransmitAction::Exhausted
        );
    }
}
