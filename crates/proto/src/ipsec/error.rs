//! Error types for the IKEv2 SA engine
//!
//! This module defines a unified error type for all engine operations,
//! covering wire decoding, negotiation, key derivation and the collaborators
//! (signaling, kernel rules, transport) the engine hands work to.

use std::fmt;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid IKEv2 message format
    InvalidMessage(String),

    /// Invalid IKEv2 payload
    InvalidPayload(String),

    /// Unsupported protocol major version
    UnsupportedVersion(u8),

    /// Unsupported exchange type
    UnsupportedExchangeType(u8),

    /// No acceptable proposal found
    NoProposalChosen,

    /// KE payload group differs from the negotiated DH group
    InvalidKePayload {
        /// Group chosen by negotiation
        expected: u16,
        /// Group carried in the KE payload
        received: u16,
    },

    /// Diffie-Hellman group is not supported
    UnsupportedGroup(u16),

    /// Cipher, integrity or PRF algorithm is not supported
    UnsupportedAlgorithm(String),

    /// Key derivation could not produce the requested material
    KeyDerivation(String),

    /// Integrity checksum of an encrypted payload did not verify
    IntegrityCheckFailed,

    /// Authentication failed
    AuthenticationFailed(String),

    /// Request lacks a required configuration payload
    ConfigurationRequired,

    /// Security Association not found
    SaNotFound(String),

    /// Cryptographic operation failed
    CryptoError(String),

    /// Invalid key length
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid packet length
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// Message too large
    MessageTooLarge(u32),

    /// Invalid Security Parameter Index
    InvalidSpi(u64),

    /// State machine error
    InvalidState(String),

    /// Rejected state transition
    InvalidStateTransition {
        /// Current state
        from: String,
        /// Requested state
        to: String,
    },

    /// Invalid configuration or call parameter
    InvalidParameter(String),

    /// Kernel rule collaborator failure
    KernelRule(String),

    /// Transport (socket) failure
    Transport(String),

    /// I/O error
    Io(String),

    /// Internal error (should not happen)
    Internal(String),
}

impl Error {
    /// Whether the peer is told about this error with a notify payload
    ///
    /// Protocol-level failures are answered; internal failures and
    /// integrity failures are logged and the message is dropped.
    pub fn is_peer_visible(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedVersion(_)
                | Error::NoProposalChosen
                | Error::InvalidKePayload { .. }
                | Error::AuthenticationFailed(_)
                | Error::ConfigurationRequired
                | Error::InvalidSpi(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidMessage(msg) => write!(f, "Invalid IKE message: {}", msg),
            Error::InvalidPayload(msg) => write!(f, "Invalid IKE payload: {}", msg),
            Error::UnsupportedVersion(v) => {
                write!(f, "Unsupported IKE version: 0x{:02x}", v)
            }
            Error::UnsupportedExchangeType(t) => {
                write!(f, "Unsupported exchange type: {}", t)
            }
            Error::NoProposalChosen => {
                write!(f, "No acceptable proposal found in negotiation")
            }
            Error::InvalidKePayload { expected, received } => write!(
                f,
                "KE payload group mismatch: expected {}, got {}",
                expected, received
            ),
            Error::UnsupportedGroup(group) => {
                write!(f, "Unsupported Diffie-Hellman group: {}", group)
            }
            Error::UnsupportedAlgorithm(msg) => write!(f, "Unsupported algorithm: {}", msg),
            Error::KeyDerivation(msg) => write!(f, "Key derivation failed: {}", msg),
            Error::IntegrityCheckFailed => write!(f, "Integrity checksum verification failed"),
            Error::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {}", msg)
            }
            Error::ConfigurationRequired => {
                write!(f, "Configuration payload requesting an inner address required")
            }
            Error::SaNotFound(id) => write!(f, "Security Association not found: {}", id),
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::InvalidKeyLength { expected, actual } => {
                write!(f, "Invalid key length: expected {}, got {}", expected, actual)
            }
            Error::InvalidLength { expected, actual } => {
                write!(
                    f,
                    "Invalid length: expected {}, got {}",
                    expected, actual
                )
            }
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::MessageTooLarge(size) => {
                write!(f, "IKE message too large: {} bytes", size)
            }
            Error::InvalidSpi(spi) => write!(f, "Invalid SPI: 0x{:016x}", spi),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidStateTransition { from, to } => {
                write!(f, "Invalid state transition: {} -> {}", from, to)
            }
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::KernelRule(msg) => write!(f, "Kernel rule error: {}", msg),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Convert from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<Error> for tngf_platform::PlatformError {
    fn from(err: Error) -> Self {
        match err {
            Error::AuthenticationFailed(_) | Error::IntegrityCheckFailed => {
                tngf_platform::PlatformError::Security(err.to_string())
            }
            Error::InvalidParameter(msg) => tngf_platform::PlatformError::Config(msg),
            other => tngf_platform::PlatformError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidMessage("test".to_string());
        assert_eq!(err.to_string(), "Invalid IKE message: test");

        let err = Error::UnsupportedVersion(0x30);
        assert_eq!(err.to_string(), "Unsupported IKE version: 0x30");

        let err = Error::InvalidLength {
            expected: 10,
            actual: 5,
        };
        assert_eq!(err.to_string(), "Invalid length: expected 10, got 5");

        let err = Error::InvalidKePayload {
            expected: 14,
            received: 2,
        };
        assert_eq!(
            err.to_string(),
            "KE payload group mismatch: expected 14, got 2"
        );
    }

    #[test]
    fn test_error_clone() {
        let err1 = Error::NoProposalChosen;
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("file not found")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_peer_visibility() {
        assert!(Error::NoProposalChosen.is_peer_visible());
        assert!(Error::InvalidKePayload {
            expected: 14,
            received: 2
        }
        .is_peer_visible());
        assert!(Error::AuthenticationFailed("bad".into()).is_peer_visible());
        assert!(Error::ConfigurationRequired.is_peer_visible());

        assert!(!Error::IntegrityCheckFailed.is_peer_visible());
        assert!(!Error::KeyDerivation("short".into()).is_peer_visible());
        assert!(!Error::UnsupportedAlgorithm("x".into()).is_peer_visible());
    }

    #[test]
    fn test_platform_conversion() {
        let err: tngf_platform::PlatformError = Error::IntegrityCheckFailed.into();
        assert!(matches!(err, tngf_platform::PlatformError::Security(_)));

        let err: tngf_platform::PlatformError = Error::InvalidParameter("fqdn".into()).into();
        assert!(matches!(err, tngf_platform::PlatformError::Config(_)));
    }
}
