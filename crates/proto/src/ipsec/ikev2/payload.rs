//! IKEv2 Payload structures and parsing
//!
//! Implements IKE payloads as defined in RFC 7296 Section 3.2 and the
//! payload chain codec: [`encode_payloads`] turns a list of payload values
//! into octets with the next-payload fields linked, [`decode_payloads`]
//! walks a chain starting from a known first payload type.
//!
//! An Encrypted (SK) payload always ends a chain; its next-payload field
//! names the first payload inside the ciphertext.

use std::net::Ipv4Addr;

use super::constants::{PayloadType, TS_IPV4_ADDR_RANGE};
use super::proposal::{Proposal, ProtocolId};
use crate::ipsec::ikev2::constants::NotifyType;
use crate::ipsec::{Error, Result};

/// Generic IKE payload header (4 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Next payload type (raw, may be a type this engine does not know)
    pub next_payload: u8,

    /// Critical bit (if set, must understand this payload)
    pub critical: bool,

    /// Total payload length including header (4 bytes + data)
    pub length: u16,
}

impl PayloadHeader {
    /// Payload header size
    pub const SIZE: usize = 4;

    /// Create new payload header
    pub fn new(next_payload: u8, critical: bool, length: u16) -> Self {
        PayloadHeader {
            next_payload,
            critical,
            length,
        }
    }

    /// Parse payload header from bytes
    ///
    /// # Errors
    ///
    /// Returns error if buffer is too short or the length field is smaller
    /// than the header itself
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::BufferTooShort {
                required: Self::SIZE,
                available: data.len(),
            });
        }

        let next_payload = data[0];
        let critical = (data[1] & 0x80) != 0;
        let length = u16::from_be_bytes([data[2], data[3]]);

        if (length as usize) < Self::SIZE {
            return Err(Error::InvalidLength {
                expected: Self::SIZE,
                actual: length as usize,
            });
        }

        Ok(PayloadHeader {
            next_payload,
            critical,
            length,
        })
    }

    /// Serialize payload header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.next_payload;
        bytes[1] = if self.critical { 0x80 } else { 0x00 };
        bytes[2..4].copy_from_slice(&self.length.to_be_bytes());
        bytes
    }

    /// Get payload data length (excluding header)
    pub fn data_length(&self) -> usize {
        self.length as usize - Self::SIZE
    }
}

/// IKE payload values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IkePayload {
    /// Security Association payload
    SA(SaPayload),

    /// Key Exchange payload
    KE(KePayload),

    /// Identification payload (Initiator)
    IDi(IdPayload),

    /// Identification payload (Responder)
    IDr(IdPayload),

    /// Authentication payload
    AUTH(AuthPayload),

    /// Nonce payload
    Nonce(NoncePayload),

    /// Notify payload
    Notify(NotifyPayload),

    /// Delete payload
    Delete(DeletePayload),

    /// Traffic Selector payload (Initiator)
    TSi(TrafficSelectorsPayload),

    /// Traffic Selector payload (Responder)
    TSr(TrafficSelectorsPayload),

    /// Configuration payload
    CP(ConfigurationPayload),

    /// Encrypted and Authenticated payload
    SK(EncryptedPayload),

    /// Payload this engine does not interpret (raw data kept)
    Unknown {
        /// Raw payload type
        payload_type: u8,
        /// Critical bit as received
        critical: bool,
        /// Raw payload data (excluding header)
        data: Vec<u8>,
    },
}

impl IkePayload {
    /// Raw payload type number
    pub fn type_u8(&self) -> u8 {
        match self {
            IkePayload::SA(_) => PayloadType::SA.to_u8(),
            IkePayload::KE(_) => PayloadType::KE.to_u8(),
            IkePayload::IDi(_) => PayloadType::IDi.to_u8(),
            IkePayload::IDr(_) => PayloadType::IDr.to_u8(),
            IkePayload::AUTH(_) => PayloadType::AUTH.to_u8(),
            IkePayload::Nonce(_) => PayloadType::Nonce.to_u8(),
            IkePayload::Notify(_) => PayloadType::N.to_u8(),
            IkePayload::Delete(_) => PayloadType::D.to_u8(),
            IkePayload::TSi(_) => PayloadType::TSi.to_u8(),
            IkePayload::TSr(_) => PayloadType::TSr.to_u8(),
            IkePayload::CP(_) => PayloadType::CP.to_u8(),
            IkePayload::SK(_) => PayloadType::SK.to_u8(),
            IkePayload::Unknown { payload_type, .. } => *payload_type,
        }
    }

    /// Serialize payload body (without the generic header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        match self {
            IkePayload::SA(p) => p.to_payload_data(),
            IkePayload::KE(p) => p.to_payload_data(),
            IkePayload::IDi(p) | IkePayload::IDr(p) => p.to_payload_data(),
            IkePayload::AUTH(p) => p.to_payload_data(),
            IkePayload::Nonce(p) => p.to_payload_data(),
            IkePayload::Notify(p) => p.to_payload_data(),
            IkePayload::Delete(p) => p.to_payload_data(),
            IkePayload::TSi(p) | IkePayload::TSr(p) => p.to_payload_data(),
            IkePayload::CP(p) => p.to_payload_data(),
            IkePayload::SK(p) => p.data.clone(),
            IkePayload::Unknown { data, .. } => data.clone(),
        }
    }

    fn from_payload_data(payload_type: u8, critical: bool, data: &[u8]) -> Result<Self> {
        let payload = match PayloadType::from_u8(payload_type) {
            Some(PayloadType::SA) => IkePayload::SA(SaPayload::from_payload_data(data)?),
            Some(PayloadType::KE) => IkePayload::KE(KePayload::from_payload_data(data)?),
            Some(PayloadType::IDi) => IkePayload::IDi(IdPayload::from_payload_data(data)?),
            Some(PayloadType::IDr) => IkePayload::IDr(IdPayload::from_payload_data(data)?),
            Some(PayloadType::AUTH) => IkePayload::AUTH(AuthPayload::from_payload_data(data)?),
            Some(PayloadType::Nonce) => IkePayload::Nonce(NoncePayload::from_payload_data(data)?),
            Some(PayloadType::N) => IkePayload::Notify(NotifyPayload::from_payload_data(data)?),
            Some(PayloadType::D) => IkePayload::Delete(DeletePayload::from_payload_data(data)?),
            Some(PayloadType::TSi) => {
                IkePayload::TSi(TrafficSelectorsPayload::from_payload_data(data)?)
            }
            Some(PayloadType::TSr) => {
                IkePayload::TSr(TrafficSelectorsPayload::from_payload_data(data)?)
            }
            Some(PayloadType::CP) => {
                IkePayload::CP(ConfigurationPayload::from_payload_data(data)?)
            }
            Some(PayloadType::None) => {
                return Err(Error::InvalidPayload("Payload of type NONE in chain".into()))
            }
            _ => {
                if critical {
                    return Err(Error::InvalidPayload(format!(
                        "Unsupported critical payload type: {}",
                        payload_type
                    )));
                }
                IkePayload::Unknown {
                    payload_type,
                    critical,
                    data: data.to_vec(),
                }
            }
        };
        Ok(payload)
    }
}

/// Encode a payload chain
///
/// Each generic header's next-payload field is set to the type of the
/// payload that follows; the last one gets NONE unless it is an SK payload,
/// whose next-payload names the first inner payload.
pub fn encode_payloads(payloads: &[IkePayload]) -> Vec<u8> {
    let mut bytes = Vec::new();

    for (i, payload) in payloads.iter().enumerate() {
        let next_payload = match (payload, payloads.get(i + 1)) {
            (IkePayload::SK(sk), _) => sk.next_payload,
            (_, Some(next)) => next.type_u8(),
            (_, None) => PayloadType::None.to_u8(),
        };
        let critical = matches!(payload, IkePayload::Unknown { critical: true, .. });
        let body = payload.to_payload_data();
        let header = PayloadHeader::new(
            next_payload,
            critical,
            (PayloadHeader::SIZE + body.len()) as u16,
        );

        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&body);
    }

    bytes
}

/// Decode a payload chain
///
/// # Arguments
///
/// * `first_payload` - Type of the first payload (from the IKE header or an
///   SK payload's next-payload field)
/// * `data` - Chained payload octets
///
/// # Errors
///
/// Returns error on truncation, trailing garbage, an unknown critical
/// payload, or any payload body that fails to parse
pub fn decode_payloads(first_payload: u8, data: &[u8]) -> Result<Vec<IkePayload>> {
    let mut payloads = Vec::new();
    let mut next = first_payload;
    let mut offset = 0;

    while next != PayloadType::None.to_u8() {
        let header = PayloadHeader::from_bytes(&data[offset..])?;
        let end = offset + header.length as usize;
        if end > data.len() {
            return Err(Error::BufferTooShort {
                required: end,
                available: data.len(),
            });
        }
        let body = &data[offset + PayloadHeader::SIZE..end];

        if next == PayloadType::SK.to_u8() {
            payloads.push(IkePayload::SK(EncryptedPayload {
                next_payload: header.next_payload,
                data: body.to_vec(),
            }));
            offset = end;
            break;
        }

        payloads.push(IkePayload::from_payload_data(next, header.critical, body)?);
        next = header.next_payload;
        offset = end;
    }

    if offset != data.len() {
        return Err(Error::InvalidMessage(format!(
            "{} trailing bytes after payload chain",
            data.len() - offset
        )));
    }

    Ok(payloads)
}

/// Nonce Payload (RFC 7296 Section 3.9)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                            Nonce Data                         ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoncePayload {
    /// Nonce data
    pub nonce: Vec<u8>,
}

impl NoncePayload {
    /// Minimum nonce size (16 bytes)
    pub const MIN_SIZE: usize = 16;

    /// Maximum nonce size (256 bytes)
    pub const MAX_SIZE: usize = 256;

    /// Create new nonce payload
    pub fn new(nonce: Vec<u8>) -> Result<Self> {
        if nonce.len() < Self::MIN_SIZE {
            return Err(Error::InvalidPayload(format!(
                "Nonce too short: {} bytes (minimum {})",
                nonce.len(),
                Self::MIN_SIZE
            )));
        }

        if nonce.len() > Self::MAX_SIZE {
            return Err(Error::InvalidPayload(format!(
                "Nonce too long: {} bytes (maximum {})",
                nonce.len(),
                Self::MAX_SIZE
            )));
        }

        Ok(NoncePayload { nonce })
    }

    /// Parse nonce payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        Self::new(data.to_vec())
    }

    /// Serialize nonce payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        self.nonce.clone()
    }
}

/// Key Exchange Payload (RFC 7296 Section 3.4)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   Diffie-Hellman Group Num    |           RESERVED            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                       Key Exchange Data                       ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KePayload {
    /// Diffie-Hellman group number
    pub dh_group: u16,

    /// Key exchange data (public value)
    pub key_data: Vec<u8>,
}

impl KePayload {
    /// Create new KE payload
    pub fn new(dh_group: u16, key_data: Vec<u8>) -> Self {
        KePayload { dh_group, key_data }
    }

    /// Parse KE payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let dh_group = u16::from_be_bytes([data[0], data[1]]);
        let key_data = data[4..].to_vec();

        Ok(KePayload { dh_group, key_data })
    }

    /// Serialize KE payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + self.key_data.len());
        data.extend_from_slice(&self.dh_group.to_be_bytes());
        data.extend_from_slice(&[0u8, 0u8]);
        data.extend_from_slice(&self.key_data);
        data
    }
}

/// Security Association Payload (RFC 7296 Section 3.3)
///
/// Contains one or more proposals for security association negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaPayload {
    /// List of proposals
    pub proposals: Vec<Proposal>,
}

impl SaPayload {
    /// Create new SA payload with proposals
    pub fn new(proposals: Vec<Proposal>) -> Self {
        SaPayload { proposals }
    }

    /// Parse SA payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        let mut proposals = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let (proposal, is_last, consumed) = Proposal::from_bytes(&data[offset..])?;
            proposals.push(proposal);
            offset += consumed;
            if is_last {
                break;
            }
        }

        if offset != data.len() {
            return Err(Error::InvalidPayload(
                "SA payload has data after the last proposal".into(),
            ));
        }

        Ok(SaPayload { proposals })
    }

    /// Serialize SA payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let count = self.proposals.len();
        self.proposals
            .iter()
            .enumerate()
            .flat_map(|(i, p)| p.to_bytes(i + 1 == count))
            .collect()
    }

    /// Add proposal to SA payload
    pub fn add_proposal(mut self, proposal: Proposal) -> Self {
        self.proposals.push(proposal);
        self
    }

    /// Get proposals
    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }
}

/// ID Type for Identification Payload (RFC 7296 Section 3.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdType {
    /// IPv4 address
    Ipv4Addr = 1,
    /// Fully-qualified domain name
    Fqdn = 2,
    /// RFC 822 email address
    Rfc822Addr = 3,
    /// IPv6 address
    Ipv6Addr = 5,
    /// Distinguished Name
    DnBinaryDer = 9,
    /// General Name
    DnBinaryDerAsn1 = 10,
    /// Key ID
    KeyId = 11,
}

impl IdType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(IdType::Ipv4Addr),
            2 => Some(IdType::Fqdn),
            3 => Some(IdType::Rfc822Addr),
            5 => Some(IdType::Ipv6Addr),
            9 => Some(IdType::DnBinaryDer),
            10 => Some(IdType::DnBinaryDerAsn1),
            11 => Some(IdType::KeyId),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Identification Payload (RFC 7296 Section 3.5)
///
/// Used for IDi (Initiator) and IDr (Responder) payloads.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   ID Type     |                 RESERVED                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                   Identification Data                         ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The payload body is what gets fed into the AUTH computation
/// (`prf(SK_p, IDType | RESERVED | InitIDData)`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPayload {
    /// ID type
    pub id_type: IdType,

    /// Identification data
    pub data: Vec<u8>,
}

impl IdPayload {
    /// Create new ID payload
    pub fn new(id_type: IdType, data: Vec<u8>) -> Self {
        IdPayload { id_type, data }
    }

    /// Create ID from FQDN
    pub fn from_fqdn(fqdn: &str) -> Self {
        IdPayload {
            id_type: IdType::Fqdn,
            data: fqdn.as_bytes().to_vec(),
        }
    }

    /// Create ID from Key ID
    pub fn from_key_id(key_id: &[u8]) -> Self {
        IdPayload {
            id_type: IdType::KeyId,
            data: key_id.to_vec(),
        }
    }

    /// Parse ID payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let id_type = IdType::from_u8(data[0])
            .ok_or_else(|| Error::InvalidPayload(format!("Unknown ID type: {}", data[0])))?;

        Ok(IdPayload {
            id_type,
            data: data[4..].to_vec(),
        })
    }

    /// Serialize ID payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.push(self.id_type.to_u8());
        bytes.extend_from_slice(&[0u8, 0u8, 0u8]);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Get ID as string (if applicable)
    pub fn as_string(&self) -> Option<String> {
        match self.id_type {
            IdType::Fqdn | IdType::Rfc822Addr => String::from_utf8(self.data.clone()).ok(),
            _ => None,
        }
    }
}

/// Authentication Method (RFC 7296 Section 3.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    /// RSA Digital Signature
    RsaSig = 1,
    /// Shared Key Message Integrity Code
    SharedKeyMic = 2,
    /// DSS Digital Signature
    DssSig = 3,
}

impl AuthMethod {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AuthMethod::RsaSig),
            2 => Some(AuthMethod::SharedKeyMic),
            3 => Some(AuthMethod::DssSig),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Authentication Payload (RFC 7296 Section 3.8)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Auth Method   |                RESERVED                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// ~                      Authentication Data                      ~
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    /// Authentication method
    pub auth_method: AuthMethod,

    /// Authentication data
    pub auth_data: Vec<u8>,
}

impl AuthPayload {
    /// Create new AUTH payload
    pub fn new(auth_method: AuthMethod, auth_data: Vec<u8>) -> Self {
        AuthPayload {
            auth_method,
            auth_data,
        }
    }

    /// Parse AUTH payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let auth_method = AuthMethod::from_u8(data[0]).ok_or_else(|| {
            Error::InvalidPayload(format!("Unknown auth method: {}", data[0]))
        })?;

        Ok(AuthPayload {
            auth_method,
            auth_data: data[4..].to_vec(),
        })
    }

    /// Serialize AUTH payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.auth_data.len());
        bytes.push(self.auth_method.to_u8());
        bytes.extend_from_slice(&[0u8, 0u8, 0u8]);
        bytes.extend_from_slice(&self.auth_data);
        bytes
    }
}

/// Notify Payload (RFC 7296 Section 3.10)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Protocol ID  |   SPI Size    |      Notify Message Type      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                Security Parameter Index (SPI)                 ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                       Notification Data                       ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyPayload {
    /// Protocol ID (0 when not SA-specific)
    pub protocol_id: u8,

    /// SPI (usually empty)
    pub spi: Vec<u8>,

    /// Raw notify message type
    pub notify_type: u16,

    /// Notification data
    pub data: Vec<u8>,
}

impl NotifyPayload {
    /// Create a notify without protocol or SPI
    pub fn new(notify_type: NotifyType, data: Vec<u8>) -> Self {
        NotifyPayload {
            protocol_id: 0,
            spi: Vec::new(),
            notify_type: notify_type.to_u16(),
            data,
        }
    }

    /// Known notify type, if any
    pub fn kind(&self) -> Option<NotifyType> {
        NotifyType::from_u16(self.notify_type)
    }

    /// Parse notify payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = data[0];
        let spi_size = data[1] as usize;
        let notify_type = u16::from_be_bytes([data[2], data[3]]);

        if data.len() < 4 + spi_size {
            return Err(Error::BufferTooShort {
                required: 4 + spi_size,
                available: data.len(),
            });
        }

        Ok(NotifyPayload {
            protocol_id,
            spi: data[4..4 + spi_size].to_vec(),
            notify_type,
            data: data[4 + spi_size..].to_vec(),
        })
    }

    /// Serialize notify payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.spi.len() + self.data.len());
        bytes.push(self.protocol_id);
        bytes.push(self.spi.len() as u8);
        bytes.extend_from_slice(&self.notify_type.to_be_bytes());
        bytes.extend_from_slice(&self.spi);
        bytes.extend_from_slice(&self.data);
        bytes
    }
}

/// Delete Payload (RFC 7296 Section 3.11)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Protocol ID   |   SPI Size    |          Num of SPIs          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~               Security Parameter Index(es) (SPI)              ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePayload {
    /// Protocol of the SAs being deleted
    pub protocol_id: ProtocolId,

    /// 32-bit ESP SPIs (empty when deleting the IKE SA)
    pub spis: Vec<u32>,
}

impl DeletePayload {
    /// Delete the IKE SA carrying this payload
    pub fn ike() -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Ike,
            spis: Vec::new(),
        }
    }

    /// Delete ESP child SAs
    pub fn esp(spis: Vec<u32>) -> Self {
        DeletePayload {
            protocol_id: ProtocolId::Esp,
            spis,
        }
    }

    /// Parse delete payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let protocol_id = ProtocolId::from_u8(data[0])
            .ok_or_else(|| Error::InvalidPayload(format!("Unknown protocol ID: {}", data[0])))?;
        let spi_size = data[1] as usize;
        let count = u16::from_be_bytes([data[2], data[3]]) as usize;

        match protocol_id {
            ProtocolId::Ike => {
                if spi_size != 0 || count != 0 || data.len() != 4 {
                    return Err(Error::InvalidPayload(
                        "IKE delete must not carry SPIs".into(),
                    ));
                }
                Ok(DeletePayload::ike())
            }
            ProtocolId::Esp | ProtocolId::Ah => {
                if spi_size != 4 {
                    return Err(Error::InvalidPayload(format!(
                        "Child SA delete with SPI size {}",
                        spi_size
                    )));
                }
                if data.len() != 4 + count * 4 {
                    return Err(Error::InvalidLength {
                        expected: 4 + count * 4,
                        actual: data.len(),
                    });
                }
                let spis = data[4..]
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                Ok(DeletePayload { protocol_id, spis })
            }
        }
    }

    /// Serialize delete payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let spi_size: u8 = if self.protocol_id == ProtocolId::Ike { 0 } else { 4 };
        let mut bytes = Vec::with_capacity(4 + self.spis.len() * 4);
        bytes.push(self.protocol_id.to_u8());
        bytes.push(spi_size);
        bytes.extend_from_slice(&(self.spis.len() as u16).to_be_bytes());
        for spi in &self.spis {
            bytes.extend_from_slice(&spi.to_be_bytes());
        }
        bytes
    }
}

/// A single IPv4 address-range traffic selector (RFC 7296 Section 3.13.1)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   TS Type     |IP Protocol ID*|       Selector Length         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Start Port*         |           End Port*           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                         Starting Address*                     ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                         Ending Address*                       ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSelector {
    /// IP protocol (0 = any)
    pub ip_protocol: u8,
    /// First port in range
    pub start_port: u16,
    /// Last port in range
    pub end_port: u16,
    /// First address in range
    pub start_addr: Ipv4Addr,
    /// Last address in range
    pub end_addr: Ipv4Addr,
}

impl TrafficSelector {
    /// Encoded size of an IPv4 selector
    pub const SIZE: usize = 16;

    /// Selector covering one host, any protocol, all ports
    pub fn host(addr: Ipv4Addr) -> Self {
        TrafficSelector {
            ip_protocol: 0,
            start_port: 0,
            end_port: 65535,
            start_addr: addr,
            end_addr: addr,
        }
    }
}

/// Traffic Selector Payload (RFC 7296 Section 3.13)
///
/// Only IPv4 address-range selectors are kept; other selector types are
/// skipped while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficSelectorsPayload {
    /// Selectors in order
    pub selectors: Vec<TrafficSelector>,
}

impl TrafficSelectorsPayload {
    /// Create payload from selectors
    pub fn new(selectors: Vec<TrafficSelector>) -> Self {
        TrafficSelectorsPayload { selectors }
    }

    /// Parse traffic selector payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let count = data[0] as usize;
        let mut selectors = Vec::with_capacity(count);
        let mut offset = 4;

        for _ in 0..count {
            if data.len() < offset + 4 {
                return Err(Error::BufferTooShort {
                    required: offset + 4,
                    available: data.len(),
                });
            }
            let ts_type = data[offset];
            let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if len < 8 || data.len() < offset + len {
                return Err(Error::InvalidPayload(format!(
                    "Traffic selector length {} invalid",
                    len
                )));
            }

            if ts_type == TS_IPV4_ADDR_RANGE {
                if len != TrafficSelector::SIZE {
                    return Err(Error::InvalidLength {
                        expected: TrafficSelector::SIZE,
                        actual: len,
                    });
                }
                let s = &data[offset..offset + len];
                selectors.push(TrafficSelector {
                    ip_protocol: s[1],
                    start_port: u16::from_be_bytes([s[4], s[5]]),
                    end_port: u16::from_be_bytes([s[6], s[7]]),
                    start_addr: Ipv4Addr::new(s[8], s[9], s[10], s[11]),
                    end_addr: Ipv4Addr::new(s[12], s[13], s[14], s[15]),
                });
            }
            offset += len;
        }

        Ok(TrafficSelectorsPayload { selectors })
    }

    /// Serialize traffic selector payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.selectors.len() * TrafficSelector::SIZE);
        bytes.push(self.selectors.len() as u8);
        bytes.extend_from_slice(&[0u8; 3]);
        for ts in &self.selectors {
            bytes.push(TS_IPV4_ADDR_RANGE);
            bytes.push(ts.ip_protocol);
            bytes.extend_from_slice(&(TrafficSelector::SIZE as u16).to_be_bytes());
            bytes.extend_from_slice(&ts.start_port.to_be_bytes());
            bytes.extend_from_slice(&ts.end_port.to_be_bytes());
            bytes.extend_from_slice(&ts.start_addr.octets());
            bytes.extend_from_slice(&ts.end_addr.octets());
        }
        bytes
    }
}

/// Configuration attribute (RFC 7296 Section 3.15.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigAttribute {
    /// Attribute type (15 bits)
    pub attr_type: u16,
    /// Attribute value (empty in requests)
    pub value: Vec<u8>,
}

/// Configuration Payload (RFC 7296 Section 3.15)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C| RESERVED    |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   CFG Type    |                    RESERVED                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                   Configuration Attributes                    ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationPayload {
    /// CFG type (request, reply, set, ack)
    pub cfg_type: u8,
    /// Attributes in order
    pub attributes: Vec<ConfigAttribute>,
}

impl ConfigurationPayload {
    /// Create payload
    pub fn new(cfg_type: u8, attributes: Vec<ConfigAttribute>) -> Self {
        ConfigurationPayload {
            cfg_type,
            attributes,
        }
    }

    /// Whether an attribute of this type is present
    pub fn has_attribute(&self, attr_type: u16) -> bool {
        self.attributes.iter().any(|a| a.attr_type == attr_type)
    }

    /// Parse configuration payload from data (without header)
    pub fn from_payload_data(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BufferTooShort {
                required: 4,
                available: data.len(),
            });
        }

        let cfg_type = data[0];
        let mut attributes = Vec::new();
        let mut offset = 4;

        while offset < data.len() {
            if data.len() < offset + 4 {
                return Err(Error::BufferTooShort {
                    required: offset + 4,
                    available: data.len(),
                });
            }
            let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]) & 0x7FFF;
            let len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            if data.len() < offset + 4 + len {
                return Err(Error::BufferTooShort {
                    required: offset + 4 + len,
                    available: data.len(),
                });
            }
            attributes.push(ConfigAttribute {
                attr_type,
                value: data[offset + 4..offset + 4 + len].to_vec(),
            });
            offset += 4 + len;
        }

        Ok(ConfigurationPayload {
            cfg_type,
            attributes,
        })
    }

    /// Serialize configuration payload to bytes (without header)
    pub fn to_payload_data(&self) -> Vec<u8> {
        let mut bytes = vec![self.cfg_type, 0, 0, 0];
        for attr in &self.attributes {
            bytes.extend_from_slice(&(attr.attr_type & 0x7FFF).to_be_bytes());
            bytes.extend_from_slice(&(attr.value.len() as u16).to_be_bytes());
            bytes.extend_from_slice(&attr.value);
        }
        bytes
    }
}

/// Encrypted and Authenticated Payload (RFC 7296 Section 3.14)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | Next Payload  |C|  RESERVED   |         Payload Length        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                     Initialization Vector                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                    Encrypted IKE Payloads                     ~
/// +               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |             Padding (0-255 octets)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                               |  Pad Length   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ~                    Integrity Checksum Data                    ~
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Type of the first payload inside the ciphertext
    pub next_payload: u8,
    /// IV, ciphertext and trailing integrity checksum
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::ikev2::constants::cfg;
    use crate::ipsec::ikev2::proposal::{EncrTransformId, Transform};

    #[test]
    fn test_payload_header_parse() {
        let data = [
            33,   // Next payload (SA)
            0x80, // Critical bit set, reserved = 0
            0, 50, // Length = 50
        ];

        let header = PayloadHeader::from_bytes(&data).unwrap();
        assert_eq!(header.next_payload, 33);
        assert!(header.critical);
        assert_eq!(header.length, 50);
        assert_eq!(header.data_length(), 46);
    }

    #[test]
    fn test_payload_header_roundtrip() {
        let header = PayloadHeader::new(PayloadType::Nonce.to_u8(), true, 100);
        let bytes = header.to_bytes();
        let parsed = PayloadHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, parsed);
    }

    #[test]
    fn test_payload_header_buffer_too_short() {
        let result = PayloadHeader::from_bytes(&[1, 2]);
        assert!(matches!(result, Err(Error::BufferTooShort { .. })));
    }

    #[test]
    fn test_payload_header_invalid_length() {
        let result = PayloadHeader::from_bytes(&[33, 0, 0, 2]);
        assert!(matches!(result, Err(Error::InvalidLength { .. })));
    }

    #[test]
    fn test_nonce_payload_bounds() {
        assert!(NoncePayload::new(vec![1u8; 32]).is_ok());
        assert!(NoncePayload::new(vec![1u8; 10]).is_err());
        assert!(NoncePayload::new(vec![1u8; 300]).is_err());
    }

    #[test]
    fn test_ke_payload_layout() {
        let ke = KePayload::new(14, vec![0xBB; 256]);
        let serialized = ke.to_payload_data();
        assert_eq!(serialized.len(), 260);
        assert_eq!(&serialized[0..2], &14u16.to_be_bytes());
        assert_eq!(&serialized[2..4], &[0u8, 0u8]);
        assert_eq!(KePayload::from_payload_data(&serialized).unwrap(), ke);
    }

    #[test]
    fn test_sa_payload_multiple_proposals() {
        let sa = SaPayload::new(vec![])
            .add_proposal(
                Proposal::new(1, ProtocolId::Ike)
                    .add_transform(Transform::encr(EncrTransformId::AesCbc).with_key_length(128)),
            )
            .add_proposal(
                Proposal::new(2, ProtocolId::Ike)
                    .add_transform(Transform::encr(EncrTransformId::Null)),
            );

        let data = sa.to_payload_data();
        assert_eq!(data[0], 2); // more proposals follow
        let parsed = SaPayload::from_payload_data(&data).unwrap();
        assert_eq!(parsed, sa);
        assert_eq!(parsed.proposals()[1].proposal_num, 2);
    }

    #[test]
    fn test_id_payload_fqdn() {
        let id = IdPayload::from_fqdn("vpn.example.com");
        assert_eq!(id.id_type, IdType::Fqdn);
        assert_eq!(id.as_string().unwrap(), "vpn.example.com");
        let body = id.to_payload_data();
        assert_eq!(&body[..4], &[2, 0, 0, 0]);
        assert_eq!(IdPayload::from_payload_data(&body).unwrap(), id);
    }

    #[test]
    fn test_id_payload_key_id() {
        let id = IdPayload::from_key_id(&[1, 2, 3, 4]);
        assert_eq!(id.id_type, IdType::KeyId);
        assert!(id.as_string().is_none());
    }

    #[test]
    fn test_auth_payload_roundtrip() {
        let original = AuthPayload::new(AuthMethod::SharedKeyMic, vec![1, 2, 3, 4, 5]);
        let serialized = original.to_payload_data();
        assert_eq!(serialized[0], 2);
        assert_eq!(AuthPayload::from_payload_data(&serialized).unwrap(), original);
        assert!(AuthPayload::from_payload_data(&[99, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_notify_payload_layout() {
        let notify = NotifyPayload::new(NotifyType::InvalidKePayload, 14u16.to_be_bytes().to_vec());
        let body = notify.to_payload_data();
        assert_eq!(body, vec![0, 0, 0, 17, 0, 14]);

        let parsed = NotifyPayload::from_payload_data(&body).unwrap();
        assert_eq!(parsed.kind(), Some(NotifyType::InvalidKePayload));
        assert_eq!(parsed.data, vec![0, 14]);
    }

    #[test]
    fn test_notify_payload_with_spi() {
        let body = [3, 4, 0x40, 0x00, 1, 2, 3, 4, 0xAA];
        let parsed = NotifyPayload::from_payload_data(&body).unwrap();
        assert_eq!(parsed.protocol_id, 3);
        assert_eq!(parsed.spi, vec![1, 2, 3, 4]);
        assert_eq!(parsed.notify_type, 0x4000);
        assert_eq!(parsed.kind(), None);
        assert_eq!(parsed.data, vec![0xAA]);
        assert_eq!(parsed.to_payload_data(), body.to_vec());
    }

    #[test]
    fn test_delete_payload() {
        let delete = DeletePayload::esp(vec![0x01020304, 0x0A0B0C0D]);
        let body = delete.to_payload_data();
        assert_eq!(&body[..4], &[3, 4, 0, 2]);
        assert_eq!(DeletePayload::from_payload_data(&body).unwrap(), delete);

        let ike = DeletePayload::ike();
        assert_eq!(ike.to_payload_data(), vec![1, 0, 0, 0]);
        assert_eq!(DeletePayload::from_payload_data(&[1, 0, 0, 0]).unwrap(), ike);

        assert!(DeletePayload::from_payload_data(&[3, 4, 0, 2, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_traffic_selector_payload() {
        let ts = TrafficSelectorsPayload::new(vec![TrafficSelector::host(Ipv4Addr::new(
            10, 0, 0, 2,
        ))]);
        let body = ts.to_payload_data();
        assert_eq!(body.len(), 4 + 16);
        assert_eq!(&body[4..8], &[7, 0, 0, 16]);
        assert_eq!(&body[8..12], &[0, 0, 0xFF, 0xFF]);
        assert_eq!(TrafficSelectorsPayload::from_payload_data(&body).unwrap(), ts);
    }

    #[test]
    fn test_traffic_selector_skips_ipv6() {
        let mut body = vec![2, 0, 0, 0];
        // IPv6 range selector: 8 header bytes + 32 address bytes
        body.extend_from_slice(&[8, 0, 0, 40, 0, 0, 0xFF, 0xFF]);
        body.extend_from_slice(&[0u8; 32]);
        body.extend_from_slice(
            &TrafficSelectorsPayload::new(vec![TrafficSelector::host(Ipv4Addr::LOCALHOST)])
                .to_payload_data()[4..],
        );

        let parsed = TrafficSelectorsPayload::from_payload_data(&body).unwrap();
        assert_eq!(parsed.selectors.len(), 1);
        assert_eq!(parsed.selectors[0].start_addr, Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_configuration_payload() {
        let request = ConfigurationPayload::new(
            cfg::REQUEST,
            vec![ConfigAttribute {
                attr_type: cfg::INTERNAL_IP4_ADDRESS,
                value: vec![],
            }],
        );
        let body = request.to_payload_data();
        assert_eq!(body, vec![1, 0, 0, 0, 0, 1, 0, 0]);

        let parsed = ConfigurationPayload::from_payload_data(&body).unwrap();
        assert!(parsed.has_attribute(cfg::INTERNAL_IP4_ADDRESS));
        assert!(!parsed.has_attribute(cfg::INTERNAL_IP4_NETMASK));
    }

    #[test]
    fn test_chain_encode_decode() {
        let payloads = vec![
            IkePayload::Nonce(NoncePayload::new(vec![7u8; 16]).unwrap()),
            IkePayload::Notify(NotifyPayload::new(NotifyType::NasTcpPort, vec![0x4E, 0x20])),
            IkePayload::KE(KePayload::new(2, vec![1; 128])),
        ];

        let bytes = encode_payloads(&payloads);
        // Nonce header points at Notify
        assert_eq!(bytes[0], PayloadType::N.to_u8());

        let decoded = decode_payloads(PayloadType::Nonce.to_u8(), &bytes).unwrap();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn test_chain_sk_terminates() {
        let payloads = vec![IkePayload::SK(EncryptedPayload {
            next_payload: PayloadType::IDi.to_u8(),
            data: vec![0xAB; 40],
        })];

        let bytes = encode_payloads(&payloads);
        assert_eq!(bytes[0], PayloadType::IDi.to_u8());

        let decoded = decode_payloads(PayloadType::SK.to_u8(), &bytes).unwrap();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn test_chain_unknown_payload() {
        let mut bytes = vec![0, 0, 0, 6, 0xCA, 0xFE];
        let decoded = decode_payloads(43, &bytes).unwrap();
        assert!(matches!(
            decoded[0],
            IkePayload::Unknown {
                payload_type: 43,
                critical: false,
                ..
            }
        ));

        // Same payload flagged critical must be rejected
        bytes[1] = 0x80;
        assert!(decode_payloads(43, &bytes).is_err());
    }

    #[test]
    fn test_chain_trailing_bytes() {
        let mut bytes = encode_payloads(&[IkePayload::Nonce(
            NoncePayload::new(vec![1u8; 16]).unwrap(),
        )]);
        bytes.push(0);
        assert!(decode_payloads(PayloadType::Nonce.to_u8(), &bytes).is_err());
    }

    #[test]
    fn test_chain_truncated() {
        let bytes = encode_payloads(&[IkePayload::Nonce(
            NoncePayload::new(vec![1u8; 16]).unwrap(),
        )]);
        assert!(decode_payloads(PayloadType::Nonce.to_u8(), &bytes[..10]).is_err());
    }
}
