//! IKEv2 message structures and parsing
//!
//! Implements the IKE message format defined in RFC 7296 Section 3.1

use super::constants::*;
use super::payload::{decode_payloads, encode_payloads, IkePayload};
use crate::ipsec::{Error, Result};

/// IKE message header (28 bytes)
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       IKE SA Initiator's SPI                  |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       IKE SA Responder's SPI                  |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Next Payload | MjVer | MnVer | Exchange Type |     Flags     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Message ID                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            Length                             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeHeader {
    /// Initiator's Security Parameter Index (8 bytes)
    pub initiator_spi: [u8; 8],

    /// Responder's Security Parameter Index (8 bytes, zero for IKE_SA_INIT request)
    pub responder_spi: [u8; 8],

    /// Raw type of the first payload
    pub next_payload: u8,

    /// Protocol version as received (major in the high nibble)
    pub version: u8,

    /// Exchange type
    pub exchange_type: ExchangeType,

    /// Message flags
    pub flags: IkeFlags,

    /// Message ID (used for replay protection and matching)
    pub message_id: u32,

    /// Total message length in bytes (including header)
    pub length: u32,
}

impl IkeHeader {
    /// Create a new IKEv2 header
    ///
    /// `next_payload` and `length` are filled in by [`IkeMessage::encode`].
    pub fn new(
        initiator_spi: u64,
        responder_spi: u64,
        exchange_type: ExchangeType,
        flags: IkeFlags,
        message_id: u32,
    ) -> Self {
        IkeHeader {
            initiator_spi: initiator_spi.to_be_bytes(),
            responder_spi: responder_spi.to_be_bytes(),
            next_payload: PayloadType::None.to_u8(),
            version: IKE_VERSION,
            exchange_type,
            flags,
            message_id,
            length: IKE_HEADER_SIZE as u32,
        }
    }

    /// Initiator SPI as integer
    pub fn spi_i(&self) -> u64 {
        u64::from_be_bytes(self.initiator_spi)
    }

    /// Responder SPI as integer
    pub fn spi_r(&self) -> u64 {
        u64::from_be_bytes(self.responder_spi)
    }

    /// Major protocol version
    pub fn major_version(&self) -> u8 {
        self.version >> 4
    }

    /// Parse IKE header from bytes
    ///
    /// The version byte is kept as received; [`IkeHeader::validate`]
    /// rejects anything but IKEv2 so the caller can still answer a newer
    /// major version with INVALID_MAJOR_VERSION.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Buffer is too short (< 28 bytes)
    /// - Exchange type is unknown
    /// - Message length is invalid
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < IKE_HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: IKE_HEADER_SIZE,
                available: data.len(),
            });
        }

        // Parse SPIs (16 bytes total)
        let mut initiator_spi = [0u8; 8];
        let mut responder_spi = [0u8; 8];
        initiator_spi.copy_from_slice(&data[0..8]);
        responder_spi.copy_from_slice(&data[8..16]);

        let next_payload = data[16];
        let version = data[17];

        let exchange_type = ExchangeType::from_u8(data[18])
            .ok_or(Error::UnsupportedExchangeType(data[18]))?;

        let flags = IkeFlags::new(data[19]);

        // Message ID and length are big-endian
        let message_id = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
        let length = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

        if length > MAX_IKE_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(length));
        }

        if length < IKE_HEADER_SIZE as u32 {
            return Err(Error::InvalidLength {
                expected: IKE_HEADER_SIZE,
                actual: length as usize,
            });
        }

        Ok(IkeHeader {
            initiator_spi,
            responder_spi,
            next_payload,
            version,
            exchange_type,
            flags,
            message_id,
            length,
        })
    }

    /// Serialize IKE header to bytes
    pub fn to_bytes(&self) -> [u8; IKE_HEADER_SIZE] {
        let mut bytes = [0u8; IKE_HEADER_SIZE];

        bytes[0..8].copy_from_slice(&self.initiator_spi);
        bytes[8..16].copy_from_slice(&self.responder_spi);
        bytes[16] = self.next_payload;
        bytes[17] = self.version;
        bytes[18] = self.exchange_type.to_u8();
        bytes[19] = self.flags.value();
        bytes[20..24].copy_from_slice(&self.message_id.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.length.to_be_bytes());

        bytes
    }

    /// Validate header fields
    pub fn validate(&self) -> Result<()> {
        if self.major_version() != IKE_MAJOR_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }

        if self.length > MAX_IKE_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge(self.length));
        }

        if self.length < IKE_HEADER_SIZE as u32 {
            return Err(Error::InvalidLength {
                expected: IKE_HEADER_SIZE,
                actual: self.length as usize,
            });
        }

        Ok(())
    }
}

/// A complete IKE message: header plus decoded payload chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkeMessage {
    /// Message header
    pub header: IkeHeader,

    /// Top-level payloads in wire order
    pub payloads: Vec<IkePayload>,
}

impl IkeMessage {
    /// Create message from header and payloads
    pub fn new(header: IkeHeader, payloads: Vec<IkePayload>) -> Self {
        IkeMessage { header, payloads }
    }

    /// Encode the message
    ///
    /// Sets the header's next-payload and length fields from the payloads.
    pub fn encode(&self) -> Vec<u8> {
        let body = encode_payloads(&self.payloads);

        let mut header = self.header.clone();
        header.next_payload = self
            .payloads
            .first()
            .map(IkePayload::type_u8)
            .unwrap_or(PayloadType::None.to_u8());
        header.length = (IKE_HEADER_SIZE + body.len()) as u32;

        let mut bytes = Vec::with_capacity(IKE_HEADER_SIZE + body.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&body);
        bytes
    }

    /// Decode a message
    ///
    /// # Errors
    ///
    /// Returns error if the header is malformed or not IKEv2, the length
    /// field disagrees with the datagram, or the payload chain fails to parse
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = IkeHeader::from_bytes(data)?;
        header.validate()?;

        if header.length as usize != data.len() {
            return Err(Error::InvalidLength {
                expected: header.length as usize,
                actual: data.len(),
            });
        }

        let payloads = decode_payloads(header.next_payload, &data[IKE_HEADER_SIZE..])?;

        Ok(IkeMessage { header, payloads })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipsec::ikev2::payload::{NoncePayload, NotifyPayload};

    #[test]
    fn test_header_roundtrip() {
        let mut header = IkeHeader::new(
            0x0102030405060708,
            0x090A0B0C0D0E0F10,
            ExchangeType::IkeSaInit,
            IkeFlags::request(true),
            42,
        );
        header.next_payload = PayloadType::SA.to_u8();
        header.length = 100;

        let bytes = header.to_bytes();
        let parsed = IkeHeader::from_bytes(&bytes).unwrap();

        assert_eq!(header, parsed);
        assert_eq!(parsed.spi_i(), 0x0102030405060708);
        assert_eq!(parsed.spi_r(), 0x090A0B0C0D0E0F10);
    }

    #[test]
    fn test_header_parse() {
        let mut data = vec![0u8; 28];

        // Initiator SPI
        data[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        // Responder SPI
        data[8..16].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);

        // Next payload (SA = 33)
        data[16] = 33;

        // Version (0x20)
        data[17] = 0x20;

        // Exchange type (IKE_SA_INIT = 34)
        data[18] = 34;

        // Flags (initiator = 0x08)
        data[19] = 0x08;

        // Message ID (42)
        data[20..24].copy_from_slice(&42u32.to_be_bytes());

        // Length (100)
        data[24..28].copy_from_slice(&100u32.to_be_bytes());

        let header = IkeHeader::from_bytes(&data).unwrap();

        assert_eq!(header.initiator_spi, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(header.responder_spi, [9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(header.next_payload, PayloadType::SA.to_u8());
        assert_eq!(header.major_version(), 2);
        assert_eq!(header.exchange_type, ExchangeType::IkeSaInit);
        assert!(header.flags.is_initiator());
        assert_eq!(header.message_id, 42);
        assert_eq!(header.length, 100);
    }

    #[test]
    fn test_buffer_too_short() {
        let data = vec![0u8; 27];
        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::BufferTooShort { .. })));
    }

    #[test]
    fn test_newer_major_version_parses_but_fails_validation() {
        let mut data = vec![0u8; 28];
        data[17] = 0x30;
        data[18] = 34;
        data[24..28].copy_from_slice(&28u32.to_be_bytes());

        let header = IkeHeader::from_bytes(&data).unwrap();
        assert_eq!(header.major_version(), 3);
        assert!(matches!(
            header.validate(),
            Err(Error::UnsupportedVersion(0x30))
        ));
        assert!(matches!(
            IkeMessage::decode(&data),
            Err(Error::UnsupportedVersion(0x30))
        ));
    }

    #[test]
    fn test_minor_version_ignored() {
        let mut header = IkeHeader::new(1, 0, ExchangeType::IkeSaInit, IkeFlags::request(true), 0);
        header.version = 0x21;
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_unknown_exchange_type() {
        let mut data = vec![0u8; 28];
        data[17] = 0x20;
        data[18] = 99;

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::UnsupportedExchangeType(99))));
    }

    #[test]
    fn test_message_too_large() {
        let mut data = vec![0u8; 28];
        data[17] = 0x20;
        data[18] = 34;
        data[24..28].copy_from_slice(&70000u32.to_be_bytes());

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::MessageTooLarge(70000))));
    }

    #[test]
    fn test_length_too_small() {
        let mut data = vec![0u8; 28];
        data[17] = 0x20;
        data[18] = 34;
        data[24..28].copy_from_slice(&20u32.to_be_bytes());

        let result = IkeHeader::from_bytes(&data);
        assert!(matches!(result, Err(Error::InvalidLength { .. })));
    }

    #[test]
    fn test_message_encode_sets_length_and_first_payload() {
        let header = IkeHeader::new(7, 9, ExchangeType::Informational, IkeFlags::response(false), 3);
        let message = IkeMessage::new(
            header,
            vec![
                IkePayload::Notify(NotifyPayload::new(NotifyType::InvalidSyntax, vec![])),
                IkePayload::Nonce(NoncePayload::new(vec![5u8; 16]).unwrap()),
            ],
        );

        let bytes = message.encode();
        assert_eq!(bytes[16], PayloadType::N.to_u8());
        assert_eq!(
            u32::from_be_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]) as usize,
            bytes.len()
        );

        let decoded = IkeMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.payloads, message.payloads);
        assert_eq!(decoded.header.message_id, 3);
        assert!(decoded.header.flags.is_response());
    }

    #[test]
    fn test_empty_message() {
        let header = IkeHeader::new(7, 9, ExchangeType::Informational, IkeFlags::response(false), 1);
        let bytes = IkeMessage::new(header, vec![]).encode();
        assert_eq!(bytes.len(), IKE_HEADER_SIZE);
        assert!(IkeMessage::decode(&bytes).unwrap().payloads.is_empty());
    }

    #[test]
    fn test_decode_length_mismatch() {
        let header = IkeHeader::new(7, 9, ExchangeType::Informational, IkeFlags::response(false), 1);
        let mut bytes = IkeMessage::new(header, vec![]).encode();
        bytes.push(0);
        assert!(matches!(
            IkeMessage::decode(&bytes),
            Err(Error::InvalidLength { .. })
        ));
    }
}
