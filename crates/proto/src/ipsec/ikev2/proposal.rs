//! IKEv2 Proposal and Transform structures
//!
//! Implements the SA payload substructures defined in RFC 7296 Section 3.3.
//!
//! # Structure
//!
//! ```text
//! SA Payload
//!   └── Proposal(s)
//!         └── Transform(s)
//!               └── Attribute(s)   (only Key Length is interpreted)
//! ```

use crate::ipsec::{Error, Result};

/// Transform Type (RFC 7296 Section 3.3.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransformType {
    /// Encryption Algorithm (ENCR)
    Encr = 1,
    /// Pseudo-random Function (PRF)
    Prf = 2,
    /// Integrity Algorithm (INTEG)
    Integ = 3,
    /// Diffie-Hellman Group (D-H)
    Dh = 4,
    /// Extended Sequence Numbers (ESN)
    Esn = 5,
}

impl TransformType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(TransformType::Encr),
            2 => Some(TransformType::Prf),
            3 => Some(TransformType::Integ),
            4 => Some(TransformType::Dh),
            5 => Some(TransformType::Esn),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// Transform ID for Encryption (ENCR) algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EncrTransformId {
    /// DES-CBC
    Des = 2,
    /// 3DES-CBC
    TripleDes = 3,
    /// CAST-128
    Cast = 6,
    /// Blowfish
    Blowfish = 7,
    /// NULL encryption
    Null = 11,
    /// AES-CBC (key length attribute required)
    AesCbc = 12,
    /// AES-CTR (key length attribute required)
    AesCtr = 13,
}

impl EncrTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(EncrTransformId::Des),
            3 => Some(EncrTransformId::TripleDes),
            6 => Some(EncrTransformId::Cast),
            7 => Some(EncrTransformId::Blowfish),
            11 => Some(EncrTransformId::Null),
            12 => Some(EncrTransformId::AesCbc),
            13 => Some(EncrTransformId::AesCtr),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for PRF algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PrfTransformId {
    /// HMAC-MD5
    HmacMd5 = 1,
    /// HMAC-SHA1
    HmacSha1 = 2,
}

impl PrfTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(PrfTransformId::HmacMd5),
            2 => Some(PrfTransformId::HmacSha1),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Integrity algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum IntegTransformId {
    /// HMAC-MD5-96
    HmacMd5_96 = 1,
    /// HMAC-SHA1-96
    HmacSha1_96 = 2,
    /// AES-XCBC-96 (kernel only)
    AesXcbc96 = 5,
}

impl IntegTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(IntegTransformId::HmacMd5_96),
            2 => Some(IntegTransformId::HmacSha1_96),
            5 => Some(IntegTransformId::AesXcbc96),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Diffie-Hellman groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum DhTransformId {
    /// 1024-bit MODP Group
    Group2 = 2,
    /// 2048-bit MODP Group
    Group14 = 14,
}

impl DhTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            2 => Some(DhTransformId::Group2),
            14 => Some(DhTransformId::Group14),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Transform ID for Extended Sequence Numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EsnTransformId {
    /// 32-bit sequence numbers
    NoEsn = 0,
    /// 64-bit extended sequence numbers
    Esn = 1,
}

impl EsnTransformId {
    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(EsnTransformId::NoEsn),
            1 => Some(EsnTransformId::Esn),
            _ => None,
        }
    }

    /// Convert to u16
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Key Length attribute type (RFC 7296 Section 3.3.5)
pub const ATTR_KEY_LENGTH: u16 = 14;

/// Attribute Format bit: set for TV (fixed 2-byte value) attributes
const ATTR_FORMAT_TV: u16 = 0x8000;

/// IKE Transform
///
/// Represents a single cryptographic algorithm choice. Only the Key Length
/// attribute carries meaning for negotiation; any other attribute is skipped
/// when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    /// Transform type
    pub transform_type: TransformType,

    /// Transform ID
    pub transform_id: u16,

    /// Key length in bits, if the attribute was present
    pub key_length: Option<u16>,
}

impl Transform {
    /// Transform substructure header size
    pub const HEADER_SIZE: usize = 8;

    /// Create new transform
    pub fn new(transform_type: TransformType, transform_id: u16) -> Self {
        Transform {
            transform_type,
            transform_id,
            key_length: None,
        }
    }

    /// Create encryption transform
    pub fn encr(id: EncrTransformId) -> Self {
        Transform::new(TransformType::Encr, id.to_u16())
    }

    /// Create PRF transform
    pub fn prf(id: PrfTransformId) -> Self {
        Transform::new(TransformType::Prf, id.to_u16())
    }

    /// Create integrity transform
    pub fn integ(id: IntegTransformId) -> Self {
        Transform::new(TransformType::Integ, id.to_u16())
    }

    /// Create DH group transform
    pub fn dh(id: DhTransformId) -> Self {
        Transform::new(TransformType::Dh, id.to_u16())
    }

    /// Create ESN transform
    pub fn esn(id: EsnTransformId) -> Self {
        Transform::new(TransformType::Esn, id.to_u16())
    }

    /// Attach a Key Length attribute (bits)
    pub fn with_key_length(mut self, bits: u16) -> Self {
        self.key_length = Some(bits);
        self
    }

    /// Serialize transform to bytes (RFC 7296 Section 3.3.2)
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// | Last Substruc |   RESERVED    |        Transform Length       |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |Transform Type |   RESERVED    |          Transform ID         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ~                      Transform Attributes                     ~
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn to_bytes(&self, is_last: bool) -> Vec<u8> {
        let attr_len = if self.key_length.is_some() { 4 } else { 0 };
        let total_len = Self::HEADER_SIZE + attr_len;

        let mut bytes = Vec::with_capacity(total_len);
        bytes.push(if is_last { 0 } else { 3 });
        bytes.push(0);
        bytes.extend_from_slice(&(total_len as u16).to_be_bytes());
        bytes.push(self.transform_type.to_u8());
        bytes.push(0);
        bytes.extend_from_slice(&self.transform_id.to_be_bytes());

        if let Some(bits) = self.key_length {
            bytes.extend_from_slice(&(ATTR_FORMAT_TV | ATTR_KEY_LENGTH).to_be_bytes());
            bytes.extend_from_slice(&bits.to_be_bytes());
        }

        bytes
    }

    /// Parse transform from bytes
    ///
    /// # Returns
    ///
    /// Returns `(transform, is_last, bytes_consumed)`. A transform of an
    /// unknown type yields `None` in place of the transform so the caller
    /// can skip it.
    pub fn from_bytes(data: &[u8]) -> Result<(Option<Self>, bool, usize)> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: Self::HEADER_SIZE,
                available: data.len(),
            });
        }

        let is_last = data[0] == 0;
        let transform_len = u16::from_be_bytes([data[2], data[3]]) as usize;

        if transform_len < Self::HEADER_SIZE {
            return Err(Error::InvalidLength {
                expected: Self::HEADER_SIZE,
                actual: transform_len,
            });
        }
        if data.len() < transform_len {
            return Err(Error::BufferTooShort {
                required: transform_len,
                available: data.len(),
            });
        }

        let transform_type = match TransformType::from_u8(data[4]) {
            Some(t) => t,
            None => return Ok((None, is_last, transform_len)),
        };
        let transform_id = u16::from_be_bytes([data[6], data[7]]);

        let mut key_length = None;
        let mut offset = Self::HEADER_SIZE;
        while offset < transform_len {
            if transform_len - offset < 4 {
                return Err(Error::InvalidPayload("Truncated transform attribute".into()));
            }
            let raw_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let value = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);

            if raw_type & ATTR_FORMAT_TV != 0 {
                if raw_type & !ATTR_FORMAT_TV == ATTR_KEY_LENGTH {
                    key_length = Some(value);
                }
                offset += 4;
            } else {
                // TLV attribute: value is the length of the data that follows
                offset += 4 + value as usize;
                if offset > transform_len {
                    return Err(Error::InvalidPayload("Transform attribute overruns transform".into()));
                }
            }
        }

        let transform = Transform {
            transform_type,
            transform_id,
            key_length,
        };

        Ok((Some(transform), is_last, transform_len))
    }
}

/// Protocol ID for proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// IKE SA
    Ike = 1,
    /// AH (Authentication Header)
    Ah = 2,
    /// ESP (Encapsulating Security Payload)
    Esp = 3,
}

impl ProtocolId {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ProtocolId::Ike),
            2 => Some(ProtocolId::Ah),
            3 => Some(ProtocolId::Esp),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// IKE Proposal
///
/// Represents a single proposal containing one or more transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Proposal number (1-based)
    pub proposal_num: u8,

    /// Protocol ID (IKE, ESP, AH)
    pub protocol_id: ProtocolId,

    /// SPI (empty for IKE_SA_INIT, 4 bytes for ESP)
    pub spi: Vec<u8>,

    /// List of transforms in offered order
    pub transforms: Vec<Transform>,
}

impl Proposal {
    /// Proposal substructure header size
    pub const HEADER_SIZE: usize = 8;

    /// Create new proposal
    pub fn new(proposal_num: u8, protocol_id: ProtocolId) -> Self {
        Proposal {
            proposal_num,
            protocol_id,
            spi: Vec::new(),
            transforms: Vec::new(),
        }
    }

    /// Add transform to proposal
    pub fn add_transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    /// Set SPI
    pub fn with_spi(mut self, spi: Vec<u8>) -> Self {
        self.spi = spi;
        self
    }

    /// Iterate over transforms of one type, in offered order
    pub fn transforms_of(&self, transform_type: TransformType) -> impl Iterator<Item = &Transform> {
        self.transforms
            .iter()
            .filter(move |t| t.transform_type == transform_type)
    }

    /// Get first transform of a type
    pub fn get_transform(&self, transform_type: TransformType) -> Option<&Transform> {
        self.transforms_of(transform_type).next()
    }

    /// SPI as a 32-bit ESP SPI
    pub fn esp_spi(&self) -> Option<u32> {
        let spi: [u8; 4] = self.spi.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(spi))
    }

    /// Serialize proposal to bytes (RFC 7296 Section 3.3.1)
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// | Last Substruc |   RESERVED    |         Proposal Length       |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// | Proposal Num  |  Protocol ID  |    SPI Size   |Num  Transforms|
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ~                        SPI (variable)                         ~
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ~                        <Transforms>                           ~
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn to_bytes(&self, is_last: bool) -> Vec<u8> {
        let count = self.transforms.len();
        let transform_bytes: Vec<u8> = self
            .transforms
            .iter()
            .enumerate()
            .flat_map(|(i, t)| t.to_bytes(i + 1 == count))
            .collect();

        let total_len = Self::HEADER_SIZE + self.spi.len() + transform_bytes.len();

        let mut bytes = Vec::with_capacity(total_len);
        bytes.push(if is_last { 0 } else { 2 });
        bytes.push(0);
        bytes.extend_from_slice(&(total_len as u16).to_be_bytes());
        bytes.push(self.proposal_num);
        bytes.push(self.protocol_id.to_u8());
        bytes.push(self.spi.len() as u8);
        bytes.push(count as u8);
        bytes.extend_from_slice(&self.spi);
        bytes.extend_from_slice(&transform_bytes);

        bytes
    }

    /// Parse proposal from bytes
    ///
    /// # Returns
    ///
    /// Returns `(proposal, is_last, bytes_consumed)`
    pub fn from_bytes(data: &[u8]) -> Result<(Self, bool, usize)> {
        if data.len() < Self::HEADER_SIZE {
            return Err(Error::BufferTooShort {
                required: Self::HEADER_SIZE,
                available: data.len(),
            });
        }

        let is_last = data[0] == 0;
        let proposal_len = u16::from_be_bytes([data[2], data[3]]) as usize;

        if proposal_len < Self::HEADER_SIZE {
            return Err(Error::InvalidLength {
                expected: Self::HEADER_SIZE,
                actual: proposal_len,
            });
        }
        if data.len() < proposal_len {
            return Err(Error::BufferTooShort {
                required: proposal_len,
                available: data.len(),
            });
        }

        let proposal_num = data[4];
        let protocol_id = ProtocolId::from_u8(data[5])
            .ok_or_else(|| Error::InvalidPayload(format!("Unknown protocol ID: {}", data[5])))?;
        let spi_size = data[6] as usize;
        let num_transforms = data[7] as usize;

        if proposal_len < Self::HEADER_SIZE + spi_size {
            return Err(Error::BufferTooShort {
                required: Self::HEADER_SIZE + spi_size,
                available: proposal_len,
            });
        }

        let spi = data[Self::HEADER_SIZE..Self::HEADER_SIZE + spi_size].to_vec();

        let body = &data[..proposal_len];
        let mut transforms = Vec::with_capacity(num_transforms);
        let mut offset = Self::HEADER_SIZE + spi_size;

        for _ in 0..num_transforms {
            let (transform, _, transform_len) = Transform::from_bytes(&body[offset..])?;
            if let Some(transform) = transform {
                transforms.push(transform);
            }
            offset += transform_len;
        }

        if offset != proposal_len {
            return Err(Error::InvalidLength {
                expected: proposal_len,
                actual: offset,
            });
        }

        let proposal = Proposal {
            proposal_num,
            protocol_id,
            spi,
            transforms,
        };

        Ok((proposal, is_last, proposal_len))
    }
}
