//! Pseudo-Random Function (PRF) implementations
//!
//! Implements PRF algorithms and the prf+ key expansion for IKEv2 key
//! derivation as defined in RFC 7296 Sections 2.13, 2.14 and 2.17.

use crate::ipsec::ikev2::proposal::PrfTransformId;
use crate::ipsec::{Error, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use zeroize::Zeroizing;

/// PRF algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlgorithm {
    /// PRF_HMAC_MD5
    HmacMd5,
    /// PRF_HMAC_SHA1
    HmacSha1,
}

impl PrfAlgorithm {
    /// Look up a PRF by its IKE transform ID
    pub fn from_transform_id(id: u16) -> Result<Self> {
        match PrfTransformId::from_u16(id) {
            Some(PrfTransformId::HmacMd5) => Ok(PrfAlgorithm::HmacMd5),
            Some(PrfTransformId::HmacSha1) => Ok(PrfAlgorithm::HmacSha1),
            None => Err(Error::UnsupportedAlgorithm(format!("PRF transform {}", id))),
        }
    }

    /// Get PRF output length in bytes
    ///
    /// Also the length of SK_d, SK_pi and SK_pr.
    pub fn output_len(self) -> usize {
        match self {
            PrfAlgorithm::HmacMd5 => 16,
            PrfAlgorithm::HmacSha1 => 20,
        }
    }

    /// Compute PRF
    ///
    /// # Arguments
    ///
    /// * `key` - PRF key
    /// * `data` - Input data
    pub fn compute(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            PrfAlgorithm::HmacMd5 => {
                let mut mac = Hmac::<Md5>::new_from_slice(key)
                    .map_err(|e| Error::CryptoError(format!("HMAC-MD5 key: {}", e)))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            PrfAlgorithm::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key)
                    .map_err(|e| Error::CryptoError(format!("HMAC-SHA1 key: {}", e)))?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }

    /// Compute prf+ (key expansion function)
    ///
    /// Defined in RFC 7296 Section 2.13:
    /// ```text
    /// prf+ (K,S) = T1 | T2 | T3 | T4 | ...
    ///
    /// where:
    /// T1 = prf (K, S | 0x01)
    /// T2 = prf (K, T1 | S | 0x02)
    /// T3 = prf (K, T2 | S | 0x03)
    /// ...
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` if more than 255 blocks would be needed
    pub fn prf_plus(self, key: &[u8], seed: &[u8], output_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let blocks = output_len.div_ceil(self.output_len());
        if blocks > 255 {
            return Err(Error::KeyDerivation(format!(
                "prf+ cannot produce {} bytes",
                output_len
            )));
        }

        let mut output = Zeroizing::new(Vec::with_capacity(blocks * self.output_len()));
        let mut t = Zeroizing::new(Vec::new());

        for counter in 1..=blocks as u8 {
            let mut input = Zeroizing::new(Vec::with_capacity(t.len() + seed.len() + 1));
            input.extend_from_slice(&t);
            input.extend_from_slice(seed);
            input.push(counter);

            t = Zeroizing::new(self.compute(key, &input)?);
            output.extend_from_slice(&t);
        }

        output.truncate(output_len);
        Ok(output)
    }
}

/// Sizes of the negotiated keys an IKE SA needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkeKeyLengths {
    /// SK_ei / SK_er length
    pub encr: usize,
    /// SK_ai / SK_ar length
    pub integ: usize,
}

/// IKEv2 key material derived from SKEYSEED
///
/// All keys are wiped when dropped.
#[derive(Clone)]
pub struct IkeKeys {
    /// SK_d - Key for deriving Child SA keys
    pub sk_d: Zeroizing<Vec<u8>>,

    /// SK_ai - Initiator's integrity key
    pub sk_ai: Zeroizing<Vec<u8>>,

    /// SK_ar - Responder's integrity key
    pub sk_ar: Zeroizing<Vec<u8>>,

    /// SK_ei - Initiator's encryption key
    pub sk_ei: Zeroizing<Vec<u8>>,

    /// SK_er - Responder's encryption key
    pub sk_er: Zeroizing<Vec<u8>>,

    /// SK_pi - Initiator's AUTH payload key
    pub sk_pi: Zeroizing<Vec<u8>>,

    /// SK_pr - Responder's AUTH payload key
    pub sk_pr: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for IkeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IkeKeys")
            .field("sk_d_len", &self.sk_d.len())
            .field("sk_a_len", &self.sk_ai.len())
            .field("sk_e_len", &self.sk_ei.len())
            .field("sk_p_len", &self.sk_pi.len())
            .finish()
    }
}

impl IkeKeys {
    /// Derive IKEv2 key material
    ///
    /// Implements key derivation from RFC 7296 Section 2.14:
    /// ```text
    /// SKEYSEED = prf(Ni | Nr, g^ir)
    ///
    /// {SK_d | SK_ai | SK_ar | SK_ei | SK_er | SK_pi | SK_pr}
    ///     = prf+ (SKEYSEED, Ni | Nr | SPIi | SPIr)
    /// ```
    ///
    /// # Arguments
    ///
    /// * `prf_alg` - Negotiated PRF
    /// * `nonce` - Concatenated nonce `Ni | Nr`
    /// * `shared_secret` - DH shared secret (g^ir)
    /// * `spi_i` - Initiator's SPI
    /// * `spi_r` - Responder's SPI
    /// * `lengths` - Encryption and integrity key sizes of the chosen transforms
    ///
    /// # Errors
    ///
    /// Returns `KeyDerivation` for an empty nonce or shared secret
    pub fn derive(
        prf_alg: PrfAlgorithm,
        nonce: &[u8],
        shared_secret: &[u8],
        spi_i: u64,
        spi_r: u64,
        lengths: IkeKeyLengths,
    ) -> Result<Self> {
        if nonce.is_empty() {
            return Err(Error::KeyDerivation("empty nonce".into()));
        }
        if shared_secret.is_empty() {
            return Err(Error::KeyDerivation("empty Diffie-Hellman shared key".into()));
        }

        let skeyseed = Zeroizing::new(prf_alg.compute(nonce, shared_secret)?);

        let mut seed = Vec::with_capacity(nonce.len() + 16);
        seed.extend_from_slice(nonce);
        seed.extend_from_slice(&spi_i.to_be_bytes());
        seed.extend_from_slice(&spi_r.to_be_bytes());

        let prf_len = prf_alg.output_len();
        let sizes = [
            prf_len,        // SK_d
            lengths.integ,  // SK_ai
            lengths.integ,  // SK_ar
            lengths.encr,   // SK_ei
            lengths.encr,   // SK_er
            prf_len,        // SK_pi
            prf_len,        // SK_pr
        ];
        let total_len: usize = sizes.iter().sum();

        let keymat = prf_alg.prf_plus(&skeyseed, &seed, total_len)?;
        if keymat.len() != total_len {
            return Err(Error::KeyDerivation(format!(
                "prf+ returned {} of {} bytes",
                keymat.len(),
                total_len
            )));
        }

        let mut keys = split(&keymat, &sizes).into_iter();
        let mut next = || keys.next().unwrap_or_default();

        Ok(IkeKeys {
            sk_d: next(),
            sk_ai: next(),
            sk_ar: next(),
            sk_ei: next(),
            sk_er: next(),
            sk_pi: next(),
            sk_pr: next(),
        })
    }

    /// Total length of all seven keys
    pub fn total_len(&self) -> usize {
        self.sk_d.len()
            + self.sk_ai.len()
            + self.sk_ar.len()
            + self.sk_ei.len()
            + self.sk_er.len()
            + self.sk_pi.len()
            + self.sk_pr.len()
    }
}

/// Child SA keys, per direction
#[derive(Clone, Default)]
pub struct ChildKeys {
    /// Encryption key, initiator to responder
    pub encr_initiator_to_responder: Zeroizing<Vec<u8>>,
    /// Integrity key, initiator to responder
    pub integ_initiator_to_responder: Zeroizing<Vec<u8>>,
    /// Encryption key, responder to initiator
    pub encr_responder_to_initiator: Zeroizing<Vec<u8>>,
    /// Integrity key, responder to initiator
    pub integ_responder_to_initiator: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for ChildKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildKeys")
            .field("encr_len", &self.encr_initiator_to_responder.len())
            .field("integ_len", &self.integ_initiator_to_responder.len())
            .finish()
    }
}

impl ChildKeys {
    /// Derive Child SA keys (RFC 7296 Section 2.17)
    ///
    /// ```text
    /// KEYMAT = prf+(SK_d, Ni | Nr)
    /// ```
    ///
    /// Keys for the initiator-to-responder direction come first, encryption
    /// before integrity in each direction. With a NULL cipher and no
    /// integrity transform all four keys are empty.
    pub fn derive(
        prf_alg: PrfAlgorithm,
        sk_d: &[u8],
        nonce: &[u8],
        encr_len: usize,
        integ_len: usize,
    ) -> Result<Self> {
        if sk_d.is_empty() {
            return Err(Error::KeyDerivation("empty SK_d".into()));
        }
        if nonce.is_empty() {
            return Err(Error::KeyDerivation("empty child nonce".into()));
        }

        let sizes = [encr_len, integ_len, encr_len, integ_len];
        let total_len: usize = sizes.iter().sum();
        let keymat = prf_alg.prf_plus(sk_d, nonce, total_len)?;

        let mut keys = split(&keymat, &sizes).into_iter();
        let mut next = || keys.next().unwrap_or_default();

        Ok(ChildKeys {
            encr_initiator_to_responder: next(),
            integ_initiator_to_responder: next(),
            encr_responder_to_initiator: next(),
            integ_responder_to_initiator: next(),
        })
    }
}

fn split(keymat: &[u8], sizes: &[usize]) -> Vec<Zeroizing<Vec<u8>>> {
    let mut offset = 0;
    sizes
        .iter()
        .map(|&len| {
            let key = Zeroizing::new(keymat[offset..offset + len].to_vec());
            offset += len;
            key
        })
        .collect()
}
