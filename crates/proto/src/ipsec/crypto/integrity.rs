//! Integrity algorithms for the Encrypted payload checksum
//!
//! The 96-bit HMAC variants of RFC 2404 / RFC 2403: the full HMAC output is
//! truncated to 12 bytes. Checksums are compared in constant time.

use crate::ipsec::ikev2::proposal::IntegTransformId;
use crate::ipsec::{Error, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use subtle::ConstantTimeEq;

/// Length of every supported checksum in bytes
pub const CHECKSUM_LEN: usize = 12;

/// Integrity algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityAlgorithm {
    /// AUTH_HMAC_MD5_96
    HmacMd5_96,
    /// AUTH_HMAC_SHA1_96
    HmacSha1_96,
    /// AUTH_AES_XCBC_96 (ESP only; keys are derived but no checksum is computed here)
    AesXcbc96,
}

impl IntegrityAlgorithm {
    /// Look up an algorithm by its IKE transform ID
    pub fn from_transform_id(id: u16) -> Result<Self> {
        match IntegTransformId::from_u16(id) {
            Some(IntegTransformId::HmacMd5_96) => Ok(IntegrityAlgorithm::HmacMd5_96),
            Some(IntegTransformId::HmacSha1_96) => Ok(IntegrityAlgorithm::HmacSha1_96),
            Some(IntegTransformId::AesXcbc96) => Ok(IntegrityAlgorithm::AesXcbc96),
            None => Err(Error::UnsupportedAlgorithm(format!(
                "integrity transform {}",
                id
            ))),
        }
    }

    /// Key length in bytes
    pub fn key_len(self) -> usize {
        match self {
            IntegrityAlgorithm::HmacMd5_96 => 16,
            IntegrityAlgorithm::HmacSha1_96 => 20,
            IntegrityAlgorithm::AesXcbc96 => 16,
        }
    }

    /// Checksum length in bytes
    pub fn checksum_len(self) -> usize {
        CHECKSUM_LEN
    }

    /// Kernel algorithm name
    pub fn xfrm_name(self) -> &'static str {
        match self {
            IntegrityAlgorithm::HmacMd5_96 => "hmac(md5)",
            IntegrityAlgorithm::HmacSha1_96 => "hmac(sha1)",
            IntegrityAlgorithm::AesXcbc96 => "xcbc(aes)",
        }
    }

    /// Compute the truncated checksum
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for AES-XCBC, which is never chosen
    /// for an IKE SA
    pub fn checksum(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let mut full = match self {
            IntegrityAlgorithm::HmacMd5_96 => {
                let mut mac = Hmac::<Md5>::new_from_slice(key)
                    .map_err(|e| Error::CryptoError(format!("HMAC-MD5 key: {}", e)))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegrityAlgorithm::HmacSha1_96 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(key)
                    .map_err(|e| Error::CryptoError(format!("HMAC-SHA1 key: {}", e)))?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            IntegrityAlgorithm::AesXcbc96 => {
                return Err(Error::UnsupportedAlgorithm(
                    "AES-XCBC-96 for IKE payload integrity".into(),
                ))
            }
        };
        full.truncate(CHECKSUM_LEN);
        Ok(full)
    }

    /// Verify a checksum in constant time
    pub fn verify(self, key: &[u8], data: &[u8], checksum: &[u8]) -> Result<bool> {
        let expected = self.checksum(key, data)?;
        Ok(expected.ct_eq(checksum).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lengths() {
        assert_eq!(IntegrityAlgorithm::HmacMd5_96.key_len(), 16);
        assert_eq!(IntegrityAlgorithm::HmacSha1_96.key_len(), 20);
        assert_eq!(IntegrityAlgorithm::AesXcbc96.key_len(), 16);
    }

    #[test]
    fn test_checksum_truncated() {
        for alg in [IntegrityAlgorithm::HmacMd5_96, IntegrityAlgorithm::HmacSha1_96] {
            let sum = alg.checksum(&vec![7u8; alg.key_len()], b"payload").unwrap();
            assert_eq!(sum.len(), CHECKSUM_LEN);
        }
    }

    #[test]
    fn test_sha1_96_matches_rfc2202_prefix() {
        let sum = IntegrityAlgorithm::HmacSha1_96
            .checksum(b"Jefe", b"what do ya want for nothing?")
            .unwrap();
        assert_eq!(hex::encode(sum), "effcdf6ae5eb2fa2d27416d5");
    }

    #[test]
    fn test_verify_and_bit_flips() {
        for alg in [IntegrityAlgorithm::HmacMd5_96, IntegrityAlgorithm::HmacSha1_96] {
            let key = vec![0x5Au8; alg.key_len()];
            let data = b"encrypted payload bytes".to_vec();
            let sum = alg.checksum(&key, &data).unwrap();
            assert!(alg.verify(&key, &data, &sum).unwrap());

            for i in 0..data.len() * 8 {
                let mut flipped = data.clone();
                flipped[i / 8] ^= 1 << (i % 8);
                assert!(!alg.verify(&key, &flipped, &sum).unwrap());
            }

            for i in 0..sum.len() * 8 {
                let mut flipped = sum.clone();
                flipped[i / 8] ^= 1 << (i % 8);
                assert!(!alg.verify(&key, &data, &flipped).unwrap());
            }
        }
    }

    #[test]
    fn test_verify_wrong_length() {
        let alg = IntegrityAlgorithm::HmacSha1_96;
        let key = [1u8; 20];
        let sum = alg.checksum(&key, b"x").unwrap();
        assert!(!alg.verify(&key, b"x", &sum[..11]).unwrap());
    }

    #[test]
    fn test_xcbc_rejected_for_ike() {
        assert!(matches!(
            IntegrityAlgorithm::AesXcbc96.checksum(&[0u8; 16], b"x"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_xfrm_names() {
        assert_eq!(IntegrityAlgorithm::HmacSha1_96.xfrm_name(), "hmac(sha1)");
        assert_eq!(
            IntegrityAlgorithm::from_transform_id(5).unwrap().xfrm_name(),
            "xcbc(aes)"
        );
    }
}
