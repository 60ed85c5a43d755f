//! Cipher implementations for IKEv2 encryption
//!
//! Implements encryption and decryption of the SK payload body as defined in
//! RFC 7296 Section 3.14, plus the key sizes and kernel names of the ESP
//! ciphers a Child SA may negotiate.
//!
//! # Padding
//!
//! AES-CBC plaintext is padded to a whole number of blocks with 1 to 16
//! bytes, each holding the pad length, after which the final byte is
//! decremented by one. The last byte therefore carries the count of pad
//! bytes preceding it, which is what the IKE Pad Length field means.
//! Decryption strips `last + 1` bytes.
//!
//! NULL appends a single zero pad-length byte.

use crate::ipsec::ikev2::proposal::EncrTransformId;
use crate::ipsec::{Error, Result};
use aes::{Aes128, Aes192, Aes256};
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

/// AES block and IV size
pub const AES_BLOCK_SIZE: usize = 16;

/// Encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// ENCR_NULL
    Null,
    /// ENCR_AES_CBC with 128-bit key
    AesCbc128,
    /// ENCR_AES_CBC with 192-bit key
    AesCbc192,
    /// ENCR_AES_CBC with 256-bit key
    AesCbc256,
    /// ENCR_AES_CTR (ESP only), key size in bits
    AesCtr(u16),
    /// ENCR_DES (ESP only)
    Des,
    /// ENCR_3DES (ESP only)
    TripleDes,
    /// ENCR_CAST with 128-bit key (ESP only)
    Cast128,
    /// ENCR_BLOWFISH (ESP only), key size in bits
    Blowfish(u16),
}

impl EncryptionAlgorithm {
    /// Look up an algorithm by transform ID and key-length attribute
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedAlgorithm` for unknown IDs or key sizes
    pub fn from_transform(id: u16, key_length: Option<u16>) -> Result<Self> {
        let unsupported = || {
            Error::UnsupportedAlgorithm(format!(
                "encryption transform {} with key length {:?}",
                id, key_length
            ))
        };

        let alg = match EncrTransformId::from_u16(id).ok_or_else(unsupported)? {
            EncrTransformId::Null => EncryptionAlgorithm::Null,
            EncrTransformId::AesCbc => match key_length {
                Some(128) => EncryptionAlgorithm::AesCbc128,
                Some(192) => EncryptionAlgorithm::AesCbc192,
                Some(256) => EncryptionAlgorithm::AesCbc256,
                _ => return Err(unsupported()),
            },
            EncrTransformId::AesCtr => match key_length {
                Some(bits @ (128 | 192 | 256)) => EncryptionAlgorithm::AesCtr(bits),
                _ => return Err(unsupported()),
            },
            EncrTransformId::Des => EncryptionAlgorithm::Des,
            EncrTransformId::TripleDes => EncryptionAlgorithm::TripleDes,
            EncrTransformId::Cast => match key_length {
                Some(128) => EncryptionAlgorithm::Cast128,
                _ => return Err(unsupported()),
            },
            EncrTransformId::Blowfish => EncryptionAlgorithm::Blowfish(key_length.unwrap_or(128)),
        };
        Ok(alg)
    }

    /// Key length in bytes
    ///
    /// AES-CTR keys carry a 4-byte nonce after the AES key (RFC 3686).
    pub fn key_len(self) -> usize {
        match self {
            EncryptionAlgorithm::Null => 0,
            EncryptionAlgorithm::AesCbc128 => 16,
            EncryptionAlgorithm::AesCbc192 => 24,
            EncryptionAlgorithm::AesCbc256 => 32,
            EncryptionAlgorithm::AesCtr(bits) => bits as usize / 8 + 4,
            EncryptionAlgorithm::Des => 8,
            EncryptionAlgorithm::TripleDes => 24,
            EncryptionAlgorithm::Cast128 => 16,
            EncryptionAlgorithm::Blowfish(bits) => bits as usize / 8,
        }
    }

    /// Kernel algorithm name
    pub fn xfrm_name(self) -> &'static str {
        match self {
            EncryptionAlgorithm::Null => "ecb(cipher_null)",
            EncryptionAlgorithm::AesCbc128
            | EncryptionAlgorithm::AesCbc192
            | EncryptionAlgorithm::AesCbc256 => "cbc(aes)",
            EncryptionAlgorithm::AesCtr(_) => "rfc3686(ctr(aes))",
            EncryptionAlgorithm::Des => "cbc(des)",
            EncryptionAlgorithm::TripleDes => "cbc(des3_ede)",
            EncryptionAlgorithm::Cast128 => "cbc(cast5)",
            EncryptionAlgorithm::Blowfish(_) => "cbc(blowfish)",
        }
    }

    /// Encrypt an SK payload body
    ///
    /// Returns `IV | ciphertext` for AES-CBC and `plaintext | 0x00` for NULL.
    pub fn encrypt(self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        match self {
            EncryptionAlgorithm::Null => {
                if !key.is_empty() {
                    tracing::warn!(key_len = key.len(), "Key for the NULL cipher is not empty");
                }
                let mut out = Vec::with_capacity(plaintext.len() + 1);
                out.extend_from_slice(plaintext);
                out.push(0);
                Ok(out)
            }
            EncryptionAlgorithm::AesCbc128
            | EncryptionAlgorithm::AesCbc192
            | EncryptionAlgorithm::AesCbc256 => {
                self.check_key(key)?;

                let pad_len = AES_BLOCK_SIZE - plaintext.len() % AES_BLOCK_SIZE;
                let mut padded = Vec::with_capacity(plaintext.len() + pad_len);
                padded.extend_from_slice(plaintext);
                padded.resize(plaintext.len() + pad_len, pad_len as u8);
                if let Some(last) = padded.last_mut() {
                    *last -= 1;
                }

                let mut iv = [0u8; AES_BLOCK_SIZE];
                rand::thread_rng().fill_bytes(&mut iv);

                let ciphertext = self.cbc_encrypt(key, &iv, &padded)?;

                let mut out = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len());
                out.extend_from_slice(&iv);
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            other => Err(Error::UnsupportedAlgorithm(format!(
                "{} for IKE payload encryption",
                other.xfrm_name()
            ))),
        }
    }

    /// Decrypt an SK payload body and strip the padding
    pub fn decrypt(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        match self {
            EncryptionAlgorithm::Null => {
                let last = *data.last().ok_or(Error::BufferTooShort {
                    required: 1,
                    available: 0,
                })?;
                strip_padding(data.to_vec(), last)
            }
            EncryptionAlgorithm::AesCbc128
            | EncryptionAlgorithm::AesCbc192
            | EncryptionAlgorithm::AesCbc256 => {
                self.check_key(key)?;

                if data.len() < 2 * AES_BLOCK_SIZE {
                    return Err(Error::BufferTooShort {
                        required: 2 * AES_BLOCK_SIZE,
                        available: data.len(),
                    });
                }
                let (iv, ciphertext) = data.split_at(AES_BLOCK_SIZE);
                if ciphertext.len() % AES_BLOCK_SIZE != 0 {
                    return Err(Error::InvalidLength {
                        expected: ciphertext.len().next_multiple_of(AES_BLOCK_SIZE),
                        actual: ciphertext.len(),
                    });
                }

                let plaintext = self.cbc_decrypt(key, iv, ciphertext)?;
                let last = plaintext.last().copied().unwrap_or(0);
                strip_padding(plaintext, last)
            }
            other => Err(Error::UnsupportedAlgorithm(format!(
                "{} for IKE payload decryption",
                other.xfrm_name()
            ))),
        }
    }

    fn check_key(self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: self.key_len(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn cbc_encrypt(self, key: &[u8], iv: &[u8], padded: &[u8]) -> Result<Vec<u8>> {
        let bad_key = |_| Error::CryptoError("Failed to create AES-CBC cipher".into());
        let out = match self {
            EncryptionAlgorithm::AesCbc128 => Encryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(padded),
            EncryptionAlgorithm::AesCbc192 => Encryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(padded),
            EncryptionAlgorithm::AesCbc256 => Encryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .encrypt_padded_vec_mut::<NoPadding>(padded),
            _ => return Err(Error::Internal("CBC encryption with a non-CBC cipher".into())),
        };
        Ok(out)
    }

    fn cbc_decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let bad_key = |_| Error::CryptoError("Failed to create AES-CBC cipher".into());
        let unpad = |_| Error::CryptoError("AES-CBC decryption failed".into());
        match self {
            EncryptionAlgorithm::AesCbc128 => Decryptor::<Aes128>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(unpad),
            EncryptionAlgorithm::AesCbc192 => Decryptor::<Aes192>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(unpad),
            EncryptionAlgorithm::AesCbc256 => Decryptor::<Aes256>::new_from_slices(key, iv)
                .map_err(bad_key)?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(unpad),
            _ => Err(Error::Internal("CBC decryption with a non-CBC cipher".into())),
        }
    }
}

fn strip_padding(mut plaintext: Vec<u8>, last: u8) -> Result<Vec<u8>> {
    let padding = last as usize + 1;
    if padding > plaintext.len() {
        return Err(Error::InvalidPayload(format!(
            "Pad length {} exceeds decrypted length {}",
            last,
            plaintext.len()
        )));
    }
    plaintext.truncate(plaintext.len() - padding);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LENGTHS: [usize; 5] = [0, 1, 15, 16, 1000];

    #[test]
    fn test_key_lengths() {
        assert_eq!(EncryptionAlgorithm::Null.key_len(), 0);
        assert_eq!(EncryptionAlgorithm::AesCbc128.key_len(), 16);
        assert_eq!(EncryptionAlgorithm::AesCbc192.key_len(), 24);
        assert_eq!(EncryptionAlgorithm::AesCbc256.key_len(), 32);
        assert_eq!(EncryptionAlgorithm::AesCtr(128).key_len(), 20);
        assert_eq!(EncryptionAlgorithm::Des.key_len(), 8);
        assert_eq!(EncryptionAlgorithm::TripleDes.key_len(), 24);
        assert_eq!(EncryptionAlgorithm::Cast128.key_len(), 16);
    }

    #[test]
    fn test_from_transform() {
        assert_eq!(
            EncryptionAlgorithm::from_transform(12, Some(192)).unwrap(),
            EncryptionAlgorithm::AesCbc192
        );
        assert_eq!(
            EncryptionAlgorithm::from_transform(11, None).unwrap(),
            EncryptionAlgorithm::Null
        );
        assert!(EncryptionAlgorithm::from_transform(12, None).is_err());
        assert!(EncryptionAlgorithm::from_transform(12, Some(64)).is_err());
        assert!(EncryptionAlgorithm::from_transform(6, Some(64)).is_err());
        assert!(EncryptionAlgorithm::from_transform(20, Some(128)).is_err());
    }

    #[test]
    fn test_null_roundtrip() {
        for len in LENGTHS {
            let m = vec![0xA5u8; len];
            let c = EncryptionAlgorithm::Null.encrypt(&[], &m).unwrap();
            assert_eq!(c.len(), len + 1);
            assert_eq!(*c.last().unwrap(), 0);
            assert_eq!(EncryptionAlgorithm::Null.decrypt(&[], &c).unwrap(), m);
        }
    }

    #[test]
    fn test_aes_cbc_roundtrip() {
        for alg in [
            EncryptionAlgorithm::AesCbc128,
            EncryptionAlgorithm::AesCbc192,
            EncryptionAlgorithm::AesCbc256,
        ] {
            let key = vec![0x42u8; alg.key_len()];
            for len in LENGTHS {
                let m: Vec<u8> = (0..len).map(|i| i as u8).collect();
                let c = alg.encrypt(&key, &m).unwrap();
                assert_eq!((c.len() - AES_BLOCK_SIZE) % AES_BLOCK_SIZE, 0);
                assert!(c.len() > AES_BLOCK_SIZE + len);
                assert_eq!(alg.decrypt(&key, &c).unwrap(), m);
            }
        }
    }

    #[test]
    fn test_aes_cbc_pad_byte_decremented() {
        let alg = EncryptionAlgorithm::AesCbc128;
        let key = [7u8; 16];
        let c = alg.encrypt(&key, &[1, 2, 3]).unwrap();

        // Decrypt without stripping to look at the raw padding
        let raw = alg.cbc_decrypt(&key, &c[..16], &c[16..]).unwrap();
        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..3], &[1, 2, 3]);
        assert!(raw[3..15].iter().all(|&b| b == 13));
        assert_eq!(raw[15], 12);
    }

    #[test]
    fn test_aes_cbc_random_iv() {
        let alg = EncryptionAlgorithm::AesCbc128;
        let key = [7u8; 16];
        let a = alg.encrypt(&key, b"same").unwrap();
        let b = alg.encrypt(&key, b"same").unwrap();
        assert_ne!(a[..16], b[..16]);
    }

    #[test]
    fn test_aes_cbc_bad_lengths() {
        let alg = EncryptionAlgorithm::AesCbc128;
        let key = [7u8; 16];
        assert!(alg.decrypt(&key, &[0u8; 16]).is_err());
        assert!(alg.decrypt(&key, &[0u8; 33]).is_err());
        assert!(matches!(
            alg.encrypt(&[0u8; 10], b"x"),
            Err(Error::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn test_null_rejects_bad_padding() {
        assert!(EncryptionAlgorithm::Null.decrypt(&[], &[]).is_err());
        assert!(EncryptionAlgorithm::Null.decrypt(&[], &[1, 5]).is_err());
    }

    #[test]
    fn test_esp_only_cipher_not_used_for_ike() {
        assert!(matches!(
            EncryptionAlgorithm::TripleDes.encrypt(&[0u8; 24], b"x"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_xfrm_names() {
        assert_eq!(EncryptionAlgorithm::Null.xfrm_name(), "ecb(cipher_null)");
        assert_eq!(EncryptionAlgorithm::AesCbc256.xfrm_name(), "cbc(aes)");
        assert_eq!(EncryptionAlgorithm::AesCtr(128).xfrm_name(), "rfc3686(ctr(aes))");
        assert_eq!(EncryptionAlgorithm::Cast128.xfrm_name(), "cbc(cast5)");
    }
}
