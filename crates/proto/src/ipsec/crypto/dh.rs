//! Diffie-Hellman key exchange over the MODP groups of RFC 2409 / RFC 3526
//!
//! # Example
//!
//! ```rust
//! use tngf_proto::ipsec::crypto::dh::{compute_materials, DhGroup, DhSecret};
//!
//! let a = DhSecret::generate();
//! let b = DhSecret::generate();
//! let group = DhGroup::Modp2048;
//!
//! let (pub_a, _) = compute_materials(&a, &[2], group).unwrap();
//! let (pub_b, _) = compute_materials(&b, &[2], group).unwrap();
//! let (_, shared_a) = compute_materials(&a, &pub_b, group).unwrap();
//! let (_, shared_b) = compute_materials(&b, &pub_a, group).unwrap();
//! assert_eq!(&shared_a[..], &shared_b[..]);
//! ```

use crate::ipsec::ikev2::proposal::DhTransformId;
use crate::ipsec::{Error, Result};
use num_bigint::{BigUint, RandBigInt};
use num_traits::One;
use once_cell::sync::Lazy;
use zeroize::{Zeroize, Zeroizing};

/// MODP group parameters
mod modp {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    /// 1024-bit MODP prime (RFC 2409 Section 6.2)
    pub static GROUP2_P: Lazy<BigUint> = Lazy::new(|| {
        BigUint::from_bytes_be(&[
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68,
            0xC2, 0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08,
            0x8A, 0x67, 0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A,
            0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD, 0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B,
            0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51,
            0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9,
            0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED, 0xEE, 0x38,
            0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
            0x49, 0x28, 0x66, 0x51, 0xEC, 0xE6, 0x53, 0x81, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF,
        ])
    });

    /// 2048-bit MODP prime (RFC 3526 Section 3)
    pub static GROUP14_P: Lazy<BigUint> = Lazy::new(|| {
        BigUint::from_bytes_be(&[
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xC9, 0x0F, 0xDA, 0xA2, 0x21, 0x68,
            0xC2, 0x34, 0xC4, 0xC6, 0x62, 0x8B, 0x80, 0xDC, 0x1C, 0xD1, 0x29, 0x02, 0x4E, 0x08,
            0x8A, 0x67, 0xCC, 0x74, 0x02, 0x0B, 0xBE, 0xA6, 0x3B, 0x13, 0x9B, 0x22, 0x51, 0x4A,
            0x08, 0x79, 0x8E, 0x34, 0x04, 0xDD, 0xEF, 0x95, 0x19, 0xB3, 0xCD, 0x3A, 0x43, 0x1B,
            0x30, 0x2B, 0x0A, 0x6D, 0xF2, 0x5F, 0x14, 0x37, 0x4F, 0xE1, 0x35, 0x6D, 0x6D, 0x51,
            0xC2, 0x45, 0xE4, 0x85, 0xB5, 0x76, 0x62, 0x5E, 0x7E, 0xC6, 0xF4, 0x4C, 0x42, 0xE9,
            0xA6, 0x37, 0xED, 0x6B, 0x0B, 0xFF, 0x5C, 0xB6, 0xF4, 0x06, 0xB7, 0xED, 0xEE, 0x38,
            0x6B, 0xFB, 0x5A, 0x89, 0x9F, 0xA5, 0xAE, 0x9F, 0x24, 0x11, 0x7C, 0x4B, 0x1F, 0xE6,
            0x49, 0x28, 0x66, 0x51, 0xEC, 0xE4, 0x5B, 0x3D, 0xC2, 0x00, 0x7C, 0xB8, 0xA1, 0x63,
            0xBF, 0x05, 0x98, 0xDA, 0x48, 0x36, 0x1C, 0x55, 0xD3, 0x9A, 0x69, 0x16, 0x3F, 0xA8,
            0xFD, 0x24, 0xCF, 0x5F, 0x83, 0x65, 0x5D, 0x23, 0xDC, 0xA3, 0xAD, 0x96, 0x1C, 0x62,
            0xF3, 0x56, 0x20, 0x85, 0x52, 0xBB, 0x9E, 0xD5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6D,
            0x67, 0x0C, 0x35, 0x4E, 0x4A, 0xBC, 0x98, 0x04, 0xF1, 0x74, 0x6C, 0x08, 0xCA, 0x18,
            0x21, 0x7C, 0x32, 0x90, 0x5E, 0x46, 0x2E, 0x36, 0xCE, 0x3B, 0xE3, 0x9E, 0x77, 0x2C,
            0x18, 0x0E, 0x86, 0x03, 0x9B, 0x27, 0x83, 0xA2, 0xEC, 0x07, 0xA2, 0x8F, 0xB5, 0xC5,
            0x5D, 0xF0, 0x6F, 0x4C, 0x52, 0xC9, 0xDE, 0x2B, 0xCB, 0xF6, 0x95, 0x58, 0x17, 0x18,
            0x39, 0x95, 0x49, 0x7C, 0xEA, 0x95, 0x6A, 0xE5, 0x15, 0xD2, 0x26, 0x18, 0x98, 0xFA,
            0x05, 0x10, 0x15, 0x72, 0x8E, 0x5A, 0x8A, 0xAC, 0xAA, 0x68, 0xFF, 0xFF, 0xFF, 0xFF,
            0xFF, 0xFF, 0xFF, 0xFF,
        ])
    });
}

/// Lower bound (inclusive) of a generated exponent
static SECRET_MIN: Lazy<BigUint> = Lazy::new(|| BigUint::one() << 128usize);

/// Upper bound (exclusive) of a generated exponent
static SECRET_MAX: Lazy<BigUint> = Lazy::new(|| (BigUint::one() << 2048usize) - 1u32);

/// Supported Diffie-Hellman groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DhGroup {
    /// 1024-bit MODP (group 2)
    Modp1024,
    /// 2048-bit MODP (group 14)
    Modp2048,
}

impl DhGroup {
    /// Look up a group by its IKE transform ID
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedGroup` for anything but groups 2 and 14
    pub fn from_transform_id(id: u16) -> Result<Self> {
        match DhTransformId::from_u16(id) {
            Some(DhTransformId::Group2) => Ok(DhGroup::Modp1024),
            Some(DhTransformId::Group14) => Ok(DhGroup::Modp2048),
            None => Err(Error::UnsupportedGroup(id)),
        }
    }

    /// IKE transform ID of this group
    pub fn transform_id(self) -> u16 {
        match self {
            DhGroup::Modp1024 => DhTransformId::Group2.to_u16(),
            DhGroup::Modp2048 => DhTransformId::Group14.to_u16(),
        }
    }

    /// Group prime
    pub fn prime(self) -> &'static BigUint {
        match self {
            DhGroup::Modp1024 => &modp::GROUP2_P,
            DhGroup::Modp2048 => &modp::GROUP14_P,
        }
    }

    /// Group generator (2 for both groups)
    pub fn generator(self) -> BigUint {
        BigUint::from(2u32)
    }

    /// Length in bytes of public values and shared keys
    pub fn prime_len(self) -> usize {
        match self {
            DhGroup::Modp1024 => 128,
            DhGroup::Modp2048 => 256,
        }
    }
}

/// Private Diffie-Hellman exponent
///
/// The big-endian bytes are wiped on drop.
pub struct DhSecret {
    exponent: Vec<u8>,
}

impl DhSecret {
    /// Generate a random exponent in `[2^128, 2^2048 - 1)`
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let x = rng.gen_biguint_range(&SECRET_MIN, &SECRET_MAX);
        DhSecret {
            exponent: x.to_bytes_be(),
        }
    }

    /// Build a secret from big-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        DhSecret {
            exponent: bytes.to_vec(),
        }
    }

    /// Public value `g^secret mod p`, left-padded to the prime length
    pub fn public_value(&self, group: DhGroup) -> Vec<u8> {
        let y = group.generator().modpow(&self.to_biguint(), group.prime());
        left_pad(&y.to_bytes_be(), group.prime_len())
    }

    fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.exponent)
    }
}

impl std::fmt::Debug for DhSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DhSecret(..)")
    }
}

impl Drop for DhSecret {
    fn drop(&mut self) {
        self.exponent.zeroize();
    }
}

/// Compute the local public value and the shared key
///
/// ```text
/// local_public = g^secret mod p
/// shared_key   = peer_public^secret mod p
/// ```
///
/// Both outputs are big-endian and left-padded with zeros to the prime
/// length of the group.
///
/// # Errors
///
/// Returns `InvalidPayload` when the peer value is outside `(1, p - 1)`
pub fn compute_materials(
    secret: &DhSecret,
    peer_public: &[u8],
    group: DhGroup,
) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
    let p = group.prime();
    let x = secret.to_biguint();

    let y_peer = BigUint::from_bytes_be(peer_public);
    if y_peer <= BigUint::one() || y_peer >= p - 1u32 {
        return Err(Error::InvalidPayload(
            "Diffie-Hellman public value out of range".into(),
        ));
    }

    let shared = y_peer.modpow(&x, p);

    Ok((
        secret.public_value(group),
        Zeroizing::new(left_pad(&shared.to_bytes_be(), group.prime_len())),
    ))
}

/// Compute materials for a raw IKE group number
///
/// # Errors
///
/// Returns `UnsupportedGroup` for unknown groups, otherwise as
/// [`compute_materials`]
pub fn compute_materials_for(
    secret: &DhSecret,
    peer_public: &[u8],
    group_id: u16,
) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
    compute_materials(secret, peer_public, DhGroup::from_transform_id(group_id)?)
}

fn left_pad(bytes: &[u8], len: usize) -> Vec<u8> {
    if bytes.len() >= len {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; len - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_of(secret: &DhSecret, group: DhGroup) -> Vec<u8> {
        let via_materials = compute_materials(secret, &[2], group).unwrap().0;
        assert_eq!(via_materials, secret.public_value(group));
        via_materials
    }

    #[test]
    fn test_dh_symmetry_both_groups() {
        for group in [DhGroup::Modp1024, DhGroup::Modp2048] {
            let a = DhSecret::generate();
            let b = DhSecret::generate();

            let pub_a = public_of(&a, group);
            let pub_b = public_of(&b, group);
            assert_eq!(pub_a.len(), group.prime_len());
            assert_eq!(pub_b.len(), group.prime_len());

            let (_, shared_a) = compute_materials(&a, &pub_b, group).unwrap();
            let (_, shared_b) = compute_materials(&b, &pub_a, group).unwrap();
            assert_eq!(&shared_a[..], &shared_b[..]);
            assert_eq!(shared_a.len(), group.prime_len());
        }
    }

    #[test]
    fn test_secret_range() {
        for _ in 0..8 {
            let x = DhSecret::generate().to_biguint();
            assert!(x >= *SECRET_MIN);
            assert!(x < *SECRET_MAX);
        }
    }

    #[test]
    fn test_small_exponent_padding() {
        // g^1 = 2 must be left-padded to the full prime length
        let one = DhSecret::from_bytes(&[1]);
        let (public, _) = compute_materials(&one, &[2], DhGroup::Modp1024).unwrap();
        assert_eq!(public.len(), 128);
        assert_eq!(public[127], 2);
        assert!(public[..127].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_unsupported_group() {
        let secret = DhSecret::generate();
        let result = compute_materials_for(&secret, &[2], 19);
        assert!(matches!(result, Err(Error::UnsupportedGroup(19))));
        assert_eq!(DhGroup::from_transform_id(14).unwrap(), DhGroup::Modp2048);
        assert_eq!(DhGroup::Modp1024.transform_id(), 2);
    }

    #[test]
    fn test_invalid_peer_value() {
        let secret = DhSecret::generate();
        assert!(compute_materials(&secret, &[0], DhGroup::Modp2048).is_err());
        assert!(compute_materials(&secret, &[1], DhGroup::Modp2048).is_err());

        let p_minus_one = (DhGroup::Modp2048.prime() - 1u32).to_bytes_be();
        assert!(compute_materials(&secret, &p_minus_one, DhGroup::Modp2048).is_err());
    }

    #[test]
    fn test_prime_sizes() {
        assert_eq!(DhGroup::Modp1024.prime().bits(), 1024);
        assert_eq!(DhGroup::Modp2048.prime().bits(), 2048);
    }
}
