//! IKEv2 shared-key authentication
//!
//! Implements the AUTH computation of RFC 7296 Section 2.15 with the
//! device's `Ktipsec` as the shared key.

use super::payload::{AuthMethod, AuthPayload};
use crate::ipsec::crypto::PrfAlgorithm;
use crate::ipsec::{Error, Result};
use subtle::ConstantTimeEq;

/// Key pad for IKEv2 (RFC 7296 Section 2.15)
const KEY_PAD_IKEV2: &[u8] = b"Key Pad for IKEv2";

/// Compute a shared-key AUTH payload
///
/// ```text
/// AUTH = prf(prf(Shared Secret, "Key Pad for IKEv2"), <SignedOctets>)
/// ```
///
/// # Errors
///
/// Returns `CryptoError` if the PRF rejects the key
pub fn compute_shared_key_auth(
    prf_alg: PrfAlgorithm,
    shared_key: &[u8],
    signed_octets: &[u8],
) -> Result<AuthPayload> {
    let padded_key = prf_alg.compute(shared_key, KEY_PAD_IKEV2)?;
    let auth_data = prf_alg.compute(&padded_key, signed_octets)?;

    Ok(AuthPayload::new(AuthMethod::SharedKeyMic, auth_data))
}

/// Verify a shared-key AUTH payload in constant time
///
/// # Errors
///
/// Returns `AuthenticationFailed` for a different method or a mismatch
pub fn verify_shared_key_auth(
    prf_alg: PrfAlgorithm,
    shared_key: &[u8],
    signed_octets: &[u8],
    received: &AuthPayload,
) -> Result<()> {
    if received.auth_method != AuthMethod::SharedKeyMic {
        return Err(Error::AuthenticationFailed(format!(
            "Expected shared key auth, got {:?}",
            received.auth_method
        )));
    }

    let expected = compute_shared_key_auth(prf_alg, shared_key, signed_octets)?;

    // ct_eq is false for slices of different length
    if !bool::from(expected.auth_data.ct_eq(&received.auth_data)) {
        return Err(Error::AuthenticationFailed(
            "AUTH verification failed".to_string(),
        ));
    }

    Ok(())
}

/// Append `prf(SK_p, ID')` to a signed-octets buffer
///
/// The IKE_SA_INIT part (`RealMessage | Nonce`) is recorded when that
/// exchange completes; this adds the identity part once IDi or IDr is
/// known.
///
/// # Arguments
///
/// * `signed_octets` - Buffer to extend
/// * `sk_p` - SK_pi for the device, SK_pr for the gateway
/// * `id_body` - ID payload body (type, reserved, data)
pub fn append_identity_hash(
    signed_octets: &mut Vec<u8>,
    prf_alg: PrfAlgorithm,
    sk_p: &[u8],
    id_body: &[u8],
) -> Result<()> {
    let id_hash = prf_alg.compute(sk_p, id_body)?;
    signed_octets.extend_from_slice(&id_hash);
    Ok(())
}

/// Build the IKE_SA_INIT part of a signed-octets buffer
///
/// ```text
/// RealMessage | Nonce
/// ```
pub fn signed_octets_prefix(real_message: &[u8], nonce: &[u8]) -> Vec<u8> {
    let mut signed_octets = Vec::with_capacity(real_message.len() + nonce.len());
    signed_octets.extend_from_slice(real_message);
    signed_octets.extend_from_slice(nonce);
    signed_octets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_shared_key_auth() {
        let auth = compute_shared_key_auth(PrfAlgorithm::HmacSha1, &[0x01; 32], &[0x02; 128]).unwrap();

        assert_eq!(auth.auth_method, AuthMethod::SharedKeyMic);
        assert_eq!(auth.auth_data.len(), 20);
    }

    #[test]
    fn test_auth_deterministic() {
        let auth1 = compute_shared_key_auth(PrfAlgorithm::HmacMd5, &[0xAA; 32], &[0xBB; 64]).unwrap();
        let auth2 = compute_shared_key_auth(PrfAlgorithm::HmacMd5, &[0xAA; 32], &[0xBB; 64]).unwrap();

        assert_eq!(auth1.auth_data, auth2.auth_data);
        assert_eq!(auth1.auth_data.len(), 16);
    }

    #[test]
    fn test_verify_auth_success() {
        let prf_alg = PrfAlgorithm::HmacSha1;
        let auth = compute_shared_key_auth(prf_alg, &[0x03; 32], &[0x04; 100]).unwrap();

        assert!(verify_shared_key_auth(prf_alg, &[0x03; 32], &[0x04; 100], &auth).is_ok());
    }

    #[test]
    fn test_verify_auth_wrong_data() {
        let prf_alg = PrfAlgorithm::HmacSha1;
        let auth = compute_shared_key_auth(prf_alg, &[0x05; 32], &[0x06; 100]).unwrap();

        let result = verify_shared_key_auth(prf_alg, &[0x05; 32], &[0x07; 100], &auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_verify_auth_wrong_key() {
        let prf_alg = PrfAlgorithm::HmacSha1;
        let auth = compute_shared_key_auth(prf_alg, &[0x08; 32], &[0x0A; 100]).unwrap();

        let result = verify_shared_key_auth(prf_alg, &[0x09; 32], &[0x0A; 100], &auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_verify_auth_truncated() {
        let prf_alg = PrfAlgorithm::HmacSha1;
        let mut auth = compute_shared_key_auth(prf_alg, &[0x0B; 32], &[0x0C; 10]).unwrap();
        auth.auth_data.truncate(12);

        let result = verify_shared_key_auth(prf_alg, &[0x0B; 32], &[0x0C; 10], &auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_verify_auth_wrong_method() {
        let wrong_auth = AuthPayload::new(AuthMethod::RsaSig, vec![0xFF; 20]);

        let result = verify_shared_key_auth(PrfAlgorithm::HmacSha1, &[0x0B; 32], &[0x0C; 100], &wrong_auth);
        assert!(matches!(result, Err(Error::AuthenticationFailed(_))));
    }

    #[test]
    fn test_signed_octets_layout() {
        let prf_alg = PrfAlgorithm::HmacSha1;
        let mut octets = signed_octets_prefix(&[0x01; 200], &[0x02; 32]);
        append_identity_hash(&mut octets, prf_alg, &[0x03; 20], &[0x04; 20]).unwrap();

        assert_eq!(octets.len(), 200 + 32 + 20);
        assert_eq!(&octets[..200], &[0x01; 200][..]);
        assert_eq!(&octets[200..232], &[0x02; 32][..]);
    }
}
