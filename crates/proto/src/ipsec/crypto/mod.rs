//! IKEv2 cryptographic operations
//!
//! This module provides the cryptographic primitives of the SA engine:
//! - Diffie-Hellman over MODP groups 2 and 14
//! - PRF, prf+ and IKE/Child SA key derivation
//! - Encryption (NULL, AES-CBC) and integrity (HMAC-MD5-96, HMAC-SHA1-96)
//! - Encrypted payload sealing and opening

pub mod channel;
pub mod cipher;
pub mod dh;
pub mod integrity;
pub mod prf;

pub use channel::SecureChannel;
pub use cipher::EncryptionAlgorithm;
pub use dh::{compute_materials, DhGroup, DhSecret};
pub use integrity::IntegrityAlgorithm;
pub use prf::{ChildKeys, IkeKeyLengths, IkeKeys, PrfAlgorithm};
