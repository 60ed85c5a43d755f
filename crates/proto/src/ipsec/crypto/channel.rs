//! Encrypted payload (SK) protection for IKE messages
//!
//! Outbound: the inner payload chain is encrypted, a zeroed checksum slot is
//! appended, the full message is encoded and the checksum over everything
//! before the slot is spliced in. Inbound is the reverse: verify first, in
//! constant time, then decrypt.
//!
//! Keys are picked by IKE SA role. The gateway is always the IKE responder,
//! so it opens with SK_ei/SK_ai and seals with SK_er/SK_ar, including for
//! the CREATE_CHILD_SA requests it initiates.

use super::cipher::EncryptionAlgorithm;
use super::integrity::IntegrityAlgorithm;
use super::prf::IkeKeys;
use crate::ipsec::ikev2::constants::PayloadType;
use crate::ipsec::ikev2::message::{IkeHeader, IkeMessage};
use crate::ipsec::ikev2::payload::{decode_payloads, encode_payloads, EncryptedPayload, IkePayload};
use crate::ipsec::{Error, Result};

/// SK payload sealer/opener bound to one IKE SA's keys
pub struct SecureChannel<'a> {
    encryption: EncryptionAlgorithm,
    integrity: IntegrityAlgorithm,
    open_encr: &'a [u8],
    open_integ: &'a [u8],
    seal_encr: &'a [u8],
    seal_integ: &'a [u8],
}

impl<'a> SecureChannel<'a> {
    /// Channel for the IKE responder
    pub fn responder(
        encryption: EncryptionAlgorithm,
        integrity: IntegrityAlgorithm,
        keys: &'a IkeKeys,
    ) -> Self {
        SecureChannel {
            encryption,
            integrity,
            open_encr: &keys.sk_ei,
            open_integ: &keys.sk_ai,
            seal_encr: &keys.sk_er,
            seal_integ: &keys.sk_ar,
        }
    }

    /// Channel for the IKE initiator
    pub fn initiator(
        encryption: EncryptionAlgorithm,
        integrity: IntegrityAlgorithm,
        keys: &'a IkeKeys,
    ) -> Self {
        SecureChannel {
            encryption,
            integrity,
            open_encr: &keys.sk_er,
            open_integ: &keys.sk_ar,
            seal_encr: &keys.sk_ei,
            seal_integ: &keys.sk_ai,
        }
    }

    /// Verify and decrypt the SK payload of a received message
    ///
    /// # Arguments
    ///
    /// * `raw` - The message exactly as received (checksum input)
    /// * `message` - The decoded form of `raw`
    ///
    /// # Errors
    ///
    /// - `InvalidMessage` if there is no SK payload
    /// - `IntegrityCheckFailed` if the checksum does not verify
    /// - decryption or inner payload decoding errors
    pub fn open(&self, raw: &[u8], message: &IkeMessage) -> Result<Vec<IkePayload>> {
        let sk = match message.payloads.last() {
            Some(IkePayload::SK(sk)) => sk,
            _ => {
                return Err(Error::InvalidMessage(
                    "No encrypted payload in message".into(),
                ))
            }
        };

        let checksum_len = self.integrity.checksum_len();
        if sk.data.len() < checksum_len || raw.len() < checksum_len {
            return Err(Error::BufferTooShort {
                required: checksum_len,
                available: sk.data.len(),
            });
        }

        let (authenticated, checksum) = raw.split_at(raw.len() - checksum_len);
        if !self.integrity.verify(self.open_integ, authenticated, checksum)? {
            return Err(Error::IntegrityCheckFailed);
        }

        let encrypted = &sk.data[..sk.data.len() - checksum_len];
        let plaintext = self.encryption.decrypt(self.open_encr, encrypted)?;

        decode_payloads(sk.next_payload, &plaintext)
    }

    /// Build a complete message whose payloads travel inside an SK payload
    ///
    /// `header` supplies SPIs, exchange type, flags and message ID.
    pub fn seal(&self, header: IkeHeader, payloads: &[IkePayload]) -> Result<Vec<u8>> {
        let inner = encode_payloads(payloads);
        let first = payloads
            .first()
            .map(IkePayload::type_u8)
            .unwrap_or(PayloadType::None.to_u8());

        let mut data = self.encryption.encrypt(self.seal_encr, &inner)?;
        let checksum_len = self.integrity.checksum_len();
        data.resize(data.len() + checksum_len, 0);

        let mut bytes = IkeMessage::new(
            header,
            vec![IkePayload::SK(EncryptedPayload {
                next_payload: first,
                data,
            })],
        )
        .encode();

        let split = bytes.len() - checksum_len;
        let checksum = self.integrity.checksum(self.seal_integ, &bytes[..split])?;
        bytes[split..].copy_from_slice(&checksum);

        Ok(bytes)
    }
}
