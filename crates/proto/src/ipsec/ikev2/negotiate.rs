//! Proposal selection (RFC 7296 Section 2.7)
//!
//! The gateway never makes counter-offers: it walks the peer's proposals in
//! order and keeps the first one it can satisfy, picking the first supported
//! transform of each type. Two support tables exist, one for the IKE SA the
//! engine itself protects and one for the ESP SAs the kernel will carry.

use super::proposal::{
    DhTransformId, EncrTransformId, EsnTransformId, IntegTransformId, PrfTransformId, Proposal,
    ProtocolId, Transform, TransformType,
};
use crate::ipsec::crypto::{DhGroup, EncryptionAlgorithm, IntegrityAlgorithm, PrfAlgorithm};
use crate::ipsec::{Error, Result};

/// Whether the engine can run an IKE SA with this transform
pub fn is_ike_supported(transform: &Transform) -> bool {
    let id = transform.transform_id;
    match transform.transform_type {
        TransformType::Encr => match EncrTransformId::from_u16(id) {
            Some(EncrTransformId::Null) => true,
            Some(EncrTransformId::AesCbc) => {
                matches!(transform.key_length, Some(128 | 192 | 256))
            }
            _ => false,
        },
        TransformType::Prf => PrfTransformId::from_u16(id).is_some(),
        TransformType::Integ => matches!(
            IntegTransformId::from_u16(id),
            Some(IntegTransformId::HmacMd5_96 | IntegTransformId::HmacSha1_96)
        ),
        TransformType::Dh => DhTransformId::from_u16(id).is_some(),
        TransformType::Esn => false,
    }
}

/// Whether the kernel can carry an ESP SA with this transform
pub fn is_kernel_supported(transform: &Transform) -> bool {
    let id = transform.transform_id;
    match transform.transform_type {
        TransformType::Encr => match EncrTransformId::from_u16(id) {
            Some(
                EncrTransformId::Des
                | EncrTransformId::TripleDes
                | EncrTransformId::Blowfish
                | EncrTransformId::Null,
            ) => true,
            Some(EncrTransformId::Cast) => transform.key_length == Some(128),
            Some(EncrTransformId::AesCbc | EncrTransformId::AesCtr) => {
                matches!(transform.key_length, Some(128 | 192 | 256))
            }
            None => false,
        },
        TransformType::Prf => false,
        TransformType::Integ => IntegTransformId::from_u16(id).is_some(),
        TransformType::Dh => false,
        TransformType::Esn => EsnTransformId::from_u16(id).is_some(),
    }
}

/// Outcome of IKE proposal selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenIke {
    /// Proposal to echo in the response SA payload
    pub proposal: Proposal,
    /// Cipher protecting the SK payload
    pub encryption: EncryptionAlgorithm,
    /// Pseudorandom function
    pub prf: PrfAlgorithm,
    /// SK payload integrity algorithm
    pub integrity: IntegrityAlgorithm,
    /// Diffie-Hellman group
    pub dh_group: DhGroup,
}

/// Outcome of ESP proposal selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChosenEsp {
    /// Proposal with one transform per category, SPI as offered
    pub proposal: Proposal,
    /// ESP cipher
    pub encryption: EncryptionAlgorithm,
    /// ESP integrity algorithm, if one was offered
    pub integrity: Option<IntegrityAlgorithm>,
    /// Extended sequence numbers
    pub esn: bool,
    /// SPI carried in the proposal
    pub spi: u32,
}

fn first_supported(
    proposal: &Proposal,
    transform_type: TransformType,
    supported: fn(&Transform) -> bool,
) -> Option<&Transform> {
    proposal
        .transforms_of(transform_type)
        .find(|transform| supported(transform))
}

/// Select the IKE SA proposal from an IKE_SA_INIT request
///
/// Encryption, PRF, integrity and DH are all mandatory. A proposal that
/// offers ESN is skipped.
///
/// # Errors
///
/// Returns `NoProposalChosen` if no proposal can be satisfied
pub fn negotiate_ike(offered: &[Proposal]) -> Result<ChosenIke> {
    for proposal in offered {
        if proposal.protocol_id != ProtocolId::Ike {
            continue;
        }
        if proposal.get_transform(TransformType::Esn).is_some() {
            continue;
        }

        let encr = first_supported(proposal, TransformType::Encr, is_ike_supported);
        let prf = first_supported(proposal, TransformType::Prf, is_ike_supported);
        let integ = first_supported(proposal, TransformType::Integ, is_ike_supported);
        let dh = first_supported(proposal, TransformType::Dh, is_ike_supported);

        let (Some(encr), Some(prf), Some(integ), Some(dh)) = (encr, prf, integ, dh) else {
            continue;
        };

        return Ok(ChosenIke {
            proposal: Proposal::new(proposal.proposal_num, ProtocolId::Ike)
                .add_transform(encr.clone())
                .add_transform(prf.clone())
                .add_transform(integ.clone())
                .add_transform(dh.clone()),
            encryption: EncryptionAlgorithm::from_transform(encr.transform_id, encr.key_length)?,
            prf: PrfAlgorithm::from_transform_id(prf.transform_id)?,
            integrity: IntegrityAlgorithm::from_transform_id(integ.transform_id)?,
            dh_group: DhGroup::from_transform_id(dh.transform_id)?,
        });
    }

    Err(Error::NoProposalChosen)
}

/// Select the ESP proposal from an IKE_AUTH or CREATE_CHILD_SA payload
///
/// Encryption and ESN are mandatory and PRF is forbidden. Integrity and DH
/// are optional, but when offered at least one must be supported.
///
/// # Errors
///
/// Returns `NoProposalChosen` if no proposal can be satisfied
pub fn negotiate_esp(offered: &[Proposal]) -> Result<ChosenEsp> {
    for proposal in offered {
        if proposal.protocol_id != ProtocolId::Esp {
            continue;
        }
        let Some(spi) = proposal.esp_spi() else {
            continue;
        };
        if proposal.get_transform(TransformType::Prf).is_some() {
            continue;
        }

        let Some(encr) = first_supported(proposal, TransformType::Encr, is_kernel_supported)
        else {
            continue;
        };
        let Some(esn) = first_supported(proposal, TransformType::Esn, is_kernel_supported) else {
            continue;
        };

        let integ = first_supported(proposal, TransformType::Integ, is_kernel_supported);
        if integ.is_none() && proposal.get_transform(TransformType::Integ).is_some() {
            continue;
        }
        let dh = first_supported(proposal, TransformType::Dh, is_kernel_supported);
        if dh.is_none() && proposal.get_transform(TransformType::Dh).is_some() {
            continue;
        }

        let mut chosen = Proposal::new(proposal.proposal_num, ProtocolId::Esp)
            .with_spi(proposal.spi.clone())
            .add_transform(encr.clone());
        if let Some(integ) = integ {
            chosen = chosen.add_transform(integ.clone());
        }
        if let Some(dh) = dh {
            chosen = chosen.add_transform(dh.clone());
        }
        chosen = chosen.add_transform(esn.clone());

        return Ok(ChosenEsp {
            proposal: chosen,
            encryption: EncryptionAlgorithm::from_transform(encr.transform_id, encr.key_length)?,
            integrity: integ
                .map(|t| IntegrityAlgorithm::from_transform_id(t.transform_id))
                .transpose()?,
            esn: esn.transform_id == EsnTransformId::Esn.to_u16(),
            spi,
        });
    }

    Err(Error::NoProposalChosen)
}
