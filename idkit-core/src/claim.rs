//! Claims and identity records.
//!
//! A claim is a statement an identity makes about itself — ownership of an
//! external-service id, or revocation of an earlier claim. Claims form a
//! chain: each one names its predecessor's content id and the next sequence
//! number. Bodies live in the content store; anchors live on the ledger.

use std::time::{Duration, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use idkit_keystore::{AccountId, DeviceKey};

use crate::error::{Error, Result};
use crate::service::Service;
use crate::types::{ContentId, Uid};

/// What a claim asserts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimBody {
    /// The identity owns an external-service id.
    Ownership(Service),
    /// The ownership claim with this sequence number is revoked.
    Revoke(u32),
}

/// The signed portion of a claim. Canonical CBOR of this struct is the
/// signing challenge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedClaim {
    /// The identity making the claim.
    pub uid: Uid,
    /// Hex of the signing key's account id.
    pub public: String,
    /// The previous claim in the chain.
    pub prev: Option<ContentId>,
    /// 1-based position in the chain.
    pub seqno: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub ctime: u64,
    /// Validity window in milliseconds from `ctime`.
    pub expire_in: u64,
    pub body: ClaimBody,
}

impl UnsignedClaim {
    /// Builds a claim stamped with the current time and no expiry.
    #[must_use]
    pub fn new(
        uid: Uid,
        account: &AccountId,
        prev: Option<ContentId>,
        seqno: u32,
        body: ClaimBody,
    ) -> Self {
        let ctime = UNIX_EPOCH
            .elapsed()
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        Self {
            uid,
            public: account.to_hex(),
            prev,
            seqno,
            ctime,
            expire_in: u64::MAX,
            body,
        }
    }

    #[must_use]
    pub fn expired(&self) -> bool {
        let expires_at = Duration::from_millis(self.ctime.saturating_add(self.expire_in));
        UNIX_EPOCH.elapsed().map_or(false, |now| now > expires_at)
    }

    /// Canonical signing bytes: the CBOR encoding of this struct.
    ///
    /// # Errors
    /// Serialization failure is unexpected and surfaces as [`Error::Unknown`].
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| Error::Unknown(e.to_string()))?;
        Ok(bytes)
    }
}

/// A claim plus the signature over its canonical bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedClaim {
    pub claim: UnsignedClaim,
    pub signature: Vec<u8>,
}

impl SignedClaim {
    /// Signs `claim` with the device key.
    ///
    /// # Errors
    /// Fails only if the claim cannot be canonically encoded.
    pub fn sign(claim: UnsignedClaim, dk: &DeviceKey) -> Result<Self> {
        let bytes = claim.canonical_bytes()?;
        let signature = dk.sign(&bytes).to_vec();
        Ok(Self { claim, signature })
    }

    /// Whether the signature verifies against the embedded public key.
    #[must_use]
    pub fn verify(&self) -> bool {
        let Ok(account) = AccountId::from_hex(&self.claim.public) else {
            return false;
        };
        let Ok(bytes) = self.claim.canonical_bytes() else {
            return false;
        };
        DeviceKey::verify(&account, &bytes, &self.signature)
    }

    /// Encodes the claim as a content-store document.
    ///
    /// # Errors
    /// Serialization failure surfaces as [`Error::Unknown`].
    pub fn to_document(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| Error::Unknown(e.to_string()))?;
        Ok(bytes)
    }

    /// Decodes a claim from a content-store document.
    ///
    /// # Errors
    /// Fails with [`Error::Storage`] when the document is not a claim.
    pub fn from_document(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| Error::Storage(format!("bad claim body: {e}")))
    }
}

/// Submission status of a proof claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofStatus {
    /// Anchored; external verification has not been observed.
    Pending,
    /// External verification observed out of band.
    Accepted,
    /// Revoked or expired.
    Rejected,
}

/// One entry of an assembled identity record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimEntry {
    /// The body was fetched and its signature verified.
    Resolved {
        anchor: ContentId,
        claim: SignedClaim,
        status: ProofStatus,
    },
    /// The body could not be fetched; the anchor is kept so the caller can
    /// retry just this entry.
    Missing { anchor: ContentId, reason: String },
}

impl ClaimEntry {
    #[must_use]
    pub const fn anchor(&self) -> ContentId {
        match self {
            Self::Resolved { anchor, .. } | Self::Missing { anchor, .. } => *anchor,
        }
    }

    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// The assembled view of an identity.
///
/// The authoritative copy lives on the ledger and in the content store; this
/// is a read-through snapshot, never the source of truth.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub uid: Uid,
    /// The identity's device key, if any key is registered.
    pub owner: Option<AccountId>,
    /// Registered paperkey fingerprints, oldest first.
    pub paperkeys: Vec<AccountId>,
    /// Claim entries in chain order.
    pub claims: Vec<ClaimEntry>,
}

impl IdentityRecord {
    /// Whether every anchored body was fetched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.claims.iter().any(ClaimEntry::is_missing)
    }

    /// Anchors whose bodies are missing, for targeted retry.
    #[must_use]
    pub fn missing_anchors(&self) -> Vec<ContentId> {
        self.claims
            .iter()
            .filter(|entry| entry.is_missing())
            .map(ClaimEntry::anchor)
            .collect()
    }

    /// The newest non-rejected ownership claim for a service, if any.
    #[must_use]
    pub fn active_ownership(&self, service: &Service) -> Option<&SignedClaim> {
        self.claims.iter().rev().find_map(|entry| match entry {
            ClaimEntry::Resolved { claim, status, .. }
                if *status != ProofStatus::Rejected
                    && matches!(&claim.claim.body, ClaimBody::Ownership(s) if s == service) =>
            {
                Some(claim)
            }
            _ => None,
        })
    }
}

/// Folds revocations and expiry into per-claim statuses.
///
/// Input is the resolved claims in chain order; the output status vector is
/// index-aligned. Only locally decidable facts are folded: `Accepted` is
/// never produced here, it requires out-of-band verification.
pub(crate) fn fold_statuses(resolved: &[&SignedClaim]) -> Vec<ProofStatus> {
    let mut statuses: Vec<ProofStatus> = resolved
        .iter()
        .map(|signed| {
            if matches!(signed.claim.body, ClaimBody::Ownership(_)) && signed.claim.expired() {
                ProofStatus::Rejected
            } else {
                ProofStatus::Pending
            }
        })
        .collect();

    for signed in resolved {
        if let ClaimBody::Revoke(seqno) = signed.claim.body {
            for (i, target) in resolved.iter().enumerate() {
                if target.claim.seqno == seqno
                    && matches!(target.claim.body, ClaimBody::Ownership(_))
                {
                    statuses[i] = ProofStatus::Rejected;
                }
            }
        }
    }
    statuses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceKind;

    fn ownership(dk: &DeviceKey, uid: Uid, seqno: u32) -> SignedClaim {
        let claim = UnsignedClaim::new(
            uid,
            &dk.account_id(),
            None,
            seqno,
            ClaimBody::Ownership(Service {
                kind: ServiceKind::Github,
                username: "octocat".into(),
            }),
        );
        SignedClaim::sign(claim, dk).unwrap()
    }

    #[test]
    fn signed_claims_verify_and_roundtrip() {
        let dk = DeviceKey::generate();
        let signed = ownership(&dk, Uid::new(1), 1);
        assert!(signed.verify());

        let document = signed.to_document().unwrap();
        let decoded = SignedClaim::from_document(&document).unwrap();
        assert_eq!(decoded, signed);
        assert!(decoded.verify());
    }

    #[test]
    fn foreign_signature_fails_verification() {
        let dk = DeviceKey::generate();
        let other = DeviceKey::generate();
        let mut signed = ownership(&dk, Uid::new(1), 1);
        signed.signature = other.sign(&signed.claim.canonical_bytes().unwrap()).to_vec();
        assert!(!signed.verify());
    }

    #[test]
    fn revocation_rejects_the_targeted_claim() {
        let dk = DeviceKey::generate();
        let uid = Uid::new(1);
        let own = ownership(&dk, uid, 1);
        let revoke = SignedClaim::sign(
            UnsignedClaim::new(uid, &dk.account_id(), None, 2, ClaimBody::Revoke(1)),
            &dk,
        )
        .unwrap();

        let statuses = fold_statuses(&[&own, &revoke]);
        assert_eq!(statuses[0], ProofStatus::Rejected);
        assert_eq!(statuses[1], ProofStatus::Pending);
    }

    #[test]
    fn unrevoked_claims_stay_pending() {
        let dk = DeviceKey::generate();
        let own = ownership(&dk, Uid::new(1), 1);
        assert_eq!(fold_statuses(&[&own]), vec![ProofStatus::Pending]);
    }
}
