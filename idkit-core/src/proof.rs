//! The proof service: binds the device key to external-service identities.
//!
//! Proof submission is fire-and-confirm: a call succeeds once the ledger
//! accepts the anchor. Whether the user actually publishes the proof where
//! the external service can see it is verified out of band and never polled
//! here.

use std::sync::Arc;

use tracing::info;

use idkit_keystore::{bip39::Mnemonic, generate_mnemonic, AccountId, DeviceKey};

use crate::claim::{fold_statuses, ClaimBody, ProofStatus, SignedClaim, UnsignedClaim};
use crate::content_store::ContentStore;
use crate::error::{Error, Result};
use crate::github;
use crate::ledger::Ledger;
use crate::service::{Service, ServiceKind};
use crate::types::Uid;

pub(crate) struct ProofService<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
}

impl<L: Ledger, S: ContentStore> ProofService<L, S> {
    pub(crate) const fn new(ledger: Arc<L>, store: Arc<S>) -> Self {
        Self { ledger, store }
    }

    /// Anchors a signed ownership claim and returns the publishable proof
    /// document.
    pub(crate) async fn prove(&self, dk: &DeviceKey, service: Service) -> Result<String> {
        let account = dk.account_id();
        let uid = self.ledger.ensure_uid(&account).await?;
        let signed = self
            .append_claim(dk, uid, ClaimBody::Ownership(service.clone()))
            .await?;
        info!(%uid, %service, "ownership claim anchored");

        match service.kind {
            ServiceKind::Github => github::proof_document(&signed, &service.username),
        }
    }

    /// Anchors a revocation of the newest active ownership claim for
    /// `service`. A service with nothing to revoke is a no-op success.
    pub(crate) async fn revoke(&self, dk: &DeviceKey, service: Service) -> Result<()> {
        let account = dk.account_id();
        let Some(uid) = self.ledger.uid_for_account(&account).await? else {
            return Ok(());
        };

        let claims = self.fetch_chain(uid).await?;
        let statuses = fold_statuses(&claims.iter().collect::<Vec<_>>());
        let target = claims
            .iter()
            .zip(&statuses)
            .rev()
            .find(|(claim, status)| {
                **status != ProofStatus::Rejected
                    && matches!(&claim.claim.body, ClaimBody::Ownership(s) if *s == service)
            })
            .map(|(claim, _)| claim.claim.seqno);

        if let Some(seqno) = target {
            self.append_claim(dk, uid, ClaimBody::Revoke(seqno)).await?;
            info!(%uid, %service, seqno, "ownership claim revoked");
        }
        Ok(())
    }

    /// Mints independent backup recovery material and registers its
    /// fingerprint under the account's identity.
    ///
    /// The phrase is returned exactly once; only the fingerprint survives.
    pub(crate) async fn issue_paperkey(&self, dk: &DeviceKey) -> Result<(Mnemonic, AccountId)> {
        let account = dk.account_id();
        let uid = self
            .ledger
            .uid_for_account(&account)
            .await?
            .ok_or_else(|| Error::BadUid("account has no ledger identity".into()))?;
        let keys = self.ledger.keys_of(uid).await?;
        if !keys.contains(&account) {
            return Err(Error::BadUid(format!(
                "ledger key registry for uid {uid} does not list this device"
            )));
        }

        let mnemonic = generate_mnemonic();
        let paper =
            DeviceKey::from_mnemonic(&mnemonic).map_err(|e| Error::Unknown(e.to_string()))?;
        let fingerprint = paper.account_id();
        self.ledger.register_key(uid, fingerprint).await?;
        info!(%uid, %fingerprint, "paperkey fingerprint registered");
        Ok((mnemonic, fingerprint))
    }

    async fn append_claim(
        &self,
        dk: &DeviceKey,
        uid: Uid,
        body: ClaimBody,
    ) -> Result<SignedClaim> {
        let account = dk.account_id();
        let anchors = self.ledger.claim_anchors(uid).await?;
        let seqno = u32::try_from(anchors.len())
            .map_err(|_| Error::Ledger("claim chain overflow".into()))?
            + 1;
        let unsigned = UnsignedClaim::new(uid, &account, anchors.last().copied(), seqno, body);
        let signed = SignedClaim::sign(unsigned, dk)?;
        let anchor = self.store.put(signed.to_document()?).await?;
        self.ledger.anchor_claim(&account, uid, anchor).await?;
        Ok(signed)
    }

    /// Fetches the full claim chain strictly; revocation needs every body.
    async fn fetch_chain(&self, uid: Uid) -> Result<Vec<SignedClaim>> {
        let anchors = self.ledger.claim_anchors(uid).await?;
        let mut claims = Vec::with_capacity(anchors.len());
        for anchor in anchors {
            let bytes = self
                .store
                .get(&anchor)
                .await?
                .ok_or_else(|| Error::Storage(format!("claim body {anchor} not found")))?;
            claims.push(SignedClaim::from_document(&bytes)?);
        }
        Ok(claims)
    }
}
