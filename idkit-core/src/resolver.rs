//! Identity resolution.
//!
//! Maps identifiers to uids through the ledger and assembles identity
//! records by joining on-chain claim anchors with claim bodies from the
//! content store. Everything here is read-only against the collaborators;
//! the local cache is a read-through copy, never the source of truth.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::claim::{fold_statuses, ClaimEntry, IdentityRecord, SignedClaim};
use crate::content_store::ContentStore;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::types::{ContentId, Uid};

#[derive(Default)]
struct ResolverCache {
    /// Identifier lookups, including negative answers.
    uids: HashMap<String, Option<Uid>>,
    /// Complete records, keyed by uid and validated against the anchor list.
    records: HashMap<Uid, (Vec<ContentId>, IdentityRecord)>,
}

/// Read-through identity resolver over a ledger and a content store.
pub struct Resolver<L, S> {
    ledger: Arc<L>,
    store: Arc<S>,
    cache: Mutex<ResolverCache>,
}

impl<L: Ledger, S: ContentStore> Resolver<L, S> {
    pub(crate) fn new(ledger: Arc<L>, store: Arc<S>) -> Self {
        Self {
            ledger,
            store,
            cache: Mutex::new(ResolverCache::default()),
        }
    }

    fn cache(&self) -> MutexGuard<'_, ResolverCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops all cached lookups and records.
    pub fn clear_cache(&self) {
        let mut cache = self.cache();
        cache.uids.clear();
        cache.records.clear();
    }

    /// The uid bound to a human-readable identifier.
    ///
    /// Absence is a valid, cacheable answer (`Ok(None)`), not an error.
    ///
    /// # Errors
    /// [`Error::Ledger`] on transport failure; nothing is cached then.
    pub async fn resolve_uid(&self, identifier: &str) -> Result<Option<Uid>> {
        if let Some(hit) = self.cache().uids.get(identifier) {
            return Ok(*hit);
        }
        let uid = self.ledger.uid_for_identifier(identifier).await?;
        self.cache().uids.insert(identifier.to_owned(), uid);
        Ok(uid)
    }

    /// Assembles the identity record for a uid.
    ///
    /// Individual body-fetch failures degrade to [`ClaimEntry::Missing`]
    /// entries rather than failing the record; the record only fails with
    /// [`Error::Storage`] when every anchored body was unreachable.
    ///
    /// # Errors
    /// [`Error::Ledger`] when the anchor or key lookup fails,
    /// [`Error::Storage`] as above.
    pub async fn identity(&self, uid: Uid) -> Result<IdentityRecord> {
        let anchors = self.ledger.claim_anchors(uid).await?;

        if let Some((cached_anchors, record)) = self.cache().records.get(&uid) {
            if *cached_anchors == anchors {
                return Ok(record.clone());
            }
        }

        let keys = self.ledger.keys_of(uid).await?;
        let owner = keys.first().copied();
        let paperkeys = keys.get(1..).unwrap_or_default().to_vec();

        let mut entries = Vec::with_capacity(anchors.len());
        let mut resolved: Vec<SignedClaim> = Vec::new();
        let mut unreachable = 0usize;
        for anchor in &anchors {
            match self.fetch_claim(anchor).await {
                Ok(claim) => {
                    resolved.push(claim.clone());
                    entries.push(Ok(claim));
                }
                Err(FetchFailure { reason, transport }) => {
                    if transport {
                        unreachable += 1;
                    }
                    entries.push(Err(reason));
                }
            }
        }

        if !anchors.is_empty() && unreachable == anchors.len() {
            return Err(Error::Storage("no claim body could be fetched".into()));
        }

        let statuses = fold_statuses(&resolved.iter().collect::<Vec<_>>());
        let mut status_iter = statuses.into_iter();
        let claims: Vec<ClaimEntry> = entries
            .into_iter()
            .zip(&anchors)
            .map(|(entry, anchor)| match entry {
                Ok(claim) => ClaimEntry::Resolved {
                    anchor: *anchor,
                    claim,
                    status: status_iter.next().unwrap_or(crate::claim::ProofStatus::Pending),
                },
                Err(reason) => ClaimEntry::Missing {
                    anchor: *anchor,
                    reason,
                },
            })
            .collect();

        let record = IdentityRecord {
            uid,
            owner,
            paperkeys,
            claims,
        };

        if record.is_complete() {
            self.cache()
                .records
                .insert(uid, (anchors, record.clone()));
        } else {
            debug!(%uid, missing = record.missing_anchors().len(), "partial identity record");
        }
        Ok(record)
    }

    async fn fetch_claim(&self, anchor: &ContentId) -> core::result::Result<SignedClaim, FetchFailure> {
        let bytes = self
            .store
            .get(anchor)
            .await
            .map_err(|e| FetchFailure {
                reason: e.to_string(),
                transport: true,
            })?
            .ok_or_else(|| FetchFailure {
                reason: "document not found".into(),
                transport: false,
            })?;
        let claim = SignedClaim::from_document(&bytes).map_err(|e| FetchFailure {
            reason: e.to_string(),
            transport: false,
        })?;
        if !claim.verify() {
            return Err(FetchFailure {
                reason: "signature verification failed".into(),
                transport: false,
            });
        }
        Ok(claim)
    }
}

struct FetchFailure {
    reason: String,
    transport: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{ClaimBody, ProofStatus, UnsignedClaim};
    use crate::content_store::MemoryContentStore;
    use crate::ledger::MemoryLedger;
    use crate::service::{Service, ServiceKind};
    use idkit_keystore::DeviceKey;

    fn resolver(
        ledger: &MemoryLedger,
        store: &MemoryContentStore,
    ) -> Resolver<MemoryLedger, MemoryContentStore> {
        Resolver::new(Arc::new(ledger.clone()), Arc::new(store.clone()))
    }

    async fn anchor_ownership(
        ledger: &MemoryLedger,
        store: &MemoryContentStore,
        dk: &DeviceKey,
        uid: Uid,
        seqno: u32,
    ) -> ContentId {
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
        let signed = SignedClaim::sign(claim, dk).unwrap();
        let anchor = store.put(signed.to_document().unwrap()).await.unwrap();
        ledger
            .anchor_claim(&dk.account_id(), uid, anchor)
            .await
            .unwrap();
        anchor
    }

    #[tokio::test]
    async fn unknown_identifier_resolves_to_none_and_is_cached() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let resolver = resolver(&ledger, &store);

        assert_eq!(
            resolver.resolve_uid("nonexistent-handle").await.unwrap(),
            None
        );
        let calls = ledger.calls();
        assert_eq!(
            resolver.resolve_uid("nonexistent-handle").await.unwrap(),
            None
        );
        assert_eq!(ledger.calls(), calls, "second lookup served from cache");
    }

    #[tokio::test]
    async fn bound_identifier_resolves() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        ledger.bind_identifier("octocat@github", Uid::new(9));
        let resolver = resolver(&ledger, &store);
        assert_eq!(
            resolver.resolve_uid("octocat@github").await.unwrap(),
            Some(Uid::new(9))
        );
    }

    #[tokio::test]
    async fn offline_ledger_surfaces_ledger_error() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let resolver = resolver(&ledger, &store);
        ledger.set_offline(true);
        assert!(matches!(
            resolver.resolve_uid("any").await,
            Err(Error::Ledger(_))
        ));
    }

    #[tokio::test]
    async fn assembles_a_complete_record() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let dk = DeviceKey::generate();
        let uid = ledger.ensure_uid(&dk.account_id()).await.unwrap();
        anchor_ownership(&ledger, &store, &dk, uid, 1).await;

        let resolver = resolver(&ledger, &store);
        let record = resolver.identity(uid).await.unwrap();
        assert_eq!(record.uid, uid);
        assert_eq!(record.owner, Some(dk.account_id()));
        assert!(record.is_complete());
        assert_eq!(record.claims.len(), 1);
        assert!(matches!(
            record.claims[0],
            ClaimEntry::Resolved {
                status: ProofStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn complete_records_are_cached_until_anchors_change() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let dk = DeviceKey::generate();
        let uid = ledger.ensure_uid(&dk.account_id()).await.unwrap();
        anchor_ownership(&ledger, &store, &dk, uid, 1).await;

        let resolver = resolver(&ledger, &store);
        resolver.identity(uid).await.unwrap();
        let store_calls = store.calls();
        resolver.identity(uid).await.unwrap();
        assert_eq!(store.calls(), store_calls, "cached record skips the store");

        anchor_ownership(&ledger, &store, &dk, uid, 2).await;
        let record = resolver.identity(uid).await.unwrap();
        assert_eq!(record.claims.len(), 2);
    }

    #[tokio::test]
    async fn missing_body_degrades_to_partial_record() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let dk = DeviceKey::generate();
        let uid = ledger.ensure_uid(&dk.account_id()).await.unwrap();
        let kept = anchor_ownership(&ledger, &store, &dk, uid, 1).await;
        let evicted = anchor_ownership(&ledger, &store, &dk, uid, 2).await;
        store.evict(&evicted);

        let resolver = resolver(&ledger, &store);
        let record = resolver.identity(uid).await.unwrap();
        assert!(!record.is_complete());
        assert_eq!(record.missing_anchors(), vec![evicted]);
        assert_eq!(record.claims[0].anchor(), kept);
    }

    #[tokio::test]
    async fn unreachable_store_fails_with_storage_kind() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let dk = DeviceKey::generate();
        let uid = ledger.ensure_uid(&dk.account_id()).await.unwrap();
        anchor_ownership(&ledger, &store, &dk, uid, 1).await;
        store.set_offline(true);

        let resolver = resolver(&ledger, &store);
        assert!(matches!(
            resolver.identity(uid).await,
            Err(Error::Storage(_))
        ));
    }

    #[tokio::test]
    async fn unknown_uid_yields_an_empty_record() {
        let ledger = MemoryLedger::new();
        let store = MemoryContentStore::new();
        let resolver = resolver(&ledger, &store);
        let record = resolver.identity(Uid::new(404)).await.unwrap();
        assert_eq!(record.owner, None);
        assert!(record.claims.is_empty());
    }
}
