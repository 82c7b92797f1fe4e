//! The ledger collaborator interface.
//!
//! The ledger owns the authoritative identifier→uid bindings, the key
//! registry per identity, and the ordered list of claim anchors. The core
//! never mutates ledger state except through [`Ledger::register_key`] and
//! [`Ledger::anchor_claim`], and never retries a failed call; retry policy
//! belongs to the collaborator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use idkit_keystore::AccountId;

use crate::error::{Error, Result};
use crate::types::{ContentId, Uid};

/// Abstract chain/ledger client.
///
/// Implementations are free to time out; a timeout surfaces as
/// [`Error::Ledger`] and is never retried by the core.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// The uid bound to a human-readable identifier, if any. Absence is a
    /// valid answer, not an error.
    async fn uid_for_identifier(&self, identifier: &str) -> Result<Option<Uid>>;

    /// The uid an account key is registered under, if any.
    async fn uid_for_account(&self, account: &AccountId) -> Result<Option<Uid>>;

    /// The uid for an account, minting a fresh identity binding when none
    /// exists yet.
    async fn ensure_uid(&self, account: &AccountId) -> Result<Uid>;

    /// All keys registered under a uid: the device key first, then paperkey
    /// fingerprints in registration order.
    async fn keys_of(&self, uid: Uid) -> Result<Vec<AccountId>>;

    /// Registers an additional key (a paperkey fingerprint) under a uid.
    async fn register_key(&self, uid: Uid, key: AccountId) -> Result<()>;

    /// The ordered claim anchors for a uid, oldest first.
    async fn claim_anchors(&self, uid: Uid) -> Result<Vec<ContentId>>;

    /// Appends a claim anchor for the identity owned by `account`.
    async fn anchor_claim(&self, account: &AccountId, uid: Uid, anchor: ContentId) -> Result<()>;
}

#[derive(Default)]
struct LedgerState {
    identifiers: HashMap<String, Uid>,
    accounts: HashMap<AccountId, Uid>,
    keys: HashMap<Uid, Vec<AccountId>>,
    anchors: HashMap<Uid, Vec<ContentId>>,
}

/// In-memory ledger for tests and embedded hosts.
///
/// Tracks how many calls it has served so tests can assert that illegal
/// operations never reach the network, and can be switched offline to
/// exercise transport-fault paths.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    inner: Arc<MemoryLedgerInner>,
}

#[derive(Default)]
struct MemoryLedgerInner {
    state: Mutex<LedgerState>,
    next_uid: AtomicU64,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a human-readable identifier to a uid.
    pub fn bind_identifier(&self, identifier: &str, uid: Uid) {
        self.lock().identifiers.insert(identifier.to_owned(), uid);
    }

    /// Number of calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Simulates a transport outage; every call fails with [`Error::Ledger`]
    /// while set.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> Result<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Ledger("ledger unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn uid_for_identifier(&self, identifier: &str) -> Result<Option<Uid>> {
        self.tick()?;
        Ok(self.lock().identifiers.get(identifier).copied())
    }

    async fn uid_for_account(&self, account: &AccountId) -> Result<Option<Uid>> {
        self.tick()?;
        Ok(self.lock().accounts.get(account).copied())
    }

    async fn ensure_uid(&self, account: &AccountId) -> Result<Uid> {
        self.tick()?;
        let mut state = self.lock();
        if let Some(uid) = state.accounts.get(account) {
            return Ok(*uid);
        }
        let uid = Uid::new(self.inner.next_uid.fetch_add(1, Ordering::SeqCst) + 1);
        state.accounts.insert(*account, uid);
        state.keys.insert(uid, vec![*account]);
        Ok(uid)
    }

    async fn keys_of(&self, uid: Uid) -> Result<Vec<AccountId>> {
        self.tick()?;
        Ok(self.lock().keys.get(&uid).cloned().unwrap_or_default())
    }

    async fn register_key(&self, uid: Uid, key: AccountId) -> Result<()> {
        self.tick()?;
        let mut state = self.lock();
        let keys = state.keys.entry(uid).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
        state.accounts.entry(key).or_insert(uid);
        Ok(())
    }

    async fn claim_anchors(&self, uid: Uid) -> Result<Vec<ContentId>> {
        self.tick()?;
        Ok(self.lock().anchors.get(&uid).cloned().unwrap_or_default())
    }

    async fn anchor_claim(&self, account: &AccountId, uid: Uid, anchor: ContentId) -> Result<()> {
        self.tick()?;
        let mut state = self.lock();
        let registered = state
            .keys
            .get(&uid)
            .is_some_and(|keys| keys.contains(account));
        if !registered {
            return Err(Error::Ledger(format!(
                "account {account} is not registered under uid {uid}"
            )));
        }
        state.anchors.entry(uid).or_default().push(anchor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idkit_keystore::DeviceKey;

    #[tokio::test]
    async fn ensure_uid_is_idempotent() {
        let ledger = MemoryLedger::new();
        let account = DeviceKey::generate().account_id();
        let a = ledger.ensure_uid(&account).await.unwrap();
        let b = ledger.ensure_uid(&account).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(ledger.keys_of(a).await.unwrap(), vec![account]);
    }

    #[tokio::test]
    async fn offline_ledger_fails_with_ledger_kind() {
        let ledger = MemoryLedger::new();
        ledger.set_offline(true);
        let err = ledger.uid_for_identifier("any").await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        assert_eq!(ledger.calls(), 1);
    }

    #[tokio::test]
    async fn anchoring_requires_a_registered_key() {
        let ledger = MemoryLedger::new();
        let account = DeviceKey::generate().account_id();
        let stranger = DeviceKey::generate().account_id();
        let uid = ledger.ensure_uid(&account).await.unwrap();

        let anchor = ContentId::of(b"claim");
        assert!(ledger.anchor_claim(&stranger, uid, anchor).await.is_err());
        ledger.anchor_claim(&account, uid, anchor).await.unwrap();
        assert_eq!(ledger.claim_anchors(uid).await.unwrap(), vec![anchor]);
    }
}
