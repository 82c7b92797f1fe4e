//! The client context: one device key, one lifecycle, one resolver.
//!
//! All key-state mutations (`set_key`, `lock`, `unlock`, `change_password`)
//! serialize on a single mutation mutex, so a mutation never observes a
//! half-applied prior mutation. Read-only queries take no part in that
//! mutex; they see the lifecycle's brief in-memory critical section only and
//! are never blocked by a mutation's disk or network phase.

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task;
use tracing::debug;

use idkit_keystore::{
    bip39::{Language, Mnemonic},
    AccountId, DeviceKey, KeyStore, Password, Suri,
};

use crate::claim::IdentityRecord;
use crate::content_store::ContentStore;
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::lifecycle::{Lifecycle, LockState};
use crate::proof::ProofService;
use crate::resolver::Resolver;
use crate::service::Service;
use crate::types::Uid;

/// Minimum password length in bytes.
pub const MIN_PASSWORD_LEN: usize = 8;

/// A fully constructed identity client.
///
/// Constructed by the dispatcher's `init` (or directly by embedded hosts);
/// exactly one device key per instance.
pub struct Client<L, S> {
    keystore: Arc<KeyStore>,
    lifecycle: Lifecycle,
    resolver: Resolver<L, S>,
    proofs: ProofService<L, S>,
    mutation: Mutex<()>,
}

impl<L: Ledger, S: ContentStore> Client<L, S> {
    /// Assembles a client over an opened keystore and connected
    /// collaborators.
    #[must_use]
    pub fn new(keystore: KeyStore, ledger: L, store: S) -> Self {
        let has_key = keystore.is_initialized();
        let ledger = Arc::new(ledger);
        let store = Arc::new(store);
        Self {
            keystore: Arc::new(keystore),
            lifecycle: Lifecycle::new(has_key),
            resolver: Resolver::new(Arc::clone(&ledger), Arc::clone(&store)),
            proofs: ProofService::new(ledger, store),
            mutation: Mutex::new(()),
        }
    }

    /// The identity resolver.
    pub const fn resolver(&self) -> &Resolver<L, S> {
        &self.resolver
    }

    /// Whether a device key exists. Never requires unlocking.
    #[must_use]
    pub fn has_device_key(&self) -> bool {
        self.lifecycle.has_device_key()
    }

    /// Current lock state, for hosts that surface it.
    #[must_use]
    pub fn lock_state(&self) -> LockState {
        self.lifecycle.lock_state()
    }

    /// Sets the device key if none exists.
    ///
    /// Derivation: `suri` wins when supplied (test/debug path), then
    /// `phrase` restores a backup, otherwise fresh entropy. The password is
    /// validated before any key material is derived, so nothing partial is
    /// ever written.
    ///
    /// # Errors
    /// `HasDeviceKey`, `PasswordTooShort`, `BadSuri`, `BadMnemonic`, or a
    /// keystore fault.
    pub async fn set_key(
        &self,
        suri: Option<&str>,
        password: Password,
        phrase: Option<&str>,
    ) -> Result<AccountId> {
        let _guard = self.mutation.lock().await;
        self.lifecycle.require_no_key()?;
        if password.len() < MIN_PASSWORD_LEN {
            return Err(Error::PasswordTooShort);
        }

        let dk = if let Some(suri) = suri {
            let suri = Suri::from_str(suri).map_err(|_| Error::BadSuri)?;
            DeviceKey::from_suri(&suri)
        } else if let Some(phrase) = phrase {
            let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
                .map_err(|_| Error::BadMnemonic)?;
            DeviceKey::from_mnemonic(&mnemonic).map_err(|_| Error::BadMnemonic)?
        } else {
            DeviceKey::generate()
        };

        let keystore = Arc::clone(&self.keystore);
        let (dk, account) = task::spawn_blocking(move || {
            let account = keystore.set_device_key(&dk, &password)?;
            Ok::<_, Error>((dk, account))
        })
        .await
        .map_err(|e| Error::Unknown(e.to_string()))??;

        self.lifecycle.set_unlocked(dk);
        debug!(%account, "device key set");
        Ok(account)
    }

    /// Discards the decrypted secret. A no-op success when already locked.
    ///
    /// # Errors
    /// `NoDeviceKey` when no key is set; `FailToLock` is reserved for
    /// keystore flush faults.
    pub async fn lock(&self) -> Result<()> {
        let _guard = self.mutation.lock().await;
        self.lifecycle.lock()
    }

    /// Decrypts the persisted secret with `password`.
    ///
    /// # Errors
    /// `FailToUnlock` on a wrong password; persisted state is never mutated
    /// on failure.
    pub async fn unlock(&self, password: Password) -> Result<()> {
        let _guard = self.mutation.lock().await;
        if !self.lifecycle.has_device_key() {
            return Err(Error::NoDeviceKey);
        }
        let keystore = Arc::clone(&self.keystore);
        let dk = task::spawn_blocking(move || keystore.unlock(&password))
            .await
            .map_err(|e| Error::Unknown(e.to_string()))??;
        self.lifecycle.set_unlocked(dk);
        Ok(())
    }

    /// Re-encrypts the device key under a new password.
    ///
    /// # Errors
    /// `PasswordTooShort` for the new password, `FailToUnlock` when the old
    /// one does not verify.
    pub async fn change_password(&self, old: Password, new: Password) -> Result<()> {
        let _guard = self.mutation.lock().await;
        if !self.lifecycle.has_device_key() {
            return Err(Error::NoDeviceKey);
        }
        if new.len() < MIN_PASSWORD_LEN {
            return Err(Error::PasswordTooShort);
        }
        let keystore = Arc::clone(&self.keystore);
        task::spawn_blocking(move || keystore.change_password(&old, &new))
            .await
            .map_err(|e| Error::Unknown(e.to_string()))??;
        Ok(())
    }

    /// The account id of the current signer.
    ///
    /// Pure local query; fails per the lifecycle instead of performing any
    /// lookup.
    ///
    /// # Errors
    /// `NoDeviceKey` or `KeyLocked`.
    pub fn signer_account_id(&self) -> Result<AccountId> {
        Ok(self.lifecycle.signing_key()?.account_id())
    }

    /// Alias for [`Client::signer_account_id`]; both boundary generations
    /// expose the query under both names.
    ///
    /// # Errors
    /// Same as [`Client::signer_account_id`].
    pub fn account_id(&self) -> Result<AccountId> {
        self.signer_account_id()
    }

    /// Mints backup recovery material and returns the phrase. One-shot: the
    /// client keeps only the fingerprint.
    ///
    /// # Errors
    /// `KeyLocked`/`NoDeviceKey` per the lifecycle, `BadUid` on a ledger
    /// registry inconsistency.
    pub async fn add_paperkey(&self) -> Result<String> {
        let dk = self.lifecycle.signing_key()?;
        let (mnemonic, fingerprint) = self.proofs.issue_paperkey(&dk).await?;

        let keystore = Arc::clone(&self.keystore);
        task::spawn_blocking(move || keystore.add_paperkey_fingerprint(fingerprint))
            .await
            .map_err(|e| Error::Unknown(e.to_string()))??;

        // the key registry changed; cached records are stale
        self.resolver.clear_cache();
        Ok(mnemonic.to_string())
    }

    /// See [`Resolver::resolve_uid`].
    ///
    /// # Errors
    /// [`Error::Ledger`] on transport failure.
    pub async fn resolve_uid(&self, identifier: &str) -> Result<Option<Uid>> {
        self.resolver.resolve_uid(identifier).await
    }

    /// Assembles the identity record for a uid given in its boundary string
    /// form. Validation is purely syntactic and happens before any network
    /// call.
    ///
    /// # Errors
    /// `BadUid`, `Ledger`, or `Storage`.
    pub async fn identity(&self, uid: &str) -> Result<IdentityRecord> {
        let uid = Uid::from_str(uid)?;
        self.resolver.identity(uid).await
    }

    /// Proves ownership of an external-service identity.
    ///
    /// The lifecycle check precedes everything; a locked client performs no
    /// network call.
    ///
    /// # Errors
    /// `UnknownService`, `KeyLocked`/`NoDeviceKey`, `Ledger`, or `Storage`.
    pub async fn prove_identity(&self, service_tag: i32, external_id: &str) -> Result<String> {
        let service = Service::from_tag(service_tag, external_id)?;
        let dk = self.lifecycle.signing_key()?;
        self.proofs.prove(&dk, service).await
    }

    /// Revokes the newest active ownership claim for a service.
    ///
    /// # Errors
    /// Same failure set as [`Client::prove_identity`].
    pub async fn revoke_identity(&self, service_tag: i32, external_id: &str) -> Result<()> {
        let service = Service::from_tag(service_tag, external_id)?;
        let dk = self.lifecycle.signing_key()?;
        self.proofs.revoke(&dk, service).await
    }
}
