//! The key lifecycle state machine.
//!
//! Single authority for "is this operation legal right now". Every entry
//! point consults it before touching storage or network collaborators, so an
//! illegal call never causes a side effect. The decrypted device key lives
//! exclusively inside this machine: it enters on unlock, is handed to signing
//! logic as a short-lived clone, and is dropped (zeroizing the seed) on lock.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use idkit_keystore::DeviceKey;

use crate::error::{Error, Result};

/// Observable lock state of the device key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockState {
    /// No device key has been set.
    NoKey,
    /// A key exists; the secret is not in memory.
    Locked,
    /// A key exists and the secret is decrypted in memory.
    Unlocked,
}

enum KeyState {
    NoKey,
    Locked,
    Unlocked(DeviceKey),
}

/// Tracks the device key's lock state for one client context.
pub struct Lifecycle {
    state: RwLock<KeyState>,
}

impl Lifecycle {
    /// A fresh lifecycle. A persisted key always starts locked.
    #[must_use]
    pub fn new(has_key: bool) -> Self {
        let state = if has_key {
            KeyState::Locked
        } else {
            KeyState::NoKey
        };
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, KeyState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, KeyState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pure query; never requires unlocking.
    #[must_use]
    pub fn has_device_key(&self) -> bool {
        !matches!(*self.read(), KeyState::NoKey)
    }

    #[must_use]
    pub fn lock_state(&self) -> LockState {
        match *self.read() {
            KeyState::NoKey => LockState::NoKey,
            KeyState::Locked => LockState::Locked,
            KeyState::Unlocked(_) => LockState::Unlocked,
        }
    }

    /// A clone of the decrypted device key for signing logic.
    ///
    /// # Errors
    /// [`Error::NoDeviceKey`] when no key is set, [`Error::KeyLocked`] when
    /// the key is locked.
    pub fn signing_key(&self) -> Result<DeviceKey> {
        match &*self.read() {
            KeyState::NoKey => Err(Error::NoDeviceKey),
            KeyState::Locked => Err(Error::KeyLocked),
            KeyState::Unlocked(dk) => Ok(dk.clone()),
        }
    }

    /// Fails fast when a key already exists; gates `set_key`.
    pub fn require_no_key(&self) -> Result<()> {
        if self.has_device_key() {
            return Err(Error::HasDeviceKey);
        }
        Ok(())
    }

    /// Installs a freshly set or unlocked key.
    pub(crate) fn set_unlocked(&self, dk: DeviceKey) {
        *self.write() = KeyState::Unlocked(dk);
    }

    /// Discards the decrypted secret. Safe to call when already locked.
    ///
    /// # Errors
    /// [`Error::NoDeviceKey`] when no key has been set.
    pub(crate) fn lock(&self) -> Result<()> {
        let mut state = self.write();
        match *state {
            KeyState::NoKey => Err(Error::NoDeviceKey),
            // Dropping the old state zeroizes the seed.
            KeyState::Locked | KeyState::Unlocked(_) => {
                *state = KeyState::Locked;
                Ok(())
            }
        }
    }
}
