use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::device_key::{AccountId, DeviceKey, Provenance};
use crate::envelope::{self, Envelope, KdfParams};
use crate::error::{Error, Result};

const DEVICE_KEY_FILE: &str = "device_key.cbor";
const PAPERKEY_FILE: &str = "paperkeys.cbor";

/// A keystore password. Wraps [`SecretString`] so the plaintext is zeroized
/// on drop and never shows up in `Debug` output.
#[derive(Debug)]
pub struct Password(SecretString);

impl Clone for Password {
    fn clone(&self) -> Self {
        Self(SecretString::from(self.expose().to_owned()))
    }
}

impl Password {
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Byte length of the plaintext password.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self(SecretString::from(s))
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self(SecretString::from(s.to_owned()))
    }
}

/// Public metadata of the persisted device key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyStatus {
    pub account: AccountId,
    pub provenance: Provenance,
}

/// The on-disk keystore rooted at a base directory.
///
/// All methods are synchronous; async callers run them through their
/// runtime's blocking pool.
pub struct KeyStore {
    root: PathBuf,
    kdf: KdfParams,
}

impl KeyStore {
    /// Opens or creates the store rooted at `root`.
    ///
    /// # Errors
    /// Fails with [`Error::Open`] when the directory cannot be created or is
    /// not usable.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(root, KdfParams::default())
    }

    /// Opens the store with explicit KDF cost parameters.
    ///
    /// # Errors
    /// Same failure modes as [`KeyStore::open`].
    pub fn open_with(root: impl Into<PathBuf>, kdf: KdfParams) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::Open(format!("{}: {e}", root.display())))?;
        if !root.is_dir() {
            return Err(Error::Open(format!("{} is not a directory", root.display())));
        }
        debug!(root = %root.display(), "keystore opened");
        Ok(Self { root, kdf })
    }

    fn device_key_path(&self) -> PathBuf {
        self.root.join(DEVICE_KEY_FILE)
    }

    fn paperkey_path(&self) -> PathBuf {
        self.root.join(PAPERKEY_FILE)
    }

    /// Whether a device key is persisted. Never requires the password.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.device_key_path().is_file()
    }

    /// Public metadata of the persisted key, if any.
    ///
    /// # Errors
    /// Fails on filesystem faults or a corrupt envelope.
    pub fn status(&self) -> Result<Option<KeyStatus>> {
        if !self.is_initialized() {
            return Ok(None);
        }
        let env = self.read_envelope()?;
        Ok(Some(KeyStatus {
            account: env.account_id(),
            provenance: env.provenance(),
        }))
    }

    /// Encrypts `dk` under `password` and persists it.
    ///
    /// The write is atomic (write-then-rename), so a crash mid-operation
    /// never leaves a partial key on disk.
    ///
    /// # Errors
    /// Fails with [`Error::KeyExists`] when a key is already persisted.
    pub fn set_device_key(&self, dk: &DeviceKey, password: &Password) -> Result<AccountId> {
        if self.is_initialized() {
            return Err(Error::KeyExists);
        }
        let env = envelope::seal(dk, password.expose().as_bytes(), self.kdf)?;
        self.write_envelope(&env)?;
        debug!(account = %env.account_id(), "device key persisted");
        Ok(env.account_id())
    }

    /// Decrypts the persisted device key.
    ///
    /// # Errors
    /// [`Error::NoKey`] when nothing is persisted, [`Error::BadPassword`] on
    /// a wrong password. Persisted state is never mutated on failure.
    pub fn unlock(&self, password: &Password) -> Result<DeviceKey> {
        let env = self.read_envelope_required()?;
        envelope::open(&env, password.expose().as_bytes())
    }

    /// Re-encrypts the device key under a new password.
    ///
    /// # Errors
    /// [`Error::BadPassword`] when `old` does not verify; the previous
    /// envelope stays in place on any failure.
    pub fn change_password(&self, old: &Password, new: &Password) -> Result<()> {
        let env = self.read_envelope_required()?;
        let dk = envelope::open(&env, old.expose().as_bytes())?;
        let fresh = envelope::seal(&dk, new.expose().as_bytes(), self.kdf)?;
        self.write_envelope(&fresh)?;
        debug!("device key re-encrypted");
        Ok(())
    }

    /// Appends a paperkey fingerprint to the persisted list.
    ///
    /// Only the fingerprint is stored; the backup material itself is
    /// revealed to the caller once and never written.
    ///
    /// # Errors
    /// Fails on filesystem faults or a corrupt fingerprint file.
    pub fn add_paperkey_fingerprint(&self, fingerprint: AccountId) -> Result<()> {
        let mut list = self.paperkey_fingerprints()?;
        list.push(fingerprint);
        let mut bytes = Vec::new();
        ciborium::into_writer(&list, &mut bytes)
            .map_err(|e| Error::Corrupt(e.to_string()))?;
        write_atomic(&self.paperkey_path(), &bytes)?;
        Ok(())
    }

    /// The persisted paperkey fingerprints, oldest first.
    ///
    /// # Errors
    /// Fails on filesystem faults or a corrupt fingerprint file.
    pub fn paperkey_fingerprints(&self) -> Result<Vec<AccountId>> {
        let path = self.paperkey_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path)?;
        ciborium::from_reader(bytes.as_slice()).map_err(|e| Error::Corrupt(e.to_string()))
    }

    fn read_envelope_required(&self) -> Result<Envelope> {
        if !self.is_initialized() {
            return Err(Error::NoKey);
        }
        self.read_envelope()
    }

    fn read_envelope(&self) -> Result<Envelope> {
        let bytes = fs::read(self.device_key_path())?;
        ciborium::from_reader(bytes.as_slice()).map_err(|e| Error::Corrupt(e.to_string()))
    }

    fn write_envelope(&self, env: &Envelope) -> Result<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(env, &mut bytes).map_err(|e| Error::Corrupt(e.to_string()))?;
        write_atomic(&self.device_key_path(), &bytes)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
