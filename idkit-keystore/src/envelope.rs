//! The password-encrypted device-key envelope.
//!
//! The secret seed is encrypted with XChaCha20-Poly1305 under a key derived
//! from the password with Argon2id. The account id and derivation provenance
//! travel in the clear so the store can answer public queries without the
//! password, and both are bound into the AEAD associated data.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::device_key::{AccountId, DeviceKey, Provenance, SEED_LEN};
use crate::error::{Error, Result};

const ENVELOPE_VERSION: u16 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const AAD_LABEL: &[u8] = b"idkit/device-key/v1";

/// Argon2id cost parameters for the password KDF.
///
/// The defaults (64 MiB, 3 passes, 4 lanes) are tuned for interactive
/// password-based key encryption; tests use lighter settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub m_cost: u32,
    /// Iteration count.
    pub t_cost: u32,
    /// Parallelism lanes.
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 64 * 1024,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for test builds. Never use for real keys.
    #[must_use]
    pub const fn insecure_fast() -> Self {
        Self {
            m_cost: 1024,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub(crate) struct Envelope {
    version: u16,
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    public: AccountId,
    provenance: Provenance,
}

impl Envelope {
    pub(crate) const fn account_id(&self) -> AccountId {
        self.public
    }

    pub(crate) const fn provenance(&self) -> Provenance {
        self.provenance
    }
}

fn derive_key(password: &[u8], salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let params = Params::new(kdf.m_cost, kdf.t_cost, kdf.p_cost, Some(32))
        .map_err(|e| Error::Crypto(format!("invalid kdf params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password, salt, &mut key[..])
        .map_err(|e| Error::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

fn associated_data(public: &AccountId, provenance: Provenance) -> Vec<u8> {
    let mut aad = Vec::with_capacity(AAD_LABEL.len() + 33);
    aad.extend_from_slice(AAD_LABEL);
    aad.extend_from_slice(public.as_bytes());
    aad.push(provenance as u8);
    aad
}

/// Encrypts a device key under `password`.
pub(crate) fn seal(dk: &DeviceKey, password: &[u8], kdf: KdfParams) -> Result<Envelope> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt, kdf)?;
    let cipher =
        XChaCha20Poly1305::new_from_slice(&key[..]).expect("key length is always 32");

    let public = dk.account_id();
    let aad = associated_data(&public, dk.provenance());
    let seed = dk.seed();
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &seed[..],
                aad: &aad,
            },
        )
        .map_err(|_| Error::Crypto("envelope encryption failed".into()))?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        kdf,
        salt,
        nonce,
        ciphertext,
        public,
        provenance: dk.provenance(),
    })
}

/// Decrypts a device key from its envelope.
///
/// A wrong password surfaces as [`Error::BadPassword`]; the envelope itself
/// is never modified.
pub(crate) fn open(envelope: &Envelope, password: &[u8]) -> Result<DeviceKey> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(Error::Corrupt(format!(
            "unsupported envelope version {}",
            envelope.version
        )));
    }
    let key = derive_key(password, &envelope.salt, envelope.kdf)?;
    let cipher =
        XChaCha20Poly1305::new_from_slice(&key[..]).expect("key length is always 32");

    let aad = associated_data(&envelope.public, envelope.provenance);
    let plaintext = cipher
        .decrypt(
            XNonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| Error::BadPassword)?;
    let plaintext = Zeroizing::new(plaintext);

    let seed: &[u8; SEED_LEN] = plaintext
        .as_slice()
        .try_into()
        .map_err(|_| Error::Corrupt("envelope plaintext has wrong length".into()))?;
    let dk = DeviceKey::from_parts(seed, envelope.provenance);
    if dk.account_id() != envelope.public {
        return Err(Error::Corrupt("envelope public key mismatch".into()));
    }
    Ok(dk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let dk = DeviceKey::generate();
        let env = seal(&dk, b"hunter2!", KdfParams::insecure_fast()).unwrap();
        assert_eq!(env.account_id(), dk.account_id());

        let opened = open(&env, b"hunter2!").unwrap();
        assert_eq!(opened.account_id(), dk.account_id());
        assert_eq!(opened.provenance(), dk.provenance());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let dk = DeviceKey::generate();
        let env = seal(&dk, b"hunter2!", KdfParams::insecure_fast()).unwrap();
        assert!(matches!(open(&env, b"hunter3!"), Err(Error::BadPassword)));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let dk = DeviceKey::generate();
        let mut env = seal(&dk, b"hunter2!", KdfParams::insecure_fast()).unwrap();
        env.ciphertext[0] ^= 0xff;
        assert!(open(&env, b"hunter2!").is_err());
    }
}
