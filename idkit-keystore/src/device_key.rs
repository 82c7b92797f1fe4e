use core::fmt;
use std::str::FromStr;

use bip39::{Language, Mnemonic};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of the raw device-key seed in bytes.
pub const SEED_LEN: usize = 32;

/// The public identifier of a device key: the raw Ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses an account id from its hex rendering.
    ///
    /// # Errors
    /// Returns an error if the string is not exactly 32 bytes of hex.
    pub fn from_hex(s: &str) -> core::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self.to_hex())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for AccountId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// How the device key was derived. Persisted alongside the envelope so a
/// restored store still knows where its key came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// Fresh entropy from the OS RNG.
    Generated,
    /// Deterministic derivation from a seed URI (test/debug builds only).
    Suri,
    /// Restored from a recovery phrase.
    Mnemonic,
}

/// A deterministic derivation string for a keypair. Test and debug use only.
///
/// Accepted forms: a 32-byte hex seed (with or without `0x`), or a dev
/// junction of the form `//name` which is stretched through SHA-256.
#[derive(Clone)]
pub struct Suri(pub(crate) [u8; SEED_LEN]);

impl fmt::Debug for Suri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*****")
    }
}

/// The seed URI did not parse.
#[derive(Debug, Error)]
#[error("invalid seed uri")]
pub struct InvalidSuri;

impl FromStr for Suri {
    type Err = InvalidSuri;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("//") {
            if rest.is_empty() {
                return Err(InvalidSuri);
            }
            let mut hasher = Sha256::new();
            hasher.update(b"idkit/suri");
            hasher.update(s.as_bytes());
            return Ok(Self(hasher.finalize().into()));
        }
        let hex_part = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(hex_part).map_err(|_| InvalidSuri)?;
        let seed: [u8; SEED_LEN] = bytes.try_into().map_err(|_| InvalidSuri)?;
        Ok(Self(seed))
    }
}

/// A recovery phrase carried less than [`SEED_LEN`] bytes of entropy.
#[derive(Debug, Error)]
#[error("recovery phrase must provide at least 256 bits of entropy")]
pub struct NotEnoughEntropy;

/// The client's primary signing keypair.
///
/// The embedded signing key zeroizes itself on drop; `Debug` never prints
/// secret material.
#[derive(Clone)]
pub struct DeviceKey {
    signing: SigningKey,
    provenance: Provenance,
}

impl DeviceKey {
    /// Generates a fresh device key from OS entropy.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            provenance: Provenance::Generated,
        }
    }

    /// Derives a device key deterministically from a seed URI.
    #[must_use]
    pub fn from_suri(suri: &Suri) -> Self {
        Self {
            signing: SigningKey::from_bytes(&suri.0),
            provenance: Provenance::Suri,
        }
    }

    /// Restores a device key from a recovery phrase.
    ///
    /// # Errors
    /// Fails when the phrase encodes less than 256 bits of entropy (a
    /// 24-word phrase is required).
    pub fn from_mnemonic(mnemonic: &Mnemonic) -> core::result::Result<Self, NotEnoughEntropy> {
        let entropy = Zeroizing::new(mnemonic.to_entropy());
        if entropy.len() < SEED_LEN {
            return Err(NotEnoughEntropy);
        }
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        seed.copy_from_slice(&entropy[..SEED_LEN]);
        Ok(Self {
            signing: SigningKey::from_bytes(&seed),
            provenance: Provenance::Mnemonic,
        })
    }

    pub(crate) fn from_parts(seed: &[u8; SEED_LEN], provenance: Provenance) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
            provenance,
        }
    }

    /// The public identifier for this key.
    #[must_use]
    pub fn account_id(&self) -> AccountId {
        AccountId(self.signing.verifying_key().to_bytes())
    }

    #[must_use]
    pub const fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Signs a message with the device key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Verifies a signature against an account id.
    #[must_use]
    pub fn verify(account: &AccountId, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(account.as_bytes()) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(message, &sig).is_ok()
    }

    pub(crate) fn seed(&self) -> Zeroizing<[u8; SEED_LEN]> {
        Zeroizing::new(self.signing.to_bytes())
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceKey")
            .field("account", &self.account_id())
            .field("provenance", &self.provenance)
            .finish_non_exhaustive()
    }
}

/// Mints a fresh 24-word recovery phrase from OS entropy.
#[must_use]
pub fn generate_mnemonic() -> Mnemonic {
    let mut entropy = Zeroizing::new([0u8; SEED_LEN]);
    OsRng.fill_bytes(&mut entropy[..]);
    Mnemonic::from_entropy_in(Language::English, &entropy[..])
        .expect("32 bytes is a valid entropy length")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suri_parses_hex_and_junctions() {
        let hex: Suri = "0x0000000000000000000000000000000000000000000000000000000000000001"
            .parse()
            .unwrap();
        assert_eq!(hex.0[31], 1);

        let a: Suri = "//alice".parse().unwrap();
        let b: Suri = "//alice".parse().unwrap();
        let c: Suri = "//bob".parse().unwrap();
        assert_eq!(a.0, b.0);
        assert_ne!(a.0, c.0);

        assert!("".parse::<Suri>().is_err());
        assert!("//".parse::<Suri>().is_err());
        assert!("not hex".parse::<Suri>().is_err());
    }

    #[test]
    fn mnemonic_roundtrip_is_deterministic() {
        let mnemonic = generate_mnemonic();
        let a = DeviceKey::from_mnemonic(&mnemonic).unwrap();
        let b = DeviceKey::from_mnemonic(&mnemonic).unwrap();
        assert_eq!(a.account_id(), b.account_id());
        assert_eq!(a.provenance(), Provenance::Mnemonic);
    }

    #[test]
    fn short_phrase_is_rejected() {
        let twelve = Mnemonic::from_entropy_in(Language::English, &[7u8; 16]).unwrap();
        assert!(DeviceKey::from_mnemonic(&twelve).is_err());
    }

    #[test]
    fn signatures_verify() {
        let dk = DeviceKey::generate();
        let sig = dk.sign(b"challenge");
        assert!(DeviceKey::verify(&dk.account_id(), b"challenge", &sig));
        assert!(!DeviceKey::verify(&dk.account_id(), b"other", &sig));
    }
}
