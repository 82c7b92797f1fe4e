//! Encrypted on-device storage for the idkit device key.
//!
//! The keystore persists a single Ed25519 device key, encrypted under a
//! password-derived key. The plaintext secret only ever exists in memory,
//! between a successful [`KeyStore::unlock`] and the moment the caller drops
//! it; the store itself holds ciphertext and public metadata only.

pub use bip39;

mod device_key;
mod envelope;
mod error;
mod store;

pub use device_key::{
    generate_mnemonic, AccountId, DeviceKey, InvalidSuri, NotEnoughEntropy, Provenance, Suri,
    SEED_LEN,
};
pub use envelope::KdfParams;
pub use error::{Error, Result};
pub use store::{KeyStatus, KeyStore, Password};
