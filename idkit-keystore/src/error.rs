use thiserror::Error;

/// Result type for keystore operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by the on-disk keystore.
#[derive(Debug, Error)]
pub enum Error {
    /// The store root could not be opened or created.
    #[error("failed to open keystore: {0}")]
    Open(String),

    /// Filesystem fault while reading or writing store files.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A device key is already persisted.
    #[error("device key already exists")]
    KeyExists,

    /// No device key has been persisted yet.
    #[error("no device key")]
    NoKey,

    /// The password did not decrypt the key envelope.
    #[error("wrong password")]
    BadPassword,

    /// A store file failed to decode.
    #[error("corrupt keystore file: {0}")]
    Corrupt(String),

    /// Key derivation or AEAD failure.
    #[error("crypto error: {0}")]
    Crypto(String),
}
