use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = core::result::Result<T, Error>;

/// The authoritative error set for the identity client.
///
/// Every variant maps to a stable numeric code via [`Error::code`]; the code
/// space is a superset of both boundary generations the client has shipped
/// with. Usage and input errors are detected before any side effect;
/// collaborator errors pass through verbatim as their kind.
#[derive(Debug, Error)]
pub enum Error {
    /// Unclassified internal fault. Surfaced distinctly, never silently
    /// mapped to a known kind.
    #[error("unknown error: {0}")]
    Unknown(String),

    /// A supplied path or string argument was malformed.
    #[error("bad path: {0}")]
    BadPath(String),

    /// The ledger client could not be created.
    #[error("failed to connect ledger client: {0}")]
    LedgerConnect(String),

    /// The content store configuration was rejected.
    #[error("bad content store config: {0}")]
    StoreConfig(String),

    /// The on-disk keystore could not be opened.
    #[error("failed to open keystore: {0}")]
    KeystoreOpen(String),

    /// The content store could not be opened.
    #[error("failed to open content store: {0}")]
    StoreOpen(String),

    /// The client context has not been initialized.
    #[error("client is not initialized")]
    Uninitialized,

    /// The client context is already initialized.
    #[error("client is already initialized")]
    AlreadyInitialized,

    /// A device key already exists.
    #[error("device key already exists")]
    HasDeviceKey,

    /// The password is below the minimum length.
    #[error("password too short")]
    PasswordTooShort,

    /// The seed URI did not parse.
    #[error("invalid seed uri")]
    BadSuri,

    /// The recovery phrase did not parse or carried too little entropy.
    #[error("invalid recovery phrase")]
    BadMnemonic,

    /// Locking failed while flushing the keystore.
    #[error("failed to lock: {0}")]
    FailToLock(String),

    /// Unlocking failed; the password did not decrypt the key.
    #[error("failed to unlock")]
    FailToUnlock,

    /// The uid is syntactically invalid, or the ledger's key registry is
    /// inconsistent with the local account.
    #[error("bad uid: {0}")]
    BadUid(String),

    /// The service tag is not in the supported set.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Transport or protocol fault from the ledger collaborator.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Transport or protocol fault from the content store collaborator.
    #[error("content store error: {0}")]
    Storage(String),

    /// The device key is locked; the operation needs the decrypted secret.
    #[error("device key is locked")]
    KeyLocked,

    /// No device key has been set.
    #[error("no device key")]
    NoDeviceKey,
}

/// Code delivered on a successful completion.
pub const CODE_OK: i32 = 1;

impl Error {
    /// The stable numeric code for this error kind.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Unknown(_) => -1,
            Self::BadPath(_) => 2,
            Self::LedgerConnect(_) => 3,
            Self::StoreConfig(_) => 4,
            Self::KeystoreOpen(_) => 5,
            Self::StoreOpen(_) => 6,
            Self::Uninitialized => 7,
            Self::AlreadyInitialized => 8,
            Self::HasDeviceKey => 9,
            Self::PasswordTooShort => 10,
            Self::BadSuri => 11,
            Self::BadMnemonic => 12,
            Self::FailToLock(_) => 13,
            Self::FailToUnlock => 14,
            Self::BadUid(_) => 15,
            Self::UnknownService(_) => 16,
            Self::Ledger(_) => 17,
            Self::Storage(_) => 18,
            Self::KeyLocked => 19,
            Self::NoDeviceKey => 20,
        }
    }
}

impl From<idkit_keystore::Error> for Error {
    fn from(err: idkit_keystore::Error) -> Self {
        use idkit_keystore::Error as Ks;
        match err {
            Ks::Open(msg) => Self::KeystoreOpen(msg),
            Ks::KeyExists => Self::HasDeviceKey,
            Ks::NoKey => Self::NoDeviceKey,
            Ks::BadPassword => Self::FailToUnlock,
            Ks::Io(e) => Self::KeystoreOpen(e.to_string()),
            Ks::Corrupt(msg) | Ks::Crypto(msg) => Self::Unknown(msg),
        }
    }
}
