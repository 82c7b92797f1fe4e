//! The request dispatcher.
//!
//! Every boundary operation arrives as a [`Call`] and is executed as an
//! independent task. The caller gets a numbered completion channel that
//! receives exactly one terminal message — a payload or an error code —
//! on every exit path, including task unwinds. `has_device_key` goes
//! through the same channel model as everything else; nothing resolves
//! synchronously.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{oneshot, RwLock};
use tokio::task;
use tracing::{debug, warn};

use idkit_keystore::{KdfParams, KeyStore, Password};

use crate::claim::IdentityRecord;
use crate::client::Client;
use crate::content_store::{ContentStore, MemoryContentStore};
use crate::error::{Error, Result, CODE_OK};
use crate::ledger::{Ledger, MemoryLedger};
use crate::types::Uid;

/// Builds the collaborators a client context needs at `init` time.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The ledger collaborator type.
    type Ledger: Ledger;
    /// The content store collaborator type.
    type Store: ContentStore;

    /// Creates the ledger client. Failures surface as
    /// [`Error::LedgerConnect`].
    async fn connect_ledger(&self) -> Result<Self::Ledger>;

    /// Opens the content store. Failures surface as [`Error::StoreOpen`]
    /// (or [`Error::StoreConfig`] for rejected configuration).
    async fn open_store(&self, base_path: &Path) -> Result<Self::Store>;

    /// KDF cost parameters for the keystore.
    fn kdf_params(&self) -> KdfParams {
        KdfParams::default()
    }
}

/// A boundary operation.
#[derive(Debug)]
pub enum Call {
    /// Construct the client context rooted at a base path.
    Init { base_path: PathBuf },
    /// Set the device key.
    SetKey {
        suri: Option<String>,
        password: Password,
        phrase: Option<String>,
    },
    Lock,
    Unlock { password: Password },
    HasDeviceKey,
    AddPaperkey,
    ChangePassword { old: Password, new: Password },
    ResolveUid { identifier: String },
    Identity { uid: String },
    ProveIdentity { service: i32, id: String },
    RevokeIdentity { service: i32, id: String },
    SignerAccountId,
}

impl Call {
    /// Stable operation name, used in the pending registry and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::SetKey { .. } => "key_set",
            Self::Lock => "lock",
            Self::Unlock { .. } => "unlock",
            Self::HasDeviceKey => "has_device_key",
            Self::AddPaperkey => "add_paperkey",
            Self::ChangePassword { .. } => "change_password",
            Self::ResolveUid { .. } => "resolve_uid",
            Self::Identity { .. } => "identity",
            Self::ProveIdentity { .. } => "prove_identity",
            Self::RevokeIdentity { .. } => "revoke_identity",
            Self::SignerAccountId => "signer_account_id",
        }
    }
}

/// Success payload of a completed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Unit,
    Bool(bool),
    Text(String),
    OptionalUid(Option<Uid>),
    Record(IdentityRecord),
}

/// The handle naming a completion channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl core::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The single terminal message delivered to a completion channel.
#[derive(Debug)]
pub struct Completion {
    pub channel: ChannelId,
    pub result: Result<Payload>,
}

impl Completion {
    /// The boundary result code: [`CODE_OK`] or the error's code.
    #[must_use]
    pub fn code(&self) -> i32 {
        match &self.result {
            Ok(_) => CODE_OK,
            Err(err) => err.code(),
        }
    }
}

/// Bookkeeping for one in-flight call.
#[derive(Clone, Copy, Debug)]
pub struct PendingRequest {
    pub kind: &'static str,
    pub submitted_at: Instant,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;
type LastError = Arc<Mutex<Option<String>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Delivers the terminal message exactly once.
///
/// Explicit completion consumes the guard; if the task unwinds or the
/// future is dropped first, `Drop` delivers an `Unknown` error instead, so
/// the host never waits on an abandoned channel.
struct Completer {
    channel: ChannelId,
    tx: Option<oneshot::Sender<Completion>>,
    pending: PendingMap,
    last_error: LastError,
}

impl Completer {
    fn complete(mut self, result: Result<Payload>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<Payload>) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if let Err(err) = &result {
            warn!(channel = %self.channel, code = err.code(), %err, "request failed");
            *lock(&self.last_error) = Some(err.to_string());
        }
        lock(&self.pending).remove(&self.channel.0);
        // the host may have dropped its receiver; that is its choice, the
        // delivery obligation is met either way
        let _ = tx.send(Completion {
            channel: self.channel,
            result,
        });
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.deliver(Err(Error::Unknown(
                "request aborted before completion".into(),
            )));
        }
    }
}

/// Accepts calls, runs them without blocking the caller, and guarantees
/// exactly-once completion delivery.
pub struct Dispatcher<C: Connector> {
    connector: C,
    client: RwLock<Option<Arc<Client<C::Ledger, C::Store>>>>,
    pending: PendingMap,
    next_channel: AtomicU64,
    last_error: LastError,
}

impl<C: Connector> Dispatcher<C> {
    #[must_use]
    pub fn new(connector: C) -> Arc<Self> {
        Arc::new(Self {
            connector,
            client: RwLock::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_channel: AtomicU64::new(0),
            last_error: Arc::new(Mutex::new(None)),
        })
    }

    /// Dispatches a call. Returns immediately with the channel handle and
    /// its receiver; the terminal message arrives on the receiver.
    pub fn dispatch(self: &Arc<Self>, call: Call) -> (ChannelId, oneshot::Receiver<Completion>) {
        let channel = ChannelId(self.next_channel.fetch_add(1, Ordering::SeqCst) + 1);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            channel.0,
            PendingRequest {
                kind: call.kind(),
                submitted_at: Instant::now(),
            },
        );
        debug!(%channel, kind = call.kind(), "dispatching");

        let completer = Completer {
            channel,
            tx: Some(tx),
            pending: Arc::clone(&self.pending),
            last_error: Arc::clone(&self.last_error),
        };
        let this = Arc::clone(self);
        task::spawn(async move {
            let result = this.run_call(call).await;
            completer.complete(result);
        });
        (channel, rx)
    }

    /// Number of in-flight calls.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// The most recent failure message, for diagnostics only.
    #[must_use]
    pub fn last_error_message(&self) -> Option<String> {
        lock(&self.last_error).clone()
    }

    /// Byte length of the most recent failure message.
    #[must_use]
    pub fn last_error_length(&self) -> usize {
        lock(&self.last_error).as_ref().map_or(0, String::len)
    }

    /// The constructed client context, if `init` has completed.
    pub async fn client(&self) -> Option<Arc<Client<C::Ledger, C::Store>>> {
        self.client.read().await.clone()
    }

    async fn run_call(self: Arc<Self>, call: Call) -> Result<Payload> {
        if let Call::Init { base_path } = call {
            return self.init(base_path).await.map(|()| Payload::Unit);
        }

        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(Error::Uninitialized)?;

        match call {
            Call::Init { .. } => Err(Error::AlreadyInitialized),
            Call::SetKey {
                suri,
                password,
                phrase,
            } => client
                .set_key(suri.as_deref(), password, phrase.as_deref())
                .await
                .map(|account| Payload::Text(account.to_hex())),
            Call::Lock => client.lock().await.map(|()| Payload::Unit),
            Call::Unlock { password } => client.unlock(password).await.map(|()| Payload::Unit),
            Call::HasDeviceKey => Ok(Payload::Bool(client.has_device_key())),
            Call::AddPaperkey => client.add_paperkey().await.map(Payload::Text),
            Call::ChangePassword { old, new } => {
                client.change_password(old, new).await.map(|()| Payload::Unit)
            }
            Call::ResolveUid { identifier } => client
                .resolve_uid(&identifier)
                .await
                .map(Payload::OptionalUid),
            Call::Identity { uid } => client.identity(&uid).await.map(Payload::Record),
            Call::ProveIdentity { service, id } => client
                .prove_identity(service, &id)
                .await
                .map(Payload::Text),
            Call::RevokeIdentity { service, id } => client
                .revoke_identity(service, &id)
                .await
                .map(|()| Payload::Unit),
            Call::SignerAccountId => client
                .signer_account_id()
                .map(|account| Payload::Text(account.to_hex())),
        }
    }

    async fn init(&self, base_path: PathBuf) -> Result<()> {
        if self.client.read().await.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        if base_path.as_os_str().is_empty() {
            return Err(Error::BadPath("empty base path".into()));
        }

        let keystore_path = base_path.join("keystore");
        let kdf = self.connector.kdf_params();
        let keystore = task::spawn_blocking(move || KeyStore::open_with(keystore_path, kdf))
            .await
            .map_err(|e| Error::Unknown(e.to_string()))??;
        let ledger = self.connector.connect_ledger().await?;
        let store = self.connector.open_store(&base_path).await?;
        let client = Arc::new(Client::new(keystore, ledger, store));

        let mut slot = self.client.write().await;
        if slot.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        *slot = Some(client);
        debug!(base_path = %base_path.display(), "client initialized");
        Ok(())
    }
}

/// Connector over the in-memory collaborators, for tests and embedded
/// hosts.
pub struct MemoryConnector {
    ledger: MemoryLedger,
    store: MemoryContentStore,
    kdf: KdfParams,
    fail_connect: std::sync::atomic::AtomicBool,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::with_kdf(KdfParams::default())
    }

    #[must_use]
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self {
            ledger: MemoryLedger::new(),
            store: MemoryContentStore::new(),
            kdf,
            fail_connect: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// A handle onto the shared in-memory ledger.
    #[must_use]
    pub fn ledger(&self) -> MemoryLedger {
        self.ledger.clone()
    }

    /// A handle onto the shared in-memory content store.
    #[must_use]
    pub fn store(&self) -> MemoryContentStore {
        self.store.clone()
    }

    /// Makes the next ledger connection attempts fail.
    pub fn set_connect_error(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Ledger = MemoryLedger;
    type Store = MemoryContentStore;

    async fn connect_ledger(&self) -> Result<MemoryLedger> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::LedgerConnect("injected connect failure".into()));
        }
        Ok(self.ledger.clone())
    }

    async fn open_store(&self, _base_path: &Path) -> Result<MemoryContentStore> {
        Ok(self.store.clone())
    }

    fn kdf_params(&self) -> KdfParams {
        self.kdf
    }
}
