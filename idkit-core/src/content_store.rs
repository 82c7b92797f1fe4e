//! The content-addressed storage collaborator interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::ContentId;

/// Abstract content-addressed document store.
///
/// Documents are immutable and addressed by the SHA-256 of their bytes; the
/// local client treats the store as the authoritative home of claim bodies.
#[async_trait]
pub trait ContentStore: Send + Sync + 'static {
    /// Persists a document and returns its content id.
    async fn put(&self, document: Vec<u8>) -> Result<ContentId>;

    /// Fetches a document by content id. `None` means the store answered
    /// but does not hold the document.
    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>>;
}

/// In-memory content store for tests and embedded hosts.
#[derive(Clone, Default)]
pub struct MemoryContentStore {
    inner: Arc<MemoryContentStoreInner>,
}

#[derive(Default)]
struct MemoryContentStoreInner {
    documents: Mutex<HashMap<ContentId, Vec<u8>>>,
    calls: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Simulates a transport outage.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Drops a document, simulating an unfetchable body.
    pub fn evict(&self, id: &ContentId) {
        self.lock().remove(id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ContentId, Vec<u8>>> {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self) -> Result<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(Error::Storage("content store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, document: Vec<u8>) -> Result<ContentId> {
        self.tick()?;
        let id = ContentId::of(&document);
        self.lock().insert(id, document);
        Ok(id)
    }

    async fn get(&self, id: &ContentId) -> Result<Option<Vec<u8>>> {
        self.tick()?;
        Ok(self.lock().get(id).cloned())
    }
}
