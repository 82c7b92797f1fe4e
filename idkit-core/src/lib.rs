//! Core engine for the idkit identity client.
//!
//! Wires an encrypted device keystore, a key lifecycle state machine, an
//! identity resolver over ledger + content-addressed storage, a proof
//! service, and an async request dispatcher with exactly-once completion
//! channels.

pub use idkit_keystore as keystore;
pub use idkit_keystore::{AccountId, DeviceKey, KdfParams, KeyStore, Password};

mod claim;
pub use claim::*;

mod client;
pub use client::{Client, MIN_PASSWORD_LEN};

mod content_store;
pub use content_store::{ContentStore, MemoryContentStore};

mod dispatcher;
pub use dispatcher::*;

mod error;
pub use error::{Error, Result, CODE_OK};

pub mod github;

mod ledger;
pub use ledger::{Ledger, MemoryLedger};

mod lifecycle;
pub use lifecycle::{Lifecycle, LockState};

mod resolver;
pub use resolver::Resolver;

mod service;
pub use service::{Service, ServiceKind};

mod types;
pub use types::{ContentId, Uid};

// private modules
mod http;
mod proof;
