//! Shared key-value store collaborator.
//!
//! Every client context of one origin opens the same store. A write made
//! through one handle is announced to every *other* handle through
//! [`SharedStore::watch`]; the writer never hears its own writes.
//!
//! Two implementations are provided:
//! - [`MemoryOrigin`]: contexts living in the same process
//! - [`FileStore`]: contexts living in separate processes on one machine

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::{MemoryOrigin, MemoryStore};

use thiserror::Error;
use tokio::sync::broadcast;

/// Key under which the bearer token lives.
pub const TOKEN_KEY: &str = "token";

/// Capacity of each handle's change channel.
/// Signals are rare; 64 leaves room for a burst of cache writes.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A change made by another handle of the same origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Shared store unavailable: {0}")]
    Unavailable(String),

    #[error("Shared store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt store record for key {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Persistent key-value store shared by all contexts of one origin.
pub trait SharedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Subscribe to writes made through other handles.
    fn watch(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError>;
}
