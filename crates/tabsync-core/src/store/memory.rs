//! In-process shared store.
//!
//! A `MemoryOrigin` plays the role of one origin; each `MemoryStore` handle
//! opened from it plays one tab. Writes fan out to every other handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::trace;

use super::{SharedStore, StoreChange, StoreError, CHANGE_CHANNEL_CAPACITY};

struct OriginInner {
    entries: RwLock<HashMap<String, String>>,
    tabs: Mutex<Vec<(u64, broadcast::Sender<StoreChange>)>>,
    next_tab: AtomicU64,
    available: AtomicBool,
}

/// One origin shared by any number of handles.
/// Clone is cheap and refers to the same origin.
#[derive(Clone)]
pub struct MemoryOrigin {
    inner: Arc<OriginInner>,
}

impl MemoryOrigin {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OriginInner {
                entries: RwLock::new(HashMap::new()),
                tabs: Mutex::new(Vec::new()),
                next_tab: AtomicU64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Open a new handle on this origin.
    pub fn open_tab(&self) -> MemoryStore {
        let tab_id = self.inner.next_tab.fetch_add(1, Ordering::Relaxed);
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        self.inner.tabs.lock().push((tab_id, tx));
        MemoryStore {
            origin: self.inner.clone(),
            tab_id,
        }
    }

    /// Toggle availability. While unavailable every operation fails,
    /// mirroring disabled or over-quota browser storage.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::Relaxed);
    }
}

impl Default for MemoryOrigin {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on a [`MemoryOrigin`].
pub struct MemoryStore {
    origin: Arc<OriginInner>,
    tab_id: u64,
}

impl MemoryStore {
    pub fn tab_id(&self) -> u64 {
        self.tab_id
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.origin.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("storage disabled".to_string()))
        }
    }

    fn notify_others(&self, change: StoreChange) {
        let tabs = self.origin.tabs.lock();
        for (id, tx) in tabs.iter() {
            if *id != self.tab_id {
                // No receivers just means that tab is not listening
                let _ = tx.send(change.clone());
            }
        }
        trace!(tab = self.tab_id, key = %change.key, "Change fanned out");
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ensure_available()?;
        Ok(self.origin.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.origin
            .entries
            .write()
            .insert(key.to_string(), value.to_string());
        self.notify_others(StoreChange {
            key: key.to_string(),
            new_value: Some(value.to_string()),
        });
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        let existed = self.origin.entries.write().remove(key).is_some();
        if existed {
            self.notify_others(StoreChange {
                key: key.to_string(),
                new_value: None,
            });
        }
        Ok(())
    }

    fn watch(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError> {
        self.ensure_available()?;
        let tabs = self.origin.tabs.lock();
        tabs.iter()
            .find(|(id, _)| *id == self.tab_id)
            .map(|(_, tx)| tx.subscribe())
            .ok_or_else(|| StoreError::Unavailable("tab closed".to_string()))
    }
}

impl Drop for MemoryStore {
    fn drop(&mut self) {
        self.origin.tabs.lock().retain(|(id, _)| *id != self.tab_id);
    }
}
