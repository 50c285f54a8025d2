//! Directory-backed shared store for contexts running in separate processes.
//!
//! Each key is one JSON record in the origin directory. Records carry the id
//! of the handle that wrote them, so a handle scanning the directory can skip
//! its own writes. Change detection is a periodic scan driven by a [`Poller`].

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{SharedStore, StoreChange, StoreError, CHANGE_CHANNEL_CAPACITY};
use crate::poll::{poll_callback, Poller};

/// Record file extension
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    key: String,
    value: String,
    writer: String,
    written_at: DateTime<Utc>,
}

struct FileInner {
    dir: PathBuf,
    writer: String,
    scan_interval: Duration,
    tx: broadcast::Sender<StoreChange>,
    watcher: Mutex<Option<Poller>>,
    seen: Mutex<HashMap<String, Record>>,
}

/// Handle on an origin directory.
pub struct FileStore {
    inner: Arc<FileInner>,
}

impl FileStore {
    /// Open (creating if needed) the origin directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>, scan_interval: Duration) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let writer = format!("{:016x}", rand::random::<u64>());
        let (tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        debug!(dir = %dir.display(), %writer, "File store opened");

        Ok(Self {
            inner: Arc::new(FileInner {
                dir,
                writer,
                scan_interval,
                tx,
                watcher: Mutex::new(None),
                seen: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Id stamped on every record this handle writes.
    pub fn writer_id(&self) -> &str {
        &self.inner.writer
    }
}

impl FileInner {
    fn record_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", encode_key(key), RECORD_EXTENSION))
    }

    fn read_record(&self, key: &str, path: &Path) -> Result<Option<Record>, StoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn write_record(&self, record: &Record) -> Result<(), StoreError> {
        let path = self.record_path(&record.key);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            encode_key(&record.key),
            self.writer
        ));
        let contents = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            key: record.key.clone(),
            message: e.to_string(),
        })?;
        // Rename keeps readers from seeing a half-written record
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load_all(&self) -> Result<HashMap<String, Record>, StoreError> {
        let mut records = HashMap::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if !is_record {
                continue;
            }
            let name = path.display().to_string();
            match self.read_record(&name, &path) {
                Ok(Some(record)) => {
                    records.insert(record.key.clone(), record);
                }
                Ok(None) => {}
                Err(e) => debug!(file = %name, error = %e, "Skipping unreadable record"),
            }
        }
        Ok(records)
    }

    /// Diff the directory against the last scan and announce foreign changes.
    fn scan(&self) {
        let current = match self.load_all() {
            Ok(records) => records,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Store scan failed");
                return;
            }
        };

        let mut seen = self.seen.lock();
        for (key, record) in &current {
            if seen.get(key) != Some(record) && record.writer != self.writer {
                let _ = self.tx.send(StoreChange {
                    key: key.clone(),
                    new_value: Some(record.value.clone()),
                });
            }
        }
        for key in seen.keys() {
            if !current.contains_key(key) {
                let _ = self.tx.send(StoreChange {
                    key: key.clone(),
                    new_value: None,
                });
            }
        }
        *seen = current;
    }
}

impl SharedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.inner.record_path(key);
        Ok(self.inner.read_record(key, &path)?.map(|r| r.value))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let record = Record {
            key: key.to_string(),
            value: value.to_string(),
            writer: self.inner.writer.clone(),
            written_at: Utc::now(),
        };
        self.inner.write_record(&record)?;
        self.inner.seen.lock().insert(key.to_string(), record);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.inner.record_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.inner.seen.lock().remove(key);
        Ok(())
    }

    fn watch(&self) -> Result<broadcast::Receiver<StoreChange>, StoreError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(StoreError::Unavailable(
                "change scanning needs an async runtime".to_string(),
            ));
        }

        let mut watcher = self.inner.watcher.lock();
        if watcher.is_none() {
            *self.inner.seen.lock() = self.inner.load_all()?;

            let weak: Weak<FileInner> = Arc::downgrade(&self.inner);
            let mut poller = Poller::new("file-store-scan");
            poller.start(
                Some(poll_callback(move || {
                    let weak = weak.clone();
                    async move {
                        let Some(inner) = weak.upgrade() else {
                            return;
                        };
                        // Directory reads block; keep them off the runtime workers
                        if let Err(e) = tokio::task::spawn_blocking(move || inner.scan()).await {
                            warn!(error = %e, "Store scan task failed");
                        }
                    }
                })),
                self.inner.scan_interval,
                true,
            );
            *watcher = Some(poller);
        }

        Ok(self.inner.tx.subscribe())
    }
}

/// Map a key onto a safe file stem.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
