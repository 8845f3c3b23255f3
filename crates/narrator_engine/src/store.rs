//! Injected key-value persistence for job records and the two singleton
//! records (user configuration, operational state).
//!
//! The engine never touches ambient global state: a [`KeyValueStore`] is a
//! constructor dependency of the engine and its registry. Records are JSON
//! values; typed records serialize through serde. `update` gives atomic
//! per-key read-merge-write, and `subscribe` exposes change notification for
//! UI consumers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use engine_logging::engine_warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::persist::{AtomicFileWriter, PersistError};

/// Key of the user-configuration singleton record.
pub const USER_SETTINGS_KEY: &str = "user_settings";
/// Key of the operational-state singleton record.
pub const OPS_STATE_KEY: &str = "ops_state";
/// Prefix of per-job record keys.
pub const JOB_KEY_PREFIX: &str = "job:";

/// Store key of the job with the given id.
pub fn job_key(id: &str) -> String {
    format!("{JOB_KEY_PREFIX}{id}")
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store backend: {0}")]
    Backend(String),
}

impl From<PersistError> for StoreError {
    fn from(err: PersistError) -> Self {
        match err {
            PersistError::Io(io) => StoreError::Io(io),
            PersistError::OutputDir(msg) => StoreError::Backend(msg),
        }
    }
}

/// Change notification for store consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Written { key: String },
    Removed { key: String },
}

/// Merge closure for [`KeyValueStore::update`]: receives the current value
/// (if any) and returns the replacement, or `None` to delete the key.
pub type MergeFn = Box<dyn FnOnce(Option<Value>) -> Option<Value> + Send>;

/// Keyed persistence with atomic per-key read-merge-write and change
/// notification.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Applies `merge` to the current value of `key` in one critical section
    /// and stores the result. Returns the stored value.
    async fn update(&self, key: &str, merge: MergeFn) -> Result<Option<Value>, StoreError>;

    /// All keys currently present, in sorted order.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// User configuration singleton: provider credentials and preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub api_key: Option<String>,
    pub voice: String,
    pub model: String,
    pub output_dir: Option<PathBuf>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            voice: "alloy".to_string(),
            model: "tts-1".to_string(),
            output_dir: None,
        }
    }
}

/// Operational-state singleton kept current by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsState {
    pub active_jobs: usize,
    pub total_completed: u64,
    pub total_failed: u64,
}

/// In-memory store used by tests and as the default backend.
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine; notification is best-effort.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.entries.lock().await.insert(key.to_string(), value);
        self.publish(StoreChange::Written {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.entries.lock().await.remove(key).is_some();
        if removed {
            self.publish(StoreChange::Removed {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn update(&self, key: &str, merge: MergeFn) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).cloned();
        let next = merge(current);
        match &next {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
                drop(entries);
                self.publish(StoreChange::Written {
                    key: key.to_string(),
                });
            }
            None => {
                let removed = entries.remove(key).is_some();
                drop(entries);
                if removed {
                    self.publish(StoreChange::Removed {
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(next)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Durable store: the whole key space as one JSON document, rewritten
/// atomically on every mutation. Sized for this workload — a handful of job
/// records plus two singletons, never more than a few kilobytes.
pub struct FileStore {
    writer: AtomicFileWriter,
    snapshot_name: String,
    entries: Mutex<BTreeMap<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileStore {
    /// Opens (or starts) the snapshot at `path`. An unreadable snapshot is
    /// logged and treated as empty rather than refusing to start.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let snapshot_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Backend("store path has no file name".to_string()))?;
        let dir = match path.parent() {
            Some(parent) if parent != Path::new("") => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let entries = if path.exists() {
            match fs::read(path) {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(entries) => entries,
                    Err(err) => {
                        engine_warn!("store snapshot {} unreadable, starting empty: {err}", path.display());
                        BTreeMap::new()
                    }
                },
                Err(err) => return Err(StoreError::Io(err)),
            }
        } else {
            BTreeMap::new()
        };

        let (changes, _) = broadcast::channel(64);
        Ok(Self {
            writer: AtomicFileWriter::new(dir),
            snapshot_name,
            entries: Mutex::new(entries),
            changes,
        })
    }

    fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(entries)?;
        self.writer.write(&self.snapshot_name, &bytes)?;
        Ok(())
    }

    fn publish(&self, change: StoreChange) {
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries)?;
        drop(entries);
        self.publish(StoreChange::Written {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        let removed = entries.remove(key).is_some();
        if removed {
            self.persist(&entries)?;
        }
        drop(entries);
        if removed {
            self.publish(StoreChange::Removed {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn update(&self, key: &str, merge: MergeFn) -> Result<Option<Value>, StoreError> {
        let mut entries = self.entries.lock().await;
        let current = entries.get(key).cloned();
        let next = merge(current);
        match &next {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
                self.persist(&entries)?;
                drop(entries);
                self.publish(StoreChange::Written {
                    key: key.to_string(),
                });
            }
            None => {
                let removed = entries.remove(key).is_some();
                if removed {
                    self.persist(&entries)?;
                }
                drop(entries);
                if removed {
                    self.publish(StoreChange::Removed {
                        key: key.to_string(),
                    });
                }
            }
        }
        Ok(next)
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.lock().await.keys().cloned().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
