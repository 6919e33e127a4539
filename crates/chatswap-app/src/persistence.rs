use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::signal::{Signal, SubscriptionId};
use crate::storage::{AreaName, ChangeListener, StorageArea, StorageChange, StorageError};

const ENV_DATA_DIR: &str = "CHATSWAP_DATA_DIR";

/// Storage area kept as one JSON object per file. Every write replaces the
/// file through a temporary sibling and a rename, so a crash leaves either
/// the old or the new document on disk.
pub struct FileStorageArea {
    name: AreaName,
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
    changes: Signal<StorageChange>,
    writer: tokio::sync::Mutex<()>,
}

impl FileStorageArea {
    /// Opens `<dir>/<area>.json`, where `dir` is `CHATSWAP_DATA_DIR` or
    /// `.chatswap` under the working directory.
    pub fn open_default(name: AreaName) -> Result<Self, StorageError> {
        let dir = match env::var_os(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => env::current_dir()
                .map_err(|error| unavailable(name, &error))?
                .join(".chatswap"),
        };
        Self::open_in(name, dir)
    }

    pub fn open_in(name: AreaName, dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_path(name, dir.as_ref().join(format!("{name}.json")))
    }

    pub fn open_path(name: AreaName, path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<BTreeMap<String, Value>>(&bytes).map_err(
                |error| unavailable(name, &format!("{}: {error}", path.display())),
            )?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => {
                return Err(unavailable(name, &format!("{}: {error}", path.display())));
            }
        };
        debug!(area = %name, path = %path.display(), keys = entries.len(), "storage area opened");

        Ok(Self {
            name,
            path,
            entries: Mutex::new(entries),
            changes: Signal::new(),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists the document with `key` changed, then publishes the change.
    async fn commit(&self, key: &str, value: Option<Value>) -> Result<(), StorageError> {
        let _writer = self.writer.lock().await;
        let mut next = self.lock().clone();
        match &value {
            Some(value) => {
                next.insert(key.to_owned(), value.clone());
            }
            None => {
                if next.remove(key).is_none() {
                    return Ok(());
                }
            }
        }

        write_atomically(&self.path, &next)
            .map_err(|error| unavailable(self.name, &format!("{}: {error}", self.path.display())))?;
        *self.lock() = next;
        self.changes.emit(&StorageChange {
            area: self.name,
            key: key.to_owned(),
            new_value: value,
        });
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StorageArea for FileStorageArea {
    fn name(&self) -> AreaName {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.commit(key, Some(value)).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.commit(key, None).await
    }

    fn watch(&self, listener: ChangeListener) -> SubscriptionId {
        self.changes.subscribe(move |change| listener(change))
    }

    fn unwatch(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }
}

fn write_atomically(path: &Path, entries: &BTreeMap<String, Value>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let staged = path.with_extension("json.tmp");
    fs::write(&staged, serde_json::to_vec_pretty(entries)?)?;
    fs::rename(&staged, path)
}

fn unavailable(area: AreaName, error: &dyn std::fmt::Display) -> StorageError {
    StorageError::Unavailable {
        area,
        message: error.to_string(),
    }
}
