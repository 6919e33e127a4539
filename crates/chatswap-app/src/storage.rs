use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Mutex;

use async_trait::async_trait;
use chatswap_core::StorageKind;
use serde_json::Value;

use crate::signal::{Signal, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaName {
    Local,
    Sync,
    Session,
}

impl From<StorageKind> for AreaName {
    fn from(value: StorageKind) -> Self {
        match value {
            StorageKind::Local => Self::Local,
            StorageKind::Sync => Self::Sync,
        }
    }
}

impl Display for AreaName {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Local => f.write_str("local"),
            Self::Sync => f.write_str("sync"),
            Self::Session => f.write_str("session"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("{area} storage quota exceeded")]
    QuotaExceeded { area: AreaName },
    #[error("{area} storage unavailable: {message}")]
    Unavailable { area: AreaName, message: String },
}

/// A key change observed on a storage area, from this or any other context.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub area: AreaName,
    pub key: String,
    pub new_value: Option<Value>,
}

pub type ChangeListener = Box<dyn Fn(&StorageChange) + Send + Sync>;

/// One extension storage area (device-local, account-synced or
/// session-scoped).
#[async_trait]
pub trait StorageArea: Send + Sync {
    fn name(&self) -> AreaName;

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn watch(&self, listener: ChangeListener) -> SubscriptionId;

    fn unwatch(&self, id: SubscriptionId) -> bool;
}

#[cfg(test)]
#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    fail_sets: usize,
    fail_removes: usize,
}

/// In-memory storage area. Every operation yields once so concurrent callers
/// interleave the way they do against a real asynchronous backend.
pub struct MemoryStorageArea {
    name: AreaName,
    entries: Mutex<BTreeMap<String, Value>>,
    changes: Signal<StorageChange>,
    #[cfg(test)]
    faults: Mutex<Faults>,
    #[cfg(test)]
    writes: Mutex<BTreeMap<String, usize>>,
}

impl MemoryStorageArea {
    pub fn new(name: AreaName) -> Self {
        Self {
            name,
            entries: Mutex::new(BTreeMap::new()),
            changes: Signal::new(),
            #[cfg(test)]
            faults: Mutex::new(Faults::default()),
            #[cfg(test)]
            writes: Mutex::new(BTreeMap::new()),
        }
    }

    fn apply(&self, key: &str, value: Option<Value>) {
        {
            let mut entries = lock(&self.entries);
            match &value {
                Some(value) => {
                    entries.insert(key.to_owned(), value.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        self.changes.emit(&StorageChange {
            area: self.name,
            key: key.to_owned(),
            new_value: value,
        });
    }

    #[cfg(not(test))]
    fn check_read(&self) -> Result<(), StorageError> {
        Ok(())
    }

    #[cfg(not(test))]
    fn check_set(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }

    #[cfg(not(test))]
    fn check_remove(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStorageArea {
    /// Number of successful `set` calls for `key`.
    pub fn write_count(&self, key: &str) -> usize {
        lock(&self.writes).get(key).copied().unwrap_or_default()
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        lock(&self.entries).get(key).cloned()
    }

    /// Writes as another execution context would: stores the value and
    /// notifies watchers without going through the async API.
    pub fn write_external(&self, key: &str, value: Option<Value>) {
        self.apply(key, value);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.faults).unavailable = unavailable;
    }

    pub fn fail_next_sets(&self, count: usize) {
        lock(&self.faults).fail_sets = count;
    }

    pub fn fail_next_removes(&self, count: usize) {
        lock(&self.faults).fail_removes = count;
    }

    fn check_read(&self) -> Result<(), StorageError> {
        if lock(&self.faults).unavailable {
            return Err(StorageError::Unavailable {
                area: self.name,
                message: "backend offline".to_owned(),
            });
        }
        Ok(())
    }

    fn check_set(&self, key: &str) -> Result<(), StorageError> {
        self.check_read()?;
        {
            let mut faults = lock(&self.faults);
            if faults.fail_sets > 0 {
                faults.fail_sets -= 1;
                return Err(StorageError::QuotaExceeded { area: self.name });
            }
        }
        *lock(&self.writes).entry(key.to_owned()).or_default() += 1;
        Ok(())
    }

    fn check_remove(&self) -> Result<(), StorageError> {
        self.check_read()?;
        let mut faults = lock(&self.faults);
        if faults.fail_removes > 0 {
            faults.fail_removes -= 1;
            return Err(StorageError::Unavailable {
                area: self.name,
                message: "remove rejected".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageArea for MemoryStorageArea {
    fn name(&self) -> AreaName {
        self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        tokio::task::yield_now().await;
        self.check_read()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.check_set(key)?;
        self.apply(key, Some(value));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        tokio::task::yield_now().await;
        self.check_remove()?;
        if lock(&self.entries).contains_key(key) {
            self.apply(key, None);
        }
        Ok(())
    }

    fn watch(&self, listener: ChangeListener) -> SubscriptionId {
        self.changes.subscribe(move |change| listener(change))
    }

    fn unwatch(&self, id: SubscriptionId) -> bool {
        self.changes.unsubscribe(id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
