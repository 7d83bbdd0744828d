use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RowStoreError {
    #[error("row store lock poisoned")]
    Poisoned,
}

/// Key/value store for projection rows.
///
/// Rows are derived data: `clear` followed by a replay of the event log must
/// reproduce the same contents.
pub trait RowStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Result<Option<V>, RowStoreError>;
    fn upsert(&self, key: K, value: V) -> Result<(), RowStoreError>;
    fn list(&self) -> Result<Vec<V>, RowStoreError>;
    /// Drop every row (rebuild support).
    fn clear(&self) -> Result<(), RowStoreError>;
}

impl<K, V, S> RowStore<K, V> for Arc<S>
where
    S: RowStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Result<Option<V>, RowStoreError> {
        (**self).get(key)
    }

    fn upsert(&self, key: K, value: V) -> Result<(), RowStoreError> {
        (**self).upsert(key, value)
    }

    fn list(&self) -> Result<Vec<V>, RowStoreError> {
        (**self).list()
    }

    fn clear(&self) -> Result<(), RowStoreError> {
        (**self).clear()
    }
}

/// In-memory row store for tests/dev and the single-process service.
#[derive(Debug)]
pub struct InMemoryRowStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryRowStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryRowStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RowStore<K, V> for InMemoryRowStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Result<Option<V>, RowStoreError> {
        let map = self.inner.read().map_err(|_| RowStoreError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    fn upsert(&self, key: K, value: V) -> Result<(), RowStoreError> {
        let mut map = self.inner.write().map_err(|_| RowStoreError::Poisoned)?;
        map.insert(key, value);
        Ok(())
    }

    fn list(&self) -> Result<Vec<V>, RowStoreError> {
        let map = self.inner.read().map_err(|_| RowStoreError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }

    fn clear(&self) -> Result<(), RowStoreError> {
        let mut map = self.inner.write().map_err(|_| RowStoreError::Poisoned)?;
        map.clear();
        Ok(())
    }
}
