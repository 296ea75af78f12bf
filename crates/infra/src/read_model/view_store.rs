use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use warden_core::{DomainError, DomainResult};

/// Key/value rows of one view. The spooler is the only writer.
pub trait ViewStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn put(&self, key: K, value: V) -> DomainResult<()>;
    fn delete(&self, key: &K) -> DomainResult<()>;
    fn list(&self) -> Vec<V>;
}

impl<K, V, S> ViewStore<K, V> for Arc<S>
where
    S: ViewStore<K, V> + ?Sized,
{
    fn get(&self, key: &K) -> Option<V> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> DomainResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &K) -> DomainResult<()> {
        (**self).delete(key)
    }

    fn list(&self) -> Vec<V> {
        (**self).list()
    }
}

/// In-memory rows for tests/dev.
#[derive(Debug)]
pub struct InMemoryViewStore<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> InMemoryViewStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryViewStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> DomainError {
    DomainError::internal("view store lock poisoned")
}

impl<K, V> ViewStore<K, V> for InMemoryViewStore<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(key).cloned()
    }

    fn put(&self, key: K, value: V) -> DomainResult<()> {
        self.inner.write().map_err(|_| poisoned())?.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> DomainResult<()> {
        self.inner.write().map_err(|_| poisoned())?.remove(key);
        Ok(())
    }

    fn list(&self) -> Vec<V> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store: Arc<InMemoryViewStore<String, u32>> = Arc::new(InMemoryViewStore::new());
        store.put("a".into(), 1).unwrap();
        store.put("a".into(), 2).unwrap();
        store.put("b".into(), 3).unwrap();
        assert_eq!(store.get(&"a".to_string()), Some(2));

        store.delete(&"a".to_string()).unwrap();
        assert_eq!(store.get(&"a".to_string()), None);
        assert_eq!(store.list(), vec![3]);
    }
}
