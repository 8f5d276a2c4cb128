//! Volatile store. Tests use it directly; the snapshot backend wraps it.

use super::KvStore;
use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug)]
pub struct MemoryKv<V> {
    map: RwLock<BTreeMap<String, V>>,
}

impl<V> MemoryKv<V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<V> Default for MemoryKv<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> KvStore<V> for MemoryKv<V> {
    fn get(&self, key: &str) -> Result<Option<V>> {
        let map = self.map.read().map_err(|_| anyhow!("kv lock poisoned"))?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, value: V) -> Result<()> {
        let mut map = self.map.write().map_err(|_| anyhow!("kv lock poisoned"))?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write().map_err(|_| anyhow!("kv lock poisoned"))?;
        Ok(map.remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<(String, V)>> {
        let map = self.map.read().map_err(|_| anyhow!("kv lock poisoned"))?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn len(&self) -> Result<usize> {
        let map = self.map.read().map_err(|_| anyhow!("kv lock poisoned"))?;
        Ok(map.len())
    }
}
