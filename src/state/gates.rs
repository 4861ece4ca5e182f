use std::{hash::Hash, sync::Arc};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed async mutexes serialising work per key while unrelated keys run in parallel.
pub struct GateMap<K> {
    gates: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for GateMap<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            gates: DashMap::new(),
        }
    }
}

impl<K> GateMap<K>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty gate map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let gate = self
            .gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        gate.lock_owned().await
    }

    /// Forget gates whose key fails `keep`. Holders of a removed gate keep their guard.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.gates.retain(|key, _| keep(key));
    }

    /// Number of gates currently allocated.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Whether no gate is allocated.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let gates = GateMap::<u32>::new();
        let guard = gates.acquire(&1).await;
        let blocked = tokio::time::timeout(Duration::from_millis(20), gates.acquire(&1)).await;
        assert!(blocked.is_err());
        drop(guard);
        assert!(tokio::time::timeout(Duration::from_millis(20), gates.acquire(&1)).await.is_ok());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let gates = GateMap::<u32>::new();
        let _first = gates.acquire(&1).await;
        assert!(tokio::time::timeout(Duration::from_millis(20), gates.acquire(&2)).await.is_ok());
        assert_eq!(gates.len(), 2);
        gates.retain(|key| *key != 2);
        assert_eq!(gates.len(), 1);
    }
}
