use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use mongodb::Database;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::PolicyConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub policy: PolicyConfig,
    pub jwt_secret: String,
    /// Serializes Index.update_stats per index (read-aggregate-overwrite).
    pub index_locks: LockRegistry,
    /// Serializes accrual ticks per investment.
    pub investment_locks: LockRegistry,
}

impl AppState {
    pub fn new(db: Database, policy: PolicyConfig, jwt_secret: String) -> Self {
        AppState {
            db,
            policy,
            jwt_secret,
            index_locks: LockRegistry::new(),
            investment_locks: LockRegistry::new(),
        }
    }
}

/// Map of per-key async mutexes. Handlers hold one of these across a
/// read-compute-write span so two requests for the same entity never
/// interleave inside this process.
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_returns_same_lock() {
        let registry = LockRegistry::new();
        let a = registry.entry("idx-1");
        let b = registry.entry("idx-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_keys_get_independent_locks() {
        let registry = LockRegistry::new();
        let a = registry.entry("idx-1");
        let b = registry.entry("idx-2");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn lock_serializes_critical_sections() {
        let registry = LockRegistry::new();
        let counter = Arc::new(StdMutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = registry.entry("inv-1");
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.lock().await;
                // read-increment-write with a yield in the middle; without
                // the registry lock this loses updates
                let read = *counter.lock().unwrap();
                tokio::task::yield_now().await;
                *counter.lock().unwrap() = read + 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }
}
