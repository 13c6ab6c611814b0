//! In-memory key/value store for tests and the CLI.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::KeyValueStore;

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// The store was switched offline.
    #[error("Store unavailable")]
    Unavailable,
}

/// In-memory key/value store.
///
/// Uses BTreeMap for deterministic iteration order. Can be switched offline
/// to exercise failure paths.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    values: RwLock<BTreeMap<String, String>>,
    offline: AtomicBool,
}

impl InMemoryKeyValueStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail (`true`) or succeed again (`false`).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Raw value for a key, bypassing the offline switch.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn check(&self) -> Result<(), InMemoryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(InMemoryError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    type Error = InMemoryError;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        self.check()?;
        Ok(self.values.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), Self::Error> {
        self.check()?;
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Self::Error> {
        self.check()?;
        self.values.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PolicyRepository;
    use crate::types::{ConflictResolution, Filters, Lens, PolicyType};
    use crate::POLICY_STORE_KEY;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryKeyValueStore::new();
        store.put("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_offline_store_fails() {
        let store = InMemoryKeyValueStore::new();
        store.set_offline(true);
        assert!(store.get("k").await.is_err());
        assert!(store.put("k", "v".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_repository_upsert_merges() {
        let repo = PolicyRepository::new(Arc::new(InMemoryKeyValueStore::new()));
        let old = ConflictResolution::new("L1", "L2", 100, "user");
        let new = old.clone().with_precedence("L2").updated_at(200);

        repo.upsert(new.clone()).await.unwrap();
        let merged = repo.upsert(old).await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].policy_type, PolicyType::Precedence);
        assert_eq!(repo.load_policies().await, vec![new]);
    }

    #[tokio::test]
    async fn test_repository_read_failure_is_empty() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let repo = PolicyRepository::new(Arc::clone(&store));
        repo.save_policies(&[ConflictResolution::new("L1", "L2", 1, "user")])
            .await
            .unwrap();

        store.set_offline(true);
        assert!(repo.load_policies().await.is_empty());
        assert!(repo.upsert(ConflictResolution::new("L3", "L4", 1, "user")).await.is_err());

        store.set_offline(false);
        assert_eq!(repo.load_policies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_repository_drops_garbage_entries() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let valid = serde_json::to_value(ConflictResolution::new("L1", "L2", 1, "user")).unwrap();
        let doc = serde_json::json!([valid, {"conflictId": 7}]).to_string();
        store.put(POLICY_STORE_KEY, doc).await.unwrap();

        let repo = PolicyRepository::new(store);
        assert_eq!(repo.load_policies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_filters_roundtrip() {
        let repo = PolicyRepository::new(Arc::new(InMemoryKeyValueStore::new()));
        assert!(repo.load_filters().await.is_none());
        let filters = Filters::with_lens(Lens::Recency);
        repo.save_filters(&filters).await.unwrap();
        assert_eq!(repo.load_filters().await, Some(filters));
    }
}
