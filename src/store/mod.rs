//! Persistence port for conflict policies and UI preferences.
//!
//! The engine only needs an opaque key/value store. [`PolicyRepository`]
//! layers the JSON encoding and the fixed keys on top of it.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::conflict::merge_policies;
use crate::types::{ConflictResolution, Filters};
use crate::{FILTERS_STORE_KEY, POLICY_STORE_KEY};

/// Trait for key/value persistence backends.
///
/// Values are UTF-8 JSON documents. Implementations must be safe to share
/// across tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, value: String) -> Result<(), Self::Error>;

    /// Remove a value. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;
}

/// Error type for repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
    /// Stored document is not valid JSON of the expected shape.
    #[error("Failed to decode stored value: {0}")]
    Decode(#[from] serde_json::Error),
}

impl StoreError {
    /// Create a backend error from any error type.
    pub fn from_backend<E: std::error::Error>(e: E) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Typed access to conflict policies and persisted filters.
#[derive(Debug)]
pub struct PolicyRepository<S: KeyValueStore> {
    store: Arc<S>,
}

impl<S: KeyValueStore> Clone for PolicyRepository<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KeyValueStore> PolicyRepository<S> {
    /// Wrap a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Read policies, failing on backend or document errors.
    ///
    /// Individual entries that do not parse are dropped.
    pub async fn try_load_policies(&self) -> Result<Vec<ConflictResolution>, StoreError> {
        let Some(raw) = self
            .store
            .get(POLICY_STORE_KEY)
            .await
            .map_err(StoreError::from_backend)?
        else {
            return Ok(Vec::new());
        };

        let entries: Vec<Value> = serde_json::from_str(&raw)?;
        let mut policies = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<ConflictResolution>(entry) {
                Ok(policy) => policies.push(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping unparseable conflict policy");
                }
            }
        }
        Ok(policies)
    }

    /// Read policies. Any failure reads as "no policies".
    pub async fn load_policies(&self) -> Vec<ConflictResolution> {
        match self.try_load_policies().await {
            Ok(policies) => policies,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load conflict policies, continuing without");
                Vec::new()
            }
        }
    }

    /// Replace the stored policy list.
    pub async fn save_policies(&self, policies: &[ConflictResolution]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(policies)?;
        self.store
            .put(POLICY_STORE_KEY, raw)
            .await
            .map_err(StoreError::from_backend)
    }

    /// Merge one policy into the stored list (last writer wins per conflict)
    /// and persist the merged list. Returns the merged list.
    ///
    /// A failed read aborts the write so that stored policies are never
    /// overwritten with a partial list.
    pub async fn upsert(&self, policy: ConflictResolution) -> Result<Vec<ConflictResolution>, StoreError> {
        let mut policies = self.try_load_policies().await?;
        policies.push(policy);
        let merged: Vec<ConflictResolution> = merge_policies(policies).into_values().collect();
        self.save_policies(&merged).await?;
        Ok(merged)
    }

    /// Read persisted filters.
    pub async fn load_filters(&self) -> Option<Filters> {
        let raw = match self.store.get(FILTERS_STORE_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load filters");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(filters) => Some(filters),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unparseable persisted filters");
                None
            }
        }
    }

    /// Persist filters.
    pub async fn save_filters(&self, filters: &Filters) -> Result<(), StoreError> {
        let raw = serde_json::to_string(filters)?;
        self.store
            .put(FILTERS_STORE_KEY, raw)
            .await
            .map_err(StoreError::from_backend)
    }
}

pub use memory::{InMemoryError, InMemoryKeyValueStore};
