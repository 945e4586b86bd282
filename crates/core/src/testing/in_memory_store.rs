//! In-memory batch store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::batch::{BatchDocument, BatchStore, GroupMutator, InvoiceGroup, StoreError};

#[derive(Default)]
struct Inner {
    batches: HashMap<String, BatchDocument>,
    // Batch ids in touch order, most recently written last.
    recency: Vec<String>,
}

impl Inner {
    fn touch(&mut self, batch_id: &str) {
        self.recency.retain(|id| id != batch_id);
        self.recency.push(batch_id.to_string());
    }
}

/// `BatchStore` backed by a `HashMap`, for tests that exercise store
/// consumers without touching the filesystem. Same contract as
/// `JsonBatchStore`: `create` rejects duplicates, `update_group`
/// refreshes `updated_at`, `list_batches` is most recent first.
#[derive(Default)]
pub struct InMemoryBatchStore {
    inner: Mutex<Inner>,
}

impl InMemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchStore for InMemoryBatchStore {
    async fn create(&self, document: &BatchDocument) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let batch_id = document.batch.id.clone();
        if inner.batches.contains_key(&batch_id) {
            return Err(StoreError::BatchAlreadyExists(batch_id));
        }
        inner.batches.insert(batch_id.clone(), document.clone());
        inner.touch(&batch_id);
        Ok(())
    }

    async fn load(&self, batch_id: &str) -> Result<BatchDocument, StoreError> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()))
    }

    async fn update_group(
        &self,
        batch_id: &str,
        group_id: &str,
        mutate: GroupMutator,
    ) -> Result<InvoiceGroup, StoreError> {
        let mut inner = self.inner.lock().await;
        let document = inner
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| StoreError::BatchNotFound(batch_id.to_string()))?;

        let group = document
            .groups
            .iter_mut()
            .find(|g| g.tax_id == group_id)
            .ok_or_else(|| StoreError::GroupNotFound {
                batch_id: batch_id.to_string(),
                group_id: group_id.to_string(),
            })?;

        mutate(group);
        group.updated_at = Utc::now();
        let updated = group.clone();

        inner.touch(batch_id);
        Ok(updated)
    }

    async fn list_batches(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.recency.iter().rev().cloned().collect())
    }
}
