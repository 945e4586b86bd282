//! Batch state persistence.
//!
//! One JSON document per batch. Group updates are read-modify-write cycles
//! serialized behind a lock, and every write goes to a temp file that is
//! atomically renamed over the previous version, so a crash mid-write can
//! never leave a half-serialized batch on disk.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use super::types::{BatchDocument, InvoiceGroup};

/// Error type for batch store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("batch already exists: {0}")]
    BatchAlreadyExists(String),

    #[error("group {group_id} not found in batch {batch_id}")]
    GroupNotFound { batch_id: String, group_id: String },

    #[error("corrupt batch file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Single-group mutation applied under the store lock.
pub type GroupMutator = Box<dyn FnOnce(&mut InvoiceGroup) + Send>;

/// Trait for batch storage backends.
#[async_trait]
pub trait BatchStore: Send + Sync {
    /// Persist a newly ingested batch. Fails if the batch already exists.
    async fn create(&self, document: &BatchDocument) -> Result<(), StoreError>;

    /// Load a full batch document.
    async fn load(&self, batch_id: &str) -> Result<BatchDocument, StoreError>;

    /// Atomically mutate one group and persist the batch.
    ///
    /// The mutator runs against the current persisted record; `updated_at`
    /// is refreshed on every call. Sibling groups are written back exactly
    /// as loaded. Returns the group after mutation.
    async fn update_group(
        &self,
        batch_id: &str,
        group_id: &str,
        mutate: GroupMutator,
    ) -> Result<InvoiceGroup, StoreError>;

    /// Known batch ids, most recently modified first.
    async fn list_batches(&self) -> Result<Vec<String>, StoreError>;
}

/// File-backed batch store: `<data_dir>/<batch_id>.json`.
pub struct JsonBatchStore {
    data_dir: PathBuf,
    // Serializes read-modify-write cycles across concurrent group updates.
    write_lock: Mutex<()>,
}

impl JsonBatchStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn batch_path(&self, batch_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", batch_id))
    }

    async fn read_document(&self, path: &Path, batch_id: &str) -> Result<BatchDocument, StoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::BatchNotFound(batch_id.to_string()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Write the document to a temp file next to the target, then rename.
    /// The rename never crosses filesystems, so it is atomic.
    async fn write_document(&self, path: &Path, document: &BatchDocument) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(document)?;
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl BatchStore for JsonBatchStore {
    async fn create(&self, document: &BatchDocument) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.batch_path(&document.batch.id);
        if fs::try_exists(&path).await? {
            return Err(StoreError::BatchAlreadyExists(document.batch.id.clone()));
        }
        self.write_document(&path, document).await
    }

    async fn load(&self, batch_id: &str) -> Result<BatchDocument, StoreError> {
        let path = self.batch_path(batch_id);
        self.read_document(&path, batch_id).await
    }

    async fn update_group(
        &self,
        batch_id: &str,
        group_id: &str,
        mutate: GroupMutator,
    ) -> Result<InvoiceGroup, StoreError> {
        let _guard = self.write_lock.lock().await;
        let path = self.batch_path(batch_id);
        let mut document = self.read_document(&path, batch_id).await?;

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

        self.write_document(&path, &document).await?;
        Ok(updated)
    }

    async fn list_batches(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut found: Vec<(std::time::SystemTime, String)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = entry
                .metadata()
                .await?
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            found.push((modified, stem.to_string()));
        }

        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::types::{Batch, GroupStatus, LineItem, LocationInfo};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn sample_document() -> BatchDocument {
        let period = NaiveDate::parse_from_str("2025-07-01", "%Y-%m-%d").unwrap();
        BatchDocument {
            batch: Batch::new("test.xlsx"),
            groups: vec![
                InvoiceGroup::new(
                    "111",
                    LocationInfo::new("Springfield", "SP"),
                    vec![LineItem::new("PO-1", 10.0, period)],
                ),
                InvoiceGroup::new(
                    "222",
                    LocationInfo::new("Shelbyville", "RJ"),
                    vec![LineItem::new("PO-2", 20.0, period)],
                ),
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_load_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();

        store.create(&doc).await.unwrap();
        let loaded = store.load(&doc.batch.id).await.unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_batch() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();

        store.create(&doc).await.unwrap();
        let result = store.create(&doc).await;
        assert!(matches!(result, Err(StoreError::BatchAlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_load_missing_batch() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let result = store.load("nope").await;
        assert!(matches!(result, Err(StoreError::BatchNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_group_persists_mutation() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();
        store.create(&doc).await.unwrap();

        let before = doc.groups[0].updated_at;
        let updated = store
            .update_group(
                &doc.batch.id,
                "111",
                Box::new(|group| {
                    group.status = GroupStatus::WaitingGeneration;
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, GroupStatus::WaitingGeneration);
        assert!(updated.updated_at >= before);

        let loaded = store.load(&doc.batch.id).await.unwrap();
        assert_eq!(loaded.groups[0].status, GroupStatus::WaitingGeneration);
    }

    #[tokio::test]
    async fn test_update_group_leaves_siblings_untouched() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();
        store.create(&doc).await.unwrap();

        store
            .update_group(
                &doc.batch.id,
                "111",
                Box::new(|group| {
                    group.status = GroupStatus::WaitingGeneration;
                }),
            )
            .await
            .unwrap();

        let loaded = store.load(&doc.batch.id).await.unwrap();
        assert_eq!(loaded.groups[1], doc.groups[1]);
    }

    #[tokio::test]
    async fn test_update_unknown_group() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();
        store.create(&doc).await.unwrap();

        let result = store
            .update_group(&doc.batch.id, "999", Box::new(|_| {}))
            .await;
        assert!(matches!(result, Err(StoreError::GroupNotFound { .. })));
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        let doc = sample_document();
        store.create(&doc).await.unwrap();
        store
            .update_group(&doc.batch.id, "111", Box::new(|_| {}))
            .await
            .unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(temp.path()).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
    }

    #[tokio::test]
    async fn test_list_batches_newest_first() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());

        let older = sample_document();
        store.create(&older).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let newer = sample_document();
        store.create(&newer).await.unwrap();

        let ids = store.list_batches().await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], newer.batch.id);
        assert_eq!(ids[1], older.batch.id);
    }

    #[tokio::test]
    async fn test_list_batches_empty_dir() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path().join("missing"));
        assert!(store.list_batches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = JsonBatchStore::new(temp.path());
        tokio::fs::write(temp.path().join("bad.json"), b"{not json")
            .await
            .unwrap();

        let result = store.load("bad").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
