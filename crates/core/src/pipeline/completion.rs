//! Completion writer: the single funnel for group mutations.
//!
//! The executor never touches the store directly. Successful steps build a
//! [`StepCommit`] that is applied and persisted atomically; failures are
//! recorded without moving the status, which is what lets the next run
//! resume from the last good stage.

use std::sync::Arc;

use crate::batch::{BatchStore, GroupStatus, InvoiceGroup, StepFailure, StoreError};

/// Everything a successful step persists along with its status advance.
#[derive(Debug, Clone)]
pub struct StepCommit {
    /// Status the group advances to.
    pub target: GroupStatus,

    /// Document ids collected per reference-number.
    pub document_ids: Vec<(String, String)>,

    /// Base artifact paths stored per reference-number.
    pub base_artifacts: Vec<(String, String)>,

    /// Extra artifact paths stored per reference-number.
    pub extra_artifacts: Vec<(String, String)>,

    /// Merged artifact path, set by the merge step.
    pub merged_artifact: Option<String>,

    /// Result reference extracted from the upload response.
    pub result_reference: Option<String>,
}

impl StepCommit {
    /// A commit that only advances the status.
    pub fn advance_to(target: GroupStatus) -> Self {
        Self {
            target,
            document_ids: Vec::new(),
            base_artifacts: Vec::new(),
            extra_artifacts: Vec::new(),
            merged_artifact: None,
            result_reference: None,
        }
    }

    /// Apply the commit to a group record.
    ///
    /// Any stale failure record is cleared: completing a step is proof the
    /// group is moving again.
    pub fn apply(&self, group: &mut InvoiceGroup) {
        for (reference, document_id) in &self.document_ids {
            if let Some(item) = group
                .line_items
                .iter_mut()
                .find(|item| &item.reference == reference)
            {
                item.document_id = Some(document_id.clone());
            }
        }
        for (reference, path) in &self.base_artifacts {
            group.artifacts.entry(reference.clone()).or_default().base = Some(path.clone());
        }
        for (reference, path) in &self.extra_artifacts {
            group.artifacts.entry(reference.clone()).or_default().extra = Some(path.clone());
        }
        if let Some(path) = &self.merged_artifact {
            group.merged_artifact = Some(path.clone());
        }
        if let Some(reference) = &self.result_reference {
            group.result_reference = Some(reference.clone());
        }
        group.status = self.target;
        group.failure = None;
    }
}

/// Persists step outcomes through the batch store.
#[derive(Clone)]
pub struct CompletionWriter {
    store: Arc<dyn BatchStore>,
}

impl CompletionWriter {
    pub fn new(store: Arc<dyn BatchStore>) -> Self {
        Self { store }
    }

    /// Apply and persist a successful step. Returns the group as persisted.
    pub async fn commit_step(
        &self,
        batch_id: &str,
        group_id: &str,
        commit: StepCommit,
    ) -> Result<InvoiceGroup, StoreError> {
        self.store
            .update_group(batch_id, group_id, Box::new(move |group| commit.apply(group)))
            .await
    }

    /// Record a step failure without moving the status.
    pub async fn record_failure(
        &self,
        batch_id: &str,
        group_id: &str,
        failure: StepFailure,
    ) -> Result<InvoiceGroup, StoreError> {
        self.store
            .update_group(
                batch_id,
                group_id,
                Box::new(move |group| {
                    group.failure = Some(failure);
                }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StepName;
    use crate::testing::{fixtures, InMemoryBatchStore};

    async fn seeded_store(groups: Vec<InvoiceGroup>) -> (Arc<dyn BatchStore>, String) {
        let store: Arc<dyn BatchStore> = Arc::new(InMemoryBatchStore::new());
        let document = fixtures::batch_document(groups);
        let batch_id = document.batch.id.clone();
        store.create(&document).await.unwrap();
        (store, batch_id)
    }

    #[tokio::test]
    async fn test_commit_advances_status_and_applies_fields() {
        let group = fixtures::invoice_group("11222333000144", &["PO-1", "PO-2"]);
        let (store, batch_id) = seeded_store(vec![group]).await;
        let writer = CompletionWriter::new(Arc::clone(&store));

        let mut commit = StepCommit::advance_to(GroupStatus::Generated);
        commit.document_ids = vec![
            ("PO-1".to_string(), "DOC-1".to_string()),
            ("PO-2".to_string(), "DOC-2".to_string()),
        ];

        let updated = writer
            .commit_step(&batch_id, "11222333000144", commit)
            .await
            .unwrap();

        assert_eq!(updated.status, GroupStatus::Generated);
        assert_eq!(updated.line_items[0].document_id.as_deref(), Some("DOC-1"));
        assert_eq!(updated.line_items[1].document_id.as_deref(), Some("DOC-2"));

        // Persisted, not just returned.
        let document = store.load(&batch_id).await.unwrap();
        assert_eq!(document.groups[0].status, GroupStatus::Generated);
    }

    #[tokio::test]
    async fn test_commit_records_artifact_paths() {
        let group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        let (store, batch_id) = seeded_store(vec![group]).await;
        let writer = CompletionWriter::new(store);

        let mut commit = StepCommit::advance_to(GroupStatus::Downloaded);
        commit.base_artifacts = vec![("PO-1".to_string(), "/a/base.bin".to_string())];
        let updated = writer
            .commit_step(&batch_id, "11222333000144", commit)
            .await
            .unwrap();
        assert_eq!(
            updated.artifacts["PO-1"].base.as_deref(),
            Some("/a/base.bin")
        );

        let mut commit = StepCommit::advance_to(GroupStatus::ExtraDownloaded);
        commit.extra_artifacts = vec![("PO-1".to_string(), "/a/extra.bin".to_string())];
        let updated = writer
            .commit_step(&batch_id, "11222333000144", commit)
            .await
            .unwrap();

        // Base path survives the extra commit.
        assert_eq!(
            updated.artifacts["PO-1"].base.as_deref(),
            Some("/a/base.bin")
        );
        assert_eq!(
            updated.artifacts["PO-1"].extra.as_deref(),
            Some("/a/extra.bin")
        );
    }

    #[tokio::test]
    async fn test_commit_clears_stale_failure() {
        let mut group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        group.failure = Some(StepFailure::new(
            StepName::Generate,
            "generate_invoice",
            "HTTP 500",
        ));
        let (store, batch_id) = seeded_store(vec![group]).await;
        let writer = CompletionWriter::new(store);

        let updated = writer
            .commit_step(
                &batch_id,
                "11222333000144",
                StepCommit::advance_to(GroupStatus::WaitingGeneration),
            )
            .await
            .unwrap();

        assert!(updated.failure.is_none());
    }

    #[tokio::test]
    async fn test_record_failure_keeps_status() {
        let mut group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        group.status = GroupStatus::Generated;
        let (store, batch_id) = seeded_store(vec![group]).await;
        let writer = CompletionWriter::new(store);

        let updated = writer
            .record_failure(
                &batch_id,
                "11222333000144",
                StepFailure::new(StepName::Download, "download_invoice", "timed out"),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, GroupStatus::Generated);
        let failure = updated.failure.unwrap();
        assert_eq!(failure.step, StepName::Download);
        assert_eq!(failure.error, "timed out");
    }

    #[tokio::test]
    async fn test_commit_stores_merged_and_result_reference() {
        let mut group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        group.status = GroupStatus::Merged;
        group.merged_artifact = Some("/a/merged.bin".to_string());
        let (store, batch_id) = seeded_store(vec![group]).await;
        let writer = CompletionWriter::new(store);

        let mut commit = StepCommit::advance_to(GroupStatus::Uploaded);
        commit.result_reference = Some("PROT-42".to_string());
        let updated = writer
            .commit_step(&batch_id, "11222333000144", commit)
            .await
            .unwrap();

        assert_eq!(updated.status, GroupStatus::Uploaded);
        assert_eq!(updated.result_reference.as_deref(), Some("PROT-42"));
        // The merged path set earlier is untouched by a commit without one.
        assert_eq!(updated.merged_artifact.as_deref(), Some("/a/merged.bin"));
    }
}
