//! Downloads, merges and uploads a group's binary artifacts.

use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::action::{ActionClient, ActionRequest, ArtifactPayload};
use crate::batch::{ExtraDocKind, InvoiceGroup, LineItem};

use super::error::ArtifactError;
use super::merge::{merge_files, MergeInput, MergeOutcome};
use super::store::{ArtifactKind, ArtifactStore, StoredArtifact};

/// Action that fetches a group's base invoice document.
pub const DOWNLOAD_ACTION: &str = "download_invoice";

/// Action that submits a merged artifact.
pub const UPLOAD_ACTION: &str = "upload_invoice";

/// Which document a download fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Base,
    Extra(ExtraDocKind),
}

impl DownloadKind {
    pub fn action(&self) -> &'static str {
        match self {
            DownloadKind::Base => DOWNLOAD_ACTION,
            DownloadKind::Extra(kind) => kind.action(),
        }
    }

    pub fn artifact_kind(&self) -> ArtifactKind {
        match self {
            DownloadKind::Base => ArtifactKind::Base,
            DownloadKind::Extra(_) => ArtifactKind::Extra,
        }
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Protocol reference returned by the upload action.
    pub result_reference: String,
    /// Size of the submitted artifact.
    pub size_bytes: u64,
}

/// Fetches binary documents through the action API, stores them under
/// collision-free names, merges them deterministically and submits the
/// merged result.
pub struct ArtifactManager {
    actions: Arc<dyn ActionClient>,
    store: ArtifactStore,
}

impl ArtifactManager {
    pub fn new(actions: Arc<dyn ActionClient>, store: ArtifactStore) -> Self {
        Self { actions, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Download one document for one line item and store it.
    ///
    /// The line item must already carry the document id produced by the
    /// collection step.
    pub async fn download(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        item: &LineItem,
        kind: DownloadKind,
    ) -> Result<StoredArtifact, ArtifactError> {
        let document_id =
            item.document_id
                .as_deref()
                .ok_or_else(|| ArtifactError::MissingDocumentId {
                    reference: item.reference.clone(),
                })?;

        let request = ActionRequest::new(
            kind.action(),
            json!({
                "tax_id": group.tax_id,
                "reference": item.reference,
                "document_id": document_id,
            }),
        );
        let output = self.actions.invoke(&request).await?;
        let bytes = output
            .into_artifact()
            .ok_or_else(|| ArtifactError::NoArtifactReturned {
                reference: item.reference.clone(),
            })?;
        self.store
            .save(
                batch_id,
                &group.tax_id,
                &item.reference,
                kind.artifact_kind(),
                &bytes,
            )
            .await
    }

    /// Merge a group's stored artifacts into one container.
    ///
    /// Ordering is fixed: base documents in line item order, then extra
    /// documents in the same order. References whose artifact path was
    /// never recorded fall back to the layout-derived path, so they go
    /// through the same logged-and-skipped handling as deleted files.
    pub async fn merge_group(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
    ) -> Result<MergeOutcome, ArtifactError> {
        let mut inputs = Vec::new();
        for item in &group.line_items {
            inputs.push(MergeInput::new(
                format!("{}_base", item.reference),
                self.recorded_or_expected(batch_id, group, item, ArtifactKind::Base),
            ));
        }
        if group.requires_extra {
            for item in &group.line_items {
                inputs.push(MergeInput::new(
                    format!("{}_extra", item.reference),
                    self.recorded_or_expected(batch_id, group, item, ArtifactKind::Extra),
                ));
            }
        }

        let output = self.store.merged_path(batch_id, &group.tax_id);
        merge_files(&self.store, &group.tax_id, &inputs, &output).await
    }

    /// Submit a group's merged artifact under its first reference-number.
    pub async fn upload_group(
        &self,
        group: &InvoiceGroup,
        max_upload_bytes: u64,
    ) -> Result<UploadOutcome, ArtifactError> {
        let merged_path = group
            .merged_artifact
            .as_deref()
            .ok_or_else(|| ArtifactError::NotMerged {
                tax_id: group.tax_id.clone(),
            })?;
        let bytes = self.store.read_bytes(Path::new(merged_path)).await?;
        let size_bytes = bytes.len() as u64;
        if size_bytes > max_upload_bytes {
            return Err(ArtifactError::Oversize {
                size_bytes,
                limit_bytes: max_upload_bytes,
            });
        }

        let reference = group.first_reference().unwrap_or(&group.tax_id);
        let request = ActionRequest::new(
            UPLOAD_ACTION,
            json!({
                "tax_id": group.tax_id,
                "reference": reference,
                "references": group.references(),
                "total_value": group.total_value,
                "period_start": group.period_start,
                "period_end": group.period_end,
            }),
        );
        let payload = ArtifactPayload {
            filename: format!("{}_merged.bin", group.tax_id),
            bytes,
        };
        let output = self.actions.invoke_with_artifact(&request, payload).await?;
        let result_reference = output
            .result_str("protocol")
            .ok_or_else(|| ArtifactError::MissingProtocol {
                reference: reference.to_string(),
            })?
            .to_string();

        info!(
            tax_id = %group.tax_id,
            reference,
            protocol = %result_reference,
            size_bytes,
            "Uploaded merged artifact"
        );
        Ok(UploadOutcome {
            result_reference,
            size_bytes,
        })
    }

    fn recorded_or_expected(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        item: &LineItem,
        kind: ArtifactKind,
    ) -> PathBuf {
        let recorded = group.artifacts.get(&item.reference).and_then(|refs| {
            match kind {
                ArtifactKind::Base => refs.base.as_deref(),
                ArtifactKind::Extra => refs.extra.as_deref(),
                ArtifactKind::Merged => None,
            }
        });
        match recorded {
            Some(path) => PathBuf::from(path),
            None => self
                .store
                .artifact_path(batch_id, &group.tax_id, &item.reference, kind),
        }
    }
}
