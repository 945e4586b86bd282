//! Artifact file layout and persistence.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::metrics;

use super::error::ArtifactError;

/// What an artifact file holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// The invoice document itself.
    Base,
    /// The regional slip downloaded by the conditional extra step.
    Extra,
    /// The merged container holding every part of a group.
    Merged,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Base => "base",
            ArtifactKind::Extra => "extra",
            ArtifactKind::Merged => "merged",
        }
    }
}

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Owns the artifact directory layout under one root:
/// `<root>/<batch_id>/<tax_id>_<reference>_<kind>.bin`, plus one
/// `<tax_id>_merged.bin` per group.
///
/// The `(tax_id, reference, kind)` triple is the whole file name, so a
/// group with several reference-numbers can never overwrite its own
/// artifacts. Writes are staged to a temp file and renamed into place.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Path for one downloaded artifact.
    pub fn artifact_path(
        &self,
        batch_id: &str,
        tax_id: &str,
        reference: &str,
        kind: ArtifactKind,
    ) -> PathBuf {
        self.root.join(sanitize_component(batch_id)).join(format!(
            "{}_{}_{}.bin",
            sanitize_component(tax_id),
            sanitize_component(reference),
            kind.as_str()
        ))
    }

    /// Path for a group's merged artifact.
    pub fn merged_path(&self, batch_id: &str, tax_id: &str) -> PathBuf {
        self.root
            .join(sanitize_component(batch_id))
            .join(format!("{}_merged.bin", sanitize_component(tax_id)))
    }

    /// Store one downloaded artifact and return its metadata.
    pub async fn save(
        &self,
        batch_id: &str,
        tax_id: &str,
        reference: &str,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<StoredArtifact, ArtifactError> {
        let path = self.artifact_path(batch_id, tax_id, reference, kind);
        self.write_atomic(&path, bytes).await?;

        let stored = StoredArtifact {
            path: path.display().to_string(),
            size_bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(bytes)),
        };
        metrics::ARTIFACTS_STORED
            .with_label_values(&[kind.as_str()])
            .inc();
        metrics::ARTIFACT_BYTES
            .with_label_values(&[kind.as_str()])
            .observe(bytes.len() as f64);
        debug!(
            path = %stored.path,
            size_bytes = stored.size_bytes,
            sha256 = %stored.sha256,
            "Artifact stored"
        );
        Ok(stored)
    }

    /// Read a stored artifact back.
    pub async fn read_bytes(&self, path: &Path) -> Result<Vec<u8>, ArtifactError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::Missing {
                path: path.display().to_string(),
            }),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    /// Size of a stored artifact in bytes.
    pub async fn file_size(&self, path: &Path) -> Result<u64, ArtifactError> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::Missing {
                path: path.display().to_string(),
            }),
            Err(e) => Err(ArtifactError::Io(e)),
        }
    }

    pub(super) async fn write_atomic(
        &self,
        path: &Path,
        bytes: &[u8],
    ) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// Keep path components to a safe alphabet.
fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
