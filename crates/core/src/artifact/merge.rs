//! Deterministic merge of group artifacts into a single container file.
//!
//! The container is a flat part stream: an 8-byte magic, a little-endian
//! part count, then for each part its index, name and raw bytes. Part
//! order is fixed by the caller (base artifacts in reference-number
//! order, then extra artifacts in the same order), so merging the same
//! inputs always yields byte-identical output.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::metrics;

use super::error::ArtifactError;
use super::store::ArtifactStore;

pub const MERGE_MAGIC: &[u8; 8] = b"BRMERGE1";

/// One file selected for merging.
#[derive(Debug, Clone)]
pub struct MergeInput {
    pub name: String,
    pub path: PathBuf,
}

impl MergeInput {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// One decoded part of a merged container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePart {
    pub index: u32,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub path: String,
    pub parts: u32,
    pub skipped: Vec<String>,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Merge the given inputs, in order, into `output`.
///
/// Inputs whose file is missing are logged and skipped. Fails only when
/// no input could be read at all.
pub async fn merge_files(
    store: &ArtifactStore,
    tax_id: &str,
    inputs: &[MergeInput],
    output: &Path,
) -> Result<MergeOutcome, ArtifactError> {
    let mut parts: Vec<MergePart> = Vec::new();
    let mut skipped = Vec::new();

    for input in inputs {
        match store.read_bytes(&input.path).await {
            Ok(bytes) => {
                parts.push(MergePart {
                    index: parts.len() as u32,
                    name: input.name.clone(),
                    bytes,
                });
            }
            Err(ArtifactError::Missing { path }) => {
                warn!(part = %input.name, path = %path, "Skipping missing artifact in merge");
                metrics::ARTIFACTS_MISSING.inc();
                skipped.push(input.name.clone());
            }
            Err(e) => return Err(e),
        }
    }

    if parts.is_empty() {
        return Err(ArtifactError::NothingToMerge {
            tax_id: tax_id.to_string(),
        });
    }

    let container = encode_container(&parts);
    store.write_atomic(output, &container).await?;

    metrics::ARTIFACTS_STORED
        .with_label_values(&["merged"])
        .inc();
    metrics::ARTIFACT_BYTES
        .with_label_values(&["merged"])
        .observe(container.len() as f64);

    let outcome = MergeOutcome {
        path: output.display().to_string(),
        parts: parts.len() as u32,
        skipped,
        size_bytes: container.len() as u64,
        sha256: format!("{:x}", Sha256::digest(&container)),
    };
    debug!(
        path = %outcome.path,
        parts = outcome.parts,
        skipped = outcome.skipped.len(),
        size_bytes = outcome.size_bytes,
        "Merged artifacts"
    );
    Ok(outcome)
}

fn encode_container(parts: &[MergePart]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MERGE_MAGIC);
    out.extend_from_slice(&(parts.len() as u32).to_le_bytes());
    for part in parts {
        out.extend_from_slice(&part.index.to_le_bytes());
        let name = part.name.as_bytes();
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&(part.bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&part.bytes);
    }
    out
}

/// Decode a merged container back into its parts.
pub fn read_merged_parts(path: &Path, bytes: &[u8]) -> Result<Vec<MergePart>, ArtifactError> {
    let mut cursor = Cursor::new(path, bytes);

    let magic = cursor.take(MERGE_MAGIC.len())?;
    if magic != MERGE_MAGIC {
        return Err(cursor.invalid("bad magic"));
    }

    let count = cursor.u32_le()?;
    let mut parts = Vec::with_capacity(count as usize);
    for expected in 0..count {
        let index = cursor.u32_le()?;
        if index != expected {
            return Err(cursor.invalid(format!(
                "part index {} out of order, expected {}",
                index, expected
            )));
        }
        let name_len = cursor.u16_le()? as usize;
        let name = String::from_utf8(cursor.take(name_len)?.to_vec())
            .map_err(|_| cursor.invalid("part name is not valid UTF-8"))?;
        let data_len = cursor.u64_le()? as usize;
        let bytes = cursor.take(data_len)?.to_vec();
        parts.push(MergePart { index, name, bytes });
    }

    if !cursor.is_empty() {
        return Err(cursor.invalid("trailing bytes after last part"));
    }
    Ok(parts)
}

struct Cursor<'a> {
    path: &'a Path,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(path: &'a Path, bytes: &'a [u8]) -> Self {
        Self { path, bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ArtifactError> {
        if self.pos + n > self.bytes.len() {
            return Err(self.invalid("truncated container"));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16_le(&mut self) -> Result<u16, ArtifactError> {
        let raw = self.take(2)?;
        Ok(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn u32_le(&mut self) -> Result<u32, ArtifactError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn u64_le(&mut self) -> Result<u64, ArtifactError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn invalid(&self, reason: impl Into<String>) -> ArtifactError {
        ArtifactError::InvalidContainer {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::store::ArtifactKind;
    use tempfile::TempDir;

    async fn seed(store: &ArtifactStore, reference: &str, kind: ArtifactKind, bytes: &[u8]) -> MergeInput {
        let stored = store.save("b1", "111", reference, kind, bytes).await.unwrap();
        MergeInput::new(
            format!("{}_{}", reference, kind.as_str()),
            PathBuf::from(stored.path),
        )
    }

    #[tokio::test]
    async fn test_merge_preserves_input_order() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let mut inputs = Vec::new();
        for reference in ["A0", "A1", "A2"] {
            inputs.push(seed(&store, reference, ArtifactKind::Base, reference.as_bytes()).await);
        }
        for reference in ["A0", "A1", "A2"] {
            inputs.push(seed(&store, reference, ArtifactKind::Extra, format!("x-{}", reference).as_bytes()).await);
        }

        let output = store.merged_path("b1", "111");
        let outcome = merge_files(&store, "111", &inputs, &output).await.unwrap();
        assert_eq!(outcome.parts, 6);
        assert!(outcome.skipped.is_empty());

        let bytes = store.read_bytes(&output).await.unwrap();
        let parts = read_merged_parts(&output, &bytes).unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["A0_base", "A1_base", "A2_base", "A0_extra", "A1_extra", "A2_extra"]
        );
        assert_eq!(parts[0].bytes, b"A0");
        assert_eq!(parts[3].bytes, b"x-A0");
    }

    #[tokio::test]
    async fn test_repeated_merge_is_byte_identical() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let mut inputs = Vec::new();
        for reference in ["PO-1", "PO-2", "PO-3"] {
            inputs.push(seed(&store, reference, ArtifactKind::Base, reference.as_bytes()).await);
        }

        let output = store.merged_path("b1", "111");
        let first = merge_files(&store, "111", &inputs, &output).await.unwrap();
        let second = merge_files(&store, "111", &inputs, &output).await.unwrap();
        assert_eq!(first.sha256, second.sha256);
        assert_eq!(first.size_bytes, second.size_bytes);
    }

    #[tokio::test]
    async fn test_missing_input_is_skipped() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let present = seed(&store, "PO-1", ArtifactKind::Base, b"one").await;
        let missing = MergeInput::new("PO-2_base", temp.path().join("b1/absent.bin"));

        let output = store.merged_path("b1", "111");
        let outcome = merge_files(&store, "111", &[present, missing], &output)
            .await
            .unwrap();
        assert_eq!(outcome.parts, 1);
        assert_eq!(outcome.skipped, vec!["PO-2_base".to_string()]);

        let bytes = store.read_bytes(&output).await.unwrap();
        let parts = read_merged_parts(&output, &bytes).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name, "PO-1_base");
    }

    #[tokio::test]
    async fn test_merge_fails_when_nothing_readable() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let inputs = vec![
            MergeInput::new("PO-1_base", temp.path().join("b1/gone-1.bin")),
            MergeInput::new("PO-2_base", temp.path().join("b1/gone-2.bin")),
        ];
        let output = store.merged_path("b1", "111");
        let result = merge_files(&store, "111", &inputs, &output).await;
        assert!(matches!(
            result,
            Err(ArtifactError::NothingToMerge { tax_id }) if tax_id == "111"
        ));
        assert!(store.read_bytes(&output).await.is_err());
    }

    #[test]
    fn test_read_rejects_bad_magic() {
        let path = PathBuf::from("/tmp/m.bin");
        let result = read_merged_parts(&path, b"NOTMERGE\x00\x00\x00\x00");
        assert!(matches!(
            result,
            Err(ArtifactError::InvalidContainer { reason, .. }) if reason == "bad magic"
        ));
    }

    #[test]
    fn test_read_rejects_truncated_container() {
        let parts = vec![MergePart {
            index: 0,
            name: "part".to_string(),
            bytes: b"data".to_vec(),
        }];
        let mut encoded = encode_container(&parts);
        encoded.truncate(encoded.len() - 2);

        let path = PathBuf::from("/tmp/m.bin");
        let result = read_merged_parts(&path, &encoded);
        assert!(matches!(
            result,
            Err(ArtifactError::InvalidContainer { reason, .. }) if reason == "truncated container"
        ));
    }

    #[test]
    fn test_read_rejects_trailing_bytes() {
        let parts = vec![MergePart {
            index: 0,
            name: "part".to_string(),
            bytes: b"data".to_vec(),
        }];
        let mut encoded = encode_container(&parts);
        encoded.push(0xFF);

        let path = PathBuf::from("/tmp/m.bin");
        let result = read_merged_parts(&path, &encoded);
        assert!(matches!(
            result,
            Err(ArtifactError::InvalidContainer { reason, .. }) if reason == "trailing bytes after last part"
        ));
    }
}
