//! Binary artifact management.
//!
//! Downloads documents through the action API, stores them under
//! collision-free per-(group, reference, kind) names, merges a group's
//! documents into one deterministic container and submits the result.

mod error;
mod manager;
mod merge;
mod store;

pub use error::ArtifactError;
pub use manager::{
    ArtifactManager, DownloadKind, UploadOutcome, DOWNLOAD_ACTION, UPLOAD_ACTION,
};
pub use merge::{merge_files, read_merged_parts, MergeInput, MergeOutcome, MergePart, MERGE_MAGIC};
pub use store::{ArtifactKind, ArtifactStore, StoredArtifact};
