//! Artifact error types.

use thiserror::Error;

use crate::action::ActionError;

/// Error type for artifact operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact missing: {path}")]
    Missing { path: String },

    #[error("line item {reference} has no document id")]
    MissingDocumentId { reference: String },

    #[error("download returned no artifact for {reference}")]
    NoArtifactReturned { reference: String },

    #[error("no artifacts available to merge for group {tax_id}")]
    NothingToMerge { tax_id: String },

    #[error("invalid merged container {path}: {reason}")]
    InvalidContainer { path: String, reason: String },

    #[error("merged artifact is {size_bytes} bytes, over the {limit_bytes} byte upload limit")]
    Oversize { size_bytes: u64, limit_bytes: u64 },

    #[error("group {tax_id} has no merged artifact to upload")]
    NotMerged { tax_id: String },

    #[error("upload response for {reference} is missing the protocol reference")]
    MissingProtocol { reference: String },

    #[error("action call failed: {0}")]
    Action(#[from] ActionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
