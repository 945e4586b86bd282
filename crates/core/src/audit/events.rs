use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // Run lifecycle
    RunStarted {
        batch_id: String,
        version: String,
        config_hash: String,
        /// Groups in the batch, terminal ones included
        groups_total: u32,
    },
    RunCompleted {
        batch_id: String,
        /// Groups that advanced at least one step without failing
        succeeded: u32,
        /// Groups left frozen at their last good status
        failed: u32,
        /// Groups that were already terminal when the run started
        already_done: u32,
        duration_ms: u64,
    },

    // Group lifecycle
    GroupStatusChanged {
        batch_id: String,
        group_id: String,
        from_status: String,
        to_status: String,
    },

    // Pipeline step events
    StepStarted {
        batch_id: String,
        group_id: String,
        step: String,
        action: String,
        /// Reference-numbers this step will touch (1 for per-group steps)
        items: u32,
    },
    StepCompleted {
        batch_id: String,
        group_id: String,
        step: String,
        action: String,
        items: u32,
        duration_ms: u64,
    },
    /// A conditional step did not apply; the status advanced without a call.
    StepSkipped {
        batch_id: String,
        group_id: String,
        step: String,
        reason: String,
    },
    StepFailed {
        batch_id: String,
        group_id: String,
        step: String,
        action: String,
        error: String,
        /// The reference-number whose invocation failed, for itemized steps
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_reference: Option<String>,
    },

    // Registry lookups
    LookupResolved {
        batch_id: String,
        tax_id: String,
        city: String,
        state: String,
        /// Whether the result came from the batch cache
        cache_hit: bool,
    },

    // Artifact events
    ArtifactStored {
        batch_id: String,
        group_id: String,
        reference: String,
        /// "base", "extra" or "merged"
        kind: String,
        path: String,
        size_bytes: u64,
    },
    /// A stored artifact was expected but absent at merge time.
    ArtifactMissing {
        batch_id: String,
        group_id: String,
        part: String,
    },
    MergeCompleted {
        batch_id: String,
        group_id: String,
        parts: u32,
        skipped: u32,
        size_bytes: u64,
    },
    UploadCompleted {
        batch_id: String,
        group_id: String,
        /// Representative reference-number the artifact was submitted under
        reference: String,
        /// Protocol reference returned by the upload action
        protocol: String,
        size_bytes: u64,
    },
}

impl AuditEvent {
    /// Returns the event type as a string for storage
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunCompleted { .. } => "run_completed",
            Self::GroupStatusChanged { .. } => "group_status_changed",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::StepFailed { .. } => "step_failed",
            Self::LookupResolved { .. } => "lookup_resolved",
            Self::ArtifactStored { .. } => "artifact_stored",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::MergeCompleted { .. } => "merge_completed",
            Self::UploadCompleted { .. } => "upload_completed",
        }
    }

    /// The batch this event belongs to
    pub fn batch_id(&self) -> &str {
        match self {
            Self::RunStarted { batch_id, .. }
            | Self::RunCompleted { batch_id, .. }
            | Self::GroupStatusChanged { batch_id, .. }
            | Self::StepStarted { batch_id, .. }
            | Self::StepCompleted { batch_id, .. }
            | Self::StepSkipped { batch_id, .. }
            | Self::StepFailed { batch_id, .. }
            | Self::LookupResolved { batch_id, .. }
            | Self::ArtifactStored { batch_id, .. }
            | Self::ArtifactMissing { batch_id, .. }
            | Self::MergeCompleted { batch_id, .. }
            | Self::UploadCompleted { batch_id, .. } => batch_id,
        }
    }

    /// Extract the group id (tax id) if this event is group-scoped
    pub fn group_id(&self) -> Option<&str> {
        match self {
            Self::GroupStatusChanged { group_id, .. }
            | Self::StepStarted { group_id, .. }
            | Self::StepCompleted { group_id, .. }
            | Self::StepSkipped { group_id, .. }
            | Self::StepFailed { group_id, .. }
            | Self::ArtifactStored { group_id, .. }
            | Self::ArtifactMissing { group_id, .. }
            | Self::MergeCompleted { group_id, .. }
            | Self::UploadCompleted { group_id, .. } => Some(group_id),
            // The group key is the tax id
            Self::LookupResolved { tax_id, .. } => Some(tax_id),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }
}

/// A stored audit record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub batch_id: Option<String>,
    pub group_id: Option<String>,
    pub data: AuditEvent,
}
