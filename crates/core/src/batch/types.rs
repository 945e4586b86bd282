//! Core batch and invoice group data types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location value cached when the registry lookup fails permanently.
pub const UNKNOWN_LOCATION: &str = "UNKNOWN";

// ============================================================================
// Batch
// ============================================================================

/// One processing run's dataset. Created at ingestion, read-only afterward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    /// Unique identifier (UUID).
    pub id: String,

    /// Free-form origin label (e.g. the ingested spreadsheet name).
    pub source: String,

    /// When the batch was created.
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Create a new batch with a random id.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}

/// The persisted shape of a batch file: metadata plus all group records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchDocument {
    pub batch: Batch,
    pub groups: Vec<InvoiceGroup>,
}

// ============================================================================
// Group status
// ============================================================================

/// Processing status of an invoice group.
///
/// Pipeline order:
/// ```text
/// Pending -> WaitingGeneration -> Generated -> Downloaded
///         -> ExtraDownloaded (skipped when no extra document is required)
///         -> Merged -> Uploaded
/// ```
///
/// Transitions only move forward. A failed step leaves the status at the
/// last completed stage and records a [`StepFailure`] instead, so the next
/// run retries from the same point. Variant order is meaningful: the
/// derived `Ord` follows pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Ingested, nothing executed yet.
    Pending,
    /// Generation job started, document ids not yet retrievable.
    WaitingGeneration,
    /// Document ids collected for every line item.
    Generated,
    /// Base artifact downloaded for every line item.
    Downloaded,
    /// Extra (regional) artifact downloaded for every line item.
    ExtraDownloaded,
    /// All artifacts merged into one file.
    Merged,
    /// Merged artifact submitted, result reference stored (terminal).
    Uploaded,
}

impl GroupStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupStatus::Uploaded)
    }

    /// Returns the status as a string (for filtering and logs).
    pub fn status_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::WaitingGeneration => "waiting_generation",
            GroupStatus::Generated => "generated",
            GroupStatus::Downloaded => "downloaded",
            GroupStatus::ExtraDownloaded => "extra_downloaded",
            GroupStatus::Merged => "merged",
            GroupStatus::Uploaded => "uploaded",
        }
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status_str())
    }
}

// ============================================================================
// Steps and failures
// ============================================================================

/// Identifies a pipeline step in failure records and audit events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Generate,
    Collect,
    Download,
    ExtraDownload,
    Merge,
    Upload,
}

impl StepName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepName::Generate => "generate",
            StepName::Collect => "collect",
            StepName::Download => "download",
            StepName::ExtraDownload => "extra_download",
            StepName::Merge => "merge",
            StepName::Upload => "upload",
        }
    }

    /// Label used in reports for a failure at this step.
    pub fn failure_label(&self) -> &'static str {
        match self {
            StepName::Generate => "failed_generation",
            StepName::Collect => "failed_collect",
            StepName::Download => "failed_download",
            StepName::ExtraDownload => "failed_extra_download",
            StepName::Merge => "failed_merge",
            StepName::Upload => "failed_upload",
        }
    }
}

impl std::fmt::Display for StepName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record of the most recent step failure for a group.
///
/// The group's `status` field stays at the last completed stage; this record
/// is informational and is cleared as soon as a later run completes any step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepFailure {
    /// Step that failed.
    pub step: StepName,

    /// Action name that was being invoked, empty for local steps.
    pub action: String,

    /// Error description.
    pub error: String,

    pub failed_at: DateTime<Utc>,
}

impl StepFailure {
    pub fn new(step: StepName, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step,
            action: action.into(),
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Location and extra document routing
// ============================================================================

/// Location metadata resolved from the tax-id registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationInfo {
    pub city: String,
    pub state: String,

    /// Raw registry payload, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl LocationInfo {
    pub fn new(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            state: state.into(),
            raw: None,
        }
    }

    /// Failure marker cached when the registry cannot resolve an id.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_LOCATION, UNKNOWN_LOCATION)
    }

    pub fn is_unknown(&self) -> bool {
        self.city == UNKNOWN_LOCATION && self.state == UNKNOWN_LOCATION
    }

    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Which extra regional document a group needs, decided once at ingestion
/// from the resolved location and never recomputed mid-pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtraDocKind {
    /// State-level collection slip.
    StateSlip,
    /// Municipal collection slip.
    MunicipalSlip,
}

impl ExtraDocKind {
    /// Action invoked to download this document kind.
    pub fn action(&self) -> &'static str {
        match self {
            ExtraDocKind::StateSlip => "download_state_slip",
            ExtraDocKind::MunicipalSlip => "download_municipal_slip",
        }
    }
}

// ============================================================================
// Line items and groups
// ============================================================================

/// One reference-number (purchase order) within a group.
///
/// Immutable once created, except for `document_id` which the collect step
/// sets exactly once after the external generation job finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    /// Reference-number, unique within the group.
    pub reference: String,

    /// External document id produced by generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    /// Invoiced value.
    pub value: f64,

    /// Accounting period this item belongs to.
    pub period: NaiveDate,
}

impl LineItem {
    pub fn new(reference: impl Into<String>, value: f64, period: NaiveDate) -> Self {
        Self {
            reference: reference.into(),
            document_id: None,
            value,
            period,
        }
    }
}

/// Artifact paths stored for one reference-number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ArtifactRefs {
    /// Base document artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// Extra (regional) document artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
}

/// The unit the pipeline advances as a whole: all line items invoiced
/// against one tax id.
///
/// Groups are created at ingestion, mutated only through the completion
/// writer, and never deleted; terminal and failed groups stay in the batch
/// file as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceGroup {
    /// Normalized (digits-only) tax identifier; the aggregation key.
    pub tax_id: String,

    /// Location resolved once at ingestion.
    pub location: LocationInfo,

    /// Ordered line items. Order is load-bearing: itemized steps and the
    /// merge walk this list in order, and upload uses the first entry as
    /// the representative reference.
    pub line_items: Vec<LineItem>,

    /// Sum of line item values.
    pub total_value: f64,

    /// Earliest line item period.
    pub period_start: NaiveDate,

    /// Latest line item period.
    pub period_end: NaiveDate,

    /// Current pipeline status.
    pub status: GroupStatus,

    /// Whether the conditional extra download applies to this group.
    #[serde(default)]
    pub requires_extra: bool,

    /// Which extra document kind applies, when `requires_extra` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_kind: Option<ExtraDocKind>,

    /// Stored artifact paths keyed by reference-number. A BTreeMap keeps
    /// the persisted JSON stable across rewrites.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, ArtifactRefs>,

    /// Path of the merged artifact, set by the merge step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_artifact: Option<String>,

    /// Protocol reference returned by the upload, set only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_reference: Option<String>,

    /// Most recent step failure, cleared on the next successful step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,

    /// Last persisted mutation.
    pub updated_at: DateTime<Utc>,
}

impl InvoiceGroup {
    /// Create a group in the initial status, computing the value and period
    /// aggregates from the line items.
    pub fn new(tax_id: impl Into<String>, location: LocationInfo, line_items: Vec<LineItem>) -> Self {
        let total_value = line_items.iter().map(|item| item.value).sum();
        let period_start = line_items
            .iter()
            .map(|item| item.period)
            .min()
            .unwrap_or_default();
        let period_end = line_items
            .iter()
            .map(|item| item.period)
            .max()
            .unwrap_or_default();
        Self {
            tax_id: normalize_tax_id(&tax_id.into()),
            location,
            line_items,
            total_value,
            period_start,
            period_end,
            status: GroupStatus::Pending,
            requires_extra: false,
            extra_kind: None,
            artifacts: BTreeMap::new(),
            merged_artifact: None,
            result_reference: None,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    /// Mark the group as needing the given extra document.
    pub fn with_extra(mut self, kind: ExtraDocKind) -> Self {
        self.requires_extra = true;
        self.extra_kind = Some(kind);
        self
    }

    /// Reference-numbers in line item order.
    pub fn references(&self) -> Vec<&str> {
        self.line_items
            .iter()
            .map(|item| item.reference.as_str())
            .collect()
    }

    /// The representative reference-number used for the upload.
    pub fn first_reference(&self) -> Option<&str> {
        self.line_items.first().map(|item| item.reference.as_str())
    }

    /// Returns why this group cannot be processed, if anything.
    ///
    /// Invalid groups are excluded from routing and reported at batch level;
    /// their persisted state is never touched.
    pub fn validation_error(&self) -> Option<String> {
        if self.tax_id.is_empty() {
            return Some("empty tax id".to_string());
        }
        if self.line_items.is_empty() {
            return Some("no line items".to_string());
        }
        if self.requires_extra && self.extra_kind.is_none() {
            return Some("extra document required but kind missing".to_string());
        }
        None
    }
}

/// Strip everything but digits from a raw tax identifier.
pub fn normalize_tax_id(raw: &str) -> String {
    regex_lite::Regex::new(r"\D")
        .map(|re| re.replace_all(raw, "").into_owned())
        .unwrap_or_else(|_| raw.chars().filter(|c| c.is_ascii_digit()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn two_item_group() -> InvoiceGroup {
        InvoiceGroup::new(
            "12.345.678/0001-90",
            LocationInfo::new("Springfield", "SP"),
            vec![
                LineItem::new("PO-100", 150.0, period("2025-06-01")),
                LineItem::new("PO-101", 250.0, period("2025-07-01")),
            ],
        )
    }

    #[test]
    fn test_status_order_follows_pipeline() {
        assert!(GroupStatus::Pending < GroupStatus::WaitingGeneration);
        assert!(GroupStatus::WaitingGeneration < GroupStatus::Generated);
        assert!(GroupStatus::Generated < GroupStatus::Downloaded);
        assert!(GroupStatus::Downloaded < GroupStatus::ExtraDownloaded);
        assert!(GroupStatus::ExtraDownloaded < GroupStatus::Merged);
        assert!(GroupStatus::Merged < GroupStatus::Uploaded);
    }

    #[test]
    fn test_only_uploaded_is_terminal() {
        assert!(GroupStatus::Uploaded.is_terminal());
        assert!(!GroupStatus::Pending.is_terminal());
        assert!(!GroupStatus::Merged.is_terminal());
    }

    #[test]
    fn test_status_serialization_is_snake_case() {
        let json = serde_json::to_string(&GroupStatus::WaitingGeneration).unwrap();
        assert_eq!(json, r#""waiting_generation""#);

        let deserialized: GroupStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, GroupStatus::WaitingGeneration);
    }

    #[test]
    fn test_step_name_failure_labels() {
        assert_eq!(StepName::Generate.failure_label(), "failed_generation");
        assert_eq!(
            StepName::ExtraDownload.failure_label(),
            "failed_extra_download"
        );
        assert_eq!(StepName::Upload.failure_label(), "failed_upload");
    }

    #[test]
    fn test_group_aggregates() {
        let group = two_item_group();
        assert_eq!(group.tax_id, "12345678000190");
        assert_eq!(group.total_value, 400.0);
        assert_eq!(group.period_start, period("2025-06-01"));
        assert_eq!(group.period_end, period("2025-07-01"));
        assert_eq!(group.status, GroupStatus::Pending);
    }

    #[test]
    fn test_group_references_keep_order() {
        let group = two_item_group();
        assert_eq!(group.references(), vec!["PO-100", "PO-101"]);
        assert_eq!(group.first_reference(), Some("PO-100"));
    }

    #[test]
    fn test_with_extra_sets_flag_and_kind() {
        let group = two_item_group().with_extra(ExtraDocKind::MunicipalSlip);
        assert!(group.requires_extra);
        assert_eq!(group.extra_kind, Some(ExtraDocKind::MunicipalSlip));
        assert_eq!(
            group.extra_kind.unwrap().action(),
            "download_municipal_slip"
        );
    }

    #[test]
    fn test_validation_rejects_empty_line_items() {
        let group = InvoiceGroup::new("123", LocationInfo::new("A", "B"), vec![]);
        assert!(group.validation_error().is_some());
    }

    #[test]
    fn test_validation_rejects_missing_extra_kind() {
        let mut group = two_item_group();
        group.requires_extra = true;
        group.extra_kind = None;
        assert!(group.validation_error().is_some());
    }

    #[test]
    fn test_validation_accepts_complete_group() {
        assert!(two_item_group().validation_error().is_none());
    }

    #[test]
    fn test_unknown_location_marker() {
        let loc = LocationInfo::unknown();
        assert!(loc.is_unknown());
        assert_eq!(loc.city, UNKNOWN_LOCATION);

        let resolved = LocationInfo::new("Springfield", "SP");
        assert!(!resolved.is_unknown());
    }

    #[test]
    fn test_normalize_tax_id() {
        assert_eq!(normalize_tax_id("12.345.678/0001-90"), "12345678000190");
        assert_eq!(normalize_tax_id("12345678000190"), "12345678000190");
        assert_eq!(normalize_tax_id("  98 765 "), "98765");
        assert_eq!(normalize_tax_id("abc"), "");
    }

    #[test]
    fn test_group_serialization_round_trip() {
        let mut group = two_item_group().with_extra(ExtraDocKind::StateSlip);
        group.artifacts.insert(
            "PO-100".to_string(),
            ArtifactRefs {
                base: Some("b/100.bin".to_string()),
                extra: None,
            },
        );
        group.failure = Some(StepFailure::new(
            StepName::Download,
            "download_invoice",
            "timeout",
        ));

        let json = serde_json::to_string(&group).unwrap();
        let deserialized: InvoiceGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, group);
    }

    #[test]
    fn test_optional_fields_skipped_when_empty() {
        let group = two_item_group();
        let json = serde_json::to_string(&group).unwrap();
        assert!(!json.contains("merged_artifact"));
        assert!(!json.contains("result_reference"));
        assert!(!json.contains("failure"));
        assert!(!json.contains("artifacts"));
    }

    #[test]
    fn test_batch_document_round_trip() {
        let doc = BatchDocument {
            batch: Batch::new("invoices-2025-07.xlsx"),
            groups: vec![two_item_group()],
        };
        let json = serde_json::to_string_pretty(&doc).unwrap();
        let deserialized: BatchDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, doc);
    }
}
