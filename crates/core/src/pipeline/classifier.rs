//! Status classifier: buckets groups by the next work they need.

use tracing::warn;

use crate::batch::{GroupStatus, InvoiceGroup};

/// Group references partitioned by the next required action.
///
/// Buckets hold tax ids; the executor looks the groups back up when a queue
/// drains. Groups carrying a recorded failure are classified by their
/// last-good status, which is what makes retries automatic.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusBuckets {
    pub generate: Vec<String>,
    pub collect: Vec<String>,
    pub download: Vec<String>,
    pub extra: Vec<String>,
    pub merge: Vec<String>,
    pub upload: Vec<String>,

    /// Terminal groups; never routed.
    pub done: Vec<String>,

    /// Groups that cannot be processed at all, with the reason. Reported at
    /// batch level; their persisted state is never touched.
    pub invalid: Vec<(String, String)>,
}

impl StatusBuckets {
    /// Total number of groups in actionable buckets.
    pub fn actionable(&self) -> usize {
        self.generate.len()
            + self.collect.len()
            + self.download.len()
            + self.extra.len()
            + self.merge.len()
            + self.upload.len()
    }
}

/// Partition the groups of a batch into status buckets.
///
/// A group at `Downloaded` with `requires_extra == false` goes straight to
/// the merge bucket; the extra bucket only ever holds groups the extra
/// download actually applies to.
pub fn classify(groups: &[InvoiceGroup]) -> StatusBuckets {
    let mut buckets = StatusBuckets::default();

    for group in groups {
        if let Some(reason) = group.validation_error() {
            warn!(
                tax_id = %group.tax_id,
                %reason,
                "group failed validation, excluded from this run"
            );
            buckets.invalid.push((group.tax_id.clone(), reason));
            continue;
        }

        match group.status {
            GroupStatus::Pending => buckets.generate.push(group.tax_id.clone()),
            GroupStatus::WaitingGeneration => buckets.collect.push(group.tax_id.clone()),
            GroupStatus::Generated => buckets.download.push(group.tax_id.clone()),
            GroupStatus::Downloaded => {
                if group.requires_extra {
                    buckets.extra.push(group.tax_id.clone());
                } else {
                    buckets.merge.push(group.tax_id.clone());
                }
            }
            GroupStatus::ExtraDownloaded => buckets.merge.push(group.tax_id.clone()),
            GroupStatus::Merged => buckets.upload.push(group.tax_id.clone()),
            GroupStatus::Uploaded => buckets.done.push(group.tax_id.clone()),
        }
    }

    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ExtraDocKind, LocationInfo};
    use crate::testing::fixtures;

    fn group_at(tax_id: &str, status: GroupStatus) -> InvoiceGroup {
        let mut group = fixtures::invoice_group(tax_id, &["PO-1"]);
        group.status = status;
        group
    }

    #[test]
    fn test_buckets_by_status() {
        let groups = vec![
            group_at("111", GroupStatus::Pending),
            group_at("222", GroupStatus::WaitingGeneration),
            group_at("333", GroupStatus::Generated),
            group_at("444", GroupStatus::Merged),
            group_at("555", GroupStatus::Uploaded),
        ];

        let buckets = classify(&groups);
        assert_eq!(buckets.generate, vec!["111"]);
        assert_eq!(buckets.collect, vec!["222"]);
        assert_eq!(buckets.download, vec!["333"]);
        assert_eq!(buckets.upload, vec!["444"]);
        assert_eq!(buckets.done, vec!["555"]);
        assert_eq!(buckets.actionable(), 4);
    }

    #[test]
    fn test_downloaded_without_extra_goes_to_merge() {
        let mut plain = group_at("111", GroupStatus::Downloaded);
        plain.requires_extra = false;

        let mut regional =
            fixtures::group_with_extra("222", &["PO-1"], ExtraDocKind::StateSlip);
        regional.status = GroupStatus::Downloaded;

        let buckets = classify(&[plain, regional]);
        assert_eq!(buckets.merge, vec!["111"]);
        assert_eq!(buckets.extra, vec!["222"]);
    }

    #[test]
    fn test_extra_downloaded_goes_to_merge() {
        let mut group = fixtures::group_with_extra("111", &["PO-1"], ExtraDocKind::MunicipalSlip);
        group.status = GroupStatus::ExtraDownloaded;

        let buckets = classify(&[group]);
        assert_eq!(buckets.merge, vec!["111"]);
        assert!(buckets.extra.is_empty());
    }

    #[test]
    fn test_terminal_groups_are_not_actionable() {
        let buckets = classify(&[group_at("111", GroupStatus::Uploaded)]);
        assert_eq!(buckets.actionable(), 0);
        assert_eq!(buckets.done, vec!["111"]);
    }

    #[test]
    fn test_invalid_group_is_excluded_with_reason() {
        let empty_items = InvoiceGroup::new(
            "11222333000144",
            LocationInfo::new("Springfield", "SP"),
            vec![],
        );

        let buckets = classify(&[empty_items, group_at("222", GroupStatus::Pending)]);
        assert_eq!(buckets.invalid.len(), 1);
        assert_eq!(buckets.invalid[0].0, "11222333000144");
        assert_eq!(buckets.invalid[0].1, "no line items");
        assert_eq!(buckets.generate, vec!["222"]);
    }

    #[test]
    fn test_failed_group_is_classified_by_last_good_status() {
        let mut group = group_at("111", GroupStatus::Generated);
        group.failure = Some(crate::batch::StepFailure::new(
            crate::batch::StepName::Download,
            "download_invoice",
            "HTTP 500",
        ));

        let buckets = classify(&[group]);
        assert_eq!(buckets.download, vec!["111"]);
    }
}
