//! Declarative step table for the invoice pipeline.
//!
//! The table is data, not control flow: the executor walks it starting at a
//! group's current status and commits each step's target status on success.

use std::time::Duration;

use crate::artifact::{DOWNLOAD_ACTION, UPLOAD_ACTION};
use crate::batch::{GroupStatus, InvoiceGroup, StepName};
use crate::config::PipelineConfig;

/// Action that starts the asynchronous generation job for one line item.
pub const GENERATE_ACTION: &str = "generate_invoice";

/// Action that retrieves the document id a generation job produced.
pub const COLLECT_ACTION: &str = "collect_invoice";

/// How a step's work is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// One action call per line item; all must succeed for the step to commit.
    PerLineItem,
    /// One action call for the whole group.
    PerGroup,
    /// No external call; the work is local file handling.
    LocalMerge,
}

/// Predicate deciding whether a step applies to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCondition {
    RequiresExtra,
}

impl StepCondition {
    pub fn holds(&self, group: &InvoiceGroup) -> bool {
        match self {
            StepCondition::RequiresExtra => group.requires_extra,
        }
    }

    /// Why the step was skipped, for audit events.
    pub fn skip_reason(&self) -> &'static str {
        match self {
            StepCondition::RequiresExtra => "extra document not required",
        }
    }
}

/// One row of the ordered step table.
#[derive(Debug, Clone)]
pub struct StepDefinition {
    pub index: usize,
    pub name: StepName,
    pub kind: StepKind,

    /// Status committed when the step succeeds or is skipped.
    pub target: GroupStatus,

    /// Fixed suspension before the action is invoked.
    pub wait: Option<Duration>,

    /// When present and false for a group, the step is skipped and the
    /// status advances without any external call.
    pub condition: Option<StepCondition>,

    /// Whether the response carries a result reference to store on the group.
    pub extracts_result: bool,

    /// Whether the action accepts several groups in one call.
    pub batch_capable: bool,
}

impl StepDefinition {
    /// The action this step invokes for the given group.
    ///
    /// `None` for local steps. The extra download resolves through the
    /// group's extra document kind, so two groups in the same step can call
    /// different actions.
    pub fn action_for(&self, group: &InvoiceGroup) -> Option<&'static str> {
        match self.name {
            StepName::Generate => Some(GENERATE_ACTION),
            StepName::Collect => Some(COLLECT_ACTION),
            StepName::Download => Some(DOWNLOAD_ACTION),
            StepName::ExtraDownload => group.extra_kind.map(|kind| kind.action()),
            StepName::Merge => None,
            StepName::Upload => Some(UPLOAD_ACTION),
        }
    }
}

/// Build the ordered step table from configuration.
pub fn build_steps(config: &PipelineConfig) -> Vec<StepDefinition> {
    vec![
        StepDefinition {
            index: 0,
            name: StepName::Generate,
            kind: StepKind::PerLineItem,
            target: GroupStatus::WaitingGeneration,
            wait: None,
            condition: None,
            extracts_result: false,
            batch_capable: true,
        },
        StepDefinition {
            index: 1,
            name: StepName::Collect,
            kind: StepKind::PerLineItem,
            target: GroupStatus::Generated,
            // The generation job needs time before its results are
            // retrievable.
            wait: Some(Duration::from_secs(config.collect_wait_secs)),
            condition: None,
            extracts_result: false,
            batch_capable: false,
        },
        StepDefinition {
            index: 2,
            name: StepName::Download,
            kind: StepKind::PerLineItem,
            target: GroupStatus::Downloaded,
            wait: None,
            condition: None,
            extracts_result: false,
            batch_capable: false,
        },
        StepDefinition {
            index: 3,
            name: StepName::ExtraDownload,
            kind: StepKind::PerLineItem,
            target: GroupStatus::ExtraDownloaded,
            wait: None,
            condition: Some(StepCondition::RequiresExtra),
            extracts_result: false,
            batch_capable: false,
        },
        StepDefinition {
            index: 4,
            name: StepName::Merge,
            kind: StepKind::LocalMerge,
            target: GroupStatus::Merged,
            wait: None,
            condition: None,
            extracts_result: false,
            batch_capable: false,
        },
        StepDefinition {
            index: 5,
            name: StepName::Upload,
            kind: StepKind::PerGroup,
            target: GroupStatus::Uploaded,
            wait: None,
            condition: None,
            extracts_result: true,
            batch_capable: false,
        },
    ]
}

/// The step that takes a group out of `status`, or `None` once terminal.
pub fn step_for_status(steps: &[StepDefinition], status: GroupStatus) -> Option<&StepDefinition> {
    let index = match status {
        GroupStatus::Pending => 0,
        GroupStatus::WaitingGeneration => 1,
        GroupStatus::Generated => 2,
        GroupStatus::Downloaded => 3,
        GroupStatus::ExtraDownloaded => 4,
        GroupStatus::Merged => 5,
        GroupStatus::Uploaded => return None,
    };
    steps.get(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ExtraDocKind;
    use crate::testing::fixtures;

    fn config() -> PipelineConfig {
        PipelineConfig {
            collect_wait_secs: 20,
            ..Default::default()
        }
    }

    #[test]
    fn test_step_table_order_and_targets() {
        let steps = build_steps(&config());
        assert_eq!(steps.len(), 6);

        let targets: Vec<GroupStatus> = steps.iter().map(|s| s.target).collect();
        assert_eq!(
            targets,
            vec![
                GroupStatus::WaitingGeneration,
                GroupStatus::Generated,
                GroupStatus::Downloaded,
                GroupStatus::ExtraDownloaded,
                GroupStatus::Merged,
                GroupStatus::Uploaded,
            ]
        );

        for (index, step) in steps.iter().enumerate() {
            assert_eq!(step.index, index);
        }
    }

    #[test]
    fn test_only_generate_is_batch_capable() {
        let steps = build_steps(&config());
        let batch_capable: Vec<StepName> = steps
            .iter()
            .filter(|s| s.batch_capable)
            .map(|s| s.name)
            .collect();
        assert_eq!(batch_capable, vec![StepName::Generate]);
    }

    #[test]
    fn test_collect_wait_comes_from_config() {
        let steps = build_steps(&config());
        assert_eq!(steps[1].wait, Some(Duration::from_secs(20)));
        let others: Vec<&StepDefinition> =
            steps.iter().filter(|s| s.name != StepName::Collect).collect();
        assert!(others.iter().all(|s| s.wait.is_none()));
    }

    #[test]
    fn test_extra_action_depends_on_kind() {
        let steps = build_steps(&config());
        let extra = &steps[3];

        let state_group =
            fixtures::group_with_extra("11222333000144", &["PO-1"], ExtraDocKind::StateSlip);
        assert_eq!(extra.action_for(&state_group), Some("download_state_slip"));

        let municipal_group =
            fixtures::group_with_extra("11222333000144", &["PO-1"], ExtraDocKind::MunicipalSlip);
        assert_eq!(
            extra.action_for(&municipal_group),
            Some("download_municipal_slip")
        );

        let plain_group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        assert_eq!(extra.action_for(&plain_group), None);
    }

    #[test]
    fn test_step_for_status_walks_the_table() {
        let steps = build_steps(&config());

        let step = step_for_status(&steps, GroupStatus::Pending);
        assert_eq!(step.map(|s| s.name), Some(StepName::Generate));

        let step = step_for_status(&steps, GroupStatus::Downloaded);
        assert_eq!(step.map(|s| s.name), Some(StepName::ExtraDownload));

        let step = step_for_status(&steps, GroupStatus::Merged);
        assert_eq!(step.map(|s| s.name), Some(StepName::Upload));

        assert!(step_for_status(&steps, GroupStatus::Uploaded).is_none());
    }

    #[test]
    fn test_merge_has_no_action() {
        let steps = build_steps(&config());
        let group = fixtures::invoice_group("11222333000144", &["PO-1"]);
        assert_eq!(steps[4].action_for(&group), None);
        assert_eq!(steps[5].action_for(&group), Some(UPLOAD_ACTION));
    }
}
