//! Queue router: turns status buckets into ordered processing queues.

use crate::batch::StepName;

use super::classifier::StatusBuckets;
use super::steps::{COLLECT_ACTION, GENERATE_ACTION};
use crate::artifact::{DOWNLOAD_ACTION, UPLOAD_ACTION};

/// One unit of routed work: a step and the groups queued for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingQueue {
    /// Step the queue feeds.
    pub step: StepName,

    /// Action label for logs and the run report. For the extra download the
    /// concrete action is resolved per group (it depends on the group's
    /// extra document kind); for merge there is no external action.
    pub action: &'static str,

    /// Whether the action accepts all queued groups in a single call.
    pub batch_capable: bool,

    /// Tax ids of the queued groups.
    pub tax_ids: Vec<String>,
}

impl ProcessingQueue {
    fn new(step: StepName, action: &'static str, batch_capable: bool, tax_ids: Vec<String>) -> Self {
        Self {
            step,
            action,
            batch_capable,
            tax_ids,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tax_ids.is_empty()
    }
}

/// The routed work of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedQueues {
    /// Single-step queues, in drain order: later pipeline stages first, so
    /// nearly-done groups finish before new ones are admitted.
    pub single: Vec<ProcessingQueue>,

    /// Groups entering the pipeline that run through every step in this
    /// invocation. Empty when multi-hop is disabled.
    pub multi_hop: Vec<String>,
}

/// Build the ordered queues for one run.
///
/// Entry-status groups go to the multi-hop queue unless `multi_hop` is
/// disabled, in which case they land in the batch-capable generate queue
/// and advance one step per run like everything else.
pub fn route(buckets: StatusBuckets, multi_hop: bool) -> RoutedQueues {
    let StatusBuckets {
        generate,
        collect,
        download,
        extra,
        merge,
        upload,
        ..
    } = buckets;

    let (multi_hop_ids, generate_ids) = if multi_hop {
        (generate, Vec::new())
    } else {
        (Vec::new(), generate)
    };

    let single = vec![
        ProcessingQueue::new(StepName::Upload, UPLOAD_ACTION, false, upload),
        ProcessingQueue::new(StepName::Merge, "merge", false, merge),
        ProcessingQueue::new(StepName::ExtraDownload, "extra_download", false, extra),
        ProcessingQueue::new(StepName::Download, DOWNLOAD_ACTION, false, download),
        ProcessingQueue::new(StepName::Collect, COLLECT_ACTION, false, collect),
        ProcessingQueue::new(StepName::Generate, GENERATE_ACTION, true, generate_ids),
    ];

    RoutedQueues {
        single,
        multi_hop: multi_hop_ids,
    }
}
