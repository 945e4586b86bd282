//! Pipeline executor: drives groups through the step table.
//!
//! One run is one classification plus one pass over the routed queues.
//! Entry-status groups run multi-hop (every step in one pass); everything
//! else advances one real step and waits for the next run to be re-routed.
//! Within a group, steps are strictly sequential; across groups, execution
//! fans out under a concurrency bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::action::{ActionClient, ActionRequest};
use crate::artifact::{ArtifactManager, DownloadKind};
use crate::audit::{AuditEvent, AuditHandle};
use crate::batch::{
    BatchStore, GroupStatus, InvoiceGroup, LineItem, StepFailure, StepName, StoreError,
};
use crate::config::PipelineConfig;
use crate::metrics::{
    GROUPS_COMPLETED, GROUPS_IN_FLIGHT, GROUP_FAILURES, STEPS_EXECUTED, STEP_DURATION,
};

use super::classifier::classify;
use super::completion::{CompletionWriter, StepCommit};
use super::report::{GroupOutcome, RunReport};
use super::router::{route, ProcessingQueue};
use super::steps::{build_steps, step_for_status, StepDefinition, StepKind, GENERATE_ACTION};

/// Error type for executor operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("batch store: {0}")]
    Store(#[from] StoreError),
}

/// What stopped a step, with everything the failure paths need.
struct FailedStep {
    step: StepName,
    action: String,
    error: String,
    failed_reference: Option<String>,
}

/// Per-item result of an itemized step, accumulated before the
/// all-succeeded guard.
enum ItemOutcome {
    Started,
    DocumentId(String),
    BaseArtifact(String),
    ExtraArtifact(String),
}

/// The pipeline executor.
pub struct PipelineExecutor {
    store: Arc<dyn BatchStore>,
    actions: Arc<dyn ActionClient>,
    artifacts: Arc<ArtifactManager>,
    completion: CompletionWriter,
    config: PipelineConfig,
    steps: Vec<StepDefinition>,
    audit: Option<AuditHandle>,
}

impl PipelineExecutor {
    pub fn new(
        store: Arc<dyn BatchStore>,
        actions: Arc<dyn ActionClient>,
        artifacts: Arc<ArtifactManager>,
        config: PipelineConfig,
    ) -> Self {
        let steps = build_steps(&config);
        Self {
            completion: CompletionWriter::new(Arc::clone(&store)),
            store,
            actions,
            artifacts,
            config,
            steps,
            audit: None,
        }
    }

    /// Sets the audit handle for logging events.
    pub fn with_audit(mut self, audit: AuditHandle) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Run one pipeline pass over a batch.
    pub async fn run_batch(&self, batch_id: &str) -> Result<RunReport, PipelineError> {
        let run_start = Instant::now();
        let document = self.store.load(batch_id).await?;

        let mut report = RunReport::new(batch_id);
        report.groups_total = document.groups.len() as u32;

        let buckets = classify(&document.groups);
        report.already_done = buckets.done.len() as u32;
        for (tax_id, reason) in &buckets.invalid {
            report.record_validation_failure(tax_id.clone(), reason.clone());
        }

        let routed = route(buckets, self.config.multi_hop);
        let by_id: HashMap<String, InvoiceGroup> = document
            .groups
            .into_iter()
            .map(|group| (group.tax_id.clone(), group))
            .collect();

        info!(
            batch_id,
            groups = report.groups_total,
            multi_hop = routed.multi_hop.len(),
            already_done = report.already_done,
            "pipeline pass starting"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_groups));

        // Single-step queues drain in priority order, finishing nearly-done
        // groups before the multi-hop queue admits new ones.
        for queue in &routed.single {
            if queue.is_empty() {
                continue;
            }
            debug!(
                batch_id,
                step = %queue.step,
                groups = queue.tax_ids.len(),
                "draining queue"
            );
            if queue.batch_capable {
                for outcome in self.run_batch_generate(batch_id, queue, &by_id).await {
                    report.record(outcome);
                }
            } else {
                let outcomes = self
                    .run_queue(batch_id, &queue.tax_ids, &by_id, &semaphore, Some(1))
                    .await;
                for outcome in outcomes {
                    report.record(outcome);
                }
            }
        }

        let outcomes = self
            .run_queue(batch_id, &routed.multi_hop, &by_id, &semaphore, None)
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        report.duration_ms = run_start.elapsed().as_millis() as u64;
        info!(
            batch_id,
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "pipeline pass finished"
        );
        Ok(report)
    }

    /// Fan a set of groups out under the concurrency bound.
    async fn run_queue(
        &self,
        batch_id: &str,
        tax_ids: &[String],
        by_id: &HashMap<String, InvoiceGroup>,
        semaphore: &Arc<Semaphore>,
        max_steps: Option<usize>,
    ) -> Vec<GroupOutcome> {
        let tasks = tax_ids
            .iter()
            .filter_map(|tax_id| by_id.get(tax_id))
            .cloned()
            .map(|group| {
                let semaphore = Arc::clone(semaphore);
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return GroupOutcome {
                                tax_id: group.tax_id.clone(),
                                final_status: group.status,
                                steps_run: 0,
                                failure: Some("concurrency gate closed".to_string()),
                            }
                        }
                    };
                    GROUPS_IN_FLIGHT.inc();
                    let outcome = self.run_group(batch_id, group, max_steps).await;
                    GROUPS_IN_FLIGHT.dec();
                    outcome
                }
            });
        join_all(tasks).await
    }

    /// Walk one group through the step table.
    ///
    /// `max_steps` bounds the number of executed steps (single-hop queues
    /// pass 1); conditional skips are free and never count.
    async fn run_group(
        &self,
        batch_id: &str,
        mut group: InvoiceGroup,
        max_steps: Option<usize>,
    ) -> GroupOutcome {
        let tax_id = group.tax_id.clone();
        let mut steps_run = 0u32;
        let mut executed = 0usize;

        while let Some(step) = step_for_status(&self.steps, group.status) {
            if let Some(condition) = step.condition {
                if !condition.holds(&group) {
                    match self.skip_step(batch_id, &group, step, condition.skip_reason()).await {
                        Ok(updated) => {
                            group = updated;
                            steps_run += 1;
                            continue;
                        }
                        Err(e) => {
                            warn!(%tax_id, step = %step.name, error = %e, "skip persist failed");
                            return GroupOutcome {
                                tax_id,
                                final_status: group.status,
                                steps_run,
                                failure: Some(format!("{}: {}", step.name.failure_label(), e)),
                            };
                        }
                    }
                }
            }

            if let Some(limit) = max_steps {
                if executed >= limit {
                    break;
                }
            }

            match self.execute_step(batch_id, &group, step).await {
                Ok(updated) => {
                    group = updated;
                    steps_run += 1;
                    executed += 1;
                }
                Err(failed) => {
                    let mut line = format!("{}: {}", failed.step.failure_label(), failed.error);
                    if let Some(reference) = &failed.failed_reference {
                        line.push_str(&format!(" (reference {})", reference));
                    }
                    return GroupOutcome {
                        tax_id,
                        final_status: group.status,
                        steps_run,
                        failure: Some(line),
                    };
                }
            }
        }

        GroupOutcome {
            tax_id,
            final_status: group.status,
            steps_run,
            failure: None,
        }
    }

    /// Advance past a step whose condition does not hold. No external call.
    async fn skip_step(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
        reason: &str,
    ) -> Result<InvoiceGroup, StoreError> {
        let from = group.status;
        let updated = self
            .completion
            .commit_step(batch_id, &group.tax_id, StepCommit::advance_to(step.target))
            .await?;

        debug!(
            tax_id = %group.tax_id,
            step = %step.name,
            reason,
            "step skipped"
        );
        self.emit(AuditEvent::StepSkipped {
            batch_id: batch_id.to_string(),
            group_id: group.tax_id.clone(),
            step: step.name.as_str().to_string(),
            reason: reason.to_string(),
        })
        .await;
        self.emit_status_change(batch_id, &group.tax_id, from, step.target)
            .await;

        Ok(updated)
    }

    /// Execute one step to its success or failure outcome.
    ///
    /// Success commits the status advance and collected fields atomically;
    /// failure records a `StepFailure` and leaves the status untouched.
    async fn execute_step(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
    ) -> Result<InvoiceGroup, FailedStep> {
        let action = step.action_for(group).unwrap_or("");
        let items = match step.kind {
            StepKind::PerLineItem => group.line_items.len() as u32,
            StepKind::PerGroup | StepKind::LocalMerge => 1,
        };

        if let Some(wait) = step.wait {
            debug!(
                tax_id = %group.tax_id,
                step = %step.name,
                wait_secs = wait.as_secs(),
                "waiting before step"
            );
            tokio::time::sleep(wait).await;
        }

        self.emit(AuditEvent::StepStarted {
            batch_id: batch_id.to_string(),
            group_id: group.tax_id.clone(),
            step: step.name.as_str().to_string(),
            action: action.to_string(),
            items,
        })
        .await;

        let step_start = Instant::now();
        let result = match step.kind {
            StepKind::PerLineItem => self.run_itemized(batch_id, group, step).await,
            StepKind::LocalMerge => self.run_merge(batch_id, group, step).await,
            StepKind::PerGroup => self.run_upload(batch_id, group, step).await,
        };
        let duration = step_start.elapsed();

        match result {
            Ok(commit) => {
                let from = group.status;
                let target = commit.target;
                let updated = match self
                    .completion
                    .commit_step(batch_id, &group.tax_id, commit)
                    .await
                {
                    Ok(updated) => updated,
                    Err(e) => {
                        return Err(self
                            .fail_step(batch_id, group, step, action, e.to_string(), None)
                            .await);
                    }
                };

                STEPS_EXECUTED
                    .with_label_values(&[step.name.as_str(), "success"])
                    .inc();
                STEP_DURATION
                    .with_label_values(&[step.name.as_str()])
                    .observe(duration.as_secs_f64());
                if target.is_terminal() {
                    GROUPS_COMPLETED.inc();
                }

                info!(
                    tax_id = %group.tax_id,
                    step = %step.name,
                    status = %target,
                    "step completed"
                );
                self.emit(AuditEvent::StepCompleted {
                    batch_id: batch_id.to_string(),
                    group_id: group.tax_id.clone(),
                    step: step.name.as_str().to_string(),
                    action: action.to_string(),
                    items,
                    duration_ms: duration.as_millis() as u64,
                })
                .await;
                self.emit_status_change(batch_id, &group.tax_id, from, target)
                    .await;

                Ok(updated)
            }
            Err(failed) => {
                Err(self
                    .fail_step(
                        batch_id,
                        group,
                        step,
                        &failed.action,
                        failed.error,
                        failed.failed_reference,
                    )
                    .await)
            }
        }
    }

    /// Record a step failure everywhere it is visible: store, audit, metrics.
    async fn fail_step(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
        action: &str,
        error: String,
        failed_reference: Option<String>,
    ) -> FailedStep {
        warn!(
            tax_id = %group.tax_id,
            step = %step.name,
            action,
            error = %error,
            "step failed, group frozen at last good status"
        );

        STEPS_EXECUTED
            .with_label_values(&[step.name.as_str(), "failure"])
            .inc();
        GROUP_FAILURES.with_label_values(&[step.name.as_str()]).inc();

        if let Err(e) = self
            .completion
            .record_failure(
                batch_id,
                &group.tax_id,
                StepFailure::new(step.name, action, &error),
            )
            .await
        {
            warn!(tax_id = %group.tax_id, error = %e, "failed to persist failure record");
        }

        self.emit(AuditEvent::StepFailed {
            batch_id: batch_id.to_string(),
            group_id: group.tax_id.clone(),
            step: step.name.as_str().to_string(),
            action: action.to_string(),
            error: error.clone(),
            failed_reference: failed_reference.clone(),
        })
        .await;

        FailedStep {
            step: step.name,
            action: action.to_string(),
            error,
            failed_reference,
        }
    }

    /// Run a per-line-item step: invoke every item, accumulate outcomes,
    /// then apply the all-succeeded guard.
    async fn run_itemized(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
    ) -> Result<StepCommit, FailedStep> {
        let Some(action) = step.action_for(group) else {
            return Err(FailedStep {
                step: step.name,
                action: String::new(),
                error: "no action resolvable for step".to_string(),
                failed_reference: None,
            });
        };

        let mut outcomes: Vec<(String, Result<ItemOutcome, String>)> = Vec::new();
        for item in &group.line_items {
            let outcome = match step.name {
                StepName::Generate => self.generate_item(group, item).await,
                StepName::Collect => self.collect_item(group, item).await,
                StepName::Download => {
                    self.download_item(batch_id, group, item, DownloadKind::Base)
                        .await
                }
                StepName::ExtraDownload => match group.extra_kind {
                    Some(kind) => {
                        self.download_item(batch_id, group, item, DownloadKind::Extra(kind))
                            .await
                    }
                    None => Err("extra document kind not set".to_string()),
                },
                StepName::Merge | StepName::Upload => {
                    Err("step is not itemized".to_string())
                }
            };
            if let Err(error) = &outcome {
                warn!(
                    tax_id = %group.tax_id,
                    reference = %item.reference,
                    action,
                    error = %error,
                    "item invocation failed"
                );
            }
            outcomes.push((item.reference.clone(), outcome));
        }

        // All-or-nothing: one guard over the accumulated outcomes. Any
        // failure aborts the step with nothing committed.
        let mut commit = StepCommit::advance_to(step.target);
        for (reference, outcome) in outcomes {
            match outcome {
                Ok(ItemOutcome::Started) => {}
                Ok(ItemOutcome::DocumentId(document_id)) => {
                    commit.document_ids.push((reference, document_id));
                }
                Ok(ItemOutcome::BaseArtifact(path)) => {
                    commit.base_artifacts.push((reference, path));
                }
                Ok(ItemOutcome::ExtraArtifact(path)) => {
                    commit.extra_artifacts.push((reference, path));
                }
                Err(error) => {
                    return Err(FailedStep {
                        step: step.name,
                        action: action.to_string(),
                        error,
                        failed_reference: Some(reference),
                    });
                }
            }
        }
        Ok(commit)
    }

    async fn generate_item(
        &self,
        group: &InvoiceGroup,
        item: &LineItem,
    ) -> Result<ItemOutcome, String> {
        let request = ActionRequest::new(
            GENERATE_ACTION,
            json!({
                "tax_id": group.tax_id,
                "reference": item.reference,
                "value": item.value,
                "period": item.period,
            }),
        );
        match self.actions.invoke(&request).await {
            Ok(_) => Ok(ItemOutcome::Started),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn collect_item(
        &self,
        group: &InvoiceGroup,
        item: &LineItem,
    ) -> Result<ItemOutcome, String> {
        let request = ActionRequest::new(
            super::steps::COLLECT_ACTION,
            json!({
                "tax_id": group.tax_id,
                "reference": item.reference,
            }),
        );
        let output = self.actions.invoke(&request).await.map_err(|e| e.to_string())?;
        output
            .result_str("document_id")
            .map(|id| ItemOutcome::DocumentId(id.to_string()))
            .ok_or_else(|| "collect response carried no document_id".to_string())
    }

    async fn download_item(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        item: &LineItem,
        kind: DownloadKind,
    ) -> Result<ItemOutcome, String> {
        let stored = self
            .artifacts
            .download(batch_id, group, item, kind)
            .await
            .map_err(|e| e.to_string())?;

        self.emit(AuditEvent::ArtifactStored {
            batch_id: batch_id.to_string(),
            group_id: group.tax_id.clone(),
            reference: item.reference.clone(),
            kind: kind.artifact_kind().as_str().to_string(),
            path: stored.path.clone(),
            size_bytes: stored.size_bytes,
        })
        .await;

        Ok(match kind {
            DownloadKind::Base => ItemOutcome::BaseArtifact(stored.path),
            DownloadKind::Extra(_) => ItemOutcome::ExtraArtifact(stored.path),
        })
    }

    async fn run_merge(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
    ) -> Result<StepCommit, FailedStep> {
        match self.artifacts.merge_group(batch_id, group).await {
            Ok(outcome) => {
                for part in &outcome.skipped {
                    self.emit(AuditEvent::ArtifactMissing {
                        batch_id: batch_id.to_string(),
                        group_id: group.tax_id.clone(),
                        part: part.clone(),
                    })
                    .await;
                }
                self.emit(AuditEvent::MergeCompleted {
                    batch_id: batch_id.to_string(),
                    group_id: group.tax_id.clone(),
                    parts: outcome.parts,
                    skipped: outcome.skipped.len() as u32,
                    size_bytes: outcome.size_bytes,
                })
                .await;

                let mut commit = StepCommit::advance_to(step.target);
                commit.merged_artifact = Some(outcome.path);
                Ok(commit)
            }
            Err(e) => Err(FailedStep {
                step: step.name,
                action: String::new(),
                error: e.to_string(),
                failed_reference: None,
            }),
        }
    }

    async fn run_upload(
        &self,
        batch_id: &str,
        group: &InvoiceGroup,
        step: &StepDefinition,
    ) -> Result<StepCommit, FailedStep> {
        match self
            .artifacts
            .upload_group(group, self.config.max_upload_bytes)
            .await
        {
            Ok(outcome) => {
                self.emit(AuditEvent::UploadCompleted {
                    batch_id: batch_id.to_string(),
                    group_id: group.tax_id.clone(),
                    reference: group.first_reference().unwrap_or(&group.tax_id).to_string(),
                    protocol: outcome.result_reference.clone(),
                    size_bytes: outcome.size_bytes,
                })
                .await;

                let mut commit = StepCommit::advance_to(step.target);
                commit.result_reference = Some(outcome.result_reference);
                Ok(commit)
            }
            Err(e) => Err(FailedStep {
                step: step.name,
                action: crate::artifact::UPLOAD_ACTION.to_string(),
                error: e.to_string(),
                failed_reference: None,
            }),
        }
    }

    /// One generation call carrying every queued group, with per-group
    /// outcomes applied individually.
    ///
    /// The action's result may carry a `rejected` array of
    /// `{tax_id, error}` entries; those groups record a failure while the
    /// rest advance. A transport-level failure fails them all.
    async fn run_batch_generate(
        &self,
        batch_id: &str,
        queue: &ProcessingQueue,
        by_id: &HashMap<String, InvoiceGroup>,
    ) -> Vec<GroupOutcome> {
        let groups: Vec<&InvoiceGroup> = queue
            .tax_ids
            .iter()
            .filter_map(|tax_id| by_id.get(tax_id))
            .collect();
        if groups.is_empty() {
            return Vec::new();
        }

        let Some(generate) = step_for_status(&self.steps, GroupStatus::Pending) else {
            return Vec::new();
        };
        let payload = json!({
            "groups": groups
                .iter()
                .map(|group| {
                    json!({
                        "tax_id": group.tax_id,
                        "items": group
                            .line_items
                            .iter()
                            .map(|item| {
                                json!({
                                    "reference": item.reference,
                                    "value": item.value,
                                    "period": item.period,
                                })
                            })
                            .collect::<Vec<_>>(),
                    })
                })
                .collect::<Vec<_>>(),
        });

        info!(
            batch_id,
            groups = groups.len(),
            "issuing batched generation call"
        );
        let request = ActionRequest::new(GENERATE_ACTION, payload);
        let response = self.actions.invoke(&request).await;

        let mut outcomes = Vec::new();
        match response {
            Ok(output) => {
                let rejected: HashMap<String, String> = output
                    .as_result()
                    .and_then(|result| result.get("rejected"))
                    .and_then(|value| value.as_array())
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| {
                                let tax_id = entry.get("tax_id")?.as_str()?.to_string();
                                let error = entry
                                    .get("error")
                                    .and_then(|e| e.as_str())
                                    .unwrap_or("rejected by generation")
                                    .to_string();
                                Some((tax_id, error))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                for group in groups {
                    if let Some(error) = rejected.get(&group.tax_id) {
                        let failed = self
                            .fail_step(
                                batch_id,
                                group,
                                generate,
                                GENERATE_ACTION,
                                error.clone(),
                                None,
                            )
                            .await;
                        outcomes.push(GroupOutcome {
                            tax_id: group.tax_id.clone(),
                            final_status: group.status,
                            steps_run: 0,
                            failure: Some(format!(
                                "{}: {}",
                                failed.step.failure_label(),
                                failed.error
                            )),
                        });
                        continue;
                    }

                    match self
                        .completion
                        .commit_step(
                            batch_id,
                            &group.tax_id,
                            StepCommit::advance_to(generate.target),
                        )
                        .await
                    {
                        Ok(updated) => {
                            STEPS_EXECUTED
                                .with_label_values(&[generate.name.as_str(), "success"])
                                .inc();
                            self.emit_status_change(
                                batch_id,
                                &group.tax_id,
                                group.status,
                                generate.target,
                            )
                            .await;
                            outcomes.push(GroupOutcome {
                                tax_id: group.tax_id.clone(),
                                final_status: updated.status,
                                steps_run: 1,
                                failure: None,
                            });
                        }
                        Err(e) => {
                            let failed = self
                                .fail_step(
                                    batch_id,
                                    group,
                                    generate,
                                    GENERATE_ACTION,
                                    e.to_string(),
                                    None,
                                )
                                .await;
                            outcomes.push(GroupOutcome {
                                tax_id: group.tax_id.clone(),
                                final_status: group.status,
                                steps_run: 0,
                                failure: Some(format!(
                                    "{}: {}",
                                    failed.step.failure_label(),
                                    failed.error
                                )),
                            });
                        }
                    }
                }
            }
            Err(e) => {
                let error = e.to_string();
                for group in groups {
                    let failed = self
                        .fail_step(
                            batch_id,
                            group,
                            generate,
                            GENERATE_ACTION,
                            error.clone(),
                            None,
                        )
                        .await;
                    outcomes.push(GroupOutcome {
                        tax_id: group.tax_id.clone(),
                        final_status: group.status,
                        steps_run: 0,
                        failure: Some(format!(
                            "{}: {}",
                            failed.step.failure_label(),
                            failed.error
                        )),
                    });
                }
            }
        }
        outcomes
    }

    async fn emit_status_change(
        &self,
        batch_id: &str,
        group_id: &str,
        from: GroupStatus,
        to: GroupStatus,
    ) {
        self.emit(AuditEvent::GroupStatusChanged {
            batch_id: batch_id.to_string(),
            group_id: group_id.to_string(),
            from_status: from.status_str().to_string(),
            to_status: to.status_str().to_string(),
        })
        .await;
    }

    async fn emit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.emit(event).await;
        }
    }
}
