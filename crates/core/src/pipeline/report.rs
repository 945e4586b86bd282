//! Run report: per-group outcomes aggregated for operator visibility.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::batch::GroupStatus;

/// Outcome of one group in one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupOutcome {
    pub tax_id: String,

    /// Status the group ended the run at.
    pub final_status: GroupStatus,

    /// Committed status advances, skips included.
    pub steps_run: u32,

    /// Rendered failure line when the group stopped on an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl GroupOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// A group excluded from the run before any routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationFailure {
    pub tax_id: String,
    pub reason: String,
}

/// Aggregated outcome of one pipeline pass over a batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub batch_id: String,
    pub groups_total: u32,

    /// Groups that advanced at least one step without failing.
    pub succeeded: u32,

    /// Groups left frozen at their last good status.
    pub failed: u32,

    /// Groups already terminal when the run started.
    pub already_done: u32,

    /// Groups excluded by validation.
    pub invalid: u32,

    pub duration_ms: u64,

    pub outcomes: Vec<GroupOutcome>,
    pub validation_failures: Vec<ValidationFailure>,
}

impl RunReport {
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            groups_total: 0,
            succeeded: 0,
            failed: 0,
            already_done: 0,
            invalid: 0,
            duration_ms: 0,
            outcomes: Vec::new(),
            validation_failures: Vec::new(),
        }
    }

    /// Fold one group outcome into the counters.
    pub fn record(&mut self, outcome: GroupOutcome) {
        if outcome.succeeded() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn record_validation_failure(&mut self, tax_id: impl Into<String>, reason: impl Into<String>) {
        self.invalid += 1;
        self.validation_failures.push(ValidationFailure {
            tax_id: tax_id.into(),
            reason: reason.into(),
        });
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Multi-line summary for the runner's output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "batch {}: {} groups, {} succeeded, {} failed, {} already done, {} invalid ({} ms)",
            self.batch_id,
            self.groups_total,
            self.succeeded,
            self.failed,
            self.already_done,
            self.invalid,
            self.duration_ms,
        );
        for outcome in &self.outcomes {
            match &outcome.failure {
                Some(failure) => {
                    let _ = writeln!(
                        out,
                        "  {} [{}] {}",
                        outcome.tax_id, outcome.final_status, failure
                    );
                }
                None => {
                    let _ = writeln!(
                        out,
                        "  {} [{}] {} step(s)",
                        outcome.tax_id, outcome.final_status, outcome.steps_run
                    );
                }
            }
        }
        for failure in &self.validation_failures {
            let _ = writeln!(out, "  {} invalid: {}", failure.tax_id, failure.reason);
        }
        out
    }
}
