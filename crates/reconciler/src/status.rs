// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status synthesis: buckets, the overall condition, embedded child
//! status and pipeline-level results

use crate::cancel::Interruption;
use crate::expr::{self, ExprContext};
use crate::flags::EmbeddedStatus;
use crate::resolved::{Disposition, Dispositions, RunState, SkipRecord};
use std::collections::BTreeMap;
use tern_core::child::ChildKind;
use tern_core::condition::Condition;
use tern_core::pipeline::PipelineResultDecl;
use tern_core::pipelinerun::{
    ChildReference, ChildStatusRecord, PipelineRunReason, PipelineRunResult, PipelineRunStatus, SkippedTask,
};

/// Every task counted into exactly one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buckets {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub incomplete: usize,
    pub skipped: usize,
}

impl Buckets {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn all_done(&self) -> bool {
        self.incomplete == 0
    }
}

pub fn buckets(dispositions: &Dispositions) -> Buckets {
    let mut out = Buckets::default();
    for disposition in dispositions.values() {
        match disposition {
            Disposition::Succeeded => out.succeeded += 1,
            Disposition::Failed => out.failed += 1,
            Disposition::Cancelled => out.cancelled += 1,
            Disposition::Skipped(_) => out.skipped += 1,
            Disposition::Running | Disposition::NotCreated => out.incomplete += 1,
        }
    }
    out
}

fn progress_message(b: &Buckets) -> String {
    format!(
        "Tasks Completed: {} (Failed: {}, Cancelled {}), Incomplete: {}, Skipped: {}",
        b.completed(),
        b.failed,
        b.cancelled,
        b.incomplete,
        b.skipped
    )
}

fn terminal_message(b: &Buckets) -> String {
    format!(
        "Tasks Completed: {} (Failed: {}, Cancelled {}), Skipped: {}",
        b.completed(),
        b.failed,
        b.cancelled,
        b.skipped
    )
}

/// Derive the overall condition from the bucket counts and whatever
/// interruption dominates. `all_done` covers both sub-graphs.
pub fn overall(interruption: Interruption, b: &Buckets, all_done: bool, any_started: bool) -> Condition {
    if all_done {
        if interruption.is_timeout() {
            return Condition::failed(PipelineRunReason::PipelineRunTimeout.as_str(), terminal_message(b));
        }
        if matches!(
            interruption,
            Interruption::CancelImmediate | Interruption::CancelRunFinally | Interruption::StopRunFinally
        ) {
            return Condition::failed(PipelineRunReason::Cancelled.as_str(), terminal_message(b));
        }
        if b.failed > 0 || b.cancelled > 0 {
            return Condition::failed(PipelineRunReason::Failed.as_str(), terminal_message(b));
        }
        return Condition::succeeded(PipelineRunReason::Succeeded.as_str(), terminal_message(b));
    }

    match interruption {
        Interruption::CancelRunFinally | Interruption::StopRunFinally => Condition::running(
            PipelineRunReason::CancelledRunningFinally.as_str(),
            progress_message(b),
        ),
        _ if !any_started => Condition::running(PipelineRunReason::Started.as_str(), String::new()),
        _ => Condition::running(PipelineRunReason::Running.as_str(), progress_message(b)),
    }
}

/// Child references in creation order: DAG children before finally
/// children, declaration order within each, matrix index within a task
pub fn child_references(state: &RunState) -> Vec<ChildReference> {
    let mut refs = Vec::new();
    for task in &state.tasks {
        for child in &task.children {
            refs.push(ChildReference {
                kind: child.kind(),
                name: child.name().to_string(),
                pipeline_task_name: task.name().to_string(),
                when_expressions: task.task.when.clone(),
            });
        }
    }
    refs
}

/// The legacy full embedded maps, keyed by child name
pub fn legacy_records(
    state: &RunState,
) -> (
    BTreeMap<String, ChildStatusRecord>,
    BTreeMap<String, ChildStatusRecord>,
) {
    let mut task_runs = BTreeMap::new();
    let mut runs = BTreeMap::new();
    for task in &state.tasks {
        for child in &task.children {
            let record = ChildStatusRecord {
                pipeline_task_name: task.name().to_string(),
                status: child.status().clone(),
                when_expressions: task.task.when.clone(),
            };
            match child.kind() {
                ChildKind::TaskRun => task_runs.insert(child.name().to_string(), record),
                ChildKind::Run => runs.insert(child.name().to_string(), record),
            };
        }
    }
    (task_runs, runs)
}

/// Skip records in declaration order
pub fn skipped_list(state: &RunState, skips: &BTreeMap<String, SkipRecord>) -> Vec<SkippedTask> {
    state
        .tasks
        .iter()
        .filter_map(|task| {
            skips.get(task.name()).map(|record| SkippedTask {
                name: task.name().to_string(),
                reason: record.reason,
                when_expressions: record.when.clone(),
            })
        })
        .collect()
}

/// Resolve declared pipeline results against the final task results.
/// Results whose referents are missing are dropped silently.
pub fn pipeline_results(decls: &[PipelineResultDecl], ctx: &ExprContext) -> Vec<PipelineRunResult> {
    decls
        .iter()
        .filter_map(|decl| {
            expr::resolve_value(ctx, &decl.value)
                .ok()
                .map(|value| PipelineRunResult {
                    name: decl.name.clone(),
                    value,
                })
        })
        .collect()
}

/// Write the embedded child status in the mode the cluster selected
pub fn apply_embedded_status(status: &mut PipelineRunStatus, mode: EmbeddedStatus, state: &RunState) {
    if mode.minimal() {
        status.child_references = child_references(state);
    } else {
        status.child_references.clear();
    }
    if mode.full() {
        let (task_runs, runs) = legacy_records(state);
        status.task_runs = task_runs;
        status.runs = runs;
    } else {
        status.task_runs.clear();
        status.runs.clear();
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
