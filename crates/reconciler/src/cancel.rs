// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation and timeout handling.
//!
//! This module only decides; the reconciler issues the patches. A failed
//! patch must never finalize the run, so the decision and the effect are
//! kept apart the same way the rest of the engine splits transition from
//! execution.

use crate::resolved::RunState;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tern_core::child::ChildKind;
use tern_core::clock::Clock;
use tern_core::pipelinerun::{PipelineRun, SkipReason, SpecStatus};

/// Message patched onto children cancelled by a pipeline timeout
pub const TIMEOUT_CANCEL_MSG: &str = "TaskRun cancelled as the PipelineRun it belongs to has timed out.";
/// Message patched onto children cancelled by a pipeline cancellation
pub const CANCEL_MSG: &str = "TaskRun cancelled as the PipelineRun it belongs to has been cancelled.";

/// What dominates this pass, if anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    None,
    /// spec.status = Cancelled: stop everything now
    CancelImmediate,
    /// spec.status = CancelledRunFinally
    CancelRunFinally,
    /// spec.status = StoppedRunFinally
    StopRunFinally,
    /// The whole-pipeline deadline elapsed
    PipelineTimeout,
    /// The tasks sub-graph deadline elapsed
    TasksTimeout,
    /// The finally sub-graph deadline elapsed
    FinallyTimeout,
}

fn elapsed_over(now: DateTime<Utc>, since: DateTime<Utc>, limit: Duration) -> bool {
    // Exactly at the deadline is not over it
    match now.signed_duration_since(since).to_std() {
        Ok(elapsed) => elapsed > limit,
        Err(_) => false,
    }
}

/// Decide which interruption, if any, applies to this snapshot.
/// Explicit cancellation wins over deadlines; the pipeline deadline wins
/// over the sub-graph deadlines.
pub fn determine(run: &PipelineRun, clock: &impl Clock, default_timeout: Duration) -> Interruption {
    match run.spec.status {
        Some(SpecStatus::Cancelled) => return Interruption::CancelImmediate,
        Some(SpecStatus::CancelledRunFinally) => return Interruption::CancelRunFinally,
        Some(SpecStatus::StoppedRunFinally) => return Interruption::StopRunFinally,
        _ => {}
    }

    let now = clock.now();
    if let Some(start) = run.status.start_time {
        if let Some(limit) = run.pipeline_timeout(default_timeout) {
            if elapsed_over(now, start, limit) {
                return Interruption::PipelineTimeout;
            }
        }
        if run.status.finally_start_time.is_none() {
            if let Some(limit) = run.tasks_timeout() {
                if elapsed_over(now, start, limit) {
                    return Interruption::TasksTimeout;
                }
            }
        }
    }
    if let Some(finally_start) = run.status.finally_start_time {
        if let Some(limit) = run.finally_timeout() {
            if elapsed_over(now, finally_start, limit) {
                return Interruption::FinallyTimeout;
            }
        }
    }

    Interruption::None
}

impl Interruption {
    /// Skip reason applied to unstarted DAG tasks
    pub fn dag_skip(&self) -> Option<SkipReason> {
        match self {
            Interruption::CancelImmediate | Interruption::CancelRunFinally => {
                Some(SkipReason::GracefullyCancelledSkip)
            }
            Interruption::StopRunFinally => Some(SkipReason::GracefullyStoppedSkip),
            Interruption::PipelineTimeout => Some(SkipReason::PipelineTimedOutSkip),
            Interruption::TasksTimeout => Some(SkipReason::TasksTimedOutSkip),
            Interruption::None | Interruption::FinallyTimeout => None,
        }
    }

    /// Skip reason applied to unstarted finally tasks
    pub fn finally_skip(&self) -> Option<SkipReason> {
        match self {
            Interruption::CancelImmediate => Some(SkipReason::GracefullyCancelledSkip),
            Interruption::PipelineTimeout => Some(SkipReason::PipelineTimedOutSkip),
            Interruption::FinallyTimeout => Some(SkipReason::FinallyTimedOutSkip),
            _ => None,
        }
    }

    /// Should running DAG children be patched with a cancel
    pub fn cancels_running_dag(&self) -> bool {
        matches!(
            self,
            Interruption::CancelImmediate | Interruption::PipelineTimeout | Interruption::TasksTimeout
        )
    }

    /// Should running finally children be patched with a cancel
    pub fn cancels_running_finally(&self) -> bool {
        matches!(
            self,
            Interruption::CancelImmediate | Interruption::PipelineTimeout | Interruption::FinallyTimeout
        )
    }

    /// Does the finally sub-graph still execute
    pub fn runs_finally(&self) -> bool {
        matches!(
            self,
            Interruption::None
                | Interruption::CancelRunFinally
                | Interruption::StopRunFinally
                | Interruption::TasksTimeout
                | Interruption::FinallyTimeout
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Interruption::PipelineTimeout | Interruption::TasksTimeout | Interruption::FinallyTimeout
        )
    }

    pub fn cancel_message(&self) -> &'static str {
        if self.is_timeout() {
            TIMEOUT_CANCEL_MSG
        } else {
            CANCEL_MSG
        }
    }
}

/// A child that must be patched with a cancel request
#[derive(Debug, Clone, PartialEq)]
pub struct CancelTarget {
    pub kind: ChildKind,
    pub name: String,
}

/// Children the interruption wants cancelled: started, not yet settled,
/// not already asked to stop.
pub fn cancel_targets(state: &RunState, interruption: Interruption) -> Vec<CancelTarget> {
    let mut targets = Vec::new();
    for task in &state.tasks {
        let wanted = if task.is_finally {
            interruption.cancels_running_finally()
        } else {
            interruption.cancels_running_dag()
        };
        if !wanted {
            continue;
        }
        if task.child_disposition().is_settled() {
            continue;
        }
        for child in &task.children {
            if !child.is_done() && !child.cancel_requested() {
                targets.push(CancelTarget {
                    kind: child.kind(),
                    name: child.name().to_string(),
                });
            }
        }
    }
    targets
}

/// The soonest wall-clock deadline still ahead of this run, used to
/// requeue the key so timeouts fire without a store event.
pub fn next_deadline(
    run: &PipelineRun,
    clock: &impl Clock,
    default_timeout: Duration,
    dag_complete: bool,
) -> Option<Duration> {
    let now = clock.now();
    let mut soonest: Option<Duration> = None;
    let mut consider = |since: Option<DateTime<Utc>>, limit: Option<Duration>| {
        let (Some(since), Some(limit)) = (since, limit) else {
            return;
        };
        let elapsed = now.signed_duration_since(since).to_std().unwrap_or_default();
        let remaining = limit.saturating_sub(elapsed);
        soonest = Some(match soonest {
            Some(current) => current.min(remaining),
            None => remaining,
        });
    };

    consider(run.status.start_time, run.pipeline_timeout(default_timeout));
    if !dag_complete {
        consider(run.status.start_time, run.tasks_timeout());
    }
    consider(run.status.finally_start_time, run.finally_timeout());
    soonest
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
