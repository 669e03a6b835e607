// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud-event types mirroring pipeline-run transitions

use tern_core::condition::{Condition, ConditionStatus};
use tern_core::pipelinerun::PipelineRunReason;

/// The cloud events a run can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    Started,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::Started => "pipelinerun.started",
            RunEvent::Running => "pipelinerun.running",
            RunEvent::Succeeded => "pipelinerun.succeeded",
            RunEvent::Failed => "pipelinerun.failed",
            RunEvent::Cancelled => "pipelinerun.cancelled",
            RunEvent::TimedOut => "pipelinerun.timed-out",
        }
    }
}

/// Map a condition change onto the event to emit, if any. Identical
/// (status, reason) pairs are not a transition.
pub fn for_transition(before: Option<&Condition>, after: &Condition) -> Option<RunEvent> {
    if let Some(before) = before {
        if before.status == after.status && before.reason == after.reason {
            return None;
        }
    }

    let event = match after.status {
        ConditionStatus::Unknown => {
            if after.reason == PipelineRunReason::PipelineRunPending.as_str() {
                // Held runs are not running; nothing to mirror yet
                return None;
            }
            if after.reason == PipelineRunReason::Started.as_str() {
                RunEvent::Started
            } else {
                RunEvent::Running
            }
        }
        ConditionStatus::True => RunEvent::Succeeded,
        ConditionStatus::False => {
            if after.reason == PipelineRunReason::PipelineRunTimeout.as_str() {
                RunEvent::TimedOut
            } else if after.reason == PipelineRunReason::Cancelled.as_str() {
                RunEvent::Cancelled
            } else {
                RunEvent::Failed
            }
        }
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        started = { Condition::running("Started", ""), RunEvent::Started },
        running = { Condition::running("Running", ""), RunEvent::Running },
        resolving = { Condition::running("ResolvingTaskRef", ""), RunEvent::Running },
        succeeded = { Condition::succeeded("Succeeded", ""), RunEvent::Succeeded },
        failed = { Condition::failed("Failed", ""), RunEvent::Failed },
        cancelled = { Condition::failed("Cancelled", ""), RunEvent::Cancelled },
        timed_out = { Condition::failed("PipelineRunTimeout", ""), RunEvent::TimedOut },
    )]
    fn fresh_conditions_map_to_events(after: Condition, expected: RunEvent) {
        assert_eq!(for_transition(None, &after), Some(expected));
    }

    #[test]
    fn unchanged_condition_is_not_a_transition() {
        let cond = Condition::running("Running", "1 incomplete");
        let same = Condition::running("Running", "0 incomplete");
        // Same status and reason: message changes alone do not re-emit
        assert_eq!(for_transition(Some(&cond), &same), None);
    }

    #[test]
    fn reason_change_within_unknown_is_a_transition() {
        let before = Condition::running("Started", "");
        let after = Condition::running("Running", "");
        assert_eq!(for_transition(Some(&before), &after), Some(RunEvent::Running));
    }

    #[test]
    fn pending_runs_emit_nothing() {
        let pending = Condition::running("PipelineRunPending", "held");
        assert_eq!(for_transition(None, &pending), None);
    }

    #[test]
    fn event_type_strings() {
        assert_eq!(RunEvent::TimedOut.event_type(), "pipelinerun.timed-out");
        assert_eq!(RunEvent::Started.event_type(), "pipelinerun.started");
    }
}
