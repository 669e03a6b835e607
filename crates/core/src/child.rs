// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child execution records: the built-in TaskRun and the custom-task Run.
//!
//! Children are driven by their own controllers; the reconciler only
//! creates them, patches their spec (cancel, retry) and reads their
//! status through the narrow capability surface on [`Child`].

use crate::condition::Condition;
use crate::meta::ObjectMeta;
use crate::param::{Param, ParamValue};
use crate::pipeline::TaskRef;
use crate::task::TaskSpec;
use crate::workspace::WorkspaceBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reason set on a task run whose spec requested cancellation
pub const TASK_RUN_CANCELLED: &str = "TaskRunCancelled";
/// Reason set on a custom run whose spec requested cancellation
pub const RUN_CANCELLED: &str = "RunCancelled";

/// A built-in child execution record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskRun {
    pub meta: ObjectMeta,
    pub spec: TaskRunSpec,
    pub status: ChildStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRunSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceBinding>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Written by the reconciler to request cancellation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CancelRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Propagated opaquely to the executing pod
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_resources: Option<serde_json::Value>,
}

/// Cancellation request written into a child spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelRequest {
    #[serde(rename = "TaskRunCancelled")]
    TaskRunCancelled,
    #[serde(rename = "RunCancelled")]
    RunCancelled,
}

/// Status shared by both child kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildStatus {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ChildResult>,
    /// Prior attempts, preserved across retries
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retries_status: Vec<ChildStatus>,
}

impl ChildStatus {
    pub fn condition(&self) -> Option<&Condition> {
        self.conditions.first()
    }

    pub fn set_condition(&mut self, condition: Condition) {
        self.conditions = vec![condition];
    }

    /// Attempts already consumed by retries
    pub fn attempts(&self) -> u32 {
        self.retries_status.len() as u32
    }
}

/// A result emitted by a finished child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildResult {
    pub name: String,
    pub value: ParamValue,
}

/// A custom-task child execution record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Run {
    pub meta: ObjectMeta,
    pub spec: RunSpec,
    pub status: ChildStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_ref: Option<TaskRef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CancelRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

/// Which kind of child a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildKind {
    TaskRun,
    Run,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::TaskRun => "TaskRun",
            ChildKind::Run => "Run",
        }
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged union over the two child kinds. The reconciler depends only on
/// this capability surface, never on the concrete kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Child {
    TaskRun(TaskRun),
    Run(Run),
}

impl Child {
    pub fn kind(&self) -> ChildKind {
        match self {
            Child::TaskRun(_) => ChildKind::TaskRun,
            Child::Run(_) => ChildKind::Run,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Child::TaskRun(tr) => &tr.meta,
            Child::Run(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Child::TaskRun(tr) => &mut tr.meta,
            Child::Run(r) => &mut r.meta,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    pub fn status(&self) -> &ChildStatus {
        match self {
            Child::TaskRun(tr) => &tr.status,
            Child::Run(r) => &r.status,
        }
    }

    pub fn status_mut(&mut self) -> &mut ChildStatus {
        match self {
            Child::TaskRun(tr) => &mut tr.status,
            Child::Run(r) => &mut r.status,
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.status().condition()
    }

    /// Terminal in either direction
    pub fn is_done(&self) -> bool {
        self.condition().is_some_and(Condition::is_terminal)
    }

    pub fn is_successful(&self) -> bool {
        self.condition().is_some_and(Condition::is_true)
    }

    pub fn is_failure(&self) -> bool {
        self.condition().is_some_and(Condition::is_false) && !self.is_cancelled()
    }

    /// Failed because cancellation was requested; never retried
    pub fn is_cancelled(&self) -> bool {
        self.condition()
            .is_some_and(|c| c.is_false() && (c.reason == TASK_RUN_CANCELLED || c.reason == RUN_CANCELLED))
    }

    /// A cancel request has been written, whether or not it has landed
    pub fn cancel_requested(&self) -> bool {
        match self {
            Child::TaskRun(tr) => tr.spec.status.is_some(),
            Child::Run(r) => r.spec.status.is_some(),
        }
    }

    pub fn results(&self) -> &[ChildResult] {
        &self.status().results
    }

    /// Pipeline-task label value, used to associate children on recovery
    pub fn pipeline_task(&self) -> Option<&str> {
        self.meta().labels.get(crate::labels::PIPELINE_TASK).map(String::as_str)
    }

    /// Matrix combination index from labels; zero when absent
    pub fn matrix_index(&self) -> usize {
        self.meta()
            .labels
            .get(crate::labels::MATRIX_INDEX)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "child_tests.rs"]
mod tests;
