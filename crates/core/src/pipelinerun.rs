// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pipeline-run root entity and its persisted status

use crate::child::{ChildKind, ChildStatus};
use crate::condition::{Condition, ConditionStatus};
use crate::meta::{ObjectMeta, RunKey};
use crate::param::{Param, ParamValue};
use crate::pipeline::{PipelineSpec, ResolverRef, WhenExpression};
use crate::workspace::WorkspaceBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A pipeline run: the root entity this engine reconciles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRun {
    pub meta: ObjectMeta,
    pub spec: PipelineRunSpec,
    pub status: PipelineRunStatus,
}

impl PipelineRun {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            ..Default::default()
        }
    }

    pub fn key(&self) -> RunKey {
        self.meta.key()
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.status.condition()
    }

    /// Terminal once the completion time is assigned
    pub fn is_done(&self) -> bool {
        self.status.completion_time.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.spec.status == Some(SpecStatus::Pending)
    }

    /// Any of the three cancellation spellings
    pub fn cancel_requested(&self) -> bool {
        matches!(
            self.spec.status,
            Some(SpecStatus::Cancelled | SpecStatus::CancelledRunFinally | SpecStatus::StoppedRunFinally)
        )
    }

    pub fn has_started(&self) -> bool {
        self.status.start_time.is_some()
    }

    /// Effective pipeline timeout; `timeouts` wins over the legacy field,
    /// zero means no limit.
    pub fn pipeline_timeout(&self, default: Duration) -> Option<Duration> {
        let configured = self
            .spec
            .timeouts
            .as_ref()
            .and_then(|t| t.pipeline)
            .or(self.spec.timeout)
            .unwrap_or(default);
        (!configured.is_zero()).then_some(configured)
    }

    /// Timeout for the tasks sub-graph, if one is configured
    pub fn tasks_timeout(&self) -> Option<Duration> {
        let configured = self.spec.timeouts.as_ref().and_then(|t| t.tasks)?;
        (!configured.is_zero()).then_some(configured)
    }

    /// Timeout for the finally sub-graph, if one is configured
    pub fn finally_timeout(&self) -> Option<Duration> {
        let configured = self.spec.timeouts.as_ref().and_then(|t| t.finally)?;
        (!configured.is_zero()).then_some(configured)
    }
}

/// Immutable request half of a pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRunSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_ref: Option<PipelineRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    /// Per-pipeline-task overrides, highest precedence
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_run_specs: Vec<PipelineTaskRunSpec>,
    /// Pending or one of the cancellation states; unset means run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SpecStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<TimeoutFields>,
    /// Legacy single timeout, superseded by `timeouts`
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<serde_json::Value>,
}

/// Reference to a stored or resolver-fetched pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverRef>,
}

impl PipelineRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Per-task execution overrides supplied on the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineTaskRunSpec {
    pub pipeline_task_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_resources: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// User-requested lifecycle override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecStatus {
    /// Hold the run: no start time, no children
    #[serde(rename = "PipelineRunPending")]
    Pending,
    /// Stop immediately, cancelling every running child
    #[serde(rename = "Cancelled")]
    Cancelled,
    /// Stop scheduling, let running tasks finish, then run finally
    #[serde(rename = "CancelledRunFinally")]
    CancelledRunFinally,
    /// Like CancelledRunFinally but lets running DAG tasks complete first
    #[serde(rename = "StoppedRunFinally")]
    StoppedRunFinally,
}

/// Timeouts for the whole run and its two sub-graphs; zero disables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutFields {
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Duration>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Duration>,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub finally: Option<Duration>,
}

/// Mutable status half of a pipeline run, owned by the reconciler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineRunStatus {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finally_start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// Resolved spec frozen for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pipeline_results: Vec<PipelineRunResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_tasks: Vec<SkippedTask>,
    /// Minimal embedded child status
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_references: Vec<ChildReference>,
    /// Legacy full embedded status, keyed by child name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub task_runs: BTreeMap<String, ChildStatusRecord>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub runs: BTreeMap<String, ChildStatusRecord>,
}

impl PipelineRunStatus {
    pub fn condition(&self) -> Option<&Condition> {
        self.conditions.first()
    }

    /// Replace the canonical condition. Terminal conditions are sticky:
    /// once True/False is set, a later Unknown is ignored.
    pub fn set_condition(&mut self, condition: Condition) {
        if let Some(current) = self.condition() {
            if current.is_terminal() && condition.status == ConditionStatus::Unknown {
                return;
            }
        }
        self.conditions = vec![condition];
    }
}

/// A resolved pipeline-level result binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunResult {
    pub name: String,
    pub value: ParamValue,
}

/// Record of a task that will never run, with exactly one reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedTask {
    pub name: String,
    pub reason: SkipReason,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when_expressions: Vec<WhenExpression>,
}

/// The closed set of skip reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    WhenExpressionsSkip,
    ParentTasksSkip,
    #[serde(rename = "MissingResultsSkip", alias = "MissingResults")]
    MissingResultsSkip,
    GracefullyCancelledSkip,
    GracefullyStoppedSkip,
    PipelineTimedOutSkip,
    TasksTimedOutSkip,
    FinallyTimedOutSkip,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::WhenExpressionsSkip => "WhenExpressionsSkip",
            SkipReason::ParentTasksSkip => "ParentTasksSkip",
            SkipReason::MissingResultsSkip => "MissingResultsSkip",
            SkipReason::GracefullyCancelledSkip => "GracefullyCancelledSkip",
            SkipReason::GracefullyStoppedSkip => "GracefullyStoppedSkip",
            SkipReason::PipelineTimedOutSkip => "PipelineTimedOutSkip",
            SkipReason::TasksTimedOutSkip => "TasksTimedOutSkip",
            SkipReason::FinallyTimedOutSkip => "FinallyTimedOutSkip",
        }
    }
}

/// Minimal pointer from a run to one of its children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildReference {
    pub kind: ChildKind,
    pub name: String,
    pub pipeline_task_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when_expressions: Vec<WhenExpression>,
}

/// Legacy full embedded child status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildStatusRecord {
    pub pipeline_task_name: String,
    pub status: ChildStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub when_expressions: Vec<WhenExpression>,
}

/// Reasons written to the pipeline-run condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRunReason {
    // progress
    Started,
    Running,
    ResolvingPipelineRef,
    ResolvingTaskRef,
    PipelineRunPending,
    CancelledRunningFinally,
    // transient trouble
    CouldntCancel,
    CouldntTimeOut,
    // terminal
    Succeeded,
    Failed,
    Cancelled,
    PipelineRunTimeout,
    // permanent configuration failures
    CouldntGetPipeline,
    CouldntGetTask,
    CouldntGetResource,
    FailedValidation,
    InvalidBindings,
    ParameterMissing,
    ParameterTypeMismatch,
    ObjectParameterMissKeys,
    InvalidGraph,
    InvalidTaskResultReference,
    RequiredWorkspaceMarkedOptional,
}

impl PipelineRunReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineRunReason::Started => "Started",
            PipelineRunReason::Running => "Running",
            PipelineRunReason::ResolvingPipelineRef => "ResolvingPipelineRef",
            PipelineRunReason::ResolvingTaskRef => "ResolvingTaskRef",
            PipelineRunReason::PipelineRunPending => "PipelineRunPending",
            PipelineRunReason::CancelledRunningFinally => "CancelledRunningFinally",
            PipelineRunReason::CouldntCancel => "CouldntCancel",
            PipelineRunReason::CouldntTimeOut => "CouldntTimeOut",
            PipelineRunReason::Succeeded => "Succeeded",
            PipelineRunReason::Failed => "Failed",
            PipelineRunReason::Cancelled => "Cancelled",
            PipelineRunReason::PipelineRunTimeout => "PipelineRunTimeout",
            PipelineRunReason::CouldntGetPipeline => "CouldntGetPipeline",
            PipelineRunReason::CouldntGetTask => "CouldntGetTask",
            PipelineRunReason::CouldntGetResource => "CouldntGetResource",
            PipelineRunReason::FailedValidation => "FailedValidation",
            PipelineRunReason::InvalidBindings => "InvalidBindings",
            PipelineRunReason::ParameterMissing => "ParameterMissing",
            PipelineRunReason::ParameterTypeMismatch => "ParameterTypeMismatch",
            PipelineRunReason::ObjectParameterMissKeys => "ObjectParameterMissKeys",
            PipelineRunReason::InvalidGraph => "InvalidGraph",
            PipelineRunReason::InvalidTaskResultReference => "InvalidTaskResultReference",
            PipelineRunReason::RequiredWorkspaceMarkedOptional => "RequiredWorkspaceMarkedOptional",
        }
    }
}

impl std::fmt::Display for PipelineRunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "pipelinerun_tests.rs"]
mod tests;
