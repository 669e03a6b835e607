// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline definitions: the DAG and finally sub-graph of pipeline tasks

use crate::meta::ObjectMeta;
use crate::param::{Param, ParamDecl, ParamValue};
use crate::task::TaskSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// A stored pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub meta: ObjectMeta,
    pub spec: PipelineSpec,
}

/// The body of a pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDecl>,
    /// The main DAG, in declaration order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<PipelineTask>,
    /// Runs unconditionally once the DAG is done; may reference DAG tasks only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finally: Vec<PipelineTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<PipelineResultDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<PipelineWorkspaceDecl>,
}

impl PipelineSpec {
    /// DAG tasks followed by finally tasks
    pub fn all_tasks(&self) -> impl Iterator<Item = &PipelineTask> {
        self.tasks.iter().chain(self.finally.iter())
    }

    pub fn task(&self, name: &str) -> Option<&PipelineTask> {
        self.all_tasks().find(|t| t.name == name)
    }

    pub fn is_dag_task(&self, name: &str) -> bool {
        self.tasks.iter().any(|t| t.name == name)
    }

    pub fn workspace(&self, name: &str) -> Option<&PipelineWorkspaceDecl> {
        self.workspaces.iter().find(|w| w.name == name)
    }

    /// Structural validation: unique names, one definition source per task,
    /// no `runAfter` on finally tasks, `runAfter` targets exist in the DAG.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut seen = HashSet::new();
        for task in self.all_tasks() {
            if task.name.is_empty() {
                return Err(SpecError::UnnamedTask);
            }
            if !seen.insert(task.name.as_str()) {
                return Err(SpecError::DuplicateTask {
                    name: task.name.clone(),
                });
            }
            match (&task.task_ref, &task.task_spec) {
                (None, None) => {
                    return Err(SpecError::NoDefinition {
                        task: task.name.clone(),
                    })
                }
                (Some(_), Some(_)) => {
                    return Err(SpecError::AmbiguousDefinition {
                        task: task.name.clone(),
                    })
                }
                _ => {}
            }
        }

        for task in &self.tasks {
            for dep in &task.run_after {
                if !self.is_dag_task(dep) {
                    return Err(SpecError::UnknownRunAfter {
                        task: task.name.clone(),
                        dep: dep.clone(),
                    });
                }
            }
        }

        for task in &self.finally {
            if !task.run_after.is_empty() {
                return Err(SpecError::RunAfterOnFinally {
                    task: task.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Structural problems in a pipeline spec
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("pipeline task without a name")]
    UnnamedTask,
    #[error("duplicate pipeline task name {name:?}")]
    DuplicateTask { name: String },
    #[error("pipeline task {task:?} has neither taskRef nor taskSpec")]
    NoDefinition { task: String },
    #[error("pipeline task {task:?} has both taskRef and taskSpec")]
    AmbiguousDefinition { task: String },
    #[error("pipeline task {task:?} runs after unknown task {dep:?}")]
    UnknownRunAfter { task: String, dep: String },
    #[error("finally task {task:?} must not declare runAfter")]
    RunAfterOnFinally { task: String },
}

/// One node of the pipeline graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_ref: Option<TaskRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<TaskSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    /// Fan the task out once per cartesian combination of these values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matrix: Option<Matrix>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_after: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<WhenExpression>,
    pub retries: u32,
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceTaskBinding>,
}

impl PipelineTask {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_ref(mut self, task: impl Into<String>) -> Self {
        self.task_ref = Some(TaskRef::named(task));
        self
    }

    pub fn with_spec(mut self, spec: TaskSpec) -> Self {
        self.task_spec = Some(spec);
        self
    }

    pub fn run_after(mut self, deps: &[&str]) -> Self {
        self.run_after = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    pub fn with_when(mut self, when: WhenExpression) -> Self {
        self.when.push(when);
        self
    }

    /// True when the referenced definition lives outside the built-in kind
    pub fn is_custom(&self) -> bool {
        self.task_ref
            .as_ref()
            .is_some_and(|r| r.api_version.is_some())
    }
}

/// Reference to a task definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskRef {
    pub name: String,
    /// Set (with `kind`) for custom-task children
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Bundle-packaged reference; gated by a feature flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
    /// Asynchronous remote resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverRef>,
}

impl TaskRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Reference handled by an external resolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverRef {
    pub resolver: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// Matrix parameters; every value must be an array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Matrix {
    pub params: Vec<Param>,
}

/// A guarded predicate scoped to a single task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenExpression {
    pub input: String,
    pub operator: WhenOperator,
    pub values: Vec<String>,
}

impl WhenExpression {
    pub fn is_in(input: impl Into<String>, values: &[&str]) -> Self {
        Self {
            input: input.into(),
            operator: WhenOperator::In,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn not_in(input: impl Into<String>, values: &[&str]) -> Self {
        Self {
            input: input.into(),
            operator: WhenOperator::NotIn,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhenOperator {
    In,
    #[serde(rename = "notin")]
    NotIn,
}

/// A result the pipeline surfaces, resolved from task results at the end
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineResultDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: String,
}

/// A workspace the pipeline expects the run to bind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineWorkspaceDecl {
    pub name: String,
    pub optional: bool,
}

/// Maps a pipeline workspace onto a task workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkspaceTaskBinding {
    /// Workspace name declared by the task
    pub name: String,
    /// Pipeline workspace to map in; defaults to `name`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl WorkspaceTaskBinding {
    /// The pipeline workspace this binding draws from
    pub fn pipeline_workspace(&self) -> &str {
        self.workspace.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
