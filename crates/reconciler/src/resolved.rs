// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolved pipeline tasks and the in-memory run snapshot.
//!
//! A resolved task merges the pipeline-task with its referenced task
//! definition and carries pointers to the children that already exist in
//! the store. Association is by label, which is what makes replays reuse
//! children instead of creating duplicates.

use crate::graph::Graph;
use std::collections::BTreeMap;
use tern_core::child::Child;
use tern_core::param::ParamValue;
use tern_core::pipeline::{PipelineSpec, PipelineTask};
use tern_core::pipelinerun::SkipReason;
use tern_core::task::TaskSpec;

/// Where a task stands within the current snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// No child exists yet and no skip has been decided
    NotCreated,
    /// At least one child exists and none is finally settled
    Running,
    Succeeded,
    /// Final failure, retries exhausted
    Failed,
    Cancelled,
    Skipped(SkipReason),
}

impl Disposition {
    /// Settled tasks gate their dependents
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Disposition::Succeeded | Disposition::Failed | Disposition::Cancelled | Disposition::Skipped(_)
        )
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Disposition::Skipped(_))
    }

    /// The value `$(tasks.<name>.status)` resolves to
    pub fn status_value(&self) -> &'static str {
        match self {
            Disposition::Succeeded => "Succeeded",
            Disposition::Failed | Disposition::Cancelled => "Failed",
            _ => "None",
        }
    }
}

/// A decided skip, with the evaluated when expressions for the record
#[derive(Debug, Clone, PartialEq)]
pub struct SkipRecord {
    pub reason: SkipReason,
    pub when: Vec<tern_core::pipeline::WhenExpression>,
}

/// Disposition of every task, keyed by task name
pub type Dispositions = BTreeMap<String, Disposition>;

/// A pipeline task merged with its definition and its children
#[derive(Debug, Clone)]
pub struct ResolvedTask {
    pub task: PipelineTask,
    /// The referenced or embedded definition; `None` for custom tasks
    pub spec: Option<TaskSpec>,
    pub is_finally: bool,
    /// Existing children, ordered by matrix index
    pub children: Vec<Child>,
    /// Combination count once the matrix has been expanded; 1 otherwise
    pub expected_children: Option<usize>,
}

impl ResolvedTask {
    pub fn new(task: PipelineTask, spec: Option<TaskSpec>, is_finally: bool) -> Self {
        Self {
            task,
            spec,
            is_finally,
            children: Vec::new(),
            expected_children: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.task.name
    }

    pub fn is_matrixed(&self) -> bool {
        self.task.matrix.as_ref().is_some_and(|m| !m.params.is_empty())
    }

    /// Execution state derived purely from the children
    pub fn child_disposition(&self) -> Disposition {
        if self.children.is_empty() {
            return Disposition::NotCreated;
        }

        // With a matrix, children may still be missing for some
        // combinations; only a full, settled set can succeed.
        let expected = self.expected_children.unwrap_or(1);

        let mut any_running = self.children.len() < expected;
        let mut any_cancelled = false;
        let mut any_failed = false;
        for child in &self.children {
            if child.is_cancelled() {
                any_cancelled = true;
            } else if child.is_failure() {
                if child.status().attempts() < self.task.retries {
                    any_running = true; // a retry is still owed
                } else {
                    any_failed = true;
                }
            } else if !child.is_successful() {
                any_running = true;
            }
        }

        if any_running {
            Disposition::Running
        } else if any_failed {
            Disposition::Failed
        } else if any_cancelled {
            Disposition::Cancelled
        } else {
            Disposition::Succeeded
        }
    }

    /// Failed children that still have a retry budget left
    pub fn children_needing_retry(&self) -> Vec<&Child> {
        self.children
            .iter()
            .filter(|c| c.is_failure() && c.status().attempts() < self.task.retries)
            .collect()
    }

    /// Results exposed to downstream expressions. Matrixed tasks expose
    /// none; there is no single producing child to read from.
    pub fn results(&self) -> Option<BTreeMap<String, ParamValue>> {
        if self.is_matrixed() || !matches!(self.child_disposition(), Disposition::Succeeded) {
            return None;
        }
        let child = self.children.first()?;
        Some(
            child
                .results()
                .iter()
                .map(|r| (r.name.clone(), r.value.clone()))
                .collect(),
        )
    }
}

/// The in-memory snapshot one reconcile pass works against
#[derive(Debug, Clone)]
pub struct RunState {
    /// DAG tasks then finally tasks, each in declaration order
    pub tasks: Vec<ResolvedTask>,
    pub graph: Graph,
}

impl RunState {
    pub fn new(spec: &PipelineSpec, graph: Graph, definitions: impl Fn(&str) -> Option<TaskSpec>) -> Self {
        let mut tasks = Vec::with_capacity(spec.tasks.len() + spec.finally.len());
        for task in &spec.tasks {
            tasks.push(ResolvedTask::new(task.clone(), definitions(&task.name), false));
        }
        for task in &spec.finally {
            tasks.push(ResolvedTask::new(task.clone(), definitions(&task.name), true));
        }
        Self { tasks, graph }
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedTask> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ResolvedTask> {
        self.tasks.iter_mut().find(|t| t.name() == name)
    }

    pub fn dag_tasks(&self) -> impl Iterator<Item = &ResolvedTask> {
        self.tasks.iter().filter(|t| !t.is_finally)
    }

    pub fn finally_tasks(&self) -> impl Iterator<Item = &ResolvedTask> {
        self.tasks.iter().filter(|t| t.is_finally)
    }

    /// Adopt existing children by their pipeline-task label. Children
    /// with no matching task are ignored; they belong to nobody we know.
    pub fn associate_children(&mut self, children: Vec<Child>) {
        for child in children {
            let Some(task_name) = child.pipeline_task().map(str::to_string) else {
                continue;
            };
            if let Some(task) = self.get_mut(&task_name) {
                task.children.push(child);
            }
        }
        for task in &mut self.tasks {
            task.children.sort_by_key(Child::matrix_index);
            if !task.is_matrixed() && !task.children.is_empty() {
                task.expected_children = Some(1);
            }
        }
    }

    /// Results of every settled task, for expression contexts
    pub fn known_results(&self) -> BTreeMap<String, BTreeMap<String, ParamValue>> {
        self.tasks
            .iter()
            .filter_map(|t| t.results().map(|r| (t.name().to_string(), r)))
            .collect()
    }
}

#[cfg(test)]
#[path = "resolved_tests.rs"]
mod tests;
