// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DAG construction and scheduling order.
//!
//! Edges come from two sources: explicit `runAfter` and every result or
//! status reference found in a task's params, matrix and when
//! expressions. The finally sub-graph has no internal edges; its tasks
//! all run after the DAG completes.

use crate::expr::classify_references;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tern_core::pipeline::{PipelineSpec, PipelineTask};
use thiserror::Error;

/// Problems that make a pipeline graph unschedulable
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("pipeline graph has a cycle through: {tasks:?}")]
    Cycle { tasks: Vec<String> },

    #[error("task {task:?} depends on itself")]
    SelfDependency { task: String },

    #[error("task {task:?} references unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("finally task {task:?} may only reference DAG tasks, not {dependency:?}")]
    FinallyDependency { task: String, dependency: String },
}

/// Every string in a task that can carry `$( )` references
pub fn reference_strings(task: &PipelineTask) -> Vec<&str> {
    let mut out = Vec::new();
    fn push_value<'a>(out: &mut Vec<&'a str>, value: &'a tern_core::param::ParamValue) {
        match value {
            tern_core::param::ParamValue::String(s) => out.push(s.as_str()),
            tern_core::param::ParamValue::Array(items) => out.extend(items.iter().map(String::as_str)),
            tern_core::param::ParamValue::Object(fields) => out.extend(fields.values().map(String::as_str)),
        }
    }
    for param in &task.params {
        push_value(&mut out, &param.value);
    }
    if let Some(matrix) = &task.matrix {
        for param in &matrix.params {
            push_value(&mut out, &param.value);
        }
    }
    for when in &task.when {
        out.push(when.input.as_str());
        out.extend(when.values.iter().map(String::as_str));
    }
    out
}

/// Tasks a single task depends on: `runAfter` plus referenced tasks
pub fn dependencies(task: &PipelineTask) -> BTreeSet<String> {
    let mut deps: BTreeSet<String> = task.run_after.iter().cloned().collect();
    deps.extend(classify_references(reference_strings(task)).referenced_tasks());
    deps
}

/// The main DAG in executable form
#[derive(Debug, Clone)]
pub struct Graph {
    /// Declaration order, which is also the tie-break order everywhere
    nodes: Vec<String>,
    parents: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    /// Build and validate the DAG from the pipeline's `tasks` list
    pub fn build(tasks: &[PipelineTask]) -> Result<Self, GraphError> {
        let nodes: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();
        let known: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();

        let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for task in tasks {
            let deps = dependencies(task);
            for dep in &deps {
                if dep == &task.name {
                    return Err(GraphError::SelfDependency {
                        task: task.name.clone(),
                    });
                }
                if !known.contains(dep.as_str()) {
                    return Err(GraphError::UnknownDependency {
                        task: task.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            parents.insert(task.name.clone(), deps);
        }

        let graph = Self { nodes, parents };
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), GraphError> {
        // Kahn's algorithm; whatever cannot be ordered sits on a cycle
        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .parents
            .iter()
            .map(|(n, ps)| (n.as_str(), ps.iter().map(String::as_str).collect()))
            .collect();
        let mut queue: VecDeque<&str> = self
            .nodes
            .iter()
            .map(String::as_str)
            .filter(|n| remaining.get(n).is_some_and(BTreeSet::is_empty))
            .collect();

        let mut ordered = 0usize;
        while let Some(node) = queue.pop_front() {
            ordered += 1;
            for candidate in &self.nodes {
                if let Some(deps) = remaining.get_mut(candidate.as_str()) {
                    if deps.remove(node) && deps.is_empty() {
                        queue.push_back(candidate.as_str());
                    }
                }
            }
        }

        if ordered < self.nodes.len() {
            let stuck: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| remaining.get(n.as_str()).is_some_and(|d| !d.is_empty()))
                .cloned()
                .collect();
            return Err(GraphError::Cycle { tasks: stuck });
        }
        Ok(())
    }

    pub fn parents(&self, node: &str) -> impl Iterator<Item = &str> {
        self.parents
            .get(node)
            .into_iter()
            .flat_map(|ps| ps.iter().map(String::as_str))
    }

    /// The ready frontier: nodes whose parents are all settled and which
    /// are still pending, in declaration order. This is the structural
    /// scheduling gate; when-gating and skip classification layer on top
    /// of it in the reconciler, and settle nodes, so callers recompute
    /// the frontier until it drains.
    pub fn schedulable(
        &self,
        settled: impl Fn(&str) -> bool,
        pending: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| pending(n))
            .filter(|n| self.parents(n).all(&settled))
            .cloned()
            .collect()
    }

    /// True once every node is settled: nothing can be scheduled any more
    pub fn is_complete(&self, settled: impl Fn(&str) -> bool) -> bool {
        self.nodes.iter().all(|n| settled(n))
    }
}

/// Finally tasks may reference DAG tasks only
pub fn validate_finally(spec: &PipelineSpec) -> Result<(), GraphError> {
    let dag: BTreeSet<&str> = spec.tasks.iter().map(|t| t.name.as_str()).collect();
    for task in &spec.finally {
        for dep in classify_references(reference_strings(task)).referenced_tasks() {
            if !dag.contains(dep.as_str()) {
                return Err(GraphError::FinallyDependency {
                    task: task.name.clone(),
                    dependency: dep,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
