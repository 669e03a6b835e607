// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Label contract written by the reconciler and consumed by selectors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pipeline name the object belongs to
pub const PIPELINE: &str = "tern.dev/pipeline";
/// Pipeline-run name the object belongs to
pub const PIPELINE_RUN: &str = "tern.dev/pipelineRun";
/// Pipeline-task name the child executes
pub const PIPELINE_TASK: &str = "tern.dev/pipelineTask";
/// Which sub-graph the child belongs to: `tasks` or `finally`
pub const MEMBER_OF: &str = "tern.dev/memberOf";
/// Zero-based matrix combination index, present only on fanned-out children
pub const MATRIX_INDEX: &str = "tern.dev/matrixIndex";

pub const MEMBER_TASKS: &str = "tasks";
pub const MEMBER_FINALLY: &str = "finally";

/// Annotation naming the co-location hint for a shared workspace
pub const AFFINITY_ASSISTANT: &str = "tern.dev/affinityAssistant";

/// An equality-based label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector(pub BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select every child of a pipeline run
    pub fn for_run(run_name: &str) -> Self {
        let mut s = Self::new();
        s.0.insert(PIPELINE_RUN.to_string(), run_name.to_string());
        s
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.0.insert(key.to_string(), value.to_string());
        self
    }

    /// True if every selector entry matches the given label set
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
    }
}
