// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task definitions: the unit of work a child executes

use crate::meta::ObjectMeta;
use crate::param::ParamDecl;
use serde::{Deserialize, Serialize};

/// A stored task definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub meta: ObjectMeta,
    pub spec: TaskSpec,
}

/// The body of a task definition. Steps are opaque to the reconciler; the
/// task-run controller executes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TaskResultDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<TaskWorkspaceDecl>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
}

impl TaskSpec {
    /// Declared result by name
    pub fn result(&self, name: &str) -> Option<&TaskResultDecl> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Declared workspace by name
    pub fn workspace(&self, name: &str) -> Option<&TaskWorkspaceDecl> {
        self.workspaces.iter().find(|w| w.name == name)
    }
}

/// A result the task promises to emit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskResultDecl {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A workspace the task consumes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskWorkspaceDecl {
    pub name: String,
    pub optional: bool,
    pub read_only: bool,
}

/// One container invocation within a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Step {
    pub name: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}
