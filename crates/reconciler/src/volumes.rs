// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace and volume planning.
//!
//! Maps run-level workspace bindings onto per-task bindings, decides
//! which claims to materialize from templates (one per run per template,
//! owned by the run, created only when a consuming task is about to
//! start) and computes the co-location hint names.

use crate::expr::WorkspaceRef;
use std::collections::{BTreeMap, BTreeSet};
use tern_core::labels;
use tern_core::meta::{ObjectMeta, OwnerReference};
use tern_core::pipeline::{PipelineSpec, PipelineTask};
use tern_core::pipelinerun::PipelineRun;
use tern_core::task::TaskSpec;
use tern_core::workspace::{PersistentClaim, WorkspaceBinding};
use thiserror::Error;

/// Why workspace bindings are inconsistent
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkspaceError {
    /// A required pipeline workspace has no run binding
    #[error("pipeline workspace {workspace:?} is required but the run does not bind it")]
    MissingBinding { workspace: String },

    /// The run binds a workspace the pipeline never declared
    #[error("run binds workspace {workspace:?} which the pipeline does not declare")]
    UndeclaredBinding { workspace: String },

    /// A task maps a pipeline workspace that does not exist
    #[error("task {task:?} maps unknown pipeline workspace {workspace:?}")]
    UnknownPipelineWorkspace { task: String, workspace: String },

    /// The task has a workspace with no mapping from the pipeline task
    #[error("task {task:?} declares workspace {workspace:?} but the pipeline task does not bind it")]
    MissingTaskBinding { task: String, workspace: String },

    /// The task requires the workspace but the pipeline treats it as
    /// optional and the run omitted it
    #[error("task {task:?} requires workspace {workspace:?} which is marked optional and unbound")]
    RequiredMarkedOptional { task: String, workspace: String },
}

/// Name of the claim materialized for a volume-claim template
pub fn claim_name(run: &str, workspace: &str) -> String {
    format!("{run}-{workspace}")
}

/// Name of the affinity-assistant hint for a shared workspace
pub fn assistant_name(run: &str, workspace: &str) -> String {
    format!("affinity-assistant-{run}-{workspace}")
}

/// The run-level workspace plan for one reconcile pass
#[derive(Debug, Clone, Default)]
pub struct WorkspacePlan {
    /// Effective binding per pipeline workspace, templates already
    /// rewritten to their materialized claim
    bindings: BTreeMap<String, WorkspaceBinding>,
    /// Claims to materialize, keyed by pipeline workspace
    claims: BTreeMap<String, PersistentClaim>,
    /// Declared but unbound (optional) workspaces
    unbound: BTreeSet<String>,
}

impl WorkspacePlan {
    /// Validate the run's bindings against the pipeline declarations
    pub fn build(run: &PipelineRun, spec: &PipelineSpec) -> Result<Self, WorkspaceError> {
        let mut plan = WorkspacePlan::default();

        for binding in &run.spec.workspaces {
            if spec.workspace(&binding.name).is_none() {
                return Err(WorkspaceError::UndeclaredBinding {
                    workspace: binding.name.clone(),
                });
            }
        }

        for decl in &spec.workspaces {
            let bound = run.spec.workspaces.iter().find(|b| b.name == decl.name);
            match bound {
                None if decl.optional => {
                    plan.unbound.insert(decl.name.clone());
                }
                None => {
                    return Err(WorkspaceError::MissingBinding {
                        workspace: decl.name.clone(),
                    })
                }
                Some(binding) => {
                    let mut effective = binding.clone();
                    if binding.volume_claim_template.is_some() {
                        let name = claim_name(&run.meta.name, &decl.name);
                        let template = binding.volume_claim_template.clone().unwrap_or_default();
                        let mut meta = ObjectMeta::new(&run.meta.namespace, &name);
                        meta.labels
                            .insert(labels::PIPELINE_RUN.to_string(), run.meta.name.clone());
                        meta.owner_references
                            .push(OwnerReference::controller("PipelineRun", &run.meta));
                        plan.claims.insert(
                            decl.name.clone(),
                            PersistentClaim {
                                meta,
                                spec: template.spec,
                            },
                        );
                        effective = WorkspaceBinding {
                            name: binding.name.clone(),
                            sub_path: binding.sub_path.clone(),
                            ..WorkspaceBinding::claim(&binding.name, &name)
                        };
                    }
                    plan.bindings.insert(decl.name.clone(), effective);
                }
            }
        }

        Ok(plan)
    }

    /// The claim a workspace needs materialized, if any
    pub fn claim_for(&self, workspace: &str) -> Option<&PersistentClaim> {
        self.claims.get(workspace)
    }

    pub fn binding(&self, workspace: &str) -> Option<&WorkspaceBinding> {
        self.bindings.get(workspace)
    }

    /// Workspace facts for expression resolution
    pub fn expr_refs(&self) -> BTreeMap<String, WorkspaceRef> {
        let mut refs = BTreeMap::new();
        for (name, binding) in &self.bindings {
            refs.insert(
                name.clone(),
                WorkspaceRef {
                    bound: true,
                    claim: binding
                        .persistent_volume_claim
                        .as_ref()
                        .map(|c| c.claim_name.clone()),
                    volume: None,
                },
            );
        }
        for name in &self.unbound {
            refs.insert(name.clone(), WorkspaceRef::default());
        }
        refs
    }

    /// Compute the child's workspace bindings for one pipeline task.
    /// Returns the bindings plus the pipeline workspaces they draw from.
    pub fn for_task(
        &self,
        task: &PipelineTask,
        spec: Option<&TaskSpec>,
    ) -> Result<TaskWorkspaces, WorkspaceError> {
        let mut out = TaskWorkspaces::default();
        let declared = spec.map(|s| s.workspaces.as_slice()).unwrap_or_default();

        for decl in declared {
            let Some(mapping) = task.workspaces.iter().find(|w| w.name == decl.name) else {
                if decl.optional {
                    continue;
                }
                return Err(WorkspaceError::MissingTaskBinding {
                    task: task.name.clone(),
                    workspace: decl.name.clone(),
                });
            };

            let pipeline_ws = mapping.pipeline_workspace();
            if let Some(binding) = self.bindings.get(pipeline_ws) {
                let sub_path = join_sub_paths(binding.sub_path.as_deref(), mapping.sub_path.as_deref());
                let mut child_binding = binding.clone();
                child_binding.name = decl.name.clone();
                child_binding.sub_path = sub_path;
                out.bindings.push(child_binding);
                out.sources.push(pipeline_ws.to_string());
            } else if self.unbound.contains(pipeline_ws) {
                if !decl.optional {
                    return Err(WorkspaceError::RequiredMarkedOptional {
                        task: task.name.clone(),
                        workspace: pipeline_ws.to_string(),
                    });
                }
                // optional on both sides and omitted: the child sees nothing
            } else {
                return Err(WorkspaceError::UnknownPipelineWorkspace {
                    task: task.name.clone(),
                    workspace: pipeline_ws.to_string(),
                });
            }
        }

        Ok(out)
    }
}

/// Bindings for one child plus the pipeline workspaces they came from
#[derive(Debug, Clone, Default)]
pub struct TaskWorkspaces {
    pub bindings: Vec<WorkspaceBinding>,
    pub sources: Vec<String>,
}

impl TaskWorkspaces {
    /// Pipeline workspaces backed by a shared claim, which want the
    /// co-location hint
    pub fn shared_sources<'a>(&'a self, plan: &'a WorkspacePlan) -> impl Iterator<Item = &'a str> {
        self.sources
            .iter()
            .map(String::as_str)
            .filter(|ws| plan.binding(ws).is_some_and(WorkspaceBinding::is_shared_claim))
    }
}

fn join_sub_paths(run: Option<&str>, task: Option<&str>) -> Option<String> {
    match (run.filter(|s| !s.is_empty()), task.filter(|s| !s.is_empty())) {
        (Some(r), Some(t)) => Some(format!("{r}/{t}")),
        (Some(r), None) => Some(r.to_string()),
        (None, Some(t)) => Some(t.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
#[path = "volumes_tests.rs"]
mod tests;
