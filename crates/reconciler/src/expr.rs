// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `$( )` reference substitution.
//!
//! Grammar: `$(` segment `.` segment [`.` segment]* `)` with identifier
//! segments and an optional trailing `[*]` for whole-array splicing.
//! Recognized heads are `params`, `tasks.<name>.results`,
//! `tasks.<name>.status`, `context.pipelineRun.{name,namespace,uid}`,
//! `context.pipeline.name`, `context.pipelineTask.retries` and
//! `workspaces.<name>.{bound,path,claim,volume}`. Anything else is left
//! verbatim. Substitution is a single pass: the output is never
//! re-scanned.

use std::collections::{BTreeMap, BTreeSet};
use tern_core::param::{Param, ParamValue};
use tern_core::pipeline::WhenExpression;
use thiserror::Error;

/// A parsed reference inside `$( )`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reference {
    Param { name: String, field: ParamField },
    Result { task: String, result: String, star: bool },
    TaskStatus { task: String },
    Context(ContextField),
    Workspace { name: String, field: WorkspaceField },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParamField {
    /// `$(params.x)`: the declared value, whatever its type
    Whole,
    /// `$(params.x[*])`: splice an array value
    Star,
    /// `$(params.x.key)`: one field of an object value
    Key(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContextField {
    RunName,
    RunNamespace,
    RunUid,
    PipelineName,
    Retries,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkspaceField {
    Bound,
    Path,
    Claim,
    Volume,
}

/// One occurrence of a reference in an input string
#[derive(Debug, Clone, PartialEq)]
pub struct RefSite {
    pub start: usize,
    pub end: usize,
    pub reference: Reference,
}

/// Failures while resolving references
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    /// The producing task has not emitted (or will never emit) the result
    #[error("result {result:?} of task {task:?} is not available")]
    MissingResult { task: String, result: String },

    #[error("reference to undeclared parameter {name:?}")]
    UnknownParam { name: String },

    #[error("object parameter {param:?} has no key {key:?}")]
    UnknownObjectKey { param: String, key: String },

    #[error("reference to unknown task {task:?}")]
    UnknownTask { task: String },

    #[error("reference to unknown workspace {name:?}")]
    UnknownWorkspace { name: String },

    /// An array or object value was used where a scalar is required
    #[error("{what} value cannot be embedded in a string: {site}")]
    InvalidType { what: &'static str, site: String },
}

impl ExprError {
    /// Missing-result errors downgrade to a skip inside when expressions
    /// and finally tasks
    pub fn is_missing_result(&self) -> bool {
        matches!(self, ExprError::MissingResult { .. })
    }
}

/// Workspace facts exposed to expressions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceRef {
    pub bound: bool,
    pub claim: Option<String>,
    pub volume: Option<String>,
}

/// Everything an expression can see, assembled per pipeline task
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    pub params: BTreeMap<String, ParamValue>,
    /// Results of completed tasks only
    pub results: BTreeMap<String, BTreeMap<String, ParamValue>>,
    /// Execution status of every DAG task: Succeeded, Failed or None
    pub statuses: BTreeMap<String, String>,
    pub run_name: String,
    pub run_namespace: String,
    pub run_uid: String,
    pub pipeline_name: String,
    /// Retry count of the pipeline task being resolved
    pub retries: u32,
    pub workspaces: BTreeMap<String, WorkspaceRef>,
}

impl ExprContext {
    fn lookup(&self, reference: &Reference) -> Result<ParamValue, ExprError> {
        match reference {
            Reference::Param { name, field } => {
                let value = self.params.get(name).ok_or_else(|| ExprError::UnknownParam {
                    name: name.clone(),
                })?;
                match field {
                    ParamField::Whole => Ok(value.clone()),
                    ParamField::Star => match value {
                        ParamValue::Array(_) => Ok(value.clone()),
                        _ => Err(ExprError::InvalidType {
                            what: "non-array",
                            site: format!("$(params.{name}[*])"),
                        }),
                    },
                    ParamField::Key(key) => match value {
                        ParamValue::Object(fields) => fields
                            .get(key)
                            .map(|v| ParamValue::String(v.clone()))
                            .ok_or_else(|| ExprError::UnknownObjectKey {
                                param: name.clone(),
                                key: key.clone(),
                            }),
                        _ => Err(ExprError::InvalidType {
                            what: "non-object",
                            site: format!("$(params.{name}.{key})"),
                        }),
                    },
                }
            }

            Reference::Result { task, result, .. } => {
                if !self.statuses.contains_key(task) && !self.results.contains_key(task) {
                    return Err(ExprError::UnknownTask { task: task.clone() });
                }
                self.results
                    .get(task)
                    .and_then(|r| r.get(result))
                    .cloned()
                    .ok_or_else(|| ExprError::MissingResult {
                        task: task.clone(),
                        result: result.clone(),
                    })
            }

            Reference::TaskStatus { task } => self
                .statuses
                .get(task)
                .map(|s| ParamValue::String(s.clone()))
                .ok_or_else(|| ExprError::UnknownTask { task: task.clone() }),

            Reference::Context(field) => Ok(ParamValue::String(match field {
                ContextField::RunName => self.run_name.clone(),
                ContextField::RunNamespace => self.run_namespace.clone(),
                ContextField::RunUid => self.run_uid.clone(),
                ContextField::PipelineName => self.pipeline_name.clone(),
                ContextField::Retries => self.retries.to_string(),
            })),

            Reference::Workspace { name, field } => {
                let ws = self
                    .workspaces
                    .get(name)
                    .ok_or_else(|| ExprError::UnknownWorkspace { name: name.clone() })?;
                Ok(ParamValue::String(match field {
                    WorkspaceField::Bound => ws.bound.to_string(),
                    WorkspaceField::Path => format!("/workspace/{name}"),
                    WorkspaceField::Claim => ws.claim.clone().unwrap_or_default(),
                    WorkspaceField::Volume => ws
                        .volume
                        .clone()
                        .or_else(|| ws.claim.clone())
                        .unwrap_or_else(|| format!("ws-{name}")),
                }))
            }
        }
    }
}

fn is_segment(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn parse_reference(inner: &str) -> Option<Reference> {
    let (body, star) = match inner.strip_suffix("[*]") {
        Some(b) => (b, true),
        None => (inner, false),
    };
    let segments: Vec<&str> = body.split('.').collect();
    if !segments.iter().all(|s| is_segment(s)) {
        return None;
    }

    match segments.as_slice() {
        ["params", name] => Some(Reference::Param {
            name: name.to_string(),
            field: if star { ParamField::Star } else { ParamField::Whole },
        }),
        ["params", name, key] if !star => Some(Reference::Param {
            name: name.to_string(),
            field: ParamField::Key(key.to_string()),
        }),
        ["tasks", task, "results", result] => Some(Reference::Result {
            task: task.to_string(),
            result: result.to_string(),
            star,
        }),
        ["tasks", task, "status"] if !star => Some(Reference::TaskStatus {
            task: task.to_string(),
        }),
        ["context", "pipelineRun", field] if !star => {
            let field = match *field {
                "name" => ContextField::RunName,
                "namespace" => ContextField::RunNamespace,
                "uid" => ContextField::RunUid,
                _ => return None,
            };
            Some(Reference::Context(field))
        }
        ["context", "pipeline", "name"] if !star => Some(Reference::Context(ContextField::PipelineName)),
        ["context", "pipelineTask", "retries"] if !star => Some(Reference::Context(ContextField::Retries)),
        ["workspaces", name, field] if !star => {
            let field = match *field {
                "bound" => WorkspaceField::Bound,
                "path" => WorkspaceField::Path,
                "claim" => WorkspaceField::Claim,
                "volume" => WorkspaceField::Volume,
                _ => return None,
            };
            Some(Reference::Workspace {
                name: name.to_string(),
                field,
            })
        }
        _ => None,
    }
}

/// Scan a string for recognized references. Unrecognized `$( )` content
/// is not a reference and stays verbatim.
pub fn find_references(input: &str) -> Vec<RefSite> {
    let bytes = input.as_bytes();
    let mut sites = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'(' {
            if let Some(off) = input[i + 2..].find(')') {
                let inner = &input[i + 2..i + 2 + off];
                if let Some(reference) = parse_reference(inner) {
                    let end = i + 2 + off + 1;
                    sites.push(RefSite {
                        start: i,
                        end,
                        reference,
                    });
                    i = end;
                    continue;
                }
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    sites
}

fn render_scalar(value: &ParamValue, site: &str) -> Result<String, ExprError> {
    match value {
        ParamValue::String(s) => Ok(s.clone()),
        ParamValue::Array(_) => Err(ExprError::InvalidType {
            what: "array",
            site: site.to_string(),
        }),
        ParamValue::Object(_) => Err(ExprError::InvalidType {
            what: "object",
            site: site.to_string(),
        }),
    }
}

/// Resolve one string. A string that is exactly one reference yields the
/// referenced value with its native type; everything else substitutes
/// scalar renderings in place.
pub fn resolve_value(ctx: &ExprContext, input: &str) -> Result<ParamValue, ExprError> {
    let sites = find_references(input);
    if sites.is_empty() {
        return Ok(ParamValue::String(input.to_string()));
    }

    if sites.len() == 1 && sites[0].start == 0 && sites[0].end == input.len() {
        return ctx.lookup(&sites[0].reference);
    }

    let mut out = String::with_capacity(input.len());
    let mut cursor = 0;
    for site in &sites {
        out.push_str(&input[cursor..site.start]);
        let value = ctx.lookup(&site.reference)?;
        out.push_str(&render_scalar(&value, &input[site.start..site.end])?);
        cursor = site.end;
    }
    out.push_str(&input[cursor..]);
    Ok(ParamValue::String(out))
}

/// Resolve a string that must stay a string
pub fn resolve_string(ctx: &ExprContext, input: &str) -> Result<String, ExprError> {
    render_scalar(&resolve_value(ctx, input)?, input)
}

/// Resolve the elements of an array position, splicing whole-array
/// references in place
fn resolve_array(ctx: &ExprContext, items: &[String]) -> Result<Vec<String>, ExprError> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match resolve_value(ctx, item)? {
            ParamValue::Array(values) => out.extend(values),
            other => out.push(render_scalar(&other, item)?),
        }
    }
    Ok(out)
}

/// Resolve a parameter binding
pub fn resolve_param(ctx: &ExprContext, param: &Param) -> Result<Param, ExprError> {
    let value = match &param.value {
        ParamValue::String(s) => resolve_value(ctx, s)?,
        ParamValue::Array(items) => ParamValue::Array(resolve_array(ctx, items)?),
        ParamValue::Object(fields) => {
            let mut out = BTreeMap::new();
            for (key, raw) in fields {
                out.insert(key.clone(), resolve_string(ctx, raw)?);
            }
            ParamValue::Object(out)
        }
    };
    Ok(Param {
        name: param.name.clone(),
        value,
    })
}

pub fn resolve_params(ctx: &ExprContext, params: &[Param]) -> Result<Vec<Param>, ExprError> {
    params.iter().map(|p| resolve_param(ctx, p)).collect()
}

/// Resolve a when expression: the input and every value become strings,
/// except that whole-array references splice into the value list
pub fn resolve_when(ctx: &ExprContext, when: &WhenExpression) -> Result<WhenExpression, ExprError> {
    Ok(WhenExpression {
        input: resolve_string(ctx, &when.input)?,
        operator: when.operator,
        values: resolve_array(ctx, &when.values)?,
    })
}

/// References classified by head, for graph building and validation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classified {
    pub params: BTreeSet<String>,
    pub results: BTreeSet<(String, String)>,
    pub statuses: BTreeSet<String>,
    pub workspaces: BTreeSet<String>,
    pub has_context: bool,
}

impl Classified {
    /// Tasks this set of references depends on
    pub fn referenced_tasks(&self) -> BTreeSet<String> {
        self.results
            .iter()
            .map(|(task, _)| task.clone())
            .chain(self.statuses.iter().cloned())
            .collect()
    }
}

/// Classify every reference found across the given strings
pub fn classify_references<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Classified {
    let mut out = Classified::default();
    for input in inputs {
        for site in find_references(input) {
            match site.reference {
                Reference::Param { name, .. } => {
                    out.params.insert(name);
                }
                Reference::Result { task, result, .. } => {
                    out.results.insert((task, result));
                }
                Reference::TaskStatus { task } => {
                    out.statuses.insert(task);
                }
                Reference::Context(_) => out.has_context = true,
                Reference::Workspace { name, .. } => {
                    out.workspaces.insert(name);
                }
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "expr_tests.rs"]
mod tests;
