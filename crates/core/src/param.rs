// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parameter values, declarations and binding validation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    #[default]
    String,
    Array,
    Object,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamKind::String => write!(f, "string"),
            ParamKind::Array => write!(f, "array"),
            ParamKind::Object => write!(f, "object"),
        }
    }
}

/// A parameter value: string, array of strings, or string-keyed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Array(Vec<String>),
    Object(BTreeMap<String, String>),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::String(_) => ParamKind::String,
            ParamValue::Array(_) => ParamKind::Array,
            ParamValue::Object(_) => ParamKind::Object,
        }
    }

    /// The string payload, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::Array(v.into_iter().map(str::to_string).collect())
    }
}

/// A bound parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Declared property of an object-typed parameter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    #[serde(rename = "type", default)]
    pub kind: ParamKind,
}

/// A parameter declaration on a pipeline or task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared keys of an object-typed parameter
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyDecl>,
    /// A binding is optional when a default exists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<ParamValue>,
}

impl ParamDecl {
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::String,
            ..Default::default()
        }
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Array,
            ..Default::default()
        }
    }

    pub fn object(name: impl Into<String>, keys: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Object,
            properties: keys
                .iter()
                .map(|k| (k.to_string(), PropertyDecl::default()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn with_default(mut self, default: impl Into<ParamValue>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Why a set of bindings does not satisfy a set of declarations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindingError {
    #[error("parameter {name:?} is required but not bound")]
    Missing { name: String },
    #[error("parameter {name:?} is declared {want} but bound as {got}")]
    TypeMismatch {
        name: String,
        want: ParamKind,
        got: ParamKind,
    },
    #[error("object parameter {name:?} is missing declared keys: {keys:?}")]
    MissingKeys { name: String, keys: Vec<String> },
}

/// Check bound params against declarations: every required declaration is
/// bound, types line up, and object values supply every declared key.
pub fn validate_bindings(decls: &[ParamDecl], params: &[Param]) -> Result<(), BindingError> {
    for decl in decls {
        let bound = params.iter().find(|p| p.name == decl.name);
        let value = match (bound, &decl.default) {
            (Some(p), _) => &p.value,
            (None, Some(default)) => default,
            (None, None) => {
                return Err(BindingError::Missing {
                    name: decl.name.clone(),
                })
            }
        };

        if value.kind() != decl.kind {
            return Err(BindingError::TypeMismatch {
                name: decl.name.clone(),
                want: decl.kind,
                got: value.kind(),
            });
        }

        if let ParamValue::Object(fields) = value {
            let missing: Vec<String> = decl
                .properties
                .keys()
                .filter(|k| !fields.contains_key(*k))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BindingError::MissingKeys {
                    name: decl.name.clone(),
                    keys: missing,
                });
            }
        }
    }
    Ok(())
}

/// Merge declared defaults with explicit bindings into the effective
/// parameter map. Explicit bindings win.
pub fn effective_params(decls: &[ParamDecl], params: &[Param]) -> BTreeMap<String, ParamValue> {
    let mut out = BTreeMap::new();
    for decl in decls {
        if let Some(default) = &decl.default {
            out.insert(decl.name.clone(), default.clone());
        }
    }
    for param in params {
        out.insert(param.name.clone(), param.value.clone());
    }
    out
}

#[cfg(test)]
#[path = "param_tests.rs"]
mod tests;
