// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Matrix fan-out: one child per cartesian combination.
//!
//! Combination order is deterministic: the first declared parameter
//! varies fastest. Child names append the combination index to the usual
//! `<run>-<task>` name, so replays find their children by name and index
//! label.

use crate::expr::{self, ExprContext, ExprError};
use tern_core::param::{Param, ParamValue};
use tern_core::pipeline::Matrix;
use thiserror::Error;

/// One cell of the cartesian product
#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub index: usize,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatrixError {
    #[error("matrix parameter {param:?} must be an array")]
    NotArray { param: String },

    #[error("matrix parameter {param:?} has no values")]
    EmptyDimension { param: String },

    #[error("matrix fans out to {count} combinations, the cluster caps it at {cap}")]
    TooMany { count: usize, cap: usize },

    #[error(transparent)]
    Resolve(#[from] ExprError),
}

/// Name of the child executing one pipeline task (and combination)
pub fn child_name(run: &str, task: &str, index: usize, matrixed: bool) -> String {
    if matrixed {
        format!("{run}-{task}-{index}")
    } else {
        format!("{run}-{task}")
    }
}

/// Expand a matrix into its combinations, resolving references first.
/// Matrix values may reference task results; resolution fails with
/// `MissingResult` until the producing task completes, which defers the
/// fan-out to a later reconcile.
pub fn fan_out(ctx: &ExprContext, matrix: &Matrix, cap: usize) -> Result<Vec<Combination>, MatrixError> {
    let mut dimensions: Vec<(String, Vec<String>)> = Vec::with_capacity(matrix.params.len());
    for param in &matrix.params {
        let resolved = expr::resolve_param(ctx, param)?;
        let values = match resolved.value {
            ParamValue::Array(values) => values,
            _ => {
                return Err(MatrixError::NotArray {
                    param: param.name.clone(),
                })
            }
        };
        if values.is_empty() {
            return Err(MatrixError::EmptyDimension {
                param: param.name.clone(),
            });
        }
        dimensions.push((resolved.name, values));
    }

    let count: usize = dimensions.iter().map(|(_, v)| v.len()).product();
    if count > cap {
        return Err(MatrixError::TooMany { count, cap });
    }

    let mut combinations = Vec::with_capacity(count);
    for index in 0..count {
        let mut cursor = index;
        let mut params = Vec::with_capacity(dimensions.len());
        for (name, values) in &dimensions {
            params.push(Param {
                name: name.clone(),
                value: ParamValue::String(values[cursor % values.len()].clone()),
            });
            cursor /= values.len();
        }
        combinations.push(Combination { index, params });
    }
    Ok(combinations)
}

#[cfg(test)]
#[path = "matrix_tests.rs"]
mod tests;
