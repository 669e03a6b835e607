// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! When-expression evaluation: classify a ready node as execute or skip

use crate::expr::{self, ExprContext, ExprError};
use tern_core::pipeline::{WhenExpression, WhenOperator};
use tern_core::pipelinerun::SkipReason;

/// The verdict for one node's when list
#[derive(Debug, Clone, PartialEq)]
pub enum WhenOutcome {
    Execute,
    Skip(SkipReason),
}

/// Outcome plus the expressions as they evaluated, for status records
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: WhenOutcome,
    pub expressions: Vec<WhenExpression>,
}

fn matches(when: &WhenExpression) -> bool {
    let contained = when.values.iter().any(|v| v == &when.input);
    match when.operator {
        WhenOperator::In => contained,
        WhenOperator::NotIn => !contained,
    }
}

/// Evaluate a when list after substitution. An unsatisfiable result
/// reference skips the node instead of failing the run; the guard is
/// scoped to this node alone. Any other resolution failure propagates.
pub fn evaluate(ctx: &ExprContext, when: &[WhenExpression]) -> Result<Evaluation, ExprError> {
    if when.is_empty() {
        return Ok(Evaluation {
            outcome: WhenOutcome::Execute,
            expressions: Vec::new(),
        });
    }

    let mut resolved = Vec::with_capacity(when.len());
    for entry in when {
        match expr::resolve_when(ctx, entry) {
            Ok(r) => resolved.push(r),
            Err(err) if err.is_missing_result() => {
                return Ok(Evaluation {
                    outcome: WhenOutcome::Skip(SkipReason::MissingResultsSkip),
                    expressions: when.to_vec(),
                });
            }
            Err(err) => return Err(err),
        }
    }

    let all_true = resolved.iter().all(matches);
    Ok(Evaluation {
        outcome: if all_true {
            WhenOutcome::Execute
        } else {
            WhenOutcome::Skip(SkipReason::WhenExpressionsSkip)
        },
        expressions: resolved,
    })
}

#[cfg(test)]
#[path = "when_tests.rs"]
mod tests;
