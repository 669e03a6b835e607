// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconcile contract: done, requeue, or fail

use std::time::Duration;
use tern_core::pipelinerun::PipelineRunReason;
use tern_store::StoreError;
use thiserror::Error;

/// Successful outcome of one reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the store changes
    Done,
    /// Come back no later than this, e.g. to fire a deadline
    RequeueAfter(Duration),
}

/// Failure of one reconcile pass
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    /// Worth retrying with backoff; no status was lost
    #[error("transient: {0}")]
    Transient(String),

    /// The run has been driven to terminal failure; do not requeue
    #[error("{}: {message}", reason.as_str())]
    Permanent {
        reason: PipelineRunReason,
        message: String,
    },
}

impl ReconcileError {
    pub fn permanent(reason: PipelineRunReason, message: impl Into<String>) -> Self {
        ReconcileError::Permanent {
            reason,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient(_))
    }
}

// Store failures inside a pass are retryable: the next pass re-reads the
// snapshot and the act phase is idempotent. Permanence is always an
// explicit decision at the call site.
impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        ReconcileError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_convert_to_transient() {
        let err: ReconcileError = StoreError::Transient("busy".into()).into();
        assert!(err.is_transient());

        let err: ReconcileError = StoreError::Conflict {
            kind: "PipelineRun",
            namespace: "ns".into(),
            name: "r".into(),
        }
        .into();
        assert!(err.is_transient());
    }

    #[test]
    fn permanent_errors_carry_their_reason() {
        let err = ReconcileError::permanent(PipelineRunReason::InvalidGraph, "cycle");
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "InvalidGraph: cycle");
    }
}
