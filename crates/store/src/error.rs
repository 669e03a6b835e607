// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error classification

use thiserror::Error;

/// Errors surfaced by the cluster object store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Optimistic-concurrency failure: the caller holds a stale resource
    /// version and must reload before retrying.
    #[error("conflict writing {kind} {namespace}/{name}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    /// Retryable: server busy, leader changed, connection dropped
    #[error("transient store error: {0}")]
    Transient(String),

    /// Not retryable: the request itself is wrong
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Conflicts and transient failures resolve on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(StoreError::not_found("TaskRun", "ns", "x").is_not_found());
        assert!(StoreError::Transient("busy".into()).is_retryable());
        assert!(StoreError::Conflict {
            kind: "PipelineRun",
            namespace: "ns".into(),
            name: "r".into()
        }
        .is_retryable());
        assert!(!StoreError::Invalid("bad".into()).is_retryable());
    }
}
