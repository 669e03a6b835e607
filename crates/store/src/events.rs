// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Best-effort event emission.
//!
//! Cluster events record state transitions for operators; cloud events
//! mirror them to an external sink. Neither may block or fail a
//! reconcile, so the sink traits are infallible and implementations
//! swallow delivery errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_core::meta::RunKey;

/// Severity of a cluster event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

/// One cluster event attached to a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
    pub object: RunKey,
}

impl ClusterEvent {
    pub fn normal(object: RunKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason: reason.into(),
            message: message.into(),
            object,
        }
    }

    pub fn warning(object: RunKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason: reason.into(),
            message: message.into(),
            object,
        }
    }
}

/// Sink for cluster events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: ClusterEvent);
}

/// Sink for cloud events mirroring run transitions
#[async_trait]
pub trait CloudEventSink: Send + Sync {
    async fn emit(&self, event_type: &str, subject: &str, data: serde_json::Value);
}
