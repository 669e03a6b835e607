// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Asynchronous remote resolution of pipeline and task definitions

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_core::param::Param;

/// A request for a resolver to fetch a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub namespace: String,
    /// Deterministic per referencing task, so resubmission is idempotent
    pub name: String,
    pub resolver: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// Observed state of a resolution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    /// The resolver has not answered yet
    Pending,
    /// Resolved bytes, unmarshalling to a task or pipeline definition
    Done(Vec<u8>),
    /// Terminal failure, including resolver timeouts
    Failed(String),
}

/// Client for the resolver subsystem
#[async_trait]
pub trait ResolverClient: Send + Sync {
    /// Submit a request; resubmitting an existing name is a no-op
    async fn request(&self, request: ResolutionRequest) -> Result<(), StoreError>;

    /// Poll a request; `None` means no such request was submitted
    async fn status(&self, namespace: &str, name: &str) -> Result<Option<ResolutionStatus>, StoreError>;
}
