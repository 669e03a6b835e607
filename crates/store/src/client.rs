// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed clients over the cluster object store.
//!
//! Semantics the reconciler relies on:
//! - `get`/`list` return what the store currently holds; absence is `None`
//!   or an empty list, never an error.
//! - `create` rejects duplicates with `AlreadyExists`.
//! - Status updates use optimistic concurrency: the write carries the
//!   caller's resource version and fails with `Conflict` when stale.
//! - Spec patches (`cancel`, `reset_for_retry`, `set_timeout`) apply to the
//!   latest stored object and do not require a resource version.

use crate::error::StoreError;
use crate::events::{CloudEventSink, EventSink};
use crate::resolution::ResolverClient;
use async_trait::async_trait;
use std::time::Duration;
use tern_core::child::{Child, ChildKind};
use tern_core::labels::LabelSelector;
use tern_core::meta::RunKey;
use tern_core::pipeline::Pipeline;
use tern_core::pipelinerun::PipelineRun;
use tern_core::task::Task;
use tern_core::workspace::PersistentClaim;

/// Client for pipeline-run objects
#[async_trait]
pub trait RunClient: Send + Sync {
    async fn get(&self, key: &RunKey) -> Result<Option<PipelineRun>, StoreError>;

    /// Write only the status sub-object; conflicts on stale resource version
    async fn update_status(&self, run: &PipelineRun) -> Result<PipelineRun, StoreError>;
}

/// Client for child execution records of both kinds
#[async_trait]
pub trait ChildClient: Send + Sync {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Child>, StoreError>;

    async fn create(&self, child: Child) -> Result<Child, StoreError>;

    /// Patch the child spec to request cancellation
    async fn cancel(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Archive the current attempt into `retriesStatus` and reset the child
    /// so its controller runs it again
    async fn reset_for_retry(&self, kind: ChildKind, namespace: &str, name: &str) -> Result<Child, StoreError>;

    /// Patch the remaining timeout budget onto a child
    async fn set_timeout(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), StoreError>;
}

/// Client for stored pipeline and task definitions
#[async_trait]
pub trait DefinitionClient: Send + Sync {
    async fn pipeline(&self, namespace: &str, name: &str) -> Result<Option<Pipeline>, StoreError>;

    async fn task(&self, namespace: &str, name: &str) -> Result<Option<Task>, StoreError>;
}

/// Client for per-run persistent claims and co-location hints
#[async_trait]
pub trait VolumeClient: Send + Sync {
    /// Create the claim unless it already exists; returns the stored claim
    async fn ensure_claim(&self, claim: PersistentClaim) -> Result<PersistentClaim, StoreError>;

    /// Materialize the co-location hint for a shared workspace. A hint
    /// only; callers treat failure as non-fatal.
    async fn ensure_assistant(&self, namespace: &str, name: &str, claim: &str) -> Result<(), StoreError>;
}

/// Bundle of every client the reconciler needs, in the manner of the
/// engine's adapter bundles. Implementations hand out cheap clones.
pub trait Cluster: Clone + Send + Sync + 'static {
    type Runs: RunClient;
    type Children: ChildClient;
    type Definitions: DefinitionClient;
    type Volumes: VolumeClient;
    type Events: EventSink;
    type CloudEvents: CloudEventSink;
    type Resolution: ResolverClient;

    fn runs(&self) -> Self::Runs;
    fn children(&self) -> Self::Children;
    fn definitions(&self) -> Self::Definitions;
    fn volumes(&self) -> Self::Volumes;
    fn events(&self) -> Self::Events;
    fn cloud_events(&self) -> Self::CloudEvents;
    fn resolution(&self) -> Self::Resolution;
}
