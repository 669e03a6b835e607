// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory cluster used by tests.
//!
//! Behaves like the real store where the reconciler can tell the
//! difference: resource versions bump on every write, status updates
//! conflict on stale versions, creates reject duplicates, and faults can
//! be injected per operation to exercise the transient-error paths.
//! Helpers stand in for the external task-run controller by completing,
//! failing or cancelling children.

use crate::client::{ChildClient, Cluster, DefinitionClient, RunClient, VolumeClient};
use crate::error::StoreError;
use crate::events::{CloudEventSink, ClusterEvent, EventSink};
use crate::resolution::{ResolutionRequest, ResolutionStatus, ResolverClient};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tern_core::child::{CancelRequest, Child, ChildKind, ChildResult, ChildStatus};
use tern_core::condition::Condition;
use tern_core::id::{IdGen, SequentialIdGen};
use tern_core::labels::LabelSelector;
use tern_core::meta::RunKey;
use tern_core::param::ParamValue;
use tern_core::pipeline::Pipeline;
use tern_core::pipelinerun::PipelineRun;
use tern_core::task::Task;
use tern_core::workspace::PersistentClaim;

/// A recorded cloud event: (type, subject, data)
pub type CloudEventRecord = (String, String, serde_json::Value);

#[derive(Default)]
struct State {
    runs: BTreeMap<RunKey, PipelineRun>,
    children: BTreeMap<RunKey, Child>,
    pipelines: BTreeMap<RunKey, Pipeline>,
    tasks: BTreeMap<RunKey, Task>,
    claims: BTreeMap<RunKey, PersistentClaim>,
    assistants: BTreeMap<RunKey, String>,
    resolutions: BTreeMap<RunKey, ResolutionStatus>,
    events: Vec<ClusterEvent>,
    cloud_events: Vec<CloudEventRecord>,
    fail_next: HashMap<&'static str, StoreError>,
    ids: SequentialIdGen,
    next_rv: u64,
}

impl State {
    fn bump_rv(&mut self) -> u64 {
        self.next_rv += 1;
        self.next_rv
    }

    fn next_uid(&mut self) -> String {
        self.ids.next()
    }

    fn fault(&mut self, op: &'static str) -> Result<(), StoreError> {
        match self.fail_next.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-memory implementation of every store client
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next invocation of `op` with `err`.
    /// Ops: get, list, create, update_status, cancel, reset_for_retry,
    /// set_timeout, ensure_claim.
    pub fn fail_next(&self, op: &'static str, err: StoreError) {
        self.lock().fail_next.insert(op, err);
    }

    // Seeding -------------------------------------------------------------

    pub fn put_run(&self, mut run: PipelineRun) -> PipelineRun {
        let mut state = self.lock();
        if run.meta.uid.is_empty() {
            run.meta.uid = state.next_uid();
        }
        run.meta.resource_version = state.bump_rv();
        state.runs.insert(run.key(), run.clone());
        run
    }

    pub fn put_pipeline(&self, pipeline: Pipeline) {
        self.lock().pipelines.insert(pipeline.meta.key(), pipeline);
    }

    pub fn put_task(&self, task: Task) {
        self.lock().tasks.insert(task.meta.key(), task);
    }

    /// Seed a child directly, as if created by a prior reconcile
    pub fn put_child(&self, mut child: Child) -> Child {
        let mut state = self.lock();
        if child.meta().uid.is_empty() {
            child.meta_mut().uid = state.next_uid();
        }
        child.meta_mut().resource_version = state.bump_rv();
        state.children.insert(child.meta().key(), child.clone());
        child
    }

    // Inspection ----------------------------------------------------------

    pub fn run(&self, key: &RunKey) -> Option<PipelineRun> {
        self.lock().runs.get(key).cloned()
    }

    pub fn child(&self, namespace: &str, name: &str) -> Option<Child> {
        self.lock().children.get(&RunKey::new(namespace, name)).cloned()
    }

    pub fn all_children(&self, namespace: &str) -> Vec<Child> {
        self.lock()
            .children
            .values()
            .filter(|c| c.meta().namespace == namespace)
            .cloned()
            .collect()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentClaim> {
        self.lock().claims.get(&RunKey::new(namespace, name)).cloned()
    }

    pub fn assistants(&self) -> BTreeMap<RunKey, String> {
        self.lock().assistants.clone()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.lock().events.clone()
    }

    pub fn cloud_event_log(&self) -> Vec<CloudEventRecord> {
        self.lock().cloud_events.clone()
    }

    /// Wipe the status of a stored run, keeping the spec (orphan scenario)
    pub fn wipe_run_status(&self, key: &RunKey) {
        let mut state = self.lock();
        if let Some(run) = state.runs.get_mut(key) {
            run.status = Default::default();
            run.meta.resource_version += 1;
        }
    }

    // Standing in for the child controllers --------------------------------

    fn mutate_child(&self, namespace: &str, name: &str, f: impl FnOnce(&mut Child)) {
        let mut state = self.lock();
        let rv = state.bump_rv();
        if let Some(child) = state.children.get_mut(&RunKey::new(namespace, name)) {
            f(child);
            child.meta_mut().resource_version = rv;
        }
    }

    /// Mark a child running, as its controller would on pickup
    pub fn start_child(&self, namespace: &str, name: &str) {
        self.mutate_child(namespace, name, |child| {
            let status = child.status_mut();
            status.start_time = Some(Utc::now());
            status.set_condition(Condition::running("Running", ""));
        });
    }

    /// Complete a child successfully with the given results
    pub fn complete_child(&self, namespace: &str, name: &str, results: &[(&str, &str)]) {
        self.mutate_child(namespace, name, |child| {
            let status = child.status_mut();
            status.results = results
                .iter()
                .map(|(n, v)| ChildResult {
                    name: n.to_string(),
                    value: ParamValue::String(v.to_string()),
                })
                .collect();
            status.completion_time = Some(Utc::now());
            status.set_condition(Condition::succeeded("Succeeded", "all steps completed"));
        });
    }

    /// Fail a child with a non-cancellation reason
    pub fn fail_child(&self, namespace: &str, name: &str, message: &str) {
        self.mutate_child(namespace, name, |child| {
            let status = child.status_mut();
            status.completion_time = Some(Utc::now());
            status.set_condition(Condition::failed("Failed", message));
        });
    }

    /// Drive every cancel-requested child to its cancelled terminal state
    pub fn acknowledge_cancellations(&self, namespace: &str) {
        let names: Vec<String> = self
            .all_children(namespace)
            .into_iter()
            .filter(|c| c.cancel_requested() && !c.is_done())
            .map(|c| c.name().to_string())
            .collect();
        for name in names {
            self.mutate_child(namespace, &name, |child| {
                let reason = match child.kind() {
                    ChildKind::TaskRun => tern_core::child::TASK_RUN_CANCELLED,
                    ChildKind::Run => tern_core::child::RUN_CANCELLED,
                };
                let status = child.status_mut();
                status.completion_time = Some(Utc::now());
                status.set_condition(Condition::failed(reason, "cancelled"));
            });
        }
    }

    // Resolver control -----------------------------------------------------

    pub fn resolution_done(&self, namespace: &str, name: &str, bytes: Vec<u8>) {
        self.lock()
            .resolutions
            .insert(RunKey::new(namespace, name), ResolutionStatus::Done(bytes));
    }

    pub fn resolution_failed(&self, namespace: &str, name: &str, reason: &str) {
        self.lock().resolutions.insert(
            RunKey::new(namespace, name),
            ResolutionStatus::Failed(reason.to_string()),
        );
    }
}

#[async_trait]
impl RunClient for FakeCluster {
    async fn get(&self, key: &RunKey) -> Result<Option<PipelineRun>, StoreError> {
        let mut state = self.lock();
        state.fault("get")?;
        Ok(state.runs.get(key).cloned())
    }

    async fn update_status(&self, run: &PipelineRun) -> Result<PipelineRun, StoreError> {
        let mut state = self.lock();
        state.fault("update_status")?;
        let rv = state.bump_rv();
        let stored = state
            .runs
            .get_mut(&run.key())
            .ok_or_else(|| StoreError::not_found("PipelineRun", &run.meta.namespace, &run.meta.name))?;
        if stored.meta.resource_version != run.meta.resource_version {
            return Err(StoreError::Conflict {
                kind: "PipelineRun",
                namespace: run.meta.namespace.clone(),
                name: run.meta.name.clone(),
            });
        }
        stored.status = run.status.clone();
        stored.meta.resource_version = rv;
        Ok(stored.clone())
    }
}

#[async_trait]
impl ChildClient for FakeCluster {
    async fn list(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Child>, StoreError> {
        let mut state = self.lock();
        state.fault("list")?;
        Ok(state
            .children
            .values()
            .filter(|c| c.meta().namespace == namespace && selector.matches(&c.meta().labels))
            .cloned()
            .collect())
    }

    async fn create(&self, mut child: Child) -> Result<Child, StoreError> {
        let mut state = self.lock();
        state.fault("create")?;
        let key = child.meta().key();
        if state.children.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: child.kind().as_str(),
                namespace: key.namespace,
                name: key.name,
            });
        }
        child.meta_mut().uid = state.next_uid();
        child.meta_mut().resource_version = state.bump_rv();
        child.meta_mut().creation_timestamp = Some(Utc::now());
        state.children.insert(key, child.clone());
        Ok(child)
    }

    async fn cancel(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.fault("cancel")?;
        let rv = state.bump_rv();
        let child = state
            .children
            .get_mut(&RunKey::new(namespace, name))
            .ok_or_else(|| StoreError::not_found(kind.as_str(), namespace, name))?;
        match child {
            Child::TaskRun(tr) => {
                tr.spec.status = Some(CancelRequest::TaskRunCancelled);
                tr.spec.status_message = Some(message.to_string());
            }
            Child::Run(r) => {
                r.spec.status = Some(CancelRequest::RunCancelled);
                r.spec.status_message = Some(message.to_string());
            }
        }
        child.meta_mut().resource_version = rv;
        Ok(())
    }

    async fn reset_for_retry(&self, kind: ChildKind, namespace: &str, name: &str) -> Result<Child, StoreError> {
        let mut state = self.lock();
        state.fault("reset_for_retry")?;
        let rv = state.bump_rv();
        let child = state
            .children
            .get_mut(&RunKey::new(namespace, name))
            .ok_or_else(|| StoreError::not_found(kind.as_str(), namespace, name))?;

        let status = child.status_mut();
        let mut archived = status.clone();
        let mut fresh = ChildStatus {
            retries_status: std::mem::take(&mut archived.retries_status),
            ..Default::default()
        };
        fresh.retries_status.push(archived);
        *status = fresh;
        child.meta_mut().resource_version = rv;
        Ok(child.clone())
    }

    async fn set_timeout(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.fault("set_timeout")?;
        let rv = state.bump_rv();
        let child = state
            .children
            .get_mut(&RunKey::new(namespace, name))
            .ok_or_else(|| StoreError::not_found(kind.as_str(), namespace, name))?;
        match child {
            Child::TaskRun(tr) => tr.spec.timeout = Some(timeout),
            Child::Run(r) => r.spec.timeout = Some(timeout),
        }
        child.meta_mut().resource_version = rv;
        Ok(())
    }
}

#[async_trait]
impl DefinitionClient for FakeCluster {
    async fn pipeline(&self, namespace: &str, name: &str) -> Result<Option<Pipeline>, StoreError> {
        let mut state = self.lock();
        state.fault("get")?;
        Ok(state.pipelines.get(&RunKey::new(namespace, name)).cloned())
    }

    async fn task(&self, namespace: &str, name: &str) -> Result<Option<Task>, StoreError> {
        let mut state = self.lock();
        state.fault("get")?;
        Ok(state.tasks.get(&RunKey::new(namespace, name)).cloned())
    }
}

#[async_trait]
impl VolumeClient for FakeCluster {
    async fn ensure_claim(&self, claim: PersistentClaim) -> Result<PersistentClaim, StoreError> {
        let mut state = self.lock();
        state.fault("ensure_claim")?;
        let key = claim.meta.key();
        if let Some(existing) = state.claims.get(&key) {
            return Ok(existing.clone());
        }
        let mut claim = claim;
        claim.meta.uid = state.next_uid();
        claim.meta.resource_version = state.bump_rv();
        state.claims.insert(key, claim.clone());
        Ok(claim)
    }

    async fn ensure_assistant(&self, namespace: &str, name: &str, claim: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.fault("ensure_assistant")?;
        state
            .assistants
            .entry(RunKey::new(namespace, name))
            .or_insert_with(|| claim.to_string());
        Ok(())
    }
}

#[async_trait]
impl EventSink for FakeCluster {
    async fn emit(&self, event: ClusterEvent) {
        self.lock().events.push(event);
    }
}

#[async_trait]
impl CloudEventSink for FakeCluster {
    async fn emit(&self, event_type: &str, subject: &str, data: serde_json::Value) {
        self.lock()
            .cloud_events
            .push((event_type.to_string(), subject.to_string(), data));
    }
}

#[async_trait]
impl ResolverClient for FakeCluster {
    async fn request(&self, request: ResolutionRequest) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.fault("request")?;
        state
            .resolutions
            .entry(RunKey::new(&request.namespace, &request.name))
            .or_insert(ResolutionStatus::Pending);
        Ok(())
    }

    async fn status(&self, namespace: &str, name: &str) -> Result<Option<ResolutionStatus>, StoreError> {
        let mut state = self.lock();
        state.fault("get")?;
        Ok(state.resolutions.get(&RunKey::new(namespace, name)).cloned())
    }
}

impl Cluster for FakeCluster {
    type Runs = FakeCluster;
    type Children = FakeCluster;
    type Definitions = FakeCluster;
    type Volumes = FakeCluster;
    type Events = FakeCluster;
    type CloudEvents = FakeCluster;
    type Resolution = FakeCluster;

    fn runs(&self) -> Self::Runs {
        self.clone()
    }

    fn children(&self) -> Self::Children {
        self.clone()
    }

    fn definitions(&self) -> Self::Definitions {
        self.clone()
    }

    fn volumes(&self) -> Self::Volumes {
        self.clone()
    }

    fn events(&self) -> Self::Events {
        self.clone()
    }

    fn cloud_events(&self) -> Self::CloudEvents {
        self.clone()
    }

    fn resolution(&self) -> Self::Resolution {
        self.clone()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
