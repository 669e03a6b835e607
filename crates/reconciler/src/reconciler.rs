// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The reconciler core: one idempotent pass over a pipeline run.
//!
//! Stage order: load, admit, resolve, validate, recover, decide
//! cancel/timeout, evaluate, act, synthesize, persist. Side effects
//! (creates, patches) are keyed by labels and deterministic names, so a
//! crashed pass is repaired by the next one. A status-write conflict
//! retries only the write, never the act phase.

use crate::cancel::{self, Interruption};
use crate::error::{Outcome, ReconcileError};
use crate::events;
use crate::expr::{self, ExprContext, ExprError};
use crate::flags::{FlagSource, Flags};
use crate::graph::{self, Graph, GraphError};
use crate::matrix::{self, MatrixError};
use crate::resolved::{Disposition, Dispositions, RunState, SkipRecord};
use crate::status;
use crate::volumes::{self, TaskWorkspaces, WorkspaceError, WorkspacePlan};
use crate::when::{self, WhenOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tern_core::child::{Child, ChildKind, Run, RunSpec, TaskRun, TaskRunSpec};
use tern_core::clock::Clock;
use tern_core::condition::Condition;
use tern_core::labels::{self, LabelSelector};
use tern_core::meta::{ObjectMeta, OwnerReference, RunKey};
use tern_core::param::{self, BindingError, Param, ParamKind};
use tern_core::pipeline::{PipelineSpec, PipelineTask, TaskRef, WhenExpression};
use tern_core::pipelinerun::{PipelineRun, PipelineRunReason, SkipReason};
use tern_core::task::{Task, TaskSpec};
use tern_store::{
    ChildClient, CloudEventSink, Cluster, ClusterEvent, DefinitionClient, EventSink, ResolutionRequest,
    ResolutionStatus, ResolverClient, RunClient, VolumeClient,
};
use tracing::{debug, info, warn};

/// How soon to poll a pending resolution request
const RESOLVER_POLL: Duration = Duration::from_secs(10);
/// Extra slack past a deadline so the timeout check sees it elapsed
const DEADLINE_SLACK: Duration = Duration::from_secs(1);
/// Attempts for the status write before giving the pass back to the queue
const STATUS_WRITE_ATTEMPTS: usize = 3;

/// Drives pipeline runs against the cluster store
pub struct Reconciler<C: Cluster, K: Clock, F: FlagSource> {
    cluster: C,
    clock: K,
    flags: F,
}

/// One planned child creation
#[derive(Debug, Clone)]
struct Creation {
    task_name: String,
    decl_index: usize,
    is_finally: bool,
    child_name: String,
    matrix_index: Option<usize>,
    custom_ref: Option<TaskRef>,
    task_spec: Option<TaskSpec>,
    params: Vec<Param>,
    when: Vec<WhenExpression>,
    workspaces: TaskWorkspaces,
    timeout: Option<Duration>,
}

/// Everything the evaluate stage decided
#[derive(Debug, Default)]
struct Evaluation {
    dispositions: Dispositions,
    skips: BTreeMap<String, SkipRecord>,
    creations: Vec<Creation>,
    retry_targets: Vec<(ChildKind, String)>,
    dag_complete: bool,
    all_done: bool,
}

enum PipelineResolution {
    Ready { name: String, spec: PipelineSpec },
    Waiting,
}

enum TaskResolution {
    Ready(BTreeMap<String, TaskSpec>),
    Waiting,
}

impl<C: Cluster, K: Clock, F: FlagSource> Reconciler<C, K, F> {
    pub fn new(cluster: C, clock: K, flags: F) -> Self {
        Self {
            cluster,
            clock,
            flags,
        }
    }

    /// One reconcile pass. Idempotent with respect to the store: replay
    /// against an unchanged snapshot performs no writes beyond an equal
    /// status.
    pub async fn reconcile(&self, key: &RunKey) -> Result<Outcome, ReconcileError> {
        let flags = self.flags.snapshot();

        let Some(mut run) = self.cluster.runs().get(key).await? else {
            debug!(run = %key, "pipeline run gone, nothing to do");
            return Ok(Outcome::Done);
        };
        if run.is_done() {
            debug!(run = %key, "pipeline run already terminal");
            return Ok(Outcome::Done);
        }
        let before = run.condition().cloned();

        if run.is_pending() {
            run.status.set_condition(Condition::running(
                PipelineRunReason::PipelineRunPending.as_str(),
                format!("PipelineRun {key} is pending"),
            ));
            self.persist_status(&mut run).await?;
            self.emit_transitions(&run, before.as_ref()).await;
            return Ok(Outcome::Done);
        }

        let newly_started = !run.has_started();
        if newly_started {
            run.status.start_time = Some(self.clock.now());
            info!(run = %key, "pipeline run started");
        }

        // Resolve the pipeline definition, freezing it for audit
        let (pipeline_name, spec) = match self.resolve_pipeline(&run, &flags).await {
            Ok(PipelineResolution::Ready { name, spec }) => (name, spec),
            Ok(PipelineResolution::Waiting) => {
                run.status.set_condition(Condition::running(
                    PipelineRunReason::ResolvingPipelineRef.as_str(),
                    "waiting for the pipeline reference to resolve",
                ));
                self.persist_status(&mut run).await?;
                self.emit_transitions(&run, before.as_ref()).await;
                return Ok(Outcome::RequeueAfter(RESOLVER_POLL));
            }
            Err(err) => return self.fail_run(&mut run, before.as_ref(), err).await,
        };
        if run.status.pipeline_spec.is_none() {
            run.status.pipeline_spec = Some(spec.clone());
        }

        // Validate before any side effect
        let graph = match self.validate(&run, &spec, &flags) {
            Ok(graph) => graph,
            Err(err) => return self.fail_run(&mut run, before.as_ref(), err).await,
        };
        let plan = match WorkspacePlan::build(&run, &spec) {
            Ok(plan) => plan,
            Err(err) => {
                return self
                    .fail_run(&mut run, before.as_ref(), workspace_failure(err))
                    .await
            }
        };

        // Resolve every referenced task definition
        let definitions = match self.resolve_tasks(&run, &spec, &flags).await {
            Ok(TaskResolution::Ready(defs)) => defs,
            Ok(TaskResolution::Waiting) => {
                run.status.set_condition(Condition::running(
                    PipelineRunReason::ResolvingTaskRef.as_str(),
                    "waiting for task references to resolve",
                ));
                self.persist_status(&mut run).await?;
                self.emit_transitions(&run, before.as_ref()).await;
                return Ok(Outcome::RequeueAfter(RESOLVER_POLL));
            }
            Err(err) => return self.fail_run(&mut run, before.as_ref(), err).await,
        };

        // Recover: adopt children labeled for this run, whatever a prior
        // pass managed to create before crashing
        let mut state = RunState::new(&spec, graph, |task| definitions.get(task).cloned());
        let children = self
            .cluster
            .children()
            .list(&key.namespace, &LabelSelector::for_run(&key.name))
            .await?;
        state.associate_children(children);

        // Cancellation and timeouts dominate everything else
        let interruption = cancel::determine(&run, &self.clock, flags.default_timeout);
        if interruption != Interruption::None {
            if let Err(err) = self.apply_cancellation(&run, &state, interruption).await {
                let reason = if interruption.is_timeout() {
                    PipelineRunReason::CouldntTimeOut
                } else {
                    PipelineRunReason::CouldntCancel
                };
                run.status
                    .set_condition(Condition::running(reason.as_str(), err.to_string()));
                self.persist_status(&mut run).await?;
                self.cluster
                    .events()
                    .emit(ClusterEvent::normal(key.clone(), reason.as_str(), err.to_string()))
                    .await;
                return Err(ReconcileError::Transient(err.to_string()));
            }
        }

        // Evaluate the graph and decide creations, skips and retries
        let evaluation = match self.evaluate(&run, &pipeline_name, &mut state, &plan, interruption, &flags) {
            Ok(evaluation) => evaluation,
            Err(err) => return self.fail_run(&mut run, before.as_ref(), err).await,
        };

        // Act: retries, claims, creations. Partial failure keeps the
        // successful side effects and requeues.
        let act_failed = self.act(&run, &pipeline_name, &mut state, &plan, &evaluation, &flags).await;

        self.synthesize(&mut run, &pipeline_name, &spec, &state, &evaluation, interruption, &flags);
        self.persist_status(&mut run).await?;
        if newly_started {
            let data = serde_json::json!({
                "pipelineRun": run.meta.name,
                "namespace": run.meta.namespace,
            });
            self.cluster
                .cloud_events()
                .emit(events::RunEvent::Started.event_type(), &run.meta.name, data)
                .await;
        }
        self.emit_transitions(&run, before.as_ref()).await;

        if let Some(err) = act_failed {
            return Err(ReconcileError::Transient(err));
        }
        if run.is_done() {
            return Ok(Outcome::Done);
        }
        match cancel::next_deadline(&run, &self.clock, flags.default_timeout, evaluation.dag_complete) {
            Some(remaining) => Ok(Outcome::RequeueAfter(remaining + DEADLINE_SLACK)),
            None => Ok(Outcome::Done),
        }
    }

    // -- resolve ----------------------------------------------------------

    async fn resolve_pipeline(
        &self,
        run: &PipelineRun,
        flags: &Flags,
    ) -> Result<PipelineResolution, ReconcileError> {
        let pipeline_name = run
            .spec
            .pipeline_ref
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| run.meta.name.clone());

        // The frozen spec wins on replays
        if let Some(frozen) = &run.status.pipeline_spec {
            return Ok(PipelineResolution::Ready {
                name: pipeline_name,
                spec: frozen.clone(),
            });
        }

        if let Some(inline) = &run.spec.pipeline_spec {
            return Ok(PipelineResolution::Ready {
                name: pipeline_name,
                spec: inline.clone(),
            });
        }

        let Some(pipeline_ref) = &run.spec.pipeline_ref else {
            return Err(ReconcileError::permanent(
                PipelineRunReason::CouldntGetPipeline,
                "pipeline run carries neither pipelineRef nor pipelineSpec",
            ));
        };

        if pipeline_ref.bundle.is_some() && !flags.enable_oci_bundles {
            return Err(ReconcileError::permanent(
                PipelineRunReason::FailedValidation,
                "bundle references are disabled by enable-oci-bundles",
            ));
        }

        if pipeline_ref.resolver.is_some() || pipeline_ref.bundle.is_some() {
            let request_name = format!("{}-pipeline", run.meta.name);
            match self
                .poll_resolution(run, &request_name, resolver_request(run, pipeline_ref.resolver.as_ref(), pipeline_ref.bundle.as_deref(), &pipeline_ref.name, &request_name))
                .await?
            {
                ResolutionStatus::Pending => return Ok(PipelineResolution::Waiting),
                ResolutionStatus::Failed(reason) => {
                    return Err(ReconcileError::permanent(
                        PipelineRunReason::CouldntGetPipeline,
                        format!("resolver failed for pipeline {:?}: {reason}", pipeline_ref.name),
                    ))
                }
                ResolutionStatus::Done(bytes) => {
                    let spec = parse_pipeline_bytes(&bytes).ok_or_else(|| {
                        ReconcileError::permanent(
                            PipelineRunReason::CouldntGetPipeline,
                            format!("resolved pipeline {:?} does not unmarshal", pipeline_ref.name),
                        )
                    })?;
                    return Ok(PipelineResolution::Ready {
                        name: pipeline_name,
                        spec,
                    });
                }
            }
        }

        match self
            .cluster
            .definitions()
            .pipeline(&run.meta.namespace, &pipeline_ref.name)
            .await?
        {
            Some(pipeline) => Ok(PipelineResolution::Ready {
                name: pipeline_name,
                spec: pipeline.spec,
            }),
            None => Err(ReconcileError::permanent(
                PipelineRunReason::CouldntGetPipeline,
                format!("pipeline {:?} not found", pipeline_ref.name),
            )),
        }
    }

    async fn resolve_tasks(
        &self,
        run: &PipelineRun,
        spec: &PipelineSpec,
        flags: &Flags,
    ) -> Result<TaskResolution, ReconcileError> {
        let mut definitions = BTreeMap::new();
        for task in spec.all_tasks() {
            if task.is_custom() {
                continue;
            }
            if let Some(inline) = &task.task_spec {
                definitions.insert(task.name.clone(), inline.clone());
                continue;
            }
            let Some(task_ref) = &task.task_ref else {
                continue; // structural validation rejects this later
            };

            if task_ref.bundle.is_some() && !flags.enable_oci_bundles {
                return Err(ReconcileError::permanent(
                    PipelineRunReason::FailedValidation,
                    format!("task {:?} uses a bundle reference but enable-oci-bundles is off", task.name),
                ));
            }

            if task_ref.resolver.is_some() || task_ref.bundle.is_some() {
                let request_name = format!("{}-{}", run.meta.name, task.name);
                match self
                    .poll_resolution(run, &request_name, resolver_request(run, task_ref.resolver.as_ref(), task_ref.bundle.as_deref(), &task_ref.name, &request_name))
                    .await?
                {
                    ResolutionStatus::Pending => return Ok(TaskResolution::Waiting),
                    ResolutionStatus::Failed(reason) => {
                        return Err(ReconcileError::permanent(
                            PipelineRunReason::CouldntGetTask,
                            format!("resolver failed for task {:?}: {reason}", task.name),
                        ))
                    }
                    ResolutionStatus::Done(bytes) => {
                        let task_spec = parse_task_bytes(&bytes).ok_or_else(|| {
                            ReconcileError::permanent(
                                PipelineRunReason::CouldntGetTask,
                                format!("resolved task {:?} does not unmarshal", task.name),
                            )
                        })?;
                        definitions.insert(task.name.clone(), task_spec);
                        continue;
                    }
                }
            }

            match self
                .cluster
                .definitions()
                .task(&run.meta.namespace, &task_ref.name)
                .await?
            {
                Some(stored) => {
                    definitions.insert(task.name.clone(), stored.spec);
                }
                None => {
                    return Err(ReconcileError::permanent(
                        PipelineRunReason::CouldntGetTask,
                        format!("task {:?} referenced by {:?} not found", task_ref.name, task.name),
                    ))
                }
            }
        }
        Ok(TaskResolution::Ready(definitions))
    }

    async fn poll_resolution(
        &self,
        run: &PipelineRun,
        request_name: &str,
        request: ResolutionRequest,
    ) -> Result<ResolutionStatus, ReconcileError> {
        let resolution = self.cluster.resolution();
        match resolution.status(&run.meta.namespace, request_name).await? {
            Some(status) => Ok(status),
            None => {
                resolution.request(request).await?;
                Ok(ResolutionStatus::Pending)
            }
        }
    }

    // -- validate ---------------------------------------------------------

    fn validate(&self, run: &PipelineRun, spec: &PipelineSpec, flags: &Flags) -> Result<Graph, ReconcileError> {
        spec.validate()
            .map_err(|e| ReconcileError::permanent(PipelineRunReason::FailedValidation, e.to_string()))?;

        param::validate_bindings(&spec.params, &run.spec.params).map_err(|e| {
            let reason = match &e {
                BindingError::Missing { .. } => PipelineRunReason::ParameterMissing,
                BindingError::TypeMismatch { .. } => PipelineRunReason::ParameterTypeMismatch,
                BindingError::MissingKeys { .. } => PipelineRunReason::ObjectParameterMissKeys,
            };
            ReconcileError::permanent(reason, e.to_string())
        })?;

        if !flags.object_params_allowed() {
            let object_typed = spec
                .params
                .iter()
                .any(|d| d.kind == ParamKind::Object)
                || run.spec.params.iter().any(|p| p.value.kind() == ParamKind::Object);
            if object_typed {
                return Err(ReconcileError::permanent(
                    PipelineRunReason::FailedValidation,
                    "object params require enable-api-fields: alpha",
                ));
            }
        }
        if !flags.matrix_allowed() && spec.all_tasks().any(|t| t.matrix.is_some()) {
            return Err(ReconcileError::permanent(
                PipelineRunReason::FailedValidation,
                "matrix requires enable-api-fields: alpha",
            ));
        }
        if !flags.enable_custom_tasks {
            if let Some(task) = spec.all_tasks().find(|t| t.is_custom()) {
                return Err(ReconcileError::permanent(
                    PipelineRunReason::FailedValidation,
                    format!("task {:?} is a custom task but enable-custom-tasks is off", task.name),
                ));
            }
        }

        // Every referenced param must be declared by the pipeline
        let declared: BTreeSet<&str> = spec.params.iter().map(|d| d.name.as_str()).collect();
        for task in spec.all_tasks() {
            let classified = expr::classify_references(graph::reference_strings(task));
            for param in &classified.params {
                if !declared.contains(param.as_str()) {
                    return Err(ReconcileError::permanent(
                        PipelineRunReason::InvalidBindings,
                        format!("task {:?} references undeclared parameter {param:?}", task.name),
                    ));
                }
            }
        }

        graph::validate_finally(spec)
            .map_err(|e| ReconcileError::permanent(PipelineRunReason::InvalidGraph, e.to_string()))?;

        Graph::build(&spec.tasks).map_err(|e| {
            let reason = match e {
                GraphError::UnknownDependency { .. } => PipelineRunReason::InvalidTaskResultReference,
                _ => PipelineRunReason::InvalidGraph,
            };
            ReconcileError::permanent(reason, e.to_string())
        })
    }

    // -- cancel / timeout -------------------------------------------------

    async fn apply_cancellation(
        &self,
        run: &PipelineRun,
        state: &RunState,
        interruption: Interruption,
    ) -> Result<(), tern_store::StoreError> {
        let children = self.cluster.children();
        for target in cancel::cancel_targets(state, interruption) {
            info!(run = %run.key(), child = %target.name, "cancelling child");
            children
                .cancel(
                    target.kind,
                    &run.meta.namespace,
                    &target.name,
                    interruption.cancel_message(),
                )
                .await?;
        }
        Ok(())
    }

    // -- evaluate ---------------------------------------------------------

    fn evaluate(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        state: &mut RunState,
        plan: &WorkspacePlan,
        interruption: Interruption,
        flags: &Flags,
    ) -> Result<Evaluation, ReconcileError> {
        let mut evaluation = Evaluation::default();

        // Prefill from the children that exist. An interruption stops
        // retries: a failure that would have been retried is final.
        for task in &state.tasks {
            let mut disposition = task.child_disposition();
            let retryable = task.children_needing_retry();
            if interruption == Interruption::None {
                for child in retryable {
                    evaluation
                        .retry_targets
                        .push((child.kind(), child.name().to_string()));
                }
            } else if disposition == Disposition::Running
                && !task.children.is_empty()
                && task.children.iter().all(Child::is_done)
                && !retryable.is_empty()
            {
                disposition = Disposition::Failed;
            }
            evaluation
                .dispositions
                .insert(task.name().to_string(), disposition);
        }

        // Started matrix tasks refresh their expected combination count
        // and plan missing combinations before anything depends on them
        let started_matrix: Vec<String> = state
            .dag_tasks()
            .filter(|t| t.is_matrixed() && !t.children.is_empty())
            .map(|t| t.name().to_string())
            .collect();
        for name in &started_matrix {
            self.evaluate_task(run, pipeline_name, state, plan, interruption, flags, name, false, &mut evaluation)?;
        }

        if let Some(reason) = interruption.dag_skip() {
            // Winding down: every unstarted DAG task is skipped, wherever
            // it sits in the graph
            let unstarted: Vec<String> = state
                .dag_tasks()
                .filter(|t| {
                    matches!(
                        evaluation.dispositions.get(t.name()),
                        Some(Disposition::NotCreated)
                    )
                })
                .map(|t| t.name().to_string())
                .collect();
            for name in &unstarted {
                record_skip(&mut evaluation, name, reason, Vec::new());
            }
        } else {
            // The graph's ready frontier is the scheduling gate. Skips
            // settle nodes and can unlock dependents within the same
            // pass, so the frontier is recomputed until it drains.
            let mut visited: BTreeSet<String> = BTreeSet::new();
            loop {
                let ready = state.graph.schedulable(
                    |n| {
                        evaluation
                            .dispositions
                            .get(n)
                            .is_some_and(Disposition::is_settled)
                    },
                    |n| {
                        !visited.contains(n)
                            && matches!(evaluation.dispositions.get(n), Some(Disposition::NotCreated))
                    },
                );
                if ready.is_empty() {
                    break;
                }
                for name in ready {
                    visited.insert(name.clone());
                    self.evaluate_task(run, pipeline_name, state, plan, interruption, flags, &name, false, &mut evaluation)?;
                }
            }
        }

        evaluation.dag_complete = state
            .graph
            .is_complete(|n| evaluation.dispositions.get(n).is_some_and(Disposition::is_settled));

        // Finally runs after the DAG settles (or gets skipped wholesale)
        let finally_names: Vec<String> = state.finally_tasks().map(|t| t.name().to_string()).collect();
        for name in &finally_names {
            let started = state.get(name).is_some_and(|t| !t.children.is_empty());
            if !started {
                if let Some(reason) = interruption.finally_skip() {
                    record_skip(&mut evaluation, name, reason, Vec::new());
                    continue;
                }
                if !(evaluation.dag_complete && interruption.runs_finally()) {
                    continue;
                }
            }
            self.evaluate_task(run, pipeline_name, state, plan, interruption, flags, name, true, &mut evaluation)?;
        }

        evaluation.all_done = evaluation.dag_complete
            && finally_names.iter().all(|n| {
                evaluation
                    .dispositions
                    .get(n)
                    .is_some_and(Disposition::is_settled)
            })
            && evaluation.creations.is_empty()
            && evaluation.retry_targets.is_empty();

        Ok(evaluation)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_task(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        state: &mut RunState,
        plan: &WorkspacePlan,
        interruption: Interruption,
        flags: &Flags,
        name: &str,
        is_finally: bool,
        evaluation: &mut Evaluation,
    ) -> Result<(), ReconcileError> {
        let Some(task) = state.get(name) else {
            return Ok(());
        };
        let task_snapshot = task.task.clone();
        let decl_index = state.tasks.iter().position(|t| t.name() == name).unwrap_or(0);
        let started = !task.children.is_empty();
        let matrixed = task.is_matrixed();
        let existing: BTreeSet<usize> = task.children.iter().map(Child::matrix_index).collect();

        if started && !matrixed {
            // Disposition was prefilled; nothing to plan
            return Ok(());
        }

        if !started && !is_finally {
            // The frontier already guaranteed every parent is settled;
            // what is left is classifying the skips that cascade. A
            // when-skipped parent does not block by itself.
            let parent_blocks = state.graph.parents(name).any(|p| {
                matches!(
                    evaluation.dispositions.get(p),
                    Some(Disposition::Failed | Disposition::Cancelled)
                        | Some(Disposition::Skipped(
                            SkipReason::ParentTasksSkip
                                | SkipReason::MissingResultsSkip
                                | SkipReason::GracefullyCancelledSkip
                                | SkipReason::GracefullyStoppedSkip
                                | SkipReason::PipelineTimedOutSkip
                                | SkipReason::TasksTimedOutSkip
                                | SkipReason::FinallyTimedOutSkip
                        ))
                )
            });
            if parent_blocks {
                record_skip(evaluation, name, SkipReason::ParentTasksSkip, Vec::new());
                return Ok(());
            }
        }

        // Refreshes the disposition of a started matrix task once the
        // expected combination count is known
        let settle_matrix = |state: &mut RunState, evaluation: &mut Evaluation, expected: usize| {
            if let Some(t) = state.get_mut(name) {
                t.expected_children = Some(expected);
            }
            if started {
                if let Some(t) = state.get(name) {
                    evaluation
                        .dispositions
                        .insert(name.to_string(), t.child_disposition());
                }
            }
        };

        let ctx = self.expr_context(run, pipeline_name, state, plan, &evaluation.dispositions, &task_snapshot);

        // When gating, scoped to this task alone. Started tasks replay
        // it deterministically; the inputs are immutable.
        let when_eval = when::evaluate(&ctx, &task_snapshot.when)
            .map_err(|e| expr_failure(e))?;
        if let WhenOutcome::Skip(reason) = when_eval.outcome {
            if !started {
                record_skip(evaluation, name, reason, when_eval.expressions);
            }
            return Ok(());
        }

        // Parameter resolution. Missing results skip inside finally,
        // and when the producer was skipped; otherwise they are fatal.
        let params = match expr::resolve_params(&ctx, &task_snapshot.params) {
            Ok(params) => params,
            Err(err) => {
                if let Some(reason) = downgrade_missing(&err, is_finally, &evaluation.dispositions) {
                    if !started {
                        record_skip(evaluation, name, reason, when_eval.expressions);
                    }
                    return Ok(());
                }
                return Err(expr_failure(err));
            }
        };

        // Matrix fan-out
        let combinations = match &task_snapshot.matrix {
            Some(matrix_spec) if matrixed => {
                match matrix::fan_out(&ctx, matrix_spec, flags.max_matrix_combinations) {
                    Ok(combinations) => Some(combinations),
                    Err(MatrixError::Resolve(err)) => {
                        if let Some(reason) = downgrade_missing(&err, is_finally, &evaluation.dispositions) {
                            if !started {
                                record_skip(evaluation, name, reason, when_eval.expressions);
                            }
                            return Ok(());
                        }
                        return Err(expr_failure(err));
                    }
                    Err(err) => {
                        return Err(ReconcileError::permanent(
                            PipelineRunReason::InvalidGraph,
                            err.to_string(),
                        ))
                    }
                }
            }
            _ => None,
        };

        let task_def = state.get(name).and_then(|t| t.spec.clone());
        let workspaces = plan
            .for_task(&task_snapshot, task_def.as_ref())
            .map_err(workspace_failure)?;

        let timeout = self.child_timeout(run, &task_snapshot, is_finally, flags);
        let custom_ref = task_snapshot.is_custom().then(|| task_snapshot.task_ref.clone()).flatten();

        match combinations {
            None => {
                evaluation.creations.push(Creation {
                    task_name: name.to_string(),
                    decl_index,
                    is_finally,
                    child_name: matrix::child_name(&run.meta.name, name, 0, false),
                    matrix_index: None,
                    custom_ref,
                    task_spec: task_def,
                    params,
                    when: when_eval.expressions,
                    workspaces,
                    timeout,
                });
            }
            Some(combinations) => {
                settle_matrix(state, evaluation, combinations.len());
                if started && interruption != Interruption::None {
                    // No new fan-out while winding down
                    return Ok(());
                }
                for combination in combinations {
                    if existing.contains(&combination.index) {
                        continue; // a prior pass created this cell
                    }
                    let mut child_params = params.clone();
                    child_params.extend(combination.params);
                    evaluation.creations.push(Creation {
                        task_name: name.to_string(),
                        decl_index,
                        is_finally,
                        child_name: matrix::child_name(&run.meta.name, name, combination.index, true),
                        matrix_index: Some(combination.index),
                        custom_ref: custom_ref.clone(),
                        task_spec: task_def.clone(),
                        params: child_params,
                        when: when_eval.expressions.clone(),
                        workspaces: workspaces.clone(),
                        timeout,
                    });
                }
            }
        }
        Ok(())
    }

    fn expr_context(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        state: &RunState,
        plan: &WorkspacePlan,
        dispositions: &Dispositions,
        task: &PipelineTask,
    ) -> ExprContext {
        let mut statuses = BTreeMap::new();
        for dag_task in state.dag_tasks() {
            let value = dispositions
                .get(dag_task.name())
                .map(Disposition::status_value)
                .unwrap_or("None");
            statuses.insert(dag_task.name().to_string(), value.to_string());
        }
        ExprContext {
            params: param::effective_params(
                &run.status.pipeline_spec.as_ref().map(|s| s.params.clone()).unwrap_or_default(),
                &run.spec.params,
            ),
            results: state.known_results(),
            statuses,
            run_name: run.meta.name.clone(),
            run_namespace: run.meta.namespace.clone(),
            run_uid: run.meta.uid.clone(),
            pipeline_name: pipeline_name.to_string(),
            retries: task.retries,
            workspaces: plan.expr_refs(),
        }
    }

    fn child_timeout(
        &self,
        run: &PipelineRun,
        task: &PipelineTask,
        is_finally: bool,
        flags: &Flags,
    ) -> Option<Duration> {
        if let Some(explicit) = task.timeout {
            return Some(explicit);
        }
        let now = self.clock.now();
        let budget = |since: Option<chrono::DateTime<chrono::Utc>>, limit: Option<Duration>| {
            let (since, limit) = (since?, limit?);
            let elapsed = now.signed_duration_since(since).to_std().unwrap_or_default();
            Some(limit.saturating_sub(elapsed))
        };

        let subgraph = if is_finally {
            budget(run.status.finally_start_time, run.finally_timeout())
        } else {
            budget(run.status.start_time, run.tasks_timeout())
        };
        subgraph.or_else(|| budget(run.status.start_time, run.pipeline_timeout(flags.default_timeout)))
    }

    // -- act --------------------------------------------------------------

    /// Returns a message if any side effect failed and the pass should
    /// requeue after persisting what did land.
    async fn act(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        state: &mut RunState,
        plan: &WorkspacePlan,
        evaluation: &Evaluation,
        flags: &Flags,
    ) -> Option<String> {
        let children = self.cluster.children();
        let volumes = self.cluster.volumes();
        let mut failure = None;

        for (kind, name) in &evaluation.retry_targets {
            info!(run = %run.key(), child = %name, "retrying failed child");
            match children.reset_for_retry(*kind, &run.meta.namespace, name).await {
                Ok(reset) => {
                    if let Some(task_name) = reset.pipeline_task().map(str::to_string) {
                        if let Some(task) = state.get_mut(&task_name) {
                            if let Some(slot) =
                                task.children.iter_mut().find(|c| c.name() == reset.name())
                            {
                                *slot = reset;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(run = %run.key(), child = %name, error = %err, "retry patch failed");
                    failure = Some(err.to_string());
                }
            }
        }

        // Materialize claims only for workspaces a child is about to use
        let mut ensured = BTreeSet::new();
        for creation in &evaluation.creations {
            for source in &creation.workspaces.sources {
                if !ensured.insert(source.clone()) {
                    continue;
                }
                if let Some(claim) = plan.claim_for(source) {
                    if let Err(err) = volumes.ensure_claim(claim.clone()).await {
                        warn!(run = %run.key(), workspace = %source, error = %err, "claim creation failed");
                        failure = Some(err.to_string());
                    }
                }
            }
        }

        let mut ordered: Vec<&Creation> = evaluation.creations.iter().collect();
        ordered.sort_by_key(|c| (c.is_finally, c.decl_index, c.matrix_index));

        for creation in ordered {
            // Co-location is a hint; absence is non-fatal
            for shared in creation.workspaces.shared_sources(plan) {
                let assistant = volumes::assistant_name(&run.meta.name, shared);
                if let Some(claim) = plan
                    .binding(shared)
                    .and_then(|b| b.persistent_volume_claim.as_ref())
                {
                    if let Err(err) = volumes
                        .ensure_assistant(&run.meta.namespace, &assistant, &claim.claim_name)
                        .await
                    {
                        debug!(run = %run.key(), assistant = %assistant, error = %err, "assistant hint not materialized");
                    }
                }
            }

            let child = self.build_child(run, pipeline_name, plan, creation, flags);
            match children.create(child).await {
                Ok(created) => {
                    info!(run = %run.key(), child = %created.name(), task = %creation.task_name, "created child");
                    if let Some(task) = state.get_mut(&creation.task_name) {
                        task.children.push(created);
                        task.children.sort_by_key(Child::matrix_index);
                        if !task.is_matrixed() {
                            task.expected_children = Some(1);
                        }
                    }
                }
                Err(err) if matches!(err, tern_store::StoreError::AlreadyExists { .. }) => {
                    // Another pass won the race; recovery adopts it next time
                    debug!(run = %run.key(), child = %creation.child_name, "child already exists");
                }
                Err(err) => {
                    warn!(run = %run.key(), child = %creation.child_name, error = %err, "child creation failed");
                    failure = Some(err.to_string());
                }
            }
        }
        failure
    }

    fn build_child(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        plan: &WorkspacePlan,
        creation: &Creation,
        flags: &Flags,
    ) -> Child {
        let overrides = run
            .spec
            .task_run_specs
            .iter()
            .find(|s| s.pipeline_task_name == creation.task_name);

        let mut meta = ObjectMeta::new(&run.meta.namespace, &creation.child_name);

        // Label and annotation precedence: run metadata first, then the
        // per-task override, with the engine's contract labels on top
        meta.labels.extend(run.meta.labels.clone());
        meta.annotations.extend(run.meta.annotations.clone());
        if let Some(overrides) = overrides {
            meta.labels.extend(overrides.labels.clone());
            meta.annotations.extend(overrides.annotations.clone());
        }
        meta.labels
            .insert(labels::PIPELINE.to_string(), pipeline_name.to_string());
        meta.labels
            .insert(labels::PIPELINE_RUN.to_string(), run.meta.name.clone());
        meta.labels
            .insert(labels::PIPELINE_TASK.to_string(), creation.task_name.clone());
        meta.labels.insert(
            labels::MEMBER_OF.to_string(),
            if creation.is_finally {
                labels::MEMBER_FINALLY.to_string()
            } else {
                labels::MEMBER_TASKS.to_string()
            },
        );
        if let Some(index) = creation.matrix_index {
            meta.labels
                .insert(labels::MATRIX_INDEX.to_string(), index.to_string());
        }
        for shared in creation.workspaces.shared_sources(plan) {
            meta.annotations.insert(
                labels::AFFINITY_ASSISTANT.to_string(),
                volumes::assistant_name(&run.meta.name, shared),
            );
        }
        meta.owner_references
            .push(OwnerReference::controller("PipelineRun", &run.meta));

        let service_account = overrides
            .and_then(|o| o.service_account_name.clone())
            .or_else(|| run.spec.service_account_name.clone())
            .unwrap_or_else(|| flags.default_service_account.clone());

        if let Some(custom_ref) = &creation.custom_ref {
            return Child::Run(Run {
                meta,
                spec: RunSpec {
                    run_ref: Some(custom_ref.clone()),
                    params: creation.params.clone(),
                    service_account_name: Some(service_account),
                    timeout: creation.timeout,
                    ..Default::default()
                },
                ..Default::default()
            });
        }

        Child::TaskRun(TaskRun {
            meta,
            spec: TaskRunSpec {
                task_spec: creation.task_spec.clone(),
                params: creation.params.clone(),
                service_account_name: Some(service_account),
                workspaces: creation.workspaces.bindings.clone(),
                timeout: creation.timeout,
                pod_template: overrides
                    .and_then(|o| o.pod_template.clone())
                    .or_else(|| run.spec.pod_template.clone()),
                compute_resources: overrides.and_then(|o| o.compute_resources.clone()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    // -- synthesize & persist ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn synthesize(
        &self,
        run: &mut PipelineRun,
        pipeline_name: &str,
        spec: &PipelineSpec,
        state: &RunState,
        evaluation: &Evaluation,
        interruption: Interruption,
        flags: &Flags,
    ) {
        let now = self.clock.now();

        // Created children moved their tasks out of NotCreated
        let mut dispositions = evaluation.dispositions.clone();
        for creation in &evaluation.creations {
            if state
                .get(&creation.task_name)
                .is_some_and(|t| !t.children.is_empty())
            {
                dispositions.insert(creation.task_name.clone(), Disposition::Running);
            }
        }

        if evaluation.dag_complete
            && run.status.finally_start_time.is_none()
            && state.finally_tasks().next().is_some()
        {
            run.status.finally_start_time = Some(now);
        }

        // A hard stop goes terminal as soon as the patches landed; the
        // children wind down on their own
        let forced_terminal = matches!(
            interruption,
            Interruption::CancelImmediate | Interruption::PipelineTimeout
        );
        let all_done = evaluation.all_done || forced_terminal;

        let buckets = status::buckets(&dispositions);
        let any_started = dispositions.values().any(|d| !matches!(d, Disposition::NotCreated));
        let condition = status::overall(interruption, &buckets, all_done, any_started);

        if condition.is_terminal() && run.status.completion_time.is_none() {
            run.status.completion_time = Some(now);
            let ctx = self.final_context(run, pipeline_name, state, &dispositions);
            run.status.pipeline_results = status::pipeline_results(&spec.results, &ctx);
        }

        run.status.skipped_tasks = status::skipped_list(state, &evaluation.skips);
        status::apply_embedded_status(&mut run.status, flags.embedded_status, state);
        run.status.set_condition(condition);
    }

    fn final_context(
        &self,
        run: &PipelineRun,
        pipeline_name: &str,
        state: &RunState,
        dispositions: &Dispositions,
    ) -> ExprContext {
        let mut statuses = BTreeMap::new();
        for task in state.dag_tasks() {
            let value = dispositions
                .get(task.name())
                .map(Disposition::status_value)
                .unwrap_or("None");
            statuses.insert(task.name().to_string(), value.to_string());
        }
        ExprContext {
            params: param::effective_params(
                &run.status.pipeline_spec.as_ref().map(|s| s.params.clone()).unwrap_or_default(),
                &run.spec.params,
            ),
            results: state.known_results(),
            statuses,
            run_name: run.meta.name.clone(),
            run_namespace: run.meta.namespace.clone(),
            run_uid: run.meta.uid.clone(),
            pipeline_name: pipeline_name.to_string(),
            retries: 0,
            workspaces: BTreeMap::new(),
        }
    }

    async fn persist_status(&self, run: &mut PipelineRun) -> Result<(), ReconcileError> {
        // Replaying an unchanged snapshot must be a no-op, including the
        // status write
        if let Some(stored) = self.cluster.runs().get(&run.key()).await? {
            if stored.status == run.status {
                *run = stored;
                return Ok(());
            }
        }
        let runs = self.cluster.runs();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match runs.update_status(run).await {
                Ok(stored) => {
                    *run = stored;
                    return Ok(());
                }
                Err(err) if err.is_conflict() && attempt < STATUS_WRITE_ATTEMPTS => {
                    debug!(run = %run.key(), attempt, "status write conflicted, reloading");
                    let Some(fresh) = runs.get(&run.key()).await? else {
                        return Err(ReconcileError::Transient(err.to_string()));
                    };
                    let status = run.status.clone();
                    *run = fresh;
                    run.status = status;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn emit_transitions(&self, run: &PipelineRun, before: Option<&Condition>) {
        let Some(after) = run.condition() else {
            return;
        };
        let changed = before.map(|b| b.status != after.status || b.reason != after.reason).unwrap_or(true);
        if !changed {
            return;
        }

        let key = run.key();
        let event = if after.is_false() {
            ClusterEvent::warning(key.clone(), after.reason.clone(), after.message.clone())
        } else {
            ClusterEvent::normal(key.clone(), after.reason.clone(), after.message.clone())
        };
        self.cluster.events().emit(event).await;

        if let Some(cloud) = events::for_transition(before, after) {
            let data = serde_json::json!({
                "pipelineRun": run.meta.name,
                "namespace": run.meta.namespace,
                "reason": after.reason,
                "message": after.message,
            });
            self.cluster
                .cloud_events()
                .emit(cloud.event_type(), &run.meta.name, data)
                .await;
        }
    }

    async fn fail_run(
        &self,
        run: &mut PipelineRun,
        before: Option<&Condition>,
        err: ReconcileError,
    ) -> Result<Outcome, ReconcileError> {
        let ReconcileError::Permanent { reason, message } = &err else {
            return Err(err);
        };
        warn!(run = %run.key(), reason = %reason, message = %message, "pipeline run failed permanently");
        run.status
            .set_condition(Condition::failed(reason.as_str(), message.clone()));
        run.status.completion_time = Some(self.clock.now());
        self.persist_status(run).await?;
        self.emit_transitions(run, before).await;
        Err(err)
    }
}

fn record_skip(evaluation: &mut Evaluation, name: &str, reason: SkipReason, when: Vec<WhenExpression>) {
    evaluation
        .dispositions
        .insert(name.to_string(), Disposition::Skipped(reason));
    evaluation
        .skips
        .insert(name.to_string(), SkipRecord { reason, when });
}

/// A missing result skips the task when it can never be satisfied
/// through no fault of the author: the producer was skipped or the task
/// is a finally task. A producer that ran but never emitted the result
/// is an authoring error.
fn downgrade_missing(err: &ExprError, is_finally: bool, dispositions: &Dispositions) -> Option<SkipReason> {
    let ExprError::MissingResult { task, .. } = err else {
        return None;
    };
    if is_finally {
        return Some(SkipReason::MissingResultsSkip);
    }
    match dispositions.get(task.as_str()) {
        Some(Disposition::Skipped(_)) => Some(SkipReason::MissingResultsSkip),
        _ => None,
    }
}

fn expr_failure(err: ExprError) -> ReconcileError {
    let reason = match &err {
        ExprError::MissingResult { .. } => PipelineRunReason::InvalidTaskResultReference,
        ExprError::UnknownTask { .. } => PipelineRunReason::InvalidTaskResultReference,
        _ => PipelineRunReason::InvalidBindings,
    };
    ReconcileError::permanent(reason, err.to_string())
}

fn workspace_failure(err: WorkspaceError) -> ReconcileError {
    let reason = match &err {
        WorkspaceError::RequiredMarkedOptional { .. } => PipelineRunReason::RequiredWorkspaceMarkedOptional,
        WorkspaceError::MissingBinding { .. } | WorkspaceError::UndeclaredBinding { .. } => {
            PipelineRunReason::InvalidBindings
        }
        _ => PipelineRunReason::FailedValidation,
    };
    ReconcileError::permanent(reason, err.to_string())
}

fn resolver_request(
    run: &PipelineRun,
    resolver: Option<&tern_core::pipeline::ResolverRef>,
    bundle: Option<&str>,
    target: &str,
    request_name: &str,
) -> ResolutionRequest {
    let (resolver_name, mut params) = match resolver {
        Some(r) => (r.resolver.clone(), r.params.clone()),
        None => (
            "bundles".to_string(),
            vec![Param::new("bundle", bundle.unwrap_or_default())],
        ),
    };
    params.push(Param::new("name", target));
    ResolutionRequest {
        namespace: run.meta.namespace.clone(),
        name: request_name.to_string(),
        resolver: resolver_name,
        params,
    }
}

fn parse_pipeline_bytes(bytes: &[u8]) -> Option<PipelineSpec> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    if value.get("spec").is_some() {
        serde_json::from_value::<tern_core::pipeline::Pipeline>(value)
            .ok()
            .map(|p| p.spec)
    } else {
        serde_json::from_value(value).ok()
    }
}

fn parse_task_bytes(bytes: &[u8]) -> Option<TaskSpec> {
    let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    if value.get("spec").is_some() {
        serde_json::from_value::<Task>(value).ok().map(|t| t.spec)
    } else {
        serde_json::from_value(value).ok()
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
