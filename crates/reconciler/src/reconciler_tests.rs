use super::*;
use crate::flags::ApiFields;
use tern_core::clock::FakeClock;
use tern_core::param::ParamDecl;
use tern_core::pipelinerun::PipelineRef;
use tern_core::pipelinerun::SpecStatus;
use tern_core::task::{Step, TaskSpec};
use tern_store::{FakeCluster, StoreError};

fn echo_task() -> TaskSpec {
    TaskSpec {
        steps: vec![Step {
            name: "echo".to_string(),
            image: "busybox".to_string(),
            script: Some("echo hello".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn inline_run(name: &str, spec: PipelineSpec) -> PipelineRun {
    let mut run = PipelineRun::new("ns", name);
    run.spec.pipeline_spec = Some(spec);
    run
}

fn single_task_spec() -> PipelineSpec {
    PipelineSpec {
        tasks: vec![PipelineTask::named("build").with_spec(echo_task())],
        ..Default::default()
    }
}

fn reconciler(cluster: &FakeCluster) -> Reconciler<FakeCluster, FakeClock, Flags> {
    Reconciler::new(cluster.clone(), FakeClock::new(), Flags::default())
}

#[tokio::test]
async fn absent_run_is_a_no_op() {
    let cluster = FakeCluster::new();
    let outcome = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "ghost"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);
    assert!(cluster.events().is_empty());
}

#[tokio::test]
async fn terminal_run_is_a_no_op() {
    let cluster = FakeCluster::new();
    let mut run = inline_run("r", single_task_spec());
    run.status.completion_time = Some(chrono::Utc::now());
    run.status.set_condition(Condition::succeeded("Succeeded", ""));
    cluster.put_run(run);

    reconciler(&cluster).reconcile(&RunKey::new("ns", "r")).await.unwrap();
    assert!(cluster.all_children("ns").is_empty());
}

#[tokio::test]
async fn pending_run_creates_nothing_and_has_no_start_time() {
    let cluster = FakeCluster::new();
    let mut run = inline_run("r", single_task_spec());
    run.spec.status = Some(SpecStatus::Pending);
    cluster.put_run(run);

    let outcome = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Done);

    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert!(stored.status.start_time.is_none());
    assert_eq!(stored.condition().unwrap().reason, "PipelineRunPending");
    assert!(cluster.all_children("ns").is_empty());
    // Held runs mirror no cloud event
    assert!(cluster.cloud_event_log().is_empty());
}

#[tokio::test]
async fn first_pass_creates_the_child_with_contract_labels() {
    let cluster = FakeCluster::new();
    cluster.put_run(inline_run("r", single_task_spec()));

    reconciler(&cluster).reconcile(&RunKey::new("ns", "r")).await.unwrap();

    let child = cluster.child("ns", "r-build").expect("child created");
    let labels = &child.meta().labels;
    assert_eq!(labels[labels::PIPELINE_RUN], "r");
    assert_eq!(labels[labels::PIPELINE_TASK], "build");
    assert_eq!(labels[labels::MEMBER_OF], "tasks");
    assert!(child.meta().owner_references[0].controller);

    let Child::TaskRun(tr) = &child else {
        panic!("expected a task run");
    };
    assert_eq!(tr.spec.service_account_name.as_deref(), Some("default"));
    assert!(tr.spec.task_spec.is_some());

    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert!(stored.status.start_time.is_some());
    assert_eq!(stored.condition().unwrap().reason, "Running");
    assert_eq!(stored.status.child_references.len(), 1);
    assert!(stored.status.pipeline_spec.is_some());
}

#[tokio::test]
async fn started_cloud_event_fires_once() {
    let cluster = FakeCluster::new();
    cluster.put_run(inline_run("r", single_task_spec()));
    let reconciler = reconciler(&cluster);
    let key = RunKey::new("ns", "r");

    reconciler.reconcile(&key).await.unwrap();
    reconciler.reconcile(&key).await.unwrap();

    let started: Vec<_> = cluster
        .cloud_event_log()
        .into_iter()
        .filter(|(t, _, _)| t == "pipelinerun.started")
        .collect();
    assert_eq!(started.len(), 1);
}

#[tokio::test]
async fn missing_required_param_fails_permanently() {
    let cluster = FakeCluster::new();
    let mut spec = single_task_spec();
    spec.params.push(ParamDecl::string("url"));
    cluster.put_run(inline_run("r", spec));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::ParameterMissing,
            ..
        }
    ));

    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert!(stored.is_done());
    assert_eq!(stored.condition().unwrap().reason, "ParameterMissing");
    assert!(cluster.all_children("ns").is_empty());
}

#[tokio::test]
async fn cycle_fails_with_invalid_graph() {
    let cluster = FakeCluster::new();
    let spec = PipelineSpec {
        tasks: vec![
            PipelineTask::named("a").with_spec(echo_task()).run_after(&["b"]),
            PipelineTask::named("b").with_spec(echo_task()).run_after(&["a"]),
        ],
        ..Default::default()
    };
    cluster.put_run(inline_run("r", spec));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::InvalidGraph,
            ..
        }
    ));
}

#[tokio::test]
async fn matrix_requires_the_alpha_gate() {
    let cluster = FakeCluster::new();
    let mut task = PipelineTask::named("t").with_spec(echo_task());
    task.matrix = Some(tern_core::pipeline::Matrix {
        params: vec![Param::new("p", tern_core::param::ParamValue::Array(vec!["a".into()]))],
    });
    cluster.put_run(inline_run("r", PipelineSpec {
        tasks: vec![task],
        ..Default::default()
    }));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::FailedValidation,
            ..
        }
    ));
}

#[tokio::test]
async fn custom_tasks_require_their_gate() {
    let cluster = FakeCluster::new();
    let mut task = PipelineTask::named("wait");
    task.task_ref = Some(TaskRef {
        name: "waiter".to_string(),
        api_version: Some("example.dev/v1".to_string()),
        kind: Some("Wait".to_string()),
        ..Default::default()
    });
    cluster.put_run(inline_run("r", PipelineSpec {
        tasks: vec![task],
        ..Default::default()
    }));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::FailedValidation,
            ..
        }
    ));
}

#[tokio::test]
async fn custom_task_spawns_a_run_child_when_enabled() {
    let cluster = FakeCluster::new();
    let mut task = PipelineTask::named("wait");
    task.task_ref = Some(TaskRef {
        name: "waiter".to_string(),
        api_version: Some("example.dev/v1".to_string()),
        kind: Some("Wait".to_string()),
        ..Default::default()
    });
    cluster.put_run(inline_run("r", PipelineSpec {
        tasks: vec![task],
        ..Default::default()
    }));

    let flags = Flags {
        enable_custom_tasks: true,
        ..Default::default()
    };
    let reconciler = Reconciler::new(cluster.clone(), FakeClock::new(), flags);
    reconciler.reconcile(&RunKey::new("ns", "r")).await.unwrap();

    let child = cluster.child("ns", "r-wait").expect("run child created");
    assert_eq!(child.kind(), ChildKind::Run);
    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert_eq!(stored.status.child_references[0].kind, ChildKind::Run);
}

#[tokio::test]
async fn referenced_task_definitions_come_from_the_store() {
    let cluster = FakeCluster::new();
    cluster.put_task(Task {
        meta: ObjectMeta::new("ns", "compile"),
        spec: echo_task(),
    });
    let spec = PipelineSpec {
        tasks: vec![PipelineTask::named("build").with_ref("compile")],
        ..Default::default()
    };
    cluster.put_run(inline_run("r", spec));

    reconciler(&cluster).reconcile(&RunKey::new("ns", "r")).await.unwrap();
    assert!(cluster.child("ns", "r-build").is_some());
}

#[tokio::test]
async fn missing_referenced_task_fails_with_couldnt_get_task() {
    let cluster = FakeCluster::new();
    let spec = PipelineSpec {
        tasks: vec![PipelineTask::named("build").with_ref("nowhere")],
        ..Default::default()
    };
    cluster.put_run(inline_run("r", spec));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::CouldntGetTask,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_referenced_pipeline_fails_with_couldnt_get_pipeline() {
    let cluster = FakeCluster::new();
    let mut run = PipelineRun::new("ns", "r");
    run.spec.pipeline_ref = Some(PipelineRef::named("nowhere"));
    cluster.put_run(run);

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::CouldntGetPipeline,
            ..
        }
    ));
}

#[tokio::test]
async fn status_write_conflicts_are_retried_without_reacting() {
    let cluster = FakeCluster::new();
    cluster.put_run(inline_run("r", single_task_spec()));
    cluster.fail_next(
        "update_status",
        StoreError::Conflict {
            kind: "PipelineRun",
            namespace: "ns".into(),
            name: "r".into(),
        },
    );

    reconciler(&cluster).reconcile(&RunKey::new("ns", "r")).await.unwrap();

    // The write landed on retry and the act phase ran exactly once
    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert_eq!(stored.condition().unwrap().reason, "Running");
    assert_eq!(cluster.all_children("ns").len(), 1);
}

#[tokio::test]
async fn transient_create_failure_requeues_and_keeps_partial_progress() {
    let cluster = FakeCluster::new();
    let spec = PipelineSpec {
        tasks: vec![
            PipelineTask::named("a").with_spec(echo_task()),
            PipelineTask::named("b").with_spec(echo_task()),
        ],
        ..Default::default()
    };
    cluster.put_run(inline_run("r", spec));
    cluster.fail_next("create", StoreError::Transient("server busy".into()));

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    // One create failed, the other landed and is referenced in status
    let children = cluster.all_children("ns");
    assert_eq!(children.len(), 1);
    let stored = cluster.run(&RunKey::new("ns", "r")).unwrap();
    assert_eq!(stored.status.child_references.len(), 1);

    // The next pass repairs the hole
    reconciler(&cluster).reconcile(&RunKey::new("ns", "r")).await.unwrap();
    assert_eq!(cluster.all_children("ns").len(), 2);
}

#[tokio::test]
async fn resolver_backed_pipeline_waits_then_proceeds() {
    let cluster = FakeCluster::new();
    let mut run = PipelineRun::new("ns", "r");
    run.spec.pipeline_ref = Some(PipelineRef {
        name: "remote".to_string(),
        resolver: Some(tern_core::pipeline::ResolverRef {
            resolver: "git".to_string(),
            params: vec![],
        }),
        ..Default::default()
    });
    cluster.put_run(run);

    let reconciler = reconciler(&cluster);
    let key = RunKey::new("ns", "r");

    // Pending across several passes stays non-terminal
    for _ in 0..3 {
        let outcome = reconciler.reconcile(&key).await.unwrap();
        assert!(matches!(outcome, Outcome::RequeueAfter(_)));
        let stored = cluster.run(&key).unwrap();
        assert_eq!(stored.condition().unwrap().reason, "ResolvingPipelineRef");
        assert!(!stored.is_done());
    }

    let bytes = serde_json::to_vec(&single_task_spec()).unwrap();
    cluster.resolution_done("ns", "r-pipeline", bytes);
    reconciler.reconcile(&key).await.unwrap();
    assert!(cluster.child("ns", "r-build").is_some());
}

#[tokio::test]
async fn resolver_failure_is_permanent() {
    let cluster = FakeCluster::new();
    let mut run = PipelineRun::new("ns", "r");
    run.spec.pipeline_ref = Some(PipelineRef {
        name: "remote".to_string(),
        resolver: Some(tern_core::pipeline::ResolverRef {
            resolver: "git".to_string(),
            params: vec![],
        }),
        ..Default::default()
    });
    cluster.put_run(run);
    cluster.resolution_failed("ns", "r-pipeline", "ResolutionTimedOut");

    let err = reconciler(&cluster)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Permanent {
            reason: PipelineRunReason::CouldntGetPipeline,
            ..
        }
    ));
}

#[tokio::test]
async fn object_params_pass_under_alpha() {
    let cluster = FakeCluster::new();
    let mut spec = single_task_spec();
    spec.params.push(ParamDecl::object("conn", &["host"]));
    let mut run = inline_run("r", spec);
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("host".to_string(), "db".to_string());
    run.spec.params.push(Param::new(
        "conn",
        tern_core::param::ParamValue::Object(fields),
    ));
    cluster.put_run(run);

    let flags = Flags {
        enable_api_fields: ApiFields::Alpha,
        ..Default::default()
    };
    Reconciler::new(cluster.clone(), FakeClock::new(), flags)
        .reconcile(&RunKey::new("ns", "r"))
        .await
        .unwrap();
    assert!(cluster.child("ns", "r-build").is_some());
}
