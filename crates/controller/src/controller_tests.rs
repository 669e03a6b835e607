use super::*;
use std::time::Duration;
use tern_core::clock::FakeClock;
use tern_core::pipeline::{PipelineSpec, PipelineTask};
use tern_core::pipelinerun::PipelineRun;
use tern_core::task::{Step, TaskSpec};
use tern_reconciler::Flags;
use tern_store::{FakeCluster, StoreError};
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tern_controller=debug,tern_reconciler=debug")
        .with_test_writer()
        .try_init();
}

fn seeded_cluster() -> FakeCluster {
    init_tracing();
    let cluster = FakeCluster::new();
    let spec = PipelineSpec {
        tasks: vec![
            PipelineTask::named("a").with_spec(TaskSpec {
                steps: vec![Step {
                    name: "run".to_string(),
                    image: "busybox".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        ],
        ..Default::default()
    };
    let mut run = PipelineRun::new("ns", "r");
    run.spec.pipeline_spec = Some(spec);
    cluster.put_run(run);
    cluster
}

fn controller(cluster: &FakeCluster) -> Controller<FakeCluster, FakeClock, Flags> {
    let reconciler = Reconciler::new(cluster.clone(), FakeClock::new(), Flags::default());
    Controller::new(reconciler, ControllerConfig { workers: 2 })
}

async fn wait_for(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn controller_drives_a_run_to_completion() {
    let cluster = seeded_cluster();
    let controller = std::sync::Arc::new(controller(&cluster));
    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let key = tern_core::meta::RunKey::new("ns", "r");
    controller.enqueue(key.clone());
    wait_for(|| cluster.child("ns", "r-a").is_some()).await;

    // The fake cluster stands in for the child controller, then the
    // watch (us) re-enqueues the key
    cluster.complete_child("ns", "r-a", &[]);
    controller.enqueue(key.clone());
    wait_for(|| cluster.run(&key).is_some_and(|r| r.is_done())).await;

    controller.shutdown();
    running.await.unwrap();
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let cluster = seeded_cluster();
    cluster.fail_next("create", StoreError::Transient("server busy".into()));

    let controller = std::sync::Arc::new(controller(&cluster));
    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    controller.enqueue(tern_core::meta::RunKey::new("ns", "r"));
    // The first pass fails on create; the backoff retry repairs it
    wait_for(|| cluster.child("ns", "r-a").is_some()).await;

    controller.shutdown();
    running.await.unwrap();
}

#[tokio::test]
async fn permanent_failures_stop_the_key() {
    let cluster = FakeCluster::new();
    // Neither a pipelineRef nor an inline spec
    cluster.put_run(PipelineRun::new("ns", "broken"));

    let controller = std::sync::Arc::new(controller(&cluster));
    let running = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run().await })
    };

    let key = tern_core::meta::RunKey::new("ns", "broken");
    controller.enqueue(key.clone());
    wait_for(|| cluster.run(&key).is_some_and(|r| r.is_done())).await;

    let stored = cluster.run(&key).unwrap();
    assert_eq!(stored.condition().unwrap().reason, "CouldntGetPipeline");

    controller.shutdown();
    running.await.unwrap();
}
