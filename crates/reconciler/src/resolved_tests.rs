use super::*;
use crate::graph;
use tern_core::child::{TaskRun, TASK_RUN_CANCELLED};
use tern_core::condition::Condition;
use tern_core::labels;
use tern_core::meta::ObjectMeta;
use tern_core::param::Param;
use tern_core::param::ParamValue;
use tern_core::pipeline::Matrix;

fn child(name: &str, task: &str, index: Option<usize>) -> Child {
    let mut meta = ObjectMeta::new("ns", name);
    meta.labels
        .insert(labels::PIPELINE_TASK.to_string(), task.to_string());
    if let Some(i) = index {
        meta.labels
            .insert(labels::MATRIX_INDEX.to_string(), i.to_string());
    }
    Child::TaskRun(TaskRun {
        meta,
        ..Default::default()
    })
}

fn succeeded(mut c: Child, results: &[(&str, &str)]) -> Child {
    let status = c.status_mut();
    status.results = results
        .iter()
        .map(|(n, v)| tern_core::child::ChildResult {
            name: n.to_string(),
            value: ParamValue::String(v.to_string()),
        })
        .collect();
    status.set_condition(Condition::succeeded("Succeeded", ""));
    c
}

fn failed(mut c: Child, attempts: u32) -> Child {
    for _ in 0..attempts {
        c.status_mut().retries_status.push(Default::default());
    }
    c.status_mut().set_condition(Condition::failed("Failed", "boom"));
    c
}

fn state(tasks: Vec<PipelineTask>) -> RunState {
    let g = graph::Graph::build(&tasks).unwrap();
    let spec = PipelineSpec {
        tasks,
        ..Default::default()
    };
    RunState::new(&spec, g, |_| Some(TaskSpec::default()))
}

#[test]
fn task_without_children_is_not_created() {
    let state = state(vec![PipelineTask::named("a").with_ref("t")]);
    assert_eq!(state.tasks[0].child_disposition(), Disposition::NotCreated);
}

#[test]
fn association_matches_on_pipeline_task_label() {
    let mut state = state(vec![
        PipelineTask::named("a").with_ref("t"),
        PipelineTask::named("b").with_ref("t"),
    ]);
    state.associate_children(vec![
        child("r-b", "b", None),
        child("r-a", "a", None),
        child("stray", "ghost", None),
    ]);
    assert_eq!(state.get("a").unwrap().children.len(), 1);
    assert_eq!(state.get("b").unwrap().children.len(), 1);
}

#[test]
fn successful_single_child_settles_the_task() {
    let mut state = state(vec![PipelineTask::named("a").with_ref("t")]);
    state.associate_children(vec![succeeded(child("r-a", "a", None), &[("out", "1")])]);

    let task = state.get("a").unwrap();
    assert_eq!(task.child_disposition(), Disposition::Succeeded);
    let results = task.results().unwrap();
    assert_eq!(results["out"], ParamValue::String("1".to_string()));
}

#[test]
fn failure_with_retry_budget_left_counts_as_running() {
    let mut task = PipelineTask::named("a").with_ref("t");
    task.retries = 2;
    let mut state = state(vec![task]);
    state.associate_children(vec![failed(child("r-a", "a", None), 0)]);

    let task = state.get("a").unwrap();
    assert_eq!(task.child_disposition(), Disposition::Running);
    assert_eq!(task.children_needing_retry().len(), 1);
}

#[test]
fn exhausted_retries_finalize_the_failure() {
    let mut task = PipelineTask::named("a").with_ref("t");
    task.retries = 2;
    let mut state = state(vec![task]);
    // Third failure: two archived attempts plus the live one
    state.associate_children(vec![failed(child("r-a", "a", None), 2)]);

    let task = state.get("a").unwrap();
    assert_eq!(task.child_disposition(), Disposition::Failed);
    assert!(task.children_needing_retry().is_empty());
}

#[test]
fn cancelled_child_is_cancelled_not_failed_and_never_retried() {
    let mut task = PipelineTask::named("a").with_ref("t");
    task.retries = 3;
    let mut state = state(vec![task]);
    let mut c = child("r-a", "a", None);
    c.status_mut()
        .set_condition(Condition::failed(TASK_RUN_CANCELLED, "cancelled"));
    state.associate_children(vec![c]);

    let task = state.get("a").unwrap();
    assert_eq!(task.child_disposition(), Disposition::Cancelled);
    assert!(task.children_needing_retry().is_empty());
}

#[test]
fn matrix_task_waits_for_the_full_child_set() {
    let mut task = PipelineTask::named("m").with_ref("t");
    task.matrix = Some(Matrix {
        params: vec![Param::new("p", ParamValue::Array(vec!["a".into(), "b".into(), "c".into()]))],
    });
    let mut state = state(vec![task]);
    state.associate_children(vec![
        succeeded(child("r-m-0", "m", Some(0)), &[]),
        succeeded(child("r-m-1", "m", Some(1)), &[]),
    ]);
    state.get_mut("m").unwrap().expected_children = Some(3);

    let task = state.get("m").unwrap();
    assert_eq!(task.child_disposition(), Disposition::Running);

    let mut state2 = state.clone();
    state2
        .get_mut("m")
        .unwrap()
        .children
        .push(succeeded(child("r-m-2", "m", Some(2)), &[]));
    assert_eq!(state2.get("m").unwrap().child_disposition(), Disposition::Succeeded);
    // Matrixed tasks expose no results
    assert!(state2.get("m").unwrap().results().is_none());
}

#[test]
fn children_sort_by_matrix_index_on_association() {
    let mut task = PipelineTask::named("m").with_ref("t");
    task.matrix = Some(Matrix {
        params: vec![Param::new("p", ParamValue::Array(vec!["a".into(), "b".into(), "c".into()]))],
    });
    let mut state = state(vec![task]);
    state.associate_children(vec![
        child("r-m-2", "m", Some(2)),
        child("r-m-0", "m", Some(0)),
        child("r-m-1", "m", Some(1)),
    ]);
    let names: Vec<&str> = state.get("m").unwrap().children.iter().map(Child::name).collect();
    assert_eq!(names, vec!["r-m-0", "r-m-1", "r-m-2"]);
}

#[test]
fn disposition_status_values() {
    assert_eq!(Disposition::Succeeded.status_value(), "Succeeded");
    assert_eq!(Disposition::Failed.status_value(), "Failed");
    assert_eq!(Disposition::Cancelled.status_value(), "Failed");
    assert_eq!(
        Disposition::Skipped(tern_core::pipelinerun::SkipReason::WhenExpressionsSkip).status_value(),
        "None"
    );
    assert_eq!(Disposition::NotCreated.status_value(), "None");
}

#[test]
fn known_results_cover_only_settled_single_tasks() {
    let mut state = state(vec![
        PipelineTask::named("a").with_ref("t"),
        PipelineTask::named("b").with_ref("t"),
    ]);
    state.associate_children(vec![
        succeeded(child("r-a", "a", None), &[("digest", "sha256:abc")]),
        child("r-b", "b", None),
    ]);

    let known = state.known_results();
    assert!(known.contains_key("a"));
    assert!(!known.contains_key("b"));
}
