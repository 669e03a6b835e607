use super::*;
use crate::condition::{Condition, ConditionStatus};

fn task_run_with(condition: Option<Condition>) -> Child {
    let mut tr = TaskRun {
        meta: ObjectMeta::new("ns", "run-build"),
        ..Default::default()
    };
    if let Some(c) = condition {
        tr.status.set_condition(c);
    }
    Child::TaskRun(tr)
}

#[test]
fn child_without_condition_is_not_done() {
    let child = task_run_with(None);
    assert!(!child.is_done());
    assert!(!child.is_successful());
    assert!(!child.is_failure());
}

#[test]
fn succeeded_child_is_done_and_successful() {
    let child = task_run_with(Some(Condition::succeeded("Succeeded", "")));
    assert!(child.is_done());
    assert!(child.is_successful());
    assert!(!child.is_failure());
}

#[test]
fn cancelled_child_is_done_but_not_a_failure() {
    let child = task_run_with(Some(Condition::failed(TASK_RUN_CANCELLED, "cancelled")));
    assert!(child.is_done());
    assert!(child.is_cancelled());
    assert!(!child.is_failure());
}

#[test]
fn failed_child_is_a_failure() {
    let child = task_run_with(Some(Condition::failed("Failed", "step exited 1")));
    assert!(child.is_failure());
    assert!(!child.is_cancelled());
}

#[test]
fn attempts_counts_archived_retries() {
    let mut status = ChildStatus::default();
    assert_eq!(status.attempts(), 0);
    status.retries_status.push(ChildStatus::default());
    status.retries_status.push(ChildStatus::default());
    assert_eq!(status.attempts(), 2);
}

#[test]
fn matrix_index_defaults_to_zero_without_label() {
    let child = task_run_with(None);
    assert_eq!(child.matrix_index(), 0);

    let mut labelled = task_run_with(None);
    labelled
        .meta_mut()
        .labels
        .insert(crate::labels::MATRIX_INDEX.to_string(), "4".to_string());
    assert_eq!(labelled.matrix_index(), 4);
}

#[test]
fn child_serializes_with_kind_tag() {
    let child = task_run_with(None);
    let json = serde_json::to_value(&child).unwrap();
    assert_eq!(json["kind"], "TaskRun");

    let back: Child = serde_json::from_value(json).unwrap();
    assert_eq!(back.kind(), ChildKind::TaskRun);
}

#[test]
fn run_cancel_request_round_trips() {
    let mut run = Run {
        meta: ObjectMeta::new("ns", "run-wait"),
        ..Default::default()
    };
    run.spec.status = Some(CancelRequest::RunCancelled);
    let child = Child::Run(run);
    assert!(child.cancel_requested());

    let json = serde_json::to_value(&child).unwrap();
    assert_eq!(json["spec"]["status"], "RunCancelled");

    let cond = Condition {
        status: ConditionStatus::False,
        reason: RUN_CANCELLED.to_string(),
        message: String::new(),
        last_transition_time: None,
    };
    let mut cancelled = child.clone();
    cancelled.status_mut().set_condition(cond);
    assert!(cancelled.is_cancelled());
}
