use super::*;

fn two_task_spec() -> PipelineSpec {
    PipelineSpec {
        tasks: vec![
            PipelineTask::named("build").with_ref("compile"),
            PipelineTask::named("test").with_ref("unit").run_after(&["build"]),
        ],
        finally: vec![PipelineTask::named("report").with_ref("notify")],
        ..Default::default()
    }
}

#[test]
fn valid_spec_passes_structural_validation() {
    assert!(two_task_spec().validate().is_ok());
}

#[test]
fn all_tasks_lists_dag_before_finally() {
    let spec = two_task_spec();
    let names: Vec<&str> = spec.all_tasks().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["build", "test", "report"]);
    assert!(spec.is_dag_task("build"));
    assert!(!spec.is_dag_task("report"));
}

#[test]
fn duplicate_task_names_are_rejected_across_subgraphs() {
    let mut spec = two_task_spec();
    spec.finally.push(PipelineTask::named("build").with_ref("x"));
    assert_eq!(
        spec.validate(),
        Err(SpecError::DuplicateTask {
            name: "build".to_string()
        })
    );
}

#[test]
fn task_needs_exactly_one_definition_source() {
    let mut spec = two_task_spec();
    spec.tasks.push(PipelineTask::named("floating"));
    assert_eq!(
        spec.validate(),
        Err(SpecError::NoDefinition {
            task: "floating".to_string()
        })
    );

    let mut spec = two_task_spec();
    spec.tasks[0].task_spec = Some(TaskSpec::default());
    assert_eq!(
        spec.validate(),
        Err(SpecError::AmbiguousDefinition {
            task: "build".to_string()
        })
    );
}

#[test]
fn run_after_must_point_at_dag_tasks() {
    let mut spec = two_task_spec();
    spec.tasks[1].run_after = vec!["report".to_string()];
    assert_eq!(
        spec.validate(),
        Err(SpecError::UnknownRunAfter {
            task: "test".to_string(),
            dep: "report".to_string()
        })
    );
}

#[test]
fn finally_tasks_cannot_declare_run_after() {
    let mut spec = two_task_spec();
    spec.finally[0].run_after = vec!["build".to_string()];
    assert_eq!(
        spec.validate(),
        Err(SpecError::RunAfterOnFinally {
            task: "report".to_string()
        })
    );
}

#[test]
fn custom_task_detection_uses_api_version() {
    let mut task = PipelineTask::named("wait");
    task.task_ref = Some(TaskRef {
        name: "waiter".to_string(),
        api_version: Some("example.dev/v1".to_string()),
        kind: Some("Wait".to_string()),
        ..Default::default()
    });
    assert!(task.is_custom());
    assert!(!PipelineTask::named("t").with_ref("x").is_custom());
}

#[test]
fn when_expression_serializes_operator_lowercase() {
    let when = WhenExpression::not_in("$(params.skip)", &["yes"]);
    let json = serde_json::to_value(&when).unwrap();
    assert_eq!(json["operator"], "notin");
}

#[test]
fn workspace_task_binding_defaults_to_own_name() {
    let binding = WorkspaceTaskBinding {
        name: "source".to_string(),
        ..Default::default()
    };
    assert_eq!(binding.pipeline_workspace(), "source");

    let mapped = WorkspaceTaskBinding {
        name: "out".to_string(),
        workspace: Some("shared".to_string()),
        ..Default::default()
    };
    assert_eq!(mapped.pipeline_workspace(), "shared");
}
