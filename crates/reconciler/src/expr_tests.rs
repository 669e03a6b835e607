use super::*;
use yare::parameterized;

fn ctx() -> ExprContext {
    let mut ctx = ExprContext {
        run_name: "release-1".to_string(),
        run_namespace: "ci".to_string(),
        run_uid: "uid-9".to_string(),
        pipeline_name: "release".to_string(),
        retries: 2,
        ..Default::default()
    };
    ctx.params
        .insert("version".to_string(), ParamValue::String("v0.33.0".to_string()));
    ctx.params.insert(
        "platforms".to_string(),
        ParamValue::Array(vec!["linux".to_string(), "mac".to_string()]),
    );
    let mut conn = BTreeMap::new();
    conn.insert("host".to_string(), "db".to_string());
    conn.insert("port".to_string(), "5432".to_string());
    ctx.params.insert("conn".to_string(), ParamValue::Object(conn));

    let mut build_results = BTreeMap::new();
    build_results.insert("digest".to_string(), ParamValue::String("sha256:abc".to_string()));
    ctx.results.insert("build".to_string(), build_results);
    ctx.statuses.insert("build".to_string(), "Succeeded".to_string());
    ctx.statuses.insert("lint".to_string(), "None".to_string());

    ctx.workspaces.insert(
        "source".to_string(),
        WorkspaceRef {
            bound: true,
            claim: Some("pvc-1".to_string()),
            volume: None,
        },
    );
    ctx
}

#[test]
fn plain_strings_pass_through() {
    let resolved = resolve_value(&ctx(), "no references here").unwrap();
    assert_eq!(resolved, ParamValue::String("no references here".to_string()));
}

#[parameterized(
    param = { "$(params.version)", "v0.33.0" },
    embedded = { "tag-$(params.version)-x", "tag-v0.33.0-x" },
    result = { "$(tasks.build.results.digest)", "sha256:abc" },
    status = { "$(tasks.build.status)", "Succeeded" },
    status_of_skipped = { "$(tasks.lint.status)", "None" },
    run_name = { "$(context.pipelineRun.name)", "release-1" },
    run_namespace = { "$(context.pipelineRun.namespace)", "ci" },
    run_uid = { "$(context.pipelineRun.uid)", "uid-9" },
    pipeline_name = { "$(context.pipeline.name)", "release" },
    retries = { "$(context.pipelineTask.retries)", "2" },
    object_key = { "$(params.conn.host)", "db" },
    workspace_bound = { "$(workspaces.source.bound)", "true" },
    workspace_claim = { "$(workspaces.source.claim)", "pvc-1" },
    workspace_path = { "$(workspaces.source.path)", "/workspace/source" },
    workspace_volume = { "$(workspaces.source.volume)", "pvc-1" },
)]
fn scalar_substitution(input: &str, expected: &str) {
    assert_eq!(resolve_string(&ctx(), input).unwrap(), expected);
}

#[test]
fn whole_string_array_reference_keeps_its_type() {
    let resolved = resolve_value(&ctx(), "$(params.platforms)").unwrap();
    assert_eq!(resolved.kind(), tern_core::param::ParamKind::Array);
}

#[test]
fn array_embedded_in_scalar_is_rejected() {
    let err = resolve_string(&ctx(), "prefix-$(params.platforms)").unwrap_err();
    assert!(matches!(err, ExprError::InvalidType { what: "array", .. }));
}

#[test]
fn star_reference_splices_into_array_position() {
    let param = Param::new(
        "oses",
        ParamValue::Array(vec!["$(params.platforms[*])".to_string(), "windows".to_string()]),
    );
    let resolved = resolve_param(&ctx(), &param).unwrap();
    assert_eq!(
        resolved.value,
        ParamValue::Array(vec![
            "linux".to_string(),
            "mac".to_string(),
            "windows".to_string()
        ])
    );
}

#[test]
fn star_on_non_array_is_rejected() {
    let err = resolve_value(&ctx(), "$(params.version[*])").unwrap_err();
    assert!(matches!(err, ExprError::InvalidType { .. }));
}

#[test]
fn object_params_substitute_field_wise() {
    let mut fields = BTreeMap::new();
    fields.insert("url".to_string(), "https://$(params.conn.host):$(params.conn.port)".to_string());
    let param = Param::new("target", ParamValue::Object(fields));

    let resolved = resolve_param(&ctx(), &param).unwrap();
    let ParamValue::Object(fields) = resolved.value else {
        panic!("expected object");
    };
    assert_eq!(fields["url"], "https://db:5432");
}

#[test]
fn missing_result_is_reported_as_such() {
    let err = resolve_string(&ctx(), "$(tasks.build.results.nope)").unwrap_err();
    assert!(err.is_missing_result());

    // A task that never completed has no results at all
    let err = resolve_string(&ctx(), "$(tasks.lint.results.report)").unwrap_err();
    assert!(err.is_missing_result());
}

#[test]
fn unknown_task_and_param_are_hard_errors() {
    assert!(matches!(
        resolve_string(&ctx(), "$(tasks.ghost.results.x)").unwrap_err(),
        ExprError::UnknownTask { .. }
    ));
    assert!(matches!(
        resolve_string(&ctx(), "$(params.ghost)").unwrap_err(),
        ExprError::UnknownParam { .. }
    ));
    assert!(matches!(
        resolve_string(&ctx(), "$(params.conn.missing)").unwrap_err(),
        ExprError::UnknownObjectKey { .. }
    ));
}

#[parameterized(
    unknown_head = { "$(widgets.foo)" },
    bad_segment = { "$(params.has space)" },
    trailing_dot = { "$(params.)" },
    unclosed = { "$(params.version" },
)]
fn unrecognized_content_stays_verbatim(input: &str) {
    let resolved = resolve_string(&ctx(), input).unwrap();
    assert_eq!(resolved, input);
}

#[test]
fn substitution_is_single_pass() {
    let mut ctx = ctx();
    ctx.params.insert(
        "indirect".to_string(),
        ParamValue::String("$(params.version)".to_string()),
    );
    // The substituted text contains a reference; it must not resolve again
    let resolved = resolve_string(&ctx, "$(params.indirect)").unwrap();
    assert_eq!(resolved, "$(params.version)");
}

#[test]
fn when_resolution_splices_array_values() {
    let when = WhenExpression::is_in("$(params.version)", &["$(params.platforms[*])", "v0.33.0"]);
    let resolved = resolve_when(&ctx(), &when).unwrap();
    assert_eq!(resolved.input, "v0.33.0");
    assert_eq!(resolved.values, vec!["linux", "mac", "v0.33.0"]);
}

#[test]
fn classification_groups_by_head() {
    let classified = classify_references([
        "$(params.version)",
        "$(tasks.build.results.digest)",
        "$(tasks.lint.status)",
        "$(context.pipelineRun.name)",
        "$(workspaces.source.claim)",
    ]);
    assert!(classified.params.contains("version"));
    assert!(classified
        .results
        .contains(&("build".to_string(), "digest".to_string())));
    assert!(classified.statuses.contains("lint"));
    assert!(classified.workspaces.contains("source"));
    assert!(classified.has_context);

    let tasks = classified.referenced_tasks();
    assert!(tasks.contains("build") && tasks.contains("lint"));
}
