use super::*;
use yare::parameterized;

#[test]
fn param_value_round_trips_untagged() {
    let string: ParamValue = serde_json::from_str("\"v1\"").unwrap();
    assert_eq!(string, ParamValue::String("v1".to_string()));

    let array: ParamValue = serde_json::from_str("[\"a\",\"b\"]").unwrap();
    assert_eq!(array.kind(), ParamKind::Array);

    let object: ParamValue = serde_json::from_str("{\"k\":\"v\"}").unwrap();
    assert_eq!(object.kind(), ParamKind::Object);
}

#[test]
fn missing_required_param_is_rejected() {
    let decls = vec![ParamDecl::string("url")];
    let err = validate_bindings(&decls, &[]).unwrap_err();
    assert_eq!(
        err,
        BindingError::Missing {
            name: "url".to_string()
        }
    );
}

#[test]
fn default_satisfies_missing_binding() {
    let decls = vec![ParamDecl::string("url").with_default("https://example.com")];
    assert!(validate_bindings(&decls, &[]).is_ok());
}

#[parameterized(
    string_as_array = { ParamDecl::string("p"), ParamValue::Array(vec!["a".into()]), ParamKind::String, ParamKind::Array },
    array_as_string = { ParamDecl::array("p"), ParamValue::String("a".into()), ParamKind::Array, ParamKind::String },
)]
fn type_mismatch_is_rejected(decl: ParamDecl, value: ParamValue, want: ParamKind, got: ParamKind) {
    let err = validate_bindings(&[decl], &[Param::new("p", value)]).unwrap_err();
    assert_eq!(
        err,
        BindingError::TypeMismatch {
            name: "p".to_string(),
            want,
            got
        }
    );
}

#[test]
fn object_param_must_supply_declared_keys() {
    let decls = vec![ParamDecl::object("conn", &["host", "port"])];
    let mut value = BTreeMap::new();
    value.insert("host".to_string(), "db".to_string());

    let err = validate_bindings(&decls, &[Param::new("conn", ParamValue::Object(value))]).unwrap_err();
    assert_eq!(
        err,
        BindingError::MissingKeys {
            name: "conn".to_string(),
            keys: vec!["port".to_string()],
        }
    );
}

#[test]
fn effective_params_prefer_explicit_bindings_over_defaults() {
    let decls = vec![
        ParamDecl::string("kept").with_default("default"),
        ParamDecl::string("overridden").with_default("default"),
    ];
    let params = vec![Param::new("overridden", "explicit")];

    let effective = effective_params(&decls, &params);
    assert_eq!(effective["kept"], ParamValue::String("default".to_string()));
    assert_eq!(
        effective["overridden"],
        ParamValue::String("explicit".to_string())
    );
}
