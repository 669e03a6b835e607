use super::*;
use yare::parameterized;

fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn defaults_are_stable_and_minimal() {
    let flags = Flags::default();
    assert_eq!(flags.enable_api_fields, ApiFields::Stable);
    assert_eq!(flags.embedded_status, EmbeddedStatus::Minimal);
    assert_eq!(flags.max_matrix_combinations, 256);
    assert_eq!(flags.default_timeout, Duration::from_secs(3600));
    assert!(!flags.matrix_allowed());
}

#[test]
fn from_map_parses_known_keys() {
    let flags = Flags::from_map(&map(&[
        ("enable-api-fields", "alpha"),
        ("enable-custom-tasks", "true"),
        ("embedded-status", "both"),
        ("default-max-matrix-combinations-count", "9"),
        ("default-timeout-minutes", "30"),
        ("default-service-account", "pipelines"),
    ]));
    assert_eq!(flags.enable_api_fields, ApiFields::Alpha);
    assert!(flags.enable_custom_tasks);
    assert_eq!(flags.embedded_status, EmbeddedStatus::Both);
    assert_eq!(flags.max_matrix_combinations, 9);
    assert_eq!(flags.default_timeout, Duration::from_secs(1800));
    assert_eq!(flags.default_service_account, "pipelines");
    assert!(flags.matrix_allowed());
    assert!(flags.object_params_allowed());
}

#[parameterized(
    bogus_api_fields = { "enable-api-fields", "experimental" },
    bogus_bool = { "enable-custom-tasks", "yes please" },
    bogus_count = { "default-max-matrix-combinations-count", "many" },
)]
fn unparsable_values_fall_back_to_defaults(key: &str, value: &str) {
    let flags = Flags::from_map(&map(&[(key, value)]));
    assert_eq!(flags, Flags::default());
}

#[test]
fn embedded_status_default_resolves_to_minimal() {
    let flags = Flags::from_map(&map(&[("embedded-status", "default")]));
    assert_eq!(flags.embedded_status, EmbeddedStatus::Minimal);
}

#[test]
fn embedded_status_projections() {
    assert!(EmbeddedStatus::Minimal.minimal() && !EmbeddedStatus::Minimal.full());
    assert!(!EmbeddedStatus::Full.minimal() && EmbeddedStatus::Full.full());
    assert!(EmbeddedStatus::Both.minimal() && EmbeddedStatus::Both.full());
}

#[test]
fn shared_flag_source_hands_out_snapshots() {
    let source = Arc::new(RwLock::new(Flags::default()));
    let before = source.snapshot();

    source.write().unwrap().enable_custom_tasks = true;
    let after = source.snapshot();

    assert!(!before.enable_custom_tasks);
    assert!(after.enable_custom_tasks);
}
