use super::*;

#[test]
fn run_key_round_trips_through_display_and_parse() {
    let key = RunKey::new("builds", "release-42");
    assert_eq!(key.to_string(), "builds/release-42");
    assert_eq!("builds/release-42".parse::<RunKey>().unwrap(), key);
}

#[test]
fn run_key_parse_rejects_malformed_input() {
    assert!("no-slash".parse::<RunKey>().is_err());
    assert!("/name".parse::<RunKey>().is_err());
    assert!("ns/".parse::<RunKey>().is_err());
    assert!("a/b/c".parse::<RunKey>().is_err());
}

#[test]
fn controlled_by_matches_on_uid_and_controller_flag() {
    let mut owner = ObjectMeta::new("ns", "parent");
    owner.uid = "uid-1".to_string();

    let mut child = ObjectMeta::new("ns", "child");
    child
        .owner_references
        .push(OwnerReference::controller("PipelineRun", &owner));

    assert!(child.controlled_by(&owner));

    let mut stranger = ObjectMeta::new("ns", "other");
    stranger.uid = "uid-2".to_string();
    assert!(!child.controlled_by(&stranger));
}

#[test]
fn meta_serializes_without_empty_fields() {
    let meta = ObjectMeta::new("ns", "obj");
    let json = serde_json::to_value(&meta).unwrap();
    assert!(json.get("labels").is_none());
    assert!(json.get("resourceVersion").is_none());
    assert_eq!(json["name"], "obj");
}
