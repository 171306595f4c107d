use serde_json::json;

use super::*;

fn store() -> ConfigStore {
    let store = ConfigStore::new();
    store.insert(
        "svc",
        json!({
            "timeout": 30,
            "ratio": 0.25,
            "verbose": true,
            "name": "billing",
            "limits": {"max": 10},
            "empty": null
        }),
    );
    store
}

#[test]
fn test_typed_accessors_read_nested_fields() {
    let store = store();
    assert_eq!(store.get_int("svc.timeout"), 30);
    assert_eq!(store.get_float("svc.ratio"), 0.25);
    assert!(store.get_bool("svc.verbose"));
    assert_eq!(store.get_string("svc.name"), "billing");
}

#[test]
fn test_float_accepts_integer_values() {
    assert_eq!(store().get_float("svc.timeout"), 30.0);
}

#[test]
fn test_get_string_renders_non_strings_as_json() {
    let store = store();
    assert_eq!(store.get_string("svc.timeout"), "30");
    assert_eq!(store.get_string("svc.verbose"), "true");
    assert_eq!(store.get_string("svc.limits"), r#"{"max":10}"#);
    assert_eq!(store.get_string("svc.empty"), "");
}

#[test]
fn test_malformed_paths_are_zero_values() {
    let store = store();
    for path in ["", ".", "svc.", ".timeout", "svc.limits.max", "a.b.c.d", "nope", "nope.timeout", "svc.nope"] {
        assert_eq!(store.get_int(path), 0, "path {:?}", path);
        assert_eq!(store.get_float(path), 0.0, "path {:?}", path);
        assert!(!store.get_bool(path), "path {:?}", path);
        assert_eq!(store.get_string(path), "", "path {:?}", path);
    }
}

#[test]
fn test_try_get_distinguishes_absent_from_zero() {
    let store = ConfigStore::new();
    store.insert("svc", json!({"retries": 0}));

    assert_eq!(store.try_get::<i64>("svc.retries"), Lookup::Present(0));
    assert_eq!(store.try_get::<i64>("svc.timeout"), Lookup::Absent);
    assert!(!store.try_get::<i64>("svc.retries.deep").is_present());
}

#[test]
fn test_type_mismatch_is_reported_and_collapses_to_zero() {
    let store = store();

    assert_eq!(store.try_get::<i64>("svc.name"), Lookup::Mismatch(json!("billing")));
    assert_eq!(store.get_int("svc.name"), 0);
    assert_eq!(store.get_int("svc.ratio"), 0);
    assert!(!store.get_bool("svc.timeout"));
}

#[test]
fn test_root_path_returns_whole_object() {
    let store = store();
    let limits: Lookup<serde_json::Map<String, serde_json::Value>> = store.try_get("svc");
    assert_eq!(limits.present().unwrap()["timeout"], json!(30));
}

#[test]
fn test_clones_observe_updates() {
    let store = store();
    let reader = store.clone();

    store.insert("svc", json!({"timeout": 60}));

    assert_eq!(reader.get_int("svc.timeout"), 60);
    assert_eq!(reader.keys(), vec!["svc".to_string()]);
}
