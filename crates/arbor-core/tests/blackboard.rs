use std::collections::BTreeMap;

use arbor_core::{Access, Blackboard, BlackboardError, Value, VariableSchema, VariableType};

#[test]
fn blackboard_set_get_unset_roundtrip() {
    let mut bb = Blackboard::new();
    let writer = bb.register_client("writer");
    bb.register_key(&writer, "/robot/speed", Access::Write).unwrap();

    assert_eq!(bb.get(&writer, "robot/speed").unwrap(), None);
    assert!(bb.set(&writer, "robot/speed", Value::Float(1.5), true).unwrap());
    assert_eq!(bb.get(&writer, "/robot/speed").unwrap(), Some(&Value::Float(1.5)));
    assert_eq!(bb.last_writer("/robot/speed"), Some("writer"));

    assert!(bb.unset(&writer, "/robot/speed").unwrap());
    assert_eq!(bb.value("/robot/speed"), None);
}

#[test]
fn overwrite_false_keeps_existing_value() {
    let mut bb = Blackboard::new();
    let client = bb.register_client("setter");
    bb.register_key(&client, "mode", Access::Write).unwrap();

    assert!(bb.set(&client, "mode", "patrol".into(), false).unwrap());
    assert!(!bb.set(&client, "mode", "idle".into(), false).unwrap());
    assert_eq!(bb.value("mode"), Some(&Value::from("patrol")));
}

#[test]
fn read_only_clients_cannot_write() {
    let mut bb = Blackboard::new();
    let reader = bb.register_client("reader");
    bb.register_key(&reader, "/target", Access::Read).unwrap();

    let err = bb.set(&reader, "/target", Value::Int(1), true).unwrap_err();
    assert_eq!(
        err,
        BlackboardError::AccessDenied {
            client: "reader".into(),
            key: "/target".into(),
            access: "write",
        }
    );

    // Keys that were never registered are not readable either.
    assert!(bb.get(&reader, "/other").is_err());
}

#[test]
fn exclusive_write_rejects_second_writer() {
    let mut bb = Blackboard::new();
    let a = bb.register_client("a");
    let b = bb.register_client("b");
    bb.register_key(&a, "/lock", Access::ExclusiveWrite).unwrap();

    assert!(matches!(
        bb.register_key(&b, "/lock", Access::Write),
        Err(BlackboardError::ExclusiveWriteHeld { .. })
    ));
    bb.register_key(&b, "/lock", Access::Read).unwrap();

    let info = bb.key_access("lock");
    assert_eq!(info.readers, vec!["b".to_string()]);
    assert_eq!(info.exclusive_writer.as_deref(), Some("a"));
}

#[test]
fn tokens_are_bound_to_their_blackboard() {
    let mut first = Blackboard::new();
    let mut second = Blackboard::new();
    let token = first.register_client("node");
    first.register_key(&token, "/x", Access::Write).unwrap();

    assert!(matches!(
        second.set(&token, "/x", Value::Int(1), true),
        Err(BlackboardError::ForeignClient { .. })
    ));
    assert!(first.unregister_client(&token));
    assert!(matches!(
        first.get(&token, "/x"),
        Err(BlackboardError::UnknownClient { .. })
    ));
}

#[test]
fn schema_seeds_defaults_and_validates_writes() {
    let mut schema = BTreeMap::new();
    schema.insert(
        "battery".to_string(),
        VariableSchema {
            default: Some(Value::Int(100)),
            min: Some(0.0),
            max: Some(100.0),
            ..VariableSchema::new(VariableType::Int)
        },
    );
    schema.insert(
        "waypoints".to_string(),
        VariableSchema {
            items: Some(VariableType::String),
            ..VariableSchema::new(VariableType::Array)
        },
    );

    let mut bb = Blackboard::with_schema(&schema).unwrap();
    assert_eq!(bb.value("/battery"), Some(&Value::Int(100)));

    assert!(matches!(
        bb.write("battery", Value::Int(101)),
        Err(BlackboardError::SchemaViolation { .. })
    ));
    assert!(matches!(
        bb.write("battery", Value::Float(50.0)),
        Err(BlackboardError::SchemaViolation { .. })
    ));
    assert!(matches!(
        bb.write("waypoints", Value::Array(vec![Value::from("a"), Value::Int(2)])),
        Err(BlackboardError::SchemaViolation { .. })
    ));
    bb.write("waypoints", Value::Array(vec![Value::from("a")])).unwrap();
    // Unknown keys are not constrained.
    bb.write("free", Value::Bool(true)).unwrap();
}

#[test]
fn invalid_keys_are_rejected() {
    let mut bb = Blackboard::new();
    assert!(matches!(
        bb.write("  ", Value::Int(1)),
        Err(BlackboardError::InvalidKey { .. })
    ));
    assert!(matches!(
        bb.write("/has space", Value::Int(1)),
        Err(BlackboardError::InvalidKey { .. })
    ));
}
