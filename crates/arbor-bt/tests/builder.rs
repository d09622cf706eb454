use std::io::Write;

use arbor_bt::{
    BuildError, BuildOptions, NodeDefinition, Registry, RegistryError, StructuralError,
    TreeBuilder, TreeDefinition,
};

fn build(def: &TreeDefinition) -> Result<arbor_bt::BehaviorTree, BuildError> {
    TreeBuilder::new(&Registry::builtin()).build(def)
}

fn structural(err: BuildError) -> StructuralError {
    match err {
        BuildError::Structural(err) => err,
        other => panic!("expected a structural error, got {other}"),
    }
}

fn nested_inverters(levels: usize) -> NodeDefinition {
    let mut node = NodeDefinition::new("Success");
    for _ in 0..levels {
        node = NodeDefinition::new("Inverter").with_child(node);
    }
    node
}

#[test]
fn self_referencing_subtree_is_a_cycle() {
    let def = TreeDefinition::new("loop", NodeDefinition::reference("again")).with_subtree(
        "again",
        NodeDefinition::new("Sequence").with_child(NodeDefinition::reference("again")),
    );

    let err = structural(build(&def).unwrap_err());
    assert_eq!(
        err,
        StructuralError::CircularReference {
            cycle: vec!["again".into(), "again".into()]
        }
    );
}

#[test]
fn mutual_references_are_a_cycle() {
    let def = TreeDefinition::new("loop", NodeDefinition::reference("a"))
        .with_subtree("a", NodeDefinition::new("Inverter").with_child(NodeDefinition::reference("b")))
        .with_subtree("b", NodeDefinition::new("Inverter").with_child(NodeDefinition::reference("a")));

    assert!(matches!(
        structural(build(&def).unwrap_err()),
        StructuralError::CircularReference { .. }
    ));
}

#[test]
fn depth_limit_counts_the_root_as_one() {
    // 99 decorators + 1 leaf = depth 100.
    build(&TreeDefinition::new("deep", nested_inverters(99))).unwrap();

    let err = structural(build(&TreeDefinition::new("deeper", nested_inverters(100))).unwrap_err());
    assert!(matches!(err, StructuralError::DepthExceeded { max_depth: 100, .. }));

    let registry = Registry::builtin();
    let shallow = TreeBuilder::new(&registry).with_options(BuildOptions {
        max_depth: 3,
        ..BuildOptions::default()
    });
    assert!(shallow.build(&TreeDefinition::new("t", nested_inverters(2))).is_ok());
    assert!(shallow.build(&TreeDefinition::new("t", nested_inverters(3))).is_err());
}

#[test]
fn repeated_references_cannot_blow_up_the_tree() {
    // Each level references the next one twice: 2^31 nodes if fully expanded.
    let mut def = TreeDefinition::new("fanout", NodeDefinition::reference("level0"));
    for level in 0..30 {
        let next = format!("level{}", level + 1);
        def = def.with_subtree(
            format!("level{level}"),
            NodeDefinition::new("Sequence").with_children([
                NodeDefinition::reference(next.clone()),
                NodeDefinition::reference(next),
            ]),
        );
    }
    def = def.with_subtree("level30", NodeDefinition::new("Success"));

    let err = structural(build(&def).unwrap_err());
    assert!(matches!(err, StructuralError::TooManyNodes { max_nodes: 100_000, .. }));
}

#[test]
fn node_limit_counts_every_resolved_node() {
    let registry = Registry::builtin();
    let capped = TreeBuilder::new(&registry).with_options(BuildOptions {
        max_nodes: 3,
        ..BuildOptions::default()
    });
    let pair = NodeDefinition::new("Sequence")
        .with_children([NodeDefinition::new("Success"), NodeDefinition::new("Success")]);
    assert_eq!(capped.build(&TreeDefinition::new("t", pair.clone())).unwrap().len(), 3);

    let triple = pair.with_child(NodeDefinition::new("Failure"));
    assert!(matches!(
        structural(capped.build(&TreeDefinition::new("t", triple)).unwrap_err()),
        StructuralError::TooManyNodes { max_nodes: 3, .. }
    ));
}

#[test]
fn very_deep_definitions_fail_cleanly() {
    let err = structural(build(&TreeDefinition::new("abuse", nested_inverters(1_000))).unwrap_err());
    assert!(matches!(err, StructuralError::DepthExceeded { .. }));
}

#[test]
fn structural_errors_name_the_offending_node() {
    let unknown = TreeDefinition::new("t", NodeDefinition::new("Teleport"));
    assert!(matches!(
        structural(build(&unknown).unwrap_err()),
        StructuralError::UnknownNodeType { node_type, .. } if node_type == "Teleport"
    ));

    let missing_ref = TreeDefinition::new("t", NodeDefinition::reference("nowhere"));
    assert!(matches!(
        structural(build(&missing_ref).unwrap_err()),
        StructuralError::UnknownSubtree { name, .. } if name == "nowhere"
    ));

    let crowded = TreeDefinition::new(
        "t",
        NodeDefinition::new("Inverter")
            .with_id("inv")
            .with_children([NodeDefinition::new("Success"), NodeDefinition::new("Failure")]),
    );
    assert!(matches!(
        structural(build(&crowded).unwrap_err()),
        StructuralError::ChildCount { node_id, found: 2, .. } if node_id == "inv"
    ));

    let lonely_parallel = TreeDefinition::new(
        "t",
        NodeDefinition::new("Parallel").with_child(NodeDefinition::new("Success")),
    );
    assert!(matches!(
        structural(build(&lonely_parallel).unwrap_err()),
        StructuralError::ChildCount { .. }
    ));

    let duplicate = TreeDefinition::new(
        "t",
        NodeDefinition::new("Sequence").with_children([
            NodeDefinition::new("Success").with_id("same"),
            NodeDefinition::new("Failure").with_id("same"),
        ]),
    );
    assert!(matches!(
        structural(build(&duplicate).unwrap_err()),
        StructuralError::DuplicateNodeId { node_id, .. } if node_id == "same"
    ));
}

#[test]
fn bad_parameters_are_configuration_errors() {
    let cases = [
        NodeDefinition::new("Timeout").with_child(NodeDefinition::new("Running")),
        NodeDefinition::new("Timeout")
            .with_config("duration", -1.0)
            .with_child(NodeDefinition::new("Running")),
        NodeDefinition::new("Counter").with_config("target", "ten"),
        NodeDefinition::new("Repeat")
            .with_config("num_success", 0)
            .with_child(NodeDefinition::new("Success")),
        NodeDefinition::new("TickCounter")
            .with_config("duration", 3)
            .with_config("completion_status", "RUNNING"),
    ];
    for root in cases {
        let node_type = root.node_type.clone();
        let err = build(&TreeDefinition::new("t", root)).unwrap_err();
        assert!(
            matches!(err, BuildError::Configuration(_)),
            "{node_type}: expected configuration error, got {err}"
        );
    }
}

#[test]
fn unsupported_schema_version_is_rejected() {
    let mut def = TreeDefinition::new("t", NodeDefinition::new("Success"));
    def.schema_version = "2.0".into();
    assert!(matches!(
        structural(build(&def).unwrap_err()),
        StructuralError::UnsupportedSchemaVersion { .. }
    ));
}

#[test]
fn references_keep_the_referencing_identity() {
    let dock = NodeDefinition::new("Sequence").with_children([
        NodeDefinition::new("Success").with_id("approach"),
        NodeDefinition::new("Success").with_id("latch"),
    ]);
    let def = TreeDefinition::new(
        "docking",
        NodeDefinition::new("Sequence").with_id("root").with_children([
            NodeDefinition::reference("dock").with_id("left").with_name("Left dock"),
            NodeDefinition::reference("dock").with_id("right"),
        ]),
    )
    .with_subtree("dock", dock);

    let tree = build(&def).unwrap();
    assert_eq!(tree.len(), 7);
    assert_eq!(tree.node("left").unwrap().name(), "Left dock");
    assert_eq!(tree.path_of("right/latch"), Some(&[1, 1][..]));
    assert_eq!(tree.id_at(&[0, 0]), Some("left/approach"));
    assert_eq!(tree.id_at(&[]), Some("root"));
    assert!(tree.node("approach").is_none());
}

#[test]
fn definition_round_trips_through_the_built_tree() {
    let def = TreeDefinition::new(
        "patrol",
        NodeDefinition::new("Selector").with_config("memory", false).with_children([
            NodeDefinition::new("EternalGuard")
                .with_config("key", "/battery")
                .with_config("operator", "<")
                .with_config("value", 20)
                .with_child(NodeDefinition::reference("recharge")),
            NodeDefinition::new("Parallel")
                .with_config("policy", "SuccessOnOne")
                .with_children([
                    NodeDefinition::new("Timeout")
                        .with_config("duration", 2.5)
                        .with_child(NodeDefinition::new("Running")),
                    NodeDefinition::new("Repeat")
                        .with_config("num_success", -1)
                        .with_child(NodeDefinition::new("Counter").with_config("target", 4)),
                ]),
        ]),
    )
    .with_subtree(
        "recharge",
        NodeDefinition::new("SetBlackboardVariable")
            .with_config("key", "/battery")
            .with_config("value", 100),
    );

    let tree = build(&def).unwrap();
    let exported = tree.to_definition();
    assert!(exported.subtrees.is_empty());

    let json = exported.to_json_pretty().unwrap();
    let reparsed = TreeDefinition::from_json_str(&json).unwrap();
    let rebuilt = build(&reparsed).unwrap();

    assert_eq!(rebuilt.to_definition(), exported);
    let shape = |t: &arbor_bt::BehaviorTree| {
        t.iter()
            .map(|n| (n.id().to_string(), n.node_type().to_string(), n.name().to_string()))
            .collect::<Vec<_>>()
    };
    assert_eq!(shape(&rebuilt), shape(&tree));
}

#[test]
fn yaml_files_load_by_extension() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
schema_version: "1.2"
tree_id: greeter
metadata:
  name: Greeter
  tags: [demo]
root:
  node_type: Sequence
  children:
    - node_type: SetBlackboardVariable
      config: {{ key: /greeting, value: hello }}
    - node_type: Success
blackboard_schema:
  /greeting:
    type: string
"#
    )
    .unwrap();

    let def = TreeDefinition::load(file.path()).unwrap();
    assert_eq!(def.metadata.tags, vec!["demo".to_string()]);
    let tree = build(&def).unwrap();
    assert_eq!(tree.len(), 3);
    assert!(tree.blackboard_schema().contains_key("/greeting"));
}

#[test]
fn duplicate_registrations_are_rejected() {
    let mut registry = Registry::builtin();
    let err = registry
        .register_action("Sequence", Vec::new(), |_| Ok(Noop))
        .unwrap_err();
    assert_eq!(err, RegistryError::Duplicate("Sequence".into()));

    registry.register_action("Noop", Vec::new(), |_| Ok(Noop)).unwrap();
    assert!(registry.get_schema("Noop").is_some());
    assert!(registry.get_implementation("Noop").is_some());
    assert!(registry.register_action("Noop", Vec::new(), |_| Ok(Noop)).is_err());
}

struct Noop;

impl arbor_bt::Action for Noop {
    fn update(
        &mut self,
        _ctx: &arbor_core::TickContext,
        _bb: &mut arbor_core::BlackboardClient<'_>,
    ) -> anyhow::Result<arbor_core::Status> {
        Ok(arbor_core::Status::Success)
    }
}
