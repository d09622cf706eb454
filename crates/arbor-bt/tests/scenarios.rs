use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arbor_bt::{
    Action, BehaviorTree, NodeDefinition, NodeKind, Registry, TickError, TreeBuilder,
    TreeDefinition,
};
use arbor_core::{Blackboard, BlackboardClient, Status, TickContext, Value};

/// Fails `failures` times, then succeeds forever.
struct Flaky {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Action for Flaky {
    fn update(&mut self, _ctx: &TickContext, _bb: &mut BlackboardClient<'_>) -> anyhow::Result<Status> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(if call < self.failures {
            Status::Failure
        } else {
            Status::Success
        })
    }
}

fn registry_with_flaky(calls: Arc<AtomicUsize>) -> Registry {
    let mut registry = Registry::builtin();
    registry
        .register_action("Flaky", Vec::new(), move |config| {
            let failures = config.get("failures").and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Flaky {
                failures: failures as usize,
                calls: calls.clone(),
            })
        })
        .unwrap();
    registry
}

fn build(registry: &Registry, root: NodeDefinition) -> (BehaviorTree, Blackboard) {
    let mut tree = TreeBuilder::new(registry)
        .build(&TreeDefinition::new("test", root))
        .unwrap();
    let mut bb = Blackboard::with_schema(tree.blackboard_schema()).unwrap();
    tree.attach(&mut bb).unwrap();
    (tree, bb)
}

/// Tick until the root leaves RUNNING or `limit` ticks pass. Returns the tick count used.
fn run(tree: &mut BehaviorTree, bb: &mut Blackboard, limit: u64) -> u64 {
    for tick in 1..=limit {
        let status = tree
            .tick(&TickContext::new(tick, Duration::ZERO), bb)
            .unwrap();
        if status.is_terminal() {
            return tick;
        }
    }
    limit
}

fn counts(tree: &BehaviorTree) -> Vec<u32> {
    tree.iter()
        .filter_map(|node| match node.kind() {
            NodeKind::Leaf(leaf) => leaf.count(),
            _ => None,
        })
        .collect()
}

fn three_counters(memory: bool) -> NodeDefinition {
    let counter = || NodeDefinition::new("Counter").with_config("target", 10);
    NodeDefinition::new("Sequence")
        .with_config("memory", memory)
        .with_children([counter(), counter(), counter()])
}

#[test]
fn committed_sequence_of_counters_takes_thirty_ticks() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(&registry, three_counters(true));

    assert_eq!(run(&mut tree, &mut bb, 50), 30);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(counts(&tree), vec![10, 10, 10]);
}

#[test]
fn reactive_sequence_skips_finished_children_without_reticking() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(&registry, three_counters(false));

    assert_eq!(run(&mut tree, &mut bb, 50), 30);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(counts(&tree), vec![10, 10, 10]);
}

#[test]
fn timeout_fails_once_duration_has_elapsed() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Timeout")
            .with_config("duration", 1.0)
            .with_child(NodeDefinition::new("Running")),
    );

    for step in 0..10u64 {
        let ctx = TickContext::new(step + 1, Duration::from_millis(step * 100));
        assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Running, "step {step}");
    }
    let ctx = TickContext::new(11, Duration::from_millis(1000));
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    assert!(tree.root().feedback().contains("timed out"));
    assert_eq!(tree.root().children()[0].status(), Status::Invalid);
}

#[test]
fn retry_recovers_from_transient_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_flaky(calls.clone());
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Retry")
            .with_config("num_failures", 3)
            .with_child(NodeDefinition::new("Flaky").with_config("failures", 2)),
    );

    assert_eq!(run(&mut tree, &mut bb, 10), 3);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn retry_gives_up_after_initial_attempt_plus_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_flaky(calls.clone());
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Retry")
            .with_config("num_failures", 3)
            .with_child(NodeDefinition::new("Flaky").with_config("failures", 1_000)),
    );

    assert_eq!(run(&mut tree, &mut bb, 10), 4);
    assert_eq!(tree.status(), Status::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn committed_sequence_does_not_retick_earlier_children() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_flaky(calls.clone());
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Sequence")
            .with_config("memory", true)
            .with_child(NodeDefinition::new("Flaky"))
            .with_child(NodeDefinition::new("Counter").with_config("target", 5)),
    );

    assert_eq!(run(&mut tree, &mut bb, 10), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn selector_falls_through_failures_in_one_tick() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Selector")
            .with_config("memory", false)
            .with_children([
                NodeDefinition::new("Failure"),
                NodeDefinition::new("Failure"),
                NodeDefinition::new("Success"),
            ]),
    );

    assert_eq!(run(&mut tree, &mut bb, 1), 1);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(tree.tip().node_type(), "Success");
}

#[test]
fn committed_selector_resumes_at_running_child_without_reticking_failures() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_flaky(calls.clone());
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Selector")
            .with_config("memory", true)
            .with_child(NodeDefinition::new("Flaky").with_config("failures", 1_000))
            .with_child(NodeDefinition::new("Counter").with_config("target", 3)),
    );

    assert_eq!(run(&mut tree, &mut bb, 10), 3);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(counts(&tree), vec![3]);
}

#[test]
fn reactive_selector_skips_failed_children_without_reticking() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Selector")
            .with_config("memory", false)
            .with_children([
                NodeDefinition::new("TickCounter")
                    .with_config("duration", 2)
                    .with_config("completion_status", "FAILURE"),
                NodeDefinition::new("Counter").with_config("target", 3),
            ]),
    );

    // Ticks 1-3 belong to the tick counter, ticks 4-6 to the counter.
    assert_eq!(run(&mut tree, &mut bb, 20), 6);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(tree.root().children()[0].status(), Status::Failure);
    assert_eq!(counts(&tree), vec![3, 3]);
}

#[test]
fn tip_follows_the_running_branch() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Sequence").with_children([
            NodeDefinition::new("Success"),
            NodeDefinition::new("Selector").with_children([
                NodeDefinition::new("Failure"),
                NodeDefinition::new("Running").with_name("patrol"),
            ]),
        ]),
    );

    tree.tick(&TickContext::new(1, Duration::ZERO), &mut bb).unwrap();
    assert_eq!(tree.status(), Status::Running);
    assert_eq!(tree.tip().name(), "patrol");
}

#[test]
fn parallel_success_on_all_halts_running_children_on_failure() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Parallel")
            .with_children([NodeDefinition::new("Running"), NodeDefinition::new("Failure")]),
    );

    assert_eq!(run(&mut tree, &mut bb, 3), 1);
    assert_eq!(tree.status(), Status::Failure);
    assert_eq!(tree.root().children()[0].status(), Status::Invalid);
}

#[test]
fn parallel_success_on_one_finishes_with_first_success() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Parallel")
            .with_config("policy", "SuccessOnOne")
            .with_children([
                NodeDefinition::new("Running"),
                NodeDefinition::new("Counter").with_config("target", 2),
            ]),
    );

    assert_eq!(run(&mut tree, &mut bb, 5), 2);
    assert_eq!(tree.status(), Status::Success);
}

#[test]
fn synchronised_parallel_does_not_retick_succeeded_children() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_flaky(calls.clone());
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Parallel")
            .with_config("synchronise", true)
            .with_children([
                NodeDefinition::new("Flaky"),
                NodeDefinition::new("Counter").with_config("target", 3),
            ]),
    );

    assert_eq!(run(&mut tree, &mut bb, 5), 3);
    assert_eq!(tree.status(), Status::Success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn one_shot_latches_result_across_activations() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("OneShot").with_child(NodeDefinition::new("SuccessEveryN").with_config("n", 2)),
    );

    let ctx = TickContext::new(1, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    assert_eq!(counts(&tree), vec![1]);
}

#[test]
fn repeat_runs_child_until_enough_successes() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Repeat")
            .with_config("num_success", 3)
            .with_child(NodeDefinition::new("Success")),
    );

    assert_eq!(run(&mut tree, &mut bb, 10), 3);
    assert_eq!(tree.status(), Status::Success);
}

#[test]
fn status_converters_and_inverter() {
    let registry = Registry::builtin();
    let cases = [
        ("Inverter", "Success", Status::Failure),
        ("Inverter", "Running", Status::Running),
        ("FailureIsSuccess", "Failure", Status::Success),
        ("RunningIsFailure", "Running", Status::Failure),
        ("SuccessIsRunning", "Success", Status::Running),
        ("SuccessIsFailure", "Failure", Status::Failure),
    ];
    for (decorator, leaf, expected) in cases {
        let (mut tree, mut bb) = build(
            &registry,
            NodeDefinition::new(decorator).with_child(NodeDefinition::new(leaf)),
        );
        let status = tree.tick(&TickContext::new(1, Duration::ZERO), &mut bb).unwrap();
        assert_eq!(status, expected, "{decorator}({leaf})");
    }
}

#[test]
fn blackboard_leaves_share_state_through_the_tree() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("Sequence").with_children([
            NodeDefinition::new("SetBlackboardVariable")
                .with_config("key", "/mission/target")
                .with_config("value", "dock"),
            NodeDefinition::new("CheckBlackboardVariableValue")
                .with_config("key", "mission/target")
                .with_config("operator", "==")
                .with_config("value", "dock"),
            NodeDefinition::new("SetBlackboardVariable")
                .with_config("key", "/mission/target")
                .with_config("value", "charger")
                .with_config("overwrite", false),
        ]),
    );

    let status = tree.tick(&TickContext::new(1, Duration::ZERO), &mut bb).unwrap();
    assert_eq!(status, Status::Failure);
    assert_eq!(bb.value("/mission/target"), Some(&Value::from("dock")));
    assert!(tree.tip().feedback().contains("already set"));
}

#[test]
fn wait_for_variable_runs_until_key_appears() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("WaitForBlackboardVariable").with_config("key", "/go"),
    );

    let ctx = TickContext::new(1, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Running);
    bb.write("/go", Value::Bool(true)).unwrap();
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Success);
}

#[test]
fn guard_with_missing_key_fails_instead_of_erroring() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("EternalGuard")
            .with_config("key", "/battery")
            .with_config("operator", ">")
            .with_config("value", 20)
            .with_child(NodeDefinition::new("Running")),
    );

    let ctx = TickContext::new(1, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    bb.write("/battery", Value::Int(80)).unwrap();
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Running);
    bb.write("/battery", Value::from("full")).unwrap();
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    assert_eq!(tree.root().children()[0].status(), Status::Invalid);
}

#[test]
fn unattached_tree_reports_detached_node() {
    let registry = Registry::builtin();
    let mut tree = TreeBuilder::new(&registry)
        .build(&TreeDefinition::new(
            "t",
            NodeDefinition::new("SetBlackboardVariable")
                .with_id("setter")
                .with_config("key", "/x")
                .with_config("value", 1),
        ))
        .unwrap();
    let mut bb = Blackboard::new();

    let err = tree
        .tick(&TickContext::new(1, Duration::ZERO), &mut bb)
        .unwrap_err();
    assert!(matches!(err, TickError::Detached { ref node_id } if node_id == "setter"));
}

#[test]
fn stop_resets_every_node_to_invalid() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(&registry, three_counters(true));
    run(&mut tree, &mut bb, 4);

    tree.reset();
    assert!(tree.iter().all(|node| node.status() == Status::Invalid));

    // A fresh run starts from the first counter again.
    assert_eq!(run(&mut tree, &mut bb, 50), 30);
}

#[test]
fn tip_stops_at_a_guard_that_blocks_its_child() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("EternalGuard")
            .with_id("guard")
            .with_config("key", "/flag")
            .with_config("operator", "==")
            .with_config("value", true)
            .with_child(NodeDefinition::new("Success").with_id("leaf")),
    );

    bb.write("/flag", Value::Bool(true)).unwrap();
    let ctx = TickContext::new(1, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Success);
    assert_eq!(tree.tip().id(), "leaf");

    bb.write("/flag", Value::Bool(false)).unwrap();
    let ctx = TickContext::new(2, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Failure);
    assert_eq!(tree.tip().id(), "guard");
    // The leaf was not ticked and still holds its old result.
    assert_eq!(tree.root().children()[0].status(), Status::Success);
}

#[test]
fn tip_stops_at_a_latched_one_shot() {
    let registry = Registry::builtin();
    let (mut tree, mut bb) = build(
        &registry,
        NodeDefinition::new("OneShot")
            .with_id("once")
            .with_child(NodeDefinition::new("Success").with_id("leaf")),
    );

    let ctx = TickContext::new(1, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Success);
    assert_eq!(tree.tip().id(), "leaf");

    let ctx = TickContext::new(2, Duration::ZERO);
    assert_eq!(tree.tick(&ctx, &mut bb).unwrap(), Status::Success);
    assert_eq!(tree.tip().id(), "once");
}
