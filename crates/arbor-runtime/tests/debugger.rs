use arbor_bt::{NodeDefinition, Registry, TreeBuilder, TreeDefinition};
use arbor_core::{Status, Value};
use arbor_runtime::{
    DebugError, EventBus, EventKind, ExecutionInstance, PauseReason, RuntimeError, StepMode,
    TickOutcome, WatchCondition,
};
use tokio::sync::broadcast;

/// Two counters in a committed sequence: `first` runs ticks 1-3, `second` ticks 4-6.
fn two_counters() -> TreeDefinition {
    TreeDefinition::new(
        "counters",
        NodeDefinition::new("Sequence").with_id("root").with_children([
            NodeDefinition::new("Counter").with_id("first").with_config("target", 3),
            NodeDefinition::new("Counter").with_id("second").with_config("target", 3),
        ]),
    )
}

fn instance(def: &TreeDefinition, events: &EventBus) -> ExecutionInstance {
    let tree = TreeBuilder::new(&Registry::builtin()).build(def).unwrap();
    ExecutionInstance::new("exec-1", tree, events.clone()).unwrap()
}

fn ticked(outcome: TickOutcome) -> u64 {
    match outcome {
        TickOutcome::Ticked { tick, .. } => tick,
        TickOutcome::Paused => panic!("expected the tick to run"),
    }
}

fn drain(rx: &mut broadcast::Receiver<arbor_runtime::ExecutionEvent>) -> Vec<EventKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[test]
fn breakpoint_pauses_before_the_next_tick() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.set_breakpoint("first", None).unwrap();

    assert_eq!(ticked(exec.tick().unwrap()), 1);
    assert!(exec.debug().is_paused());
    assert_eq!(
        exec.debug().pause_reason(),
        Some(&PauseReason::Breakpoint {
            node_id: "first".into()
        })
    );

    assert_eq!(exec.tick().unwrap(), TickOutcome::Paused);
    assert_eq!(exec.tick_count(), 1);

    exec.resume();
    assert_eq!(ticked(exec.tick().unwrap()), 2);
    assert!(exec.debug().is_paused());
    assert_eq!(exec.debug().breakpoint("first").unwrap().hit_count, 2);
}

#[test]
fn conditional_breakpoint_waits_for_its_condition() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.set_breakpoint("first", Some("status == SUCCESS")).unwrap();

    ticked(exec.tick().unwrap());
    ticked(exec.tick().unwrap());
    assert!(!exec.debug().is_paused());

    ticked(exec.tick().unwrap());
    assert!(exec.debug().is_paused());
    assert_eq!(exec.debug().breakpoint("first").unwrap().hit_count, 1);
}

#[test]
fn unevaluable_condition_breaks() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.set_breakpoint("first", Some("bb.missing > 1")).unwrap();

    ticked(exec.tick().unwrap());
    assert!(exec.debug().is_paused());
}

#[test]
fn breakpoints_only_fire_on_the_tip() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.set_breakpoint("second", None).unwrap();

    for _ in 0..3 {
        ticked(exec.tick().unwrap());
    }
    assert!(!exec.debug().is_paused());

    assert_eq!(ticked(exec.tick().unwrap()), 4);
    assert!(exec.debug().is_paused());
}

#[test]
fn breakpoints_skip_children_a_decorator_did_not_tick() {
    let events = EventBus::new(64);
    let mut exec = instance(
        &TreeDefinition::new(
            "guarded",
            NodeDefinition::new("EternalGuard")
                .with_id("guard")
                .with_config("key", "/armed")
                .with_config("operator", "==")
                .with_config("value", true)
                .with_child(NodeDefinition::new("Success").with_id("leaf")),
        ),
        &events,
    );
    exec.blackboard_mut().write("/armed", Value::Bool(true)).unwrap();
    ticked(exec.tick().unwrap());

    exec.blackboard_mut().write("/armed", Value::Bool(false)).unwrap();
    exec.set_breakpoint("leaf", None).unwrap();
    assert_eq!(ticked(exec.tick().unwrap()), 2);
    assert_eq!(exec.status(), Status::Failure);
    assert!(!exec.debug().is_paused());
    assert_eq!(exec.debug().breakpoint("leaf").unwrap().hit_count, 0);
    assert_eq!(exec.snapshot().tip.as_deref(), Some("guard"));
}

#[test]
fn latched_one_shot_does_not_hit_its_child_breakpoint() {
    let events = EventBus::new(64);
    let mut exec = instance(
        &TreeDefinition::new(
            "once",
            NodeDefinition::new("OneShot")
                .with_id("once")
                .with_child(NodeDefinition::new("Success").with_id("leaf")),
        ),
        &events,
    );
    ticked(exec.tick().unwrap());

    exec.set_breakpoint("leaf", None).unwrap();
    assert_eq!(ticked(exec.tick().unwrap()), 2);
    assert_eq!(exec.status(), Status::Success);
    assert!(!exec.debug().is_paused());
    assert_eq!(exec.debug().breakpoint("leaf").unwrap().hit_count, 0);
}

#[test]
fn disabled_breakpoint_never_breaks() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.set_breakpoint("first", None).unwrap();
    exec.debug_mut().enable_breakpoint("first", false).unwrap();

    for _ in 0..6 {
        ticked(exec.tick().unwrap());
    }
    assert_eq!(exec.status(), Status::Success);
    assert_eq!(exec.debug().breakpoint("first").unwrap().hit_count, 0);
}

#[test]
fn bad_debug_commands_are_rejected() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);

    assert_eq!(
        exec.set_breakpoint("ghost", None),
        Err(DebugError::UnknownNode("ghost".into()))
    );
    assert!(matches!(
        exec.set_breakpoint("first", Some("status >")),
        Err(DebugError::InvalidCondition(_))
    ));
    assert_eq!(
        exec.debug_mut().remove_breakpoint("first"),
        Err(DebugError::BreakpointNotFound("first".into()))
    );
    assert_eq!(
        exec.debug_mut().remove_watch("speed"),
        Err(DebugError::WatchNotFound("/speed".into()))
    );
    assert!(matches!(
        exec.set_watch("/speed", WatchCondition::Equals, None),
        Err(DebugError::InvalidCondition(_))
    ));
}

#[test]
fn change_watch_pauses_before_the_tick_runs() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut exec = instance(&TreeDefinition::new("idle", NodeDefinition::new("Running")), &events);
    exec.set_watch("speed", WatchCondition::Change, None).unwrap();

    exec.blackboard_mut().write("/speed", Value::Int(1)).unwrap();
    ticked(exec.tick().unwrap());
    ticked(exec.tick().unwrap());

    exec.blackboard_mut().write("/speed", Value::Int(2)).unwrap();
    assert_eq!(exec.tick().unwrap(), TickOutcome::Paused);
    assert_eq!(exec.tick_count(), 2);
    assert_eq!(
        exec.debug().pause_reason(),
        Some(&PauseReason::Watch { key: "/speed".into() })
    );

    let watch = exec.debug().watch("/speed").unwrap();
    assert_eq!(watch.hit_count, 1);
    assert_eq!(watch.last_observed, Some(Value::Int(2)));

    assert!(drain(&mut rx).iter().any(|kind| matches!(
        kind,
        EventKind::WatchTriggered { key, value: Some(Value::Int(2)), .. } if key == "/speed"
    )));

    exec.resume();
    assert_eq!(ticked(exec.tick().unwrap()), 3);
}

#[test]
fn comparison_watch_sees_values_written_by_the_tree() {
    let events = EventBus::new(64);
    let def = TreeDefinition::new(
        "drain",
        NodeDefinition::new("Sequence").with_children([
            NodeDefinition::new("Counter").with_config("target", 2),
            NodeDefinition::new("SetBlackboardVariable")
                .with_config("key", "/battery")
                .with_config("value", 5),
        ]),
    );
    let mut exec = instance(&def, &events);
    exec.set_watch("/battery", WatchCondition::Less, Some(Value::Int(10)))
        .unwrap();

    for tick in 1..=3 {
        assert_eq!(ticked(exec.tick().unwrap()), tick);
    }
    assert_eq!(exec.status(), Status::Success);
    assert_eq!(exec.tick().unwrap(), TickOutcome::Paused);

    // Still below the target after resuming: the watch does not fire again.
    exec.resume();
    assert_eq!(ticked(exec.tick().unwrap()), 4);
}

#[test]
fn step_over_runs_the_requested_ticks() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut exec = instance(&TreeDefinition::new("idle", NodeDefinition::new("Running")), &events);

    exec.pause();
    assert_eq!(exec.tick().unwrap(), TickOutcome::Paused);

    exec.step(StepMode::Over { count: 2 });
    assert_eq!(ticked(exec.tick().unwrap()), 1);
    assert!(!exec.debug().is_paused());
    assert_eq!(ticked(exec.tick().unwrap()), 2);
    assert!(exec.debug().is_paused());
    assert_eq!(exec.debug().pause_reason(), Some(&PauseReason::Step));
    assert_eq!(exec.tick().unwrap(), TickOutcome::Paused);

    let kinds = drain(&mut rx);
    assert!(kinds.contains(&EventKind::StepCompleted {
        mode: "step_over".into()
    }));
    assert!(kinds.contains(&EventKind::Paused {
        reason: "manual".into()
    }));
}

#[test]
fn step_into_breaks_on_tip_status_change() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.pause();

    // `first` goes INVALID -> RUNNING.
    exec.step(StepMode::Into);
    ticked(exec.tick().unwrap());
    assert!(exec.debug().is_paused());

    // RUNNING -> RUNNING on tick 2, RUNNING -> SUCCESS on tick 3.
    exec.step(StepMode::Into);
    ticked(exec.tick().unwrap());
    assert!(!exec.debug().is_paused());
    ticked(exec.tick().unwrap());
    assert!(exec.debug().is_paused());
    assert_eq!(exec.tick_count(), 3);
}

#[test]
fn step_out_breaks_after_one_tick() {
    let events = EventBus::new(64);
    let mut exec = instance(&two_counters(), &events);
    exec.pause();
    exec.step(StepMode::Out);
    ticked(exec.tick().unwrap());
    assert!(exec.debug().is_paused());
    assert_eq!(exec.debug().step_mode(), None);
}

#[test]
fn resume_clears_step_mode() {
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let mut exec = instance(&two_counters(), &events);
    exec.step(StepMode::Over { count: 5 });
    exec.resume();
    assert_eq!(exec.debug().step_mode(), None);

    exec.pause();
    exec.resume();
    assert!(drain(&mut rx).contains(&EventKind::Resumed));

    for _ in 0..6 {
        ticked(exec.tick().unwrap());
    }
    assert!(!exec.debug().is_paused());
}

#[test]
fn snapshot_reports_tip_and_blackboard() {
    let events = EventBus::new(64);
    let def = TreeDefinition::new(
        "greeter",
        NodeDefinition::new("Sequence").with_id("root").with_children([
            NodeDefinition::new("SetBlackboardVariable")
                .with_id("greet")
                .with_config("key", "/greeting")
                .with_config("value", "hello"),
            NodeDefinition::new("Running").with_id("wait"),
        ]),
    );
    let mut exec = instance(&def, &events);

    let before = exec.snapshot();
    assert_eq!(before.tip, None);
    assert_eq!(before.root_status, Status::Invalid);
    assert!(before.node_states.values().all(|n| !n.is_tip));

    ticked(exec.tick().unwrap());
    let snapshot = exec.snapshot();
    assert_eq!(snapshot.tick_count, 1);
    assert_eq!(snapshot.tip.as_deref(), Some("wait"));
    assert!(snapshot.node_states["wait"].is_tip);
    assert_eq!(snapshot.node_states["greet"].status, Status::Success);
    assert_eq!(snapshot.blackboard["/greeting"], Value::from("hello"));
    assert!(snapshot.last_tick_at.is_some());

    let json: serde_json::Value = serde_json::from_str(&snapshot.to_json_pretty().unwrap()).unwrap();
    assert_eq!(json["root_status"], "RUNNING");
    assert_eq!(json["mode"], "MANUAL");
}

#[test]
fn action_errors_leave_the_tick_count_alone() {
    struct Broken;
    impl arbor_bt::Action for Broken {
        fn update(
            &mut self,
            _ctx: &arbor_core::TickContext,
            _bb: &mut arbor_core::BlackboardClient<'_>,
        ) -> anyhow::Result<Status> {
            anyhow::bail!("sensor unplugged")
        }
    }

    let mut registry = Registry::builtin();
    registry
        .register_action("Broken", Vec::new(), |_| Ok(Broken))
        .unwrap();
    let def = TreeDefinition::new("broken", NodeDefinition::new("Broken").with_id("probe"));
    let tree = TreeBuilder::new(&registry).build(&def).unwrap();
    let mut exec = ExecutionInstance::new("exec-2", tree, EventBus::default()).unwrap();

    let err = exec.tick().unwrap_err();
    assert!(matches!(err, RuntimeError::Tick(ref tick) if tick.node_id() == "probe"));
    assert!(err.to_string().contains("sensor unplugged"));
    assert_eq!(exec.tick_count(), 0);
}
