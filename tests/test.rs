use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use behavior_tree_core::*;

struct Counting {
    result: NodeStatus,
    ticks: Arc<AtomicUsize>,
}

impl BehaviorNode for Counting {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(self.result)
    }
}

fn counting(result: NodeStatus) -> (TreeNode, Arc<AtomicUsize>) {
    let ticks = Arc::new(AtomicUsize::new(0));
    let node = TreeNode::new(
        "counting",
        NodeConfig::default(),
        Box::new(Counting {
            result,
            ticks: ticks.clone(),
        }),
    );
    (node, ticks)
}

#[test]
fn tree_runs_a_sequence_to_completion() -> anyhow::Result<()> {
    let bb = Blackboard::root();
    let mut root = TreeNode::new(
        "root",
        NodeConfig::new(bb.clone()),
        Box::new(SequenceNode::default()),
    );
    let config = NodeConfig::new(bb.clone()).with_output("result", "{result}");
    let write = TreeNode::new(
        "write",
        config,
        Box::new(SimpleAction::new(|ctx: &mut Context| {
            ctx.set_output("result", 42i64)?;
            Ok(NodeStatus::Success)
        })),
    );
    root.add_child(write)?;

    let mut tree = Tree::new(root);
    let status = tree.tick_while_running(Duration::from_millis(10))?;
    assert_eq!(status, NodeStatus::Success);
    assert_eq!(bb.get::<i64>("result"), Some(42));
    // the driver resets the root after completion
    assert_eq!(tree.root().status(), NodeStatus::Idle);
    Ok(())
}

#[test]
fn threaded_action_completes_and_wakes_the_driver() {
    let action = ThreadedAction::new(|_ctx: &ThreadedContext| {
        std::thread::sleep(Duration::from_millis(30));
        NodeStatus::Success
    });
    let root = TreeNode::new("work", NodeConfig::default(), Box::new(action));
    let mut tree = Tree::new(root);

    let start = Instant::now();
    let status = tree.tick_while_running(Duration::from_secs(5)).unwrap();
    assert_eq!(status, NodeStatus::Success);
    // the wake-up signal cuts the 5 second poll interval short
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn halting_a_threaded_action_joins_the_worker() {
    let acknowledged = Arc::new(AtomicBool::new(false));
    let acknowledged_in_body = acknowledged.clone();
    let action = ThreadedAction::new(move |ctx: &ThreadedContext| {
        while !ctx.is_halt_requested() {
            std::thread::sleep(Duration::from_millis(1));
        }
        acknowledged_in_body.store(true, Ordering::SeqCst);
        NodeStatus::Failure
    });
    let root = TreeNode::new("work", NodeConfig::default(), Box::new(action));
    let mut tree = Tree::new(root);

    assert_eq!(tree.tick_once().unwrap(), NodeStatus::Running);
    tree.halt_tree();
    // halt returns only after the worker acknowledged the request
    assert!(acknowledged.load(Ordering::SeqCst));
    assert_eq!(tree.root().status(), NodeStatus::Idle);

    // a late publish never resurrects the halted node
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(tree.root().status(), NodeStatus::Idle);
}

#[test]
fn timeout_interrupts_a_slow_threaded_action() {
    let slow = ThreadedAction::new(|ctx: &ThreadedContext| {
        for _ in 0..500 {
            if ctx.is_halt_requested() {
                return NodeStatus::Failure;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        NodeStatus::Success
    });
    let mut root = TreeNode::new(
        "timeout",
        NodeConfig::default(),
        Box::new(TimeoutNode::with_timeout(Duration::from_millis(50))),
    );
    root.add_child(TreeNode::new(
        "slow",
        NodeConfig::default(),
        Box::new(slow),
    ))
    .unwrap();
    let mut tree = Tree::new(root);

    let start = Instant::now();
    let status = tree.tick_while_running(Duration::from_millis(10)).unwrap();
    assert_eq!(status, NodeStatus::Failure);
    assert!(start.elapsed() < Duration::from_millis(400));
}

#[test]
fn sleep_node_waits_without_busy_polling() -> anyhow::Result<()> {
    let registry = Registry::default();
    let config = NodeConfig::default().with_input("msec", "30");
    let root = registry.instantiate("Sleep", "nap", config)?;
    let mut tree = Tree::new(root);

    let start = Instant::now();
    let status = tree.tick_while_running(Duration::from_secs(5))?;
    let elapsed = start.elapsed();
    assert_eq!(status, NodeStatus::Success);
    assert!(elapsed >= Duration::from_millis(30));
    // the deadline timer wakes the driver, not the poll interval
    assert!(elapsed < Duration::from_secs(2));
    Ok(())
}

#[test]
fn subtree_scope_shares_only_remapped_keys() -> anyhow::Result<()> {
    let parent_bb = Blackboard::root();
    let child_bb = Blackboard::with_parent(&parent_bb, false);
    child_bb.add_subtree_remapping("inner_result", "result");

    let mut boundary = TreeNode::new(
        "sub",
        NodeConfig::new(parent_bb.clone()),
        Box::new(SubTreeNode::new("nested")),
    );
    let write_cfg = NodeConfig::new(child_bb.clone())
        .with_output("out", "{inner_result}")
        .with_output("scratch", "{_scratch}");
    let write = TreeNode::new(
        "write",
        write_cfg,
        Box::new(SimpleAction::new(|ctx: &mut Context| {
            ctx.set_output("out", 7i64)?;
            ctx.set_output("scratch", 1i64)?;
            Ok(NodeStatus::Success)
        })),
    );
    boundary.add_child(write)?;

    let mut tree = Tree::new(boundary);
    tree.add_subtree(Subtree {
        tree_id: "nested".to_owned(),
        instance_name: "sub".to_owned(),
        blackboard: child_bb.clone(),
    });

    assert_eq!(tree.tick_once()?, NodeStatus::Success);
    // the remapped key crossed the boundary, the private one did not
    assert_eq!(parent_bb.get::<i64>("result"), Some(7));
    assert_eq!(parent_bb.get::<i64>("_scratch"), None);
    assert_eq!(child_bb.get::<i64>("_scratch"), Some(1));
    Ok(())
}

struct Haltable {
    halts: Arc<AtomicUsize>,
}

impl BehaviorNode for Haltable {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self, _ctx: &mut Context) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn while_condition_interrupts_a_running_node() {
    let bb = Blackboard::root();
    let halts = Arc::new(AtomicUsize::new(0));
    let script = CompiledScript::new("keep_going", |bb: &Blackboard, _| {
        bb.get::<bool>("keep_going").unwrap_or(false)
    });
    let config = NodeConfig::new(bb.clone()).with_pre_condition(PreCond::WhileTrue, script);
    let mut node = TreeNode::new(
        "guarded",
        config,
        Box::new(Haltable {
            halts: halts.clone(),
        }),
    );

    bb.set("keep_going", true).unwrap();
    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Running);
    assert_eq!(halts.load(Ordering::SeqCst), 0);

    bb.set("keep_going", false).unwrap();
    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Skipped);
    assert_eq!(halts.load(Ordering::SeqCst), 1);
}

#[test]
fn while_condition_skips_a_node_that_never_started() {
    let bb = Blackboard::root();
    let (leaf, ticks) = counting(NodeStatus::Success);
    let script = CompiledScript::new("keep_going", |bb: &Blackboard, _| {
        bb.get::<bool>("keep_going").unwrap_or(false)
    });
    let mut root = TreeNode::new(
        "root",
        NodeConfig::new(bb.clone()),
        Box::new(SequenceNode::default()),
    );
    let mut leaf = leaf;
    leaf.config_mut().blackboard = bb.clone();
    leaf.config_mut()
        .pre_conditions
        .insert(PreCond::WhileTrue, script);
    root.add_child(leaf).unwrap();

    // the condition is false from the start, so the child is skipped and
    // the whole sequence reports SKIPPED
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Skipped);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
}

#[test]
fn failure_if_precondition_short_circuits() {
    let bb = Blackboard::root();
    let (leaf, ticks) = counting(NodeStatus::Success);
    let mut leaf = leaf;
    leaf.config_mut().blackboard = bb.clone();
    leaf.config_mut().pre_conditions.insert(
        PreCond::FailureIf,
        CompiledScript::new("abort", |bb: &Blackboard, _| {
            bb.get::<bool>("abort").unwrap_or(false)
        }),
    );

    bb.set("abort", true).unwrap();
    assert_eq!(leaf.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);

    bb.set("abort", false).unwrap();
    leaf.reset_status();
    assert_eq!(leaf.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn post_condition_scripts_observe_the_outcome() {
    let bb = Blackboard::root();
    let config = NodeConfig::new(bb.clone())
        .with_post_condition(
            PostCond::OnSuccess,
            CompiledScript::new("ok := true", |bb: &Blackboard, _| bb.set("ok", true).is_ok()),
        )
        .with_post_condition(
            PostCond::Always,
            CompiledScript::new("done := true", |bb: &Blackboard, _| {
                bb.set("done", true).is_ok()
            }),
        );
    let mut node = TreeNode::new(
        "act",
        config,
        Box::new(SimpleAction::new(|_: &mut Context| Ok(NodeStatus::Success))),
    );

    node.execute_tick().unwrap();
    assert_eq!(bb.get::<bool>("ok"), Some(true));
    assert_eq!(bb.get::<bool>("done"), Some(true));
}

#[test]
fn on_halted_script_fires_on_interruption() {
    let bb = Blackboard::root();
    let config = NodeConfig::new(bb.clone()).with_post_condition(
        PostCond::OnHalted,
        CompiledScript::new("halted := true", |bb: &Blackboard, _| {
            bb.set("halted", true).is_ok()
        }),
    );
    let mut node = TreeNode::new(
        "act",
        config,
        Box::new(Haltable {
            halts: Arc::new(AtomicUsize::new(0)),
        }),
    );

    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Running);
    node.reset_node();
    assert_eq!(bb.get::<bool>("halted"), Some(true));
    assert_eq!(node.status(), NodeStatus::Idle);
}

#[test]
fn substitution_callback_short_circuits_the_tick() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_in_body = ticks.clone();
    let mut node = TreeNode::new(
        "mocked",
        NodeConfig::default(),
        Box::new(SimpleAction::new(move |_: &mut Context| {
            ticks_in_body.fetch_add(1, Ordering::SeqCst);
            Ok(NodeStatus::Success)
        })),
    );
    node.set_substitution_callback(Arc::new(|_: &TreeNode| NodeStatus::Failure));

    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
}

#[test]
fn post_tick_callback_overrides_completed_results() {
    let mut node = TreeNode::new(
        "observed",
        NodeConfig::default(),
        Box::new(SimpleAction::new(|_: &mut Context| Ok(NodeStatus::Failure))),
    );
    node.set_post_tick_callback(Arc::new(|_: &TreeNode, _status| NodeStatus::Success));

    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(node.status(), NodeStatus::Success);
}

#[test]
fn status_transitions_notify_subscribers() {
    let log = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log_in_callback = log.clone();
    let mut node = TreeNode::new(
        "leaf",
        NodeConfig::default(),
        Box::new(SimpleAction::new(|_: &mut Context| Ok(NodeStatus::Success))),
    );
    node.subscribe_status_change(move |prev, next| {
        log_in_callback.lock().unwrap().push((prev, next));
    });

    node.execute_tick().unwrap();
    node.reset_status();
    let log = log.lock().unwrap();
    assert_eq!(
        log.as_slice(),
        &[
            (NodeStatus::Idle, NodeStatus::Success),
            (NodeStatus::Success, NodeStatus::Idle),
        ]
    );
}

#[test]
fn sync_wrapper_rejects_running() {
    let mut node = TreeNode::new(
        "sync",
        NodeConfig::default(),
        Box::new(SyncActionNode(SimpleAction::new(|_: &mut Context| {
            Ok(NodeStatus::Running)
        }))),
    );
    let err = node.execute_tick().unwrap_err();
    assert!(matches!(err, BehaviorError::SyncActionRunning(_)));
}

#[test]
fn registry_rejects_unknown_node_types() {
    let registry = Registry::default();
    let err = registry.instantiate("Nope", "x", NodeConfig::default()).err();
    assert!(matches!(err, Some(BehaviorError::UnknownNodeType(_))));
}

#[test]
fn manifest_defaults_apply_when_a_port_is_unbound() {
    let registry = Registry::default();
    let mut root = registry
        .instantiate("Repeat", "rep", NodeConfig::default())
        .unwrap();
    let (leaf, ticks) = counting(NodeStatus::Success);
    root.add_child(leaf).unwrap();

    // num_cycles falls back to the declared default of 1
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn enum_names_resolve_in_port_literals() {
    let mut config = NodeConfig::default().with_input("num_cycles", "TWICE");
    config.enums = Arc::new(HashMap::from([("TWICE".to_owned(), 2i64)]));
    let mut root = TreeNode::new("rep", config, Box::new(RepeatNode::default()));
    let (leaf, ticks) = counting(NodeStatus::Success);
    root.add_child(leaf).unwrap();

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 2);
}

#[test]
fn set_blackboard_copies_entries_with_their_type() {
    let bb = Blackboard::root();
    bb.set("src", 9i64).unwrap();
    let config = NodeConfig::new(bb.clone())
        .with_input("value", "{src}")
        .with_input("output_key", "{dst}");
    let mut node = TreeNode::new("set", config, Box::new(SetBlackboard));

    assert_eq!(node.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(bb.get::<i64>("dst"), Some(9));
}

#[test]
fn set_and_unset_blackboard_with_literals() {
    let bb = Blackboard::root();
    let config = NodeConfig::new(bb.clone())
        .with_input("value", "99")
        .with_input("output_key", "{dst}");
    let mut set = TreeNode::new("set", config, Box::new(SetBlackboard));
    assert_eq!(set.execute_tick().unwrap(), NodeStatus::Success);
    // literals land as strings and convert on first typed read
    assert_eq!(bb.get_parse::<i64>("dst"), Some(99));

    let config = NodeConfig::new(bb.clone()).with_input("key", "dst");
    let mut unset = TreeNode::new("unset", config, Box::new(UnsetBlackboard));
    assert_eq!(unset.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(bb.get::<String>("dst"), None);
}

#[test]
fn pop_from_queue_drains_until_failure() {
    let bb = Blackboard::root();
    bb.set("q", ProtectedQueue::new([1i64, 2, 3])).unwrap();
    let config = NodeConfig::new(bb.clone())
        .with_input("queue", "{q}")
        .with_output("popped_item", "{item}");
    let mut pop = TreeNode::new("pop", config, Box::new(PopFromQueue::<i64>::default()));

    for expected in [1i64, 2, 3] {
        assert_eq!(pop.execute_tick().unwrap(), NodeStatus::Success);
        assert_eq!(bb.get::<i64>("item"), Some(expected));
    }
    assert_eq!(pop.execute_tick().unwrap(), NodeStatus::Failure);

    let config = NodeConfig::new(bb.clone())
        .with_input("queue", "{q}")
        .with_output("size", "{size}");
    let mut size = TreeNode::new("size", config, Box::new(QueueSize::<i64>::default()));
    assert_eq!(size.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(bb.get::<usize>("size"), Some(0));
}

#[test]
fn tick_exactly_once_ignores_pending_wake_ups() {
    let (leaf, ticks) = counting(NodeStatus::Running);
    let mut tree = Tree::new(leaf);
    tree.wake_up().emit_signal();

    assert_eq!(tree.tick_exactly_once().unwrap(), NodeStatus::Running);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn driver_reports_errors_from_deep_in_the_tree() {
    struct BrokenLeaf;
    impl BehaviorNode for BrokenLeaf {
        fn node_type(&self) -> NodeType {
            NodeType::Action
        }
        fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
            Ok(NodeStatus::Idle)
        }
    }
    let mut root = TreeNode::new(
        "root",
        NodeConfig::default(),
        Box::new(SequenceNode::default()),
    );
    root.add_child(TreeNode::new(
        "broken",
        NodeConfig::default(),
        Box::new(BrokenLeaf),
    ))
    .unwrap();
    let mut tree = Tree::new(root);

    let err = tree.tick_once().unwrap_err();
    assert!(matches!(err, BehaviorError::TickReturnedIdle(_)));
}
