use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;
use crate::node::{NodeConfig, TreeNode};
use crate::{Blackboard, NodeType};

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

/// Fails the first `failures` ticks, then succeeds.
struct FlakyLeaf {
    failures: usize,
    ticks: Arc<AtomicUsize>,
}

impl BehaviorNode for FlakyLeaf {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(if tick < self.failures {
            NodeStatus::Failure
        } else {
            NodeStatus::Success
        })
    }
}

struct Gate(Arc<AtomicBool>);

impl BehaviorNode for Gate {
    fn node_type(&self) -> NodeType {
        NodeType::Condition
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        Ok(if self.0.load(Ordering::SeqCst) {
            NodeStatus::Success
        } else {
            NodeStatus::Failure
        })
    }
}

fn node(behavior: impl BehaviorNode + 'static) -> TreeNode {
    TreeNode::new("test", NodeConfig::default(), Box::new(behavior))
}

fn counting(result: NodeStatus) -> (TreeNode, Arc<AtomicUsize>) {
    let ticks = Arc::new(AtomicUsize::new(0));
    let tree_node = node(Counting {
        result,
        ticks: ticks.clone(),
    });
    (tree_node, ticks)
}

fn wrap(decorator: impl BehaviorNode + 'static, child: TreeNode) -> TreeNode {
    let mut root = node(decorator);
    root.add_child(child).unwrap();
    root
}

#[test]
fn inverter_swaps_the_outcome() {
    let (child, _) = counting(NodeStatus::Success);
    let mut root = wrap(InverterNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);

    let (child, _) = counting(NodeStatus::Failure);
    let mut root = wrap(InverterNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
}

#[test]
fn inverter_passes_running_through() {
    let (child, _) = counting(NodeStatus::Running);
    let mut root = wrap(InverterNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);
}

#[test]
fn force_nodes_override_completed_children_only() {
    let (child, _) = counting(NodeStatus::Failure);
    let mut root = wrap(ForceSuccessNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);

    let (child, _) = counting(NodeStatus::Success);
    let mut root = wrap(ForceFailureNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);

    let (child, _) = counting(NodeStatus::Running);
    let mut root = wrap(ForceSuccessNode, child);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);
}

#[test]
fn keep_running_restarts_a_successful_child() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut root = wrap(KeepRunningUntilFailureNode, node(Gate(flag.clone())));

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);

    flag.store(false, Ordering::SeqCst);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
}

#[test]
fn repeat_runs_the_child_the_requested_number_of_times() {
    let (child, ticks) = counting(NodeStatus::Success);
    let mut root = wrap(RepeatNode::with_cycles(3), child);

    // without a wake-up signal attached the iterations run inline
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[test]
fn repeat_fails_fast() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let child = node(FlakyLeaf {
        failures: 2,
        ticks: ticks.clone(),
    });
    let mut root = wrap(RepeatNode::with_cycles(5), child);

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn retry_gives_up_after_the_attempt_budget() {
    let (child, ticks) = counting(NodeStatus::Failure);
    let mut root = wrap(RetryNode::with_attempts(3), child);

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[test]
fn retry_stops_at_the_first_success() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let child = node(FlakyLeaf {
        failures: 2,
        ticks: ticks.clone(),
    });
    let mut root = wrap(RetryNode::with_attempts(5), child);

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
}

#[test]
fn run_once_reports_skipped_afterwards() {
    let (child, ticks) = counting(NodeStatus::Success);
    let mut root = wrap(RunOnceNode::default(), child);

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Skipped);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Skipped);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn run_once_can_replay_the_recorded_status() {
    let (child, ticks) = counting(NodeStatus::Failure);
    let config = NodeConfig::default().with_input("then_skip", "false");
    let mut root = TreeNode::new("once", config, Box::new(RunOnceNode::default()));
    root.add_child(child).unwrap();

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn precondition_gates_the_child() {
    let bb = Blackboard::root();
    let (child, ticks) = counting(NodeStatus::Success);
    let script = CompiledScript::new("armed == true", |bb: &Blackboard, _| {
        bb.get::<bool>("armed").unwrap_or(false)
    });
    let mut root = TreeNode::new(
        "guard",
        NodeConfig::new(bb.clone()),
        Box::new(PreconditionNode::new(script)),
    );
    root.add_child(child).unwrap();

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);

    bb.set("armed", true).unwrap();
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}

#[test]
fn precondition_else_status_is_configurable() {
    let bb = Blackboard::root();
    let (child, _) = counting(NodeStatus::Success);
    let script = CompiledScript::new("false", |_: &Blackboard, _| false);
    let mut root = TreeNode::new(
        "guard",
        NodeConfig::new(bb),
        Box::new(PreconditionNode::new(script).with_else(NodeStatus::Skipped)),
    );
    root.add_child(child).unwrap();

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Skipped);
}

#[test]
fn subtree_forwards_the_child_status() {
    let (child, _) = counting(NodeStatus::Success);
    let mut root = wrap(SubTreeNode::new("nested"), child);

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    // the nested root is reset for the next activation
    assert_eq!(root.children()[0].status(), NodeStatus::Idle);
}

#[test]
fn timeout_fails_an_overrunning_child() {
    let (child, _) = counting(NodeStatus::Running);
    let mut root = wrap(
        TimeoutNode::with_timeout(std::time::Duration::from_millis(20)),
        child,
    );

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Failure);
    assert_eq!(root.children()[0].status(), NodeStatus::Idle);
}

#[test]
fn delay_postpones_the_first_child_tick() {
    let (child, ticks) = counting(NodeStatus::Success);
    let mut root = wrap(
        DelayNode::with_delay(std::time::Duration::from_millis(20)),
        child,
    );

    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Running);
    assert_eq!(ticks.load(Ordering::SeqCst), 0);

    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(root.execute_tick().unwrap(), NodeStatus::Success);
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
}
