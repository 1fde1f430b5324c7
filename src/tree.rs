//! The tree driver: owns the root node and the wake-up signal, and runs
//! the outer tick loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::blackboard::Blackboard;
use crate::error::NodeResult;
use crate::node::TreeNode;
use crate::signal::WakeUpSignal;
use crate::NodeStatus;

/// How the driver keeps ticking after the first pass.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TickOption {
    /// One tick, even if a wake-up is already pending.
    ExactlyOnce,
    /// One tick, then drain any pending wake-ups with immediate re-ticks.
    OnceUnlessWokenUp,
    /// Tick until the root completes, sleeping on the wake-up signal in
    /// between.
    WhileRunning,
}

/// Bookkeeping for one subtree instance: its blackboard scope stays
/// reachable for inspection after the tree is assembled.
pub struct Subtree {
    pub tree_id: String,
    pub instance_name: String,
    pub blackboard: Arc<Blackboard>,
}

pub struct Tree {
    root: TreeNode,
    subtrees: Vec<Subtree>,
    wake_up: Arc<WakeUpSignal>,
}

impl Tree {
    /// Takes ownership of an assembled root node, attaches a fresh wake-up
    /// signal to every node and assigns depth-first uids and dotted paths.
    pub fn new(root: TreeNode) -> Self {
        let mut tree = Self {
            root,
            subtrees: Vec::new(),
            wake_up: WakeUpSignal::new(),
        };
        tree.root.set_wake_up(tree.wake_up.clone());
        let mut counter = 0u16;
        assign_identity(&mut tree.root, "", &mut counter);
        tree
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut TreeNode {
        &mut self.root
    }

    pub fn wake_up(&self) -> Arc<WakeUpSignal> {
        self.wake_up.clone()
    }

    pub fn add_subtree(&mut self, subtree: Subtree) {
        self.subtrees.push(subtree);
    }

    pub fn subtrees(&self) -> &[Subtree] {
        &self.subtrees
    }

    /// Ticks the root once, ignoring pending wake-ups.
    pub fn tick_exactly_once(&mut self) -> NodeResult {
        self.tick_root(TickOption::ExactlyOnce, Duration::ZERO)
    }

    /// Ticks the root once, then re-ticks while wake-ups are pending.
    pub fn tick_once(&mut self) -> NodeResult {
        self.tick_root(TickOption::OnceUnlessWokenUp, Duration::ZERO)
    }

    /// Ticks until the root completes. Between `Running` ticks the driver
    /// sleeps up to `sleep` on the wake-up signal, so asynchronous leaves
    /// shorten the wait instead of being polled blindly.
    pub fn tick_while_running(&mut self, sleep: Duration) -> NodeResult {
        self.tick_root(TickOption::WhileRunning, sleep)
    }

    /// Blocks until the wake-up signal fires or `timeout` elapses.
    pub fn sleep(&self, timeout: Duration) -> bool {
        self.wake_up.wait_for(timeout)
    }

    /// Halts whatever is running and resets every node to `Idle`.
    pub fn halt_tree(&mut self) {
        debug!("halt tree");
        self.root.reset_node();
    }

    fn tick_root(&mut self, opt: TickOption, sleep: Duration) -> NodeResult {
        let mut status = NodeStatus::Idle;
        while status == NodeStatus::Idle
            || (opt == TickOption::WhileRunning && status == NodeStatus::Running)
        {
            status = self.root.execute_tick()?;

            // drain pending wake-ups with immediate re-ticks
            while opt != TickOption::ExactlyOnce
                && status == NodeStatus::Running
                && self.wake_up.wait_for(Duration::ZERO)
            {
                status = self.root.execute_tick()?;
            }

            if status.is_completed() {
                self.root.reset_status();
            }
            if status == NodeStatus::Running && !sleep.is_zero() {
                self.wake_up.wait_for(sleep);
            }
        }
        Ok(status)
    }
}

impl Drop for Tree {
    fn drop(&mut self) {
        self.root.reset_node();
    }
}

fn assign_identity(node: &mut TreeNode, prefix: &str, counter: &mut u16) {
    *counter += 1;
    let path = if prefix.is_empty() {
        node.name().to_owned()
    } else {
        format!("{}.{}", prefix, node.name())
    };
    node.config_mut().uid = *counter;
    node.config_mut().path = path.clone();
    for child in node.children_mut() {
        assign_identity(child, &path, counter);
    }
}
