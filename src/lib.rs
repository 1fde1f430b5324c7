//! # behavior-tree-core
//!
//! A behavior tree execution engine, inspired by
//! [BehaviorTreeCPP](https://github.com/BehaviorTree/BehaviorTree.CPP.git).
//!
//! A behavior tree is an extension to finite state machines that makes
//! describing transitional behavior easier. The tree is built once, then
//! repeatedly *ticked*: each tick traverses the tree depth-first, every node
//! returns a [`NodeStatus`], and control nodes combine their children's
//! statuses into their own.
//!
//!
//! ## How it looks like
//!
//! Leaf behaviors implement the [`BehaviorNode`] trait and exchange data
//! through the [`Blackboard`]:
//!
//! ```rust
//! use behavior_tree_core::*;
//!
//! struct SaySomething;
//!
//! impl BehaviorNode for SaySomething {
//!     fn node_type(&self) -> NodeType {
//!         NodeType::Action
//!     }
//!
//!     fn tick(&mut self, ctx: &mut Context) -> NodeResult {
//!         let message: String = ctx.get_input("message")?;
//!         println!("{}", message);
//!         Ok(NodeStatus::Success)
//!     }
//! }
//! ```
//!
//! Nodes are assembled into [`TreeNode`] containers and driven by a
//! [`Tree`]:
//!
//! ```rust
//! use behavior_tree_core::*;
//!
//! # struct SaySomething;
//! # impl BehaviorNode for SaySomething {
//! #     fn node_type(&self) -> NodeType { NodeType::Action }
//! #     fn tick(&mut self, _ctx: &mut Context) -> NodeResult { Ok(NodeStatus::Success) }
//! # }
//! let mut root = TreeNode::new("root", NodeConfig::default(), Box::new(SequenceNode::default()));
//! let mut say = TreeNode::new("say", NodeConfig::default(), Box::new(SaySomething));
//! say.config_mut()
//!     .input_ports
//!     .insert("message".to_owned(), "hello".to_owned());
//! root.add_child(say).unwrap();
//!
//! let mut tree = Tree::new(root);
//! let status = tree.tick_while_running(std::time::Duration::from_millis(10)).unwrap();
//! assert_eq!(status, NodeStatus::Success);
//! ```
//!
//! ## Asynchronous actions
//!
//! Two asynchronous leaf flavors are provided. A [`StatefulActionNode`] is
//! polled by the tick thread (`on_start`/`on_running`/`on_halted`), while a
//! [`ThreadedAction`] runs its blocking body on a worker thread and
//! publishes the result through the node's status cell. Both wake the
//! driver through the tree's shared [`WakeUpSignal`], so
//! [`Tree::tick_while_running`] sleeps between ticks instead of busy
//! polling, and re-ticks immediately when any async leaf makes progress.
//!
//! Halting is recursive and, for worker-backed actions, *blocking*: the
//! halt does not return until the worker has acknowledged it, which is what
//! keeps a late worker from overwriting the status of a node that was
//! already declared halted.
//!
//! ## Blackboard scopes
//!
//! Every subtree owns a blackboard scope. A key that is not found locally
//! is resolved through the parent scope when an explicit remapping exists,
//! or when autoremapping is enabled and the key is not private (leading
//! underscore). The resolved entry is *shared*, not copied: writing through
//! either scope is visible through the other.

pub mod actions;
mod blackboard;
pub mod controls;
mod convert;
pub mod decorators;
pub mod error;
mod node;
mod port;
mod registry;
mod signal;
mod tree;

pub use crate::blackboard::{Blackboard, Entry};
pub use crate::convert::FromPortString;
pub use crate::error::{
    AddChildError, AddChildResult, BehaviorError, BlackboardError, NodeResult, PortError,
};
pub use crate::node::{
    BehaviorNode, CompiledScript, Context, NodeConfig, PostTickCallback, PreTickCallback,
    ScriptFn, StatusCell, TreeNode,
};
pub use crate::port::{PortDirection, PortInfo, TreeNodeManifest};
pub use crate::registry::{boxify, Constructor, Registry};
pub use crate::signal::{StatusChangeSignal, WakeTimer, WakeUpSignal};
pub use crate::tree::{Subtree, TickOption, Tree};

pub use crate::actions::{
    AlwaysFailure, AlwaysSuccess, PopFromQueue, ProtectedQueue, QueueSize, SetBlackboard,
    SimpleAction, SleepNode, StatefulAction, StatefulActionNode, SyncActionNode, ThreadedAction,
    ThreadedContext, UnsetBlackboard,
};
pub use crate::controls::{
    FallbackNode, IfThenElseNode, ParallelAllNode, ParallelNode, ReactiveFallbackNode,
    ReactiveSequenceNode, SequenceNode, SequenceWithMemoryNode, SwitchNode, WhileDoElseNode,
};
pub use crate::decorators::{
    DelayNode, ForceFailureNode, ForceSuccessNode, InverterNode, KeepRunningUntilFailureNode,
    PreconditionNode, RepeatNode, RetryNode, RunOnceNode, SubTreeNode, TimeoutNode,
};

/// The result of ticking a node.
///
/// `Idle` is the state of a node that has never been ticked or has been
/// explicitly reset; a tick must never *return* it.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum NodeStatus {
    Idle,
    Running,
    Success,
    Failure,
    /// The node was not executed, either because a pre-condition skipped it
    /// or because a parent decided not to run it in this pass.
    Skipped,
}

impl NodeStatus {
    /// `Success` or `Failure`.
    pub fn is_completed(self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::Failure)
    }

    /// Anything but `Idle` and `Skipped`.
    pub fn is_active(self) -> bool {
        !matches!(self, NodeStatus::Idle | NodeStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Idle => "IDLE",
            NodeStatus::Running => "RUNNING",
            NodeStatus::Success => "SUCCESS",
            NodeStatus::Failure => "FAILURE",
            NodeStatus::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad category of a node, mostly useful for introspection tooling.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NodeType {
    Undefined,
    Action,
    Condition,
    SubTree,
    Decorator,
    Control,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Undefined => "Undefined",
            NodeType::Action => "Action",
            NodeType::Condition => "Condition",
            NodeType::SubTree => "SubTree",
            NodeType::Decorator => "Decorator",
            NodeType::Control => "Control",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pre-condition kinds, in evaluation priority order.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum PreCond {
    FailureIf,
    SuccessIf,
    SkipIf,
    WhileTrue,
}

impl PreCond {
    /// Evaluation order of the pre-conditions in `execute_tick`.
    pub const ALL: [PreCond; 4] = [
        PreCond::FailureIf,
        PreCond::SuccessIf,
        PreCond::SkipIf,
        PreCond::WhileTrue,
    ];

    pub fn key(self) -> &'static str {
        match self {
            PreCond::FailureIf => "_failureIf",
            PreCond::SuccessIf => "_successIf",
            PreCond::SkipIf => "_skipIf",
            PreCond::WhileTrue => "_while",
        }
    }
}

/// Post-condition kinds.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum PostCond {
    OnHalted,
    OnFailure,
    OnSuccess,
    Always,
}

impl PostCond {
    pub fn key(self) -> &'static str {
        match self {
            PostCond::OnHalted => "_onHalted",
            PostCond::OnFailure => "_onFailure",
            PostCond::OnSuccess => "_onSuccess",
            PostCond::Always => "_post",
        }
    }
}

/// How many children a node accepts.
#[derive(PartialEq, Eq)]
pub enum NumChildren {
    Finite(usize),
    Infinite,
}

impl PartialOrd for NumChildren {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(match (self, other) {
            (NumChildren::Finite(_), NumChildren::Infinite) => std::cmp::Ordering::Less,
            (NumChildren::Infinite, NumChildren::Finite(_)) => std::cmp::Ordering::Greater,
            (NumChildren::Finite(lhs), NumChildren::Finite(rhs)) => lhs.cmp(rhs),
            (NumChildren::Infinite, NumChildren::Infinite) => return None,
        })
    }
}
