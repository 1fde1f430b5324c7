//! Control nodes: the composite nodes that route ticks to their children
//! and combine the children's statuses into their own.

use std::collections::{HashMap, HashSet};

use crate::convert::FromPortString;
use crate::error::{BehaviorError, NodeResult};
use crate::node::{BehaviorNode, Context};
use crate::port::PortInfo;
use crate::{NodeStatus, NodeType, NumChildren};

/// Ticks children in order until one fails.
///
/// A `Running` child suspends the walk; the next tick resumes at the same
/// child. Failure resets every child and the cursor. The asynchronous
/// variant additionally yields `Running` after a child succeeds within the
/// tick it started, requesting an immediate re-tick, so one tick never
/// starts two children.
#[derive(Default)]
pub struct SequenceNode {
    index: usize,
    all_skipped: bool,
    asynch: bool,
}

impl SequenceNode {
    pub fn asynchronous() -> Self {
        Self {
            asynch: true,
            ..Self::default()
        }
    }
}

impl BehaviorNode for SequenceNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;
        while self.index < ctx.child_count() {
            let entry_status = ctx.child_status(self.index).unwrap_or(NodeStatus::Idle);
            let status = ctx.tick_child(self.index)?;
            self.all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Failure => {
                    ctx.reset_children();
                    self.index = 0;
                    return Ok(NodeStatus::Failure);
                }
                _ => {
                    self.index += 1;
                    // asynchronous mode yields between children, letting the
                    // wake-up signal schedule the immediate re-tick; a child
                    // that merely finished a RUNNING stint continues inline
                    if self.asynch
                        && status == NodeStatus::Success
                        && entry_status == NodeStatus::Idle
                        && self.index < ctx.child_count()
                        && ctx.requires_wake_up()
                    {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
            }
        }
        ctx.reset_children();
        self.index = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Success
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.index = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A sequence that remembers its cursor across a failure: re-ticking after
/// a failed child retries from that child, not from the beginning.
#[derive(Default)]
pub struct SequenceWithMemoryNode {
    index: usize,
    all_skipped: bool,
}

impl BehaviorNode for SequenceWithMemoryNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;
        while self.index < ctx.child_count() {
            let status = ctx.tick_child(self.index)?;
            self.all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Failure => {
                    // keep the cursor; only the not-yet-successful tail is
                    // reset so already completed children are not re-run
                    for i in self.index..ctx.child_count() {
                        ctx.halt_child(i);
                    }
                    return Ok(NodeStatus::Failure);
                }
                _ => self.index += 1,
            }
        }
        ctx.reset_children();
        self.index = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Success
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.index = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// Ticks children in order until one succeeds.
#[derive(Default)]
pub struct FallbackNode {
    index: usize,
    all_skipped: bool,
    asynch: bool,
}

impl FallbackNode {
    /// Yields `Running` between children instead of trying the next
    /// alternative within the same tick.
    pub fn asynchronous() -> Self {
        Self {
            asynch: true,
            ..Self::default()
        }
    }
}

impl BehaviorNode for FallbackNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;
        while self.index < ctx.child_count() {
            let entry_status = ctx.child_status(self.index).unwrap_or(NodeStatus::Idle);
            let status = ctx.tick_child(self.index)?;
            self.all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Success => {
                    ctx.reset_children();
                    self.index = 0;
                    return Ok(NodeStatus::Success);
                }
                _ => {
                    self.index += 1;
                    if self.asynch
                        && status == NodeStatus::Failure
                        && entry_status == NodeStatus::Idle
                        && self.index < ctx.child_count()
                        && ctx.requires_wake_up()
                    {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
            }
        }
        ctx.reset_children();
        self.index = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Failure
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.index = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A sequence re-evaluated from the first child on every tick.
///
/// Earlier children act as continuously monitored conditions: when one of
/// them fails, the running child further right is halted. A `Running`
/// child halts every sibling back to `Idle`, so the conditions restart
/// from scratch on the next tick. At most one child may be `Running`
/// across the whole lifetime of a pass.
#[derive(Default)]
pub struct ReactiveSequenceNode {
    running_child: Option<usize>,
}

impl BehaviorNode for ReactiveSequenceNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let mut all_skipped = true;
        ctx.set_status(NodeStatus::Running)?;
        for index in 0..ctx.child_count() {
            let status = ctx.tick_child(index)?;
            all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => {
                    for i in 0..ctx.child_count() {
                        if i != index {
                            ctx.halt_child(i);
                        }
                    }
                    match self.running_child {
                        None => self.running_child = Some(index),
                        Some(prev) if prev != index => {
                            return Err(BehaviorError::MultipleRunningChildren(ctx.full_name()))
                        }
                        _ => {}
                    }
                    return Ok(NodeStatus::Running);
                }
                NodeStatus::Failure => {
                    ctx.reset_children();
                    self.running_child = None;
                    return Ok(NodeStatus::Failure);
                }
                _ => {}
            }
        }
        ctx.reset_children();
        self.running_child = None;
        Ok(if all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Success
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.running_child = None;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A fallback re-evaluated from the first child on every tick.
#[derive(Default)]
pub struct ReactiveFallbackNode {
    running_child: Option<usize>,
}

impl BehaviorNode for ReactiveFallbackNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let mut all_skipped = true;
        ctx.set_status(NodeStatus::Running)?;
        for index in 0..ctx.child_count() {
            let status = ctx.tick_child(index)?;
            all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => {
                    for i in 0..ctx.child_count() {
                        if i != index {
                            ctx.halt_child(i);
                        }
                    }
                    match self.running_child {
                        None => self.running_child = Some(index),
                        Some(prev) if prev != index => {
                            return Err(BehaviorError::MultipleRunningChildren(ctx.full_name()))
                        }
                        _ => {}
                    }
                    return Ok(NodeStatus::Running);
                }
                NodeStatus::Success => {
                    ctx.reset_children();
                    self.running_child = None;
                    return Ok(NodeStatus::Success);
                }
                _ => {}
            }
        }
        ctx.reset_children();
        self.running_child = None;
        Ok(if all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Failure
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.running_child = None;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// A negative threshold counts back from the number of children: `-1`
/// means all of them, `-2` all but one, and so on.
fn normalize_threshold(threshold: i32, children: usize) -> usize {
    if threshold < 0 {
        (children as i32 + threshold + 1).max(0) as usize
    } else {
        threshold as usize
    }
}

/// Ticks every incomplete child each pass and completes as soon as either
/// the success or the failure threshold is reached.
pub struct ParallelNode {
    success_threshold: i32,
    failure_threshold: i32,
    read_from_ports: bool,
    completed: HashSet<usize>,
    success_count: usize,
    failure_count: usize,
}

impl Default for ParallelNode {
    fn default() -> Self {
        Self {
            success_threshold: -1,
            failure_threshold: 1,
            read_from_ports: true,
            completed: HashSet::new(),
            success_count: 0,
            failure_count: 0,
        }
    }
}

impl ParallelNode {
    /// For trees assembled in code, bypassing the ports.
    pub fn with_thresholds(success: i32, failure: i32) -> Self {
        Self {
            success_threshold: success,
            failure_threshold: failure,
            read_from_ports: false,
            ..Self::default()
        }
    }

    fn clear(&mut self) {
        self.completed.clear();
        self.success_count = 0;
        self.failure_count = 0;
    }
}

impl BehaviorNode for ParallelNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![
            PortInfo::input("success_count").with_default(-1),
            PortInfo::input("failure_count").with_default(1),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.success_threshold = ctx.get_input("success_count")?;
            self.failure_threshold = ctx.get_input("failure_count")?;
        }
        let children = ctx.child_count();
        let success_goal = normalize_threshold(self.success_threshold, children);
        let failure_goal = normalize_threshold(self.failure_threshold, children);
        if success_goal > children {
            return Err(BehaviorError::ChildCountMismatch {
                node: ctx.full_name(),
                expected: "at least as many children as the success threshold",
                actual: children,
            });
        }
        ctx.set_status(NodeStatus::Running)?;
        // SKIPPED is not a completion: a skipped child is counted for this
        // pass only and re-ticked on the next one
        let mut skipped_count = 0;
        for i in 0..children {
            if self.completed.contains(&i) {
                continue;
            }
            match ctx.tick_child(i)? {
                NodeStatus::Skipped => skipped_count += 1,
                NodeStatus::Success => {
                    self.completed.insert(i);
                    self.success_count += 1;
                }
                NodeStatus::Failure => {
                    self.completed.insert(i);
                    self.failure_count += 1;
                }
                _ => {}
            }
            if skipped_count == children {
                self.clear();
                return Ok(NodeStatus::Skipped);
            }
            // a relative threshold ("all but k") lets skips stand in for
            // successes; an absolute one counts real successes only
            let success_met = if self.success_threshold < 0 {
                self.success_count > 0 && self.success_count + skipped_count >= success_goal
            } else {
                self.success_count >= success_goal
            };
            if success_met {
                self.clear();
                ctx.reset_children();
                return Ok(NodeStatus::Success);
            }
            // fail as soon as success is out of reach, or the failure
            // threshold is met
            if self.failure_count > children - success_goal
                || (failure_goal != 0 && self.failure_count >= failure_goal)
            {
                self.clear();
                ctx.reset_children();
                return Ok(NodeStatus::Failure);
            }
        }
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.clear();
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// Runs all children to completion every pass, then succeeds unless too
/// many of them failed.
pub struct ParallelAllNode {
    max_failures: i32,
    read_from_ports: bool,
    completed: HashSet<usize>,
    failure_count: usize,
}

impl Default for ParallelAllNode {
    fn default() -> Self {
        Self {
            max_failures: 1,
            read_from_ports: true,
            completed: HashSet::new(),
            failure_count: 0,
        }
    }
}

impl ParallelAllNode {
    pub fn with_max_failures(max_failures: i32) -> Self {
        Self {
            max_failures,
            read_from_ports: false,
            ..Self::default()
        }
    }
}

impl BehaviorNode for ParallelAllNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("max_failures").with_default(1)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.max_failures = ctx.get_input("max_failures")?;
        }
        let children = ctx.child_count();
        let failure_goal = normalize_threshold(self.max_failures, children);
        ctx.set_status(NodeStatus::Running)?;
        let mut skipped_count = 0;
        for i in 0..children {
            if self.completed.contains(&i) {
                continue;
            }
            match ctx.tick_child(i)? {
                NodeStatus::Skipped => skipped_count += 1,
                NodeStatus::Success => {
                    self.completed.insert(i);
                }
                NodeStatus::Failure => {
                    self.completed.insert(i);
                    self.failure_count += 1;
                }
                _ => {}
            }
        }
        if skipped_count == children {
            return Ok(NodeStatus::Skipped);
        }
        if skipped_count + self.completed.len() >= children {
            let status = if failure_goal != 0 && self.failure_count >= failure_goal {
                NodeStatus::Failure
            } else {
                NodeStatus::Success
            };
            self.completed.clear();
            self.failure_count = 0;
            ctx.reset_children();
            return Ok(status);
        }
        Ok(NodeStatus::Running)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.completed.clear();
        self.failure_count = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Infinite
    }
}

/// Routes the tick to one of `N` case branches based on the `variable`
/// port; the last child is the default branch.
///
/// Values compare as strings first, then numerically, resolving scripting
/// enum names on either side. Changing the matched branch while another
/// branch is running halts that branch. A case branch that reports
/// `Skipped` defers to the default branch instead of skipping the whole
/// switch.
#[derive(Default)]
pub struct SwitchNode<const N: usize> {
    running_child: Option<usize>,
}

impl<const N: usize> SwitchNode<N> {
    fn matches(variable: &str, case: &str, enums: &HashMap<String, i64>) -> bool {
        if variable == case {
            return true;
        }
        let resolve = |s: &str| -> Option<f64> {
            if let Some(v) = f64::from_port_str(s) {
                return Some(v);
            }
            enums.get(s.trim()).map(|v| *v as f64)
        };
        match (resolve(variable), resolve(case)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    fn settle(&mut self, ctx: &mut Context, index: usize, status: NodeStatus) -> NodeResult {
        if status == NodeStatus::Running {
            self.running_child = Some(index);
        } else {
            self.running_child = None;
            ctx.halt_child(index);
        }
        Ok(status)
    }
}

impl<const N: usize> BehaviorNode for SwitchNode<N> {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        let mut ports = vec![PortInfo::input("variable")];
        ports.extend((1..=N).map(|i| PortInfo::input(format!("case_{}", i))));
        ports
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let children = ctx.child_count();
        if children != N + 1 {
            return Err(BehaviorError::ChildCountMismatch {
                node: ctx.full_name(),
                expected: "one child per case plus a default child",
                actual: children,
            });
        }
        ctx.set_status(NodeStatus::Running)?;

        let mut matched = N;
        if let Ok(variable) = ctx.get_input::<String>("variable") {
            for i in 0..N {
                let case = format!("case_{}", i + 1);
                if let Ok(case) = ctx.get_input::<String>(&case) {
                    if Self::matches(&variable, &case, ctx.enums()) {
                        matched = i;
                        break;
                    }
                }
            }
        }

        if let Some(prev) = self.running_child {
            if prev != matched {
                ctx.halt_child(prev);
                self.running_child = None;
            }
        }

        let status = ctx.tick_child(matched)?;
        if status == NodeStatus::Skipped && matched != N {
            let status = ctx.tick_child(N)?;
            return self.settle(ctx, N, status);
        }
        self.settle(ctx, matched, status)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.running_child = None;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(N + 1)
    }
}

/// Ticks the condition child once, then commits to the `then` or `else`
/// branch until it completes.
#[derive(Default)]
pub struct IfThenElseNode {
    index: usize,
}

impl BehaviorNode for IfThenElseNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let children = ctx.child_count();
        if !(2..=3).contains(&children) {
            return Err(BehaviorError::ChildCountMismatch {
                node: ctx.full_name(),
                expected: "2 or 3 children",
                actual: children,
            });
        }
        ctx.set_status(NodeStatus::Running)?;
        if self.index == 0 {
            match ctx.tick_child(0)? {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Skipped => return Ok(NodeStatus::Skipped),
                NodeStatus::Success => self.index = 1,
                NodeStatus::Failure if children == 3 => self.index = 2,
                NodeStatus::Failure => {
                    ctx.reset_children();
                    return Ok(NodeStatus::Failure);
                }
                NodeStatus::Idle => {
                    return Err(BehaviorError::TickReturnedIdle(ctx.full_name()))
                }
            }
        }
        let status = ctx.tick_child(self.index)?;
        if status == NodeStatus::Running {
            Ok(NodeStatus::Running)
        } else {
            ctx.reset_children();
            self.index = 0;
            Ok(status)
        }
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.index = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(3)
    }
}

/// Like `IfThenElse`, but the condition child is re-ticked on every pass;
/// a flip of its verdict halts the branch that was running.
#[derive(Default)]
pub struct WhileDoElseNode;

impl BehaviorNode for WhileDoElseNode {
    fn node_type(&self) -> NodeType {
        NodeType::Control
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let children = ctx.child_count();
        if !(2..=3).contains(&children) {
            return Err(BehaviorError::ChildCountMismatch {
                node: ctx.full_name(),
                expected: "2 or 3 children",
                actual: children,
            });
        }
        ctx.set_status(NodeStatus::Running)?;
        let status = match ctx.tick_child(0)? {
            NodeStatus::Running => return Ok(NodeStatus::Running),
            NodeStatus::Skipped => return Ok(NodeStatus::Skipped),
            NodeStatus::Success => {
                if children == 3 {
                    ctx.halt_child(2);
                }
                ctx.tick_child(1)?
            }
            NodeStatus::Failure => {
                ctx.halt_child(1);
                if children == 3 {
                    ctx.tick_child(2)?
                } else {
                    NodeStatus::Failure
                }
            }
            NodeStatus::Idle => return Err(BehaviorError::TickReturnedIdle(ctx.full_name())),
        };
        if status == NodeStatus::Running {
            Ok(NodeStatus::Running)
        } else {
            ctx.reset_children();
            Ok(status)
        }
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(3)
    }
}
