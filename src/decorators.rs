//! Decorator nodes: single-child nodes that reshape their child's status
//! or gate when the child runs.

use std::time::{Duration, Instant};

use crate::error::NodeResult;
use crate::node::{BehaviorNode, CompiledScript, Context};
use crate::port::PortInfo;
use crate::signal::WakeTimer;
use crate::{NodeStatus, NodeType, NumChildren};

/// Swaps `Success` and `Failure`; `Running` and `Skipped` pass through.
#[derive(Default)]
pub struct InverterNode;

impl BehaviorNode for InverterNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        ctx.set_status(NodeStatus::Running)?;
        match ctx.tick_child(0)? {
            NodeStatus::Success => {
                ctx.reset_child();
                Ok(NodeStatus::Failure)
            }
            NodeStatus::Failure => {
                ctx.reset_child();
                Ok(NodeStatus::Success)
            }
            status => Ok(status),
        }
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Reports `Success` whenever the child completes, either way.
#[derive(Default)]
pub struct ForceSuccessNode;

impl BehaviorNode for ForceSuccessNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            ctx.reset_child();
            return Ok(NodeStatus::Success);
        }
        Ok(status)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Reports `Failure` whenever the child completes, either way.
#[derive(Default)]
pub struct ForceFailureNode;

impl BehaviorNode for ForceFailureNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            ctx.reset_child();
            return Ok(NodeStatus::Failure);
        }
        Ok(status)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Restarts the child every time it succeeds; completes only when the
/// child fails.
#[derive(Default)]
pub struct KeepRunningUntilFailureNode;

impl BehaviorNode for KeepRunningUntilFailureNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        ctx.set_status(NodeStatus::Running)?;
        match ctx.tick_child(0)? {
            NodeStatus::Failure => {
                ctx.reset_child();
                Ok(NodeStatus::Failure)
            }
            NodeStatus::Success => {
                ctx.reset_child();
                Ok(NodeStatus::Running)
            }
            status => Ok(status),
        }
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Re-runs the child until it has succeeded `num_cycles` times; a single
/// failure fails the whole node. A negative cycle count repeats forever.
///
/// When a wake-up signal is attached, the node yields `Running` between
/// iterations and requests an immediate re-tick instead of looping within
/// a single tick, so a long repetition never starves the rest of the tree.
pub struct RepeatNode {
    num_cycles: i32,
    read_from_ports: bool,
    repeat_count: i32,
    all_skipped: bool,
}

impl Default for RepeatNode {
    fn default() -> Self {
        Self {
            num_cycles: 1,
            read_from_ports: true,
            repeat_count: 0,
            all_skipped: true,
        }
    }
}

impl RepeatNode {
    pub fn with_cycles(num_cycles: i32) -> Self {
        Self {
            num_cycles,
            read_from_ports: false,
            ..Self::default()
        }
    }
}

impl BehaviorNode for RepeatNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("num_cycles").with_default(1)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.num_cycles = ctx.get_input("num_cycles")?;
        }
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;
        while self.num_cycles < 0 || self.repeat_count < self.num_cycles {
            let status = ctx.tick_child(0)?;
            self.all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Failure => {
                    self.repeat_count = 0;
                    ctx.reset_child();
                    return Ok(NodeStatus::Failure);
                }
                NodeStatus::Skipped => {
                    ctx.reset_child();
                    return Ok(NodeStatus::Skipped);
                }
                _ => {
                    self.repeat_count += 1;
                    ctx.reset_child();
                    let more = self.num_cycles < 0 || self.repeat_count < self.num_cycles;
                    if more && ctx.requires_wake_up() {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
            }
        }
        self.repeat_count = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Success
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.repeat_count = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Re-runs the child until it succeeds, giving up after `num_attempts`
/// failures. A negative attempt count retries forever.
pub struct RetryNode {
    num_attempts: i32,
    read_from_ports: bool,
    try_count: i32,
    all_skipped: bool,
}

impl Default for RetryNode {
    fn default() -> Self {
        Self {
            num_attempts: 1,
            read_from_ports: true,
            try_count: 0,
            all_skipped: true,
        }
    }
}

impl RetryNode {
    pub fn with_attempts(num_attempts: i32) -> Self {
        Self {
            num_attempts,
            read_from_ports: false,
            ..Self::default()
        }
    }
}

impl BehaviorNode for RetryNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("num_attempts").with_default(1)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.num_attempts = ctx.get_input("num_attempts")?;
        }
        if ctx.status() == NodeStatus::Idle {
            self.all_skipped = true;
        }
        ctx.set_status(NodeStatus::Running)?;
        while self.num_attempts < 0 || self.try_count < self.num_attempts {
            let status = ctx.tick_child(0)?;
            self.all_skipped &= status == NodeStatus::Skipped;
            match status {
                NodeStatus::Running => return Ok(NodeStatus::Running),
                NodeStatus::Success => {
                    self.try_count = 0;
                    ctx.reset_child();
                    return Ok(NodeStatus::Success);
                }
                NodeStatus::Skipped => {
                    ctx.reset_child();
                    return Ok(NodeStatus::Skipped);
                }
                _ => {
                    self.try_count += 1;
                    ctx.reset_child();
                    let more = self.num_attempts < 0 || self.try_count < self.num_attempts;
                    if more && ctx.requires_wake_up() {
                        ctx.emit_wake_up();
                        return Ok(NodeStatus::Running);
                    }
                }
            }
        }
        self.try_count = 0;
        Ok(if self.all_skipped {
            NodeStatus::Skipped
        } else {
            NodeStatus::Failure
        })
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.try_count = 0;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Fails if the child has not completed within `msec` milliseconds,
/// halting it.
///
/// The deadline check runs on the tick thread; the timer thread only
/// guarantees a wake-up at expiry, so an idle tree still notices the
/// timeout promptly.
pub struct TimeoutNode {
    msec: u64,
    read_from_ports: bool,
    deadline: Option<Instant>,
    timer: Option<WakeTimer>,
}

impl Default for TimeoutNode {
    fn default() -> Self {
        Self {
            msec: 0,
            read_from_ports: true,
            deadline: None,
            timer: None,
        }
    }
}

impl TimeoutNode {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            msec: timeout.as_millis() as u64,
            read_from_ports: false,
            ..Self::default()
        }
    }
}

impl BehaviorNode for TimeoutNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("msec").with_default(0)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.msec = ctx.get_input("msec")?;
        }
        if ctx.status() == NodeStatus::Idle && self.msec > 0 {
            let deadline = Instant::now() + Duration::from_millis(self.msec);
            self.deadline = Some(deadline);
            self.timer = Some(WakeTimer::start(deadline, ctx.wake_up()));
        }
        ctx.set_status(NodeStatus::Running)?;
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.deadline = None;
                self.timer = None;
                ctx.reset_child();
                return Ok(NodeStatus::Failure);
            }
        }
        let status = ctx.tick_child(0)?;
        if status != NodeStatus::Running {
            self.deadline = None;
            self.timer = None;
            ctx.reset_child();
        }
        Ok(status)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.deadline = None;
        self.timer = None;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Waits `delay_msec` milliseconds before ticking the child for the first
/// time.
pub struct DelayNode {
    msec: u64,
    read_from_ports: bool,
    deadline: Option<Instant>,
    timer: Option<WakeTimer>,
    delay_complete: bool,
}

impl Default for DelayNode {
    fn default() -> Self {
        Self {
            msec: 0,
            read_from_ports: true,
            deadline: None,
            timer: None,
            delay_complete: false,
        }
    }
}

impl DelayNode {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            msec: delay.as_millis() as u64,
            read_from_ports: false,
            ..Self::default()
        }
    }
}

impl BehaviorNode for DelayNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("delay_msec").with_default(0)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        if self.read_from_ports {
            self.msec = ctx.get_input("delay_msec")?;
        }
        if ctx.status() == NodeStatus::Idle {
            self.delay_complete = false;
            if self.msec > 0 {
                let deadline = Instant::now() + Duration::from_millis(self.msec);
                self.deadline = Some(deadline);
                self.timer = Some(WakeTimer::start(deadline, ctx.wake_up()));
            }
        }
        ctx.set_status(NodeStatus::Running)?;
        if !self.delay_complete {
            match self.deadline {
                Some(deadline) if Instant::now() < deadline => return Ok(NodeStatus::Running),
                _ => {
                    self.delay_complete = true;
                    self.deadline = None;
                    self.timer = None;
                }
            }
        }
        let status = ctx.tick_child(0)?;
        if status != NodeStatus::Running {
            self.delay_complete = false;
            ctx.reset_child();
        }
        Ok(status)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.deadline = None;
        self.timer = None;
        self.delay_complete = false;
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Runs the child to completion once, then keeps reporting without
/// re-running it: `Skipped` when the `then_skip` port is true (the
/// default), the recorded status otherwise.
#[derive(Default)]
pub struct RunOnceNode {
    returned: Option<NodeStatus>,
}

impl BehaviorNode for RunOnceNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("then_skip").with_default(true)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let then_skip = ctx.get_input("then_skip").unwrap_or(true);
        if let Some(returned) = self.returned {
            return Ok(if then_skip {
                NodeStatus::Skipped
            } else {
                returned
            });
        }
        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            self.returned = Some(status);
            ctx.reset_child();
        }
        Ok(status)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// Gates the child behind a condition script evaluated on every tick.
/// While the script holds, the child runs; the moment it stops holding,
/// a running child is interrupted and the `else` status is reported.
pub struct PreconditionNode {
    script: CompiledScript,
    else_status: NodeStatus,
}

impl PreconditionNode {
    pub fn new(script: CompiledScript) -> Self {
        Self {
            script,
            else_status: NodeStatus::Failure,
        }
    }

    pub fn with_else(mut self, else_status: NodeStatus) -> Self {
        self.else_status = else_status;
        self
    }
}

impl BehaviorNode for PreconditionNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decorator
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("else").with_default(NodeStatus::Failure)]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let else_status = ctx.get_input("else").unwrap_or(self.else_status);
        if (self.script.func)(ctx.blackboard(), ctx.enums()) {
            ctx.set_status(NodeStatus::Running)?;
            let status = ctx.tick_child(0)?;
            if status.is_completed() {
                ctx.reset_child();
            }
            Ok(status)
        } else {
            ctx.reset_child();
            Ok(else_status)
        }
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

/// The boundary node holding a nested tree as its single child.
///
/// Execution is transparent: the child's status is forwarded unchanged.
/// What the boundary actually provides is the blackboard scope split, set
/// up when the tree is assembled.
pub struct SubTreeNode {
    subtree_id: String,
}

impl SubTreeNode {
    pub fn new(subtree_id: impl Into<String>) -> Self {
        Self {
            subtree_id: subtree_id.into(),
        }
    }

    pub fn subtree_id(&self) -> &str {
        &self.subtree_id
    }
}

impl BehaviorNode for SubTreeNode {
    fn node_type(&self) -> NodeType {
        NodeType::SubTree
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        ctx.set_status(NodeStatus::Running)?;
        let status = ctx.tick_child(0)?;
        if status.is_completed() {
            ctx.reset_child();
        }
        Ok(status)
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(1)
    }
}

#[cfg(test)]
mod test;
