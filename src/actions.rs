//! Leaf node bases and the built-in action nodes.
//!
//! Three flavors of leaf are provided. [`SyncActionNode`] wraps a behavior
//! that must finish within a single tick. A [`StatefulActionNode`] is
//! polled by the tick thread through the [`StatefulAction`] lifecycle. A
//! [`ThreadedAction`] runs its blocking body on a worker thread and
//! publishes the outcome through the node's status cell.

use std::any::Any;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::blackboard::Blackboard;
use crate::error::{BehaviorError, NodeResult, PortError};
use crate::node::{BehaviorNode, Context};
use crate::port::PortInfo;
use crate::signal::WakeTimer;
use crate::{NodeStatus, NodeType};

/// An action defined by a closure, for trees assembled in code.
pub struct SimpleAction {
    tick_fn: Box<dyn FnMut(&mut Context) -> NodeResult + Send>,
}

impl SimpleAction {
    pub fn new(tick_fn: impl FnMut(&mut Context) -> NodeResult + Send + 'static) -> Self {
        Self {
            tick_fn: Box::new(tick_fn),
        }
    }
}

impl BehaviorNode for SimpleAction {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        (self.tick_fn)(ctx)
    }
}

/// Wrapper enforcing that the inner behavior completes in one tick.
pub struct SyncActionNode<T: BehaviorNode>(pub T);

impl<T: BehaviorNode> BehaviorNode for SyncActionNode<T> {
    fn node_type(&self) -> NodeType {
        self.0.node_type()
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        self.0.provided_ports()
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        match self.0.tick(ctx)? {
            NodeStatus::Running => Err(BehaviorError::SyncActionRunning(ctx.full_name())),
            status => Ok(status),
        }
    }
}

/// The lifecycle of an action polled across ticks.
///
/// `on_start` runs on the first tick, `on_running` on every following tick
/// while the action reports `Running`, and `on_halted` when the action is
/// interrupted from above.
pub trait StatefulAction: Send {
    fn on_start(&mut self, ctx: &mut Context) -> NodeResult;

    fn on_running(&mut self, ctx: &mut Context) -> NodeResult;

    fn on_halted(&mut self) {}

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![]
    }
}

/// Adapter running a [`StatefulAction`] as a tree node.
pub struct StatefulActionNode<T: StatefulAction> {
    inner: T,
    halt_requested: Arc<AtomicBool>,
}

impl<T: StatefulAction> StatefulActionNode<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            halt_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::SeqCst)
    }
}

impl<T: StatefulAction> BehaviorNode for StatefulActionNode<T> {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        self.inner.provided_ports()
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let status = match ctx.status() {
            NodeStatus::Idle => {
                self.halt_requested.store(false, Ordering::SeqCst);
                ctx.set_status(NodeStatus::Running)?;
                self.inner.on_start(ctx)?
            }
            NodeStatus::Running => self.inner.on_running(ctx)?,
            completed => return Ok(completed),
        };
        if status == NodeStatus::Idle {
            return Err(BehaviorError::TickReturnedIdle(ctx.full_name()));
        }
        Ok(status)
    }

    fn halt(&mut self, ctx: &mut Context) {
        self.halt_requested.store(true, Ordering::SeqCst);
        if ctx.status() == NodeStatus::Running {
            self.inner.on_halted();
        }
    }
}

/// The view of the tree a [`ThreadedAction`] body gets on its worker
/// thread. The body is expected to poll [`ThreadedContext::is_halt_requested`]
/// at a reasonable cadence.
pub struct ThreadedContext {
    blackboard: Arc<Blackboard>,
    halt_requested: Arc<AtomicBool>,
}

impl ThreadedContext {
    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.blackboard
    }

    pub fn is_halt_requested(&self) -> bool {
        self.halt_requested.load(Ordering::SeqCst)
    }
}

/// An action whose body runs on its own thread.
///
/// The first tick spawns the worker and reports `Running`; the worker
/// publishes its final status directly into the node's status cell and
/// emits the wake-up signal, so the next driver pass observes it. Halting
/// joins the worker before returning, which guarantees a halted node's
/// status is never overwritten afterwards.
pub struct ThreadedAction {
    body: Arc<dyn Fn(&ThreadedContext) -> NodeStatus + Send + Sync>,
    halt_requested: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ThreadedAction {
    pub fn new(body: impl Fn(&ThreadedContext) -> NodeStatus + Send + Sync + 'static) -> Self {
        Self {
            body: Arc::new(body),
            halt_requested: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl BehaviorNode for ThreadedAction {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        match ctx.status() {
            NodeStatus::Idle => {
                // a worker left over from a completed run is joined lazily
                if let Some(handle) = self.worker.take() {
                    let _ = handle.join();
                }
                self.halt_requested.store(false, Ordering::SeqCst);
                ctx.set_status(NodeStatus::Running)?;
                let body = self.body.clone();
                let thread_ctx = ThreadedContext {
                    blackboard: ctx.blackboard().clone(),
                    halt_requested: self.halt_requested.clone(),
                };
                let status_cell = ctx.status_cell();
                let wake_up = ctx.wake_up();
                let name = ctx.name().to_owned();
                let handle = thread::Builder::new().name(name.clone()).spawn(move || {
                    let status = body(&thread_ctx);
                    if !thread_ctx.is_halt_requested() {
                        // a body that neither succeeded nor failed is a failure
                        let status = if status.is_completed() {
                            status
                        } else {
                            NodeStatus::Failure
                        };
                        let _ = status_cell.set(&name, status);
                        if let Some(wake_up) = wake_up {
                            wake_up.emit_signal();
                        }
                    }
                })?;
                self.worker = Some(handle);
                Ok(NodeStatus::Running)
            }
            // the worker publishes completion into the cell on its own
            status => Ok(status),
        }
    }

    fn halt(&mut self, _ctx: &mut Context) {
        self.halt_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
pub struct AlwaysSuccess;

impl BehaviorNode for AlwaysSuccess {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        Ok(NodeStatus::Success)
    }
}

#[derive(Default)]
pub struct AlwaysFailure;

impl BehaviorNode for AlwaysFailure {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn tick(&mut self, _ctx: &mut Context) -> NodeResult {
        Ok(NodeStatus::Failure)
    }
}

/// Copies a value into a blackboard entry.
///
/// When the `value` port is itself a `{key}` reference, the referenced
/// entry is copied with its concrete type intact; a literal is stored as a
/// string and converts on first typed read.
#[derive(Default)]
pub struct SetBlackboard;

impl BehaviorNode for SetBlackboard {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![
            PortInfo::input("value").with_description("value to write"),
            PortInfo::inout("output_key").with_description("entry to write to"),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let target = ctx
            .resolved_key("output_key")
            .ok_or_else(|| PortError::MissingPort {
                node: ctx.full_name(),
                port: "output_key".to_owned(),
            })?;
        match ctx.resolved_key("value") {
            Some(source) => {
                let unresolved = || PortError::UnresolvedReference {
                    node: ctx.full_name(),
                    port: "value".to_owned(),
                    key: source.clone(),
                };
                let entry = ctx
                    .blackboard()
                    .entry(&source)
                    .filter(|e| e.is_set())
                    .ok_or_else(unresolved)?;
                let value = entry.value_any().ok_or_else(unresolved)?;
                ctx.blackboard()
                    .set_any(&target, value, entry.type_name())
                    .map_err(BehaviorError::from)?;
            }
            None => {
                let value: String = ctx.get_input("value")?;
                ctx.blackboard()
                    .set(&target, value)
                    .map_err(PortError::from)?;
            }
        }
        Ok(NodeStatus::Success)
    }
}

/// Removes an entry from the current blackboard scope.
#[derive(Default)]
pub struct UnsetBlackboard;

impl BehaviorNode for UnsetBlackboard {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("key").with_description("entry to remove")]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let key: String = ctx.get_input("key")?;
        ctx.blackboard().unset(&key);
        Ok(NodeStatus::Success)
    }
}

/// Stays `Running` for `msec` milliseconds, then succeeds.
///
/// The wait is driven by a [`WakeTimer`], so the tree sleeps instead of
/// polling; the elapsed check itself happens on the tick thread.
#[derive(Default)]
pub struct SleepNode {
    deadline: Option<Instant>,
    timer: Option<WakeTimer>,
}

impl StatefulAction for SleepNode {
    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("msec").with_default(0)]
    }

    fn on_start(&mut self, ctx: &mut Context) -> NodeResult {
        let msec: u64 = ctx.get_input("msec")?;
        if msec == 0 {
            return Ok(NodeStatus::Success);
        }
        let deadline = Instant::now() + Duration::from_millis(msec);
        self.deadline = Some(deadline);
        self.timer = Some(WakeTimer::start(deadline, ctx.wake_up()));
        Ok(NodeStatus::Running)
    }

    fn on_running(&mut self, _ctx: &mut Context) -> NodeResult {
        match self.deadline {
            Some(deadline) if Instant::now() < deadline => Ok(NodeStatus::Running),
            _ => {
                self.deadline = None;
                self.timer = None;
                Ok(NodeStatus::Success)
            }
        }
    }

    fn on_halted(&mut self) {
        self.deadline = None;
        self.timer = None;
    }
}

/// A thread-safe FIFO shared through the blackboard as
/// `Arc<ProtectedQueue<T>>`.
#[derive(Default)]
pub struct ProtectedQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> ProtectedQueue<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(items.into_iter().collect()),
        })
    }

    pub fn push(&self, item: T) {
        self.items.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Pops the front of a shared queue into `popped_item`; fails once the
/// queue is empty, which pairs naturally with `KeepRunningUntilFailure`.
pub struct PopFromQueue<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for PopFromQueue<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> PopFromQueue<T> {
    fn queue(ctx: &Context, port: &str) -> Result<Arc<ProtectedQueue<T>>, PortError> {
        let key = ctx.resolved_key(port).ok_or_else(|| PortError::MissingPort {
            node: ctx.full_name(),
            port: port.to_owned(),
        })?;
        ctx.blackboard()
            .get::<Arc<ProtectedQueue<T>>>(&key)
            .ok_or_else(|| PortError::UnresolvedReference {
                node: ctx.full_name(),
                port: port.to_owned(),
                key,
            })
    }
}

impl<T: Any + Send + Sync> BehaviorNode for PopFromQueue<T> {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![
            PortInfo::input("queue"),
            PortInfo::output("popped_item"),
        ]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let queue = Self::queue(ctx, "queue")?;
        match queue.pop() {
            Some(item) => {
                ctx.set_output("popped_item", item)?;
                Ok(NodeStatus::Success)
            }
            None => Ok(NodeStatus::Failure),
        }
    }
}

/// Reports the current length of a shared queue on the `size` port.
pub struct QueueSize<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for QueueSize<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> BehaviorNode for QueueSize<T> {
    fn node_type(&self) -> NodeType {
        NodeType::Action
    }

    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![PortInfo::input("queue"), PortInfo::output("size")]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult {
        let queue = PopFromQueue::<T>::queue(ctx, "queue")?;
        ctx.set_output("size", queue.len())?;
        Ok(NodeStatus::Success)
    }
}
