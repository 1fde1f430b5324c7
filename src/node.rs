//! The node execution contract: configuration, status storage, the
//! [`BehaviorNode`] trait and the [`TreeNode`] container that wraps every
//! behavior with pre/post conditions, callback injection and halt
//! propagation.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::blackboard::Blackboard;
use crate::convert::FromPortString;
use crate::error::{AddChildError, AddChildResult, BehaviorError, NodeResult, PortError};
use crate::port::{parse_binding, Binding, PortInfo, TreeNodeManifest};
use crate::signal::{StatusChangeSignal, WakeUpSignal};
use crate::{NodeStatus, NodeType, NumChildren, PostCond, PreCond};

/// A pre/post condition script, compiled by the (external) scripting
/// engine into a closure over the blackboard and the enum table.
pub type ScriptFn = Arc<dyn Fn(&Blackboard, &HashMap<String, i64>) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct CompiledScript {
    pub source: String,
    pub func: ScriptFn,
}

impl CompiledScript {
    pub fn new(
        source: impl Into<String>,
        func: impl Fn(&Blackboard, &HashMap<String, i64>) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: source.into(),
            func: Arc::new(func),
        }
    }
}

/// Substitution callback: may override the tick outcome when it returns a
/// completed status. Used by test and mocking infrastructure.
pub type PreTickCallback = Arc<dyn Fn(&TreeNode) -> NodeStatus + Send + Sync>;

/// Post-tick callback: may override a completed result.
pub type PostTickCallback = Arc<dyn Fn(&TreeNode, NodeStatus) -> NodeStatus + Send + Sync>;

/// Everything the builder wires into a node instance.
pub struct NodeConfig {
    pub blackboard: Arc<Blackboard>,
    pub enums: Arc<HashMap<String, i64>>,
    /// Port name → binding (literal, `{key}` reference, or `=`).
    pub input_ports: HashMap<String, String>,
    pub output_ports: HashMap<String, String>,
    pub manifest: Option<Arc<TreeNodeManifest>>,
    /// Tree-unique numeric id.
    pub uid: u16,
    /// Full dotted path, used for debugging and substitution matching.
    pub path: String,
    pub pre_conditions: HashMap<PreCond, CompiledScript>,
    pub post_conditions: HashMap<PostCond, CompiledScript>,
}

impl NodeConfig {
    pub fn new(blackboard: Arc<Blackboard>) -> Self {
        Self {
            blackboard,
            enums: Arc::new(HashMap::new()),
            input_ports: HashMap::new(),
            output_ports: HashMap::new(),
            manifest: None,
            uid: 0,
            path: String::new(),
            pre_conditions: HashMap::new(),
            post_conditions: HashMap::new(),
        }
    }

    pub fn with_input(mut self, port: impl Into<String>, binding: impl Into<String>) -> Self {
        self.input_ports.insert(port.into(), binding.into());
        self
    }

    pub fn with_output(mut self, port: impl Into<String>, binding: impl Into<String>) -> Self {
        self.output_ports.insert(port.into(), binding.into());
        self
    }

    pub fn with_pre_condition(mut self, kind: PreCond, script: CompiledScript) -> Self {
        self.pre_conditions.insert(kind, script);
        self
    }

    pub fn with_post_condition(mut self, kind: PostCond, script: CompiledScript) -> Self {
        self.post_conditions.insert(kind, script);
        self
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new(Blackboard::root())
    }
}

struct StatusCellInner {
    status: Mutex<NodeStatus>,
    signal: StatusChangeSignal,
}

/// The lock-guarded status of a node, shared with worker threads.
#[derive(Clone)]
pub struct StatusCell {
    inner: Arc<StatusCellInner>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self {
            inner: Arc::new(StatusCellInner {
                status: Mutex::new(NodeStatus::Idle),
                signal: StatusChangeSignal::default(),
            }),
        }
    }
}

impl StatusCell {
    pub fn get(&self) -> NodeStatus {
        *self.inner.status.lock()
    }

    /// Stores a new status and notifies listeners on an actual change.
    /// `Idle` is rejected; resetting is an explicit, separate operation.
    pub fn set(&self, node: &str, status: NodeStatus) -> Result<(), BehaviorError> {
        if status == NodeStatus::Idle {
            return Err(BehaviorError::SetStatusIdle {
                node: node.to_owned(),
            });
        }
        let prev = {
            let mut guard = self.inner.status.lock();
            std::mem::replace(&mut *guard, status)
        };
        if prev != status {
            trace!(node, from = prev.as_str(), to = status.as_str(), "status");
            self.inner.signal.notify(prev, status);
        }
        Ok(())
    }

    pub fn reset(&self, node: &str) {
        let prev = {
            let mut guard = self.inner.status.lock();
            std::mem::replace(&mut *guard, NodeStatus::Idle)
        };
        if prev != NodeStatus::Idle {
            trace!(node, from = prev.as_str(), "reset");
            self.inner.signal.notify(prev, NodeStatus::Idle);
        }
    }

    pub fn subscribe(&self, f: impl Fn(NodeStatus, NodeStatus) + Send + Sync + 'static) {
        self.inner.signal.subscribe(f);
    }
}

pub(crate) struct NodeState {
    pub(crate) name: String,
    pub(crate) registration_id: String,
    pub(crate) config: NodeConfig,
    pub(crate) status: StatusCell,
    pub(crate) wake_up: Option<Arc<WakeUpSignal>>,
}

impl NodeState {
    fn full_name(&self) -> String {
        if self.config.path.is_empty() {
            self.name.clone()
        } else {
            self.config.path.clone()
        }
    }
}

/// The per-tick view handed to a behavior: its own state plus mutable
/// access to its children.
pub struct Context<'a> {
    state: &'a NodeState,
    children: &'a mut Vec<TreeNode>,
}

impl Context<'_> {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn path(&self) -> &str {
        &self.state.config.path
    }

    pub(crate) fn full_name(&self) -> String {
        self.state.full_name()
    }

    pub fn status(&self) -> NodeStatus {
        self.state.status.get()
    }

    pub fn set_status(&self, status: NodeStatus) -> Result<(), BehaviorError> {
        self.state.status.set(&self.state.name, status)
    }

    /// A clonable handle to this node's status, for worker threads.
    pub fn status_cell(&self) -> StatusCell {
        self.state.status.clone()
    }

    pub fn blackboard(&self) -> &Arc<Blackboard> {
        &self.state.config.blackboard
    }

    pub fn enums(&self) -> &HashMap<String, i64> {
        &self.state.config.enums
    }

    pub fn wake_up(&self) -> Option<Arc<WakeUpSignal>> {
        self.state.wake_up.clone()
    }

    /// True when the tree driver attached its wake-up signal, i.e. yielding
    /// `Running` will get this node re-ticked promptly.
    pub fn requires_wake_up(&self) -> bool {
        self.state.wake_up.is_some()
    }

    pub fn emit_wake_up(&self) {
        if let Some(wake_up) = &self.state.wake_up {
            wake_up.emit_signal();
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child_status(&self, index: usize) -> Option<NodeStatus> {
        self.children.get(index).map(|c| c.status())
    }

    pub fn tick_child(&mut self, index: usize) -> NodeResult {
        match self.children.get_mut(index) {
            Some(child) => child.execute_tick(),
            None => Err(BehaviorError::MissingChild(self.full_name(), index)),
        }
    }

    /// Halts the child if it is running, then resets it to `Idle`.
    pub fn halt_child(&mut self, index: usize) {
        if let Some(child) = self.children.get_mut(index) {
            child.reset_node();
        }
    }

    pub fn reset_children(&mut self) {
        for child in self.children.iter_mut() {
            child.reset_node();
        }
    }

    /// Decorator shorthand for `halt_child(0)`.
    pub fn reset_child(&mut self) {
        self.halt_child(0);
    }

    /// Reads an input port, in order of precedence: the bound literal
    /// (parsed, with the enum table as fallback), the referenced blackboard
    /// entry (a stored string parses on the fly), or the declared default.
    pub fn get_input<T>(&self, port: &str) -> Result<T, PortError>
    where
        T: Any + Clone + Send + FromPortString,
    {
        let config = &self.state.config;
        let raw = config
            .input_ports
            .get(port)
            .map(String::as_str)
            .unwrap_or("");
        if raw.is_empty() {
            if let Some(default) = self.declared_default(port) {
                return self.parse_literal(port, &default);
            }
            return Err(PortError::MissingPort {
                node: self.full_name(),
                port: port.to_owned(),
            });
        }
        match parse_binding(raw) {
            Binding::Literal(s) => self.parse_literal(port, s),
            Binding::SameName => self.read_key(port, port),
            Binding::Reference(key) => self.read_key(port, key),
        }
    }

    /// Writes an output port through its blackboard binding.
    pub fn set_output<T: Any + Send + Sync>(&self, port: &str, value: T) -> Result<(), PortError> {
        let config = &self.state.config;
        let raw = config
            .output_ports
            .get(port)
            .ok_or_else(|| PortError::NotAnOutputPort {
                node: self.full_name(),
                port: port.to_owned(),
            })?;
        let key = match parse_binding(raw) {
            Binding::SameName => port,
            Binding::Reference(key) => key,
            Binding::Literal(_) => {
                return Err(PortError::OutputToLiteral {
                    node: self.full_name(),
                    port: port.to_owned(),
                })
            }
        };
        config.blackboard.set(key, value).map_err(PortError::from)
    }

    /// Resolves a port to its blackboard key, for nodes that need raw
    /// entry access. Returns `None` for unbound or literal-bound ports.
    pub fn resolved_key(&self, port: &str) -> Option<String> {
        let config = &self.state.config;
        let raw = config
            .input_ports
            .get(port)
            .or_else(|| config.output_ports.get(port))?;
        match parse_binding(raw) {
            Binding::SameName => Some(port.to_owned()),
            Binding::Reference(key) => Some(key.to_owned()),
            Binding::Literal(_) => None,
        }
    }

    fn declared_default(&self, port: &str) -> Option<String> {
        self.state
            .config
            .manifest
            .as_ref()
            .and_then(|m| m.port(port))
            .and_then(|p| p.default_value.clone())
    }

    fn parse_literal<T>(&self, port: &str, s: &str) -> Result<T, PortError>
    where
        T: FromPortString,
    {
        if let Some(value) = T::from_port_str(s) {
            return Ok(value);
        }
        // not directly parsable; maybe a scripting enum
        if let Some(resolved) = self.state.config.enums.get(s.trim()) {
            if let Some(value) = T::from_port_str(&resolved.to_string()) {
                return Ok(value);
            }
        }
        Err(PortError::Conversion {
            node: self.full_name(),
            port: port.to_owned(),
            value: s.to_owned(),
            wanted: type_name::<T>(),
        })
    }

    fn read_key<T>(&self, port: &str, key: &str) -> Result<T, PortError>
    where
        T: Any + Clone + Send + FromPortString,
    {
        let entry = self
            .state
            .config
            .blackboard
            .entry(key)
            .filter(|e| e.is_set())
            .ok_or_else(|| PortError::UnresolvedReference {
                node: self.full_name(),
                port: port.to_owned(),
                key: key.to_owned(),
            })?;
        entry.get_parse::<T>().ok_or_else(|| PortError::Conversion {
            node: self.full_name(),
            port: port.to_owned(),
            value: entry.type_name().to_owned(),
            wanted: type_name::<T>(),
        })
    }
}

/// The behavior of a node: the algorithm ticked by its [`TreeNode`]
/// container. Implement this for leaves; control and decorator behaviors
/// are provided by the crate.
pub trait BehaviorNode: Send {
    fn node_type(&self) -> NodeType;

    /// Ports this node type declares. Collected by the registry into the
    /// type's manifest at registration time.
    fn provided_ports(&self) -> Vec<PortInfo> {
        vec![]
    }

    fn tick(&mut self, ctx: &mut Context) -> NodeResult;

    /// Interrupts a `Running` node. The default propagates the halt to any
    /// running children; override to also clear internal bookkeeping.
    fn halt(&mut self, ctx: &mut Context) {
        ctx.reset_children();
    }

    fn max_children(&self) -> NumChildren {
        NumChildren::Finite(0)
    }
}

/// A node instance in the tree: the behavior plus its identity, status
/// cell, configuration and owned children.
pub struct TreeNode {
    state: NodeState,
    behavior: Box<dyn BehaviorNode>,
    children: Vec<TreeNode>,
    substitution: Mutex<Option<PreTickCallback>>,
    post_tick: Mutex<Option<PostTickCallback>>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>, config: NodeConfig, behavior: Box<dyn BehaviorNode>) -> Self {
        Self {
            state: NodeState {
                name: name.into(),
                registration_id: String::new(),
                config,
                status: StatusCell::default(),
                wake_up: None,
            },
            behavior,
            children: Vec::new(),
            substitution: Mutex::new(None),
            post_tick: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn path(&self) -> &str {
        &self.state.config.path
    }

    pub fn uid(&self) -> u16 {
        self.state.config.uid
    }

    pub fn registration_id(&self) -> &str {
        &self.state.registration_id
    }

    pub fn set_registration_id(&mut self, id: impl Into<String>) {
        self.state.registration_id = id.into();
    }

    pub fn node_type(&self) -> NodeType {
        self.behavior.node_type()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.state.config
    }

    pub fn config_mut(&mut self) -> &mut NodeConfig {
        &mut self.state.config
    }

    pub fn status(&self) -> NodeStatus {
        self.state.status.get()
    }

    pub fn status_cell(&self) -> StatusCell {
        self.state.status.clone()
    }

    pub fn subscribe_status_change(
        &self,
        f: impl Fn(NodeStatus, NodeStatus) + Send + Sync + 'static,
    ) {
        self.state.status.subscribe(f);
    }

    pub fn set_substitution_callback(&self, callback: PreTickCallback) {
        *self.substitution.lock() = Some(callback);
    }

    pub fn set_post_tick_callback(&self, callback: PostTickCallback) {
        *self.post_tick.lock() = Some(callback);
    }

    pub fn add_child(&mut self, child: TreeNode) -> AddChildResult {
        if NumChildren::Finite(self.children.len()) < self.behavior.max_children() {
            self.children.push(child);
            Ok(())
        } else {
            Err(AddChildError::TooManyNodes)
        }
    }

    pub fn children(&self) -> &[TreeNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [TreeNode] {
        &mut self.children
    }

    /// Attaches the tree's wake-up signal to this node and all of its
    /// descendants.
    pub fn set_wake_up(&mut self, wake_up: Arc<WakeUpSignal>) {
        self.state.wake_up = Some(wake_up.clone());
        for child in &mut self.children {
            child.set_wake_up(wake_up.clone());
        }
    }

    /// Depth-first pre-order walk over this node and its descendants.
    pub fn visit_mut(&mut self, f: &mut dyn FnMut(&mut TreeNode)) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    /// The only externally called tick entry point. Wraps the behavior's
    /// own `tick` with pre-condition evaluation, callback injection,
    /// post-condition scripts and status persistence.
    pub fn execute_tick(&mut self) -> NodeResult {
        let prev_status = self.state.status.get();

        let mut new_status = if let Some(short_circuit) = self.check_pre_conditions()? {
            short_circuit
        } else {
            let mut substituted = None;
            if !prev_status.is_completed() {
                let callback = self.substitution.lock().clone();
                if let Some(callback) = callback {
                    let overridden = callback(self);
                    if overridden.is_completed() {
                        substituted = Some(overridden);
                    }
                }
            }
            match substituted {
                Some(status) => status,
                None => {
                    let mut ctx = Context {
                        state: &self.state,
                        children: &mut self.children,
                    };
                    let status = self.behavior.tick(&mut ctx)?;
                    if status == NodeStatus::Idle {
                        return Err(BehaviorError::TickReturnedIdle(self.state.full_name()));
                    }
                    status
                }
            }
        };

        self.run_post_conditions(new_status);

        if new_status.is_completed() {
            let callback = self.post_tick.lock().clone();
            if let Some(callback) = callback {
                let overridden = callback(self, new_status);
                if overridden.is_completed() {
                    new_status = overridden;
                }
            }
        }

        // preserve the stored status if skipped, so the node re-evaluates
        // identically next tick, but still communicate SKIPPED upward
        if new_status != NodeStatus::Skipped {
            self.state.status.set(&self.state.name, new_status)?;
        }
        Ok(new_status)
    }

    /// Halts the behavior (recursively, through its children) and always
    /// fires the `OnHalted` post-condition script.
    pub fn halt_node(&mut self) {
        debug!(node = %self.state.name, "halt");
        let mut ctx = Context {
            state: &self.state,
            children: &mut self.children,
        };
        self.behavior.halt(&mut ctx);
        if let Some(script) = self.state.config.post_conditions.get(&PostCond::OnHalted) {
            (script.func)(&self.state.config.blackboard, &self.state.config.enums);
        }
    }

    /// Halts the node if it is running, then resets its status to `Idle`.
    pub fn reset_node(&mut self) {
        if self.state.status.get() == NodeStatus::Running {
            self.halt_node();
        }
        self.state.status.reset(&self.state.name);
    }

    pub fn reset_status(&mut self) {
        self.state.status.reset(&self.state.name);
    }

    fn check_pre_conditions(&mut self) -> Result<Option<NodeStatus>, BehaviorError> {
        if self.state.config.pre_conditions.is_empty() {
            return Ok(None);
        }
        let status = self.state.status.get();
        for kind in PreCond::ALL {
            let Some(script) = self.state.config.pre_conditions.get(&kind) else {
                continue;
            };
            match status {
                // most pre-conditions only apply before the node starts
                NodeStatus::Idle | NodeStatus::Skipped => {
                    let holds =
                        (script.func)(&self.state.config.blackboard, &self.state.config.enums);
                    if holds {
                        match kind {
                            PreCond::FailureIf => return Ok(Some(NodeStatus::Failure)),
                            PreCond::SuccessIf => return Ok(Some(NodeStatus::Success)),
                            PreCond::SkipIf => return Ok(Some(NodeStatus::Skipped)),
                            PreCond::WhileTrue => {}
                        }
                    } else if kind == PreCond::WhileTrue {
                        return Ok(Some(NodeStatus::Skipped));
                    }
                }
                // _while is the one condition re-checked while RUNNING;
                // turning false interrupts the node from the outside
                NodeStatus::Running if kind == PreCond::WhileTrue => {
                    let holds =
                        (script.func)(&self.state.config.blackboard, &self.state.config.enums);
                    if !holds {
                        self.halt_node();
                        return Ok(Some(NodeStatus::Skipped));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }

    fn run_post_conditions(&self, status: NodeStatus) {
        let run = |kind: PostCond| {
            if let Some(script) = self.state.config.post_conditions.get(&kind) {
                (script.func)(&self.state.config.blackboard, &self.state.config.enums);
            }
        };
        match status {
            NodeStatus::Success => run(PostCond::OnSuccess),
            NodeStatus::Failure => run(PostCond::OnFailure),
            _ => {}
        }
        run(PostCond::Always);
    }
}
