//! Node type registry: maps type names to constructors and their port
//! manifests.

use std::collections::HashMap;
use std::sync::Arc;

use crate::actions::{
    AlwaysFailure, AlwaysSuccess, SetBlackboard, SleepNode, StatefulActionNode, UnsetBlackboard,
};
use crate::controls::{
    FallbackNode, IfThenElseNode, ParallelAllNode, ParallelNode, ReactiveFallbackNode,
    ReactiveSequenceNode, SequenceNode, SequenceWithMemoryNode, SwitchNode, WhileDoElseNode,
};
use crate::decorators::{
    DelayNode, ForceFailureNode, ForceSuccessNode, InverterNode, KeepRunningUntilFailureNode,
    RepeatNode, RetryNode, RunOnceNode, TimeoutNode,
};
use crate::error::BehaviorError;
use crate::node::{BehaviorNode, NodeConfig, TreeNode};
use crate::port::TreeNodeManifest;

pub type Constructor = Box<dyn Fn() -> Box<dyn BehaviorNode> + Send + Sync>;

/// Wraps a plain constructor closure into a [`Constructor`].
pub fn boxify<T: BehaviorNode + 'static>(f: impl Fn() -> T + Send + Sync + 'static) -> Constructor {
    Box::new(move || Box::new(f()) as Box<dyn BehaviorNode>)
}

pub struct Registry {
    node_types: HashMap<String, Constructor>,
    manifests: HashMap<String, Arc<TreeNodeManifest>>,
}

impl Registry {
    /// An empty registry, without even the built-in node types.
    pub fn new() -> Self {
        Self {
            node_types: HashMap::new(),
            manifests: HashMap::new(),
        }
    }

    /// Registers a node type under `type_name`. The manifest is collected
    /// from a probe instance's declared ports.
    pub fn register(&mut self, type_name: impl Into<String>, constructor: Constructor) {
        let type_name = type_name.into();
        let probe = constructor();
        let manifest = TreeNodeManifest::new(type_name.clone(), probe.provided_ports());
        self.manifests.insert(type_name.clone(), Arc::new(manifest));
        self.node_types.insert(type_name, constructor);
    }

    pub fn manifest(&self, type_name: &str) -> Option<&Arc<TreeNodeManifest>> {
        self.manifests.get(type_name)
    }

    pub fn node_types(&self) -> impl Iterator<Item = &str> {
        self.node_types.keys().map(String::as_str)
    }

    /// Builds a node instance of a registered type, attaching the type's
    /// manifest to the instance configuration.
    pub fn instantiate(
        &self,
        type_name: &str,
        instance_name: &str,
        mut config: NodeConfig,
    ) -> Result<TreeNode, BehaviorError> {
        let constructor = self
            .node_types
            .get(type_name)
            .ok_or_else(|| BehaviorError::UnknownNodeType(type_name.to_owned()))?;
        config.manifest = self.manifests.get(type_name).cloned();
        let mut node = TreeNode::new(instance_name, config, constructor());
        node.set_registration_id(type_name);
        Ok(node)
    }
}

impl Default for Registry {
    /// A registry preloaded with every built-in control, decorator and
    /// action node.
    fn default() -> Self {
        let mut registry = Self::new();

        registry.register("Sequence", boxify(SequenceNode::default));
        registry.register("AsyncSequence", boxify(SequenceNode::asynchronous));
        registry.register("SequenceWithMemory", boxify(SequenceWithMemoryNode::default));
        registry.register("Fallback", boxify(FallbackNode::default));
        registry.register("AsyncFallback", boxify(FallbackNode::asynchronous));
        registry.register("ReactiveSequence", boxify(ReactiveSequenceNode::default));
        registry.register("ReactiveFallback", boxify(ReactiveFallbackNode::default));
        registry.register("Parallel", boxify(ParallelNode::default));
        registry.register("ParallelAll", boxify(ParallelAllNode::default));
        registry.register("IfThenElse", boxify(IfThenElseNode::default));
        registry.register("WhileDoElse", boxify(WhileDoElseNode::default));
        registry.register("Switch2", boxify(SwitchNode::<2>::default));
        registry.register("Switch3", boxify(SwitchNode::<3>::default));
        registry.register("Switch4", boxify(SwitchNode::<4>::default));
        registry.register("Switch5", boxify(SwitchNode::<5>::default));
        registry.register("Switch6", boxify(SwitchNode::<6>::default));

        registry.register("Inverter", boxify(InverterNode::default));
        registry.register("ForceSuccess", boxify(ForceSuccessNode::default));
        registry.register("ForceFailure", boxify(ForceFailureNode::default));
        registry.register(
            "KeepRunningUntilFailure",
            boxify(KeepRunningUntilFailureNode::default),
        );
        registry.register("Repeat", boxify(RepeatNode::default));
        registry.register("RetryUntilSuccessful", boxify(RetryNode::default));
        registry.register("Timeout", boxify(TimeoutNode::default));
        registry.register("Delay", boxify(DelayNode::default));
        registry.register("RunOnce", boxify(RunOnceNode::default));

        registry.register("AlwaysSuccess", boxify(AlwaysSuccess::default));
        registry.register("AlwaysFailure", boxify(AlwaysFailure::default));
        registry.register("SetBlackboard", boxify(SetBlackboard::default));
        registry.register("UnsetBlackboard", boxify(UnsetBlackboard::default));
        registry.register(
            "Sleep",
            boxify(|| StatefulActionNode::new(SleepNode::default())),
        );

        registry
    }
}
