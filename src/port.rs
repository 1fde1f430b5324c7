//! Declared ports and port bindings.
//!
//! A node *declares* its ports in a [`TreeNodeManifest`] (collected by the
//! registry at node-type registration time) and each node *instance* binds
//! them in its `NodeConfig`, either to a literal string or to a blackboard
//! reference written `{key}`. The special binding `=` maps a port to the
//! blackboard key with the same name as the port.

use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PortDirection {
    Input,
    Output,
    InOut,
}

impl PortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            PortDirection::Input => "Input",
            PortDirection::Output => "Output",
            PortDirection::InOut => "InOut",
        }
    }
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared port: direction, optional description and default value.
///
/// Defaults are kept in string form and parsed on use, which keeps the
/// manifest free of type erasure.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub name: String,
    pub direction: PortDirection,
    pub description: String,
    pub default_value: Option<String>,
}

impl PortInfo {
    pub fn new(direction: PortDirection, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction,
            description: String::new(),
            default_value: None,
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Self::new(PortDirection::Input, name)
    }

    pub fn output(name: impl Into<String>) -> Self {
        Self::new(PortDirection::Output, name)
    }

    pub fn inout(name: impl Into<String>) -> Self {
        Self::new(PortDirection::InOut, name)
    }

    pub fn with_default(mut self, value: impl ToString) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Static metadata of a registered node type.
#[derive(Debug, Clone, Default)]
pub struct TreeNodeManifest {
    pub registration_id: String,
    pub ports: HashMap<String, PortInfo>,
}

impl TreeNodeManifest {
    pub fn new(registration_id: impl Into<String>, ports: Vec<PortInfo>) -> Self {
        Self {
            registration_id: registration_id.into(),
            ports: ports.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    pub fn port(&self, name: &str) -> Option<&PortInfo> {
        self.ports.get(name)
    }
}

/// Returns the key if `s` is a `{key}` blackboard reference.
pub(crate) fn blackboard_pointer(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    if trimmed.len() >= 3 && trimmed.starts_with('{') && trimmed.ends_with('}') {
        Some(&trimmed[1..trimmed.len() - 1])
    } else {
        None
    }
}

/// How a port binding string resolves.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Binding<'a> {
    /// `=`: the blackboard key equals the port name.
    SameName,
    /// `{key}`: an explicit blackboard reference.
    Reference(&'a str),
    /// Anything else is a literal value.
    Literal(&'a str),
}

pub(crate) fn parse_binding(s: &str) -> Binding<'_> {
    if s.trim() == "=" {
        Binding::SameName
    } else if let Some(key) = blackboard_pointer(s) {
        Binding::Reference(key)
    } else {
        Binding::Literal(s)
    }
}

/// Keys with a leading underscore are private to their scope and excluded
/// from autoremapping.
pub(crate) fn is_private_key(key: &str) -> bool {
    key.starts_with('_')
}
