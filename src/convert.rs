//! Conversions between port strings and typed values.
//!
//! Ports carry literals as strings; blackboard entries remember their
//! first-observed concrete type and accept later writes supplied as the
//! string representation. Both paths funnel through [`FromPortString`],
//! and the blackboard looks conversions up at runtime through the
//! `TypeId`-keyed tables at the bottom of this module.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::{NodeStatus, NodeType, PortDirection};

/// A type that can be produced from a port literal.
pub trait FromPortString: Sized {
    fn from_port_str(s: &str) -> Option<Self>;
}

macro_rules! from_str_impl {
    ($($t:ty),*) => {$(
        impl FromPortString for $t {
            fn from_port_str(s: &str) -> Option<Self> {
                s.trim().parse().ok()
            }
        }
    )*};
}

from_str_impl!(i32, i64, u32, u64, usize, f32, f64);

impl FromPortString for String {
    fn from_port_str(s: &str) -> Option<Self> {
        Some(s.to_owned())
    }
}

impl FromPortString for bool {
    fn from_port_str(s: &str) -> Option<Self> {
        match s.trim() {
            "1" | "true" | "TRUE" | "True" => Some(true),
            "0" | "false" | "FALSE" | "False" => Some(false),
            _ => None,
        }
    }
}

/// Semicolon-separated lists, e.g. `"1;2;3"`.
impl<T: FromPortString> FromPortString for Vec<T> {
    fn from_port_str(s: &str) -> Option<Self> {
        s.split(';').map(T::from_port_str).collect()
    }
}

impl FromPortString for NodeStatus {
    fn from_port_str(s: &str) -> Option<Self> {
        match s.trim() {
            "IDLE" => Some(NodeStatus::Idle),
            "RUNNING" => Some(NodeStatus::Running),
            "SUCCESS" => Some(NodeStatus::Success),
            "FAILURE" => Some(NodeStatus::Failure),
            "SKIPPED" => Some(NodeStatus::Skipped),
            _ => None,
        }
    }
}

impl FromPortString for NodeType {
    fn from_port_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Action" => Some(NodeType::Action),
            "Condition" => Some(NodeType::Condition),
            "Control" => Some(NodeType::Control),
            "Decorator" => Some(NodeType::Decorator),
            "SubTree" => Some(NodeType::SubTree),
            _ => None,
        }
    }
}

impl FromPortString for PortDirection {
    fn from_port_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Input" | "INPUT" => Some(PortDirection::Input),
            "Output" | "OUTPUT" => Some(PortDirection::Output),
            "InOut" | "INOUT" => Some(PortDirection::InOut),
            _ => None,
        }
    }
}

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

type ParserFn = fn(&str) -> Option<AnyValue>;
type RenderFn = fn(&(dyn Any + Send + Sync)) -> Option<String>;

fn parser_entry<T>() -> (TypeId, ParserFn)
where
    T: FromPortString + Send + Sync + 'static,
{
    fn parse<T: FromPortString + Send + Sync + 'static>(s: &str) -> Option<AnyValue> {
        T::from_port_str(s).map(|v| Arc::new(v) as AnyValue)
    }
    (TypeId::of::<T>(), parse::<T>)
}

fn render_entry<T>() -> (TypeId, RenderFn)
where
    T: std::fmt::Display + Send + Sync + 'static,
{
    fn render<T: std::fmt::Display + Send + Sync + 'static>(
        v: &(dyn Any + Send + Sync),
    ) -> Option<String> {
        v.downcast_ref::<T>().map(|v| v.to_string())
    }
    (TypeId::of::<T>(), render::<T>)
}

/// Parses a string into the concrete type identified by `TypeId`, for the
/// fixed set of convertible types.
static STRING_PARSERS: Lazy<HashMap<TypeId, ParserFn>> = Lazy::new(|| {
    HashMap::from([
        parser_entry::<i32>(),
        parser_entry::<i64>(),
        parser_entry::<u32>(),
        parser_entry::<u64>(),
        parser_entry::<usize>(),
        parser_entry::<f32>(),
        parser_entry::<f64>(),
        parser_entry::<bool>(),
        parser_entry::<String>(),
        parser_entry::<NodeStatus>(),
        parser_entry::<Vec<i64>>(),
        parser_entry::<Vec<f64>>(),
    ])
});

/// Renders a value of a convertible type back to its string form.
static STRING_RENDERERS: Lazy<HashMap<TypeId, RenderFn>> = Lazy::new(|| {
    HashMap::from([
        render_entry::<i32>(),
        render_entry::<i64>(),
        render_entry::<u32>(),
        render_entry::<u64>(),
        render_entry::<usize>(),
        render_entry::<f32>(),
        render_entry::<f64>(),
        render_entry::<bool>(),
        render_entry::<String>(),
        render_entry::<NodeStatus>(),
    ])
});

pub(crate) fn parse_into(type_id: TypeId, s: &str) -> Option<AnyValue> {
    STRING_PARSERS.get(&type_id).and_then(|parse| parse(s))
}

pub(crate) fn render_to_string(value: &(dyn Any + Send + Sync)) -> Option<String> {
    STRING_RENDERERS
        .get(&value.type_id())
        .and_then(|render| render(value))
}
