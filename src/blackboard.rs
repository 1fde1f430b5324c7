//! The shared, hierarchically-scoped key-value store.
//!
//! Each subtree owns a [`Blackboard`] scope. Scopes form a chain through
//! `parent`; a key missing locally is resolved through the parent when an
//! explicit remapping exists or when autoremapping is enabled and the key
//! is not private. A resolved entry is cached locally *by reference*: the
//! parent remains the owner of the value and both scopes observe the same
//! mutable cell.
//!
//! # Implementation note
//!
//! Values are stored as `Arc<dyn Any + Send + Sync>` rather than
//! `Box<dyn Any>`. Cross-scope aliasing and the `SetBlackboard` node both
//! need to duplicate a value without knowing its concrete type, and `Clone`
//! is not object safe; reference counting gives us cloneability without
//! asking every stored type to implement anything beyond `Any + Send +
//! Sync`. Locks are entry-granular so unrelated keys never serialize each
//! other; the board-level lock only guards the key→entry map.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::convert::{parse_into, render_to_string, AnyValue, FromPortString};
use crate::error::BlackboardError;
use crate::port::is_private_key;

#[derive(Default)]
struct Slot {
    value: Option<AnyValue>,
    type_id: Option<TypeId>,
    type_name: &'static str,
}

/// A single mutable cell of the blackboard.
///
/// The first write establishes the entry's concrete type; later writes must
/// match it, with two exceptions: a value may arrive as its string
/// representation (parsed into the established type), and a renderable
/// value may overwrite a string-typed entry (stored as its string form).
#[derive(Default)]
pub struct Entry {
    slot: Mutex<Slot>,
}

impl Entry {
    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) -> Result<(), BlackboardError> {
        self.set_any(key, Arc::new(value), type_name::<T>())
    }

    pub(crate) fn set_any(
        &self,
        key: &str,
        value: AnyValue,
        value_type_name: &'static str,
    ) -> Result<(), BlackboardError> {
        let new_type = (*value).type_id();
        let mut slot = self.slot.lock();
        match slot.type_id {
            None => {
                slot.type_id = Some(new_type);
                slot.type_name = value_type_name;
                slot.value = Some(value);
                Ok(())
            }
            Some(established) if established == new_type => {
                slot.value = Some(value);
                Ok(())
            }
            Some(established) if new_type == TypeId::of::<String>() => {
                // string representation of the established type
                let s = value
                    .downcast_ref::<String>()
                    .map(String::as_str)
                    .unwrap_or_default();
                match parse_into(established, s) {
                    Some(converted) => {
                        slot.value = Some(converted);
                        Ok(())
                    }
                    None => Err(BlackboardError::StringConversion {
                        key: key.to_owned(),
                        value: s.to_owned(),
                        expected: slot.type_name,
                    }),
                }
            }
            Some(established) if established == TypeId::of::<String>() => {
                // a renderable value may override a string-typed entry
                match render_to_string(&*value) {
                    Some(rendered) => {
                        slot.value = Some(Arc::new(rendered));
                        Ok(())
                    }
                    None => Err(BlackboardError::TypeMismatch {
                        key: key.to_owned(),
                        expected: slot.type_name,
                        actual: value_type_name,
                    }),
                }
            }
            Some(_) => Err(BlackboardError::TypeMismatch {
                key: key.to_owned(),
                expected: slot.type_name,
                actual: value_type_name,
            }),
        }
    }

    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        let slot = self.slot.lock();
        slot.value
            .as_ref()
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Like [`Entry::get`], but a stored string parses into `T` on the fly.
    pub fn get_parse<T: Any + Clone + FromPortString>(&self) -> Option<T> {
        let slot = self.slot.lock();
        let value = slot.value.as_ref()?;
        if let Some(v) = value.downcast_ref::<T>() {
            return Some(v.clone());
        }
        value
            .downcast_ref::<String>()
            .and_then(|s| T::from_port_str(s))
    }

    pub(crate) fn value_any(&self) -> Option<AnyValue> {
        self.slot.lock().value.clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().value.is_some()
    }

    pub fn type_name(&self) -> &'static str {
        self.slot.lock().type_name
    }
}

pub struct Blackboard {
    storage: Mutex<HashMap<String, Arc<Entry>>>,
    internal_to_external: Mutex<HashMap<String, String>>,
    parent: Option<Arc<Blackboard>>,
    autoremapping: Mutex<bool>,
}

impl Blackboard {
    /// Creates a top-level scope.
    pub fn root() -> Arc<Blackboard> {
        Arc::new(Blackboard {
            storage: Mutex::new(HashMap::new()),
            internal_to_external: Mutex::new(HashMap::new()),
            parent: None,
            autoremapping: Mutex::new(false),
        })
    }

    /// Creates a child scope, as done when a `SubTree` boundary is
    /// instantiated.
    pub fn with_parent(parent: &Arc<Blackboard>, autoremapping: bool) -> Arc<Blackboard> {
        Arc::new(Blackboard {
            storage: Mutex::new(HashMap::new()),
            internal_to_external: Mutex::new(HashMap::new()),
            parent: Some(parent.clone()),
            autoremapping: Mutex::new(autoremapping),
        })
    }

    pub fn enable_autoremapping(&self, enabled: bool) {
        *self.autoremapping.lock() = enabled;
    }

    /// Declares that local key `internal` aliases the parent scope's key
    /// `external`.
    pub fn add_subtree_remapping(&self, internal: impl Into<String>, external: impl Into<String>) {
        self.internal_to_external
            .lock()
            .insert(internal.into(), external.into());
    }

    /// Looks a key up, resolving through the parent scope if needed. The
    /// resolved entry is cached locally so later lookups do not walk the
    /// chain again.
    pub fn entry(&self, key: &str) -> Option<Arc<Entry>> {
        let mut storage = self.storage.lock();
        if let Some(entry) = storage.get(key) {
            return Some(entry.clone());
        }
        let parent = self.parent.as_ref()?;
        let remapped = self.internal_to_external.lock().get(key).cloned();
        let entry = match remapped {
            Some(external) => parent.entry(&external),
            None if *self.autoremapping.lock() && !is_private_key(key) => parent.entry(key),
            None => None,
        }?;
        storage.insert(key.to_owned(), entry.clone());
        Some(entry)
    }

    /// Finds or creates the entry for `key`. Creation recurses into the
    /// parent scope under the same remapping rules as [`Blackboard::entry`],
    /// so a remapped key materializes in the owning scope and is shared
    /// from there.
    pub fn create_entry(&self, key: &str) -> Arc<Entry> {
        let mut storage = self.storage.lock();
        if let Some(entry) = storage.get(key) {
            return entry.clone();
        }
        let remapped = self.internal_to_external.lock().get(key).cloned();
        let entry = match (&self.parent, remapped) {
            (Some(parent), Some(external)) => parent.create_entry(&external),
            (Some(parent), None) if *self.autoremapping.lock() && !is_private_key(key) => {
                parent.create_entry(key)
            }
            _ => Arc::new(Entry::default()),
        };
        storage.insert(key.to_owned(), entry.clone());
        entry
    }

    pub fn get<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.entry(key)?.get::<T>()
    }

    pub fn get_parse<T: Any + Clone + FromPortString>(&self, key: &str) -> Option<T> {
        self.entry(key)?.get_parse::<T>()
    }

    pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) -> Result<(), BlackboardError> {
        self.create_entry(key).set(key, value)
    }

    pub(crate) fn set_any(
        &self,
        key: &str,
        value: AnyValue,
        value_type_name: &'static str,
    ) -> Result<(), BlackboardError> {
        self.create_entry(key).set_any(key, value, value_type_name)
    }

    /// Removes the key from this scope only. An aliased entry stays alive
    /// in the scope that owns it.
    pub fn unset(&self, key: &str) {
        self.storage.lock().remove(key);
    }

    pub fn keys(&self) -> Vec<String> {
        self.storage.lock().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.storage.lock().clear();
    }
}
