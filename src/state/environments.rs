//! Namespace/global bindings: the unit the sharing kinds operate on

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{ContextState, Inheritance};
use crate::kind::ContextKind;

type BindingMap = FxHashMap<String, Value>;

/// Global namespace bindings for one context.
///
/// An exclusive context starts with fresh bindings. A shared-write child
/// holds a live reference to its parent's map, so child writes are visible
/// to the parent. A shared-read-copy child takes a shallow structural
/// snapshot at creation; later changes in either direction do not propagate.
pub struct Environments {
    bindings: Arc<RwLock<BindingMap>>,
}

impl Environments {
    pub(crate) fn new_context(kind: ContextKind, parent: Option<&Environments>) -> Self {
        let bindings = match (Inheritance::for_kind(kind), parent) {
            (Inheritance::Live, Some(parent)) => parent.bindings.clone(),
            (Inheritance::Snapshot, Some(parent)) => {
                Arc::new(RwLock::new(parent.bindings.read().clone()))
            }
            _ => Arc::new(RwLock::new(BindingMap::default())),
        };
        Self { bindings }
    }

    /// Look up a global binding
    pub fn get(&self, name: &str) -> Option<Value> {
        self.bindings.read().get(name).cloned()
    }

    /// Install or replace a global binding, returning the previous value
    pub fn set(&self, name: &str, value: Value) -> Option<Value> {
        self.bindings.write().insert(name.to_string(), value)
    }

    /// Remove a global binding
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.bindings.write().remove(name)
    }

    /// Number of global bindings
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    /// Whether there are no global bindings
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Whether this module shares its live binding map with `other`
    pub fn shares_storage_with(&self, other: &Environments) -> bool {
        Arc::ptr_eq(&self.bindings, &other.bindings)
    }
}

impl ContextState for Environments {
    fn name(&self) -> &'static str {
        "environments"
    }
}
