//! Serialization state and the lazy code-blob cache

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::ContextState;
use crate::context::Context;

/// Serialization depth and reference-table state.
///
/// The serializer itself lives outside this subsystem; it keeps its
/// per-context bookkeeping here so nested serializations in different
/// contexts cannot corrupt each other's reference tables.
#[derive(Default)]
pub struct Serialization {
    inner: Mutex<SerializationState>,
}

#[derive(Default)]
struct SerializationState {
    depth: u32,
    ref_table: Vec<String>,
}

impl Serialization {
    pub(crate) fn new_context() -> Self {
        Self::default()
    }

    /// Enter a nested serialization; returns the new depth
    pub fn enter(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.depth += 1;
        inner.depth
    }

    /// Leave a nested serialization; clears the reference table when the
    /// outermost level unwinds
    pub fn leave(&self) -> u32 {
        let mut inner = self.inner.lock();
        inner.depth = inner.depth.saturating_sub(1);
        if inner.depth == 0 {
            inner.ref_table.clear();
        }
        inner.depth
    }

    /// Intern `name` in the reference table, returning its index
    pub fn intern_ref(&self, name: &str) -> usize {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.ref_table.iter().position(|r| r == name) {
            return pos;
        }
        inner.ref_table.push(name.to_string());
        inner.ref_table.len() - 1
    }

    /// Current nesting depth
    pub fn depth(&self) -> u32 {
        self.inner.lock().depth
    }
}

impl ContextState for Serialization {
    fn name(&self) -> &'static str {
        "serialization"
    }
}

/// Cache of lazily-loaded code blobs, keyed by origin name.
///
/// Flushed when the owning context is destroyed; entries are never shared
/// across contexts.
#[derive(Default)]
pub struct LazyCodeCache {
    cache: Mutex<FxHashMap<String, Arc<[u8]>>>,
}

impl LazyCodeCache {
    pub(crate) fn new_context() -> Self {
        Self::default()
    }

    /// Cached blob for `name`, if present
    pub fn get(&self, name: &str) -> Option<Arc<[u8]>> {
        self.cache.lock().get(name).cloned()
    }

    /// Insert a blob for `name`
    pub fn put(&self, name: &str, blob: Vec<u8>) -> Arc<[u8]> {
        let blob: Arc<[u8]> = blob.into();
        self.cache.lock().insert(name.to_string(), blob.clone());
        blob
    }

    /// Number of cached blobs
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

impl ContextState for LazyCodeCache {
    fn name(&self) -> &'static str {
        "lazy_code_cache"
    }

    fn before_destroy(&self, ctx: &Context) {
        let mut cache = self.cache.lock();
        if !cache.is_empty() {
            log::trace!("context {}: flushing {} cached code blob(s)", ctx.id(), cache.len());
            cache.clear();
        }
    }
}
