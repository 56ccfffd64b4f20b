//! Process-wide context registry and thread-to-context binding
//!
//! The registry owns every live context by id; parent/child edges are id
//! references resolved here. Thread binding answers "which context is the
//! calling thread evaluating for" with a lock-free fast path for the
//! common single-context case and a thread-local slot for the general
//! multi-context case.
//!
//! Binding violations (lookup on an unbound thread, double-bind, unbind of
//! an unbound thread) are caller contract violations and panic rather than
//! returning recoverable errors.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::context::{Context, ContextId};

static CONTEXTS: Lazy<DashMap<u64, Arc<Context>>> = Lazy::new(DashMap::new);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Total number of contexts ever created; drives the fast-path
/// invalidation, which keys off creations rather than live count.
static CREATED_EVER: AtomicU64 = AtomicU64::new(0);

/// Total number of contexts ever successfully registered; the first
/// registration marks the process's initial context.
static REGISTERED_EVER: AtomicU64 = AtomicU64::new(0);

/// Single-context fast-path cache. Valid only while the process has
/// created exactly one context; the validity flag transition is
/// monotonic (true -> false, never back) and published with release
/// ordering because the hot path reads it without locking.
static SINGLE: Lazy<RwLock<Option<Arc<Context>>>> = Lazy::new(|| RwLock::new(None));
static SINGLE_VALID: AtomicBool = AtomicBool::new(true);

/// Counts lookups that fell through to the general (thread-local) path
static GENERAL_LOOKUPS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static BOUND: RefCell<Option<Arc<Context>>> = const { RefCell::new(None) };
}

pub(crate) fn allocate_id() -> ContextId {
    ContextId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Account for a newly created context before its thread is bound and its
/// state modules are built. The second creation ever must invalidate the
/// single-context fast path here: code running during module construction
/// already resolves the current context through the registry and must not
/// be answered with the previous singleton.
pub(crate) fn note_created(ctx: &Arc<Context>) {
    let serial = CREATED_EVER.fetch_add(1, Ordering::Relaxed) + 1;
    let mut single = SINGLE.write();
    if serial == 1 {
        *single = Some(ctx.clone());
    } else if SINGLE_VALID.load(Ordering::Relaxed) {
        *single = None;
        SINGLE_VALID.store(false, Ordering::Release);
    }
}

/// Roll back the cached singleton for a creation that aborted before
/// registration. The validity flag stays as-is: it tracks creations, not
/// successful activations.
pub(crate) fn forget_created(id: ContextId) {
    let mut single = SINGLE.write();
    if single.as_ref().is_some_and(|c| c.id() == id) {
        *single = None;
    }
}

/// Register a fully activated context. Returns whether it is the first
/// context ever registered in the process; that context is marked as the
/// initial one before it becomes visible through the table.
pub(crate) fn register(ctx: Arc<Context>) -> bool {
    let first = REGISTERED_EVER.fetch_add(1, Ordering::Relaxed) == 0;
    if first {
        ctx.mark_initial();
    }
    CONTEXTS.insert(ctx.id().raw(), ctx);
    first
}

pub(crate) fn deregister(id: ContextId) {
    CONTEXTS.remove(&id.raw());
    let mut single = SINGLE.write();
    if single.as_ref().is_some_and(|c| c.id() == id) {
        // The cached singleton must not outlive its context. The validity
        // flag stays as-is: it tracks how many contexts were ever created,
        // not how many are live.
        *single = None;
    }
}

/// Resolve a context by id. Destroyed contexts are absent.
pub fn lookup(id: ContextId) -> Option<Arc<Context>> {
    CONTEXTS.get(&id.raw()).map(|entry| entry.clone())
}

/// Whether a context with `id` is currently registered
pub fn is_registered(id: ContextId) -> bool {
    CONTEXTS.contains_key(&id.raw())
}

/// Number of live contexts
pub fn live_count() -> usize {
    CONTEXTS.len()
}

/// The context the calling thread is evaluating for.
///
/// While the process has created exactly one context, a cached reference
/// answers without consulting the per-thread slot; creating a second
/// context anywhere in the process permanently disables that fast path.
///
/// # Panics
///
/// Panics when the calling thread is not bound and the fast path does not
/// apply; callers must guarantee binding before evaluation begins.
pub fn current() -> Arc<Context> {
    try_current().expect("current() called on a thread with no bound context")
}

/// Non-panicking form of [`current`]
pub fn try_current() -> Option<Arc<Context>> {
    if SINGLE_VALID.load(Ordering::Acquire) {
        if let Some(ctx) = SINGLE.read().clone() {
            return Some(ctx);
        }
    }
    GENERAL_LOOKUPS.fetch_add(1, Ordering::Relaxed);
    BOUND.with(|slot| slot.borrow().clone())
}

/// Whether the calling thread has a bound context (fast path ignored)
pub fn is_bound() -> bool {
    BOUND.with(|slot| slot.borrow().is_some())
}

/// Bind the calling thread to `ctx`.
///
/// # Panics
///
/// Panics when the thread is already bound; a thread belongs to at most one
/// context at a time, and rebinding without an intervening [`unbind`] is a
/// caller contract violation.
pub fn bind(ctx: &Arc<Context>) {
    BOUND.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(bound) = slot.as_ref() {
            panic!(
                "thread already bound to context {} while binding context {}",
                bound.id(),
                ctx.id()
            );
        }
        *slot = Some(ctx.clone());
    });
}

/// Remove the calling thread's binding.
///
/// # Panics
///
/// Panics when the thread is not bound.
pub fn unbind() {
    BOUND.with(|slot| {
        if slot.borrow_mut().take().is_none() {
            panic!("unbind() called on a thread with no bound context");
        }
    });
}

/// Replace the calling thread's binding, returning the previous one. Used
/// by the lifecycle, which rebinds across create/destroy without the
/// double-bind check.
pub(crate) fn rebind(ctx: Option<Arc<Context>>) -> Option<Arc<Context>> {
    BOUND.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), ctx))
}

/// Number of lookups that fell through to the general path, for
/// fast-path instrumentation
pub fn general_lookup_count() -> u64 {
    GENERAL_LOOKUPS.load(Ordering::Relaxed)
}

/// Scoped rebinding: evaluate against `ctx` on the current thread and
/// restore the previous binding when the guard drops.
pub fn with_context(ctx: &Arc<Context>) -> ContextGuard {
    ContextGuard {
        previous: rebind(Some(ctx.clone())),
    }
}

/// Guard returned by [`with_context`]; restores the previous binding on drop
pub struct ContextGuard {
    previous: Option<Arc<Context>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        rebind(self.previous.take());
    }
}
