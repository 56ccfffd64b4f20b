//! The context record and its create/activate/destroy lifecycle
//!
//! A [`Context`] is an isolated (or partially shared) interpreter session
//! within a shared process. All per-session mutable state hangs off this
//! type, split into the state modules under [`crate::state`]. Contexts are
//! never collected implicitly; destruction is caller-driven.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bindings::{mark_initial_context_initialized, static_bindings};
use crate::error::{ContextError, Result, fatal_misconfiguration};
use crate::host::{ConsoleHandler, HostEnvironment};
use crate::kind::{ContextKind, validate_relationship};
use crate::registry;
use crate::state::StateModules;

/// Process-unique context identifier.
///
/// Parent/child relationships are plain id references resolved through the
/// registry, never owning pointers, so context graphs cannot form ownership
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which state modules are built during creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPolicy {
    /// Build every module during creation
    Full,
    /// Skip the environment-derived trio (env vars, options, profile); the
    /// embedder builds it later through
    /// [`Context::complete_initialization`]. The split point is this
    /// explicit policy, not an inferred two-phase protocol.
    Deferred,
}

/// Session start parameters supplied by the embedding host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartParams {
    /// Command-line style arguments for the session
    pub arguments: Vec<String>,
    /// Suppress banner/echo output
    pub quiet: bool,
}

/// Everything needed to create a context: kind, optional parent, startup
/// policy, and start parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Sharing kind of the new context
    pub kind: ContextKind,
    /// Parent context, required for the shared kinds
    pub parent: Option<ContextId>,
    /// Which modules are built during creation
    pub startup: StartupPolicy,
    /// Session start parameters
    pub start_params: StartParams,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::exclusive()
    }
}

impl ContextConfig {
    /// Config for a share-nothing context without a parent
    pub fn exclusive() -> Self {
        Self {
            kind: ContextKind::Exclusive,
            parent: None,
            startup: StartupPolicy::Full,
            start_params: StartParams::default(),
        }
    }

    /// Config for a share-nothing child of `parent`
    pub fn exclusive_child(parent: ContextId) -> Self {
        Self {
            parent: Some(parent),
            ..Self::exclusive()
        }
    }

    /// Config for a shared-write child of `parent`
    pub fn shared_write(parent: ContextId) -> Self {
        Self {
            kind: ContextKind::SharedWrite,
            parent: Some(parent),
            ..Self::exclusive()
        }
    }

    /// Config for a shared-read-copy child of `parent`
    pub fn shared_read_copy(parent: ContextId) -> Self {
        Self {
            kind: ContextKind::SharedReadCopy,
            parent: Some(parent),
            ..Self::exclusive()
        }
    }

    /// Replace the startup policy
    pub fn with_startup(mut self, startup: StartupPolicy) -> Self {
        self.startup = startup;
        self
    }

    /// Replace the start parameters
    pub fn with_start_params(mut self, start_params: StartParams) -> Self {
        self.start_params = start_params;
        self
    }
}

/// Dispatch state of a single primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveDispatchMode {
    /// No methods defined on this primitive
    #[default]
    NoMethods,
    /// Methods were removed; dispatch metadata needs a reset
    NeedsReset,
    /// Methods are defined and dispatch is live
    HasMethods,
    /// Method dispatch suppressed for this primitive
    Suppressed,
}

/// Per-context primitive-dispatch metadata.
///
/// Exclusive contexts own a copy (duplicated from the parent's when a parent
/// exists) because they can run and update it concurrently with the parent.
/// The shared kinds never run concurrently with their parent and resolve to
/// the parent's copy instead.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveDispatchInfo {
    modes: FxHashMap<String, PrimitiveDispatchMode>,
}

impl PrimitiveDispatchInfo {
    /// Dispatch mode for `primitive`; `NoMethods` when never set
    pub fn mode(&self, primitive: &str) -> PrimitiveDispatchMode {
        self.modes.get(primitive).copied().unwrap_or_default()
    }

    /// Update the dispatch mode for `primitive`
    pub fn set_mode(&mut self, primitive: &str, mode: PrimitiveDispatchMode) {
        self.modes.insert(primitive.to_string(), mode);
    }

    /// Deep copy for a child that may update the metadata concurrently
    pub fn duplicate(&self) -> Self {
        self.clone()
    }
}

/// Lifecycle of a context. Transitions are one-way; `Destroyed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Allocated but not yet activated; state modules are absent
    Uninitialized,
    /// Activated: modules built, registered, thread bound
    Active,
    /// Torn down; every operation returns `AlreadyDestroyed`
    Destroyed,
}

/// An isolated (or partially shared) interpreter session.
///
/// Shared as `Arc<Context>`; all mutable state is interior and owned
/// exclusively by this context. Threads evaluating for this context find it
/// through [`crate::registry::current`].
pub struct Context {
    id: ContextId,
    kind: ContextKind,
    parent: Option<ContextId>,
    startup: StartupPolicy,
    start_params: StartParams,
    host: Arc<dyn HostEnvironment>,
    console: Arc<dyn ConsoleHandler>,

    lifecycle: Mutex<LifecycleState>,
    modules: OnceCell<StateModules>,
    teardown_log: Mutex<Vec<&'static str>>,

    /// At most one live shared-write child; cleared when it is destroyed
    shared_child: Mutex<Option<ContextId>>,

    /// Whether this is the first context ever successfully registered in
    /// the process; set by the registry at registration, so an aborted
    /// earlier creation does not consume the marker
    initial: AtomicBool,

    /// Whether the result of the last expression should be surfaced by the
    /// embedding shell
    result_visible: AtomicBool,
    /// Set while the base namespace is being bootstrapped
    loading_base: AtomicBool,
    method_table_dispatch: AtomicBool,
    allow_primitive_methods: AtomicBool,
    null_method_object: AtomicBool,
    fully_initialized: AtomicBool,

    class_extends: RwLock<FxHashMap<String, Vec<String>>>,
    exported_symbols: RwLock<FxHashMap<String, Value>>,
    primitive_dispatch: Option<Mutex<PrimitiveDispatchInfo>>,
}

impl Context {
    /// Create and activate a context.
    ///
    /// When `config` is `None` the host's published configuration is used,
    /// falling back to an exclusive root context. The calling thread is
    /// bound to the new context before any state module is constructed; a
    /// module-constructor failure unwinds the binding and never registers
    /// the context.
    ///
    /// # Panics
    ///
    /// Panics if [`crate::bindings::initialize_process`] has not run.
    /// Terminates the process if the host environment supplies no console
    /// handler.
    pub fn create(
        config: Option<ContextConfig>,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Arc<Context>> {
        // Contexts cannot exist before process initialization.
        let _ = static_bindings();

        let config = config
            .or_else(|| host.import_config())
            .unwrap_or_default();
        let console = match host.console() {
            Some(console) => console,
            None => fatal_misconfiguration("no console handler set"),
        };

        let parent = match config.parent {
            Some(parent_id) => {
                let parent =
                    registry::lookup(parent_id).ok_or(ContextError::ParentNotLive)?;
                if !parent.is_active() {
                    return Err(ContextError::ParentNotLive);
                }
                Some(parent)
            }
            None => None,
        };

        validate_relationship(config.kind, parent.as_deref())?;

        let id = registry::allocate_id();

        // Exclusive contexts may run concurrently with their parent and
        // update the primitive-dispatch metadata while doing so, hence the
        // duplicate rather than a shared reference.
        let primitive_dispatch = match (config.kind, &parent) {
            (ContextKind::Exclusive, Some(parent)) => Some(Mutex::new(
                parent.with_primitive_dispatch(|info| info.duplicate()),
            )),
            (ContextKind::Exclusive, None) => {
                Some(Mutex::new(PrimitiveDispatchInfo::default()))
            }
            _ => None,
        };

        // Reserve the shared-write child slot under the parent's lock so two
        // racing creations cannot both pass validation.
        if config.kind == ContextKind::SharedWrite {
            let parent = parent.as_ref().expect("validated shared-write parent");
            let mut slot = parent.shared_child.lock();
            if slot.is_some() {
                return Err(ContextError::SharedWriteChildExists);
            }
            *slot = Some(id);
        }

        let ctx = Arc::new(Context {
            id,
            kind: config.kind,
            parent: config.parent,
            startup: config.startup,
            start_params: config.start_params,
            host,
            console,
            lifecycle: Mutex::new(LifecycleState::Uninitialized),
            modules: OnceCell::new(),
            teardown_log: Mutex::new(Vec::new()),
            shared_child: Mutex::new(None),
            initial: AtomicBool::new(false),
            result_visible: AtomicBool::new(false),
            loading_base: AtomicBool::new(false),
            method_table_dispatch: AtomicBool::new(false),
            allow_primitive_methods: AtomicBool::new(true),
            null_method_object: AtomicBool::new(false),
            fully_initialized: AtomicBool::new(config.startup == StartupPolicy::Full),
            class_extends: RwLock::new(FxHashMap::default()),
            exported_symbols: RwLock::new(FxHashMap::default()),
            primitive_dispatch,
        });

        // Creation, not registration, invalidates the single-context fast
        // path: once this thread is rebound, lookups during module
        // construction must answer with this context, not a cached
        // singleton.
        registry::note_created(&ctx);

        // Bind before building modules: module constructors and any code
        // they call resolve the current context through the registry.
        let previous = registry::rebind(Some(ctx.clone()));

        let parent_modules = parent.as_ref().and_then(|p| p.modules.get());
        match StateModules::build(&ctx, parent_modules, config.startup) {
            Ok(modules) => {
                ctx.modules
                    .set(modules)
                    .unwrap_or_else(|_| unreachable!("modules set twice during create"));
            }
            Err(err) => {
                // Abort activation: restore the previous binding, drop the
                // cached singleton if it is ours, and release the reserved
                // shared-write slot. The context was never registered, so
                // no other thread can observe it.
                registry::rebind(previous);
                registry::forget_created(id);
                if config.kind == ContextKind::SharedWrite {
                    let parent = parent.as_ref().expect("validated shared-write parent");
                    let mut slot = parent.shared_child.lock();
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }
                return Err(err);
            }
        }

        *ctx.lifecycle.lock() = LifecycleState::Active;

        if config.kind == ContextKind::SharedWrite {
            let parent = parent.as_ref().expect("validated shared-write parent");
            // The method-dispatch flag must carry over, otherwise the child
            // does not know the methods machinery is already loaded.
            ctx.method_table_dispatch
                .store(parent.is_method_table_dispatch_on(), Ordering::Relaxed);
        }

        let initial = registry::register(ctx.clone());
        log::debug!("created context {} ({:?})", ctx.id, ctx.kind);

        if initial && config.startup == StartupPolicy::Full {
            mark_initial_context_initialized();
        }

        Ok(ctx)
    }

    /// Destroy this context.
    ///
    /// Runs every state module's pre-destroy hook in construction order,
    /// clears the parent's shared-write-child reference when this context
    /// held that role, rebinds the calling thread to the parent (or clears
    /// the binding for a root context), and removes the context from the
    /// registry. Destroying twice returns [`ContextError::AlreadyDestroyed`].
    pub fn destroy(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            LifecycleState::Destroyed => {
                return Err(ContextError::AlreadyDestroyed { id: self.id.raw() });
            }
            LifecycleState::Uninitialized => {
                return Err(ContextError::NotActive { id: self.id.raw() });
            }
            LifecycleState::Active => {}
        }

        let modules = self
            .modules
            .get()
            .expect("active context without state modules");
        *self.teardown_log.lock() = modules.run_before_destroy(self);

        if self.kind == ContextKind::SharedWrite {
            if let Some(parent) = self.parent.and_then(registry::lookup) {
                let mut slot = parent.shared_child.lock();
                if *slot == Some(self.id) {
                    *slot = None;
                }
            }
        }

        let parent = self.parent.and_then(registry::lookup);
        registry::rebind(parent);
        registry::deregister(self.id);

        *lifecycle = LifecycleState::Destroyed;
        log::debug!("destroyed context {}", self.id);
        Ok(())
    }

    /// Build the deferred environment trio and mark the context fully
    /// initialized. Only valid for contexts created with
    /// [`StartupPolicy::Deferred`], exactly once.
    pub fn complete_initialization(&self) -> Result<()> {
        self.ensure_active()?;
        if self.startup != StartupPolicy::Deferred {
            return Err(ContextError::NotDeferred { id: self.id.raw() });
        }
        let modules = self
            .modules
            .get()
            .ok_or(ContextError::NotActive { id: self.id.raw() })?;
        if !modules.complete_base(self)? {
            return Err(ContextError::AlreadyInitialized { id: self.id.raw() });
        }
        self.fully_initialized.store(true, Ordering::Release);
        if self.is_initial() {
            mark_initial_context_initialized();
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<()> {
        match *self.lifecycle.lock() {
            LifecycleState::Active => Ok(()),
            LifecycleState::Destroyed => {
                Err(ContextError::AlreadyDestroyed { id: self.id.raw() })
            }
            LifecycleState::Uninitialized => {
                Err(ContextError::NotActive { id: self.id.raw() })
            }
        }
    }

    /// Process-unique id
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Sharing kind
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Whether this is the first context successfully registered in the
    /// process
    pub fn is_initial(&self) -> bool {
        self.initial.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initial(&self) {
        self.initial.store(true, Ordering::Release);
    }

    /// Parent context id, if any
    pub fn parent_id(&self) -> Option<ContextId> {
        self.parent
    }

    /// Id of the live shared-write child, if one exists
    pub fn shared_child(&self) -> Option<ContextId> {
        *self.shared_child.lock()
    }

    /// Current lifecycle state
    pub fn lifecycle_state(&self) -> LifecycleState {
        *self.lifecycle.lock()
    }

    /// Whether the context is active
    pub fn is_active(&self) -> bool {
        self.lifecycle_state() == LifecycleState::Active
    }

    /// The state modules. Fails after destruction or before activation.
    pub fn state(&self) -> Result<&StateModules> {
        self.ensure_active()?;
        self.modules
            .get()
            .ok_or(ContextError::NotActive { id: self.id.raw() })
    }

    /// Module teardown sequence recorded during [`Context::destroy`]; empty
    /// until the context is destroyed
    pub fn teardown_order(&self) -> Vec<&'static str> {
        self.teardown_log.lock().clone()
    }

    /// Host environment this context was created against
    pub fn host(&self) -> &dyn HostEnvironment {
        &*self.host
    }

    /// Console channels for this context
    pub fn console(&self) -> &dyn ConsoleHandler {
        &*self.console
    }

    /// Whether this session is driven interactively
    pub fn is_interactive(&self) -> bool {
        self.console.is_interactive()
    }

    /// Session start parameters
    pub fn start_params(&self) -> &StartParams {
        &self.start_params
    }

    /// Whether the environment trio has been built (always true for full
    /// startup)
    pub fn is_fully_initialized(&self) -> bool {
        self.fully_initialized.load(Ordering::Acquire)
    }

    /// Whether the last evaluation result should be surfaced by the shell
    pub fn is_visible(&self) -> bool {
        self.result_visible.load(Ordering::Relaxed)
    }

    /// Update result visibility. Ignored when the process-wide
    /// ignore-visibility flag is set, and for the initial context while its
    /// deferred bootstrap is still incomplete (the bootstrap evaluates
    /// internal expressions that must not surface).
    pub fn set_visible(&self, visible: bool) {
        if static_bindings().ignore_visibility {
            return;
        }
        if self.is_initial() && !self.is_fully_initialized() {
            return;
        }
        self.result_visible.store(visible, Ordering::Relaxed);
    }

    /// Whether the base namespace is currently being bootstrapped
    pub fn is_loading_base(&self) -> bool {
        self.loading_base.load(Ordering::Relaxed)
    }

    /// Mark the base-namespace bootstrap in progress
    pub fn set_loading_base(&self, loading: bool) {
        self.loading_base.store(loading, Ordering::Relaxed);
    }

    /// Whether method-table dispatch is enabled for this context
    pub fn is_method_table_dispatch_on(&self) -> bool {
        self.method_table_dispatch.load(Ordering::Relaxed)
    }

    /// Enable or disable method-table dispatch
    pub fn set_method_table_dispatch(&self, on: bool) {
        self.method_table_dispatch.store(on, Ordering::Relaxed);
    }

    /// Whether primitives may carry methods in this context
    pub fn allow_primitive_methods(&self) -> bool {
        self.allow_primitive_methods.load(Ordering::Relaxed)
    }

    /// Enable or disable primitive methods
    pub fn set_allow_primitive_methods(&self, on: bool) {
        self.allow_primitive_methods.store(on, Ordering::Relaxed);
    }

    /// Null-method-object marker
    pub fn is_null_method_object(&self) -> bool {
        self.null_method_object.load(Ordering::Relaxed)
    }

    /// Set the null-method-object marker
    pub fn set_null_method_object(&self, on: bool) {
        self.null_method_object.store(on, Ordering::Relaxed);
    }

    /// Superclass chain recorded for `class_name`
    pub fn class_extends(&self, class_name: &str) -> Option<Vec<String>> {
        self.class_extends.read().get(class_name).cloned()
    }

    /// Record the superclass chain for `class_name`
    pub fn put_class_extends(&self, class_name: &str, extends: Vec<String>) {
        self.class_extends
            .write()
            .insert(class_name.to_string(), extends);
    }

    /// Value exported under `name` for foreign consumers
    pub fn exported_symbol(&self, name: &str) -> Option<Value> {
        self.exported_symbols.read().get(name).cloned()
    }

    /// Export `value` under `name` for foreign consumers
    pub fn export_symbol(&self, name: &str, value: Value) {
        self.exported_symbols
            .write()
            .insert(name.to_string(), value);
    }

    /// Whether this context owns its primitive-dispatch metadata (as opposed
    /// to resolving through the parent)
    pub fn has_own_primitive_dispatch(&self) -> bool {
        self.primitive_dispatch.is_some()
    }

    /// Run `f` against the primitive-dispatch metadata this context
    /// resolves to: its own copy for exclusive contexts, the parent's for
    /// the shared kinds (which never run concurrently with their parent).
    ///
    /// # Panics
    ///
    /// Panics if a shared context has no live parent to resolve through;
    /// that can only happen after the caller destroyed the parent before
    /// the child, which the teardown ordering contract forbids.
    pub fn with_primitive_dispatch<R>(
        &self,
        f: impl FnOnce(&mut PrimitiveDispatchInfo) -> R,
    ) -> R {
        match &self.primitive_dispatch {
            Some(info) => f(&mut info.lock()),
            None => {
                let parent = self
                    .parent
                    .and_then(registry::lookup)
                    .expect("shared context has no live parent for primitive dispatch");
                parent.with_primitive_dispatch(f)
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("initial", &self.is_initial())
            .field("parent", &self.parent)
            .field("lifecycle", &self.lifecycle_state())
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context: {}", self.id)
    }
}
