//! Per-context mutable state, split into pluggable modules
//!
//! Each context exclusively owns one instance of every state module. Modules
//! are constructed in a fixed order at activation (environment-derived
//! configuration first, since later modules read it) and their pre-destroy
//! hooks run in that same order during teardown; later modules may still
//! need earlier ones while finalizing.

mod base;
mod cache;
mod environments;
mod handlers;
mod rng;

pub use base::{EnvVars, Options, Profile};
pub use cache::{LazyCodeCache, Serialization};
pub use environments::Environments;
pub use handlers::{Connection, Connections, ErrorHandling, StdConnections};
pub use rng::Rng;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::context::{Context, StartupPolicy};
use crate::error::Result;
use crate::kind::ContextKind;

/// A pluggable unit of per-context mutable state.
///
/// Construction happens through each module's `new_context` factory, bound
/// to the parent's corresponding module when the context kind calls for
/// inheritance. The teardown capability is optional; the default hook is a
/// no-op.
pub trait ContextState: Send + Sync {
    /// Stable module name, used for ordering introspection and logging
    fn name(&self) -> &'static str;

    /// Hook invoked in response to context destruction, before the context
    /// is torn down. Default implementation does nothing.
    fn before_destroy(&self, _ctx: &Context) {}
}

/// The environment-derived trio, constructed eagerly under
/// [`StartupPolicy::Full`] and deferred to
/// [`Context::complete_initialization`] otherwise.
pub struct BaseState {
    /// External environment-variable snapshot
    pub env_vars: EnvVars,
    /// Interpreter options, seeded from the environment
    pub options: Options,
    /// Startup profile discovery
    pub profile: Profile,
}

impl BaseState {
    pub(crate) fn build(ctx: &Context) -> Result<Self> {
        let env_vars = EnvVars::new_context(ctx);
        let options = Options::new_context(&env_vars)?;
        let profile = Profile::new_context(&env_vars);
        Ok(Self {
            env_vars,
            options,
            profile,
        })
    }

    fn names() -> [&'static str; 3] {
        ["env_vars", "options", "profile"]
    }
}

/// The full, ordered set of state modules owned by one context.
///
/// The set is enumerated statically rather than discovered through a
/// registration mechanism; it is small and the fixed order is part of the
/// teardown contract.
pub struct StateModules {
    base: OnceCell<BaseState>,
    /// Namespace/global bindings; the unit the sharing kinds operate on
    pub environments: Environments,
    /// Per-context error-handler and warning state
    pub error_handling: ErrorHandling,
    /// Open connection table
    pub connections: Connections,
    /// Standard-stream diversion stack
    pub std_connections: StdConnections,
    /// Per-context RNG state
    pub rng: Rng,
    /// Serialization depth and reference-table state
    pub serialization: Serialization,
    /// Lazily-loaded code blob cache
    pub lazy_code_cache: LazyCodeCache,
    built_order: Mutex<Vec<&'static str>>,
}

impl StateModules {
    /// Construct the module set for `ctx`, inheriting from `parent` where the
    /// context kind calls for it. Construction order is fixed and identical
    /// across all contexts of the same kind.
    pub(crate) fn build(
        ctx: &Context,
        parent: Option<&StateModules>,
        startup: StartupPolicy,
    ) -> Result<Self> {
        let base = OnceCell::new();
        let mut built = Vec::with_capacity(10);
        if startup == StartupPolicy::Full {
            base.set(BaseState::build(ctx)?)
                .unwrap_or_else(|_| unreachable!("base state set twice during build"));
            built.extend(BaseState::names());
        }

        let environments = Environments::new_context(ctx.kind(), parent.map(|p| &p.environments));
        built.push(environments.name());
        let error_handling = ErrorHandling::new_context();
        built.push(error_handling.name());
        let connections = Connections::new_context();
        built.push(connections.name());
        let std_connections = StdConnections::new_context();
        built.push(std_connections.name());
        let rng = Rng::new_context(ctx, parent.map(|p| &p.rng));
        built.push(rng.name());
        let serialization = Serialization::new_context();
        built.push(serialization.name());
        let lazy_code_cache = LazyCodeCache::new_context();
        built.push(lazy_code_cache.name());

        Ok(Self {
            base,
            environments,
            error_handling,
            connections,
            std_connections,
            rng,
            serialization,
            lazy_code_cache,
            built_order: Mutex::new(built),
        })
    }

    /// Build the deferred environment trio. Returns `false` if it was
    /// already built.
    pub(crate) fn complete_base(&self, ctx: &Context) -> Result<bool> {
        if self.base.get().is_some() {
            return Ok(false);
        }
        let base = BaseState::build(ctx)?;
        if self.base.set(base).is_err() {
            return Ok(false);
        }
        self.built_order.lock().extend(BaseState::names());
        Ok(true)
    }

    /// The environment trio, present unless startup was deferred and
    /// initialization has not been completed yet
    pub fn base(&self) -> Option<&BaseState> {
        self.base.get()
    }

    /// Environment-variable module, if built
    pub fn env_vars(&self) -> Option<&EnvVars> {
        self.base.get().map(|b| &b.env_vars)
    }

    /// Options module, if built
    pub fn options(&self) -> Option<&Options> {
        self.base.get().map(|b| &b.options)
    }

    /// Profile module, if built
    pub fn profile(&self) -> Option<&Profile> {
        self.base.get().map(|b| &b.profile)
    }

    /// Module names in the order they were actually constructed
    pub fn construction_order(&self) -> Vec<&'static str> {
        self.built_order.lock().clone()
    }

    /// All modules in the canonical fixed order (base trio first when built)
    fn all_in_order(&self) -> Vec<&dyn ContextState> {
        let mut modules: Vec<&dyn ContextState> = Vec::with_capacity(10);
        if let Some(base) = self.base.get() {
            modules.push(&base.env_vars);
            modules.push(&base.options);
            modules.push(&base.profile);
        }
        modules.push(&self.environments);
        modules.push(&self.error_handling);
        modules.push(&self.connections);
        modules.push(&self.std_connections);
        modules.push(&self.rng);
        modules.push(&self.serialization);
        modules.push(&self.lazy_code_cache);
        modules
    }

    /// Run every module's pre-destroy hook in construction order and return
    /// the invocation sequence.
    pub(crate) fn run_before_destroy(&self, ctx: &Context) -> Vec<&'static str> {
        self.all_in_order()
            .into_iter()
            .map(|module| {
                module.before_destroy(ctx);
                module.name()
            })
            .collect()
    }
}

/// Sharing semantics applied when a module inherits from a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Inheritance {
    /// Fresh state, nothing taken from the parent
    Fresh,
    /// Live reference to the parent's state (shared-write)
    Live,
    /// Shallow structural snapshot taken at creation (shared-read-copy)
    Snapshot,
}

impl Inheritance {
    pub(crate) fn for_kind(kind: ContextKind) -> Self {
        match kind {
            ContextKind::Exclusive => Inheritance::Fresh,
            ContextKind::SharedWrite => Inheritance::Live,
            ContextKind::SharedReadCopy => Inheritance::Snapshot,
        }
    }
}
