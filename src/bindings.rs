//! Process-wide runtime bindings, set once before any context is created
//!
//! These finesse the layering between the context manager and the language
//! frontend: the parser/code-builder, the builtin lookup table, and the
//! foreign-access factory are injected here at startup and read by all
//! contexts without synchronization thereafter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::diagnostics::{DiagnosticSink, LogSink};

/// Builds executable code from source text.
///
/// The context manager never inspects the produced representation; it is an
/// opaque value handed back to the frontend.
pub trait CodeBuilder: Send + Sync {
    /// Parse and build `source`, returning an opaque code value or a
    /// diagnostic message
    fn build(&self, source: &str) -> std::result::Result<Value, String>;
}

/// Descriptor for a builtin function, resolved through [`BuiltinLookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    /// Builtin name
    pub name: String,
    /// Whether the builtin is a primitive (directly dispatchable) as opposed
    /// to an internal-only builtin
    pub primitive: bool,
}

/// Lookup table for the language's builtin functions
pub trait BuiltinLookup: Send + Sync {
    /// Descriptor for the builtin named `name`, if one exists
    fn lookup_builtin(&self, name: &str) -> Option<BuiltinDescriptor>;

    /// Is `name` a primitive builtin (not internal-only)?
    fn is_primitive_builtin(&self, name: &str) -> bool {
        self.lookup_builtin(name).is_some_and(|d| d.primitive)
    }
}

/// Factory for cross-language foreign-access objects
pub trait ForeignAccessFactory: Send + Sync {
    /// Whether values of this runtime may be handed to foreign languages
    fn polyglot_enabled(&self) -> bool;
}

/// Code builder for embeddings without a language frontend: every build
/// request fails with a uniform message.
#[derive(Debug, Default)]
pub struct DisabledCodeBuilder;

impl CodeBuilder for DisabledCodeBuilder {
    fn build(&self, _source: &str) -> std::result::Result<Value, String> {
        Err("no code builder installed".to_string())
    }
}

/// Builtin lookup with an empty table
#[derive(Debug, Default)]
pub struct EmptyBuiltinLookup;

impl BuiltinLookup for EmptyBuiltinLookup {
    fn lookup_builtin(&self, _name: &str) -> Option<BuiltinDescriptor> {
        None
    }
}

/// Foreign access disabled
#[derive(Debug, Default)]
pub struct NoForeignAccess;

impl ForeignAccessFactory for NoForeignAccess {
    fn polyglot_enabled(&self) -> bool {
        false
    }
}

/// The set-once process-wide bindings
pub struct StaticRuntimeBindings {
    /// Parser/code-builder injected by the frontend
    pub code_builder: Arc<dyn CodeBuilder>,
    /// Builtin lookup table
    pub builtin_lookup: Arc<dyn BuiltinLookup>,
    /// Foreign-access factory
    pub foreign_access: Arc<dyn ForeignAccessFactory>,
    /// Structured error-report receiver
    pub diagnostics: Arc<dyn DiagnosticSink>,
    /// Suppress all result-visibility updates across every context
    pub ignore_visibility: bool,
}

impl StaticRuntimeBindings {
    /// Bindings suitable for embedding without a language frontend:
    /// disabled code builder, empty builtin table, no foreign access,
    /// diagnostics forwarded to the `log` facade.
    pub fn minimal() -> Self {
        Self {
            code_builder: Arc::new(DisabledCodeBuilder),
            builtin_lookup: Arc::new(EmptyBuiltinLookup),
            foreign_access: Arc::new(NoForeignAccess),
            diagnostics: Arc::new(LogSink),
            ignore_visibility: false,
        }
    }
}

static BINDINGS: OnceCell<StaticRuntimeBindings> = OnceCell::new();

static INITIAL_CONTEXT_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Install the process-wide bindings. Must run before any context is created.
///
/// # Panics
///
/// Panics if called more than once; initialization is a one-time startup
/// step, repeating it is a caller contract violation.
pub fn initialize_process(bindings: StaticRuntimeBindings) {
    if !try_initialize_process(bindings) {
        panic!("initialize_process called twice");
    }
}

/// Install the process-wide bindings unless already installed.
///
/// Returns `false` (and drops `bindings`) when initialization already
/// happened. Intended for embedders whose startup path may run from more
/// than one entry point.
pub fn try_initialize_process(bindings: StaticRuntimeBindings) -> bool {
    BINDINGS.set(bindings).is_ok()
}

/// The installed bindings.
///
/// # Panics
///
/// Panics if [`initialize_process`] has not run yet; contexts cannot exist
/// before process initialization.
pub fn static_bindings() -> &'static StaticRuntimeBindings {
    BINDINGS
        .get()
        .expect("static runtime bindings read before initialize_process")
}

/// Whether process initialization has happened
pub fn is_process_initialized() -> bool {
    BINDINGS.get().is_some()
}

/// True once the initial context has completed full initialization.
///
/// With deferred startup this flips only after
/// [`crate::context::Context::complete_initialization`].
pub fn is_initial_context_initialized() -> bool {
    INITIAL_CONTEXT_INITIALIZED.load(Ordering::Acquire)
}

pub(crate) fn mark_initial_context_initialized() {
    INITIAL_CONTEXT_INITIALIZED.store(true, Ordering::Release);
}
