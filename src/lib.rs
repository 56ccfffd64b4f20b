//! Multi-tenant execution-context manager
//!
//! Creates, isolates, shares, binds-to-threads, and tears down independent
//! interpreter sessions ("contexts") inside one long-lived process. The
//! language frontend (parser, builtin dispatch, data containers) stays
//! outside; it is injected once at startup through
//! [`bindings::initialize_process`] and consumed as opaque interfaces.
//!
//! ```no_run
//! use std::sync::Arc;
//! use polyctx::{Context, StaticRuntimeBindings, StdHostEnvironment};
//!
//! polyctx::initialize_process(StaticRuntimeBindings::minimal());
//! let host = StdHostEnvironment::new();
//! let ctx = Context::create(None, host).unwrap();
//! assert_eq!(polyctx::current().id(), ctx.id());
//! ctx.destroy().unwrap();
//! ```

#![warn(missing_docs)]

pub mod bindings;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod eval;
pub mod host;
pub mod kind;
pub mod registry;
pub mod state;

// Re-export the main types
pub use bindings::{
    BuiltinDescriptor, BuiltinLookup, CodeBuilder, ForeignAccessFactory, StaticRuntimeBindings,
    initialize_process, is_initial_context_initialized, is_process_initialized,
    static_bindings, try_initialize_process,
};
pub use context::{
    Context, ContextConfig, ContextId, LifecycleState, PrimitiveDispatchInfo,
    PrimitiveDispatchMode, StartParams, StartupPolicy,
};
pub use diagnostics::{DiagnosticSink, LogSink, Severity};
pub use error::{ContextError, Result};
pub use eval::{EvalResult, EvalSignal, EvalThread, spawn_isolated_evaluation};
pub use host::{
    ConsoleHandler, HostEnvironment, MemoryConsole, MemoryHostEnvironment, StdConsole,
    StdHostEnvironment,
};
pub use kind::ContextKind;
pub use registry::{ContextGuard, current, try_current, with_context};
pub use state::{ContextState, StateModules};
