//! Error types for context lifecycle and sharing-policy violations

use thiserror::Error;

use crate::kind::ContextKind;

/// Result type for context-manager operations
pub type Result<T> = std::result::Result<T, ContextError>;

/// Structural violations reported to the caller as recoverable errors.
///
/// Binding violations (lookup on an unbound thread, double-bind) are caller
/// contract violations and panic instead; see [`crate::registry`]. Host
/// misconfiguration terminates the process via [`fatal_misconfiguration`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The parent already has a live shared-write child
    #[error("can't have multiple active shared-write contexts under one parent")]
    SharedWriteChildExists,

    /// The requested kind requires a parent context
    #[error("context kind {kind:?} requires a parent context")]
    ParentRequired {
        /// Kind that was requested
        kind: ContextKind,
    },

    /// The parent context is not registered (already destroyed or never created)
    #[error("parent context is not live")]
    ParentNotLive,

    /// A shared-write child cannot be stacked under another shared-write parent
    #[error("context kind {kind:?} cannot be created under a {parent_kind:?} parent")]
    InvalidParentKind {
        /// Kind that was requested
        kind: ContextKind,
        /// Kind of the supplied parent
        parent_kind: ContextKind,
    },

    /// Operation requires an active context
    #[error("context {id} is not active")]
    NotActive {
        /// Id of the offending context
        id: u64,
    },

    /// The context has already been destroyed
    #[error("context {id} has already been destroyed")]
    AlreadyDestroyed {
        /// Id of the offending context
        id: u64,
    },

    /// A state-module constructor failed during activation
    #[error("state module {module} failed to initialize: {message}")]
    StateInitFailed {
        /// Name of the module whose constructor failed
        module: &'static str,
        /// Constructor failure detail
        message: String,
    },

    /// `complete_initialization` called on a context created with full startup
    #[error("context {id} was not created with deferred startup")]
    NotDeferred {
        /// Id of the offending context
        id: u64,
    },

    /// `complete_initialization` called a second time
    #[error("context {id} already completed initialization")]
    AlreadyInitialized {
        /// Id of the offending context
        id: u64,
    },
}

/// Terminate the process after a host-environment misconfiguration.
///
/// Used when the embedding caller violated a precondition the subsystem
/// cannot continue from, e.g. supplying a host environment without a console
/// handler. Mirrors a runtime "suicide": the diagnostic is written to stderr
/// and the process exits with a non-zero status.
pub fn fatal_misconfiguration(msg: &str) -> ! {
    log::error!("fatal host misconfiguration: {msg}");
    eprintln!("fatal error: {msg}");
    std::process::exit(2);
}
