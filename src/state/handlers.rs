//! Error-handling, connection, and standard-stream diversion state

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::ContextState;
use crate::context::Context;

/// Per-context error-handler and deferred-warning state
#[derive(Default)]
pub struct ErrorHandling {
    warnings: Mutex<Vec<String>>,
    current_error: Mutex<Option<String>>,
}

impl ErrorHandling {
    pub(crate) fn new_context() -> Self {
        Self::default()
    }

    /// Queue a warning for later reporting
    pub fn add_warning(&self, message: &str) {
        self.warnings.lock().push(message.to_string());
    }

    /// Drain all queued warnings
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.lock())
    }

    /// Number of queued warnings
    pub fn warning_count(&self) -> usize {
        self.warnings.lock().len()
    }

    /// Record the in-flight error message
    pub fn set_error(&self, message: &str) {
        *self.current_error.lock() = Some(message.to_string());
    }

    /// Clear and return the in-flight error message
    pub fn take_error(&self) -> Option<String> {
        self.current_error.lock().take()
    }
}

impl ContextState for ErrorHandling {
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn before_destroy(&self, ctx: &Context) {
        // Warnings queued but never reported would be lost silently.
        for warning in self.take_warnings() {
            ctx.console().print_error(&format!("unreported warning: {warning}"));
        }
    }
}

/// An open connection owned by a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Descriptor index, unique within the owning context
    pub id: u32,
    /// Human-readable description of the endpoint
    pub description: String,
}

/// Open-connection table.
///
/// Descriptors 0..=2 are reserved for the standard streams, so user
/// connections start at 3.
pub struct Connections {
    open: Mutex<Vec<Connection>>,
    next_id: AtomicU32,
}

impl Connections {
    pub(crate) fn new_context() -> Self {
        Self {
            open: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(3),
        }
    }

    /// Open a connection and return its descriptor
    pub fn open(&self, description: &str) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open.lock().push(Connection {
            id,
            description: description.to_string(),
        });
        id
    }

    /// Close the connection with descriptor `id`; returns whether it was open
    pub fn close(&self, id: u32) -> bool {
        let mut open = self.open.lock();
        let before = open.len();
        open.retain(|c| c.id != id);
        open.len() != before
    }

    /// Number of currently open connections
    pub fn open_count(&self) -> usize {
        self.open.lock().len()
    }
}

impl ContextState for Connections {
    fn name(&self) -> &'static str {
        "connections"
    }

    fn before_destroy(&self, ctx: &Context) {
        let drained = std::mem::take(&mut *self.open.lock());
        for conn in drained {
            log::debug!(
                "context {}: closing connection {} ({})",
                ctx.id(),
                conn.id,
                conn.description
            );
        }
    }
}

/// Standard-stream diversion stack (`sink`-style output redirection)
#[derive(Default)]
pub struct StdConnections {
    diversions: Mutex<Vec<String>>,
}

impl StdConnections {
    pub(crate) fn new_context() -> Self {
        Self::default()
    }

    /// Push a diversion target for the regular output channel
    pub fn divert(&self, target: &str) {
        self.diversions.lock().push(target.to_string());
    }

    /// Pop the most recent diversion; returns its target
    pub fn revert(&self) -> Option<String> {
        self.diversions.lock().pop()
    }

    /// Current diversion depth
    pub fn diversion_depth(&self) -> usize {
        self.diversions.lock().len()
    }
}

impl ContextState for StdConnections {
    fn name(&self) -> &'static str {
        "std_connections"
    }

    fn before_destroy(&self, ctx: &Context) {
        let depth = self.diversions.lock().len();
        if depth > 0 {
            log::debug!("context {}: dropping {depth} output diversion(s)", ctx.id());
            self.diversions.lock().clear();
        }
    }
}
