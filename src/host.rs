//! Host-environment handle consumed at context-creation time
//!
//! The embedding host supplies input/output channels, interactivity, and a
//! symbol-import mechanism used to recover externally supplied configuration.
//! The context manager treats all of it as opaque interfaces.

use std::sync::Arc;

use crate::context::ContextConfig;

/// Console channels for a context.
///
/// Every context must have one; creation is fatal without it (see
/// [`crate::error::fatal_misconfiguration`]).
pub trait ConsoleHandler: Send + Sync {
    /// Write a line to the regular output channel
    fn println(&self, line: &str);

    /// Write a line to the error channel
    fn print_error(&self, line: &str);

    /// Whether this session is driven interactively
    fn is_interactive(&self) -> bool;
}

/// Console backed by the process's stdout/stderr
#[derive(Debug, Default)]
pub struct StdConsole;

impl ConsoleHandler for StdConsole {
    fn println(&self, line: &str) {
        println!("{line}");
    }

    fn print_error(&self, line: &str) {
        eprintln!("{line}");
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// Handle to the embedding host environment
pub trait HostEnvironment: Send + Sync {
    /// Console channels for contexts created against this environment
    fn console(&self) -> Option<Arc<dyn ConsoleHandler>>;

    /// Recover an externally supplied context configuration, if the host
    /// published one. Used when the caller did not pass an explicit config.
    fn import_config(&self) -> Option<ContextConfig> {
        None
    }

    /// Look up a single external environment variable
    fn env_var(&self, name: &str) -> Option<String>;

    /// Snapshot of the external environment, taken when a context builds its
    /// environment-variable state module
    fn env_snapshot(&self) -> Vec<(String, String)>;
}

/// Host environment backed by the real process environment and [`StdConsole`]
#[derive(Debug, Default)]
pub struct StdHostEnvironment;

impl StdHostEnvironment {
    /// Create a handle to the process environment
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl HostEnvironment for StdHostEnvironment {
    fn console(&self) -> Option<Arc<dyn ConsoleHandler>> {
        Some(Arc::new(StdConsole))
    }

    fn env_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn env_snapshot(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// In-memory host environment for embedders and tests: fixed variables, a
/// console that records what was printed.
pub struct MemoryHostEnvironment {
    vars: Vec<(String, String)>,
    console: Arc<MemoryConsole>,
}

impl MemoryHostEnvironment {
    /// Create an environment with the given variables
    pub fn new(vars: Vec<(String, String)>) -> Arc<Self> {
        Arc::new(Self {
            vars,
            console: Arc::new(MemoryConsole::default()),
        })
    }

    /// The recording console backing this environment
    pub fn memory_console(&self) -> Arc<MemoryConsole> {
        self.console.clone()
    }
}

impl HostEnvironment for MemoryHostEnvironment {
    fn console(&self) -> Option<Arc<dyn ConsoleHandler>> {
        Some(self.console.clone())
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.vars
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    fn env_snapshot(&self) -> Vec<(String, String)> {
        self.vars.clone()
    }
}

/// Console that records output lines instead of printing them
#[derive(Debug, Default)]
pub struct MemoryConsole {
    output: parking_lot::Mutex<Vec<String>>,
    errors: parking_lot::Mutex<Vec<String>>,
}

impl MemoryConsole {
    /// Lines written to the regular channel so far
    pub fn output_lines(&self) -> Vec<String> {
        self.output.lock().clone()
    }

    /// Lines written to the error channel so far
    pub fn error_lines(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl ConsoleHandler for MemoryConsole {
    fn println(&self, line: &str) {
        self.output.lock().push(line.to_string());
    }

    fn print_error(&self, line: &str) {
        self.errors.lock().push(line.to_string());
    }

    fn is_interactive(&self) -> bool {
        false
    }
}
