//! Structured error reporting decoupled from rendering
//!
//! The context manager never formats diagnostics itself; it hands structured
//! reports to a [`DiagnosticSink`] supplied at process initialization.

use std::sync::Arc;

/// Severity of a reported diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Recoverable condition worth surfacing
    Warning,
    /// Operation failed
    Error,
}

/// Receiver of structured error reports
pub trait DiagnosticSink: Send + Sync {
    /// Deliver a single report
    fn report(&self, severity: Severity, message: &str);
}

/// Default sink forwarding reports to the `log` facade
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Warning => log::warn!("{message}"),
            Severity::Error => log::error!("{message}"),
        }
    }
}

/// Sink that collects reports in memory, for embedders that render later
#[derive(Debug, Default)]
pub struct CollectingSink {
    reports: parking_lot::Mutex<Vec<(Severity, String)>>,
}

impl CollectingSink {
    /// Create an empty collecting sink
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drain all collected reports
    pub fn take_reports(&self) -> Vec<(Severity, String)> {
        std::mem::take(&mut self.reports.lock())
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, severity: Severity, message: &str) {
        self.reports.lock().push((severity, message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_accumulates_in_order() {
        let sink = CollectingSink::new();
        sink.report(Severity::Warning, "first");
        sink.report(Severity::Error, "second");
        let reports = sink.take_reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0], (Severity::Warning, "first".to_string()));
        assert_eq!(reports[1], (Severity::Error, "second".to_string()));
        assert!(sink.take_reports().is_empty());
    }
}
