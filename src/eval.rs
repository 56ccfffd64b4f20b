//! Isolated evaluation on a dedicated thread
//!
//! An [`EvalThread`] spawns a brand-new exclusive context on a fresh OS
//! thread, evaluates one unit of work in isolation, and reports a
//! structured result back to its creator. Whatever happens during
//! evaluation, the spawned context is destroyed and its thread-table entry
//! removed before the result is observable.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::{Value, json};

use crate::bindings::static_bindings;
use crate::context::{Context, ContextConfig, ContextId};
use crate::diagnostics::Severity;
use crate::host::HostEnvironment;

/// Coarse failure classification reported for uncaught panics. The raw
/// payload is logged but never crosses the thread boundary; it may hold
/// non-serializable internals.
const INTERNAL_ERROR: &str = "internal error";

/// Non-value outcomes a work unit may signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalSignal {
    /// Source could not be parsed/validated; carries the diagnostic message
    Parse(String),
    /// The evaluated code requested process termination with this status.
    /// Treated as successful termination of the evaluation, not an error.
    Exit(i32),
}

/// Structured result of an isolated evaluation.
///
/// Mirrors the result-with-error-marker shape: a value plus an optional
/// error message. A requested-termination signal produces a success whose
/// value is the exit status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResult {
    context_id: Option<ContextId>,
    value: Value,
    error: Option<String>,
}

impl EvalResult {
    fn success(context_id: ContextId, value: Value) -> Self {
        Self {
            context_id: Some(context_id),
            value,
            error: None,
        }
    }

    fn failure(context_id: Option<ContextId>, message: String) -> Self {
        Self {
            context_id,
            value: Value::Null,
            error: Some(message),
        }
    }

    /// Id of the context the work evaluated in, when one was created
    pub fn context_id(&self) -> Option<ContextId> {
        self.context_id
    }

    /// The result value; `Null` for error results
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether the result carries an error marker
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// The error marker, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Live evaluation threads keyed by the id of the context they evaluate in
static EVAL_THREADS: Lazy<DashMap<u64, String>> = Lazy::new(DashMap::new);

/// Number of evaluation threads currently running
pub fn live_eval_thread_count() -> usize {
    EVAL_THREADS.len()
}

/// A spawned isolated evaluation, joinable for its structured result
pub struct EvalThread {
    handle: JoinHandle<EvalResult>,
}

impl EvalThread {
    /// Spawn a fresh thread that creates an exclusive context, runs `work`
    /// in it, and destroys the context before exiting.
    pub fn spawn<F>(host: Arc<dyn HostEnvironment>, work: F) -> std::io::Result<EvalThread>
    where
        F: FnOnce(&Context) -> Result<Value, EvalSignal> + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name("polyctx-eval".to_string())
            .spawn(move || run_isolated(host, work))?;
        Ok(EvalThread { handle })
    }

    /// Wait for the evaluation to finish and return its result
    pub fn join(self) -> EvalResult {
        match self.handle.join() {
            Ok(result) => result,
            Err(payload) => {
                // The evaluation closure converts panics itself; reaching
                // this arm means the context lifecycle panicked outside it.
                log::error!("evaluation thread died outside the work unit: {payload:?}");
                EvalResult::failure(None, INTERNAL_ERROR.to_string())
            }
        }
    }
}

/// Spawn an isolated evaluation and wait for its result.
///
/// Synchronous-until-complete from the calling thread's perspective;
/// cancellation, if needed, belongs to the external evaluation driver.
pub fn spawn_isolated_evaluation<F>(host: Arc<dyn HostEnvironment>, work: F) -> EvalResult
where
    F: FnOnce(&Context) -> Result<Value, EvalSignal> + Send + 'static,
{
    match EvalThread::spawn(host, work) {
        Ok(thread) => thread.join(),
        Err(err) => {
            log::error!("failed to spawn evaluation thread: {err}");
            EvalResult::failure(None, INTERNAL_ERROR.to_string())
        }
    }
}

fn run_isolated<F>(host: Arc<dyn HostEnvironment>, work: F) -> EvalResult
where
    F: FnOnce(&Context) -> Result<Value, EvalSignal> + Send + 'static,
{
    let ctx = match Context::create(Some(ContextConfig::exclusive()), host) {
        Ok(ctx) => ctx,
        Err(err) => {
            log::error!("evaluation context creation failed: {err}");
            return EvalResult::failure(None, format!("context creation failed: {err}"));
        }
    };
    let id = ctx.id();
    EVAL_THREADS.insert(
        id.raw(),
        std::thread::current().name().unwrap_or("eval").to_string(),
    );

    let outcome = catch_unwind(AssertUnwindSafe(|| work(&ctx)));
    let result = match outcome {
        Ok(Ok(value)) => EvalResult::success(id, value),
        Ok(Err(EvalSignal::Exit(status))) => {
            // Requested termination counts as successful completion; the
            // result carries the status instead of propagating a crash.
            EvalResult::success(id, json!(status))
        }
        Ok(Err(EvalSignal::Parse(message))) => {
            ctx.console().print_error(&format!("parse error: {message}"));
            EvalResult::failure(Some(id), message)
        }
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            log::error!("uncaught failure in evaluation context {id}: {detail}");
            static_bindings().diagnostics.report(
                Severity::Error,
                &format!("uncaught failure in evaluation context {id}"),
            );
            ctx.console().print_error(INTERNAL_ERROR);
            EvalResult::failure(Some(id), INTERNAL_ERROR.to_string())
        }
    };

    if let Err(err) = ctx.destroy() {
        log::warn!("destroying evaluation context {id} failed: {err}");
    }
    EVAL_THREADS.remove(&id.raw());
    result
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
