//! Execution control.
//!
//! [`ExecutionController`] is shared by every thread that runs scripts. It
//! owns the engine, the configuration, and the error router. Each calling
//! thread gets its own [`ScriptThread`](crate::thread::ScriptThread) holding
//! the per-thread state; nothing is kept in thread-locals.
//!
//! A run goes through these steps:
//!
//! 1. stale check (the document must be the active document of its window)
//! 2. the document's [`ExecutionLock`](crate::document::ExecutionLock)
//! 3. scope stack push
//! 4. engine run under an [`ExecutionContext`]
//! 5. scope stack pop and lock release
//! 6. error routing and deferred flush (top level only)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::HostConfig;
use crate::context::{DebugHook, ExecutionContext, ThreadState};
use crate::document::{Document, RunState};
use crate::engine::{ScriptEngine, ScriptPreprocessor};
use crate::error::{CompileError, EngineError, HostError, ScriptError};
use crate::listener::{LoggingListener, ScriptListener};
use crate::router::ErrorRouter;
use crate::scope::GlobalScope;
use crate::thread::ScriptThread;
use crate::value::Value;

/// What a run yields when it does not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The script ran to completion
    Completed(Value),
    /// Nothing ran, or the failure was swallowed
    NoResult,
    /// The document was no longer active; the engine was never entered
    StaleDocument,
}

impl RunOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleDocument)
    }
}

/// Source text or an already compiled script.
#[derive(Debug)]
pub enum Script<'s, S> {
    Source { text: &'s str, name: &'s str, line: u32 },
    Compiled(&'s S),
}

impl<'s, S> Script<'s, S> {
    /// Source text starting at line 1.
    pub fn source(text: &'s str, name: &'s str) -> Self {
        Self::Source {
            text,
            name,
            line: 1,
        }
    }

    pub fn source_at(text: &'s str, name: &'s str, line: u32) -> Self {
        Self::Source { text, name, line }
    }
}

impl<S> Clone for Script<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Script<'_, S> {}

/// Controller statistics
#[derive(Debug, Default)]
pub struct ControllerStats {
    /// Top-level runs that entered the engine
    pub runs_started: AtomicU64,
    /// Top-level runs that returned a value
    pub runs_completed: AtomicU64,
    /// Top-level runs that failed with a runtime failure, plus top-level
    /// sources that did not compile (those never count as started)
    pub runs_failed: AtomicU64,
    /// Top-level runs stopped by the time budget
    pub runs_timed_out: AtomicU64,
    /// Runs skipped because their document was no longer active
    pub stale_skipped: AtomicU64,
    /// Deferred actions executed
    pub actions_executed: AtomicU64,
    /// Deferred actions skipped because their document died
    pub actions_skipped: AtomicU64,
}

impl ControllerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> ControllerStatsSnapshot {
        ControllerStatsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_timed_out: self.runs_timed_out.load(Ordering::Relaxed),
            stale_skipped: self.stale_skipped.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            actions_skipped: self.actions_skipped.load(Ordering::Relaxed),
        }
    }

    fn record_finish(&self, state: RunState) {
        let counter = match state {
            RunState::Completed => &self.runs_completed,
            RunState::TimedOut => &self.runs_timed_out,
            _ => &self.runs_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of controller statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStatsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_timed_out: u64,
    pub stale_skipped: u64,
    pub actions_executed: u64,
    pub actions_skipped: u64,
}

impl ControllerStatsSnapshot {
    /// Top-level runs that have finished, in any state.
    pub fn runs_finished(&self) -> u64 {
        self.runs_completed + self.runs_failed + self.runs_timed_out
    }
}

/// Builder for creating an [`ExecutionController`] with custom configuration
pub struct ExecutionControllerBuilder<E: ScriptEngine> {
    engine: E,
    config: HostConfig,
    listener: Arc<dyn ScriptListener>,
    preprocessor: Option<Box<dyn ScriptPreprocessor>>,
    debug_hook: Option<Arc<dyn DebugHook>>,
}

impl<E: ScriptEngine> ExecutionControllerBuilder<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            config: HostConfig::default(),
            listener: Arc::new(LoggingListener),
            preprocessor: None,
            debug_hook: None,
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ScriptListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn preprocessor(mut self, preprocessor: impl ScriptPreprocessor + 'static) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    pub fn debug_hook(mut self, hook: Arc<dyn DebugHook>) -> Self {
        self.debug_hook = Some(hook);
        self
    }

    pub fn build(self) -> Arc<ExecutionController<E>> {
        let progress_supported = self.engine.capabilities().progress_callback;
        if !progress_supported && self.config.timeout().is_some() {
            tracing::warn!(
                timeout_ms = self.config.timeout_millis,
                "engine has no progress callback, timeout is only checked when a run returns"
            );
        }
        Arc::new(ExecutionController {
            router: ErrorRouter::new(self.listener, self.config.throw_on_script_error),
            engine: self.engine,
            config: self.config,
            preprocessor: self.preprocessor,
            debug_hook: self.debug_hook,
            stats: ControllerStats::new(),
            progress_supported,
        })
    }
}

/// Runs scripts against documents with locking, time budget, and error
/// routing.
pub struct ExecutionController<E: ScriptEngine> {
    engine: E,
    config: HostConfig,
    router: ErrorRouter,
    preprocessor: Option<Box<dyn ScriptPreprocessor>>,
    debug_hook: Option<Arc<dyn DebugHook>>,
    stats: ControllerStats,
    progress_supported: bool,
}

impl<E: ScriptEngine> ExecutionController<E> {
    pub fn builder(engine: E) -> ExecutionControllerBuilder<E> {
        ExecutionControllerBuilder::new(engine)
    }

    /// Controller with default configuration and a logging listener.
    pub fn new(engine: E) -> Arc<Self> {
        Self::builder(engine).build()
    }

    /// Per-thread handle for running scripts.
    pub fn thread(self: &Arc<Self>) -> ScriptThread<E> {
        ScriptThread::new(Arc::clone(self))
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn router(&self) -> &ErrorRouter {
        &self.router
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub fn debug_hook(&self) -> Option<&Arc<dyn DebugHook>> {
        self.debug_hook.as_ref()
    }

    /// Whether timeouts are enforced during execution rather than only at
    /// call boundaries.
    pub fn progress_supported(&self) -> bool {
        self.progress_supported
    }

    /// Preprocess and compile `source`.
    ///
    /// `Ok(None)` means the preprocessor blanked the source and nothing is
    /// to run.
    pub fn compile(
        &self,
        document: &Document,
        source: &str,
        name: &str,
        line: u32,
    ) -> Result<Option<E::Script>, CompileError> {
        let processed = match &self.preprocessor {
            Some(preprocessor) => preprocessor.preprocess(document, source, name, line),
            None => source.to_string(),
        };
        if processed.is_empty() {
            tracing::debug!(document = %document.id(), source = name, "source suppressed by preprocessor");
            return Ok(None);
        }
        self.engine.compile(&processed, name, line).map(Some)
    }

    /// Top-level run. Errors are returned unrouted.
    pub(crate) fn execute_top(
        &self,
        thread: &mut ThreadState<E>,
        document: &Arc<Document>,
        scope: &Arc<GlobalScope>,
        script: Script<'_, E::Script>,
    ) -> Result<RunOutcome, ScriptError> {
        if !self.check_active(document) {
            return Ok(RunOutcome::StaleDocument);
        }
        let compiled;
        let script = match script {
            Script::Compiled(script) => script,
            Script::Source { text, name, line } => {
                compiled = self.compile(document, text, name, line).inspect_err(|_| {
                    self.stats.runs_failed.fetch_add(1, Ordering::Relaxed);
                })?;
                match &compiled {
                    Some(script) => script,
                    None => return Ok(RunOutcome::NoResult),
                }
            }
        };
        self.run_in_document(thread, document, scope, |engine, scope, cx| {
            engine.run(script, scope, cx)
        })
        .map(RunOutcome::Completed)
        .map_err(EngineError::into_script_error)
    }

    /// Top-level function call. Errors are returned unrouted.
    pub(crate) fn call_top(
        &self,
        thread: &mut ThreadState<E>,
        document: &Arc<Document>,
        scope: &Arc<GlobalScope>,
        function: &E::Function,
        this: &Value,
        args: &[Value],
    ) -> Result<RunOutcome, ScriptError> {
        if !self.check_active(document) {
            return Ok(RunOutcome::StaleDocument);
        }
        self.run_in_document(thread, document, scope, |engine, scope, cx| {
            engine.call(function, scope, this, args, cx)
        })
        .map(RunOutcome::Completed)
        .map_err(EngineError::into_script_error)
    }

    /// Run from inside another run. The scope is the top scope of the
    /// document's window.
    pub(crate) fn run_nested(
        &self,
        thread: &mut ThreadState<E>,
        document: &Arc<Document>,
        script: Script<'_, E::Script>,
    ) -> Result<RunOutcome, EngineError> {
        if !self.check_active(document) {
            return Ok(RunOutcome::StaleDocument);
        }
        let Some(scope) = document.window().and_then(|window| window.top_scope()) else {
            self.stats.stale_skipped.fetch_add(1, Ordering::Relaxed);
            return Ok(RunOutcome::StaleDocument);
        };
        let compiled;
        let script = match script {
            Script::Compiled(script) => script,
            Script::Source { text, name, line } => {
                compiled = self
                    .compile(document, text, name, line)
                    .map_err(|e| HostError::from(ScriptError::from(e)))?;
                match &compiled {
                    Some(script) => script,
                    None => return Ok(RunOutcome::NoResult),
                }
            }
        };
        self.run_in_document(thread, document, &scope, |engine, scope, cx| {
            engine.run(script, scope, cx)
        })
        .map(RunOutcome::Completed)
    }

    fn check_active(&self, document: &Arc<Document>) -> bool {
        if document.is_active() {
            return true;
        }
        tracing::debug!(document = %document.id(), url = %document.url(), "document not active, run skipped");
        self.stats.stale_skipped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Lock the document, push the scope, and run `body` under a fresh
    /// context.
    fn run_in_document<F>(
        &self,
        thread: &mut ThreadState<E>,
        document: &Arc<Document>,
        scope: &Arc<GlobalScope>,
        body: F,
    ) -> Result<Value, EngineError>
    where
        F: FnOnce(&E, &Arc<GlobalScope>, &mut ExecutionContext<'_, E>) -> Result<Value, EngineError>,
    {
        if thread.depth >= self.config.max_call_depth {
            return Err(EngineError::StackOverflow);
        }

        let lock = document.execution_lock();
        let guard = lock.acquire();
        let top_level = !thread.is_running();
        if guard.is_outermost() {
            lock.set_running();
        }
        if top_level {
            self.stats.runs_started.fetch_add(1, Ordering::Relaxed);
        }

        let mut thread = scopeguard::guard(thread, |thread| {
            thread.scopes.pop();
            thread.depth -= 1;
            if thread.depth == 0 {
                thread.run_started = None;
                thread.timed_out = None;
            }
        });
        thread.scopes.push(Arc::clone(scope));
        thread.depth += 1;
        let depth = thread.depth;

        tracing::trace!(document = %document.id(), depth, "run started");
        if let Some(hook) = &self.debug_hook {
            hook.on_enter(document, depth);
        }

        let result = {
            let mut cx =
                ExecutionContext::new(self, &mut **thread, Arc::clone(document), Arc::clone(scope));
            let result = body(&self.engine, scope, &mut cx);
            match (cx.timed_out(), result) {
                (Some(timeout), _) => Err(EngineError::Timeout(timeout)),
                (None, Ok(value)) if !self.progress_supported => {
                    let elapsed = cx.elapsed();
                    cx.check_timeout(elapsed)
                        .map(|()| value)
                        .map_err(EngineError::from)
                }
                (None, result) => result,
            }
        };

        if let Some(hook) = &self.debug_hook {
            hook.on_exit(document, depth, result.is_ok());
        }
        tracing::trace!(document = %document.id(), depth, ok = result.is_ok(), "run finished");

        let state = match &result {
            Ok(_) => RunState::Completed,
            Err(EngineError::Timeout(_)) => RunState::TimedOut,
            Err(_) => RunState::Failed,
        };
        if guard.is_outermost() {
            lock.finish(state);
        }
        if top_level {
            self.stats.record_finish(state);
        }

        drop(thread);
        drop(guard);
        result
    }
}

impl<E: ScriptEngine> std::fmt::Debug for ExecutionController<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionController")
            .field("config", &self.config)
            .field("progress_supported", &self.progress_supported)
            .finish_non_exhaustive()
    }
}
