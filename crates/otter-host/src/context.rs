//! Per-run execution context.
//!
//! An [`ExecutionContext`] is created for every run (top-level or nested)
//! and handed to the engine. It carries the run's document and scope, the
//! per-thread state (scope stack, deferred queue, call depth), and the
//! progress callback that enforces the time budget.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::controller::{ExecutionController, RunOutcome, Script};
use crate::deferred::{DeferredAction, DeferredActionQueue};
use crate::document::Document;
use crate::engine::ScriptEngine;
use crate::error::{EngineError, HostResult, TimeoutError};
use crate::scope::GlobalScope;
use crate::thread::ScriptThread;
use crate::value::Value;

/// Observer notified around runs. Every method defaults to a no-op.
pub trait DebugHook: Send + Sync {
    /// A run is about to enter the engine. `depth` is 1 for top-level runs.
    fn on_enter(&self, _document: &Document, _depth: usize) {}

    /// A run left the engine.
    fn on_exit(&self, _document: &Document, _depth: usize, _succeeded: bool) {}

    /// The progress callback fired.
    fn on_progress(&self, _document: &Document, _elapsed: Duration) {}
}

/// State owned by one calling thread and threaded through every run it makes.
pub(crate) struct ThreadState<E: ScriptEngine> {
    /// Scopes of the runs in progress, outermost first
    pub(crate) scopes: Vec<Arc<GlobalScope>>,
    pub(crate) deferred: DeferredActionQueue<ScriptThread<E>>,
    /// Nested runs and host-mediated calls in progress
    pub(crate) depth: usize,
    /// Start of the outermost run; nested runs share its budget
    pub(crate) run_started: Option<Instant>,
    /// First timeout raised under the outermost run. Once set, every
    /// progress check and every enclosing run fails with it.
    pub(crate) timed_out: Option<TimeoutError>,
}

impl<E: ScriptEngine> ThreadState<E> {
    pub(crate) fn new() -> Self {
        Self {
            scopes: Vec::new(),
            deferred: DeferredActionQueue::new(),
            depth: 0,
            run_started: None,
            timed_out: None,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.depth > 0
    }
}

/// Context of one run, handed to [`ScriptEngine::run`] and
/// [`ScriptEngine::call`].
pub struct ExecutionContext<'a, E: ScriptEngine> {
    controller: &'a ExecutionController<E>,
    thread: &'a mut ThreadState<E>,
    document: Arc<Document>,
    scope: Arc<GlobalScope>,
    started: Instant,
    steps: u64,
    next_check: u64,
}

impl<'a, E: ScriptEngine> ExecutionContext<'a, E> {
    pub(crate) fn new(
        controller: &'a ExecutionController<E>,
        thread: &'a mut ThreadState<E>,
        document: Arc<Document>,
        scope: Arc<GlobalScope>,
    ) -> Self {
        let started = *thread.run_started.get_or_insert_with(Instant::now);
        let threshold = controller.config().progress_step_threshold;
        Self {
            controller,
            thread,
            document,
            scope,
            started,
            steps: 0,
            next_check: threshold,
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Scope of this run.
    pub fn scope(&self) -> &Arc<GlobalScope> {
        &self.scope
    }

    /// Scope of the outermost run on this thread. Relative references made
    /// by re-entrant callbacks resolve against it.
    pub fn starting_scope(&self) -> &Arc<GlobalScope> {
        self.thread.scopes.first().unwrap_or(&self.scope)
    }

    /// Nesting depth, 1 for a top-level run.
    pub fn depth(&self) -> usize {
        self.thread.depth
    }

    /// Wall-clock time since the outermost run started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Steps reported through [`tick`](Self::tick) in this run.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Report `steps` executed engine steps.
    ///
    /// Every `progress_step_threshold` steps the progress callback runs. A
    /// returned error is fatal to the run and must reach the controller as
    /// [`EngineError::Timeout`].
    pub fn tick(&mut self, steps: u64) -> Result<(), TimeoutError> {
        if let Some(timeout) = self.thread.timed_out {
            return Err(timeout);
        }
        self.steps = self.steps.saturating_add(steps);
        if self.steps >= self.next_check {
            let threshold = self.controller.config().progress_step_threshold;
            self.next_check = self.steps.saturating_add(threshold);
            self.on_progress()?;
        }
        Ok(())
    }

    /// The progress callback. Fails once the configured budget is exceeded.
    pub fn on_progress(&mut self) -> Result<(), TimeoutError> {
        let elapsed = self.elapsed();
        if let Some(hook) = self.controller.debug_hook() {
            hook.on_progress(&self.document, elapsed);
        }
        self.check_timeout(elapsed)
    }

    pub(crate) fn check_timeout(&mut self, elapsed: Duration) -> Result<(), TimeoutError> {
        if let Some(timeout) = self.thread.timed_out {
            return Err(timeout);
        }
        match self.controller.config().timeout() {
            Some(allowed) if elapsed > allowed => {
                let timeout = TimeoutError::new(allowed, elapsed);
                self.thread.timed_out = Some(timeout);
                Err(timeout)
            }
            _ => Ok(()),
        }
    }

    /// The timeout raised under the outermost run, if any. It stays set even
    /// when the engine swallowed the error.
    pub fn timed_out(&self) -> Option<TimeoutError> {
        self.thread.timed_out
    }

    /// Schedule an action to run after the outermost run returns.
    pub fn defer(&mut self, action: DeferredAction<ScriptThread<E>>) {
        self.thread.deferred.enqueue(action);
    }

    /// Schedule a closure tied to this run's document.
    pub fn defer_fn<F>(&mut self, label: impl Into<Cow<'static, str>>, task: F)
    where
        F: FnOnce(&mut ScriptThread<E>) -> HostResult<()> + Send + 'static,
    {
        let action = DeferredAction::new(&self.document, label, task);
        self.defer(action);
    }

    /// Report a non-fatal diagnostic to the listener.
    pub fn warn(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    ) {
        self.controller
            .router()
            .warning(message, source_name, line, line_source, line_offset);
    }

    /// Call a function value from inside this run.
    ///
    /// The call goes straight to the engine: no lock, no new scope, no
    /// deferred flush. The time budget keeps running.
    pub fn call_function(
        &mut self,
        function: &E::Function,
        this: &Value,
        args: &[Value],
    ) -> Result<Value, EngineError> {
        let controller = self.controller;
        if self.thread.depth >= controller.config().max_call_depth {
            return Err(EngineError::StackOverflow);
        }
        let scope = Arc::clone(&self.scope);
        self.thread.depth += 1;
        let result = controller.engine().call(function, &scope, this, args, self);
        self.thread.depth -= 1;
        if let Some(timeout) = self.thread.timed_out {
            return Err(timeout.into());
        }
        let value = result?;
        if !controller.progress_supported() {
            let elapsed = self.elapsed();
            self.check_timeout(elapsed)?;
        }
        Ok(value)
    }

    /// Run a script against another document (or this one) from inside this
    /// run.
    ///
    /// Takes that document's execution lock, blocking while another thread
    /// runs against it. Failures propagate to the calling script as engine
    /// errors. A timeout also fails this run, even if the caller drops the
    /// error.
    pub fn execute_in(
        &mut self,
        document: &Arc<Document>,
        script: Script<'_, E::Script>,
    ) -> Result<RunOutcome, EngineError> {
        let controller = self.controller;
        controller.run_nested(self.thread, document, script)
    }
}
