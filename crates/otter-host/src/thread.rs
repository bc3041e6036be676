//! Per-thread entry point.
//!
//! A [`ScriptThread`] belongs to one calling thread. It owns that thread's
//! scope stack, deferred-action queue, and nesting state, and is the only
//! way to start a top-level run. It is `Send` but deliberately not shared:
//! hand one to each worker.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::context::ThreadState;
use crate::controller::{ExecutionController, RunOutcome, Script};
use crate::deferred::{self, DeferredAction, FlushReport};
use crate::document::Document;
use crate::engine::ScriptEngine;
use crate::error::ScriptError;
use crate::scope::GlobalScope;
use crate::value::Value;

pub struct ScriptThread<E: ScriptEngine> {
    controller: Arc<ExecutionController<E>>,
    state: ThreadState<E>,
}

impl<E: ScriptEngine> ScriptThread<E> {
    pub fn new(controller: Arc<ExecutionController<E>>) -> Self {
        Self {
            controller,
            state: ThreadState::new(),
        }
    }

    pub fn controller(&self) -> &Arc<ExecutionController<E>> {
        &self.controller
    }

    /// Run `script` against `document` with `scope` as its global scope.
    ///
    /// Returns [`RunOutcome::StaleDocument`] without entering the engine when
    /// the document is no longer the active document of its window. Failures
    /// are routed; in strict mode they are also returned. Pending deferred
    /// actions are flushed before this returns unless the queue is held.
    pub fn execute(
        &mut self,
        document: &Arc<Document>,
        scope: &Arc<GlobalScope>,
        script: Script<'_, E::Script>,
    ) -> Result<RunOutcome, ScriptError> {
        let controller = Arc::clone(&self.controller);
        let result = controller.execute_top(&mut self.state, document, scope, script);
        self.finish_top_level(document, result)
    }

    /// Call a function value as a top-level run.
    pub fn call_function(
        &mut self,
        document: &Arc<Document>,
        scope: &Arc<GlobalScope>,
        function: &E::Function,
        this: &Value,
        args: &[Value],
    ) -> Result<RunOutcome, ScriptError> {
        let controller = Arc::clone(&self.controller);
        let result = controller.call_top(&mut self.state, document, scope, function, this, args);
        self.finish_top_level(document, result)
    }

    /// Preprocess and compile, routing a compile error like a failed run.
    ///
    /// `Ok(None)` when the source was suppressed or the error swallowed.
    pub fn compile(
        &mut self,
        document: &Arc<Document>,
        source: &str,
        name: &str,
        line: u32,
    ) -> Result<Option<E::Script>, ScriptError> {
        match self.controller.compile(document, source, name, line) {
            Ok(script) => Ok(script),
            Err(error) => self
                .controller
                .router()
                .route(document, error.into())
                .map(|()| None),
        }
    }

    /// Stop flushing deferred actions when runs return.
    pub fn hold(&mut self) {
        self.state.deferred.hold();
    }

    /// Resume flushing at the end of the next run. Pending actions stay
    /// queued until then.
    pub fn release(&mut self) {
        self.state.deferred.release();
    }

    pub fn is_held(&self) -> bool {
        self.state.deferred.is_held()
    }

    pub fn pending_actions(&self) -> usize {
        self.state.deferred.len()
    }

    /// Queue an action from outside a run.
    pub fn defer(&mut self, action: DeferredAction<ScriptThread<E>>) {
        self.state.deferred.enqueue(action);
    }

    /// Flush now, ignoring the hold state.
    pub fn force_flush(&mut self) -> FlushReport {
        self.flush()
    }

    fn finish_top_level(
        &mut self,
        document: &Document,
        result: Result<RunOutcome, ScriptError>,
    ) -> Result<RunOutcome, ScriptError> {
        let outcome = match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => self
                .controller
                .router()
                .route(document, error)
                .map(|()| RunOutcome::NoResult),
        };
        if !self.state.is_running() && !self.state.deferred.is_held() {
            self.flush();
        }
        outcome
    }

    fn flush(&mut self) -> FlushReport {
        let batch = self.state.deferred.take_pending();
        if batch.is_empty() {
            return FlushReport::default();
        }
        let report = deferred::run_batch(batch, self);
        let stats = self.controller.stats();
        stats
            .actions_executed
            .fetch_add(report.executed as u64, Ordering::Relaxed);
        stats
            .actions_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        tracing::trace!(
            executed = report.executed,
            skipped = report.skipped,
            failed = report.failed,
            "deferred actions flushed"
        );
        report
    }
}

impl<E: ScriptEngine> std::fmt::Debug for ScriptThread<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptThread")
            .field("depth", &self.state.depth)
            .field("pending_actions", &self.state.deferred.len())
            .field("held", &self.state.deferred.is_held())
            .finish()
    }
}
