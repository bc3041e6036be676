//! Script engine contract.
//!
//! The host does not interpret scripts. Anything that can compile a source
//! into a runnable script and run it against a [`GlobalScope`] can be
//! plugged in by implementing [`ScriptEngine`].
//!
//! # Progress callback
//!
//! Timeout enforcement is cooperative. An engine that advertises
//! [`EngineCapabilities::progress_callback`] calls
//! [`ExecutionContext::tick`] as it executes; every
//! `progress_step_threshold` steps the context runs the timeout check and
//! may return a [`TimeoutError`](crate::error::TimeoutError), which the engine
//! should propagate unchanged as [`EngineError::Timeout`]. The timeout is
//! latched: later ticks fail again, and the run fails with it even if the
//! engine turned it into a script exception. Engines without the capability
//! are only checked when a run or nested call returns.

use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::document::Document;
use crate::error::{CompileError, EngineError};
use crate::scope::GlobalScope;
use crate::value::Value;

/// Optional engine features the controller adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    /// The engine calls [`ExecutionContext::tick`] during execution.
    pub progress_callback: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            progress_callback: true,
        }
    }
}

/// A pluggable script engine.
pub trait ScriptEngine: Send + Sync + Sized + 'static {
    /// Compiled, runnable script.
    type Script: Send + Sync;
    /// Script-side function value usable with `call_function`.
    type Function: Send + Sync;

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::default()
    }

    /// Compile `source`. `line` is the 1-based line the source starts at
    /// inside its containing resource.
    fn compile(&self, source: &str, name: &str, line: u32) -> Result<Self::Script, CompileError>;

    /// Run a compiled script with `scope` as its global scope.
    fn run(
        &self,
        script: &Self::Script,
        scope: &Arc<GlobalScope>,
        cx: &mut ExecutionContext<'_, Self>,
    ) -> Result<Value, EngineError>;

    /// Call a function value.
    fn call(
        &self,
        function: &Self::Function,
        scope: &Arc<GlobalScope>,
        this: &Value,
        args: &[Value],
        cx: &mut ExecutionContext<'_, Self>,
    ) -> Result<Value, EngineError>;
}

/// Rewrites sources before compilation.
///
/// Returning an empty string suppresses execution entirely.
pub trait ScriptPreprocessor: Send + Sync {
    fn preprocess(&self, document: &Document, source: &str, name: &str, line: u32) -> String;
}

impl<F> ScriptPreprocessor for F
where
    F: Fn(&Document, &str, &str, u32) -> String + Send + Sync,
{
    fn preprocess(&self, document: &Document, source: &str, name: &str, line: u32) -> String {
        self(document, source, name, line)
    }
}
