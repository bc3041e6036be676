//! Error types for otter-host
//!
//! Three layers:
//! - [`HostError`]: crate-wide failures (object model, configuration, and
//!   propagated script failures in strict mode).
//! - [`ScriptError`]: what a script run can end with, as routed to listeners.
//! - [`EngineError`]: what a pluggable engine returns from `run`/`call`.

use std::time::Duration;

use thiserror::Error;

/// A source that failed to compile. Nothing was executed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("SyntaxError: {message} ({source_name}:{line})")]
pub struct CompileError {
    /// Engine diagnostic
    pub message: String,
    /// Name the source was compiled under (URL, inline handler name, ...)
    pub source_name: String,
    /// 1-based line of the error
    pub line: u32,
    /// Offending line text, when the engine reports it
    pub line_source: Option<String>,
    /// Column offset inside `line_source`
    pub line_offset: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, source_name: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            source_name: source_name.into(),
            line,
            line_source: None,
            line_offset: 0,
        }
    }

    /// Attach the offending line text and column.
    pub fn with_line_source(mut self, text: impl Into<String>, offset: u32) -> Self {
        self.line_source = Some(text.into());
        self.line_offset = offset;
        self
    }
}

/// An exception thrown out of a script run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RuntimeFailure {
    pub message: String,
    pub source_name: Option<String>,
    pub line: Option<u32>,
    /// Set when the failure is a stack overflow reported by the engine or
    /// by the host call-depth limit.
    pub stack_overflow: bool,
}

impl RuntimeFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_name: None,
            line: None,
            stack_overflow: false,
        }
    }

    pub fn at(mut self, source_name: impl Into<String>, line: u32) -> Self {
        self.source_name = Some(source_name.into());
        self.line = Some(line);
        self
    }

    pub fn stack_overflow() -> Self {
        Self {
            message: "RangeError: Maximum call stack size exceeded".to_string(),
            source_name: None,
            line: None,
            stack_overflow: true,
        }
    }
}

/// The run exceeded its time budget.
///
/// Raised by the progress callback and fatal to the run. Engines should
/// propagate it as [`EngineError::Timeout`]; a run whose engine swallows it
/// still fails with it.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("Script execution timed out: allowed {allowed_ms}ms, executed {elapsed_ms}ms")]
pub struct TimeoutError {
    pub allowed_ms: u64,
    pub elapsed_ms: u64,
}

impl TimeoutError {
    pub fn new(allowed: Duration, elapsed: Duration) -> Self {
        Self {
            allowed_ms: allowed.as_millis() as u64,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Failure of a script run, as seen by the error router and by callers in
/// strict mode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeFailure),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl ScriptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors returned by a [`ScriptEngine`](crate::engine::ScriptEngine) run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Uncaught script exception
    #[error(transparent)]
    Exception(RuntimeFailure),

    /// The engine's own stack overflowed
    #[error("RangeError: Maximum call stack size exceeded")]
    StackOverflow,

    /// Raised by the progress callback; must not be caught by scripts
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// A host function failed
    #[error(transparent)]
    Host(#[from] HostError),
}

impl EngineError {
    /// Create an exception error from a message
    pub fn exception(message: impl Into<String>) -> Self {
        Self::Exception(RuntimeFailure::new(message))
    }

    /// Classify for routing. Stack overflows and host failures become
    /// runtime failures; a timeout stays a timeout.
    pub fn into_script_error(self) -> ScriptError {
        match self {
            Self::Exception(failure) => ScriptError::Runtime(failure),
            Self::StackOverflow => ScriptError::Runtime(RuntimeFailure::stack_overflow()),
            Self::Timeout(timeout) => ScriptError::Timeout(timeout),
            Self::Host(HostError::Script(script)) => script,
            Self::Host(other) => ScriptError::Runtime(RuntimeFailure::new(other.to_string())),
        }
    }
}

/// Errors that can occur in host operations
#[derive(Debug, Error)]
pub enum HostError {
    /// Script failure propagated in strict mode
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Host function received the wrong kind of value
    #[error("TypeError: {0}")]
    TypeError(String),

    /// A member name is already defined on the target object
    #[error("{class}: property '{property}' is already defined")]
    PropertyCollision { class: String, property: String },

    /// Setting a prototype link would create a cycle
    #[error("{0}: cyclic prototype chain")]
    CyclicPrototype(String),

    /// Invalid or unreadable configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The script failure carried by this error, if any.
    pub fn as_script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::Script(script) => Some(script),
            _ => None,
        }
    }
}

/// Result type alias for host operations
pub type HostResult<T> = Result<T, HostError>;
