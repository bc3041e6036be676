//! # Otter Host
//!
//! Host bindings and script execution control for headless browser
//! emulation:
//! - Declarative class catalog wired into a per-context object graph
//! - Per-document execution locks with same-thread reentry
//! - Cooperative timeouts through an engine progress callback
//! - Deferred actions flushed after the triggering run returns
//! - Error routing to window handlers and listeners, strict or swallowing
//!
//! The script engine itself is pluggable through [`ScriptEngine`].
//!
//! # Example
//!
//! ```ignore
//! use otter_host::prelude::*;
//!
//! let mut catalog = ClassCatalog::new();
//! catalog.add(ClassBuilder::new("Window").global().build())?;
//! let window = BrowsingContext::new("main", &catalog, &FlagSet::new());
//! let document = Document::new("https://example.test/");
//! window.navigate(&document);
//!
//! let controller = ExecutionController::builder(my_engine)
//!     .config(HostConfig::new().timeout_millis(500))
//!     .build();
//! let mut thread = controller.thread();
//! let outcome = thread.execute(&document, window.scope(), Script::source("run()", "inline"))?;
//! ```

#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod controller;
pub mod deferred;
pub mod document;
pub mod engine;
pub mod error;
pub mod features;
pub mod graph;
pub mod listener;
pub mod object;
pub mod router;
pub mod scope;
pub mod thread;
pub mod value;
pub mod window;
pub mod wire;

pub use catalog::{ClassBuilder, ClassCatalog, ClassDescriptor, LEGACY_ALIASES};
pub use config::HostConfig;
pub use context::{DebugHook, ExecutionContext};
pub use controller::{
    ControllerStats, ControllerStatsSnapshot, ExecutionController, ExecutionControllerBuilder,
    RunOutcome, Script,
};
pub use deferred::{DeferredAction, DeferredActionQueue, FlushReport};
pub use document::{Document, DocumentId, ExecutionLock, RunState};
pub use engine::{EngineCapabilities, ScriptEngine, ScriptPreprocessor};
pub use error::{
    CompileError, EngineError, HostError, HostResult, RuntimeFailure, ScriptError, TimeoutError,
};
pub use features::{Availability, FeatureFlags, FlagSet};
pub use graph::HostObjectGraphBuilder;
pub use listener::{LoggingListener, ScriptListener};
pub use object::{HostObject, HostObjectRef, PropertyKey, WellKnownSymbol};
pub use router::ErrorRouter;
pub use scope::GlobalScope;
pub use thread::ScriptThread;
pub use value::{NativeFn, Value};
pub use window::{BrowsingContext, WindowOwner};

/// Prelude for common imports
pub mod prelude {
    pub use crate::catalog::{ClassBuilder, ClassCatalog};
    pub use crate::config::HostConfig;
    pub use crate::context::ExecutionContext;
    pub use crate::controller::{ExecutionController, RunOutcome, Script};
    pub use crate::deferred::DeferredAction;
    pub use crate::document::Document;
    pub use crate::engine::ScriptEngine;
    pub use crate::error::{EngineError, HostError, HostResult, ScriptError};
    pub use crate::features::{Availability, FlagSet};
    pub use crate::scope::GlobalScope;
    pub use crate::thread::ScriptThread;
    pub use crate::value::Value;
    pub use crate::window::BrowsingContext;
}
