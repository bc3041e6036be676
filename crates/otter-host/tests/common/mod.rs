//! Scripted engine and fixtures shared by the integration tests.
//!
//! Scripts are Rust closures registered under a name; the "source text" of a
//! run is that name. Sources starting with `syntax error` fail to compile.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use otter_host::prelude::*;
use otter_host::{
    CompileError, EngineCapabilities, ExecutionControllerBuilder, RuntimeFailure, ScriptListener,
};
use parking_lot::Mutex;

pub type ScriptBody =
    Arc<dyn Fn(&mut ExecutionContext<'_, TestEngine>) -> Result<Value, EngineError> + Send + Sync>;

pub struct TestScript {
    pub name: String,
    body: ScriptBody,
}

pub struct TestEngine {
    scripts: HashMap<String, ScriptBody>,
    progress: bool,
    compiled: AtomicUsize,
    entered: AtomicUsize,
}

impl TestEngine {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            progress: true,
            compiled: AtomicUsize::new(0),
            entered: AtomicUsize::new(0),
        }
    }

    pub fn script<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_, TestEngine>) -> Result<Value, EngineError>
            + Send
            + Sync
            + 'static,
    {
        self.scripts.insert(name.to_string(), Arc::new(body));
        self
    }

    /// Engine that never calls the progress callback.
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    pub fn compiled(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }

    /// Runs and calls that reached a script body.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    fn body(&self, name: &str) -> Result<ScriptBody, EngineError> {
        self.scripts
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::exception(format!("ReferenceError: {name} is not defined")))
    }
}

impl ScriptEngine for TestEngine {
    type Script = TestScript;
    /// Functions are script names.
    type Function = String;

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            progress_callback: self.progress,
        }
    }

    fn compile(&self, source: &str, name: &str, line: u32) -> Result<TestScript, CompileError> {
        self.compiled.fetch_add(1, Ordering::SeqCst);
        let key = source.trim();
        if key.starts_with("syntax error") {
            return Err(CompileError::new("Unexpected identifier", name, line)
                .with_line_source(key, 7));
        }
        match self.scripts.get(key) {
            Some(body) => Ok(TestScript {
                name: key.to_string(),
                body: Arc::clone(body),
            }),
            None => Err(CompileError::new(format!("unknown script '{key}'"), name, line)),
        }
    }

    fn run(
        &self,
        script: &TestScript,
        _scope: &Arc<GlobalScope>,
        cx: &mut ExecutionContext<'_, Self>,
    ) -> Result<Value, EngineError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        (script.body)(cx)
    }

    fn call(
        &self,
        function: &String,
        _scope: &Arc<GlobalScope>,
        _this: &Value,
        _args: &[Value],
        cx: &mut ExecutionContext<'_, Self>,
    ) -> Result<Value, EngineError> {
        let body = self.body(function)?;
        self.entered.fetch_add(1, Ordering::SeqCst);
        body(cx)
    }
}

/// Report `steps` per tick while sleeping 1ms between ticks, for `total`.
pub fn spin(
    cx: &mut ExecutionContext<'_, TestEngine>,
    total: Duration,
    steps: u64,
) -> Result<Value, EngineError> {
    let start = Instant::now();
    while start.elapsed() < total {
        cx.tick(steps)?;
        thread::sleep(Duration::from_millis(1));
    }
    Ok(Value::from("done"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Compile(String),
    Runtime(String),
    Timeout { allowed_ms: u128, elapsed_ms: u128 },
    Warning { message: String, line: u32 },
}

/// Listener that records every notification.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl ScriptListener for RecordingListener {
    fn on_compile_error(&self, _document: &Document, error: &CompileError) {
        self.events.lock().push(Event::Compile(error.message.clone()));
    }

    fn on_runtime_failure(&self, _document: &Document, failure: &RuntimeFailure) {
        self.events.lock().push(Event::Runtime(failure.message.clone()));
    }

    fn on_timeout(&self, _document: &Document, allowed: Duration, elapsed: Duration) {
        self.events.lock().push(Event::Timeout {
            allowed_ms: allowed.as_millis(),
            elapsed_ms: elapsed.as_millis(),
        });
    }

    fn on_warning(
        &self,
        message: &str,
        _source_name: &str,
        line: u32,
        _line_source: Option<&str>,
        _line_offset: u32,
    ) {
        self.events.lock().push(Event::Warning {
            message: message.to_string(),
            line,
        });
    }
}

pub fn window_catalog() -> ClassCatalog {
    let mut catalog = ClassCatalog::new();
    catalog
        .add(ClassBuilder::new("EventTarget").build())
        .unwrap();
    catalog
        .add(
            ClassBuilder::new("Window")
                .parent("EventTarget")
                .global()
                .build(),
        )
        .unwrap();
    catalog
}

/// A browsing context with a freshly loaded document.
pub fn loaded(name: &str) -> (Arc<BrowsingContext>, Arc<Document>) {
    let window = BrowsingContext::new(name, &window_catalog(), &FlagSet::new());
    let document = Document::new(format!("https://{name}.test/"));
    window.navigate(&document);
    (window, document)
}

pub fn controller(engine: TestEngine, config: HostConfig) -> Arc<ExecutionController<TestEngine>> {
    builder(engine, config).build()
}

pub fn builder(engine: TestEngine, config: HostConfig) -> ExecutionControllerBuilder<TestEngine> {
    ExecutionController::builder(engine).config(config)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
