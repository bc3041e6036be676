//! Routing of script failures.
//!
//! Compile errors and runtime failures go to the window error handler
//! first, then to the listener. The window keeps the handler from being
//! re-entered by failures raised while it runs. Timeouts skip the handler: they are not
//! catchable by scripts. Finally strict mode hands the failure back to the
//! caller; otherwise it is swallowed.

use std::sync::Arc;
use std::time::Duration;

use crate::document::Document;
use crate::error::ScriptError;
use crate::listener::{LoggingListener, ScriptListener};

pub struct ErrorRouter {
    listener: Arc<dyn ScriptListener>,
    throw_on_script_error: bool,
}

impl ErrorRouter {
    pub fn new(listener: Arc<dyn ScriptListener>, throw_on_script_error: bool) -> Self {
        Self {
            listener,
            throw_on_script_error,
        }
    }

    pub fn is_strict(&self) -> bool {
        self.throw_on_script_error
    }

    pub fn listener(&self) -> &Arc<dyn ScriptListener> {
        &self.listener
    }

    /// Report `error` raised by a run against `document`.
    ///
    /// Returns the error in strict mode, `Ok(())` otherwise.
    pub fn route(&self, document: &Document, error: ScriptError) -> Result<(), ScriptError> {
        match &error {
            ScriptError::Timeout(timeout) => {
                self.listener.on_timeout(
                    document,
                    Duration::from_millis(timeout.allowed_ms),
                    Duration::from_millis(timeout.elapsed_ms),
                );
            }
            ScriptError::Compile(compile) => {
                self.dispatch_to_handler(document, &error);
                self.listener.on_compile_error(document, compile);
            }
            ScriptError::Runtime(failure) => {
                self.dispatch_to_handler(document, &error);
                self.listener.on_runtime_failure(document, failure);
            }
        }

        if self.throw_on_script_error {
            Err(error)
        } else {
            Ok(())
        }
    }

    fn dispatch_to_handler(&self, document: &Document, error: &ScriptError) {
        let Some(window) = document.window() else {
            return;
        };
        if let Err(failure) = window.trigger_on_error(error) {
            tracing::warn!(document = %document.id(), %failure, "window error handler failed");
            self.listener.on_runtime_failure(document, &failure);
        }
    }

    pub fn warning(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    ) {
        self.listener
            .on_warning(message, source_name, line, line_source, line_offset);
    }
}

impl Default for ErrorRouter {
    fn default() -> Self {
        Self::new(Arc::new(LoggingListener), false)
    }
}

impl std::fmt::Debug for ErrorRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorRouter")
            .field("throw_on_script_error", &self.throw_on_script_error)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ClassBuilder, ClassCatalog};
    use crate::error::{CompileError, RuntimeFailure, TimeoutError};
    use crate::features::FlagSet;
    use crate::window::BrowsingContext;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ScriptListener for Recorder {
        fn on_compile_error(&self, _: &Document, error: &CompileError) {
            self.events.lock().push(format!("compile:{}", error.message));
        }
        fn on_runtime_failure(&self, _: &Document, failure: &RuntimeFailure) {
            self.events.lock().push(format!("runtime:{}", failure.message));
        }
        fn on_timeout(&self, _: &Document, allowed: Duration, _: Duration) {
            self.events
                .lock()
                .push(format!("timeout:{}", allowed.as_millis()));
        }
    }

    fn loaded() -> (Arc<BrowsingContext>, Arc<Document>) {
        let mut catalog = ClassCatalog::new();
        catalog
            .add(ClassBuilder::new("Window").global().build())
            .unwrap();
        let ctx = BrowsingContext::new("main", &catalog, &FlagSet::new());
        let doc = Document::new("https://a.test/");
        ctx.navigate(&doc);
        (ctx, doc)
    }

    #[test]
    fn test_handler_runs_before_listener() {
        let (ctx, doc) = loaded();
        let recorder = Arc::new(Recorder::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let handler_seen = seen.clone();
        ctx.set_error_handler(move |_| {
            handler_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let router = ErrorRouter::new(recorder.clone(), false);
        let error = ScriptError::Runtime(RuntimeFailure::new("boom"));
        assert!(router.route(&doc, error).is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(*recorder.events.lock(), ["runtime:boom"]);
    }

    #[test]
    fn test_handler_failure_reported_once() {
        let (ctx, doc) = loaded();
        let recorder = Arc::new(Recorder::default());
        ctx.set_error_handler(|_| Err(RuntimeFailure::new("handler broke")));

        let router = ErrorRouter::new(recorder.clone(), true);
        let error = ScriptError::Runtime(RuntimeFailure::new("boom"));
        let routed = router.route(&doc, error.clone());
        assert_eq!(routed, Err(error));
        assert_eq!(
            *recorder.events.lock(),
            ["runtime:handler broke", "runtime:boom"]
        );
    }

    #[test]
    fn test_timeout_skips_handler() {
        let (ctx, doc) = loaded();
        let recorder = Arc::new(Recorder::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let handler_seen = seen.clone();
        ctx.set_error_handler(move |_| {
            handler_seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let router = ErrorRouter::new(recorder.clone(), false);
        let timeout = TimeoutError::new(Duration::from_millis(50), Duration::from_millis(80));
        router
            .route(&doc, ScriptError::Timeout(timeout))
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.events.lock(), ["timeout:50"]);
    }

    #[test]
    fn test_failure_routed_from_handler_skips_handler() {
        let (ctx, doc) = loaded();
        let recorder = Arc::new(Recorder::default());
        let router = Arc::new(ErrorRouter::new(recorder.clone(), false));
        let seen = Arc::new(AtomicUsize::new(0));
        let (handler_seen, handler_router) = (seen.clone(), router.clone());
        let handler_doc = Arc::clone(&doc);
        ctx.set_error_handler(move |_| {
            handler_seen.fetch_add(1, Ordering::SeqCst);
            let nested = ScriptError::Compile(CompileError::new("unexpected token", "onerror", 1));
            handler_router.route(&handler_doc, nested).unwrap();
            Ok(())
        });

        let error = ScriptError::Runtime(RuntimeFailure::new("boom"));
        router.route(&doc, error).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.events.lock(),
            ["compile:unexpected token", "runtime:boom"]
        );
    }
}
