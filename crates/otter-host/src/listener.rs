//! Outward notification of script failures and warnings.

use std::time::Duration;

use crate::document::Document;
use crate::error::{CompileError, RuntimeFailure};

/// Receives every routed script failure and engine warning.
///
/// The default methods log through `tracing`; override the ones you need.
pub trait ScriptListener: Send + Sync {
    fn on_compile_error(&self, document: &Document, error: &CompileError) {
        tracing::warn!(
            document = %document.id(),
            source = %error.source_name,
            line = error.line,
            line_source = error.line_source.as_deref().unwrap_or(""),
            "{}",
            error.message
        );
    }

    fn on_runtime_failure(&self, document: &Document, failure: &RuntimeFailure) {
        tracing::error!(
            document = %document.id(),
            source = failure.source_name.as_deref().unwrap_or(""),
            line = failure.line.unwrap_or(0),
            stack_overflow = failure.stack_overflow,
            "{}",
            failure.message
        );
    }

    fn on_timeout(&self, document: &Document, allowed: Duration, elapsed: Duration) {
        tracing::warn!(
            document = %document.id(),
            allowed_ms = allowed.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "script execution timed out"
        );
    }

    fn on_warning(
        &self,
        message: &str,
        source_name: &str,
        line: u32,
        line_source: Option<&str>,
        line_offset: u32,
    ) {
        tracing::warn!(
            source = source_name,
            line,
            line_source = line_source.unwrap_or(""),
            line_offset,
            "{message}"
        );
    }
}

/// Listener that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl ScriptListener for LoggingListener {}
