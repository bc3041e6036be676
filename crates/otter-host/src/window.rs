//! Browsing contexts.
//!
//! [`WindowOwner`] is the boundary the controller and the error router talk
//! to. [`BrowsingContext`] is the concrete owner: it builds its
//! [`GlobalScope`] exactly once, tracks the active document across
//! navigations, and holds the window-level error handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::catalog::ClassCatalog;
use crate::document::Document;
use crate::error::{RuntimeFailure, ScriptError};
use crate::features::FeatureFlags;
use crate::graph::HostObjectGraphBuilder;
use crate::scope::GlobalScope;

/// Window-level error handler (`window.onerror`).
pub type ErrorHandler = Arc<dyn Fn(&ScriptError) -> Result<(), RuntimeFailure> + Send + Sync>;

/// An independently scriptable unit holding one active document at a time.
pub trait WindowOwner: Send + Sync {
    /// Document currently loaded, if any.
    fn active_document(&self) -> Option<Arc<Document>>;

    /// Global scope scripts of this context run against.
    fn top_scope(&self) -> Option<Arc<GlobalScope>>;

    /// Dispatch a script failure to the window error handler.
    ///
    /// Returns `Ok(false)` when no handler is registered and `Ok(true)` when
    /// one ran. An `Err` is a failure raised inside the handler.
    ///
    /// A failure raised while the handler is running, on any thread, must
    /// not reach the handler again; implementations return `Ok(false)` for it.
    fn trigger_on_error(&self, error: &ScriptError) -> Result<bool, RuntimeFailure>;
}

/// A browsing context with its own global scope.
pub struct BrowsingContext {
    name: String,
    scope: Arc<GlobalScope>,
    active: RwLock<Option<Arc<Document>>>,
    error_handler: RwLock<Option<ErrorHandler>>,
    handler_active: AtomicBool,
    closed: AtomicBool,
    this: Weak<BrowsingContext>,
}

impl BrowsingContext {
    /// Create a context and build its global scope from `catalog`.
    pub fn new(name: &str, catalog: &ClassCatalog, flags: &dyn FeatureFlags) -> Arc<Self> {
        let scope = HostObjectGraphBuilder::new(catalog, flags).build();
        tracing::debug!(context = name, scope = scope.id(), "browsing context initialized");
        Self::with_scope(name, Arc::new(scope))
    }

    /// Create a context around an already built scope.
    pub fn with_scope(name: &str, scope: Arc<GlobalScope>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            name: name.to_string(),
            scope,
            active: RwLock::new(None),
            error_handler: RwLock::new(None),
            handler_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> &Arc<GlobalScope> {
        &self.scope
    }

    /// Load `document`, replacing (and invalidating) the previous one.
    pub fn navigate(&self, document: &Arc<Document>) {
        let owner: Weak<dyn WindowOwner> = self.this.clone();
        document.attach_window(owner);
        let previous = self.active.write().replace(Arc::clone(document));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, document) {
                previous.mark_dead();
            }
        }
        tracing::debug!(context = %self.name, document = %document.id(), "navigated");
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&ScriptError) -> Result<(), RuntimeFailure> + Send + Sync + 'static,
    {
        *self.error_handler.write() = Some(Arc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        *self.error_handler.write() = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shut the context down: the active document dies and the scope is
    /// torn down.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(document) = self.active.write().take() {
            document.mark_dead();
        }
        self.scope.teardown();
        tracing::debug!(context = %self.name, "browsing context closed");
    }
}

impl WindowOwner for BrowsingContext {
    fn active_document(&self) -> Option<Arc<Document>> {
        self.active.read().clone()
    }

    fn top_scope(&self) -> Option<Arc<GlobalScope>> {
        if self.is_closed() {
            None
        } else {
            Some(Arc::clone(&self.scope))
        }
    }

    fn trigger_on_error(&self, error: &ScriptError) -> Result<bool, RuntimeFailure> {
        let Some(handler) = self.error_handler.read().clone() else {
            return Ok(false);
        };
        if self.handler_active.swap(true, Ordering::AcqRel) {
            tracing::debug!(context = %self.name, "failure inside error handler, not re-dispatched");
            return Ok(false);
        }
        let _active = scopeguard::guard((), |()| {
            self.handler_active.store(false, Ordering::Release);
        });
        handler(error).map(|()| true)
    }
}

impl Drop for BrowsingContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for BrowsingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsingContext")
            .field("name", &self.name)
            .field("scope", &self.scope.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ClassBuilder;
    use crate::features::FlagSet;

    fn context() -> Arc<BrowsingContext> {
        let mut catalog = ClassCatalog::new();
        catalog
            .add(ClassBuilder::new("Window").global().build())
            .unwrap();
        BrowsingContext::new("main", &catalog, &FlagSet::new())
    }

    #[test]
    fn test_navigation_invalidates_previous_document() {
        let ctx = context();
        let first = Document::new("https://a.test/");
        ctx.navigate(&first);
        assert!(first.is_active());

        let second = Document::new("https://b.test/");
        ctx.navigate(&second);
        assert!(!first.is_live());
        assert!(!first.is_active());
        assert!(second.is_active());
    }

    #[test]
    fn test_close_tears_down_scope() {
        let ctx = context();
        let doc = Document::new("https://a.test/");
        ctx.navigate(&doc);
        assert_eq!(ctx.scope().global().class_name(), "Window");

        ctx.close();
        assert!(!doc.is_live());
        assert!(ctx.scope().is_torn_down());
        assert!(ctx.top_scope().is_none());
    }

    #[test]
    fn test_error_handler_dispatch() {
        let ctx = context();
        let error = ScriptError::Runtime(RuntimeFailure::new("boom"));
        assert_eq!(ctx.trigger_on_error(&error), Ok(false));

        ctx.set_error_handler(|_| Err(RuntimeFailure::new("handler failed")));
        assert_eq!(
            ctx.trigger_on_error(&error),
            Err(RuntimeFailure::new("handler failed"))
        );
    }

    #[test]
    fn test_handler_is_not_reentered() {
        use parking_lot::Mutex;
        use std::sync::atomic::AtomicUsize;

        let ctx = context();
        let calls = Arc::new(AtomicUsize::new(0));
        let nested = Arc::new(Mutex::new(None));
        let (handler_calls, handler_nested) = (calls.clone(), nested.clone());
        let weak = Arc::downgrade(&ctx);
        ctx.set_error_handler(move |error| {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ctx) = weak.upgrade() {
                *handler_nested.lock() = Some(ctx.trigger_on_error(error));
            }
            Ok(())
        });

        let error = ScriptError::Runtime(RuntimeFailure::new("boom"));
        assert_eq!(ctx.trigger_on_error(&error), Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*nested.lock(), Some(Ok(false)));

        // The guard is released once the handler returns
        assert_eq!(ctx.trigger_on_error(&error), Ok(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
