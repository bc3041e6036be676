//! Documents and their execution locks.
//!
//! A [`Document`] is the content currently loaded into a browsing context.
//! The host only needs three things from it: an identity, an explicit
//! liveness flag (cleared on navigation or close), and the
//! [`ExecutionLock`] that serializes script runs against it.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};

use crate::window::WindowOwner;

/// Unique document identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Execution state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    TimedOut,
}

/// Per-document mutual exclusion for script runs.
///
/// Other threads block until the holder releases; the holding thread may
/// re-acquire (nested runs) without blocking.
pub struct ExecutionLock {
    /// Re-entry depth of the holding thread
    mutex: ReentrantMutex<Cell<usize>>,
    state: Mutex<RunState>,
    last_finished: Mutex<Option<RunState>>,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self {
            mutex: ReentrantMutex::new(Cell::new(0)),
            state: Mutex::new(RunState::Idle),
            last_finished: Mutex::new(None),
        }
    }

    /// Block until the lock is available to this thread.
    pub fn acquire(&self) -> ExecutionGuard<'_> {
        let guard = self.mutex.lock();
        guard.set(guard.get() + 1);
        ExecutionGuard { lock: self, guard }
    }

    /// Like [`acquire`](Self::acquire) with an upper bound on the wait.
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<ExecutionGuard<'_>> {
        let guard = self.mutex.try_lock_for(timeout)?;
        guard.set(guard.get() + 1);
        Some(ExecutionGuard { lock: self, guard })
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Terminal state of the most recent top-level run.
    pub fn last_finished(&self) -> Option<RunState> {
        *self.last_finished.lock()
    }

    pub(crate) fn set_running(&self) {
        *self.state.lock() = RunState::Running;
    }

    pub(crate) fn finish(&self, state: RunState) {
        *self.state.lock() = state;
        *self.last_finished.lock() = Some(state);
    }
}

impl Default for ExecutionLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard of an [`ExecutionLock`]. The outermost guard resets the state
/// to `Idle` on drop.
pub struct ExecutionGuard<'a> {
    lock: &'a ExecutionLock,
    guard: ReentrantMutexGuard<'a, Cell<usize>>,
}

impl ExecutionGuard<'_> {
    /// 1 for the outermost acquisition on this thread.
    pub fn depth(&self) -> usize {
        self.guard.get()
    }

    pub fn is_outermost(&self) -> bool {
        self.depth() == 1
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        let depth = self.guard.get() - 1;
        self.guard.set(depth);
        if depth == 0 {
            *self.lock.state.lock() = RunState::Idle;
        }
    }
}

/// The content loaded into a browsing context.
pub struct Document {
    id: DocumentId,
    url: String,
    live: AtomicBool,
    window: RwLock<Option<Weak<dyn WindowOwner>>>,
    lock: ExecutionLock,
}

impl Document {
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: DocumentId::next(),
            url: url.into(),
            live: AtomicBool::new(true),
            window: RwLock::new(None),
            lock: ExecutionLock::new(),
        })
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// False once the document was navigated away from or its context closed.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            tracing::debug!(document = %self.id, url = %self.url, "document no longer live");
        }
    }

    /// The browsing context this document was loaded into.
    pub fn window(&self) -> Option<Arc<dyn WindowOwner>> {
        self.window.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn attach_window(&self, window: Weak<dyn WindowOwner>) {
        *self.window.write() = Some(window);
    }

    /// Live and still the active document of its browsing context.
    pub fn is_active(self: &Arc<Self>) -> bool {
        if !self.is_live() {
            return false;
        }
        self.window()
            .and_then(|window| window.active_document())
            .is_some_and(|active| Arc::ptr_eq(&active, self))
    }

    pub fn execution_lock(&self) -> &ExecutionLock {
        &self.lock
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("live", &self.is_live())
            .finish()
    }
}
