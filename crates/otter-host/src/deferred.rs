//! Deferred actions scheduled by script side effects.
//!
//! ## Flush points
//!
//! 1. After a top-level run returns, outside the document lock, unless the
//!    queue is held.
//! 2. On [`force_flush`](crate::thread::ScriptThread::force_flush), regardless
//!    of the hold state.
//!
//! ## Ordering Guarantees
//!
//! - FIFO within one flush
//! - A flush snapshots and clears the queue first: actions enqueued while it
//!   runs wait for the next flush, so recursion depth stays bounded
//! - Actions whose document is no longer live are skipped
//!
//! ## Error Handling
//!
//! A failing action is logged and the remaining actions still run.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::document::Document;
use crate::error::HostResult;

/// Action body. Receives the flushing context `C`.
pub type ActionFn<C> = Box<dyn FnOnce(&mut C) -> HostResult<()> + Send>;

/// A unit of work plus the document that scheduled it.
pub struct DeferredAction<C> {
    label: Cow<'static, str>,
    document: Option<Arc<Document>>,
    task: ActionFn<C>,
}

impl<C> DeferredAction<C> {
    /// Action tied to `document`; skipped if the document dies first.
    pub fn new<F>(document: &Arc<Document>, label: impl Into<Cow<'static, str>>, task: F) -> Self
    where
        F: FnOnce(&mut C) -> HostResult<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            document: Some(Arc::clone(document)),
            task: Box::new(task),
        }
    }

    /// Action not tied to any document; always runs.
    pub fn detached<F>(label: impl Into<Cow<'static, str>>, task: F) -> Self
    where
        F: FnOnce(&mut C) -> HostResult<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            document: None,
            task: Box::new(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.document.as_ref().is_none_or(|doc| doc.is_live())
    }

    fn run(self, cx: &mut C) -> HostResult<()> {
        (self.task)(cx)
    }
}

impl<C> fmt::Debug for DeferredAction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .field("document", &self.document.as_ref().map(|d| d.id()))
            .finish()
    }
}

/// Outcome counts of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.executed + self.skipped + self.failed
    }
}

/// Per-thread ordered queue of deferred actions.
pub struct DeferredActionQueue<C> {
    pending: Vec<DeferredAction<C>>,
    held: bool,
}

impl<C> DeferredActionQueue<C> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            held: false,
        }
    }

    pub fn enqueue(&mut self, action: DeferredAction<C>) {
        tracing::trace!(action = %action.label, "deferred action enqueued");
        self.pending.push(action);
    }

    /// Suspend automatic flushing at run end.
    pub fn hold(&mut self) {
        self.held = true;
    }

    /// Resume automatic flushing. Does not flush by itself.
    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Snapshot and clear the queue.
    pub fn take_pending(&mut self) -> Vec<DeferredAction<C>> {
        std::mem::take(&mut self.pending)
    }
}

impl<C> Default for DeferredActionQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a snapshot taken with [`DeferredActionQueue::take_pending`] in FIFO
/// order, skipping actions whose document is no longer live.
pub fn run_batch<C>(batch: Vec<DeferredAction<C>>, cx: &mut C) -> FlushReport {
    let mut report = FlushReport::default();
    for action in batch {
        if !action.is_live() {
            tracing::debug!(action = %action.label, "deferred action skipped, document not live");
            report.skipped += 1;
            continue;
        }
        let label = action.label.clone();
        match action.run(cx) {
            Ok(()) => report.executed += 1,
            Err(error) => {
                tracing::warn!(action = %label, %error, "deferred action failed");
                report.failed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;

    #[test]
    fn test_fifo_and_liveness() {
        let live = Document::new("https://live.test/");
        let dead = Document::new("https://dead.test/");
        let mut queue: DeferredActionQueue<Vec<&'static str>> = DeferredActionQueue::new();
        queue.enqueue(DeferredAction::new(&live, "first", |log: &mut Vec<_>| {
            log.push("first");
            Ok(())
        }));
        queue.enqueue(DeferredAction::new(&dead, "dead", |log: &mut Vec<_>| {
            log.push("dead");
            Ok(())
        }));
        queue.enqueue(DeferredAction::detached("second", |log: &mut Vec<_>| {
            log.push("second");
            Ok(())
        }));
        dead.mark_dead();

        let mut log = Vec::new();
        let report = run_batch(queue.take_pending(), &mut log);
        assert_eq!(log, ["first", "second"]);
        assert_eq!(
            report,
            FlushReport {
                executed: 2,
                skipped: 1,
                failed: 0
            }
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_failure_does_not_stop_batch() {
        let mut queue: DeferredActionQueue<u32> = DeferredActionQueue::new();
        queue.enqueue(DeferredAction::detached("fails", |_: &mut u32| {
            Err(HostError::type_error("nope"))
        }));
        queue.enqueue(DeferredAction::detached("counts", |n: &mut u32| {
            *n += 1;
            Ok(())
        }));
        let mut n = 0;
        let report = run_batch(queue.take_pending(), &mut n);
        assert_eq!(n, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 2);
    }

    #[test]
    fn test_hold_release_flags() {
        let mut queue: DeferredActionQueue<()> = DeferredActionQueue::new();
        assert!(!queue.is_held());
        queue.hold();
        assert!(queue.is_held());
        queue.release();
        assert!(!queue.is_held());
    }
}
