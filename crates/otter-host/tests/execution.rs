//! Locking, timeouts, and stale-document handling of the execution controller.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::{Event, RecordingListener, TestEngine, builder, controller, loaded, spin};
use otter_host::prelude::*;
use otter_host::{RunState, TimeoutError};

fn sleeper(_: &mut ExecutionContext<'_, TestEngine>) -> Result<Value, EngineError> {
    thread::sleep(Duration::from_millis(60));
    Ok(Value::from("slept"))
}

fn timing_config(timeout_millis: i64) -> HostConfig {
    HostConfig::strict()
        .timeout_millis(timeout_millis)
        .progress_step_threshold(10)
}

#[test]
fn test_completed_run_returns_value() {
    common::init_tracing();
    let (window, document) = loaded("basic");
    let controller = controller(
        TestEngine::new().script("answer", |_| Ok(Value::from(42))),
        HostConfig::strict(),
    );
    let mut thread = controller.thread();

    let outcome = thread
        .execute(&document, window.scope(), Script::source("answer", "inline"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from(42)));
    assert_eq!(
        document.execution_lock().last_finished(),
        Some(RunState::Completed)
    );
    assert_eq!(document.execution_lock().state(), RunState::Idle);

    let stats = controller.stats().snapshot();
    assert_eq!(stats.runs_started, 1);
    assert_eq!(stats.runs_completed, 1);
}

#[test]
fn test_precompiled_script_runs() {
    let (window, document) = loaded("precompiled");
    let controller = controller(
        TestEngine::new().script("answer", |_| Ok(Value::from("compiled"))),
        HostConfig::strict(),
    );
    let mut thread = controller.thread();

    let script = thread
        .compile(&document, "answer", "inline", 1)
        .unwrap()
        .unwrap();
    for _ in 0..2 {
        let outcome = thread
            .execute(&document, window.scope(), Script::Compiled(&script))
            .unwrap();
        assert_eq!(outcome.into_value(), Some(Value::from("compiled")));
    }
    assert_eq!(controller.engine().compiled(), 1);
    assert_eq!(controller.engine().entered(), 2);
}

#[test]
fn test_timeout_fires_through_progress_callback() {
    let (window, document) = loaded("timeout");
    let listener = RecordingListener::new();
    let controller = builder(
        TestEngine::new().script("spin", |cx| spin(cx, Duration::from_millis(200), 10)),
        timing_config(50),
    )
    .listener(listener.clone())
    .build();
    let mut thread = controller.thread();

    let started = Instant::now();
    let err = thread
        .execute(&document, window.scope(), Script::source("spin", "spin.js"))
        .unwrap_err();
    let ScriptError::Timeout(TimeoutError {
        allowed_ms,
        elapsed_ms,
    }) = &err
    else {
        panic!("expected timeout, got {err:?}");
    };
    assert_eq!(*allowed_ms, 50);
    assert!(*elapsed_ms >= 50);
    // Stopped well before the script would have finished on its own
    assert!(started.elapsed() < Duration::from_millis(200));

    assert!(matches!(
        listener.events().as_slice(),
        [Event::Timeout { allowed_ms: 50, .. }]
    ));
    assert_eq!(
        document.execution_lock().last_finished(),
        Some(RunState::TimedOut)
    );
    assert_eq!(controller.stats().snapshot().runs_timed_out, 1);
}

#[test]
fn test_timeout_disabled_completes() {
    for timeout in [0, -1] {
        let (window, document) = loaded("no-timeout");
        let controller = controller(
            TestEngine::new().script("spin", |cx| spin(cx, Duration::from_millis(200), 10)),
            timing_config(timeout),
        );
        let mut thread = controller.thread();

        let outcome = thread
            .execute(&document, window.scope(), Script::source("spin", "spin.js"))
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed(Value::from("done")));
    }
}

#[test]
fn test_timeout_swallowed_without_strict_mode() {
    let (window, document) = loaded("swallowed-timeout");
    let listener = RecordingListener::new();
    let controller = builder(
        TestEngine::new().script("spin", |cx| spin(cx, Duration::from_millis(200), 10)),
        timing_config(30).throw_on_script_error(false),
    )
    .listener(listener.clone())
    .build();
    let mut thread = controller.thread();

    let outcome = thread
        .execute(&document, window.scope(), Script::source("spin", "spin.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::NoResult);
    assert_eq!(listener.events().len(), 1);
}

#[test]
fn test_caught_timeout_still_fails_the_run() {
    let (window, document) = loaded("caught-timeout");
    let retick_failed = Arc::new(AtomicBool::new(false));
    let flag = retick_failed.clone();
    let controller = controller(
        TestEngine::new()
            .script("catches", move |cx| {
                // try { spin() } catch (e) {}
                if spin(cx, Duration::from_millis(120), 10).is_err() {
                    flag.store(cx.tick(1).is_err(), Ordering::SeqCst);
                }
                Ok(Value::from("caught timeout"))
            })
            .script("quick", |_| Ok(Value::Null)),
        timing_config(50),
    );
    let mut thread = controller.thread();

    let err = thread
        .execute(&document, window.scope(), Script::source("catches", "catches.js"))
        .unwrap_err();
    assert!(
        matches!(err, ScriptError::Timeout(TimeoutError { allowed_ms: 50, .. })),
        "expected timeout, got {err:?}"
    );
    assert!(retick_failed.load(Ordering::SeqCst));
    assert_eq!(
        document.execution_lock().last_finished(),
        Some(RunState::TimedOut)
    );
    assert_eq!(controller.stats().snapshot().runs_timed_out, 1);

    // The next run starts with a fresh budget
    let outcome = thread
        .execute(&document, window.scope(), Script::source("quick", "quick.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Null));
}

#[test]
fn test_nested_timeout_cannot_be_discarded() {
    let (window, document) = loaded("discarded-timeout");
    let (_inner_window, inner_doc) = loaded("discarded-timeout-inner");
    let target = inner_doc.clone();
    let controller = controller(
        TestEngine::new()
            .script("outer", move |cx| {
                let _ = cx.execute_in(&target, Script::source("inner", "inner.js"));
                Ok(Value::from("outer"))
            })
            .script("inner", |cx| spin(cx, Duration::from_millis(120), 10)),
        timing_config(50),
    );

    let err = controller
        .thread()
        .execute(&document, window.scope(), Script::source("outer", "outer.js"))
        .unwrap_err();
    assert!(matches!(err, ScriptError::Timeout(_)), "expected timeout, got {err:?}");
    assert_eq!(
        inner_doc.execution_lock().last_finished(),
        Some(RunState::TimedOut)
    );
    assert_eq!(
        document.execution_lock().last_finished(),
        Some(RunState::TimedOut)
    );
}

#[test]
fn test_engine_without_progress_checks_at_boundary() {
    let (window, document) = loaded("boundary");

    // No ticks and no boundary check: the run cannot be interrupted
    let controller = controller(
        TestEngine::new().script("sleep", sleeper),
        timing_config(20),
    );
    let outcome = controller
        .thread()
        .execute(&document, window.scope(), Script::source("sleep", "sleep.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from("slept")));

    let controller = common::controller(
        TestEngine::new().script("sleep", sleeper).without_progress(),
        timing_config(20),
    );
    assert!(!controller.progress_supported());
    let err = controller
        .thread()
        .execute(&document, window.scope(), Script::source("sleep", "sleep.js"))
        .unwrap_err();
    assert!(err.is_timeout());
}

#[test]
fn test_same_document_runs_are_serialized() {
    let (window, document) = loaded("serialized");
    let active = Arc::new(AtomicUsize::new(0));
    let overlapped = Arc::new(AtomicBool::new(false));
    let engine = {
        let active = active.clone();
        let overlapped = overlapped.clone();
        TestEngine::new().script("slow", move |_| {
            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                overlapped.store(true, Ordering::SeqCst);
            }
            thread::sleep(Duration::from_millis(100));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        })
    };
    let controller = controller(engine, HostConfig::strict());
    let barrier = Arc::new(Barrier::new(2));

    let started = Instant::now();
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let controller = controller.clone();
            let document = document.clone();
            let scope = window.scope().clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut thread = controller.thread();
                barrier.wait();
                thread
                    .execute(&document, &scope, Script::source("slow", "slow.js"))
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), RunOutcome::Completed(Value::Undefined));
    }

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(!overlapped.load(Ordering::SeqCst));
    assert_eq!(controller.stats().snapshot().runs_completed, 2);
}

#[test]
fn test_different_documents_run_concurrently() {
    let (first_window, first) = loaded("first");
    let (second_window, second) = loaded("second");
    let controller = controller(
        TestEngine::new().script("slow", |_| {
            let start = Instant::now();
            thread::sleep(Duration::from_millis(150));
            Ok(Value::from(start.elapsed().as_millis() as f64))
        }),
        HostConfig::strict(),
    );
    let barrier = Arc::new(Barrier::new(2));

    let spawn = |document: Arc<Document>, scope: Arc<GlobalScope>| {
        let controller = controller.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            let mut thread = controller.thread();
            barrier.wait();
            let start = Instant::now();
            thread
                .execute(&document, &scope, Script::source("slow", "slow.js"))
                .unwrap();
            (start, Instant::now())
        })
    };
    let a = spawn(first, first_window.scope().clone());
    let b = spawn(second, second_window.scope().clone());
    let (a_start, a_end) = a.join().unwrap();
    let (b_start, b_end) = b.join().unwrap();

    assert!(a_start.max(b_start) < a_end.min(b_end), "runs did not overlap");
}

#[test]
fn test_stale_document_never_enters_engine() {
    let (window, document) = loaded("stale");
    let controller = controller(
        TestEngine::new().script("answer", |_| Ok(Value::from(1))),
        HostConfig::strict(),
    );
    let mut thread = controller.thread();

    window.navigate(&Document::new("https://stale.test/next"));
    let outcome = thread
        .execute(&document, window.scope(), Script::source("answer", "inline"))
        .unwrap();
    assert!(outcome.is_stale());
    assert_eq!(controller.engine().compiled(), 0);
    assert_eq!(controller.engine().entered(), 0);

    let outcome = thread
        .call_function(
            &document,
            window.scope(),
            &"answer".to_string(),
            &Value::Undefined,
            &[],
        )
        .unwrap();
    assert!(outcome.is_stale());
    assert_eq!(controller.engine().entered(), 0);
    assert_eq!(controller.stats().snapshot().stale_skipped, 2);
}

#[test]
fn test_document_without_window_is_stale() {
    let (window, _) = loaded("detached");
    let controller = controller(
        TestEngine::new().script("answer", |_| Ok(Value::from(1))),
        HostConfig::strict(),
    );
    let orphan = Document::new("about:blank");
    let outcome = controller
        .thread()
        .execute(&orphan, window.scope(), Script::source("answer", "inline"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::StaleDocument);
}

#[test]
fn test_closed_window_document_is_stale() {
    let (window, document) = loaded("closed");
    let scope = window.scope().clone();
    let controller = controller(
        TestEngine::new().script("answer", |_| Ok(Value::from(1))),
        HostConfig::strict(),
    );
    window.close();
    let outcome = controller
        .thread()
        .execute(&document, &scope, Script::source("answer", "inline"))
        .unwrap();
    assert!(outcome.is_stale());
}

#[test]
fn test_call_function_top_level() {
    let (window, document) = loaded("call");
    let controller = controller(
        TestEngine::new().script("handler", |cx| Ok(Value::from(cx.depth() as f64))),
        HostConfig::strict(),
    );
    let outcome = controller
        .thread()
        .call_function(
            &document,
            window.scope(),
            &"handler".to_string(),
            &Value::Null,
            &[Value::from(1)],
        )
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from(1)));
}

#[test]
fn test_nested_call_is_direct() {
    let (window, document) = loaded("nested-call");
    let controller = controller(
        TestEngine::new()
            .script("outer", |cx| {
                let inner = cx.call_function(&"inner".to_string(), &Value::Undefined, &[])?;
                Ok(inner)
            })
            .script("inner", |cx| Ok(Value::from(cx.depth() as f64))),
        HostConfig::strict(),
    );
    let outcome = controller
        .thread()
        .execute(&document, window.scope(), Script::source("outer", "outer.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from(2)));
    // One top-level run; the nested call does not count as a run
    assert_eq!(controller.stats().snapshot().runs_started, 1);
}

#[test]
fn test_recursion_limit_is_a_runtime_failure() {
    let (window, document) = loaded("recursion");
    let listener = RecordingListener::new();
    let controller = builder(
        TestEngine::new().script("recurse", |cx| {
            cx.call_function(&"recurse".to_string(), &Value::Undefined, &[])
        }),
        HostConfig::strict().max_call_depth(16),
    )
    .listener(listener.clone())
    .build();

    let err = controller
        .thread()
        .execute(&document, window.scope(), Script::source("recurse", "recurse.js"))
        .unwrap_err();
    match err {
        ScriptError::Runtime(failure) => assert!(failure.stack_overflow),
        other => panic!("expected stack overflow, got {other:?}"),
    }
    assert_eq!(controller.engine().entered(), 16);
    assert_eq!(listener.events().len(), 1);
}

#[test]
fn test_nested_run_in_other_document() {
    let (outer_window, outer_doc) = loaded("outer");
    let (_inner_window, inner_doc) = loaded("inner");
    let outer_scope = outer_window.scope().clone();
    let target = inner_doc.clone();
    let controller = controller(
        TestEngine::new()
            .script("outer", move |cx| {
                match cx.execute_in(&target, Script::source("inner", "inner.js"))? {
                    RunOutcome::Completed(value) => Ok(value),
                    other => Err(EngineError::exception(format!("unexpected {other:?}"))),
                }
            })
            .script("inner", move |cx| {
                assert_eq!(cx.depth(), 2);
                assert!(Arc::ptr_eq(cx.starting_scope(), &outer_scope));
                assert!(!Arc::ptr_eq(cx.scope(), cx.starting_scope()));
                assert!(cx.document().execution_lock().is_locked());
                Ok(Value::from("inner"))
            }),
        HostConfig::strict(),
    );

    let outcome = controller
        .thread()
        .execute(&outer_doc, outer_window.scope(), Script::source("outer", "outer.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from("inner")));
    assert_eq!(
        inner_doc.execution_lock().last_finished(),
        Some(RunState::Completed)
    );
    assert!(!inner_doc.execution_lock().is_locked());
}

#[test]
fn test_same_document_reentry_does_not_block() {
    let (window, document) = loaded("reentry");
    let target = document.clone();
    let controller = controller(
        TestEngine::new()
            .script("outer", move |cx| {
                cx.execute_in(&target, Script::source("inner", "inner.js"))?;
                Ok(Value::from("outer"))
            })
            .script("inner", |_| Ok(Value::Null)),
        HostConfig::strict(),
    );
    let outcome = controller
        .thread()
        .execute(&document, window.scope(), Script::source("outer", "outer.js"))
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::from("outer")));
    assert_eq!(controller.engine().entered(), 2);
}

#[test]
fn test_nested_runs_share_the_time_budget() {
    let (window, document) = loaded("shared-budget");
    let (_other_window, other) = loaded("shared-budget-inner");
    let target = other.clone();
    let controller = controller(
        TestEngine::new()
            .script("outer", move |cx| {
                thread::sleep(Duration::from_millis(60));
                cx.execute_in(&target, Script::source("inner", "inner.js"))?;
                Ok(Value::Undefined)
            })
            .script("inner", |cx| {
                cx.tick(1)?;
                Ok(Value::Undefined)
            }),
        HostConfig::strict()
            .timeout_millis(50)
            .progress_step_threshold(1),
    );
    let err = controller
        .thread()
        .execute(&document, window.scope(), Script::source("outer", "outer.js"))
        .unwrap_err();
    match err {
        ScriptError::Timeout(timeout) => assert!(timeout.elapsed_ms >= 60),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(other.execution_lock().last_finished(), Some(RunState::TimedOut));
    assert_eq!(
        document.execution_lock().last_finished(),
        Some(RunState::TimedOut)
    );
}
