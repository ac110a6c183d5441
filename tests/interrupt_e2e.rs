//! End-to-end interruption scenarios: delivery, scoping, the evaluation
//! race, and the re-delivery depth cap.

mod common;

use std::sync::{mpsc, Arc, Mutex};

use common::{finalizer_log, init_test_logging, log_entries, tracked_acquire};
use rivulet::algebra::{
    downcast_scope, eval, get_scope, interruptible_scope, output_one, Term,
};
use rivulet::{Error, InlineExecutor, InterruptOptions, Scope, ThreadExecutor};

type ScopeSlot = Arc<Mutex<Option<Arc<Scope>>>>;

fn scope_slot() -> ScopeSlot {
    Arc::new(Mutex::new(None))
}

fn captured(slot: &ScopeSlot) -> Arc<Scope> {
    slot.lock()
        .expect("slot poisoned")
        .as_ref()
        .expect("scope captured")
        .clone()
}

fn inline_options() -> InterruptOptions {
    InterruptOptions::new(Arc::new(InlineExecutor))
}

/// Emits `start`, `start + 1`, … forever.
fn emit_from(start: u32) -> Term<u32> {
    output_one(start).then(move |outcome| match outcome {
        Ok(_) => emit_from(start + 1),
        Err(error) => Term::fail(error),
    })
}

/// Captures the current scope into `slot`, then runs `next`.
fn capture_scope(slot: ScopeSlot, next: Term<u32>) -> Term<u32> {
    get_scope().then(move |outcome| {
        let scope = downcast_scope(outcome.expect("scope value")).expect("scope");
        *slot.lock().expect("slot poisoned") = Some(scope);
        next
    })
}

// =========================================================================
// S5: interrupt between steps stops the fold with the partial accumulator
// =========================================================================

#[test]
fn interrupt_between_steps_keeps_the_partial_accumulator() {
    init_test_logging();
    let slot = scope_slot();
    let log = finalizer_log();

    let body = tracked_acquire("held", &log).then({
        let slot = slot.clone();
        move |outcome| {
            outcome.expect("acquire succeeds");
            capture_scope(slot, emit_from(0))
        }
    });
    let term = interruptible_scope(inline_options(), body);

    let interrupter = slot.clone();
    let values = rivulet::compile(term, Vec::new(), move |acc: &mut Vec<u32>, value| {
        acc.push(value);
        if value == 1 {
            captured(&interrupter)
                .interrupt(Ok(()))
                .expect("scope is interruptible");
        }
        Ok(())
    })
    .expect("interrupted stream completes with partial output");

    assert_eq!(values, vec![0, 1]);
    // The interrupted scope's resources were finalized on the way out.
    assert_eq!(log_entries(&log), vec!["held"]);
}

// =========================================================================
// S6: a handler that re-raises forever hits the depth cap
// =========================================================================

fn rethrowing(error: Error) -> Term<u32> {
    Term::fail(error).on_error(rethrowing)
}

#[test]
fn self_rethrowing_handler_fails_at_the_depth_cap() {
    init_test_logging();
    let slot = scope_slot();

    let body = capture_scope(slot.clone(), emit_from(0)).on_error(rethrowing);
    let options = inline_options().with_max_interrupt_depth(8);
    let term = interruptible_scope(options, body);

    let interrupter = slot.clone();
    let err = rivulet::compile(term, Vec::new(), move |acc: &mut Vec<u32>, value| {
        acc.push(value);
        if value == 0 {
            captured(&interrupter)
                .interrupt(Ok(()))
                .expect("scope is interruptible");
        }
        Ok(())
    })
    .expect_err("the rethrow loop must be cut off");

    match err {
        Error::Interrupted { depth, .. } => assert_eq!(depth, 8),
        other => panic!("expected a terminal interrupt, got {other:?}"),
    }
}

// =========================================================================
// Interrupt scoping: a later sibling scope continues unaffected
// =========================================================================

#[test]
fn interrupt_does_not_leak_into_a_sibling_scope() {
    init_test_logging();
    let slot = scope_slot();

    let first = interruptible_scope(inline_options(), capture_scope(slot.clone(), emit_from(0)));
    let second =
        interruptible_scope(inline_options(), capture_scope(slot.clone(), emit_from(10)));
    let term = first.then(move |outcome| {
        outcome.expect("interrupt is resolved at the scope boundary");
        second
    });

    let interrupter = slot.clone();
    let values = rivulet::compile(term, Vec::new(), move |acc: &mut Vec<u32>, value| {
        acc.push(value);
        // Interrupt whichever scope is current after two of its values.
        if value == 1 || value == 11 {
            captured(&interrupter)
                .interrupt(Ok(()))
                .expect("scope is interruptible");
        }
        Ok(())
    })
    .expect("both scopes resolve their own interrupts");

    assert_eq!(values, vec![0, 1, 10, 11]);
}

// =========================================================================
// Interruptible evaluation race
// =========================================================================

#[test]
fn interrupt_during_evaluation_wins_the_race() {
    init_test_logging();
    let slot = scope_slot();

    // The effect parks on `gate` after announcing itself on `started`; the
    // interrupt always lands while the effect is in flight.
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let body = capture_scope(slot.clone(), {
        output_one(1).then(move |outcome| {
            outcome.expect("emit succeeded");
            eval(move || {
                started_tx.send(()).expect("test thread alive");
                let _ = gate_rx.recv();
                Ok(2u32)
            })
            .then(|outcome| match outcome {
                Ok(_) => output_one(2),
                Err(error) => Term::fail(error),
            })
        })
    });
    let options = InterruptOptions::new(Arc::new(ThreadExecutor));
    let term = interruptible_scope(options, body);

    let interrupter = slot.clone();
    let signaller = std::thread::spawn(move || {
        started_rx.recv().expect("effect started");
        captured(&interrupter)
            .interrupt(Ok(()))
            .expect("scope is interruptible");
    });

    let values = rivulet::compile(term, Vec::new(), |acc: &mut Vec<u32>, value| {
        acc.push(value);
        Ok(())
    })
    .expect("interrupted stream completes with partial output");

    signaller.join().expect("signaller panicked");
    // Release the parked effect thread; its result is dropped.
    let _ = gate_tx.send(());

    // The eval lost the race: 2 was never emitted.
    assert_eq!(values, vec![1]);
}

// =========================================================================
// A user cause injected through interrupt propagates as that error
// =========================================================================

#[test]
fn user_cause_interrupt_fails_the_stream_with_that_error() {
    init_test_logging();
    let slot = scope_slot();

    let term = interruptible_scope(inline_options(), capture_scope(slot.clone(), emit_from(0)));
    let interrupter = slot.clone();
    let err = rivulet::compile(term, Vec::new(), move |acc: &mut Vec<u32>, value| {
        acc.push(value);
        if value == 0 {
            captured(&interrupter)
                .interrupt(Err(Error::user("deadline elapsed")))
                .expect("scope is interruptible");
        }
        Ok(())
    })
    .expect_err("user causes are real failures");

    assert_eq!(err, Error::user("deadline elapsed"));
}
