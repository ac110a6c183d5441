#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::{Arc, Mutex, Once};

use rivulet::algebra::{acquire, Term};
use rivulet::{Error, Result};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging once per process.
///
/// Safe to call from every test; only the first call installs the
/// subscriber.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A shared, ordered log of finalizer side effects.
pub type FinalizerLog = Arc<Mutex<Vec<&'static str>>>;

/// Creates an empty finalizer log.
pub fn finalizer_log() -> FinalizerLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Reads the log contents.
pub fn log_entries(log: &FinalizerLog) -> Vec<&'static str> {
    log.lock().expect("log poisoned").clone()
}

/// An acquire step whose finalizer appends `name` to `log`.
pub fn tracked_acquire<O: Send + 'static>(name: &'static str, log: &FinalizerLog) -> Term<O> {
    let log = log.clone();
    acquire(
        move || Ok(name),
        move |_| {
            log.lock().expect("log poisoned").push(name);
            Ok(())
        },
    )
}

/// An acquire step whose finalizer appends `name` to `log` and then fails
/// with a user error of the same name.
pub fn failing_finalizer_acquire<O: Send + 'static>(
    name: &'static str,
    log: &FinalizerLog,
) -> Term<O> {
    let log = log.clone();
    acquire(
        move || Ok(name),
        move |_| {
            log.lock().expect("log poisoned").push(name);
            Err(Error::user(name))
        },
    )
}

/// Compiles a program collecting every emitted value.
pub fn collect(term: Term<u32>) -> Result<Vec<u32>> {
    rivulet::compile(term, Vec::new(), |acc, value| {
        acc.push(value);
        Ok(())
    })
}
