//! Shared interrupt state for an interruptible scope sub-tree.
//!
//! An [`InterruptContext`] is created when a scope is opened interruptibly
//! and inherited by reference into every descendant opened inside it (a
//! descendant opened interruptibly gets its own context, shadowing this
//! one). Signalling is one-shot: the first cause wins, later signals are
//! no-ops.

use std::sync::{Arc, Mutex};

use crate::config::InterruptOptions;
use crate::error::Error;
use crate::exec::Executor;
use crate::sync::Promise;
use crate::token::Token;
use crate::tracing_compat::debug;

struct SignalState {
    /// The cause, set at most once by `signal`.
    cause: Option<Error>,
    /// True once the cause has been handed to an observer.
    signalled: bool,
}

/// Shared signalling record for an interruptible sub-tree.
pub struct InterruptContext {
    executor: Arc<dyn Executor>,
    /// Completed with the cause; racing evaluations listen on this.
    promise: Promise<Error>,
    state: Mutex<SignalState>,
    /// The scope at which interrupts on this context originate.
    interrupt_root: Token,
    max_interrupt_depth: u32,
}

impl InterruptContext {
    /// Creates a context rooted at `interrupt_root`.
    #[must_use]
    pub fn new(options: InterruptOptions, interrupt_root: Token) -> Self {
        Self {
            executor: options.executor,
            promise: Promise::new(),
            state: Mutex::new(SignalState {
                cause: None,
                signalled: false,
            }),
            interrupt_root,
            max_interrupt_depth: options.max_interrupt_depth,
        }
    }

    /// The scope at which interrupts on this context originate.
    #[must_use]
    pub fn interrupt_root(&self) -> Token {
        self.interrupt_root
    }

    /// Cap on interrupt re-deliveries within the sub-tree.
    #[must_use]
    pub fn max_interrupt_depth(&self) -> u32 {
        self.max_interrupt_depth
    }

    /// The executor effects race on inside this sub-tree.
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// The completion cell carrying the cause.
    #[must_use]
    pub(crate) fn promise(&self) -> &Promise<Error> {
        &self.promise
    }

    /// Records the interrupt cause and completes the promise.
    ///
    /// Only the first signal takes effect; repeated signals are no-ops.
    pub fn signal(&self, cause: Error) {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.cause.is_some() {
                return;
            }
            state.cause = Some(cause.clone());
        }
        debug!(scope = %self.interrupt_root, %cause, "interrupt signalled");
        self.promise.complete(cause);
    }

    /// True once a cause has been recorded.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.state.lock().expect("lock poisoned").cause.is_some()
    }

    /// Hands out the cause exactly once.
    ///
    /// The first call after [`InterruptContext::signal`] returns the cause
    /// and marks it delivered; every later call returns `None`.
    #[must_use]
    pub fn consume(&self) -> Option<Error> {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.signalled {
            return None;
        }
        let cause = state.cause.clone()?;
        state.signalled = true;
        Some(cause)
    }

    /// True once the cause has been handed to an observer.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.state.lock().expect("lock poisoned").signalled
    }

    /// Marks the cause delivered without reading it.
    ///
    /// Used when an evaluation race observes the interrupt first, so the
    /// pre-step probe does not deliver the same cause a second time.
    pub(crate) fn mark_signalled(&self) {
        self.state.lock().expect("lock poisoned").signalled = true;
    }
}

impl std::fmt::Debug for InterruptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("InterruptContext")
            .field("interrupt_root", &self.interrupt_root)
            .field("interrupted", &state.cause.is_some())
            .field("signalled", &state.signalled)
            .field("max_interrupt_depth", &self.max_interrupt_depth)
            .finish_non_exhaustive()
    }
}
