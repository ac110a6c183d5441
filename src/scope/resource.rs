//! Resource records: finalizer holders with a lease/release lifecycle.
//!
//! A resource is created empty when acquisition starts, receives its
//! finalizer when acquisition succeeds, and runs that finalizer exactly
//! once: after a release has been requested *and* every outstanding lease
//! has been cancelled. The finalizer is taken out of the state under the lock
//! and always invoked outside it.
//!
//! State machine:
//!
//! ```text
//! Pending (no finalizer) → Open (finalizer installed) → Closed
//! ```
//!
//! `Pending` and `Open` share `held == true`; `release` flips it to false on
//! every path and never back.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::token::Token;
use crate::tracing_compat::trace;

/// The erased value produced by an acquisition effect.
///
/// Shared between the installed finalizer and the program continuation.
pub type ResourceVal = Arc<dyn Any + Send + Sync>;

/// An acquisition effect.
pub type AcquireFn = Box<dyn FnOnce() -> Result<ResourceVal> + Send>;

/// A release action taking the acquired value.
pub type ReleaseFn = Box<dyn FnOnce(ResourceVal) -> Result<()> + Send>;

/// An installed finalizer, already closed over its resource value.
pub type Finalizer = Box<dyn FnOnce() -> Result<()> + Send>;

struct ResourceState {
    /// True until a release has been requested (covers Pending and Open).
    held: bool,
    /// Installed by `acquired`; taken exactly once when the finalizer runs.
    finalizer: Option<Finalizer>,
    /// Outstanding lease count.
    leases: u32,
}

/// One acquired (or in-flight) resource.
pub struct Resource {
    id: Token,
    state: Mutex<ResourceState>,
}

impl Resource {
    /// Creates a resource in the pending state: held, no finalizer, no
    /// leases.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Token::fresh(),
            state: Mutex::new(ResourceState {
                held: true,
                finalizer: None,
                leases: 0,
            }),
        }
    }

    /// The resource's identity token.
    #[must_use]
    pub fn id(&self) -> Token {
        self.id
    }

    /// Installs the finalizer after a successful acquisition.
    ///
    /// If a release was requested while acquisition was in flight (the
    /// owning scope closed underneath it), the finalizer runs immediately,
    /// unless leases are outstanding, in which case it is installed and runs
    /// when the last lease cancels. Any immediate finalizer error surfaces.
    pub fn acquired(&self, finalizer: Finalizer) -> Result<()> {
        let run_now = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.held || state.leases > 0 {
                state.finalizer = Some(finalizer);
                None
            } else {
                Some(finalizer)
            }
        };
        match run_now {
            None => Ok(()),
            Some(finalizer) => {
                trace!(resource = %self.id, "late close: running finalizer at acquisition");
                finalizer()
            }
        }
    }

    /// Requests release of the resource.
    ///
    /// Runs the finalizer now if no leases are outstanding; otherwise the
    /// finalizer is deferred to the last lease cancellation. Idempotent:
    /// releasing an already-released resource succeeds without effect.
    pub fn release(&self) -> Result<()> {
        let finalizer = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.held {
                return Ok(());
            }
            state.held = false;
            if state.leases == 0 {
                state.finalizer.take()
            } else {
                None
            }
        };
        match finalizer {
            None => Ok(()),
            Some(finalizer) => finalizer(),
        }
    }

    /// Leases this resource alone.
    ///
    /// Returns `None` once a release has been requested.
    #[must_use]
    pub fn lease(self: &Arc<Self>) -> Option<crate::scope::Lease> {
        if self.try_lease() {
            Some(crate::scope::Lease::new(vec![self.clone()]))
        } else {
            None
        }
    }

    /// Increments the lease count while the resource is still held.
    ///
    /// Returns false once a release has been requested.
    pub(crate) fn try_lease(&self) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if state.held {
            state.leases += 1;
            true
        } else {
            false
        }
    }

    /// Cancels one lease; runs the finalizer if this was the last lease and
    /// release has already been requested.
    pub(crate) fn cancel_lease(&self) -> Result<()> {
        let finalizer = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.leases = state.leases.saturating_sub(1);
            if state.leases == 0 && !state.held {
                state.finalizer.take()
            } else {
                None
            }
        };
        match finalizer {
            None => Ok(()),
            Some(finalizer) => finalizer(),
        }
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("Resource")
            .field("id", &self.id)
            .field("held", &state.held)
            .field("installed", &state.finalizer.is_some())
            .field("leases", &state.leases)
            .finish()
    }
}
