//! The scope tree: ownership of resources and child scopes.
//!
//! A [`Scope`] is a node in a dynamically evolving tree. Each node owns the
//! resources acquired while it was current and the child scopes opened
//! under it, both kept in reverse-registration order so that closing walks
//! most-recent-first. Closing a scope closes its children, releases its
//! resources, and unregisters from its parent; it is idempotent and never
//! throws past the caller; finalizer errors are collected and aggregated.
//!
//! Parents hold strong references to children; children point back through
//! a weak handle, so the tree cannot leak through its own cycles.

mod interrupt;
mod lease;
mod resource;

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, Weak};

pub use interrupt::InterruptContext;
pub use lease::Lease;
pub use resource::{AcquireFn, Finalizer, ReleaseFn, Resource, ResourceVal};

use crate::algebra::{EvalFn, Val};
use crate::config::{InterruptOptions, DEFAULT_MAX_INTERRUPT_DEPTH};
use crate::error::{Error, Result};
use crate::token::Token;
use crate::tracing_compat::{debug, trace};

struct ScopeState {
    open: bool,
    /// Most recently registered first.
    resources: VecDeque<Arc<Resource>>,
    /// Most recently opened first.
    children: VecDeque<Arc<Scope>>,
}

impl ScopeState {
    fn new() -> Self {
        Self {
            open: true,
            resources: VecDeque::new(),
            children: VecDeque::new(),
        }
    }
}

/// A node in the scope tree.
pub struct Scope {
    id: Token,
    parent: Weak<Scope>,
    interrupt: Option<Arc<InterruptContext>>,
    state: Mutex<ScopeState>,
}

impl Scope {
    /// Creates the root of a new scope tree.
    #[must_use]
    pub fn root() -> Arc<Self> {
        let id = Token::fresh();
        debug!(scope = %id, "root scope created");
        Arc::new(Self {
            id,
            parent: Weak::new(),
            interrupt: None,
            state: Mutex::new(ScopeState::new()),
        })
    }

    /// The scope's identity token.
    #[must_use]
    pub fn id(&self) -> Token {
        self.id
    }

    /// True until the scope has been closed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().expect("lock poisoned").open
    }

    /// True if the scope participates in an interruptible sub-tree.
    #[must_use]
    pub fn is_interruptible(&self) -> bool {
        self.interrupt.is_some()
    }

    // =====================================================================
    // Resources
    // =====================================================================

    /// Registers a resource. Returns false if the scope is already closed.
    fn register(&self, resource: Arc<Resource>) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        if !state.open {
            return false;
        }
        trace!(scope = %self.id, resource = %resource.id(), "resource registered");
        state.resources.push_front(resource);
        true
    }

    /// Acquires a resource in this scope.
    ///
    /// A pending resource record is registered first, so a concurrent close
    /// observes the acquisition; then the acquisition effect runs. On
    /// success the finalizer (closed over the acquired value) is installed
    /// and the value plus the resource token are returned. On failure the
    /// record is unwound; an unwind error is composed with the acquisition
    /// error.
    pub fn acquire_resource(
        &self,
        acquire: AcquireFn,
        release: ReleaseFn,
    ) -> Result<(ResourceVal, Token)> {
        let resource = Arc::new(Resource::new());
        let token = resource.id();
        if !self.register(resource.clone()) {
            return Err(Error::AcquireAfterScopeClosed { scope: self.id });
        }
        match acquire() {
            Ok(value) => {
                let finalizer_value = value.clone();
                let finalizer: Finalizer = Box::new(move || release(finalizer_value));
                resource.acquired(finalizer)?;
                Ok((value, token))
            }
            Err(acquire_err) => match self.release_resource(token) {
                Ok(()) => Err(acquire_err),
                Err(unwind_err) => Err(Error::compose(acquire_err, unwind_err)),
            },
        }
    }

    /// Releases the resource registered under `token`, if it is still here.
    ///
    /// A token that is absent (already released, or finalized elsewhere)
    /// succeeds silently.
    pub fn release_resource(&self, token: Token) -> Result<()> {
        let found = {
            let mut state = self.state.lock().expect("lock poisoned");
            match state.resources.iter().position(|r| r.id() == token) {
                Some(index) => state.resources.remove(index),
                None => None,
            }
        };
        match found {
            Some(resource) => {
                trace!(scope = %self.id, resource = %token, "resource released");
                resource.release()
            }
            None => Ok(()),
        }
    }

    // =====================================================================
    // Tree operations
    // =====================================================================

    /// Opens a child scope.
    ///
    /// With `interruptible` options the child starts its own interrupt
    /// context rooted at the child's id; otherwise it inherits this scope's
    /// context (if any). If this scope has already closed, the open is
    /// delegated to the nearest open ancestor; a closed root fails.
    pub fn open(
        self: &Arc<Self>,
        interruptible: Option<InterruptOptions>,
    ) -> Result<Arc<Scope>> {
        {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.open {
                let id = Token::fresh();
                let context = match &interruptible {
                    Some(options) => Some(Arc::new(InterruptContext::new(options.clone(), id))),
                    None => self.interrupt.clone(),
                };
                let child = Arc::new(Scope {
                    id,
                    parent: Arc::downgrade(self),
                    interrupt: context,
                    state: Mutex::new(ScopeState::new()),
                });
                state.children.push_front(child.clone());
                debug!(scope = %id, parent = %self.id, interruptible = child.is_interruptible(), "scope opened");
                return Ok(child);
            }
        }
        // Closed: the nearest open ancestor adopts the new scope.
        match self.parent.upgrade() {
            Some(parent) => parent.open(interruptible),
            None => Err(Error::IllegalState(
                "cannot open a child of a closed root scope",
            )),
        }
    }

    /// Unregisters a child that has closed itself.
    fn release_child_scope(&self, id: Token) {
        let mut state = self.state.lock().expect("lock poisoned");
        state.children.retain(|child| child.id != id);
    }

    /// Closes this scope.
    ///
    /// Atomically flips the scope to closed and snapshots its children and
    /// resources; then closes every child, releases every resource in
    /// reverse-acquisition order, and unregisters from the parent. All
    /// errors along the way are collected into one aggregate. Re-closing a
    /// closed scope is a no-op returning `Ok`.
    pub fn close(self: &Arc<Self>) -> Result<()> {
        let (resources, children) = {
            let mut state = self.state.lock().expect("lock poisoned");
            if !state.open {
                return Ok(());
            }
            state.open = false;
            (
                std::mem::take(&mut state.resources),
                std::mem::take(&mut state.children),
            )
        };
        debug!(scope = %self.id, resources = resources.len(), children = children.len(), "scope closing");

        let mut errors = Vec::new();
        for child in children {
            if let Err(err) = child.close() {
                errors.push(err);
            }
        }
        for resource in resources {
            if let Err(err) = resource.release() {
                errors.push(err);
            }
        }
        if let Some(parent) = self.parent.upgrade() {
            parent.release_child_scope(self.id);
        }
        Error::aggregate_result(errors)
    }

    /// The nearest open ancestor, or the outermost reachable scope when
    /// every ancestor has closed.
    #[must_use]
    pub fn open_ancestor(self: &Arc<Self>) -> Arc<Scope> {
        let mut current = self.clone();
        loop {
            match current.parent.upgrade() {
                Some(parent) if parent.is_open() => return parent,
                Some(parent) => current = parent,
                None => return current,
            }
        }
    }

    /// True iff a strict ancestor of this scope carries `id`.
    #[must_use]
    pub fn has_ancestor(&self, id: Token) -> bool {
        let mut ancestor = self.parent.upgrade();
        while let Some(scope) = ancestor {
            if scope.id == id {
                return true;
            }
            ancestor = scope.parent.upgrade();
        }
        false
    }

    // =====================================================================
    // Leases
    // =====================================================================

    /// Leases a snapshot of every resource visible from this scope: its
    /// own, its direct children's, and all its ancestors'.
    ///
    /// Returns `None` once the scope has closed. Resources whose release has
    /// already been requested are skipped; resources acquired after the
    /// snapshot are not covered.
    #[must_use]
    pub fn lease(&self) -> Option<Lease> {
        let (mut snapshot, children) = {
            let state = self.state.lock().expect("lock poisoned");
            if !state.open {
                return None;
            }
            (
                state.resources.iter().cloned().collect::<Vec<_>>(),
                state.children.iter().cloned().collect::<Vec<_>>(),
            )
        };
        for child in children {
            let state = child.state.lock().expect("lock poisoned");
            snapshot.extend(state.resources.iter().cloned());
        }
        let mut ancestor = self.parent.upgrade();
        while let Some(scope) = ancestor {
            {
                let state = scope.state.lock().expect("lock poisoned");
                snapshot.extend(state.resources.iter().cloned());
            }
            ancestor = scope.parent.upgrade();
        }

        let mut holds = Vec::with_capacity(snapshot.len());
        for resource in snapshot {
            if resource.try_lease() {
                holds.push(resource);
            }
        }
        trace!(scope = %self.id, holds = holds.len(), "lease taken");
        Some(Lease::new(holds))
    }

    // =====================================================================
    // Interruption
    // =====================================================================

    /// Signals an interrupt on this scope's interrupt context.
    ///
    /// `Ok(())` synthesizes the unwinding marker for the context's root;
    /// `Err(cause)` injects that cause instead. Repeated interrupts are
    /// silently ignored. Fails on a scope with no interrupt context.
    pub fn interrupt(&self, cause: Result<()>) -> Result<()> {
        let Some(context) = &self.interrupt else {
            return Err(Error::IllegalState(
                "interrupt on a non-interruptible scope",
            ));
        };
        let cause = match cause {
            Ok(()) => Error::interrupted(context.interrupt_root(), 0),
            Err(err) => err,
        };
        context.signal(cause);
        Ok(())
    }

    /// True once this scope's interrupt context has a cause recorded.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|context| context.is_interrupted())
    }

    /// The pre-step interrupt probe: hands out the cause exactly once.
    #[must_use]
    pub fn shall_interrupt(&self) -> Option<Error> {
        self.interrupt.as_ref().and_then(|context| context.consume())
    }

    /// Cap on interrupt re-deliveries applicable to this scope.
    #[must_use]
    pub fn max_interrupt_depth(&self) -> u32 {
        self.interrupt
            .as_ref()
            .map_or(DEFAULT_MAX_INTERRUPT_DEPTH, |context| {
                context.max_interrupt_depth()
            })
    }

    /// Evaluates an effect, racing it against this scope's interrupt.
    ///
    /// Outside an interruptible sub-tree, or once the interrupt has
    /// already been delivered, the effect simply runs on the calling
    /// thread. Otherwise the effect runs on the context's executor while
    /// this thread waits for whichever finishes first; if the interrupt
    /// wins, the cause is returned as the error and marked delivered so the
    /// pre-step probe does not hand it out a second time. The losing effect
    /// keeps running on the executor; its result is dropped.
    pub fn interruptible_eval(&self, effect: EvalFn) -> Result<Val> {
        let Some(context) = &self.interrupt else {
            return effect();
        };
        if context.is_signalled() {
            return effect();
        }

        enum RaceOutcome {
            Completed(Result<Val>),
            Interrupted(Error),
        }

        let (tx, rx) = mpsc::channel();
        // The listener goes in first: a cause recorded before this call
        // wins the race outright instead of depending on executor timing.
        let interrupt_tx = tx.clone();
        let listener = context.promise().on_complete(move |cause| {
            let _ = interrupt_tx.send(RaceOutcome::Interrupted(cause));
        });
        context.executor().execute(Box::new(move || {
            let _ = tx.send(RaceOutcome::Completed(effect()));
        }));

        match rx.recv() {
            Ok(RaceOutcome::Completed(result)) => {
                if let Some(id) = listener {
                    context.promise().cancel_listener(id);
                }
                result
            }
            Ok(RaceOutcome::Interrupted(cause)) => {
                context.mark_signalled();
                Err(cause)
            }
            Err(_) => Err(Error::IllegalState("executor dropped the evaluation task")),
        }
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("lock poisoned");
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("open", &state.open)
            .field("resources", &state.resources.len())
            .field("children", &state.children.len())
            .field("interruptible", &self.interrupt.is_some())
            .finish()
    }
}
