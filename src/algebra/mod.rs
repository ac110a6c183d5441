//! The interpreter's instruction set and program constructors.
//!
//! Programs are [`Term`]s over the [`Op`] algebra. Nine instructions cover
//! everything the interpreter can be asked to do: emit values, run a
//! segment to its result, pull one chunk from a nested stream, evaluate an
//! effect, acquire/release a resource, open/close a scope, and read the
//! current scope.
//!
//! The user-facing stream DSL lives above this crate; tests and embedders
//! build programs directly from the constructors here, most importantly
//! [`scoped`] / [`interruptible_scope`], which bracket a sub-program between
//! `OpenScope` and `CloseScope` with close-on-error semantics.

mod term;

use std::sync::Arc;

pub use term::{downcast_val, unit_val, view, Cont, EvalFn, Term, Val, View};

use crate::config::InterruptOptions;
use crate::error::{Error, Result};
use crate::scope::{AcquireFn, ReleaseFn, ResourceVal, Scope};
use crate::segment::{Chunk, Segment};
use crate::token::Token;

/// One instruction of the scope algebra.
pub enum Op<O> {
    /// Emit a segment of values to the fold.
    Output(Segment<O, ()>),
    /// Force a segment: emit its values, continue with its result.
    Run(Segment<O, Val>),
    /// Pull at most one chunk from a nested stream.
    Uncons {
        /// The nested stream to pull from.
        stream: Box<Term<O>>,
        /// Upper bound on the chunk size.
        chunk_size: usize,
        /// Work-unit budget for forcing the nested stream's segments.
        max_steps: u64,
    },
    /// Evaluate an effect through the current scope.
    Eval(EvalFn),
    /// Acquire a resource, installing its finalizer in the current scope.
    Acquire {
        /// The acquisition effect.
        acquire: AcquireFn,
        /// The finalizer run when the resource is released.
        release: ReleaseFn,
    },
    /// Release the resource registered under the given token.
    Release(Token),
    /// Open a child scope; it becomes the current scope.
    OpenScope(Option<InterruptOptions>),
    /// Close the given scope; its open ancestor becomes current.
    CloseScope(Arc<Scope>),
    /// Yield the current scope.
    GetScope,
}

impl<O> std::fmt::Debug for Op<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Output(_) => f.write_str("Output"),
            Self::Run(_) => f.write_str("Run"),
            Self::Uncons {
                chunk_size,
                max_steps,
                ..
            } => write!(f, "Uncons(chunk_size={chunk_size}, max_steps={max_steps})"),
            Self::Eval(_) => f.write_str("Eval"),
            Self::Acquire { .. } => f.write_str("Acquire"),
            Self::Release(token) => write!(f, "Release({token})"),
            Self::OpenScope(options) => write!(f, "OpenScope(interruptible={})", options.is_some()),
            Self::CloseScope(scope) => write!(f, "CloseScope({})", scope.id()),
            Self::GetScope => f.write_str("GetScope"),
        }
    }
}

/// The value fed to an `Uncons` continuation: `None` when the nested stream
/// is exhausted, otherwise the leading chunk and the remainder.
pub type UnconsResult<O> = Option<(Chunk<O>, Term<O>)>;

// =========================================================================
// Instruction constructors
// =========================================================================

/// Emits a segment of values.
#[must_use]
pub fn output<O>(segment: Segment<O, ()>) -> Term<O> {
    Term::Step(Op::Output(segment))
}

/// Emits a single value.
#[must_use]
pub fn output_one<O>(value: O) -> Term<O> {
    output(Segment::emit_one(value))
}

/// Forces a segment, emitting its values; the continuation receives the
/// segment's terminal result.
#[must_use]
pub fn run<O, R: Send + 'static>(segment: Segment<O, R>) -> Term<O> {
    Term::Step(Op::Run(segment.map_result(|r| Box::new(r) as Val)))
}

/// Pulls at most one chunk (of at most `chunk_size` values, within
/// `max_steps` work units) from `stream`. The continuation receives an
/// [`UnconsResult`].
#[must_use]
pub fn uncons<O>(stream: Term<O>, chunk_size: usize, max_steps: u64) -> Term<O> {
    Term::Step(Op::Uncons {
        stream: Box::new(stream),
        chunk_size,
        max_steps,
    })
}

/// Evaluates an effect; the continuation receives its value.
#[must_use]
pub fn eval<O, T, F>(effect: F) -> Term<O>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    Term::Step(Op::Eval(Box::new(move || {
        effect().map(|value| Box::new(value) as Val)
    })))
}

/// Acquires a resource in the current scope.
///
/// On success the continuation receives the acquired value and the
/// resource's token (recover both with [`downcast_acquired`]). The release
/// action runs exactly once, when the resource is finalized.
#[must_use]
pub fn acquire<O, T, A, R>(acquire: A, release: R) -> Term<O>
where
    T: Send + Sync + 'static,
    A: FnOnce() -> Result<T> + Send + 'static,
    R: FnOnce(&T) -> Result<()> + Send + 'static,
{
    let acquire: AcquireFn = Box::new(move || acquire().map(|value| Arc::new(value) as ResourceVal));
    let release: ReleaseFn = Box::new(move |value: ResourceVal| match value.downcast_ref::<T>() {
        Some(typed) => release(typed),
        None => Err(Error::IllegalState("resource value type mismatch")),
    });
    Term::Step(Op::Acquire { acquire, release })
}

/// Releases the resource registered under `token` in the current scope.
#[must_use]
pub fn release<O>(token: Token) -> Term<O> {
    Term::Step(Op::Release(token))
}

/// Opens a child scope. The continuation receives the new scope (recover it
/// with [`downcast_scope`]); the interpreter makes it current.
#[must_use]
pub fn open_scope<O>(interruptible: Option<InterruptOptions>) -> Term<O> {
    Term::Step(Op::OpenScope(interruptible))
}

/// Closes `scope`; the interpreter switches back to its open ancestor.
#[must_use]
pub fn close_scope<O>(scope: Arc<Scope>) -> Term<O> {
    Term::Step(Op::CloseScope(scope))
}

/// Yields the current scope to the continuation.
#[must_use]
pub fn get_scope<O>() -> Term<O> {
    Term::Step(Op::GetScope)
}

// =========================================================================
// Scope bracketing
// =========================================================================

/// Runs `inner` inside a fresh child scope, closing it on every exit path.
#[must_use]
pub fn scoped<O: Send + 'static>(inner: Term<O>) -> Term<O> {
    bracket_scope(None, inner)
}

/// Runs `inner` inside a fresh interruptible child scope, closing it on
/// every exit path.
#[must_use]
pub fn interruptible_scope<O: Send + 'static>(
    options: InterruptOptions,
    inner: Term<O>,
) -> Term<O> {
    bracket_scope(Some(options), inner)
}

fn bracket_scope<O: Send + 'static>(
    options: Option<InterruptOptions>,
    inner: Term<O>,
) -> Term<O> {
    open_scope(options).then(move |opened| {
        let scope = match opened {
            Err(error) => return Term::Fail(error),
            Ok(value) => match downcast_scope(value) {
                Some(scope) => scope,
                None => {
                    return Term::Fail(Error::IllegalState(
                        "scope opening yielded an unexpected value",
                    ))
                }
            },
        };
        inner.then(move |body| {
            close_scope(scope).then(move |closed| match (body, closed) {
                (Ok(value), Ok(_)) => Term::Pure(value),
                (Err(error), Ok(_)) => Term::Fail(error),
                (Ok(_), Err(error)) => Term::Fail(error),
                (Err(body_err), Err(close_err)) => Term::Fail(Error::compose(body_err, close_err)),
            })
        })
    })
}

// =========================================================================
// Typed views over continuation values
// =========================================================================

/// Recovers the value/token pair produced by an `Acquire` step.
#[must_use]
pub fn downcast_acquired<T: Send + Sync + 'static>(val: Val) -> Option<(Arc<T>, Token)> {
    let (value, token) = downcast_val::<(ResourceVal, Token)>(val)?;
    let typed = value.downcast::<T>().ok()?;
    Some((typed, token))
}

/// Recovers the scope produced by an `OpenScope` or `GetScope` step.
#[must_use]
pub fn downcast_scope(val: Val) -> Option<Arc<Scope>> {
    downcast_val::<Arc<Scope>>(val)
}

/// Recovers the result of an `Uncons` step.
#[must_use]
pub fn downcast_uncons<O: 'static>(val: Val) -> Option<UnconsResult<O>> {
    downcast_val::<UnconsResult<O>>(val)
}
