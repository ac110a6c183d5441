//! Free program terms and left-view normalization.
//!
//! A [`Term`] is a free-monad-like program over the instruction set in
//! [`crate::algebra::Op`]. The interpreter never pattern-matches terms
//! directly; it repeatedly normalizes them with [`view`], which yields one
//! of four shapes:
//!
//! - [`View::Done`]: the program finished with a value.
//! - [`View::Failed`]: the program failed with no continuation left.
//! - [`View::Unwound`]: a failure is about to enter a continuation. This is
//!   surfaced (rather than fed silently) so the interpreter can interpose on
//!   interrupt re-delivery and enforce the depth cap.
//! - [`View::Step`]: an instruction followed by a continuation.
//!
//! Normalization is an explicit loop that reassociates
//! `Bind(Bind(a, f), g)` into `Bind(a, |x| Bind(f(x), g))`, so arbitrarily
//! left-nested programs take constant stack.

use std::any::Any;

use crate::algebra::Op;
use crate::error::{Error, Result};

/// A type-erased value flowing between program steps.
pub type Val = Box<dyn Any + Send>;

/// A continuation: receives the previous step's outcome, yields the rest of
/// the program.
pub type Cont<O> = Box<dyn FnOnce(Result<Val>) -> Term<O> + Send>;

/// A deferred effect evaluated through the current scope.
pub type EvalFn = Box<dyn FnOnce() -> Result<Val> + Send>;

/// The unit value in erased form.
#[must_use]
pub fn unit_val() -> Val {
    Box::new(())
}

/// Recovers a typed value from an erased one.
#[must_use]
pub fn downcast_val<T: 'static>(val: Val) -> Option<T> {
    val.downcast::<T>().ok().map(|boxed| *boxed)
}

/// A program over the scope algebra.
pub enum Term<O> {
    /// Finished with a value.
    Pure(Val),
    /// Failed.
    Fail(Error),
    /// A single pending instruction.
    Step(Op<O>),
    /// A sub-program followed by a continuation.
    Bind(Box<Term<O>>, Cont<O>),
}

impl<O: 'static> Term<O> {
    /// A program that immediately completes with `value`.
    #[must_use]
    pub fn pure<T: Send + 'static>(value: T) -> Self {
        Self::Pure(Box::new(value))
    }

    /// A program that immediately fails with `error`.
    #[must_use]
    pub fn fail(error: Error) -> Self {
        Self::Fail(error)
    }

    /// Sequences `next` after this program, observing its outcome.
    ///
    /// The continuation receives `Ok` with this program's value or `Err`
    /// with its failure, and decides how the program continues.
    #[must_use]
    pub fn then(self, next: impl FnOnce(Result<Val>) -> Term<O> + Send + 'static) -> Self {
        Self::Bind(Box::new(self), Box::new(next))
    }

    /// Installs an error handler: failures are routed to `handler`,
    /// successful values pass through unchanged.
    #[must_use]
    pub fn on_error(self, handler: impl FnOnce(Error) -> Term<O> + Send + 'static) -> Self {
        self.then(|outcome| match outcome {
            Ok(value) => Term::Pure(value),
            Err(error) => handler(error),
        })
    }

    /// Rewrites this program to deliver `error` to its first continuation.
    ///
    /// Used by the interpreter to hand an interrupt cause to whatever error
    /// handling the program has installed. A program with no continuation
    /// left simply fails; an already-failed program fails with both errors
    /// composed. A failure that had not yet been delivered is superseded by
    /// `error`.
    #[must_use]
    pub fn as_handler(self, error: Error) -> Self {
        match view(self) {
            View::Done(_) => Self::Fail(error),
            View::Failed(prior) => Self::Fail(Error::compose(prior, error)),
            View::Unwound(_, cont) | View::Step(_, cont) => cont(Err(error)),
        }
    }
}

impl<O> std::fmt::Debug for Term<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pure(_) => f.write_str("Pure(_)"),
            Self::Fail(error) => write!(f, "Fail({error})"),
            Self::Step(op) => write!(f, "Step({op:?})"),
            Self::Bind(inner, _) => write!(f, "Bind({inner:?}, _)"),
        }
    }
}

/// The left view of a term: its first observable event.
pub enum View<O> {
    /// The program completed.
    Done(Val),
    /// The program failed with nothing left to run.
    Failed(Error),
    /// A failure is about to enter the given continuation.
    Unwound(Error, Cont<O>),
    /// An instruction followed by its continuation.
    Step(Op<O>, Cont<O>),
}

/// Normalizes a term to its left view.
pub fn view<O: 'static>(term: Term<O>) -> View<O> {
    let mut term = term;
    loop {
        match term {
            Term::Pure(value) => return View::Done(value),
            Term::Fail(error) => return View::Failed(error),
            Term::Step(op) => {
                return View::Step(
                    op,
                    Box::new(|outcome| match outcome {
                        Ok(value) => Term::Pure(value),
                        Err(error) => Term::Fail(error),
                    }),
                )
            }
            Term::Bind(inner, cont) => match *inner {
                Term::Pure(value) => term = cont(Ok(value)),
                Term::Fail(error) => return View::Unwound(error, cont),
                Term::Step(op) => return View::Step(op, cont),
                Term::Bind(inner2, cont2) => {
                    term = Term::Bind(
                        inner2,
                        Box::new(move |outcome| Term::Bind(Box::new(cont2(outcome)), cont)),
                    );
                }
            },
        }
    }
}
