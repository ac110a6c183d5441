//! The step interpreter.
//!
//! [`compile`] folds a program's emitted values into an accumulator while
//! driving the scope tree: it creates a root scope, walks the program one
//! instruction at a time, and closes the root on every exit path,
//! aggregating a close failure with any earlier one.
//!
//! Both walkers here (the fold loop and the uncons walker) are flat
//! loops over [`view`], so program length never grows the native stack;
//! only nesting `Uncons` inside `Uncons` recurses, one frame per nesting
//! level.
//!
//! # Interrupt unwinding
//!
//! Every error the interpreter feeds into a continuation passes through
//! [`deliver`]. An [`Error::Interrupted`] cause belonging to the current
//! scope (same id, or the current scope descends from it) is re-delivered
//! with its depth bumped so the program's own error handlers can run
//! cleanup, and fails hard once the depth reaches the scope's cap, which
//! breaks handlers that re-raise the interrupt forever. A cause that has
//! already escaped its sub-tree is dropped: the rest of the program
//! continues with a unit result, and at top level the fold simply ends
//! with the partial accumulator.

use std::sync::Arc;

use crate::algebra::{output, unit_val, view, Cont, Op, Term, UnconsResult, Val, View};
use crate::error::{Error, Result};
use crate::scope::Scope;
use crate::segment::{Chunk, SplitAt};
use crate::tracing_compat::{debug, trace};

/// Folds `stream` with the combiner `g`, starting from `init`.
///
/// A fresh root scope is current for the whole run. On every return path
/// (success, failure, interrupt) the root scope has been closed; a close failure
/// is composed with any earlier error.
pub fn compile<O, B, G>(stream: Term<O>, init: B, mut g: G) -> Result<B>
where
    O: Send + 'static,
    G: FnMut(&mut B, O) -> Result<()>,
{
    let root = Scope::root();
    let mut acc = init;
    let folded = fold_term(root.clone(), stream, &mut acc, &mut g);
    let closed = root.close();
    debug!(ok = folded.is_ok(), "compile finished, root closed");
    match (folded, closed) {
        (Ok(()), Ok(())) => Ok(acc),
        (Ok(()), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => Err(Error::compose(err, close_err)),
    }
}

/// The fold loop: walks `term`, folding emitted segments into `acc`.
///
/// Returns `Ok` on normal completion *and* when an interrupt terminated
/// the program; the caller keeps the partial accumulator.
fn fold_term<O, B, G>(
    mut scope: Arc<Scope>,
    term: Term<O>,
    acc: &mut B,
    g: &mut G,
) -> Result<()>
where
    O: Send + 'static,
    G: FnMut(&mut B, O) -> Result<()>,
{
    let mut term = term;
    loop {
        match view(term) {
            View::Done(_) => return Ok(()),
            View::Failed(error) => {
                // An interrupt surviving to the top terminates the fold;
                // the root close (in `compile`) reclaims whatever is left.
                return if error.is_interrupted() {
                    Ok(())
                } else {
                    Err(error)
                };
            }
            View::Unwound(error, cont) => {
                term = deliver(&scope, cont, Err(error))?;
            }
            View::Step(op, cont) => {
                if let Some(cause) = scope.shall_interrupt() {
                    trace!(scope = %scope.id(), "interrupt observed between steps");
                    term = deliver(&scope, cont, Err(cause))?;
                    continue;
                }
                term = match op {
                    Op::Output(segment) => {
                        let outcome = segment.fold_into(acc, g).map(|()| unit_val());
                        deliver(&scope, cont, outcome)?
                    }
                    Op::Run(segment) => {
                        let outcome = segment.fold_into(acc, g);
                        deliver(&scope, cont, outcome)?
                    }
                    Op::Uncons {
                        stream,
                        chunk_size,
                        max_steps,
                    } => {
                        let outcome = uncons_term(scope.clone(), *stream, chunk_size, max_steps)
                            .map(|result| Box::new(result) as Val);
                        deliver(&scope, cont, outcome)?
                    }
                    effectful => {
                        let outcome = effect_outcome(effectful, &mut scope);
                        deliver(&scope, cont, outcome)?
                    }
                };
            }
        }
    }
}

/// The uncons walker: drives `term` until it emits, returning the leading
/// chunk (at most `chunk_size` values, within `max_steps` work units) and
/// the remainder, or `None` when the stream finished first.
fn uncons_term<O>(
    mut scope: Arc<Scope>,
    term: Term<O>,
    chunk_size: usize,
    max_steps: u64,
) -> Result<UnconsResult<O>>
where
    O: Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let max_steps = max_steps.max(1);
    let mut term = term;
    loop {
        match view(term) {
            View::Done(_) => return Ok(None),
            View::Failed(error) => {
                return match error.as_interrupted() {
                    // An interrupt of the enclosing tree unwinds in the
                    // caller, which owns the cleanup continuations.
                    Some((origin, _)) if scope.id() == origin || scope.has_ancestor(origin) => {
                        Err(error)
                    }
                    // A stream interrupted at one of its own scopes reads
                    // as exhausted.
                    Some(_) => Ok(None),
                    None => Err(error),
                };
            }
            View::Unwound(error, cont) => {
                term = deliver(&scope, cont, Err(error))?;
            }
            View::Step(op, cont) => {
                if let Some(cause) = scope.shall_interrupt() {
                    term = deliver(&scope, cont, Err(cause))?;
                    continue;
                }
                term = match op {
                    Op::Output(segment) => match segment.split_at(chunk_size, max_steps) {
                        SplitAt::Exhausted { taken, .. } if taken.is_empty() => {
                            deliver(&scope, cont, Ok(unit_val()))?
                        }
                        SplitAt::Exhausted { taken, .. } => {
                            return Ok(Some((Chunk::concat(taken), cont(Ok(unit_val())))));
                        }
                        SplitAt::Split { taken, rest } => {
                            return Ok(Some((
                                Chunk::concat(taken),
                                Term::Bind(Box::new(output(rest)), cont),
                            )));
                        }
                    },
                    Op::Run(segment) => match segment.split_at(chunk_size, max_steps) {
                        SplitAt::Exhausted { result, taken } if taken.is_empty() => {
                            deliver(&scope, cont, Ok(result))?
                        }
                        SplitAt::Exhausted { result, taken } => {
                            return Ok(Some((Chunk::concat(taken), cont(Ok(result)))));
                        }
                        SplitAt::Split { taken, rest } => {
                            return Ok(Some((
                                Chunk::concat(taken),
                                Term::Bind(Box::new(Term::Step(Op::Run(rest))), cont),
                            )));
                        }
                    },
                    Op::Uncons {
                        stream,
                        chunk_size: inner_size,
                        max_steps: inner_steps,
                    } => {
                        let outcome = uncons_term(scope.clone(), *stream, inner_size, inner_steps)
                            .map(|result| Box::new(result) as Val);
                        deliver(&scope, cont, outcome)?
                    }
                    effectful => {
                        let outcome = effect_outcome(effectful, &mut scope);
                        deliver(&scope, cont, outcome)?
                    }
                };
            }
        }
    }
}

/// Executes one effectful instruction against the current scope.
///
/// `OpenScope` and `CloseScope` update which scope is current; the others
/// leave it untouched.
fn effect_outcome<O>(op: Op<O>, scope: &mut Arc<Scope>) -> Result<Val>
where
    O: Send + 'static,
{
    match op {
        Op::Eval(effect) => scope.interruptible_eval(effect),
        Op::Acquire { acquire, release } => scope
            .acquire_resource(acquire, release)
            .map(|(value, token)| Box::new((value, token)) as Val),
        Op::Release(token) => scope.release_resource(token).map(|()| unit_val()),
        Op::OpenScope(options) => match scope.open(options) {
            Ok(child) => {
                *scope = child.clone();
                Ok(Box::new(child) as Val)
            }
            Err(error) => Err(error),
        },
        Op::CloseScope(target) => {
            let outcome = target.close().map(|()| unit_val());
            *scope = target.open_ancestor();
            outcome
        }
        Op::GetScope => Ok(Box::new(scope.clone()) as Val),
        Op::Output(_) | Op::Run(_) | Op::Uncons { .. } => {
            Err(Error::IllegalState("output instruction in effect position"))
        }
    }
}

/// Feeds a step outcome into a continuation, applying interrupt unwinding.
///
/// - Plain values and plain errors pass straight through.
/// - An [`Error::Interrupted`] belonging to the current scope is delivered
///   with its depth bumped, or fails hard at the scope's depth cap.
/// - An interrupt that already escaped its sub-tree is dropped; the
///   continuation proceeds with a unit value.
fn deliver<O>(scope: &Arc<Scope>, cont: Cont<O>, outcome: Result<Val>) -> Result<Term<O>> {
    match outcome {
        Ok(value) => Ok(cont(Ok(value))),
        Err(error) => match error.as_interrupted() {
            Some((origin, depth)) if scope.id() == origin || scope.has_ancestor(origin) => {
                if depth >= scope.max_interrupt_depth() {
                    debug!(scope = %scope.id(), depth, "interrupt depth cap reached");
                    Err(Error::interrupted(origin, depth))
                } else {
                    Ok(cont(Err(Error::interrupted(origin, depth + 1))))
                }
            }
            Some(_) => Ok(cont(Ok(unit_val()))),
            None => Ok(cont(Err(error))),
        },
    }
}
