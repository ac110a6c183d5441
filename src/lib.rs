//! Rivulet: the scope and resource-lifecycle core of a pull-based streaming
//! runtime.
//!
//! # Overview
//!
//! A stream program is a free term over a small instruction set: emit
//! values, evaluate effects, acquire and release resources, open and close
//! scopes, and pull chunks from nested streams. The interpreter folds such
//! a term while driving a tree of scopes so that every acquired resource is
//! released exactly once, in reverse acquisition order, on every exit
//! path: normal completion, failure, or asynchronous interruption. Resources
//! can be leased across the tree so a closing scope defers finalization
//! until the last lessee lets go.
//!
//! # Core Guarantees
//!
//! - **Deterministic finalization**: within a scope, finalizers run in
//!   strict reverse order of acquisition; children close before their
//!   parent's resources release.
//! - **Exactly-once finalizers**: every finalizer runs once across all
//!   paths (close, explicit release, leased release), and its errors are
//!   collected, never lost.
//! - **Scoped interruption**: an interrupt at a scope is observed only by
//!   that scope and its descendants, delivered at most once, and bounded by
//!   a re-delivery cap so cleanup cannot livelock.
//! - **Flat interpretation**: the fold and uncons loops are trampolined
//!   over the term's left view; program length never grows the stack.
//!
//! # Module Structure
//!
//! - [`token`]: process-unique identities for scopes and resources
//! - [`error`]: the error enum and aggregation rules
//! - [`segment`]: chunked value segments consumed by the interpreter
//! - [`algebra`]: the instruction set and program constructors
//! - [`scope`]: the scope tree, resources, leases, interrupt contexts
//! - [`compile`]: the step interpreter
//! - [`exec`]: the executor seam for interruptible evaluation
//! - [`config`]: options for interruptible scopes
//! - [`sync`]: the one-shot completion cell
//! - [`tracing_compat`]: feature-gated structured logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod algebra;
pub mod compile;
pub mod config;
pub mod error;
pub mod exec;
pub mod scope;
pub mod segment;
pub mod sync;
pub mod token;
pub mod tracing_compat;

// Re-exports for convenient access to core types.
pub use algebra::{Op, Term, UnconsResult, Val};
pub use compile::compile;
pub use config::{InterruptOptions, DEFAULT_MAX_INTERRUPT_DEPTH};
pub use error::{Error, Result};
pub use exec::{Executor, InlineExecutor, ThreadExecutor};
pub use scope::{InterruptContext, Lease, Resource, Scope};
pub use segment::{Chunk, Segment};
pub use token::Token;
