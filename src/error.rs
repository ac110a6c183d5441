//! Error types and aggregation rules for the scope runtime.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors).
//! - Finalizer errors are collected, never thrown past a `close`.
//! - Aggregates of one error stay unwrapped; aggregates of two or more are
//!   flattened into a single [`Error::Composite`], never nested.
//! - Errors are cheap to clone so an interrupt cause can be observed by
//!   several racing evaluations.

use std::sync::Arc;

use thiserror::Error as ThisError;

use crate::token::Token;

/// The error type for all scope and interpreter operations.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Resource acquisition raced with the owning scope's close and lost.
    #[error("cannot acquire resource: scope {scope} is closed")]
    AcquireAfterScopeClosed {
        /// The scope that was already closed.
        scope: Token,
    },

    /// An operation was invoked on a scope in a state that forbids it.
    #[error("illegal scope state: {0}")]
    IllegalState(&'static str),

    /// Unwinding marker produced when an interruptible scope is interrupted.
    ///
    /// `depth` counts re-deliveries into the same scope's error handlers and
    /// is capped by the scope's configured maximum interrupt depth.
    #[error("interrupted at scope {scope} (unwind depth {depth})")]
    Interrupted {
        /// The scope at which the interrupt originated.
        scope: Token,
        /// Number of times the cause has re-entered handlers of that scope.
        depth: u32,
    },

    /// Two or more errors collected along one code path.
    #[error("composite failure ({} errors)", .0.len())]
    Composite(Vec<Error>),

    /// An error raised by user-supplied code (acquire, release, effect
    /// evaluation, or the fold combiner).
    #[error("{message}")]
    User {
        /// Human-readable description.
        message: String,
        /// Optional underlying error.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a user error from a message.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a user error wrapping an underlying error.
    #[must_use]
    pub fn user_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::User {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates the unwinding marker for an interrupt at `scope`.
    #[must_use]
    pub const fn interrupted(scope: Token, depth: u32) -> Self {
        Self::Interrupted { scope, depth }
    }

    /// Returns true if this is an interrupt unwinding marker.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Returns the interrupt origin and depth, if this is an interrupt.
    #[must_use]
    pub const fn as_interrupted(&self) -> Option<(Token, u32)> {
        match self {
            Self::Interrupted { scope, depth } => Some((*scope, *depth)),
            _ => None,
        }
    }

    /// Aggregates a list of collected errors.
    ///
    /// Returns `None` for an empty list, the error itself for a singleton,
    /// and a flattened [`Error::Composite`] otherwise. Composites inside the
    /// input are flattened so the result never nests composites.
    #[must_use]
    pub fn aggregate(errors: Vec<Error>) -> Option<Error> {
        fn flatten(err: Error, flat: &mut Vec<Error>) {
            match err {
                Error::Composite(inner) => {
                    for e in inner {
                        flatten(e, flat);
                    }
                }
                other => flat.push(other),
            }
        }

        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            flatten(err, &mut flat);
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Composite(flat)),
        }
    }

    /// Merges two errors into one, flattening composites.
    #[must_use]
    pub fn compose(first: Error, second: Error) -> Error {
        Self::aggregate(vec![first, second]).expect("two errors aggregate to one")
    }

    /// Converts a list of collected errors into a `Result`.
    ///
    /// An empty list is `Ok(())`; otherwise the aggregate is returned.
    pub fn aggregate_result(errors: Vec<Error>) -> Result<()> {
        match Self::aggregate(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::AcquireAfterScopeClosed { scope: a },
                Self::AcquireAfterScopeClosed { scope: b },
            ) => a == b,
            (Self::IllegalState(a), Self::IllegalState(b)) => a == b,
            (
                Self::Interrupted { scope: a, depth: da },
                Self::Interrupted { scope: b, depth: db },
            ) => a == b && da == db,
            (Self::Composite(a), Self::Composite(b)) => a == b,
            // User errors compare by message; sources are opaque.
            (Self::User { message: a, .. }, Self::User { message: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// A specialized `Result` for scope runtime operations.
pub type Result<T> = std::result::Result<T, Error>;
