//! Identity tokens for scopes and resources.
//!
//! Every scope and every resource in the lifetime tree carries a [`Token`],
//! a process-unique identifier. Equality is identity; tokens carry no other
//! structure.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A process-unique identity for a scope or a resource.
///
/// Tokens are drawn from a global monotonic counter, so two tokens compare
/// equal only when they were produced by the same [`Token::fresh`] call.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl Token {
    /// Draws a fresh, never-before-seen token.
    #[must_use]
    pub fn fresh() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}
