//! Synchronization primitives consumed by the scope runtime.
//!
//! # Primitives
//!
//! - [`Promise`]: one-shot completion cell with cancellable listeners,
//!   used to deliver an interrupt cause into racing evaluations.

mod promise;

pub use promise::{ListenerId, Promise};
