//! Lease handles over snapshots of live resources.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::scope::resource::Resource;

/// A counted hold on a snapshot of resources.
///
/// While a lease is outstanding, none of the snapshot's resources will be
/// finalized, even if their owning scopes close. Cancelling the lease drops
/// the hold on every resource; any resource whose release was requested in
/// the meantime is finalized during the cancel.
pub struct Lease {
    holds: Vec<Arc<Resource>>,
}

impl Lease {
    pub(crate) fn new(holds: Vec<Arc<Resource>>) -> Self {
        Self { holds }
    }

    /// Number of resources covered by this lease.
    #[must_use]
    pub fn len(&self) -> usize {
        self.holds.len()
    }

    /// True if the lease covers no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holds.is_empty()
    }

    /// Cancels the lease.
    ///
    /// Every underlying hold is dropped; finalizer errors are collected and
    /// returned as an aggregate.
    pub fn cancel(self) -> Result<()> {
        let mut errors = Vec::new();
        for resource in self.holds {
            if let Err(err) = resource.cancel_lease() {
                errors.push(err);
            }
        }
        Error::aggregate_result(errors)
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("holds", &self.holds.len())
            .finish()
    }
}
