//! Exclusive checkout of one prover handle.

use std::fmt;
use std::ops::{Deref, DerefMut};

use super::prover_pool::{Entry, PoolConnection, PoolId};

/// A prover handle checked out of a [`ProverPool`](super::ProverPool).
///
/// The holder has exclusive use of the handle until the lease is consumed:
/// - [`release`](Self::release) returns the handle to the pool,
/// - [`discard`](Self::discard) takes the handle out of the pool for good and
///   frees its capacity for a replacement.
///
/// Both take the lease by value, so a checkout can be ended only once.
/// Dropping a lease that was neither released nor discarded releases it.
pub struct ProverLease<P> {
    entry: Option<Entry<P>>,
    pool: PoolConnection<P>,
}

impl<P> ProverLease<P> {
    pub(crate) fn new(entry: Entry<P>, pool: PoolConnection<P>) -> Self {
        Self {
            entry: Some(entry),
            pool,
        }
    }

    /// Id of the pool this lease was acquired from.
    pub fn pool_id(&self) -> PoolId {
        self.pool.pool_id
    }

    /// End the checkout and make the handle available to the next `get`.
    ///
    /// If the pool was closed in the meantime the handle is dropped.
    pub fn release(mut self) {
        self.return_to_pool();
    }

    /// End the checkout without returning the handle.
    ///
    /// The pool's resident count shrinks by one, which unblocks a pending
    /// `add` of a replacement.
    pub fn discard(mut self) -> P {
        let Some(Entry { handle, residency }) = self.entry.take() else {
            unreachable!("lease entry is present until the lease is consumed");
        };
        drop(residency);
        tracing::warn!(pool = %self.pool.pool_id, "Prover discarded - pool capacity reduced");
        handle
    }

    fn return_to_pool(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        if self.pool.push(entry).is_err() {
            tracing::debug!(pool = %self.pool.pool_id, "Prover pool closed - dropping released prover");
        }
    }
}

impl<P> Deref for ProverLease<P> {
    type Target = P;

    fn deref(&self) -> &P {
        match &self.entry {
            Some(entry) => &entry.handle,
            None => unreachable!("lease entry is present until the lease is consumed"),
        }
    }
}

impl<P> DerefMut for ProverLease<P> {
    fn deref_mut(&mut self) -> &mut P {
        match &mut self.entry {
            Some(entry) => &mut entry.handle,
            None => unreachable!("lease entry is present until the lease is consumed"),
        }
    }
}

impl<P> Drop for ProverLease<P> {
    fn drop(&mut self) {
        if self.entry.is_some() {
            tracing::debug!(pool = %self.pool.pool_id, "Lease dropped - returning prover to pool");
            self.return_to_pool();
        }
    }
}

impl<P> fmt::Debug for ProverLease<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProverLease")
            .field("pool", &self.pool.pool_id)
            .finish_non_exhaustive()
    }
}
