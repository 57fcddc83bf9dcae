//! Bounded pool of prover handles.
//!
//! Available handles sit in a single bounded mpsc channel; taking one out of
//! the channel is the only way to check a handle out, so two callers can never
//! receive the same handle. Residency (available + checked out) is tracked by a
//! semaphore whose owned permit travels with each handle until it is discarded.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use super::error::{AddError, PoolError};
use super::lease::ProverLease;

/// Unique identifier for a prover pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(uuid::Uuid);

impl PoolId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Entry<P> {
    pub handle: P,
    pub residency: OwnedSemaphorePermit,
}

/// The half of the pool a lease needs to find its way home.
pub(crate) struct PoolConnection<P> {
    pub pool_id: PoolId,
    pub pool_tx: mpsc::Sender<Entry<P>>,
    pub available: Arc<AtomicUsize>,
    pub closed: CancellationToken,
}

impl<P> Clone for PoolConnection<P> {
    fn clone(&self) -> Self {
        Self {
            pool_id: self.pool_id,
            pool_tx: self.pool_tx.clone(),
            available: Arc::clone(&self.available),
            closed: self.closed.clone(),
        }
    }
}

impl<P> PoolConnection<P> {
    /// Make an entry available. Gives the entry back if the pool is closed.
    pub fn push(&self, entry: Entry<P>) -> Result<(), Entry<P>> {
        if self.closed.is_cancelled() {
            return Err(entry);
        }

        self.send_available(entry)
    }

    /// Queue an entry without consulting the closed flag. Fails once `close`
    /// has shut the receiving side.
    fn send_available(&self, entry: Entry<P>) -> Result<(), Entry<P>> {
        // Count before sending so a concurrent `get` never decrements first.
        self.available.fetch_add(1, Ordering::AcqRel);
        match self.pool_tx.try_send(entry) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(entry) | TrySendError::Closed(entry)) => {
                self.available.fetch_sub(1, Ordering::AcqRel);
                Err(entry)
            }
        }
    }
}

/// Pool of interchangeable prover handles with cancellable acquisition.
///
/// `P` is opaque to the pool: it is stored and handed out, never inspected.
pub struct ProverPool<P> {
    id: PoolId,
    available_rx: Mutex<mpsc::Receiver<Entry<P>>>,
    connection: PoolConnection<P>,
    residency: Arc<Semaphore>,
    capacity: usize,
}

impl<P> ProverPool<P> {
    /// Create an empty pool that holds at most `capacity` handles.
    ///
    /// A zero-capacity pool is valid; nothing can be added to it, so every
    /// `get` and `add` waits until cancelled or the pool is closed.
    ///
    /// `capacity` is clamped to [`Semaphore::MAX_PERMITS`]; [`capacity`](Self::capacity)
    /// reports the clamped value.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = PoolId::new();

        tracing::debug!(pool = %id, capacity, "Created prover pool");

        Self {
            id,
            available_rx: Mutex::new(rx),
            connection: PoolConnection {
                pool_id: id,
                pool_tx: tx,
                available: Arc::new(AtomicUsize::new(0)),
                closed: CancellationToken::new(),
            },
            residency: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Add a handle, waiting while the pool already holds `capacity` handles.
    ///
    /// On cancellation or close nothing is stored and the handle is returned
    /// in the error.
    pub async fn add(&self, token: &CancellationToken, handle: P) -> Result<(), AddError<P>> {
        let residency = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PoolError::Cancelled),
            _ = self.connection.closed.cancelled() => Err(PoolError::Closed),
            permit = Arc::clone(&self.residency).acquire_owned() => {
                permit.map_err(|_| PoolError::Closed)
            }
        };

        let residency = match residency {
            Ok(permit) => permit,
            Err(reason) => {
                tracing::debug!(pool = %self.id, %reason, "Prover not added");
                return Err(AddError::new(handle, reason));
            }
        };

        match self.connection.push(Entry { handle, residency }) {
            Ok(()) => {
                tracing::debug!(pool = %self.id, available = self.available(), "Prover added to pool");
                Ok(())
            }
            Err(entry) => Err(AddError::new(entry.handle, PoolError::Closed)),
        }
    }

    /// Check out the next available handle, waiting until one is added or
    /// released.
    ///
    /// A token that has already fired wins over an available handle, so a
    /// cancelled caller never takes a handle out of the pool.
    pub async fn get(&self, token: &CancellationToken) -> Result<ProverLease<P>, PoolError> {
        let entry = tokio::select! {
            biased;
            _ = token.cancelled() => Err(PoolError::Cancelled),
            _ = self.connection.closed.cancelled() => Err(PoolError::Closed),
            entry = self.next_available() => entry,
        };

        match entry {
            Ok(entry) => Ok(self.checkout(entry)),
            Err(reason) => {
                tracing::info!(pool = %self.id, %reason, "Prover pool get done");
                Err(reason)
            }
        }
    }

    /// Check out a handle only if one is available right now.
    pub fn try_get(&self) -> Option<ProverLease<P>> {
        if self.is_closed() {
            return None;
        }
        let entry = {
            let mut rx = self.available_rx.try_lock().ok()?;
            rx.try_recv().ok()?
        };
        Some(self.checkout(entry))
    }

    /// Return a lease to this pool.
    ///
    /// A lease from another pool is reported as [`PoolError::ForeignLease`];
    /// its handle still goes back to the pool it came from.
    pub fn release(&self, lease: ProverLease<P>) -> Result<(), PoolError> {
        if lease.pool_id() != self.id {
            tracing::error!(
                pool = %self.id,
                lease_pool = %lease.pool_id(),
                "Bug: lease released to a foreign prover pool"
            );
            lease.release();
            return Err(PoolError::ForeignLease);
        }
        lease.release();
        Ok(())
    }

    /// Permanently close the pool and hand back every available handle.
    ///
    /// Blocked `get`/`add` calls return [`PoolError::Closed`]; later calls do so
    /// immediately. Leases still checked out drop their handle on release.
    pub async fn close(&self) -> Vec<P> {
        if !self.connection.closed.is_cancelled() {
            tracing::info!(pool = %self.id, "Closing prover pool");
        }
        self.connection.closed.cancel();
        self.residency.close();

        let mut rx = self.available_rx.lock().await;
        // A release or add that passed the closed check before `cancel` must
        // not land in the queue after the drain.
        rx.close();
        let mut drained = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            self.connection.available.fetch_sub(1, Ordering::AcqRel);
            drained.push(entry.handle);
        }
        drained
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Handles waiting in the pool.
    pub fn available(&self) -> usize {
        self.connection.available.load(Ordering::Acquire)
    }

    /// Handles owned by the pool: available plus checked out.
    pub fn resident(&self) -> usize {
        self.capacity
            .saturating_sub(self.residency.available_permits())
    }

    pub fn checked_out(&self) -> usize {
        self.resident().saturating_sub(self.available())
    }

    pub fn is_closed(&self) -> bool {
        self.connection.closed.is_cancelled()
    }

    async fn next_available(&self) -> Result<Entry<P>, PoolError> {
        let mut rx = self.available_rx.lock().await;
        rx.recv().await.ok_or(PoolError::Closed)
    }

    fn checkout(&self, entry: Entry<P>) -> ProverLease<P> {
        self.connection.available.fetch_sub(1, Ordering::AcqRel);
        ProverLease::new(entry, self.connection.clone())
    }
}

impl<P> fmt::Debug for ProverPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProverPool")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("resident", &self.resident())
            .field("closed", &self.is_closed())
            .finish()
    }
}
