//! Pool outcomes that are not a successful checkout.

use std::fmt;

/// Why a pool operation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The caller's cancellation token fired before the operation completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The pool has been permanently closed.
    #[error("prover pool closed")]
    Closed,

    /// A lease was released to a pool it was not acquired from.
    #[error("lease was not acquired from this prover pool")]
    ForeignLease,
}

impl PoolError {
    /// True for the outcomes that mean "stop waiting": cancellation and close.
    ///
    /// Callers use this to tell an ordinary shutdown apart from a failure.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }
}

/// A handle that could not be added to the pool.
///
/// The handle is given back so the caller keeps ownership of the prover
/// session; nothing was stored in the pool.
#[derive(thiserror::Error)]
#[error("failed to add prover to pool: {reason}")]
pub struct AddError<P> {
    pub handle: P,
    #[source]
    pub reason: PoolError,
}

impl<P> AddError<P> {
    pub(crate) fn new(handle: P, reason: PoolError) -> Self {
        Self { handle, reason }
    }

    pub fn into_handle(self) -> P {
        self.handle
    }
}

impl<P> fmt::Debug for AddError<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddError")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_outcomes() {
        assert!(PoolError::Cancelled.is_done());
        assert!(PoolError::Closed.is_done());
        assert!(!PoolError::ForeignLease.is_done());
    }

    #[test]
    fn add_error_gives_handle_back() {
        let err = AddError::new("prover-a", PoolError::Cancelled);
        assert_eq!(
            err.to_string(),
            "failed to add prover to pool: operation cancelled"
        );
        assert_eq!(err.into_handle(), "prover-a");
    }
}
