//! Prover pool for exclusive, cancellable access to proof-generation workers.
//!
//! A handle moves through these states:
//! - available → checked out via `get`/`try_get` (a [`ProverLease`])
//! - checked out → available via `release` (or dropping the lease)
//! - checked out → gone via `discard` (capacity freed for a replacement)
//! - available → drained via `close`

mod error;
mod lease;
mod prover_pool;

pub use error::{AddError, PoolError};
pub use lease::ProverLease;
pub use prover_pool::{PoolId, ProverPool};
