//! prover-pool: exclusive, cancellable access to proof-generation workers
//! for a rollup coordinator.

pub mod config;
pub mod pipeline;
pub mod pool;
pub mod prover;
pub mod telemetry;

pub use config::{ConfigError, CoordinatorConfig};
pub use pipeline::{BatchResult, PipelineError, ProofPipeline};
pub use pool::{AddError, PoolError, PoolId, ProverLease, ProverPool};
pub use prover::{MockProver, Proof, ProverClient, ProverError, ProverId, ZkInputs};
pub use tokio_util::sync::CancellationToken;
