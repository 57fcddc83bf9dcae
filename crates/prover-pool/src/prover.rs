//! Prover client seam.
//!
//! The pool never looks inside a handle; the pipeline talks to provers
//! through [`ProverClient`]. [`MockProver`] is an in-memory implementation
//! used by the simulation binary and tests.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Unique identifier for a prover client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProverId(uuid::Uuid);

impl ProverId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        let uuid = uuid::Uuid::parse_str(s)?;
        Ok(Self(uuid))
    }
}

impl Default for ProverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs for proving one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkInputs {
    pub batch_num: u64,
    pub payload: Vec<u8>,
}

impl ZkInputs {
    pub fn new(batch_num: u64, payload: Vec<u8>) -> Self {
        Self { batch_num, payload }
    }
}

/// Proof of one batch, tagged with the prover that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub batch_num: u64,
    pub prover: ProverId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProverError {
    #[error("prover request cancelled")]
    Cancelled,

    #[error("prover is already running a job")]
    Busy,

    #[error("no proof has been requested")]
    NoProof,

    #[error("proof generation failed: {0}")]
    Failed(String),
}

/// A session with one proof-generation server.
///
/// A prover runs one job at a time: `calculate_proof` starts it,
/// `get_proof` waits for the result, `cancel` abandons it.
#[async_trait]
pub trait ProverClient: Send + Sync {
    fn id(&self) -> ProverId;

    /// Wait until the prover can accept a job.
    async fn wait_ready(&self, token: &CancellationToken) -> Result<(), ProverError>;

    /// Start proving `inputs`.
    async fn calculate_proof(
        &self,
        token: &CancellationToken,
        inputs: &ZkInputs,
    ) -> Result<(), ProverError>;

    /// Wait for the proof of the job started by `calculate_proof`.
    async fn get_proof(&self, token: &CancellationToken) -> Result<Proof, ProverError>;

    /// Abandon the current job, if any.
    async fn cancel(&self) -> Result<(), ProverError>;
}

#[async_trait]
impl<T: ProverClient + ?Sized> ProverClient for Arc<T> {
    fn id(&self) -> ProverId {
        (**self).id()
    }

    async fn wait_ready(&self, token: &CancellationToken) -> Result<(), ProverError> {
        (**self).wait_ready(token).await
    }

    async fn calculate_proof(
        &self,
        token: &CancellationToken,
        inputs: &ZkInputs,
    ) -> Result<(), ProverError> {
        (**self).calculate_proof(token, inputs).await
    }

    async fn get_proof(&self, token: &CancellationToken) -> Result<Proof, ProverError> {
        (**self).get_proof(token).await
    }

    async fn cancel(&self) -> Result<(), ProverError> {
        (**self).cancel().await
    }
}

struct MockJob {
    inputs: ZkInputs,
    ready_at: Instant,
}

/// In-memory prover that "proves" a batch by waiting `proof_delay`.
///
/// Starting a second job while one is running fails with
/// [`ProverError::Busy`], the way a real proof server rejects overlapping work.
pub struct MockProver {
    id: ProverId,
    proof_delay: Duration,
    job: Mutex<Option<MockJob>>,
    fail_next: AtomicBool,
}

impl MockProver {
    pub fn new(proof_delay: Duration) -> Self {
        Self {
            id: ProverId::new(),
            proof_delay,
            job: Mutex::new(None),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `calculate_proof` fail.
    pub fn fail_next_proof(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.job().is_some()
    }

    fn job(&self) -> MutexGuard<'_, Option<MockJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProverClient for MockProver {
    fn id(&self) -> ProverId {
        self.id
    }

    async fn wait_ready(&self, token: &CancellationToken) -> Result<(), ProverError> {
        if token.is_cancelled() {
            return Err(ProverError::Cancelled);
        }
        Ok(())
    }

    async fn calculate_proof(
        &self,
        token: &CancellationToken,
        inputs: &ZkInputs,
    ) -> Result<(), ProverError> {
        if token.is_cancelled() {
            return Err(ProverError::Cancelled);
        }

        let mut job = self.job();
        if job.is_some() {
            tracing::error!(prover = %self.id, batch = inputs.batch_num, "Prover received overlapping job");
            return Err(ProverError::Busy);
        }
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(ProverError::Failed(format!(
                "mock prover {} rejected batch {}",
                self.id, inputs.batch_num
            )));
        }

        *job = Some(MockJob {
            inputs: inputs.clone(),
            ready_at: Instant::now() + self.proof_delay,
        });
        Ok(())
    }

    async fn get_proof(&self, token: &CancellationToken) -> Result<Proof, ProverError> {
        let ready_at = self
            .job()
            .as_ref()
            .map(|job| job.ready_at)
            .ok_or(ProverError::NoProof)?;

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ProverError::Cancelled),
            _ = tokio::time::sleep_until(ready_at) => {}
        }

        let job = self.job().take().ok_or(ProverError::NoProof)?;
        let data =
            serde_json::to_vec(&job.inputs).map_err(|e| ProverError::Failed(e.to_string()))?;

        Ok(Proof {
            batch_num: job.inputs.batch_num,
            prover: self.id,
            data,
        })
    }

    async fn cancel(&self) -> Result<(), ProverError> {
        if self.job().take().is_some() {
            tracing::debug!(prover = %self.id, "Mock prover job cancelled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prover_id_display_parses_back() {
        let id = ProverId::new();
        assert_eq!(ProverId::parse(&id.to_string()).unwrap(), id);
        assert!(ProverId::parse("not-a-uuid").is_err());
    }

    #[tokio::test]
    async fn mock_proves_batch() {
        let prover = MockProver::new(Duration::from_millis(10));
        let token = CancellationToken::new();
        let inputs = ZkInputs::new(3, vec![1, 2, 3]);

        prover.wait_ready(&token).await.unwrap();
        prover.calculate_proof(&token, &inputs).await.unwrap();
        assert!(prover.is_busy());

        let proof = prover.get_proof(&token).await.unwrap();
        assert_eq!(proof.batch_num, 3);
        assert_eq!(proof.prover, prover.id());
        let echoed: ZkInputs = serde_json::from_slice(&proof.data).unwrap();
        assert_eq!(echoed, inputs);
        assert!(!prover.is_busy());
    }

    #[tokio::test]
    async fn mock_rejects_overlapping_job() {
        let prover = MockProver::new(Duration::from_secs(60));
        let token = CancellationToken::new();

        prover
            .calculate_proof(&token, &ZkInputs::new(1, vec![]))
            .await
            .unwrap();
        let second = prover.calculate_proof(&token, &ZkInputs::new(2, vec![])).await;
        assert_eq!(second, Err(ProverError::Busy));

        prover.cancel().await.unwrap();
        assert!(!prover.is_busy());
        prover
            .calculate_proof(&token, &ZkInputs::new(2, vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn get_proof_without_job() {
        let prover = MockProver::new(Duration::ZERO);
        let token = CancellationToken::new();
        assert_eq!(prover.get_proof(&token).await, Err(ProverError::NoProof));
    }

    #[tokio::test]
    async fn get_proof_honours_cancellation() {
        let prover = MockProver::new(Duration::from_secs(60));
        let token = CancellationToken::new();
        prover
            .calculate_proof(&token, &ZkInputs::new(1, vec![]))
            .await
            .unwrap();

        token.cancel();
        assert_eq!(prover.get_proof(&token).await, Err(ProverError::Cancelled));
        // The job keeps the prover busy until it is cancelled.
        assert!(prover.is_busy());
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let prover = Arc::new(MockProver::new(Duration::ZERO));
        let token = CancellationToken::new();
        prover.fail_next_proof();

        let err = prover
            .calculate_proof(&token, &ZkInputs::new(1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProverError::Failed(_)));
        assert!(!prover.is_busy());

        prover
            .calculate_proof(&token, &ZkInputs::new(1, vec![]))
            .await
            .unwrap();
    }
}
