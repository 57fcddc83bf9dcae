//! Batch proving pipeline.
//!
//! Each batch waits for a free prover from the pool, runs on it exclusively,
//! and hands the prover back:
//! - proof ready: prover released
//! - cancelled: prover told to cancel, then released
//! - prover failed: prover discarded, pool capacity shrinks until a
//!   replacement is added

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::pool::{PoolError, ProverLease, ProverPool};
use crate::prover::{Proof, ProverClient, ProverError, ProverId, ZkInputs};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("prover {prover} failed on batch {batch_num}: {source}")]
    Prover {
        prover: ProverId,
        batch_num: u64,
        #[source]
        source: ProverError,
    },
}

impl PipelineError {
    /// True when the batch was abandoned because of cancellation or shutdown
    /// rather than a prover fault.
    pub fn is_cancelled(&self) -> bool {
        match self {
            PipelineError::Pool(e) => e.is_done(),
            PipelineError::Prover { source, .. } => *source == ProverError::Cancelled,
        }
    }
}

pub type BatchResult = Result<Proof, PipelineError>;

pub struct ProofPipeline<P> {
    pool: Arc<ProverPool<P>>,
}

impl<P: ProverClient + 'static> ProofPipeline<P> {
    pub fn new(pool: Arc<ProverPool<P>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ProverPool<P>> {
        &self.pool
    }

    /// Prove one batch on the next free prover.
    pub async fn prove_batch(
        &self,
        token: &CancellationToken,
        inputs: ZkInputs,
    ) -> Result<Proof, PipelineError> {
        let lease = self.pool.get(token).await?;
        prove_on(lease, token, &inputs).await
    }

    /// Prove batches from `batches` until the channel closes or `token` fires.
    ///
    /// A prover is acquired before each job is spawned, so at most
    /// `pool.capacity()` batches are in flight. In-flight jobs are awaited
    /// before returning.
    pub async fn run(
        &self,
        token: CancellationToken,
        mut batches: mpsc::Receiver<ZkInputs>,
        results: mpsc::Sender<BatchResult>,
    ) {
        let mut jobs = JoinSet::new();

        loop {
            let inputs = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                inputs = batches.recv() => match inputs {
                    Some(inputs) => inputs,
                    None => break,
                },
            };

            let lease = match self.pool.get(&token).await {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::info!(batch = inputs.batch_num, reason = %e, "Batch not assigned to a prover");
                    let _ = results.send(Err(e.into())).await;
                    break;
                }
            };
            tracing::debug!(batch = inputs.batch_num, prover = %lease.id(), "Batch assigned to prover");

            let token = token.clone();
            let results = results.clone();
            jobs.spawn(async move {
                let result = prove_on(lease, &token, &inputs).await;
                let _ = results.send(result).await;
            });

            while let Some(finished) = jobs.try_join_next() {
                log_join_error(finished);
            }
        }

        while let Some(finished) = jobs.join_next().await {
            log_join_error(finished);
        }
        tracing::info!("Proof pipeline stopped");
    }
}

async fn prove_on<P: ProverClient>(
    lease: ProverLease<P>,
    token: &CancellationToken,
    inputs: &ZkInputs,
) -> Result<Proof, PipelineError> {
    let prover = lease.id();
    let batch_num = inputs.batch_num;

    let outcome: Result<Proof, ProverError> = async {
        lease.wait_ready(token).await?;
        lease.calculate_proof(token, inputs).await?;
        lease.get_proof(token).await
    }
    .await;

    match outcome {
        Ok(proof) => {
            tracing::info!(%prover, batch = batch_num, "Batch proof ready");
            lease.release();
            Ok(proof)
        }
        Err(ProverError::Cancelled) => {
            if let Err(e) = lease.cancel().await {
                tracing::warn!(%prover, error = %e, "Failed to cancel prover job");
            }
            lease.release();
            Err(PipelineError::Prover {
                prover,
                batch_num,
                source: ProverError::Cancelled,
            })
        }
        Err(source) => {
            tracing::warn!(%prover, batch = batch_num, error = %source, "Prover failed - discarding");
            if let Err(e) = lease.cancel().await {
                tracing::warn!(%prover, error = %e, "Failed to cancel prover job");
            }
            drop(lease.discard());
            Err(PipelineError::Prover {
                prover,
                batch_num,
                source,
            })
        }
    }
}

fn log_join_error(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        tracing::error!(error = %e, "Proof job panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::prover::MockProver;

    const WAIT: Duration = Duration::from_secs(5);

    async fn seeded_pool(provers: &[Arc<MockProver>]) -> Arc<ProverPool<Arc<MockProver>>> {
        let pool = Arc::new(ProverPool::new(provers.len()));
        let token = CancellationToken::new();
        for prover in provers {
            pool.add(&token, Arc::clone(prover)).await.unwrap();
        }
        pool
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_proves_every_batch() {
        let provers: Vec<_> = (0..2)
            .map(|_| Arc::new(MockProver::new(Duration::from_millis(10))))
            .collect();
        let pool = seeded_pool(&provers).await;
        let pipeline = ProofPipeline::new(Arc::clone(&pool));

        let (batch_tx, batch_rx) = mpsc::channel(8);
        let (result_tx, mut result_rx) = mpsc::channel(8);
        for batch_num in 0..6 {
            batch_tx
                .send(ZkInputs::new(batch_num, vec![batch_num as u8]))
                .await
                .unwrap();
        }
        drop(batch_tx);

        timeout(WAIT, pipeline.run(CancellationToken::new(), batch_rx, result_tx))
            .await
            .unwrap();

        let mut proved = BTreeSet::new();
        while let Some(result) = result_rx.recv().await {
            proved.insert(result.unwrap().batch_num);
        }
        assert_eq!(proved, (0..6).collect::<BTreeSet<u64>>());
        assert_eq!(pool.available(), 2);
        assert!(provers.iter().all(|p| !p.is_busy()));
    }

    #[tokio::test]
    async fn failed_prover_is_discarded() {
        let prover = Arc::new(MockProver::new(Duration::ZERO));
        prover.fail_next_proof();
        let pool = seeded_pool(std::slice::from_ref(&prover)).await;
        let pipeline = ProofPipeline::new(Arc::clone(&pool));
        let token = CancellationToken::new();

        let err = pipeline
            .prove_batch(&token, ZkInputs::new(1, vec![]))
            .await
            .unwrap_err();
        assert!(!err.is_cancelled());
        assert!(matches!(
            err,
            PipelineError::Prover { batch_num: 1, source: ProverError::Failed(_), .. }
        ));
        assert_eq!(pool.resident(), 0);

        let replacement = Arc::new(MockProver::new(Duration::ZERO));
        pool.add(&token, Arc::clone(&replacement)).await.unwrap();
        let proof = pipeline
            .prove_batch(&token, ZkInputs::new(1, vec![]))
            .await
            .unwrap();
        assert_eq!(proof.prover, replacement.id());
    }

    #[tokio::test]
    async fn cancelled_job_releases_prover() {
        let prover = Arc::new(MockProver::new(Duration::from_secs(60)));
        let pool = seeded_pool(std::slice::from_ref(&prover)).await;
        let pipeline = ProofPipeline::new(Arc::clone(&pool));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = timeout(WAIT, pipeline.prove_batch(&token, ZkInputs::new(9, vec![])))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(pool.available(), 1);
        assert!(!prover.is_busy());
    }

    #[tokio::test]
    async fn prove_batch_on_empty_pool_is_cancellable() {
        let pool: Arc<ProverPool<Arc<MockProver>>> = Arc::new(ProverPool::new(1));
        let pipeline = ProofPipeline::new(pool);
        let token = CancellationToken::new();
        token.cancel();

        let err = pipeline
            .prove_batch(&token, ZkInputs::new(1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Pool(PoolError::Cancelled)));
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn run_stops_when_cancelled_waiting_for_prover() {
        let pool: Arc<ProverPool<Arc<MockProver>>> = Arc::new(ProverPool::new(1));
        let pipeline = ProofPipeline::new(pool);

        let (batch_tx, batch_rx) = mpsc::channel(1);
        let (result_tx, mut result_rx) = mpsc::channel(1);
        batch_tx.send(ZkInputs::new(1, vec![])).await.unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        timeout(WAIT, pipeline.run(token, batch_rx, result_tx))
            .await
            .unwrap();

        let result = result_rx.recv().await.unwrap();
        assert!(result.unwrap_err().is_cancelled());
        assert!(result_rx.recv().await.is_none());
    }
}
