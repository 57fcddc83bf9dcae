//! Coordinator simulation: seeds a pool with mock provers and proves a run of
//! batches through it until done or interrupted.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info;

use prover_pool::{
    BatchResult, CancellationToken, CoordinatorConfig, MockProver, ProofPipeline, ProverClient,
    ProverPool, ZkInputs, telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();

    let config = CoordinatorConfig::from_env().context("invalid coordinator configuration")?;
    info!(?config, "Starting prover coordinator");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let pool: Arc<ProverPool<Arc<dyn ProverClient>>> =
        Arc::new(ProverPool::new(config.max_server_proofs));
    for _ in 0..config.provers {
        let prover: Arc<dyn ProverClient> = Arc::new(MockProver::new(config.proof_delay));
        let prover_id = prover.id();
        pool.add(&shutdown, prover)
            .await
            .map_err(|e| e.reason)
            .context("failed to seed prover pool")?;
        info!(prover = %prover_id, "Prover added");
    }

    let queue_depth = config.max_server_proofs.max(1);
    let (batch_tx, batch_rx) = mpsc::channel(queue_depth);
    let (result_tx, result_rx) = mpsc::channel(queue_depth);

    let producer = tokio::spawn(produce_batches(shutdown.clone(), batch_tx, config.batches));
    let collector = tokio::spawn(collect_results(result_rx));

    ProofPipeline::new(Arc::clone(&pool))
        .run(shutdown.clone(), batch_rx, result_tx)
        .await;

    producer.await.context("batch producer panicked")?;
    let summary = collector.await.context("result collector panicked")?;

    let idle = pool.close().await;
    info!(
        proved = summary.proved,
        failed = summary.failed,
        cancelled = summary.cancelled,
        idle_provers = idle.len(),
        "Prover coordinator finished"
    );
    Ok(())
}

async fn produce_batches(token: CancellationToken, tx: mpsc::Sender<ZkInputs>, batches: u64) {
    for batch_num in 0..batches {
        let inputs = ZkInputs::new(batch_num, batch_num.to_be_bytes().to_vec());
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            sent = tx.send(inputs) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Summary {
    proved: u64,
    failed: u64,
    cancelled: u64,
}

async fn collect_results(mut rx: mpsc::Receiver<BatchResult>) -> Summary {
    let mut summary = Summary::default();
    while let Some(result) = rx.recv().await {
        match result {
            Ok(proof) => {
                summary.proved += 1;
                tracing::debug!(batch = proof.batch_num, prover = %proof.prover, bytes = proof.data.len(), "Proof collected");
            }
            Err(e) if e.is_cancelled() => summary.cancelled += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(error = %e, "Batch failed");
            }
        }
    }
    summary
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
