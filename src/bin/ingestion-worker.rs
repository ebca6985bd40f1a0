//! Ingestion Worker Binary
//!
//! Standalone binary running the ingestion poll loop and the stale-claim
//! sweeper against the configured database. One process per worker; run
//! as many as the backlog needs, the claim manager keeps them exclusive.

use std::sync::Arc;
use tokio::signal;
use tracing::info;

use mdas_core::logging::init_structured_logging;
use mdas_core::IngestionCore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_structured_logging();

    info!("Starting MDAS ingestion worker");

    let core = IngestionCore::new().await?;
    let worker = Arc::new(core.build_worker()?);
    let sweeper = Arc::new(core.build_sweeper());

    info!(owner_id = worker.owner_id(), "Worker components assembled");

    let worker_task = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.run().await }
    });
    let sweeper_task = tokio::spawn({
        let sweeper = Arc::clone(&sweeper);
        async move { sweeper.run().await }
    });

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    worker.stop();
    sweeper.stop();
    worker_task.await??;
    sweeper_task.await??;

    info!("Ingestion worker stopped");

    Ok(())
}
