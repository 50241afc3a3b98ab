pub mod cache;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod flush;
pub mod identity;
pub mod merge;
pub mod metrics;
pub mod pending;
pub mod recorder;
pub mod sharded_counter;
pub mod store;
pub mod types;

pub use cache::{CounterCache, MemoryCounterCache, RedisCounterCache};
pub use config::{CliArgs, Config};
pub use engine::ViewCountEngine;
pub use error::{ViewCountError, ViewCountResult};
pub use identity::VisitorDescriptor;
pub use metrics::Metrics;
pub use sharded_counter::ShardedCounter;
pub use store::{HttpViewCountStore, MemoryViewCountStore, ViewCountStore};
pub use types::{ContentId, FlushReport, RecordOutcome, VisitorId};

use anyhow::{Context, Result};

/// Run the standalone flush worker until Ctrl-C, then flush once more.
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(operation = "startup", message = "viewcount flush worker starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    let engine = ViewCountEngine::from_config(config)
        .await
        .context("Failed to initialize view-count engine")?;

    engine.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!(operation = "shutdown", message = "shutdown signal received");

    // Deltas left behind stay in the cache for the next worker
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(operation = "shutdown", error = %e, "final flush did not complete");
    }

    Ok(())
}
