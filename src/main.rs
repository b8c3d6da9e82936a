// Main entry point - Dependency injection and pipeline startup
use std::sync::Arc;

use anyhow::Context;
use gauge_pipeline::application::pipeline::Pipeline;
use gauge_pipeline::application::readout::Readout;
use gauge_pipeline::infrastructure::config::load_pipeline_config;
use gauge_pipeline::infrastructure::http_source::{candidate_paths, probe_endpoint, HttpSnapshotSource};
use gauge_pipeline::infrastructure::logging::init_tracing;
use gauge_pipeline::presentation::app_state::AppState;
use gauge_pipeline::presentation::console_readout::ConsoleReadout;
use gauge_pipeline::presentation::handlers::diagnostics_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_pipeline_config()?;

    // Initialize tracing
    init_tracing(&config.logging);

    // Pick the index endpoint
    let timeout = config.fetch.timeout();
    let paths = candidate_paths(config.backend.index_path.as_deref());
    let endpoint = probe_endpoint(&config.backend.url, &paths, timeout).await?;

    // Create pipeline state (application layer)
    let pipeline = Pipeline::new(config.store.merge);
    pipeline
        .store()
        .set_on_change(|key| tracing::debug!(target: "pipeline", key, "store changed"));

    // Create source and scheduler (infrastructure layer)
    let source = Arc::new(HttpSnapshotSource::new(endpoint, timeout)?);
    tracing::info!("Polling {} every {:?}", source.endpoint(), config.poll.period());
    let fetcher = Arc::new(pipeline.start(source, config.poll.period(), timeout));

    // Bind configured readouts
    let reconciler = pipeline.reconcile_loop("console", config.reconcile.frame());
    let mut readouts: Vec<Arc<ConsoleReadout>> = Vec::new();
    for readout_config in &config.readouts {
        let readout = Arc::new(ConsoleReadout::from_config(readout_config));
        match reconciler.register(readout.clone(), &readout_config.key) {
            Ok(shape) => {
                tracing::info!("Bound {} as {:?}", readout.label(), shape);
                readouts.push(readout);
            }
            Err(e) => tracing::warn!("Skipping readout {}: {}", readout_config.key, e),
        }
    }
    reconciler.ensure_running();

    // Start diagnostics server (presentation layer)
    if config.diagnostics.enabled {
        let state = Arc::new(AppState {
            pipeline: pipeline.clone(),
            fetcher: fetcher.clone(),
        });
        let listener = tokio::net::TcpListener::bind(config.diagnostics.bind)
            .await
            .with_context(|| format!("Failed to bind diagnostics on {}", config.diagnostics.bind))?;
        tracing::info!("Diagnostics listening on {}", config.diagnostics.bind);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, diagnostics_router(state)).await {
                tracing::error!("Diagnostics server stopped: {}", e);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    reconciler.reset();
    fetcher.stop().await;
    drop(readouts);

    Ok(())
}
