use anyhow::{Context, Result};

use stacport::config::Config;
use stacport::server::StacportServer;

/// Run the HTTP API until Ctrl+C
pub async fn serve(config: Config) -> Result<()> {
    if let Err(e) = stacport::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let server = StacportServer::new(config).context("Failed to create stacport server")?;

    println!("{}", server.info()?.display());
    println!();
    println!("API Endpoints:");
    println!("  GET    /api/health                                   - Health check");
    println!("  GET    /metrics                                      - Prometheus metrics");
    println!("  GET    /public_catalogs                              - List catalogs");
    println!("  POST   /public_catalogs                              - Register catalog");
    println!("  GET    /public_catalogs/sync                         - Discover and harvest public catalogs");
    println!("  POST   /public_catalogs/{{id}}/harvest                 - Re-harvest one catalog");
    println!("  POST   /public_catalogs/collections/search           - Search collections");
    println!("  POST   /public_catalogs/{{id}}/items/get               - Dispatch ingestion");
    println!("  GET    /public_catalogs/items/update                 - Replay all stored requests");
    println!("  GET    /status_reporting/loading_public_stac_records - Ingestion statuses");
    println!("  GET    /stac/collections                             - Target STAC API proxy");
    println!("  POST   /stac/collections                             - Create collection on target");
    println!("  PUT    /stac/collections                             - Update collection on target");
    println!();

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("stacport server stopped.");
    Ok(())
}
