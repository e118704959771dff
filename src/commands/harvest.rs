use std::sync::Arc;

use anyhow::{Context, Result};

use stacport::config::Config;
use stacport::harvester::CollectionHarvester;
use stacport::stac::StacClient;

use super::open_database;

fn harvester(config: &Config) -> Result<CollectionHarvester> {
    let db = open_database(config)?;
    let client = Arc::new(StacClient::from_config(&config.harvester).context("Failed to create HTTP client")?);
    Ok(CollectionHarvester::new(client, db, &config.harvester))
}

/// Discover every public catalog in the index and harvest it
pub async fn sync(config: Config) -> Result<()> {
    println!("Syncing public catalogs from {}", config.harvester.catalog_index_url);
    println!("================================");

    let harvester = harvester(&config)?;
    let report = harvester
        .sync_public_catalogs()
        .await
        .context("Catalog discovery failed")?;

    println!("  Candidates: {}", report.candidates);
    println!("  Harvested: {}", report.harvested);
    println!("  Rejected: {}", report.rejected);
    println!("  Failed: {}", report.failed);
    println!("  Collections indexed: {}", report.collections_indexed);
    Ok(())
}

/// Harvest a single catalog, registering it first if needed
pub async fn harvest(config: Config, name: &str, url: &str, description: &str) -> Result<()> {
    let harvester = harvester(&config)?;
    let report = harvester
        .harvest_url(name, url, description)
        .await
        .with_context(|| format!("Failed to harvest {url}"))?;

    println!("Harvested {url} (catalog {})", report.catalog_id);
    println!("  Indexed: {}", report.indexed);
    println!("  Skipped: {}", report.skipped);
    if !report.retired.is_empty() {
        println!("  Retired: {}", report.retired.join(", "));
    }
    Ok(())
}
