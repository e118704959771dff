use std::sync::Arc;

use anyhow::{Context, Result};

use stacport::catalog::CatalogRegistry;
use stacport::config::Config;
use stacport::ingestion::{
    BackgroundRunner, EndpointCache, HttpIngesterClient, IngestionDispatcher,
    IngestionStatusTracker, JobHandle, JobSelector, SearchParameterStore, SearchParameters,
};

use super::open_database;

/// Arguments of the `ingest` command
pub struct IngestArgs {
    pub catalog: i64,
    pub collections: Vec<String>,
    pub bbox: Option<Vec<f64>>,
    pub datetime: Option<String>,
    pub update: bool,
}

struct Jobs {
    dispatcher: IngestionDispatcher,
    tracker: IngestionStatusTracker,
    runner: BackgroundRunner,
}

fn jobs(config: &Config) -> Result<Jobs> {
    let db = open_database(config)?;
    let backend = HttpIngesterClient::from_config(&config.ingestion, EndpointCache::new())
        .context("Failed to create ingestion client")?;
    let runner = BackgroundRunner::new();
    let tracker = IngestionStatusTracker::new(db.clone());
    let dispatcher = IngestionDispatcher::new(
        CatalogRegistry::new(db.clone()),
        SearchParameterStore::new(db),
        tracker.clone(),
        Arc::new(backend),
        Arc::new(runner.clone()),
        config.stac_api.target_url.clone(),
    );
    Ok(Jobs {
        dispatcher,
        tracker,
        runner,
    })
}

/// Dispatch one ingestion request
pub async fn ingest(config: Config, args: IngestArgs, print_status: bool) -> Result<()> {
    let jobs = jobs(&config)?;
    let params = SearchParameters {
        update: args.update,
        bbox: args.bbox,
        datetime: args.datetime,
        collections: (!args.collections.is_empty()).then_some(args.collections),
        ..Default::default()
    };

    let handle = jobs.dispatcher.dispatch(args.catalog, params)?;
    println!("Dispatched ingestion job {}", handle.callback_id);

    settle(&jobs, &[handle], print_status).await
}

/// Replay stored requests with `update = true`
pub async fn replay(
    config: Config,
    catalog: Option<i64>,
    collections: Vec<String>,
    print_status: bool,
) -> Result<()> {
    let jobs = jobs(&config)?;
    let selector = match catalog {
        Some(catalog_id) => JobSelector::Catalog {
            catalog_id,
            collections: (!collections.is_empty()).then_some(collections),
        },
        None => JobSelector::All,
    };

    let handles = jobs.dispatcher.replay(&selector)?;
    println!("Replaying {} stored request(s)", handles.len());
    for handle in &handles {
        println!("  job {}", handle.callback_id);
    }

    settle(&jobs, &handles, print_status).await
}

/// Keep the process alive until every job has settled or Ctrl+C is pressed
async fn settle(jobs: &Jobs, handles: &[JobHandle], print_status: bool) -> Result<()> {
    if handles.is_empty() {
        return Ok(());
    }

    println!("Waiting for the ingestion microservice (Ctrl+C stops tracking, jobs stay pending)...");
    tokio::select! {
        _ = jobs.runner.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nStopped waiting; {} job(s) still running", jobs.runner.in_flight());
            return Ok(());
        }
    }

    if print_status {
        for handle in handles {
            let status = jobs.tracker.get(handle.callback_id)?;
            println!(
                "  job {}: {} (new items {}, updated items {}){}",
                status.id,
                status.state,
                status.counters.newly_stored_items_count,
                status.counters.updated_items_count,
                status
                    .error_message
                    .as_deref()
                    .map(|m| format!(" - {m}"))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}
