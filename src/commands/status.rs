use anyhow::Result;

use stacport::config::Config;
use stacport::ingestion::IngestionStatusTracker;
use stacport::models::IngestionStatus;

use super::open_database;

fn print_status(status: &IngestionStatus) {
    println!("#{} [{}] {} -> {}", status.id, status.state, status.source_stac_api_url, status.target_stac_api_url);
    println!("   Started: {}", status.time_started.to_rfc3339());
    if let Some(finished) = status.time_finished {
        println!("   Finished: {}", finished.to_rfc3339());
    }
    if let Some(message) = &status.error_message {
        println!("   Error: {message}");
    }
    let c = &status.counters;
    println!(
        "   Collections: {} new, {} updated | Items: {} new, {} updated, {} already stored",
        c.newly_stored_collections_count,
        c.updated_collections_count,
        c.newly_stored_items_count,
        c.updated_items_count,
        c.already_stored_items_count
    );
}

pub fn status(config: Config, id: Option<i64>) -> Result<()> {
    let tracker = IngestionStatusTracker::new(open_database(&config)?);

    match id {
        Some(id) => print_status(&tracker.get(id)?),
        None => {
            let rows = tracker.list()?;
            if rows.is_empty() {
                println!("No ingestion jobs recorded");
            }
            for row in &rows {
                print_status(row);
            }
        }
    }
    Ok(())
}
