use anyhow::{Context, Result};

use stacport::config::Config;
use stacport::search::SearchIndex;

use super::open_database;

fn parse_bbox(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|v| {
            v.trim()
                .parse::<f64>()
                .with_context(|| format!("Invalid bbox value: {v}"))
        })
        .collect()
}

pub fn search(config: Config, bbox: &str, interval: &str, catalog: Option<i64>) -> Result<()> {
    let bbox = parse_bbox(bbox)?;
    let index = SearchIndex::new(open_database(&config)?);
    let groups = index.search(&bbox, interval, catalog)?;

    println!("Searching bbox {bbox:?} within {interval}");
    println!("================================");

    if groups.iter().all(|g| g.collections.is_empty()) {
        println!("\nNo matching collections");
        return Ok(());
    }

    for group in &groups {
        println!(
            "\n{} (#{}) - {} collection(s)",
            group.catalog.name,
            group.catalog.id,
            group.collections.len()
        );
        println!("   URL: {}", group.catalog.url);
        for collection in &group.collections {
            let start = collection
                .temporal_extent_start
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "..".to_string());
            let end = collection
                .temporal_extent_end
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "..".to_string());
            println!("   - {} [{start} / {end}] {}", collection.id, collection.title);
        }
    }

    Ok(())
}
