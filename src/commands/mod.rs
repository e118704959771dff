pub mod harvest;
pub mod ingest;
pub mod search;
pub mod serve;
pub mod status;

use std::path::Path;

use anyhow::{Context, Result};

use stacport::config::Config;
use stacport::storage::Database;

// Re-export command functions for convenience
pub use harvest::{harvest, sync};
pub use ingest::{ingest, replay, IngestArgs};
pub use search::search;
pub use serve::serve;
pub use status::status;

/// Configuration from `path`, or from the environment when no file is given
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub(crate) fn open_database(config: &Config) -> Result<Database> {
    Database::open(&config.database.sqlite_path).with_context(|| {
        format!(
            "Failed to open database at {}",
            config.database.sqlite_path.display()
        )
    })
}
