//! Acceptance check for remote catalogs

use crate::error::Result;
use crate::stac::client::{collections_url, sample_search_url};
use crate::stac::StacClient;

/// Whether `url` serves a usable STAC API
///
/// Accepted when `/collections` lists at least one collection and a limit-1
/// item search returns exactly one feature. Every other outcome, transport
/// failures included, is a silent rejection.
pub async fn validate(client: &StacClient, url: &str) -> bool {
    match check_catalog(client, url).await {
        Ok(accepted) => {
            if !accepted {
                tracing::debug!(url = %url, "Catalog rejected");
            }
            accepted
        }
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "Catalog unreachable, rejected");
            false
        }
    }
}

async fn check_catalog(client: &StacClient, url: &str) -> Result<bool> {
    let collections = client.get_json(&collections_url(url)).await?;
    if !collections.is_success() || collections.array_len("collections").unwrap_or(0) == 0 {
        return Ok(false);
    }

    let search = client.get_json(&sample_search_url(url)).await?;
    Ok(search.is_success() && search.array_len("features") == Some(1))
}
