//! Public catalog discovery through a third-party catalog index

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::stac::StacClient;

/// A catalog offered by the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCandidate {
    pub title: String,
    pub url: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    title: String,
    url: String,
    #[serde(default)]
    summary: Option<String>,
    is_private: Option<bool>,
    is_api: Option<bool>,
}

impl IndexEntry {
    /// Only entries explicitly flagged public and API-accessible qualify
    fn is_public_api(&self) -> bool {
        self.is_private == Some(false) && self.is_api == Some(true)
    }
}

/// Fetch the index and keep public, API-accessible catalogs
///
/// Malformed entries are skipped; a non-2xx index response is an error.
pub async fn discover_candidates(client: &StacClient, index_url: &str) -> Result<Vec<CatalogCandidate>> {
    let response = client.get_json(index_url).await?;
    if !response.is_success() {
        return Err(Error::other(format!(
            "catalog index {index_url} answered {}",
            response.status
        )));
    }

    let entries = match response.body {
        Some(Value::Array(entries)) => entries,
        _ => return Err(Error::other(format!("catalog index {index_url} did not return a list"))),
    };
    let total = entries.len();

    let candidates: Vec<CatalogCandidate> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<IndexEntry>(entry) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed index entry");
                None
            }
        })
        .filter(IndexEntry::is_public_api)
        .map(|entry| CatalogCandidate {
            title: entry.title,
            url: entry.url,
            summary: entry.summary.unwrap_or_default(),
        })
        .collect();

    tracing::info!(total, candidates = candidates.len(), "Catalog index read");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_discover_filters_private_and_non_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/catalogs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"title": "Open", "url": "https://open.example.com", "summary": "s", "isPrivate": false, "isApi": true},
                {"title": "Private", "url": "https://private.example.com", "isPrivate": true, "isApi": true},
                {"title": "Static", "url": "https://static.example.com", "isPrivate": false, "isApi": false},
                {"title": "Unflagged", "url": "https://unflagged.example.com"},
                {"url": "https://untitled.example.com", "isPrivate": false, "isApi": true}
            ])))
            .mount(&server)
            .await;

        let client = StacClient::new(50, Duration::from_secs(5)).unwrap();
        let candidates = discover_candidates(&client, &format!("{}/api/catalogs", server.uri()))
            .await
            .unwrap();

        assert_eq!(
            candidates,
            vec![CatalogCandidate {
                title: "Open".to_string(),
                url: "https://open.example.com".to_string(),
                summary: "s".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_discover_index_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = StacClient::new(50, Duration::from_secs(5)).unwrap();
        assert!(discover_candidates(&client, &server.uri()).await.is_err());
    }
}
