//! Common test utilities

#![allow(dead_code)]

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stacport::catalog::CatalogRegistry;
use stacport::ingestion::{IngestionBackend, SearchParameters};
use stacport::models::{Catalog, IngestionCounters, NewCatalog};
use stacport::storage::Database;
use stacport::{Error, Result};

/// Fresh in-memory database
pub fn test_db() -> Database {
    Database::in_memory().unwrap()
}

/// Register a catalog named after its host
pub fn register(db: &Database, url: &str) -> Catalog {
    CatalogRegistry::new(db.clone())
        .register(&NewCatalog::new(url.trim_start_matches("https://"), url, "test catalog"))
        .unwrap()
}

/// Counters as reported by the ingestion microservice
pub fn counters(new_items: i64) -> IngestionCounters {
    IngestionCounters {
        newly_stored_collections: vec!["a".to_string()],
        newly_stored_collections_count: 1,
        newly_stored_items_count: new_items,
        ..Default::default()
    }
}

/// Minimal STAC collection document served by `server`
pub fn collection_doc(server: &MockServer, id: &str, bbox: [f64; 4], interval: [Option<&str>; 2]) -> Value {
    json!({
        "id": id,
        "type": "Collection",
        "title": format!("Collection {id}"),
        "description": "test collection",
        "stac_version": "1.0.0",
        "extent": {
            "spatial": {"bbox": [bbox]},
            "temporal": {"interval": [interval]}
        },
        "links": [
            {"rel": "self", "href": format!("{}/collections/{id}", server.uri())},
            {"rel": "items", "href": format!("{}/collections/{id}/items", server.uri())}
        ]
    })
}

/// Serve `/collections`, one items page per collection and a one-feature search
pub async fn mount_catalog(server: &MockServer, docs: &[Value]) {
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "collections": docs })))
        .mount(server)
        .await;

    for doc in docs {
        mount_items(server, doc["id"].as_str().unwrap()).await;
    }

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"features": [{"id": "item-1"}]})))
        .mount(server)
        .await;
}

/// Serve a one-feature items page for collection `id`
pub async fn mount_items(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/collections/{id}/items")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"features": [{"id": "item-1"}]})))
        .mount(server)
        .await;
}

/// Backend that records every request and answers with fixed counters
#[derive(Default)]
pub struct RecordingBackend {
    pub seen: Mutex<Vec<SearchParameters>>,
    pub reject_with: Option<String>,
}

impl RecordingBackend {
    pub fn requests(&self) -> Vec<SearchParameters> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionBackend for RecordingBackend {
    async fn ingest(&self, params: &SearchParameters) -> Result<IngestionCounters> {
        self.seen.lock().unwrap().push(params.clone());
        match &self.reject_with {
            Some(body) => Err(Error::IngestionRejected {
                status: 500,
                body: body.clone(),
            }),
            None => Ok(counters(3)),
        }
    }
}

/// Backend whose call never resolves
pub struct StalledBackend;

#[async_trait]
impl IngestionBackend for StalledBackend {
    async fn ingest(&self, _params: &SearchParameters) -> Result<IngestionCounters> {
        std::future::pending().await
    }
}
