//! Harvesting remote catalogs into the local index, then searching it

mod common;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stacport::catalog::CollectionStore;
use stacport::config::HarvesterConfig;
use stacport::harvester::{CatalogCandidate, CollectionHarvester};
use stacport::ingestion::{SearchParameterStore, SearchParameters};
use stacport::search::SearchIndex;
use stacport::stac::StacClient;
use stacport::storage::Database;
use stacport::Error;

use common::{collection_doc, mount_catalog, mount_items, test_db};

fn harvester(db: &Database) -> CollectionHarvester {
    let config = HarvesterConfig {
        requests_per_second: 200,
        max_concurrent_harvests: 2,
        ..Default::default()
    };
    let client = Arc::new(StacClient::from_config(&config).unwrap());
    CollectionHarvester::new(client, db.clone(), &config)
}

#[tokio::test]
async fn test_harvest_then_search() {
    let server = MockServer::start().await;
    let docs = vec![
        // crosses the query box, open ended
        collection_doc(&server, "sentinel", [-5.0, 45.0, 10.0, 55.0], [Some("2019-01-01T00:00:00Z"), None]),
        // crosses the query box, ended before the query window
        collection_doc(&server, "archive", [-5.0, 45.0, 10.0, 55.0], [Some("1990-01-01T00:00:00.000Z"), Some("2000-12-31T23:59:59.999999")]),
        // ends on the window start
        collection_doc(&server, "edge", [0.5, 50.5, 0.6, 50.6], [None, Some("2021-01-01T00:00:00+00:00")]),
        // elsewhere
        collection_doc(&server, "andes", [-75.0, -20.0, -65.0, -10.0], [None, None]),
    ];
    mount_catalog(&server, &docs).await;

    let db = test_db();
    let report = harvester(&db)
        .harvest_url("Mock", &format!("{}/", server.uri()), "mock catalog")
        .await
        .unwrap();
    assert_eq!(report.indexed, 4);
    assert_eq!(report.skipped, 0);

    let groups = SearchIndex::new(db)
        .search(&[-1.0, 50.0, 1.0, 51.0], "2021-01-01T00:00:00Z/..", None)
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].catalog.url, server.uri());

    let mut ids: Vec<&str> = groups[0].collections.iter().map(|c| c.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, vec!["edge", "sentinel"]);
}

#[tokio::test]
async fn test_reharvest_updates_and_retires() {
    let server = MockServer::start().await;
    let first = vec![
        collection_doc(&server, "keep", [0.0, 0.0, 1.0, 1.0], [None, None]),
        collection_doc(&server, "gone", [0.0, 0.0, 1.0, 1.0], [None, None]),
    ];
    mount_catalog(&server, &first).await;

    let db = test_db();
    let harvester = harvester(&db);
    let report = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    let catalog_id = report.catalog_id;

    let params = SearchParameterStore::new(db.clone());
    params
        .persist(
            catalog_id,
            &SearchParameters {
                source_stac_catalog_url: Some(server.uri()),
                collections: Some(vec!["keep".to_string(), "gone".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    server.reset().await;
    let mut updated = collection_doc(&server, "keep", [2.0, 2.0, 3.0, 3.0], [None, None]);
    updated["title"] = json!("Renamed");
    mount_catalog(&server, &[updated]).await;

    let report = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    assert_eq!(report.catalog_id, catalog_id);
    assert_eq!(report.indexed, 1);
    assert_eq!(report.retired, vec!["gone".to_string()]);

    let rows = CollectionStore::new(db.clone()).list_for_catalog(catalog_id).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Renamed");
    assert_eq!(rows[0].bbox.min_x, 2.0);

    let remaining = params.list_for_catalog(catalog_id, None).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].collection.as_deref(), Some("keep"));
}

/// Serve `first_page` at `/collections` with a next link answered by `second_page`
async fn mount_two_pages(server: &MockServer, first_page: &[serde_json::Value], second_page: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/collections"))
        .and(query_param("page", "2"))
        .respond_with(second_page)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "collections": first_page,
            "links": [
                {"rel": "self", "href": format!("{}/collections", server.uri())},
                {"rel": "next", "href": "/collections?page=2", "type": "application/json"}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_paginated_listing_is_read_to_the_end() {
    let server = MockServer::start().await;
    let a = collection_doc(&server, "a", [0.0, 0.0, 1.0, 1.0], [None, None]);
    let b = collection_doc(&server, "b", [0.0, 0.0, 1.0, 1.0], [None, None]);
    mount_two_pages(
        &server,
        &[a],
        ResponseTemplate::new(200).set_body_json(json!({"collections": [b], "links": []})),
    )
    .await;
    mount_items(&server, "a").await;
    mount_items(&server, "b").await;

    let db = test_db();
    let harvester = harvester(&db);
    let first = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    assert_eq!(first.indexed, 2);

    let params = SearchParameterStore::new(db.clone());
    params
        .persist(
            first.catalog_id,
            &SearchParameters {
                source_stac_catalog_url: Some(server.uri()),
                collections: Some(vec!["b".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    let again = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    assert_eq!(again.indexed, 2);
    assert!(again.retired.is_empty());

    let ids: Vec<String> = CollectionStore::new(db.clone())
        .list_for_catalog(first.catalog_id)
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(params.list_for_catalog(first.catalog_id, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreadable_later_page_retires_nothing() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        &[
            collection_doc(&server, "a", [0.0, 0.0, 1.0, 1.0], [None, None]),
            collection_doc(&server, "b", [0.0, 0.0, 1.0, 1.0], [None, None]),
        ],
    )
    .await;

    let db = test_db();
    let harvester = harvester(&db);
    let first = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    let params = SearchParameterStore::new(db.clone());
    params
        .persist(
            first.catalog_id,
            &SearchParameters {
                source_stac_catalog_url: Some(server.uri()),
                collections: Some(vec!["b".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();

    server.reset().await;
    mount_two_pages(
        &server,
        &[collection_doc(&server, "a", [0.0, 0.0, 1.0, 1.0], [None, None])],
        ResponseTemplate::new(503),
    )
    .await;
    mount_items(&server, "a").await;

    let report = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();
    assert_eq!(report.indexed, 1);
    assert!(report.retired.is_empty());
    assert_eq!(CollectionStore::new(db.clone()).count().unwrap(), 2);
    assert_eq!(params.list_for_catalog(first.catalog_id, None).unwrap().len(), 1);
}

#[tokio::test]
async fn test_collection_without_items_is_skipped() {
    let server = MockServer::start().await;
    let mut no_link = collection_doc(&server, "nolink", [0.0, 0.0, 1.0, 1.0], [None, None]);
    no_link["links"] = json!([]);
    let forbidden = collection_doc(&server, "forbidden", [0.0, 0.0, 1.0, 1.0], [None, None]);

    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collections": [no_link, forbidden]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collections/forbidden/items"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let db = test_db();
    let report = harvester(&db).harvest_url("Mock", &server.uri(), "").await.unwrap();
    assert_eq!(report.indexed, 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(CollectionStore::new(db).count().unwrap(), 0);
}

#[tokio::test]
async fn test_timestamp_failure_leaves_previous_state() {
    let server = MockServer::start().await;
    mount_catalog(
        &server,
        &[collection_doc(&server, "stable", [0.0, 0.0, 1.0, 1.0], [Some("2020-01-01T00:00:00Z"), None])],
    )
    .await;

    let db = test_db();
    let harvester = harvester(&db);
    let first = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap();

    server.reset().await;
    mount_catalog(
        &server,
        &[
            collection_doc(&server, "fresh", [0.0, 0.0, 1.0, 1.0], [None, None]),
            collection_doc(&server, "broken", [0.0, 0.0, 1.0, 1.0], [Some("2020/01/01"), None]),
        ],
    )
    .await;

    let err = harvester.harvest_url("Mock", &server.uri(), "").await.unwrap_err();
    assert!(matches!(err, Error::ConvertingTimestamp(_)));

    let store = CollectionStore::new(db);
    assert_eq!(store.count().unwrap(), 1);
    let rows = store.list_for_catalog(first.catalog_id).unwrap();
    assert_eq!(rows[0].id, "stable");
}

#[tokio::test]
async fn test_sync_candidates_counts_outcomes() {
    let good = MockServer::start().await;
    mount_catalog(&good, &[collection_doc(&good, "c1", [0.0, 0.0, 1.0, 1.0], [None, None])]).await;

    let empty = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collections": []})))
        .mount(&empty)
        .await;

    let db = test_db();
    let report = harvester(&db)
        .sync_candidates(vec![
            CatalogCandidate {
                title: "Good".to_string(),
                url: good.uri(),
                summary: "works".to_string(),
            },
            CatalogCandidate {
                title: "Empty".to_string(),
                url: empty.uri(),
                summary: String::new(),
            },
        ])
        .await;

    assert_eq!(report.candidates, 2);
    assert_eq!(report.harvested, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.collections_indexed, 1);
}
