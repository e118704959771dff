//! Ingestion dispatch, status settlement and replay

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use stacport::catalog::CatalogRegistry;
use stacport::ingestion::{
    BackgroundRunner, EndpointResolver, HttpIngesterClient, IngestionBackend,
    IngestionDispatcher, IngestionStatusTracker, JobRunner, JobSelector, ManualRunner,
    SearchParameterStore, SearchParameters, TransitionOutcome,
};
use stacport::models::IngestionState;
use stacport::metrics;
use stacport::storage::Database;
use stacport::Error;

use common::{counters, register, test_db, RecordingBackend, StalledBackend};

const TARGET: &str = "https://target.example.com";

fn dispatcher(
    db: &Database,
    backend: Arc<dyn IngestionBackend>,
    runner: Arc<dyn JobRunner>,
) -> IngestionDispatcher {
    IngestionDispatcher::new(
        CatalogRegistry::new(db.clone()),
        SearchParameterStore::new(db.clone()),
        IngestionStatusTracker::new(db.clone()),
        backend,
        runner,
        TARGET,
    )
}

fn two_collections() -> SearchParameters {
    SearchParameters {
        collections: Some(vec!["a".to_string(), "b".to_string()]),
        bbox: Some(vec![-1.0, 50.0, 1.0, 51.0]),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_dispatch_returns_before_microservice_answers() {
    let db = test_db();
    let catalog = register(&db, "https://source.example.com");
    let runner = BackgroundRunner::new();
    let dispatcher = dispatcher(&db, Arc::new(StalledBackend), Arc::new(runner.clone()));

    let handle = dispatcher.dispatch(catalog.id, two_collections()).unwrap();
    tokio::task::yield_now().await;

    let stored = SearchParameterStore::new(db.clone())
        .list_for_catalog(catalog.id, None)
        .unwrap();
    assert_eq!(stored.len(), 2);

    let statuses = IngestionStatusTracker::new(db).list().unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].id, handle.callback_id);
    assert_eq!(statuses[0].state, IngestionState::Pending);
    assert_eq!(statuses[0].source_stac_api_url, catalog.url);
    assert_eq!(statuses[0].target_stac_api_url, TARGET);
    assert_eq!(runner.in_flight(), 1);
}

#[tokio::test]
#[serial]
async fn test_dispatch_through_http_microservice() {
    let ingester = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .and(body_partial_json(json!({
            "source_stac_catalog_url": "https://source.example.com",
            "target_stac_catalog_url": TARGET,
            "update": false,
            "collections": ["a", "b"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "newly_stored_collections": ["a", "b"],
            "newly_stored_collections_count": 2,
            "updated_collections": [],
            "updated_collections_count": 0,
            "newly_stored_items_count": 120,
            "updated_items_count": 0,
            "already_stored_items_count": 4
        })))
        .expect(1)
        .mount(&ingester)
        .await;

    let db = test_db();
    let catalog = register(&db, "https://source.example.com/");
    let client = HttpIngesterClient::new(
        EndpointResolver::fixed(format!("{}/ingest", ingester.uri())),
        Duration::from_secs(2),
    )
    .unwrap();
    let runner = BackgroundRunner::new();
    let mut events = runner.subscribe();
    let dispatcher = dispatcher(&db, Arc::new(client), Arc::new(runner.clone()));

    let handle = dispatcher.dispatch(catalog.id, two_collections()).unwrap();
    runner.wait_idle().await;

    let completion = events.recv().await.unwrap();
    assert_eq!(completion.job_id, handle.callback_id);
    assert_eq!(completion.state, Some(IngestionState::Completed));

    let status = IngestionStatusTracker::new(db).get(handle.callback_id).unwrap();
    assert_eq!(status.state, IngestionState::Completed);
    assert!(status.time_finished.is_some());
    assert_eq!(status.counters.newly_stored_items_count, 120);
    assert_eq!(status.counters.already_stored_items_count, 4);
    assert_eq!(status.counters.newly_stored_collections, vec!["a", "b"]);
}

#[tokio::test]
#[serial]
async fn test_rejected_request_marks_job_failed() {
    let db = test_db();
    let catalog = register(&db, "https://source.example.com");
    let backend = Arc::new(RecordingBackend {
        reject_with: Some("collection not found upstream".to_string()),
        ..Default::default()
    });
    let runner = Arc::new(ManualRunner::new());
    let dispatcher = dispatcher(&db, backend, runner.clone());

    metrics::init_metrics().unwrap();
    let failed_before = metrics::job_outcome_total(IngestionState::Failed);

    let handle = dispatcher.dispatch(catalog.id, two_collections()).unwrap();
    let completions = runner.run_all().await;
    assert_eq!(completions[0].state, Some(IngestionState::Failed));
    assert_eq!(metrics::job_outcome_total(IngestionState::Failed), failed_before + 1.0);

    let status = IngestionStatusTracker::new(db).get(handle.callback_id).unwrap();
    assert_eq!(status.state, IngestionState::Failed);
    assert!(status
        .error_message
        .as_deref()
        .is_some_and(|m| m.contains("collection not found upstream")));
}

#[tokio::test]
#[serial]
async fn test_callback_settles_before_direct_response() {
    let db = test_db();
    let catalog = register(&db, "https://source.example.com");
    let runner = Arc::new(ManualRunner::new());
    let dispatcher = dispatcher(&db, Arc::new(RecordingBackend::default()), runner.clone());
    let tracker = IngestionStatusTracker::new(db);

    let handle = dispatcher.dispatch(catalog.id, two_collections()).unwrap();
    assert_eq!(runner.pending(), vec![handle.callback_id]);

    // microservice callback wins the race
    let outcome = tracker.complete(handle.callback_id, &counters(99)).unwrap();
    assert!(matches!(outcome, TransitionOutcome::Applied(_)));

    metrics::init_metrics().unwrap();
    let completed_before = metrics::job_outcome_total(IngestionState::Completed);

    let completions = runner.run_all().await;
    assert_eq!(completions[0].state, Some(IngestionState::Completed));
    // the job did not settle the row, so it is not counted as an outcome
    assert_eq!(metrics::job_outcome_total(IngestionState::Completed), completed_before);

    let status = tracker.get(handle.callback_id).unwrap();
    assert_eq!(status.state, IngestionState::Completed);
    assert_eq!(status.counters.newly_stored_items_count, 99);
}

#[tokio::test]
async fn test_invalid_request_stores_nothing() {
    let db = test_db();
    let catalog = register(&db, "https://source.example.com");
    let runner = Arc::new(ManualRunner::new());
    let dispatcher = dispatcher(&db, Arc::new(RecordingBackend::default()), runner.clone());

    let bad_bbox = SearchParameters {
        bbox: Some(vec![10.0, 50.0, 1.0, 51.0]),
        ..Default::default()
    };
    assert!(matches!(
        dispatcher.dispatch(catalog.id, bad_bbox),
        Err(Error::InvalidBbox(_))
    ));

    let bad_datetime = SearchParameters {
        datetime: Some("yesterday".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        dispatcher.dispatch(catalog.id, bad_datetime),
        Err(Error::ConvertingTimestamp(_))
    ));

    assert!(matches!(
        dispatcher.dispatch(catalog.id + 100, SearchParameters::default()),
        Err(Error::CatalogDoesNotExist(_))
    ));

    assert!(runner.pending().is_empty());
    assert!(SearchParameterStore::new(db.clone()).list_all().unwrap().is_empty());
    assert!(IngestionStatusTracker::new(db).list().unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn test_replay_forces_update_without_storing_again() {
    let db = test_db();
    let source = register(&db, "https://source.example.com");
    let other = register(&db, "https://other.example.com");
    let backend = Arc::new(RecordingBackend::default());
    let runner = Arc::new(ManualRunner::new());
    let dispatcher = dispatcher(&db, backend.clone(), runner.clone());
    let store = SearchParameterStore::new(db.clone());

    dispatcher.dispatch(source.id, two_collections()).unwrap();
    dispatcher
        .dispatch(
            other.id,
            SearchParameters {
                collections: Some(vec!["c".to_string()]),
                ..Default::default()
            },
        )
        .unwrap();
    runner.run_all().await;
    assert_eq!(store.list_all().unwrap().len(), 3);

    let handles = dispatcher
        .replay(&JobSelector::Catalog {
            catalog_id: source.id,
            collections: Some(vec!["b".to_string()]),
        })
        .unwrap();
    assert_eq!(handles.len(), 1);
    runner.run_all().await;

    let replayed = backend.requests().pop().unwrap();
    assert!(replayed.update);
    assert_eq!(replayed.collections, Some(vec!["b".to_string()]));
    assert_eq!(replayed.source_stac_catalog_url.as_deref(), Some(source.url.as_str()));
    assert_eq!(replayed.target_stac_catalog_url.as_deref(), Some(TARGET));
    assert_eq!(replayed.callback_id, Some(handles[0].callback_id));

    let all = dispatcher.replay(&JobSelector::All).unwrap();
    assert_eq!(all.len(), 3);
    runner.run_all().await;

    assert_eq!(store.list_all().unwrap().len(), 3);
    let tracker = IngestionStatusTracker::new(db);
    assert!(tracker.get(all[0].callback_id).unwrap().update);
}

#[tokio::test]
async fn test_replay_unknown_catalog() {
    let db = test_db();
    let runner = Arc::new(ManualRunner::new());
    let dispatcher = dispatcher(&db, Arc::new(RecordingBackend::default()), runner);

    let err = dispatcher
        .replay(&JobSelector::Catalog {
            catalog_id: 42,
            collections: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::CatalogDoesNotExist(_)));
}
