//! Ingestion orchestration
//!
//! [`IngestionDispatcher::dispatch`] validates a request, records it for
//! later replay, creates a PENDING status row and hands the remote call to a
//! [`JobRunner`]. The caller receives the status id before the microservice
//! answers; the job's outcome is only visible on the status row.
//!
//! [`IngestionDispatcher::replay`] re-launches stored requests with
//! `update = true`. Replayed requests are not persisted a second time.

use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRegistry;
use crate::error::Result;
use crate::ingestion::client::IngestionBackend;
use crate::ingestion::parameters::{SearchParameterStore, SearchParameters};
use crate::ingestion::runner::{JobCompletion, JobRunner};
use crate::ingestion::status::{IngestionStatusTracker, TransitionOutcome};
use crate::models::Catalog;
use crate::stac::geometry::Rectangle;
use crate::stac::temporal::validate_datetime_filter;

/// Handle returned for every launched job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Id of the ingestion status row
    pub callback_id: i64,
}

/// Which stored requests to replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSelector {
    /// Every stored request of every catalog
    All,
    /// Stored requests of one catalog, optionally narrowed to collections
    Catalog {
        catalog_id: i64,
        collections: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, Copy)]
enum LaunchKind {
    Dispatch,
    Replay,
}

impl LaunchKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Replay => "replay",
        }
    }
}

/// Top-level ingestion orchestrator
#[derive(Clone)]
pub struct IngestionDispatcher {
    registry: CatalogRegistry,
    parameters: SearchParameterStore,
    tracker: IngestionStatusTracker,
    backend: Arc<dyn IngestionBackend>,
    runner: Arc<dyn JobRunner>,
    target_url: String,
}

impl IngestionDispatcher {
    pub fn new(
        registry: CatalogRegistry,
        parameters: SearchParameterStore,
        tracker: IngestionStatusTracker,
        backend: Arc<dyn IngestionBackend>,
        runner: Arc<dyn JobRunner>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            parameters,
            tracker,
            backend,
            runner,
            target_url: target_url.into(),
        }
    }

    /// Target catalog stamped on every request
    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// Validate, record and launch one ingestion request
    ///
    /// Fails synchronously on an unknown catalog or a malformed bbox or
    /// datetime, in which case nothing is stored.
    pub fn dispatch(&self, catalog_id: i64, mut params: SearchParameters) -> Result<JobHandle> {
        let catalog = self.registry.get(catalog_id)?;
        validate_parameters(&params)?;

        params.source_stac_catalog_url = Some(catalog.url.clone());
        params.callback_id = None;
        let outcome = self.parameters.persist(catalog.id, &params)?;
        tracing::debug!(
            catalog_id,
            stored = outcome.stored,
            duplicates = outcome.duplicates,
            "Search parameters recorded"
        );

        self.launch(&catalog, params, LaunchKind::Dispatch)
    }

    /// Re-launch stored requests with `update = true`
    pub fn replay(&self, selector: &JobSelector) -> Result<Vec<JobHandle>> {
        let rows = match selector {
            JobSelector::All => self.parameters.list_all()?,
            JobSelector::Catalog {
                catalog_id,
                collections,
            } => {
                self.registry.get(*catalog_id)?;
                self.parameters
                    .list_for_catalog(*catalog_id, collections.as_deref())?
            }
        };

        let mut handles = Vec::with_capacity(rows.len());
        for row in rows {
            let mut params = match row.parameters() {
                Ok(params) => params,
                Err(e) => {
                    tracing::warn!(row_id = row.id, error = %e, "Skipping undecodable stored parameters");
                    continue;
                }
            };
            let catalog = self.registry.get(row.catalog_id)?;
            params.update = true;
            params.source_stac_catalog_url = Some(catalog.url.clone());
            handles.push(self.launch(&catalog, params, LaunchKind::Replay)?);
        }

        tracing::info!(jobs = handles.len(), ?selector, "Replay launched");
        Ok(handles)
    }

    fn launch(
        &self,
        catalog: &Catalog,
        mut params: SearchParameters,
        kind: LaunchKind,
    ) -> Result<JobHandle> {
        params.target_stac_catalog_url = Some(self.target_url.clone());
        let job_id = self
            .tracker
            .create(&catalog.url, &self.target_url, params.update)?;
        params.callback_id = Some(job_id);

        let backend = self.backend.clone();
        let tracker = self.tracker.clone();
        self.runner
            .launch(job_id, run_job(backend, tracker, job_id, params).boxed());

        crate::metrics::record_dispatch(kind.as_str());
        tracing::info!(
            job_id,
            catalog_id = catalog.id,
            kind = kind.as_str(),
            "Ingestion job launched"
        );
        Ok(JobHandle {
            callback_id: job_id,
        })
    }
}

/// Reject malformed bbox or datetime before anything is stored
fn validate_parameters(params: &SearchParameters) -> Result<()> {
    if let Some(bbox) = &params.bbox {
        Rectangle::from_query_bbox(bbox)?;
    }
    if let Some(datetime) = &params.datetime {
        validate_datetime_filter(datetime)?;
    }
    Ok(())
}

/// Background half of a job: call the microservice and settle the status row
async fn run_job(
    backend: Arc<dyn IngestionBackend>,
    tracker: IngestionStatusTracker,
    job_id: i64,
    params: SearchParameters,
) -> JobCompletion {
    let settled = match backend.ingest(&params).await {
        Ok(counters) => tracker.complete(job_id, &counters),
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Ingestion job failed");
            tracker.fail(job_id, &e.failure_message())
        }
    };

    let state = match settled {
        Ok(TransitionOutcome::Applied(status)) => {
            crate::metrics::record_job_outcome(status.state);
            Some(status.state)
        }
        Ok(TransitionOutcome::AlreadyTerminal(status)) => {
            tracing::debug!(job_id, state = %status.state, "Status already settled by callback");
            Some(status.state)
        }
        Err(e) => {
            tracing::warn!(job_id, error = %e, "Could not record ingestion outcome");
            None
        }
    };

    JobCompletion { job_id, state }
}
