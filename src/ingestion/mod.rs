//! Ingestion orchestration
//!
//! - `parameters`: replayable request records
//! - `status`: job lifecycle rows, settled once by the job or by a callback
//! - `client`: the external ingestion microservice
//! - `runner`: background execution of jobs
//! - `dispatcher`: ties the above together

pub mod client;
pub mod dispatcher;
pub mod parameters;
pub mod runner;
pub mod status;

pub use client::{EndpointCache, EndpointResolver, HttpIngesterClient, IngestionBackend};
pub use dispatcher::{IngestionDispatcher, JobHandle, JobSelector};
pub use parameters::{PersistOutcome, SearchParameterStore, SearchParameters};
pub use runner::{BackgroundRunner, JobCompletion, JobRunner, ManualRunner};
pub use status::{IngestionStatusTracker, TransitionOutcome};
