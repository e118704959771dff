//! Prometheus metrics for stacport
//!
//! This module provides metrics tracking for:
//! - Harvester: collections indexed, skipped and retired per sync
//! - Ingestion: dispatched jobs, job outcomes, callback transitions, in-flight jobs
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

use crate::models::IngestionState;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for harvester metrics
struct HarvesterMetrics {
    collections: CounterVec,
    harvests: CounterVec,
    harvest_duration: HistogramVec,
}

/// Container for ingestion metrics
struct IngestionMetrics {
    dispatched: CounterVec,
    outcomes: CounterVec,
    transitions: CounterVec,
    in_flight: Gauge,
}

static HARVESTER_METRICS: OnceLock<HarvesterMetrics> = OnceLock::new();

static INGESTION_METRICS: OnceLock<IngestionMetrics> = OnceLock::new();

/// Outcome of the one registration attempt
static METRICS_INIT: OnceLock<Result<(), String>> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once and from several threads; only the first call
/// registers anything, later calls return its outcome.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    METRICS_INIT
        .get_or_init(|| register_all().map_err(|e| e.to_string()))
        .clone()
        .map_err(Into::into)
}

fn register_all() -> Result<(), Box<dyn std::error::Error>> {
    let harvester = HarvesterMetrics {
        collections: register_counter_vec!(
            "stacport_harvester_collections_total",
            "Collections seen by the harvester by result (indexed, skipped, retired)",
            &["result"]
        )?,
        harvests: register_counter_vec!(
            "stacport_harvester_catalogs_total",
            "Catalog harvests by result (success, rejected, failed)",
            &["result"]
        )?,
        harvest_duration: register_histogram_vec!(
            "stacport_harvester_duration_seconds",
            "Time spent harvesting one catalog in seconds",
            &["result"],
            vec![0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
    };

    let ingestion = IngestionMetrics {
        dispatched: register_counter_vec!(
            "stacport_ingestion_dispatched_total",
            "Ingestion jobs dispatched by kind (dispatch, replay)",
            &["kind"]
        )?,
        outcomes: register_counter_vec!(
            "stacport_ingestion_job_outcomes_total",
            "Background ingestion job outcomes by state",
            &["state"]
        )?,
        transitions: register_counter_vec!(
            "stacport_ingestion_status_transitions_total",
            "Status transition attempts by target state and result",
            &["state", "result"]
        )?,
        in_flight: register_gauge!(
            "stacport_ingestion_jobs_in_flight",
            "Ingestion jobs currently waiting on the microservice"
        )?,
    };

    HARVESTER_METRICS
        .set(harvester)
        .map_err(|_| "Harvester metrics already initialized")?;
    INGESTION_METRICS
        .set(ingestion)
        .map_err(|_| "Ingestion metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    HARVESTER_METRICS.get().is_some() && INGESTION_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the collection counts of one catalog harvest
pub fn record_harvest(indexed: usize, skipped: usize, retired: usize) {
    let Some(m) = HARVESTER_METRICS.get() else {
        return;
    };

    for (result, count) in [("indexed", indexed), ("skipped", skipped), ("retired", retired)] {
        if count > 0 {
            m.collections
                .with_label_values(&[result])
                .inc_by(count as f64);
        }
    }
}

/// Record the end of one catalog harvest
pub fn record_harvest_result(result: &str, duration_secs: f64) {
    if let Some(m) = HARVESTER_METRICS.get() {
        m.harvests.with_label_values(&[result]).inc();
        m.harvest_duration
            .with_label_values(&[result])
            .observe(duration_secs);
    }
}

/// Record a dispatched ingestion job
pub fn record_dispatch(kind: &str) {
    if let Some(m) = INGESTION_METRICS.get() {
        m.dispatched.with_label_values(&[kind]).inc();
    }
}

/// Record the outcome of a background ingestion job
pub fn record_job_outcome(state: IngestionState) {
    if let Some(m) = INGESTION_METRICS.get() {
        m.outcomes.with_label_values(&[state.as_str()]).inc();
    }
}

/// Job outcomes recorded so far for `state`, zero before initialization
pub fn job_outcome_total(state: IngestionState) -> f64 {
    INGESTION_METRICS
        .get()
        .map(|m| m.outcomes.with_label_values(&[state.as_str()]).get())
        .unwrap_or_default()
}

/// Record a status transition attempt
pub fn record_status_transition(state: IngestionState, result: &str) {
    if let Some(m) = INGESTION_METRICS.get() {
        m.transitions
            .with_label_values(&[state.as_str(), result])
            .inc();
    }
}

/// Adjust the in-flight job gauge
pub fn set_jobs_in_flight(count: usize) {
    if let Some(m) = INGESTION_METRICS.get() {
        m.in_flight.set(count as f64);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_metrics() {
        let _ = init_metrics();
        record_dispatch("dispatch");
        let text = encode_metrics().unwrap();
        assert!(text.contains("stacport_ingestion_dispatched_total"));
    }

    #[test]
    fn test_recording_does_not_panic() {
        let _ = init_metrics();
        record_harvest(3, 1, 0);
        record_harvest_result("success", 1.5);
        record_job_outcome(IngestionState::Completed);
        record_status_transition(IngestionState::Failed, "already_terminal");
        set_jobs_in_flight(2);
    }
}
