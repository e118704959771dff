//! Supervised execution of background ingestion jobs
//!
//! The dispatcher hands each job to a [`JobRunner`] and returns immediately.
//! Two runners exist:
//!
//! - [`BackgroundRunner`] spawns one tokio task per job, counts in-flight
//!   jobs and broadcasts a [`JobCompletion`] when each one ends.
//! - [`ManualRunner`] only queues jobs; tests run them explicitly with
//!   [`ManualRunner::run_all`], which makes ordering deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::sync::{broadcast, Notify};

use crate::models::IngestionState;

/// Boxed job body, resolves to the job's completion record
pub type JobFuture = BoxFuture<'static, JobCompletion>;

/// Emitted when a background job finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    /// Ingestion status id of the job
    pub job_id: i64,
    /// State of the status row after the job, `None` if the row was deleted meanwhile
    pub state: Option<IngestionState>,
}

/// Executes job bodies off the caller's path
pub trait JobRunner: Send + Sync {
    /// Start `job`; must not wait for it
    fn launch(&self, job_id: i64, job: JobFuture);
}

// ============================================================================
// Background runner
// ============================================================================

struct InFlightGuard {
    counter: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::SeqCst) - 1;
        crate::metrics::set_jobs_in_flight(remaining);
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

/// tokio-backed [`JobRunner`]
#[derive(Clone)]
pub struct BackgroundRunner {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    events: broadcast::Sender<JobCompletion>,
}

impl Default for BackgroundRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRunner {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            events,
        }
    }

    /// Subscribe to job completions
    pub fn subscribe(&self) -> broadcast::Receiver<JobCompletion> {
        self.events.subscribe()
    }

    /// Jobs currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no job is running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl JobRunner for BackgroundRunner {
    fn launch(&self, job_id: i64, job: JobFuture) {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::set_jobs_in_flight(running);

        let guard = InFlightGuard {
            counter: self.in_flight.clone(),
            idle: self.idle.clone(),
        };
        let events = self.events.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let completion = job.await;
            tracing::debug!(job_id, state = ?completion.state, "Background job finished");
            // No subscribers is fine
            let _ = events.send(completion);
        });
    }
}

// ============================================================================
// Manual runner
// ============================================================================

/// Queue-only [`JobRunner`] for tests
#[derive(Default)]
pub struct ManualRunner {
    queue: Mutex<Vec<(i64, JobFuture)>>,
}

impl ManualRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of queued, not yet run, jobs
    pub fn pending(&self) -> Vec<i64> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Run every queued job in launch order
    pub async fn run_all(&self) -> Vec<JobCompletion> {
        let jobs = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        let mut completions = Vec::with_capacity(jobs.len());
        for (_, job) in jobs {
            completions.push(job.await);
        }
        completions
    }
}

impl JobRunner for ManualRunner {
    fn launch(&self, job_id: i64, job: JobFuture) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job_id, job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::time::Duration;

    fn job(job_id: i64, delay_ms: u64) -> JobFuture {
        async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            JobCompletion {
                job_id,
                state: Some(IngestionState::Completed),
            }
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_background_runner_tracks_jobs() {
        let runner = BackgroundRunner::new();
        let mut events = runner.subscribe();

        runner.launch(1, job(1, 50));
        runner.launch(2, job(2, 10));
        assert_eq!(runner.in_flight(), 2);

        runner.wait_idle().await;
        assert_eq!(runner.in_flight(), 0);

        let mut finished = vec![
            events.recv().await.unwrap().job_id,
            events.recv().await.unwrap().job_id,
        ];
        finished.sort();
        assert_eq!(finished, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_without_jobs() {
        let runner = BackgroundRunner::new();
        tokio::time::timeout(Duration::from_secs(1), runner.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_manual_runner_defers_until_run() {
        let runner = ManualRunner::new();
        runner.launch(3, job(3, 0));
        runner.launch(4, job(4, 0));
        assert_eq!(runner.pending(), vec![3, 4]);

        let completions = runner.run_all().await;
        assert_eq!(
            completions.iter().map(|c| c.job_id).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert!(runner.pending().is_empty());
    }
}
