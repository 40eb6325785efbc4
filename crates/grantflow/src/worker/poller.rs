//! Feeds claimable jobs from the repository into the worker pool.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::error::WorkerError;
use crate::pipeline::JobStateMachine;
use crate::worker::job::ProcessingStatus;
use crate::worker::pool::{WorkOutcome, WorkResult, WorkerPool};

/// Totals for one `Poller::run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Runs that ended back in PENDING with a backoff.
    pub retried: usize,
    pub reclaimed: usize,
    pub busy: usize,
    pub ownership_lost: usize,
    pub errors: usize,
}

impl PollSummary {
    fn record(&mut self, result: &WorkResult) {
        match &result.outcome {
            WorkOutcome::Finished(report) if report.ownership_lost => self.ownership_lost += 1,
            WorkOutcome::Finished(report) => match report.status {
                ProcessingStatus::Completed => self.completed += 1,
                ProcessingStatus::Skipped => self.skipped += 1,
                ProcessingStatus::Failed => self.failed += 1,
                ProcessingStatus::Pending => self.retried += 1,
                ProcessingStatus::Processing => self.errors += 1,
            },
            WorkOutcome::Busy => self.busy += 1,
            WorkOutcome::Error(_) => self.errors += 1,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed + self.skipped + self.failed + self.retried
    }
}

pub struct Poller {
    machine: Arc<JobStateMachine>,
    pool: WorkerPool,
    batch: Option<String>,
    batch_size: usize,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(
        machine: Arc<JobStateMachine>,
        pool: WorkerPool,
        batch: Option<String>,
        batch_size: usize,
        poll_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            machine,
            pool,
            batch,
            batch_size,
            poll_interval,
            shutdown,
        }
    }

    /// Polls until shutdown. With `once`, returns as soon as nothing is
    /// claimable and nothing is running. Joins the pool before returning.
    pub fn run(self, once: bool) -> Result<PollSummary, WorkerError> {
        let mut summary = PollSummary::default();
        let mut in_flight: HashSet<String> = HashSet::new();

        info!(
            "Polling for jobs{} every {:?}",
            self.batch
                .as_deref()
                .map(|b| format!(" in batch '{}'", b))
                .unwrap_or_default(),
            self.poll_interval
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            match self.machine.reclaim_stale(Utc::now()) {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    warn!("Reclaimed {} stale jobs", reclaimed.len());
                    summary.reclaimed += reclaimed.len();
                }
                Ok(_) => {}
                Err(e) => warn!("Stale claim sweep failed: {}", e),
            }

            let submitted = self.submit_pending(&mut in_flight)?;

            if once && submitted == 0 && in_flight.is_empty() {
                break;
            }

            if in_flight.is_empty() {
                self.idle();
                continue;
            }

            if let Some(result) = self.pool.recv_result_timeout(self.poll_interval) {
                self.collect(result, &mut in_flight, &mut summary);
                while let Some(result) = self.pool.try_recv_result() {
                    self.collect(result, &mut in_flight, &mut summary);
                }
            }
        }

        self.pool.shutdown();
        while let Some(result) = self.pool.try_recv_result() {
            self.collect(result, &mut in_flight, &mut summary);
        }
        self.pool.wait();

        info!(
            "Poller finished: {} completed, {} skipped, {} failed, {} retried",
            summary.completed, summary.skipped, summary.failed, summary.retried
        );
        Ok(summary)
    }

    fn submit_pending(&self, in_flight: &mut HashSet<String>) -> Result<usize, WorkerError> {
        let free = self.pool.capacity().saturating_sub(in_flight.len());
        if free == 0 {
            return Ok(0);
        }

        let repo = self.machine.repository();
        let limit = self.batch_size.min(free) + in_flight.len();
        let pending = match repo.find_pending_jobs(self.batch.as_deref(), Utc::now(), limit) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!("Could not query pending jobs: {}", e);
                return Ok(0);
            }
        };

        let mut submitted = 0;
        for job in pending {
            if submitted == free {
                break;
            }
            if in_flight.contains(&job.id) {
                continue;
            }
            self.pool.submit(job.id.clone())?;
            in_flight.insert(job.id);
            submitted += 1;
        }

        if submitted > 0 {
            debug!("Submitted {} jobs", submitted);
        }
        Ok(submitted)
    }

    fn collect(&self, result: WorkResult, in_flight: &mut HashSet<String>, summary: &mut PollSummary) {
        in_flight.remove(&result.job_id);
        summary.record(&result);
    }

    fn idle(&self) {
        let step = Duration::from_millis(100);
        let mut waited = Duration::ZERO;
        while waited < self.poll_interval && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(step);
            waited += step;
        }
    }
}
