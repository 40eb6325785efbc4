//! In-memory [`JobRepository`] for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::{ClaimTicket, DatabaseError, JobRepository};
use crate::program::FundingProgram;
use crate::worker::job::{Job, ProcessingStatus};

#[derive(Default)]
struct State {
    jobs: HashMap<String, Job>,
    programs: HashMap<String, FundingProgram>,
}

/// Same compare-and-set semantics as the SQLite repository, behind one lock.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, DatabaseError> {
        self.state.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    /// Every stored program, in no particular order.
    pub fn programs(&self) -> Result<Vec<FundingProgram>, DatabaseError> {
        Ok(self.lock()?.programs.values().cloned().collect())
    }
}

fn is_claimable(job: &Job, now: DateTime<Utc>) -> bool {
    job.status == ProcessingStatus::Pending && job.next_attempt_at.map_or(true, |at| at <= now)
}

impl JobRepository for MemoryRepository {
    fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let mut state = self.lock()?;
        if state.jobs.contains_key(&job.id) {
            return Err(DatabaseError::DuplicateJob(job.id.clone()));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    fn find_pending_jobs(
        &self,
        batch: Option<&str>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError> {
        let state = self.lock()?;
        let mut pending: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| is_claimable(job, now))
            .filter(|job| batch.is_none() || job.batch_tag.as_deref() == batch)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    fn find_job_ids_by_batch(&self, batch: &str) -> Result<Vec<String>, DatabaseError> {
        let state = self.lock()?;
        let mut jobs: Vec<&Job> = state
            .jobs
            .values()
            .filter(|job| job.batch_tag.as_deref() == Some(batch))
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs.into_iter().map(|job| job.id.clone()).collect())
    }

    fn try_claim(
        &self,
        id: &str,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        let mut state = self.lock()?;
        let Some(job) = state.jobs.get_mut(id) else {
            return Ok(None);
        };
        if !is_claimable(job, now) {
            return Ok(None);
        }
        job.status = ProcessingStatus::Processing;
        job.processing_worker = Some(worker.to_string());
        job.processing_started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    fn save_job(&self, job: &Job, ticket: &ClaimTicket) -> Result<bool, DatabaseError> {
        let mut state = self.lock()?;
        let Some(stored) = state.jobs.get_mut(&job.id) else {
            return Ok(false);
        };
        if ClaimTicket::of(stored).as_ref() != Some(ticket) {
            return Ok(false);
        }
        *stored = job.clone();
        Ok(true)
    }

    fn reset_job(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        let mut state = self.lock()?;
        Ok(state.jobs.get_mut(id).map(|job| {
            job.reset_for_reprocessing(now);
            job.clone()
        }))
    }

    fn find_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
        let state = self.lock()?;
        let mut stale: Vec<Job> = state
            .jobs
            .values()
            .filter(|job| job.status == ProcessingStatus::Processing)
            .filter(|job| job.processing_started_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect();
        stale.sort_by_key(|job| job.processing_started_at);
        Ok(stale)
    }

    fn upsert_funding_program(&self, program: &FundingProgram) -> Result<(), DatabaseError> {
        self.lock()?
            .programs
            .insert(program.id.clone(), program.clone());
        Ok(())
    }

    fn find_program(&self, id: &str) -> Result<Option<FundingProgram>, DatabaseError> {
        Ok(self.lock()?.programs.get(id).cloned())
    }

    fn find_program_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Option<FundingProgram>, DatabaseError> {
        Ok(self
            .lock()?
            .programs
            .values()
            .filter(|p| p.content_hash.as_deref() == Some(hash))
            .max_by_key(|p| p.updated_at)
            .cloned())
    }

    fn count_by_status(&self) -> Result<Vec<(ProcessingStatus, u64)>, DatabaseError> {
        let state = self.lock()?;
        Ok(ProcessingStatus::all()
            .into_iter()
            .map(|status| {
                let count = state.jobs.values().filter(|j| j.status == status).count();
                (status, count as u64)
            })
            .collect())
    }
}
